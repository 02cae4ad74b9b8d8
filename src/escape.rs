//! HTML escaping for `<%= %>` output.

/// Signature of a replacement escaper supplied through compile options.
pub type Escaper = fn(&str) -> String;

/// Substitute `& < > ' "` in a single pass. Existing entities are not
/// recognized, so `&nbsp;` becomes `&amp;nbsp;`.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
