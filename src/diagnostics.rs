//! Error Reporter
//!
//! Rewrites a runtime error so its message points at the failing line:
//!
//! ```text
//! error.ejs:2
//!     1| <ul>
//!  >> 2|   <%= user.name %>
//!     3| </ul>
//!
//! Cannot read property 'name' of null
//! ```

use crate::error::TemplateError;

pub const CONTEXT_LINES: usize = 3;
pub const DEFAULT_FILENAME: &str = "ejs";

/// Number the lines around `line` (1-based), marking `line` itself.
pub fn context_window(source: &str, line: usize) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    let failing = line.max(1) - 1;
    let start = failing.saturating_sub(CONTEXT_LINES);
    let end = (failing + CONTEXT_LINES + 1).min(lines.len());

    (start..end)
        .map(|i| {
            let number = i + 1;
            let marker = if number == line { " >> " } else { "    " };
            format!("{}{}| {}", marker, number, lines[i])
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite `err` in place. Only runtime errors carry a rewritable message;
/// anything else is left untouched.
pub fn annotate<'e>(
    err: &'e mut TemplateError,
    source: &str,
    filename: Option<&str>,
    line: usize,
) -> &'e mut TemplateError {
    if let TemplateError::Runtime { message, path } = err {
        let name = filename.unwrap_or(DEFAULT_FILENAME);
        *message = format!(
            "{}:{}\n{}\n\n{}",
            name,
            line,
            context_window(source, line),
            message
        );
        *path = Some(name.to_string());
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine";

    #[test]
    fn test_window_is_clamped() {
        assert_eq!(context_window(SOURCE, 1), " >> 1| one\n    2| two\n    3| three\n    4| four");
        assert_eq!(context_window(SOURCE, 9), "    6| six\n    7| seven\n    8| eight\n >> 9| nine");
    }

    #[test]
    fn test_window_spans_three_each_side() {
        let window = context_window(SOURCE, 5);
        let lines: Vec<_> = window.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "    2| two");
        assert_eq!(lines[3], " >> 5| five");
        assert_eq!(lines[6], "    8| eight");
    }

    #[test]
    fn test_annotate_rewrites_runtime_message() {
        let mut err = TemplateError::runtime("user is not defined");
        annotate(&mut err, "<p>\n<%= user %>\n</p>", Some("error.ejs"), 2);
        assert_eq!(
            err.to_string(),
            "error.ejs:2\n    1| <p>\n >> 2| <%= user %>\n    3| </p>\n\nuser is not defined"
        );
        assert_eq!(err.path(), Some("error.ejs"));
    }

    #[test]
    fn test_annotate_defaults_filename() {
        let mut err = TemplateError::runtime("boom");
        annotate(&mut err, "<%= boom() %>", None, 1);
        assert!(err.to_string().starts_with("ejs:1\n >> 1| <%= boom() %>"));
    }

    #[test]
    fn test_annotate_leaves_other_errors() {
        let mut err = TemplateError::config("settings.root required");
        annotate(&mut err, "x", Some("a.ejs"), 1);
        assert_eq!(err.to_string(), "settings.root required");
    }
}
