//! Scanner - Template Text to Instruction Sequence
//!
//! Splits a template into literal runs and tags. Output tags keep their
//! expression text and filter chain unparsed; code tags keep their body.
//! Both are parsed into expressions later, during lowering.

use std::path::Path;
use std::sync::Arc;

use crate::cache::TemplateCache;
use crate::error::{Result, TemplateError};
use crate::include;
use crate::loader::Loader;

pub const DEFAULT_OPEN: &str = "<%";
pub const DEFAULT_CLOSE: &str = "%>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN, DEFAULT_CLOSE)
    }
}

/// Text and file name of a template, kept for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub text: String,
    pub filename: Option<String>,
}

impl Source {
    pub fn new(text: impl Into<String>, filename: Option<&str>) -> Self {
        Self {
            text: text.into(),
            filename: filename.map(str::to_string),
        }
    }
}

/// One `name[:args]` segment of a filter chain. `args` is the raw,
/// comma-separated argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCall {
    pub name: String,
    pub args: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Literal(String),
    Output {
        expr: String,
        filters: Vec<FilterCall>,
        escape: bool,
        line: usize,
    },
    Code {
        code: String,
        line: usize,
    },
    Include {
        instructions: Vec<Instruction>,
        source: Arc<Source>,
        line: usize,
    },
}

#[derive(Clone, Copy)]
pub struct ParseOptions<'a> {
    pub delimiters: &'a Delimiters,
    /// File being parsed. Includes resolve relative to it.
    pub filename: Option<&'a str>,
    /// Joined in front of resolved include paths.
    pub root: Option<&'a Path>,
    pub view_ext: &'a str,
    pub loader: &'a dyn Loader,
    /// Source cache for included files, present when caching is enabled.
    pub sources: Option<&'a TemplateCache>,
    /// Whether bare identifiers read from the render locals.
    pub bind_locals: bool,
    /// Include nesting level of this parse.
    pub depth: usize,
}

impl<'a> ParseOptions<'a> {
    pub fn new(delimiters: &'a Delimiters, loader: &'a dyn Loader) -> Self {
        Self {
            delimiters,
            filename: None,
            root: None,
            view_ext: "",
            loader,
            sources: None,
            bind_locals: true,
            depth: 0,
        }
    }
}

enum TagKind {
    Escaped,
    Raw,
    Code,
}

pub fn parse(text: &str, options: &ParseOptions<'_>) -> Result<Vec<Instruction>> {
    let open = options.delimiters.open.as_str();
    let close = options.delimiters.close.as_str();
    if open.is_empty() || close.is_empty() {
        return Err(TemplateError::config("open and close delimiters must not be empty"));
    }

    let mut instructions = Vec::new();
    let mut literal = String::new();
    let mut line = 1;
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        if rest.starts_with(open) {
            i += open.len();
            let tag_line = line;

            let kind = match text[i..].chars().next() {
                Some('=') => TagKind::Escaped,
                Some('-') => TagKind::Raw,
                _ => TagKind::Code,
            };
            if !matches!(kind, TagKind::Code) {
                i += 1;
            }

            let end = text[i..]
                .find(close)
                .map(|offset| i + offset)
                .ok_or_else(|| {
                    TemplateError::syntax(format!("Could not find matching close tag \"{}\".", close))
                })?;

            let mut body = &text[i..end];
            line += body.matches('\n').count();
            i = end + close.len();

            let trim_newline = body.ends_with('-');
            if trim_newline {
                body = &body[..body.len() - 1];
            }

            if !literal.is_empty() {
                instructions.push(Instruction::Literal(std::mem::take(&mut literal)));
            }

            match kind {
                TagKind::Escaped | TagKind::Raw => {
                    let (expr, filters) = split_filters(body);
                    instructions.push(Instruction::Output {
                        expr,
                        filters,
                        escape: matches!(kind, TagKind::Escaped),
                        line: tag_line,
                    });
                }
                TagKind::Code => match include_target(body) {
                    Some(name) => {
                        instructions.push(include::inline(name, options, tag_line)?);
                    }
                    None => instructions.push(Instruction::Code {
                        code: body.to_string(),
                        line: tag_line,
                    }),
                },
            }

            if trim_newline {
                if text[i..].starts_with("\r\n") {
                    i += 2;
                    line += 1;
                } else if text[i..].starts_with('\n') {
                    i += 1;
                    line += 1;
                }
            }
            continue;
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        match ch {
            '\r' => {}
            '\n' => {
                literal.push('\n');
                line += 1;
            }
            c => literal.push(c),
        }
        i += ch.len_utf8();
    }

    if !literal.is_empty() {
        instructions.push(Instruction::Literal(literal));
    }
    Ok(instructions)
}

/// `:expr | name:args | name` becomes the base expression and its chain.
/// Without the leading `:` the whole body is the expression.
fn split_filters(body: &str) -> (String, Vec<FilterCall>) {
    let Some(chain) = body.strip_prefix(':') else {
        return (body.trim().to_string(), Vec::new());
    };

    let mut segments = split_outside_quotes(chain, '|').into_iter();
    let expr = segments.next().unwrap_or_default().trim().to_string();
    let filters = segments
        .map(|segment| {
            let segment = segment.trim();
            match segment.split_once(':') {
                Some((name, args)) => FilterCall {
                    name: name.trim().to_string(),
                    args: args.trim().to_string(),
                },
                None => FilterCall {
                    name: segment.to_string(),
                    args: String::new(),
                },
            }
        })
        .collect();
    (expr, filters)
}

fn split_outside_quotes(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == sep => parts.push(std::mem::take(&mut current)),
            None => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Path argument of an `include` directive, if the code body is one.
fn include_target(body: &str) -> Option<&str> {
    let rest = body.trim().strip_prefix("include")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let name = rest.trim();
    let name = name
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .or_else(|| name.strip_prefix('\'').and_then(|n| n.strip_suffix('\'')))
        .unwrap_or(name);
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::FsLoader;

    fn scan(text: &str) -> Result<Vec<Instruction>> {
        let delimiters = Delimiters::default();
        parse(text, &ParseOptions::new(&delimiters, &FsLoader))
    }

    #[test]
    fn test_plain_text_is_one_literal() {
        let text = "<p>no tags</p>\nsecond line";
        assert_eq!(scan(text).unwrap(), vec![Instruction::Literal(text.to_string())]);
    }

    #[test]
    fn test_tag_kinds() {
        let out = scan("<%= a %><%- b %><% c %>").unwrap();
        assert_eq!(
            out,
            vec![
                Instruction::Output { expr: "a".into(), filters: vec![], escape: true, line: 1 },
                Instruction::Output { expr: "b".into(), filters: vec![], escape: false, line: 1 },
                Instruction::Code { code: " c ".into(), line: 1 },
            ]
        );
    }

    #[test]
    fn test_unclosed_tag_names_close_delimiter() {
        let err = scan("<h1>oops</h1><%- name ->").unwrap_err();
        assert_eq!(err.to_string(), "Could not find matching close tag \"%>\".");

        let delimiters = Delimiters::new("{{", "}}");
        let err = parse("{{= name }", &ParseOptions::new(&delimiters, &FsLoader)).unwrap_err();
        assert_eq!(err.to_string(), "Could not find matching close tag \"}}\".");
    }

    #[test]
    fn test_filter_chain_split() {
        let out = scan(r#"<%=: users | map:"name" | join:"::" %>"#).unwrap();
        let Instruction::Output { expr, filters, .. } = &out[0] else {
            panic!("expected output instruction");
        };
        assert_eq!(expr, "users");
        assert_eq!(
            filters,
            &vec![
                FilterCall { name: "map".into(), args: "\"name\"".into() },
                FilterCall { name: "join".into(), args: "\"::\"".into() },
            ]
        );
    }

    #[test]
    fn test_trim_consumes_one_newline() {
        let out = scan("<% if x { -%>\n\nA\n<% } -%>\nB").unwrap();
        assert_eq!(out[1], Instruction::Literal("\nA\n".into()));
        assert_eq!(out[3], Instruction::Literal("B".into()));
    }

    #[test]
    fn test_line_numbers_and_carriage_returns() {
        let out = scan("a\r\nb\n<%= x %>\n<% y\n%><%= z %>").unwrap();
        assert_eq!(out[0], Instruction::Literal("a\nb\n".into()));
        assert!(matches!(out[1], Instruction::Output { line: 3, .. }));
        assert!(matches!(out[3], Instruction::Code { line: 4, .. }));
        assert!(matches!(out[4], Instruction::Output { line: 5, .. }));
    }

    #[test]
    fn test_include_requires_filename() {
        let err = scan("<% include user %>").unwrap_err();
        assert!(matches!(err, TemplateError::Configuration(_)));
    }

    #[test]
    fn test_include_target() {
        assert_eq!(include_target(" include user/show "), Some("user/show"));
        assert_eq!(include_target("include \"pet.css\""), Some("pet.css"));
        assert_eq!(include_target(" included = true"), None);
        assert_eq!(include_target(" if x {"), None);
    }
}
