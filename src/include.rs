//! Include Resolver
//!
//! `<% include name %>` is resolved while parsing: the named file is read,
//! scanned with the same delimiters and spliced into the including template.
//! Every file goes through the scanner, so a file without tags is included
//! verbatim.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TemplateError};
use crate::syntax::{self, Instruction, ParseOptions, Source};

pub const MAX_INCLUDE_DEPTH: usize = 64;

/// Resolve `name` against the directory of `parent`, appending `view_ext`
/// when `name` carries no extension of its own.
pub fn resolve_include(name: &str, parent: Option<&str>, view_ext: &str) -> Result<PathBuf> {
    let parent = parent
        .ok_or_else(|| TemplateError::config("filename option is required for includes"))?;
    let dir = Path::new(parent).parent().unwrap_or_else(|| Path::new(""));
    let path = dir.join(name);

    if Path::new(name).extension().is_some() {
        return Ok(path);
    }
    let mut with_ext = path.into_os_string();
    with_ext.push(view_ext);
    Ok(PathBuf::from(with_ext))
}

pub(crate) fn inline(name: &str, options: &ParseOptions<'_>, line: usize) -> Result<Instruction> {
    if name.is_empty() {
        return Err(TemplateError::syntax(format!("include on line {} is missing a path", line)));
    }
    let resolved = resolve_include(name, options.filename, options.view_ext)?;
    if options.depth >= MAX_INCLUDE_DEPTH {
        return Err(TemplateError::config(format!(
            "includes nested deeper than {} levels at {}",
            MAX_INCLUDE_DEPTH,
            resolved.display()
        )));
    }
    let path = match options.root {
        Some(root) => root.join(&resolved),
        None => resolved,
    };
    tracing::debug!(include = name, path = %path.display(), "inlining include");

    let text = match options.sources {
        Some(cache) => {
            let key = format!("{}:string", path.display());
            cache.get_or_read(&key, || options.loader.read(&path))?
        }
        None => options.loader.read(&path)?,
    };

    let filename = path.to_string_lossy().into_owned();
    let nested = ParseOptions {
        filename: Some(&filename),
        root: None,
        // Never read: included nodes run inside the including program, under its flag.
        bind_locals: false,
        depth: options.depth + 1,
        ..*options
    };
    let instructions = syntax::parse(&text, &nested)?;

    Ok(Instruction::Include {
        instructions,
        source: Arc::new(Source::new(text, Some(&filename))),
        line,
    })
}
