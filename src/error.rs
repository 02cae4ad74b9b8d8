//! Error Types - One Enum, One Variant Per Failure Class

use thiserror::Error;

pub type Result<T, E = TemplateError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TemplateError {
    /// Missing `root`, missing `filename` in cache mode, include without a parent file.
    #[error("{0}")]
    Configuration(String),

    /// Unterminated tag, malformed expression or unbalanced block.
    #[error("{0}")]
    Syntax(String),

    #[error("{source} {location}")]
    Compile {
        source: Box<TemplateError>,
        location: String,
    },

    /// Raised while a compiled template executes. `path` is set once the
    /// message has been rewritten with a source context window.
    #[error("{message}")]
    Runtime {
        message: String,
        path: Option<String>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),
}

impl TemplateError {
    pub fn runtime(message: impl Into<String>) -> Self {
        TemplateError::Runtime {
            message: message.into(),
            path: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        TemplateError::Syntax(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        TemplateError::Configuration(message.into())
    }

    /// Wrap a parse or lowering failure, naming the file being compiled.
    pub fn compile(source: TemplateError, filename: Option<&str>) -> Self {
        let location = match filename {
            Some(name) => format!("in {}", name),
            None => "while compiling template".to_string(),
        };
        TemplateError::Compile {
            source: Box::new(source),
            location,
        }
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, TemplateError::Runtime { .. })
    }

    /// Source path recorded by the error reporter, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            TemplateError::Runtime { path, .. } => path.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_names_file() {
        let err = TemplateError::compile(TemplateError::syntax("Unexpected token"), Some("fail.ejs"));
        assert_eq!(err.to_string(), "Unexpected token in fail.ejs");

        let err = TemplateError::compile(TemplateError::syntax("Unexpected token"), None);
        assert_eq!(err.to_string(), "Unexpected token while compiling template");
    }

    #[test]
    fn test_io_error_is_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: TemplateError = io.into();
        assert_eq!(err.to_string(), "no such file");
        assert!(err.path().is_none());
    }
}
