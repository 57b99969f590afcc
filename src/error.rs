//! Error types and source position tracking for workflow conversion.
//!
//! Parse failures carry a [`SourcePosition`] so that a malformed WDL document
//! can be reported with line and column. CWL documents are reported by the
//! offending value instead, since YAML positions are lost once the document is
//! loaded into a `serde_yaml::Value`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Source position information for parse errors.
///
/// Line and column are one-based.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    /// The filename/URI the source was loaded from (may be empty for strings)
    pub uri: String,
    /// One-based line number where the construct starts
    pub line: u32,
    /// One-based column number where the construct starts
    pub column: u32,
}

impl SourcePosition {
    pub fn new(uri: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            uri: uri.into(),
            line,
            column,
        }
    }

    /// Compute the position of byte `offset` within `source`.
    pub fn from_offset(uri: &str, source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() as u32 + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() as u32 + 1,
            None => before.chars().count() as u32 + 1,
        };
        Self::new(uri, line, column)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.uri, self.line, self.column)
        }
    }
}

/// Main error type for conversion failures.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Source text does not have the structure of a WDL document
    #[error("Syntax error at {pos}: {message}")]
    Syntax { pos: SourcePosition, message: String },

    /// A CWL document declares a `class` this crate cannot convert
    #[error("Unknown CWL class: {class}")]
    UnknownClass { class: String },

    /// A CWL document has the wrong shape (not a mapping, bad field types, ...)
    #[error("Invalid CWL document: {message}")]
    InvalidDocument { message: String },

    /// YAML could not be loaded or emitted
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A memory or disk size string could not be normalized
    #[error("Invalid {field} value: {value:?}")]
    InvalidResource { field: String, value: String },

    /// File system access failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A converted document failed validation
    #[error("Validation failed: {message}")]
    Validation { message: String },
}

impl ConvertError {
    /// Create a syntax error.
    pub fn syntax_error(pos: SourcePosition, message: impl Into<String>) -> Self {
        ConvertError::Syntax {
            pos,
            message: message.into(),
        }
    }

    /// Create an invalid-document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        ConvertError::InvalidDocument {
            message: message.into(),
        }
    }

    /// Create an I/O error bound to a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the source position for this error, if available.
    pub fn source_position(&self) -> Option<&SourcePosition> {
        match self {
            ConvertError::Syntax { pos, .. } => Some(pos),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_offset() {
        let source = "version 1.0\ntask a {\n  bad\n}";
        let offset = source.find("bad").unwrap();
        let pos = SourcePosition::from_offset("a.wdl", source, offset);
        assert_eq!(pos.line, 3);
        assert_eq!(pos.column, 3);
        assert_eq!(pos.to_string(), "a.wdl:3:3");
    }

    #[test]
    fn test_position_first_line() {
        let pos = SourcePosition::from_offset("", "task", 0);
        assert_eq!((pos.line, pos.column), (1, 1));
        assert_eq!(pos.to_string(), "1:1");
    }

    #[test]
    fn test_error_display() {
        let err = ConvertError::syntax_error(SourcePosition::new("x.wdl", 2, 5), "Expected task name");
        assert_eq!(err.to_string(), "Syntax error at x.wdl:2:5: Expected task name");
        assert!(err.source_position().is_some());

        let err = ConvertError::UnknownClass {
            class: "ExpressionTool".to_string(),
        };
        assert!(err.to_string().contains("ExpressionTool"));
        assert!(err.source_position().is_none());
    }
}
