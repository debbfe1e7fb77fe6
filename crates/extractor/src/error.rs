use thiserror::Error;

/// Result type for extraction operations
pub type Result<T> = std::result::Result<T, ExtractorError>;

/// Errors that can occur while extracting functions from a file
#[derive(Error, Debug)]
pub enum ExtractorError {
    /// Parser could not produce a tree at all
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The grammar rejected the source
    #[error("Syntax error at line {line}, column {column}: {message}")]
    SyntaxError {
        message: String,
        line: u32,
        column: u32,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Tree-sitter error
    #[error("Tree-sitter error: {0}")]
    TreeSitterError(String),
}

impl ExtractorError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a syntax error at a 1-indexed position
    pub fn syntax(msg: impl Into<String>, line: u32, column: u32) -> Self {
        Self::SyntaxError {
            message: msg.into(),
            line,
            column,
        }
    }

    /// Create a tree-sitter error
    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitterError(msg.into())
    }

    /// Only syntax errors are recoverable through the line scanner.
    #[must_use]
    pub const fn is_syntax(&self) -> bool {
        matches!(self, Self::SyntaxError { .. })
    }

    /// Line the error points at, when known
    #[must_use]
    pub const fn line(&self) -> Option<u32> {
        match self {
            Self::SyntaxError { line, .. } => Some(*line),
            _ => None,
        }
    }
}
