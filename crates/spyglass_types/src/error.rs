//! Error types for the data model.

use thiserror::Error;

/// Result type for data model operations.
pub type TypeResult<T> = Result<T, TypeError>;

/// Errors produced by the type and expression layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    /// A user-provided expression or literal is malformed.
    #[error("parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset into the input where parsing failed.
        offset: usize,
        /// Description of the failure.
        message: String,
    },

    /// A value does not conform to the expected type.
    #[error("type clash: expected {expected}, got {actual}")]
    TypeClash {
        /// The expected type.
        expected: String,
        /// A rendering of the offending value.
        actual: String,
    },
}

impl TypeError {
    /// Creates a parse error.
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Creates a type clash error.
    pub fn type_clash(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeClash {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
