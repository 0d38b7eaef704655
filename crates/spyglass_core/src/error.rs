//! Error types for the core engine.

use spyglass_types::TypeError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core engine operations.
///
/// Errors are values, never panics; assertions are reserved for
/// invariants the engine itself must maintain.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A value disagrees with an index's declared type.
    #[error("type clash: {expected} index cannot handle {actual}")]
    TypeClash {
        /// The index's value kind.
        expected: String,
        /// A rendering of the offending value.
        actual: String,
    },

    /// The operator is not valid for this index or type.
    #[error("unsupported operator: {op}")]
    UnsupportedOperator {
        /// The offending operator.
        op: String,
    },

    /// A user-provided expression or schema is malformed.
    #[error("parse error: {0}")]
    Parse(#[from] TypeError),

    /// I/O failure: file missing, short read, permission.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk format violation: bad magic, version mismatch, truncation.
    #[error("format error: {message}")]
    Format {
        /// Description of the violation.
        message: String,
    },

    /// Invalid API usage: unknown query ID, regressing append position.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },

    /// Everything else.
    #[error("{message}")]
    Unspecified {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a type clash error.
    pub fn type_clash(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeClash {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an unsupported operator error.
    pub fn unsupported_operator(op: impl ToString) -> Self {
        Self::UnsupportedOperator {
            op: op.to_string(),
        }
    }

    /// Creates a format error.
    pub fn format_error(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unspecified error.
    pub fn unspecified(message: impl Into<String>) -> Self {
        Self::Unspecified {
            message: message.into(),
        }
    }
}
