//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding values or applying field operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A field path could not be parsed.
    #[error("invalid path '{path}': {message}")]
    InvalidPath {
        /// The offending path text.
        path: String,
        /// Why it was rejected.
        message: String,
    },

    /// A path that must exist does not.
    #[error("path not found: {path}")]
    PathNotFound {
        /// The missing path.
        path: String,
    },

    /// The value at a path has the wrong shape for the operation.
    #[error("type mismatch at '{path}': expected {expected}")]
    TypeMismatch {
        /// Path of the offending value.
        path: String,
        /// Description of the expected type.
        expected: &'static str,
    },

    /// A field operation violates its shape invariants.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the violation.
        message: String,
    },

    /// Numeric overflow while incrementing.
    #[error("integer overflow at '{path}'")]
    IntegerOverflow {
        /// Path of the counter that overflowed.
        path: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a path not found error.
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(path: impl Into<String>, expected: &'static str) -> Self {
        Self::TypeMismatch {
            path: path.into(),
            expected,
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error describes bad caller input rather than
    /// an encoding failure.
    pub fn is_input_error(&self) -> bool {
        !matches!(
            self,
            CodecError::EncodingFailed { .. } | CodecError::DecodingFailed { .. }
        )
    }
}
