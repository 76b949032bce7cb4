//! Error types for store operations.

use optidoc_codec::CodecError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a document store.
///
/// Precondition and existence checks are not errors; they are reported
/// through [`crate::StoreOutcome`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached or failed mid-request.
    #[error("transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
        /// Whether repeating the request may succeed.
        retryable: bool,
    },

    /// The store rejected a patch. The document was not modified.
    #[error("patch rejected: {0}")]
    InvalidPatch(#[from] CodecError),

    /// The store is closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        Self::Transport {
            message: message.into(),
            retryable,
        }
    }

    /// Returns true if the request may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transport { retryable: true, .. })
    }
}
