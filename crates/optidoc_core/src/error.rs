//! Error types for optidoc core.

use crate::transaction::{TransactionId, TransactionLog, TransactionStatus};
use optidoc_codec::{CodecError, DocumentKey, VersionedDocument};
use optidoc_store::{StatusCode, StoreError};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in optidoc core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The store failed the request.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// The target document does not exist.
    #[error("document not found: {key}")]
    NotFound {
        /// Key of the missing document.
        key: DocumentKey,
    },

    /// A document with this key already exists.
    #[error("document already exists: {key}")]
    Conflict {
        /// Key of the existing document.
        key: DocumentKey,
    },

    /// Every allowed write attempt hit a precondition failure.
    #[error("retries exhausted for {key} after {attempts} write attempts")]
    RetryExhausted {
        /// Key of the contended document.
        key: DocumentKey,
        /// Number of write attempts made.
        attempts: u32,
        /// Last snapshot observed while resolving conflicts.
        last_snapshot: Option<Box<VersionedDocument>>,
    },

    /// A transaction failed and was rolled back.
    #[error("transaction {id} aborted: {reason} ({})", rollback_note(.clean))]
    TransactionAborted {
        /// Transaction id.
        id: TransactionId,
        /// Failure that started the rollback.
        reason: String,
        /// Whether every compensation succeeded.
        clean: bool,
        /// Final state of the transaction log.
        log: Box<TransactionLog>,
    },

    /// Invalid operation or input. Never retried.
    #[error("malformed input: {message}")]
    MalformedInput {
        /// Description of the problem.
        message: String,
    },

    /// The caller cancelled the operation before it reached the store.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller cancelled while a mutating store call was in flight.
    #[error("operation cancelled while a store call was in flight")]
    Interrupted,

    /// Another coordinator owns the transaction log.
    #[error("transaction log {id} is owned by another coordinator")]
    LogContention {
        /// Transaction id.
        id: TransactionId,
    },

    /// Illegal transaction status change.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current status.
        from: TransactionStatus,
        /// Requested status.
        to: TransactionStatus,
    },

    /// The store answered with a status the call cannot produce.
    #[error("unexpected status {status} for {key}")]
    UnexpectedStatus {
        /// Document key.
        key: DocumentKey,
        /// Status received.
        status: StatusCode,
    },
}

impl CoreError {
    /// Create a malformed input error.
    pub fn malformed_input(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(key: &DocumentKey) -> Self {
        Self::NotFound { key: key.clone() }
    }

    /// Create an unexpected status error.
    pub fn unexpected(key: &DocumentKey, status: StatusCode) -> Self {
        Self::UnexpectedStatus {
            key: key.clone(),
            status,
        }
    }

    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Store(e) => e.is_retryable(),
            CoreError::RetryExhausted { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the failed call may still have reached the store.
    ///
    /// An interrupted mutation or a transport failure leaves the outcome
    /// unknown. Every other error is reported after the store refused or
    /// before it was called.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, CoreError::Interrupted | CoreError::Store(StoreError::Transport { .. }))
    }
}

fn rollback_note(clean: &bool) -> &'static str {
    if *clean {
        "rollback clean"
    } else {
        "rollback incomplete"
    }
}

impl From<CodecError> for CoreError {
    fn from(err: CodecError) -> Self {
        if err.is_input_error() {
            Self::MalformedInput {
                message: err.to_string(),
            }
        } else {
            Self::Codec(err)
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPatch(inner) => inner.into(),
            other => Self::Store(other),
        }
    }
}
