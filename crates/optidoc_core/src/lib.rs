//! # optidoc Core
//!
//! Optimistic concurrency on top of a versioned document store.
//!
//! This crate provides:
//! - [`ConditionalAccessor`]: token-guarded reads and writes with typed outcomes
//! - [`ConflictResolver`]: re-derives pending field operations against the
//!   latest snapshot after a precondition failure
//! - [`RetryEngine`]: bounded retry with backoff around the two above
//! - [`TransactionCoordinator`]: multi-document changes with a durable
//!   log and compensating rollback
//! - [`BulkExecutor`] and [`TagTracker`]: bounded fan-out that reuses
//!   previously observed tokens
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use optidoc_codec::{Document, DocumentKey, FieldOperation};
//! use optidoc_core::{Context, CoreConfig, RetryEngine};
//! use optidoc_store::InMemoryStore;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let key = DocumentKey::new("order-1", "orders");
//! store.insert(Document::new(key.clone()).field("counter", 0));
//!
//! let ctx = Context::new(store, CoreConfig::default());
//! let engine = RetryEngine::new(&ctx);
//! let ops = vec![FieldOperation::increment("/counter", 1).unwrap()];
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let mutation = rt.block_on(engine.patch(&key, ops, None, Utc::now())).unwrap();
//! assert_eq!(mutation.attempts, 1);
//! ```
//!
//! ## Cancellation
//!
//! Every store call races the context's cancellation token. Rollback runs on a
//! detached accessor so that compensations finish even after cancellation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod accessor;
mod bulk;
mod config;
mod context;
mod error;
mod resolver;
mod retry;
mod tags;
pub mod transaction;

pub use accessor::{
    ConditionalAccessor, CreateOutcome, DeleteOutcome, PatchOutcome, ReadOutcome, WriteOutcome,
};
pub use bulk::{BulkExecutor, BulkReport};
pub use config::{CoreConfig, RetryConfig, DEFAULT_LOG_PARTITION, DEFAULT_TIMESTAMP_FIELD};
pub use context::Context;
pub use error::{CoreError, CoreResult};
pub use resolver::{
    ConflictResolver, DropReason, DroppedOperation, IncomingWins, Resolution, StoredWins,
    TieBreakPolicy, TimestampPolicy,
};
pub use retry::{Mutation, MutationOutcome, RetryEngine};
pub use tags::{ContentTag, TagTracker, TrackedTag};
pub use transaction::{
    Operation, RollbackError, TransactionCoordinator, TransactionId, TransactionLog,
    TransactionStatus, UpdateChange,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
