//! # optidoc Store
//!
//! Versioned document store contract for optidoc.
//!
//! A store offers single-document operations gated by version tokens and
//! nothing else: no multi-document transactions, no locks. Everything
//! optidoc builds on top (retries, conflict resolution, compensating
//! transactions) goes through the [`DocumentStore`] trait.
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - reference store for tests and demos

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod outcome;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, StoreStats};
pub use outcome::{StatusCode, StoreOutcome};
pub use store::DocumentStore;
