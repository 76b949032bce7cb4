//! # optidoc Testkit
//!
//! Test utilities for optidoc.
//!
//! This crate provides:
//! - Fixtures: JSON-built documents and seeded in-memory stores
//! - Fault-injecting store wrappers
//! - Concurrent stress helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use optidoc_testkit::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn counter_survives_contention() {
//!     let fixture = TestStore::new();
//!     fixture.seed("counter", json!({"n": 0}));
//!     let result =
//!         concurrent_increments(&fixture.ctx, &key("counter"), "n", &StressConfig::default()).await;
//!     assert_eq!(result.failed_ops, 0);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
