//! CLI command implementations.

pub mod bulk_read;
pub mod race;
pub mod transfer;
