//! Multi-document pseudo-transactions with compensating rollback.

mod coordinator;
mod log;
mod operation;
mod state;

pub use coordinator::TransactionCoordinator;
pub use log::{RollbackError, TransactionLog};
pub use operation::{Operation, UpdateChange};
pub use state::{TransactionId, TransactionStatus};
