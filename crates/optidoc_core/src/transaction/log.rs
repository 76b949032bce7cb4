//! The transaction log document.

use super::operation::Operation;
use super::state::{TransactionId, TransactionStatus};
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use optidoc_codec::{from_fields, to_fields, Document, DocumentKey, Fields};
use serde::{Deserialize, Serialize};

/// A compensation that failed during rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackError {
    /// The compensation that failed.
    pub operation: Operation,
    /// Error description.
    pub error: String,
}

/// Durable record of one logical transaction.
///
/// Stored as a document in the log partition and mutated only by the
/// coordinator that owns it, always through a conditional write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLog {
    /// Transaction id, also the log document id.
    pub id: TransactionId,
    /// Current status.
    pub status: TransactionStatus,
    /// Steps, in execution order.
    pub operations: Vec<Operation>,
    /// Index of the last step whose execution has begun.
    pub checkpoint_index: Option<usize>,
    /// Compensations of completed steps; the last entry is undone first.
    pub compensations: Vec<Operation>,
    /// Compensation of the checkpointed step, until the step is recorded
    /// as complete.
    pub in_flight_compensation: Option<Operation>,
    /// Compensations that failed during rollback.
    pub rollback_errors: Vec<RollbackError>,
    /// Failure that started the rollback.
    pub failure: Option<String>,
    /// When the log was created.
    pub created_at: DateTime<Utc>,
    /// When the log reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionLog {
    /// Creates a pending log for the given steps.
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            id: TransactionId::generate(),
            status: TransactionStatus::Pending,
            operations,
            checkpoint_index: None,
            compensations: Vec::new(),
            in_flight_compensation: None,
            rollback_errors: Vec::new(),
            failure: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Moves to `next`, stamping `completed_at` on terminal statuses.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStateTransition`] for illegal moves.
    pub fn transition(&mut self, next: TransactionStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Returns true once no compensation has failed.
    pub fn rollback_was_clean(&self) -> bool {
        self.rollback_errors.is_empty()
    }

    /// Key of the log document.
    pub fn document_key(id: TransactionId, partition_key: &str) -> DocumentKey {
        DocumentKey::new(id.to_string(), partition_key)
    }

    /// Encodes the log as a document.
    pub fn to_document(&self, partition_key: &str) -> CoreResult<Document> {
        let fields: Fields = to_fields(self).map_err(CoreError::Codec)?;
        Ok(Document::with_fields(
            Self::document_key(self.id, partition_key),
            fields,
        ))
    }

    /// Decodes a log document.
    pub fn from_document(document: &Document) -> CoreResult<Self> {
        from_fields(&document.fields).map_err(CoreError::Codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optidoc_codec::{FieldOperation, Value};

    fn log() -> TransactionLog {
        TransactionLog::new(vec![
            Operation::create(Document::new(DocumentKey::new("a", "pk")).field("n", 1)),
            Operation::patch(
                DocumentKey::new("b", "pk"),
                vec![FieldOperation::increment("/n", 2).unwrap()],
            ),
            Operation::delete(DocumentKey::new("c", "pk")),
        ])
    }

    #[test]
    fn new_log_is_pending() {
        let log = log();
        assert_eq!(log.status, TransactionStatus::Pending);
        assert_eq!(log.checkpoint_index, None);
        assert!(log.compensations.is_empty());
        assert!(log.completed_at.is_none());
    }

    #[test]
    fn commit_stamps_completion() {
        let mut log = log();
        log.transition(TransactionStatus::Committed).unwrap();
        assert!(log.completed_at.is_some());
    }

    #[test]
    fn committed_log_cannot_roll_back() {
        let mut log = log();
        log.transition(TransactionStatus::Committed).unwrap();
        let err = log.transition(TransactionStatus::RollingBack).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(log.status, TransactionStatus::Committed);
    }

    #[test]
    fn document_form_uses_wire_names() {
        let mut log = log();
        log.checkpoint_index = Some(1);
        let doc = log.to_document("__transactions").unwrap();
        assert_eq!(doc.key.partition_key, "__transactions");
        assert_eq!(doc.key.id, log.id.to_string());
        assert_eq!(doc.fields.get("status"), Some(&Value::from("PENDING")));
        assert_eq!(doc.fields.get("checkpointIndex"), Some(&Value::Integer(1)));
        assert!(doc.fields.contains_key("rollbackErrors"));
        assert_eq!(TransactionLog::from_document(&doc).unwrap(), log);
    }
}
