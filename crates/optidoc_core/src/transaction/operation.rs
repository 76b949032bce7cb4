//! Transaction steps and their compensations.

use crate::error::{CoreError, CoreResult};
use optidoc_codec::{Document, DocumentKey, FieldOperation, Fields, VersionedDocument};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Change carried by an update step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum UpdateChange {
    /// Apply field operations.
    Patch(Vec<FieldOperation>),
    /// Replace the body with a saved image.
    Restore(Fields),
}

/// One step of a logical transaction.
///
/// The pre-image is filled in by the coordinator right before the step
/// runs; callers leave it `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    /// Create a new document.
    Create {
        /// Document to create.
        document: Document,
    },
    /// Modify an existing document.
    Update {
        /// Target document.
        key: DocumentKey,
        /// Change to apply.
        change: UpdateChange,
        /// Snapshot read before the step ran.
        #[serde(default, rename = "preImage")]
        pre_image: Option<VersionedDocument>,
    },
    /// Delete an existing document.
    Delete {
        /// Target document.
        key: DocumentKey,
        /// Snapshot read before the step ran.
        #[serde(default, rename = "preImage")]
        pre_image: Option<VersionedDocument>,
    },
}

impl Operation {
    /// Creates a create step.
    pub fn create(document: Document) -> Self {
        Operation::Create { document }
    }

    /// Creates an update step applying field operations.
    pub fn patch(key: DocumentKey, ops: Vec<FieldOperation>) -> Self {
        Operation::Update {
            key,
            change: UpdateChange::Patch(ops),
            pre_image: None,
        }
    }

    /// Creates an update step restoring a saved body.
    pub fn restore(key: DocumentKey, fields: Fields) -> Self {
        Operation::Update {
            key,
            change: UpdateChange::Restore(fields),
            pre_image: None,
        }
    }

    /// Creates a delete step.
    pub fn delete(key: DocumentKey) -> Self {
        Operation::Delete {
            key,
            pre_image: None,
        }
    }

    /// Key of the target document.
    pub fn key(&self) -> &DocumentKey {
        match self {
            Operation::Create { document } => &document.key,
            Operation::Update { key, .. } | Operation::Delete { key, .. } => key,
        }
    }

    /// Short name of the step kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
        }
    }

    /// Returns the recorded pre-image.
    pub fn pre_image(&self) -> Option<&VersionedDocument> {
        match self {
            Operation::Create { .. } => None,
            Operation::Update { pre_image, .. } | Operation::Delete { pre_image, .. } => {
                pre_image.as_ref()
            }
        }
    }

    /// Records the pre-image of an update or delete.
    pub fn set_pre_image(&mut self, image: Option<VersionedDocument>) {
        match self {
            Operation::Create { .. } => {}
            Operation::Update { pre_image, .. } | Operation::Delete { pre_image, .. } => {
                *pre_image = image;
            }
        }
    }

    /// Checks the step before anything is logged or executed.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Operation::Update {
                change: UpdateChange::Patch(ops),
                key,
                ..
            } => {
                if ops.is_empty() {
                    return Err(CoreError::malformed_input(format!(
                        "update of {key} has no operations"
                    )));
                }
                for op in ops {
                    op.validate()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Computes the step that undoes this one, given the current state of
    /// the target.
    ///
    /// Returns `None` when the step cannot succeed from that state (create
    /// over an existing document, update or delete of a missing one), so
    /// there is nothing to undo.
    pub fn compensation(&self, current: Option<&VersionedDocument>) -> Option<Operation> {
        match (self, current) {
            (Operation::Create { document }, None) => Some(Operation::delete(document.key.clone())),
            (Operation::Create { .. }, Some(_)) => None,
            (Operation::Update { key, .. }, Some(prior)) => {
                Some(Operation::restore(key.clone(), prior.document.fields.clone()))
            }
            (Operation::Delete { .. }, Some(prior)) => Some(Operation::create(prior.document.clone())),
            (Operation::Update { .. } | Operation::Delete { .. }, None) => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.key())
    }
}
