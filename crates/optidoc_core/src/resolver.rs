//! Conflict resolution after a failed conditional write.
//!
//! When a conditional write fails because the document moved on, the
//! caller re-reads the document and hands the fresh snapshot to
//! [`ConflictResolver::resolve`] with the operations it still wants to
//! apply. The resolver is pure: it decides per operation whether the
//! intent is still valid, already satisfied, or superseded, and returns
//! the operations worth retrying against the fresh token.
//!
//! Rules, in order:
//! - `Increment`, `Replace`, `Set` and `Remove` on a path that no longer
//!   exists are dropped, as is a `Move` whose source is gone
//! - `Set`, `Replace` and `Add` are dropped when the stored value already
//!   equals the intended one
//! - `Increment` keeps its delta and is re-applied to the current value
//! - anything else is decided by the [`TieBreakPolicy`]

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, TimeZone, Utc};
use optidoc_codec::{Document, FieldOperation, FieldPath, Fields, OperationKind, Value, VersionToken, VersionedDocument};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Decides whether an incoming operation overrides a concurrently stored value.
pub trait TieBreakPolicy: Send + Sync + fmt::Debug {
    /// Returns true if `op` should still be applied on top of `stored`.
    ///
    /// `intent_at` is the logical time at which the caller formed the
    /// intent.
    fn incoming_wins(&self, stored: &Document, op: &FieldOperation, intent_at: DateTime<Utc>) -> bool;
}

/// Compares the document's last-modified timestamp with the intent time.
///
/// The incoming operation wins only if its intent is strictly newer than
/// the stored timestamp. A missing or unreadable timestamp lets the
/// incoming operation win. Timestamps are read as RFC 3339 text or as
/// integer milliseconds since the Unix epoch.
#[derive(Debug, Clone)]
pub struct TimestampPolicy {
    field: FieldPath,
}

impl TimestampPolicy {
    /// Creates a policy reading the given top-level field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: FieldPath::field(field),
        }
    }

    /// Reads the stored timestamp, if present and parseable.
    pub fn stored_timestamp(&self, stored: &Document) -> Option<DateTime<Utc>> {
        match stored.get(&self.field)? {
            Value::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            Value::Integer(millis) => Utc.timestamp_millis_opt(*millis).single(),
            _ => None,
        }
    }
}

impl TieBreakPolicy for TimestampPolicy {
    fn incoming_wins(&self, stored: &Document, _op: &FieldOperation, intent_at: DateTime<Utc>) -> bool {
        match self.stored_timestamp(stored) {
            Some(stored_at) => intent_at > stored_at,
            None => true,
        }
    }
}

/// Last writer wins: the incoming operation always applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncomingWins;

impl TieBreakPolicy for IncomingWins {
    fn incoming_wins(&self, _: &Document, _: &FieldOperation, _: DateTime<Utc>) -> bool {
        true
    }
}

/// First writer wins: a concurrently stored value is never overridden.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredWins;

impl TieBreakPolicy for StoredWins {
    fn incoming_wins(&self, _: &Document, _: &FieldOperation, _: DateTime<Utc>) -> bool {
        false
    }
}

/// Why an operation was dropped during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The stored value already matches the intent.
    Unchanged,
    /// The targeted path no longer exists.
    PathAbsent,
    /// The tie-break policy kept the stored value.
    Superseded,
}

/// An operation removed from the retry set.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedOperation {
    /// The dropped operation.
    pub operation: FieldOperation,
    /// Why it was dropped.
    pub reason: DropReason,
}

/// Result of resolving a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Operations to retry, in their original order.
    pub ops: Vec<FieldOperation>,
    /// Token of the snapshot the operations were resolved against.
    pub token: VersionToken,
    /// Operations that will not be retried.
    pub dropped: Vec<DroppedOperation>,
}

impl Resolution {
    /// Returns true if nothing is left to write.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Pure per-operation conflict resolver.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    policy: Arc<dyn TieBreakPolicy>,
}

enum Verdict {
    Keep,
    Drop(DropReason),
}

impl ConflictResolver {
    /// Creates a resolver with the given tie-break policy.
    pub fn new(policy: Arc<dyn TieBreakPolicy>) -> Self {
        Self { policy }
    }

    /// Resolves `ops` against the latest snapshot.
    ///
    /// Operations are evaluated in order against a working copy of the
    /// snapshot, so a kept operation is visible to the ones after it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedInput`] if an operation is invalid, if
    /// an increment targets a non-numeric value, or if a kept operation
    /// cannot be applied to the snapshot.
    pub fn resolve(
        &self,
        latest: &VersionedDocument,
        ops: &[FieldOperation],
        intent_at: DateTime<Utc>,
    ) -> CoreResult<Resolution> {
        let mut working = latest.document.fields.clone();
        let mut kept = Vec::with_capacity(ops.len());
        let mut dropped = Vec::new();

        for op in ops {
            op.validate()?;
            match self.judge(&latest.document, &working, op, intent_at)? {
                Verdict::Keep => {
                    op.apply_to(&mut working)?;
                    kept.push(op.clone());
                }
                Verdict::Drop(reason) => {
                    debug!(document = %latest.key(), op = %op, ?reason, "dropping operation");
                    dropped.push(DroppedOperation {
                        operation: op.clone(),
                        reason,
                    });
                }
            }
        }

        Ok(Resolution {
            ops: kept,
            token: latest.token.clone(),
            dropped,
        })
    }

    fn judge(
        &self,
        stored: &Document,
        working: &Fields,
        op: &FieldOperation,
        intent_at: DateTime<Utc>,
    ) -> CoreResult<Verdict> {
        let current = op.path.resolve(working);
        let verdict = match op.kind {
            OperationKind::Increment => match current {
                None => Verdict::Drop(DropReason::PathAbsent),
                Some(value) if !value.is_number() => {
                    return Err(CoreError::malformed_input(format!(
                        "cannot increment {} holding {}",
                        op.path,
                        value.type_name()
                    )))
                }
                Some(_) => Verdict::Keep,
            },
            OperationKind::Set | OperationKind::Replace | OperationKind::Remove => match current {
                None => Verdict::Drop(DropReason::PathAbsent),
                Some(value) if op.value.as_ref() == Some(value) => Verdict::Drop(DropReason::Unchanged),
                Some(_) => self.tie_break(stored, op, intent_at),
            },
            OperationKind::Add => match current {
                _ if inserts_into_array(working, &op.path) => Verdict::Keep,
                None => Verdict::Keep,
                Some(value) if op.value.as_ref() == Some(value) => Verdict::Drop(DropReason::Unchanged),
                Some(_) => self.tie_break(stored, op, intent_at),
            },
            OperationKind::Move => match op.from.as_ref().and_then(|from| from.resolve(working)) {
                None => Verdict::Drop(DropReason::PathAbsent),
                Some(_) => Verdict::Keep,
            },
        };
        Ok(verdict)
    }

    fn tie_break(&self, stored: &Document, op: &FieldOperation, intent_at: DateTime<Utc>) -> Verdict {
        if self.policy.incoming_wins(stored, op, intent_at) {
            Verdict::Keep
        } else {
            Verdict::Drop(DropReason::Superseded)
        }
    }
}

fn inserts_into_array(root: &Fields, path: &FieldPath) -> bool {
    matches!(
        path.parent().and_then(|parent| parent.resolve(root)),
        Some(Value::Array(_))
    )
}
