//! Write-ahead-log transaction coordinator.

use super::log::{RollbackError, TransactionLog};
use super::operation::{Operation, UpdateChange};
use super::state::{TransactionId, TransactionStatus};
use crate::accessor::{ConditionalAccessor, CreateOutcome, DeleteOutcome, PatchOutcome, ReadOutcome, WriteOutcome};
use crate::config::RetryConfig;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::retry::RetryEngine;
use chrono::Utc;
use optidoc_codec::{Document, VersionToken, VersionedDocument};
use optidoc_store::StatusCode;
use tracing::{debug, info, warn};

/// The log together with the token of its stored copy.
struct LogHandle {
    log: TransactionLog,
    token: VersionToken,
    /// A record whose write may have landed although its reply was lost.
    unconfirmed: Option<TransactionLog>,
}

impl LogHandle {
    fn new(log: TransactionLog, token: VersionToken) -> Self {
        Self {
            log,
            token,
            unconfirmed: None,
        }
    }
}

/// Runs ordered single-document steps as one logical transaction.
///
/// The log is persisted as a document before any step runs and is updated
/// with a conditional write at every checkpoint, so a second coordinator
/// can never drive the same transaction: its writes fail the token check
/// and surface as [`CoreError::LogContention`].
///
/// For step `i` the coordinator:
/// 1. reads the target and computes the compensation from that pre-image
/// 2. persists `checkpointIndex = i` with the compensation in flight
/// 3. executes the step, resolving single-document conflicts by retry
/// 4. pushes the compensation and persists the log
///
/// A failed step moves the log to `ROLLING_BACK`; compensations then run
/// newest first on an accessor detached from cancellation. A failing
/// compensation is recorded in `rollbackErrors` and rollback continues.
/// The in-flight compensation runs only if the step may have reached the
/// store and the target no longer carries its pre-image token.
/// The log always ends `COMMITTED` or `ROLLED_BACK`.
///
/// Log writes that fail with a retryable transport error are repeated. A
/// precondition failure after a lost reply is checked against the stored
/// log: if it holds the record this coordinator wrote, its token is adopted.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    accessor: ConditionalAccessor,
    rollback: ConditionalAccessor,
    engine: RetryEngine,
    retry: RetryConfig,
    partition: String,
}

impl TransactionCoordinator {
    /// Creates a coordinator from a context.
    pub fn new(ctx: &Context) -> Self {
        let accessor = ctx.accessor();
        Self {
            rollback: accessor.detached(),
            accessor,
            engine: RetryEngine::new(ctx),
            retry: ctx.config().retry.clone(),
            partition: ctx.config().log_partition_key.clone(),
        }
    }

    /// Runs `operations` in order.
    ///
    /// Returns the committed log.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MalformedInput`] if a step is invalid; nothing is logged
    /// - [`CoreError::TransactionAborted`] if a step failed and the
    ///   transaction was rolled back; carries the final log
    /// - [`CoreError::LogContention`] if another coordinator took over the log
    pub async fn run(&self, operations: Vec<Operation>) -> CoreResult<TransactionLog> {
        for op in &operations {
            op.validate()?;
        }

        let mut handle = self.open(TransactionLog::new(operations)).await?;
        let id = handle.log.id;
        info!(txn = %id, steps = handle.log.operations.len(), "transaction started");

        for index in 0..handle.log.operations.len() {
            if let Err(cause) = self.forward(&mut handle, index).await {
                return self.abort(handle, cause).await;
            }
        }
        self.commit(handle).await
    }

    /// Loads a stored log.
    pub async fn load(&self, id: TransactionId) -> CoreResult<Option<TransactionLog>> {
        let key = TransactionLog::document_key(id, &self.partition);
        match self.accessor.read(&key, None).await? {
            ReadOutcome::Found(doc) => TransactionLog::from_document(&doc.document).map(Some),
            ReadOutcome::NotFound => Ok(None),
            ReadOutcome::NotModified => Err(CoreError::unexpected(&key, StatusCode::NotModified)),
        }
    }

    /// Takes over a transaction left unfinished by a failed coordinator and
    /// rolls it back.
    ///
    /// Terminal logs are returned unchanged. The in-flight step, if any, is
    /// undone first; since it may never have applied, its compensation
    /// tolerates a missing or already existing target.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if no such log exists
    /// - [`CoreError::LogContention`] if another coordinator owns the log
    pub async fn recover(&self, id: TransactionId) -> CoreResult<TransactionLog> {
        let key = TransactionLog::document_key(id, &self.partition);
        let stored = self.accessor.read_existing(&key).await?;
        let mut handle = LogHandle::new(TransactionLog::from_document(&stored.document)?, stored.token);
        if handle.log.status.is_terminal() {
            return Ok(handle.log);
        }

        warn!(txn = %id, status = %handle.log.status, "recovering transaction");
        if handle.log.status == TransactionStatus::Pending {
            handle
                .log
                .failure
                .get_or_insert_with(|| "coordinator stopped before completion".to_string());
            handle.log.transition(TransactionStatus::RollingBack)?;
        }
        // claims the log; a live coordinator's next write will now fail
        self.persist(&self.accessor, &mut handle).await?;
        self.roll_back(handle).await
    }

    async fn open(&self, log: TransactionLog) -> CoreResult<LogHandle> {
        let document = log.to_document(&self.partition)?;
        match self.accessor.create(&document).await? {
            CreateOutcome::Created(stored) => Ok(LogHandle::new(log, stored.token)),
            CreateOutcome::Conflict => Err(CoreError::LogContention { id: log.id }),
        }
    }

    async fn persist(&self, accessor: &ConditionalAccessor, handle: &mut LogHandle) -> CoreResult<()> {
        let document = handle.log.to_document(&self.partition)?;
        let mut attempt = 0;
        loop {
            let outcome = accessor.write(&document, Some(&handle.token)).await;
            let err = match outcome {
                Ok(WriteOutcome::Written(token)) => {
                    handle.token = token;
                    handle.unconfirmed = None;
                    return Ok(());
                }
                Ok(WriteOutcome::PreconditionFailed) => {
                    if self.adopt_unconfirmed(accessor, handle).await? {
                        continue;
                    }
                    CoreError::LogContention { id: handle.log.id }
                }
                Ok(WriteOutcome::NotFound) => CoreError::LogContention { id: handle.log.id },
                Err(e) => e,
            };
            if err.outcome_unknown() {
                handle.unconfirmed = Some(handle.log.clone());
            }
            attempt += 1;
            if !err.is_retryable() || attempt >= self.retry.max_attempts() {
                return Err(err);
            }
            warn!(txn = %handle.log.id, attempt, error = %err, "log write failed, retrying");
            accessor.pause(self.retry.delay_for_attempt(attempt)).await?;
        }
    }

    /// Takes the token of the stored log if it is the unconfirmed record.
    async fn adopt_unconfirmed(&self, accessor: &ConditionalAccessor, handle: &mut LogHandle) -> CoreResult<bool> {
        let Some(unconfirmed) = handle.unconfirmed.take() else {
            return Ok(false);
        };
        let key = TransactionLog::document_key(handle.log.id, &self.partition);
        if let ReadOutcome::Found(stored) = accessor.read(&key, None).await? {
            if TransactionLog::from_document(&stored.document)? == unconfirmed {
                debug!(txn = %handle.log.id, "lost log write had landed");
                handle.token = stored.token;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn forward(&self, handle: &mut LogHandle, index: usize) -> CoreResult<()> {
        let id = handle.log.id;
        let key = handle.log.operations[index].key().clone();
        let pre_image = match self.accessor.read(&key, None).await? {
            ReadOutcome::Found(doc) => Some(doc),
            ReadOutcome::NotFound => None,
            ReadOutcome::NotModified => return Err(CoreError::unexpected(&key, StatusCode::NotModified)),
        };

        let step = &mut handle.log.operations[index];
        step.set_pre_image(pre_image.clone());
        let compensation = step.compensation(pre_image.as_ref());
        let step = step.clone();
        handle.log.checkpoint_index = Some(index);
        handle.log.in_flight_compensation = compensation.clone();
        if let Err(e) = self.persist(&self.accessor, handle).await {
            // the step itself never started
            handle.log.in_flight_compensation = None;
            return Err(e);
        }
        debug!(txn = %id, step = index, op = %step, "checkpoint");

        let applied_over = self.execute(&step).await?;
        let compensation = match applied_over {
            Some(base) => step.compensation(Some(&base)),
            None => compensation,
        };
        handle.log.in_flight_compensation = None;
        handle.log.compensations.extend(compensation);
        self.persist(&self.accessor, handle).await?;
        debug!(txn = %id, step = index, "step complete");
        Ok(())
    }

    /// Executes a forward step. Returns the snapshot the step was applied
    /// over when it differs from the recorded pre-image.
    async fn execute(&self, step: &Operation) -> CoreResult<Option<VersionedDocument>> {
        match step {
            Operation::Create { document } => match self.accessor.create(document).await? {
                CreateOutcome::Created(_) => Ok(None),
                CreateOutcome::Conflict => Err(CoreError::Conflict {
                    key: document.key.clone(),
                }),
            },
            Operation::Update {
                key,
                change,
                pre_image,
            } => {
                let pre_image = pre_image.as_ref().ok_or_else(|| CoreError::not_found(key))?;
                match change {
                    UpdateChange::Patch(ops) => {
                        let mutation = self
                            .engine
                            .patch(key, ops.clone(), Some(pre_image.token.clone()), Utc::now())
                            .await?;
                        Ok(mutation.base)
                    }
                    UpdateChange::Restore(fields) => {
                        let document = Document::with_fields(key.clone(), fields.clone());
                        self.accessor.write(&document, None).await?;
                        Ok(None)
                    }
                }
            }
            Operation::Delete { key, pre_image } => {
                let pre_image = pre_image.as_ref().ok_or_else(|| CoreError::not_found(key))?;
                let mutation = self.engine.delete(key, Some(pre_image.token.clone())).await?;
                Ok(mutation.base)
            }
        }
    }

    async fn commit(&self, mut handle: LogHandle) -> CoreResult<TransactionLog> {
        let pending = handle.log.clone();
        handle.log.transition(TransactionStatus::Committed)?;
        match self.persist(&self.accessor, &mut handle).await {
            Ok(()) => {
                info!(txn = %handle.log.id, "transaction committed");
                Ok(handle.log)
            }
            Err(cause) => {
                let committed = handle.log.clone();
                if handle.unconfirmed.is_some()
                    && self
                        .adopt_unconfirmed(&self.rollback, &mut handle)
                        .await
                        .unwrap_or(false)
                {
                    info!(txn = %committed.id, "transaction committed");
                    return Ok(committed);
                }
                handle.log = pending;
                self.abort(handle, cause).await
            }
        }
    }

    async fn abort(&self, mut handle: LogHandle, cause: CoreError) -> CoreResult<TransactionLog> {
        if let CoreError::LogContention { .. } = cause {
            warn!(txn = %handle.log.id, "log taken over by another coordinator");
            return Err(cause);
        }

        warn!(txn = %handle.log.id, error = %cause, "step failed, rolling back");
        // a refused step never applied; only an unknown outcome needs undoing
        if !cause.outcome_unknown() {
            handle.log.in_flight_compensation = None;
        }
        handle.log.failure = Some(cause.to_string());
        handle.log.transition(TransactionStatus::RollingBack)?;
        self.persist_during_rollback(&mut handle).await?;

        let log = self.roll_back(handle).await?;
        Err(CoreError::TransactionAborted {
            id: log.id,
            reason: cause.to_string(),
            clean: log.rollback_was_clean(),
            log: Box::new(log),
        })
    }

    async fn roll_back(&self, mut handle: LogHandle) -> CoreResult<TransactionLog> {
        let id = handle.log.id;

        if let Some(compensation) = handle.log.in_flight_compensation.clone() {
            if self.in_flight_step_may_have_applied(&handle.log).await {
                self.compensate_recorded(&mut handle, compensation, true).await;
            } else {
                debug!(txn = %id, "in-flight step never applied");
            }
            handle.log.in_flight_compensation = None;
            self.persist_during_rollback(&mut handle).await?;
        }

        while let Some(compensation) = handle.log.compensations.pop() {
            self.compensate_recorded(&mut handle, compensation, false).await;
            self.persist_during_rollback(&mut handle).await?;
        }

        handle.log.transition(TransactionStatus::RolledBack)?;
        self.persist_during_rollback(&mut handle).await?;
        info!(
            txn = %id,
            clean = handle.log.rollback_was_clean(),
            failed_compensations = handle.log.rollback_errors.len(),
            "transaction rolled back"
        );
        Ok(handle.log)
    }

    /// Returns false only when the target still carries the token of the
    /// recorded pre-image.
    async fn in_flight_step_may_have_applied(&self, log: &TransactionLog) -> bool {
        let Some(step) = log.checkpoint_index.and_then(|i| log.operations.get(i)) else {
            return true;
        };
        let Some(pre_image) = step.pre_image() else {
            return true;
        };
        !matches!(
            self.rollback.read(step.key(), Some(&pre_image.token)).await,
            Ok(ReadOutcome::NotModified)
        )
    }

    async fn compensate_recorded(&self, handle: &mut LogHandle, compensation: Operation, tolerant: bool) {
        match self.compensate(&compensation, tolerant).await {
            Ok(()) => debug!(txn = %handle.log.id, op = %compensation, "compensated"),
            Err(e) => {
                warn!(txn = %handle.log.id, op = %compensation, error = %e, "compensation failed");
                handle.log.rollback_errors.push(RollbackError {
                    operation: compensation,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Persists rollback progress. Only contention stops the rollback;
    /// other failures are logged and the next checkpoint tries again.
    async fn persist_during_rollback(&self, handle: &mut LogHandle) -> CoreResult<()> {
        match self.persist(&self.rollback, handle).await {
            Err(e @ CoreError::LogContention { .. }) => Err(e),
            Err(e) => {
                warn!(txn = %handle.log.id, error = %e, "failed to persist rollback progress");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn compensate(&self, compensation: &Operation, tolerant: bool) -> CoreResult<()> {
        match compensation {
            Operation::Delete { key, .. } => match self.rollback.delete(key, None).await? {
                DeleteOutcome::Deleted | DeleteOutcome::NotFound => Ok(()),
                DeleteOutcome::PreconditionFailed => {
                    Err(CoreError::unexpected(key, StatusCode::PreconditionFailed))
                }
            },
            Operation::Create { document } => match self.rollback.create(document).await? {
                CreateOutcome::Created(_) => Ok(()),
                CreateOutcome::Conflict if tolerant => Ok(()),
                CreateOutcome::Conflict => Err(CoreError::Conflict {
                    key: document.key.clone(),
                }),
            },
            Operation::Update {
                key,
                change: UpdateChange::Restore(fields),
                ..
            } => {
                let document = Document::with_fields(key.clone(), fields.clone());
                self.rollback.write(&document, None).await.map(|_| ())
            }
            Operation::Update {
                key,
                change: UpdateChange::Patch(ops),
                ..
            } => match self.rollback.patch(key, ops, None).await? {
                PatchOutcome::Patched(_) | PatchOutcome::NotModified => Ok(()),
                PatchOutcome::NotFound if tolerant => Ok(()),
                PatchOutcome::NotFound => Err(CoreError::not_found(key)),
                PatchOutcome::PreconditionFailed => {
                    Err(CoreError::unexpected(key, StatusCode::PreconditionFailed))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoreConfig, RetryConfig};
    use optidoc_codec::{DocumentKey, FieldOperation, Value};
    use optidoc_store::{DocumentStore, InMemoryStore};
    use std::sync::Arc;

    fn key(id: &str) -> DocumentKey {
        DocumentKey::new(id, "accounts")
    }

    fn setup() -> (Arc<InMemoryStore>, Context) {
        let store = Arc::new(InMemoryStore::new());
        store.insert(Document::new(key("alice")).field("balance", 100));
        store.insert(Document::new(key("bob")).field("balance", 20));
        let config = CoreConfig::new().with_retry(RetryConfig::new(2).without_backoff());
        let ctx = Context::new(store.clone(), config);
        (store, ctx)
    }

    fn balance(store: &InMemoryStore, id: &str) -> Option<Value> {
        store.peek(&key(id))?.document.fields.get("balance").cloned()
    }

    fn transfer(amount: i64) -> Vec<Operation> {
        vec![
            Operation::patch(key("alice"), vec![FieldOperation::increment("/balance", -amount).unwrap()]),
            Operation::patch(key("bob"), vec![FieldOperation::increment("/balance", amount).unwrap()]),
        ]
    }

    #[tokio::test]
    async fn commits_all_steps() {
        let (store, ctx) = setup();
        let coordinator = TransactionCoordinator::new(&ctx);

        let log = coordinator.run(transfer(30)).await.unwrap();
        assert_eq!(log.status, TransactionStatus::Committed);
        assert_eq!(log.checkpoint_index, Some(1));
        assert_eq!(log.compensations.len(), 2);
        assert!(log.completed_at.is_some());
        assert_eq!(balance(&store, "alice"), Some(Value::Integer(70)));
        assert_eq!(balance(&store, "bob"), Some(Value::Integer(50)));

        let stored = coordinator.load(log.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Committed);
    }

    #[tokio::test]
    async fn failed_step_rolls_back_earlier_steps() {
        let (store, ctx) = setup();
        let coordinator = TransactionCoordinator::new(&ctx);
        let mut ops = transfer(30);
        ops.push(Operation::patch(key("carol"), vec![FieldOperation::set("/x", 1).unwrap()]));

        let err = coordinator.run(ops).await.unwrap_err();
        let CoreError::TransactionAborted { log, clean, .. } = err else {
            panic!("expected the transaction to abort");
        };
        assert!(clean);
        assert_eq!(log.status, TransactionStatus::RolledBack);
        assert_eq!(log.checkpoint_index, Some(2));
        assert!(log.compensations.is_empty());
        assert!(log.failure.as_deref().unwrap_or_default().contains("carol"));
        assert_eq!(balance(&store, "alice"), Some(Value::Integer(100)));
        assert_eq!(balance(&store, "bob"), Some(Value::Integer(20)));

        let stored = coordinator.load(log.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::RolledBack);
    }

    #[tokio::test]
    async fn create_over_existing_document_aborts() {
        let (store, ctx) = setup();
        let coordinator = TransactionCoordinator::new(&ctx);
        let ops = vec![
            Operation::create(Document::new(key("dave")).field("balance", 0)),
            Operation::create(Document::new(key("alice"))),
        ];
        let err = coordinator.run(ops).await.unwrap_err();
        assert!(matches!(err, CoreError::TransactionAborted { clean: true, .. }));
        assert!(!store.contains(&key("dave")));
        assert_eq!(balance(&store, "alice"), Some(Value::Integer(100)));
    }

    #[tokio::test]
    async fn delete_is_undone_by_recreate() {
        let (store, ctx) = setup();
        let coordinator = TransactionCoordinator::new(&ctx);
        let ops = vec![
            Operation::delete(key("bob")),
            Operation::delete(key("nobody")),
        ];
        assert!(coordinator.run(ops).await.is_err());
        assert_eq!(balance(&store, "bob"), Some(Value::Integer(20)));
    }

    #[tokio::test]
    async fn invalid_steps_are_rejected_before_logging() {
        let (store, ctx) = setup();
        let before = store.len();
        let coordinator = TransactionCoordinator::new(&ctx);
        let err = coordinator
            .run(vec![Operation::patch(key("alice"), vec![])])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedInput { .. }));
        assert_eq!(store.len(), before);
    }

    #[tokio::test]
    async fn recover_undoes_in_flight_step() {
        let (store, ctx) = setup();
        let coordinator = TransactionCoordinator::new(&ctx);

        // a coordinator that stopped right after executing step 0
        store
            .patch(&key("alice"), &[FieldOperation::increment("/balance", -30).unwrap()], None)
            .await
            .unwrap();
        let mut log = TransactionLog::new(transfer(30));
        log.checkpoint_index = Some(0);
        let prior = Document::new(key("alice")).field("balance", 100).fields;
        log.in_flight_compensation = Some(Operation::restore(key("alice"), prior));
        store.insert(log.to_document("__transactions").unwrap());

        let recovered = coordinator.recover(log.id).await.unwrap();
        assert_eq!(recovered.status, TransactionStatus::RolledBack);
        assert!(recovered.in_flight_compensation.is_none());
        assert!(recovered.failure.is_some());
        assert_eq!(balance(&store, "alice"), Some(Value::Integer(100)));

        // recovering a terminal log is a no-op
        let again = coordinator.recover(log.id).await.unwrap();
        assert_eq!(again, recovered);
    }

    #[tokio::test]
    async fn recover_unknown_log_is_not_found() {
        let (_, ctx) = setup();
        let coordinator = TransactionCoordinator::new(&ctx);
        let err = coordinator.recover(TransactionId::generate()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}
