//! Transaction coordinator behavior under injected failures.

use async_trait::async_trait;
use optidoc_codec::{Document, DocumentKey, FieldOperation, Value, VersionToken, VersionedDocument};
use optidoc_core::{
    Context, CoreConfig, CoreError, Operation, TransactionCoordinator, TransactionLog,
    TransactionStatus, DEFAULT_LOG_PARTITION,
};
use optidoc_store::{DocumentStore, InMemoryStore, StoreOutcome, StoreResult};
use optidoc_testkit::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    memory: Arc<InMemoryStore>,
    faulty: Arc<FaultyStore>,
    ctx: Context,
}

impl Harness {
    fn new() -> Self {
        let memory = Arc::new(InMemoryStore::new());
        let faulty = Arc::new(FaultyStore::new(Arc::clone(&memory) as Arc<dyn DocumentStore>));
        let ctx = Context::new(
            Arc::clone(&faulty) as Arc<dyn DocumentStore>,
            CoreConfig::new().with_retry(fast_retry(3)),
        );
        Self { memory, faulty, ctx }
    }

    fn balance(&self, id: &str) -> Option<i64> {
        self.memory
            .peek(&key(id))
            .and_then(|doc| doc.document.fields.get("balance").and_then(|v| v.as_integer()))
    }

    fn stored_log(&self, log: &TransactionLog) -> TransactionLog {
        let doc = self
            .memory
            .peek(&TransactionLog::document_key(log.id, DEFAULT_LOG_PARTITION))
            .expect("log document exists");
        TransactionLog::from_document(&doc.document).unwrap()
    }
}

fn adjust(id: &str, delta: i64) -> Operation {
    Operation::patch(key(id), vec![FieldOperation::increment("/balance", delta).unwrap()])
}

fn final_log(result: Result<TransactionLog, CoreError>) -> TransactionLog {
    match result {
        Ok(log) => log,
        Err(CoreError::TransactionAborted { log, .. }) => *log,
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[tokio::test]
async fn rollback_continues_past_failing_compensation() {
    let h = Harness::new();
    h.memory.insert(document("x", json!({"balance": 100})));
    h.faulty.always_fail(StoreMethod::Delete, &key("a"));

    let steps = vec![
        adjust("x", -10),
        Operation::create(document("a", json!({"balance": 10}))),
        // "b" does not exist
        adjust("b", 10),
    ];
    let err = TransactionCoordinator::new(&h.ctx).run(steps).await.unwrap_err();
    let CoreError::TransactionAborted { clean, log, .. } = err else {
        panic!("expected an aborted transaction");
    };

    assert!(!clean);
    assert_eq!(log.status, TransactionStatus::RolledBack);
    assert_eq!(log.rollback_errors.len(), 1);
    assert_eq!(log.rollback_errors[0].operation, Operation::delete(key("a")));
    // the failing delete did not stop the restore of "x"
    assert_eq!(h.balance("x"), Some(100));
    assert_eq!(h.balance("a"), Some(10));
    assert_eq!(h.stored_log(&log), *log);
}

#[tokio::test]
async fn cancellation_mid_transaction_rolls_back() {
    let h = Harness::new();
    h.memory.insert(document("x", json!({"balance": 100})));
    let y_token = h.memory.insert(document("y", json!({"balance": 0})));
    h.faulty.hang_on(StoreMethod::Patch, &key("y"));

    let coordinator = TransactionCoordinator::new(&h.ctx);
    let run = tokio::spawn(async move { coordinator.run(vec![adjust("x", -10), adjust("y", 10)]).await });

    tokio::time::timeout(Duration::from_secs(5), h.faulty.wait_for_calls(StoreMethod::Patch, 2))
        .await
        .expect("second step never started");
    assert_eq!(h.balance("x"), Some(90));
    h.ctx.cancel();

    let err = run.await.unwrap().unwrap_err();
    let CoreError::TransactionAborted { reason, log, .. } = err else {
        panic!("expected an aborted transaction");
    };
    assert_eq!(reason, CoreError::Interrupted.to_string());
    assert_eq!(log.status, TransactionStatus::RolledBack);
    assert_eq!(h.balance("x"), Some(100));
    assert_eq!(h.balance("y"), Some(0));
    // the interrupted patch never landed, so "y" was not rewritten
    assert_eq!(h.memory.peek(&key("y")).unwrap().token, y_token);
    assert_eq!(h.stored_log(&log).status, TransactionStatus::RolledBack);
}

/// Cancels the caller once the log checkpoints step 1, then lets another
/// writer change "y".
struct CancelAtSecondCheckpoint {
    inner: Arc<InMemoryStore>,
    cancel: CancellationToken,
    fired: AtomicBool,
}

#[async_trait]
impl DocumentStore for CancelAtSecondCheckpoint {
    async fn read_conditional(
        &self,
        key: &DocumentKey,
        if_none_match: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>> {
        self.inner.read_conditional(key, if_none_match).await
    }

    async fn write(
        &self,
        document: &Document,
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionToken>> {
        let outcome = self.inner.write(document, expected).await?;
        let second_checkpoint = document.key.partition_key == DEFAULT_LOG_PARTITION
            && document.fields.get("checkpointIndex") == Some(&Value::Integer(1));
        if second_checkpoint && !self.fired.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            self.inner
                .patch(&key("y"), &[FieldOperation::set("/note", "other writer").unwrap()], None)
                .await?;
        }
        Ok(outcome)
    }

    async fn patch(
        &self,
        key: &DocumentKey,
        ops: &[FieldOperation],
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>> {
        self.inner.patch(key, ops, expected).await
    }

    async fn create(&self, document: &Document) -> StoreResult<StoreOutcome<VersionedDocument>> {
        self.inner.create(document).await
    }

    async fn delete(
        &self,
        key: &DocumentKey,
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<()>> {
        self.inner.delete(key, expected).await
    }
}

#[tokio::test]
async fn cancellation_before_step_call_keeps_concurrent_write() {
    let memory = Arc::new(InMemoryStore::new());
    memory.insert(document("x", json!({"balance": 100})));
    memory.insert(document("y", json!({"balance": 0})));
    let cancel = CancellationToken::new();
    let store = Arc::new(CancelAtSecondCheckpoint {
        inner: Arc::clone(&memory),
        cancel: cancel.clone(),
        fired: AtomicBool::new(false),
    });
    let ctx = Context::new(store, CoreConfig::new().with_retry(fast_retry(3))).with_cancellation(cancel);

    let err = TransactionCoordinator::new(&ctx)
        .run(vec![adjust("x", -10), adjust("y", 10)])
        .await
        .unwrap_err();
    let CoreError::TransactionAborted { reason, log, clean, .. } = err else {
        panic!("expected an aborted transaction");
    };

    assert!(clean);
    assert_eq!(reason, CoreError::Cancelled.to_string());
    assert_eq!(log.status, TransactionStatus::RolledBack);
    let x = memory.peek(&key("x")).unwrap().document.fields;
    assert_eq!(x.get("balance"), Some(&Value::Integer(100)));
    let y = memory.peek(&key("y")).unwrap().document.fields;
    assert_eq!(y.get("balance"), Some(&Value::Integer(0)));
    assert_eq!(y.get("note"), Some(&Value::from("other writer")));
}

#[tokio::test]
async fn lost_log_reply_is_retried_and_commits() {
    let h = Harness::new();
    h.memory.insert(document("x", json!({"balance": 100})));
    h.memory.insert(document("y", json!({"balance": 0})));
    // writes 1 and 2 record step 0; write 3 checkpoints step 1
    h.faulty.lose_reply(StoreMethod::Write, 2, true);

    let log = TransactionCoordinator::new(&h.ctx)
        .run(vec![adjust("x", -10), adjust("y", 10)])
        .await
        .unwrap();

    assert_eq!(log.status, TransactionStatus::Committed);
    assert_eq!(h.stored_log(&log).status, TransactionStatus::Committed);
    assert_eq!(h.balance("x"), Some(90));
    assert_eq!(h.balance("y"), Some(10));
}

#[tokio::test]
async fn lost_log_reply_still_rolls_back() {
    let h = Harness::new();
    h.memory.insert(document("x", json!({"balance": 100})));
    let y_token = h.memory.insert(document("y", json!({"balance": 0})));
    h.faulty.lose_reply(StoreMethod::Write, 2, false);

    let err = TransactionCoordinator::new(&h.ctx)
        .run(vec![adjust("x", -10), adjust("y", 10)])
        .await
        .unwrap_err();
    let CoreError::TransactionAborted { log, clean, .. } = err else {
        panic!("expected an aborted transaction, not log contention");
    };

    assert!(clean);
    assert_eq!(log.status, TransactionStatus::RolledBack);
    assert_eq!(h.stored_log(&log).status, TransactionStatus::RolledBack);
    assert_eq!(h.balance("x"), Some(100));
    assert_eq!(h.memory.peek(&key("y")).unwrap().token, y_token);
}

#[tokio::test]
async fn log_is_terminal_after_every_return() {
    for failing_step in 0..4 {
        let h = Harness::new();
        for id in ["p", "q", "r"] {
            h.memory.insert(document(id, json!({"balance": 50})));
        }
        let ids = ["p", "q", "r"];
        if let Some(id) = ids.get(failing_step) {
            h.faulty.fail_on(StoreMethod::Patch, &key(id), 1);
        }

        let steps = ids.iter().map(|id| adjust(id, 5)).collect();
        let log = final_log(TransactionCoordinator::new(&h.ctx).run(steps).await);
        let stored = h.stored_log(&log);

        assert!(stored.status.is_terminal(), "step {failing_step}: {}", stored.status);
        assert!(stored.in_flight_compensation.is_none());
        let expected = if failing_step < ids.len() {
            assert_eq!(stored.status, TransactionStatus::RolledBack);
            50
        } else {
            assert_eq!(stored.status, TransactionStatus::Committed);
            55
        };
        for id in ids {
            assert_eq!(h.balance(id), Some(expected), "step {failing_step}, doc {id}");
        }
    }
}

#[tokio::test]
async fn recover_finishes_interrupted_rollback() {
    let h = Harness::new();
    h.memory.insert(document("x", json!({"balance": 80})));
    h.memory.insert(document("a", json!({"balance": 1})));

    // a coordinator created "a", patched "x" from 100 and stopped while rolling back
    let mut log = TransactionLog::new(vec![
        Operation::create(document("a", json!({"balance": 1}))),
        adjust("x", -20),
    ]);
    log.checkpoint_index = Some(1);
    log.compensations = vec![
        Operation::delete(key("a")),
        Operation::restore(key("x"), fields(json!({"balance": 100}))),
    ];
    log.failure = Some("coordinator lost".to_string());
    log.transition(TransactionStatus::RollingBack).unwrap();
    h.memory.insert(log.to_document(DEFAULT_LOG_PARTITION).unwrap());

    let recovered = TransactionCoordinator::new(&h.ctx).recover(log.id).await.unwrap();
    assert_eq!(recovered.status, TransactionStatus::RolledBack);
    assert!(recovered.compensations.is_empty());
    assert!(recovered.rollback_was_clean());
    assert_eq!(h.balance("x"), Some(100));
    assert_eq!(h.balance("a"), None);

    // recovering again is a no-op on the terminal log
    let again = TransactionCoordinator::new(&h.ctx).recover(log.id).await.unwrap();
    assert_eq!(again, recovered);
}
