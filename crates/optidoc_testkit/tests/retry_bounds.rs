//! Retry engine bounds and conflict handling against a competing writer.

use chrono::Utc;
use optidoc_codec::{FieldOperation, Value};
use optidoc_core::{
    Context, CoreConfig, CoreError, IncomingWins, MutationOutcome, RetryEngine, StoredWins,
    TieBreakPolicy,
};
use optidoc_store::{DocumentStore, InMemoryStore};
use optidoc_testkit::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn setup(max_retries: u32, policy: Arc<dyn TieBreakPolicy>) -> (Arc<InMemoryStore>, Arc<InterferingStore>, Context) {
    let memory = Arc::new(InMemoryStore::new());
    memory.insert(document("doc", json!({"n": 0, "status": "draft"})));
    let interfering = Arc::new(InterferingStore::new(Arc::clone(&memory)));
    let ctx = Context::new(
        Arc::clone(&interfering) as Arc<dyn DocumentStore>,
        CoreConfig::new().with_retry(fast_retry(max_retries)),
    )
    .with_policy(policy);
    (memory, interfering, ctx)
}

fn increment(delta: i64) -> Vec<FieldOperation> {
    vec![FieldOperation::increment("/n", delta).unwrap()]
}

#[tokio::test]
async fn attempts_are_bounded_by_max_retries() {
    for max_retries in [0u32, 1, 4] {
        let (memory, interfering, ctx) = setup(max_retries, Arc::new(IncomingWins));
        interfering.interfere_always(&key("doc"), increment(100));
        let token = memory.peek(&key("doc")).unwrap().token;

        let err = RetryEngine::new(&ctx)
            .patch(&key("doc"), increment(1), Some(token), Utc::now())
            .await
            .unwrap_err();

        let CoreError::RetryExhausted {
            attempts,
            last_snapshot,
            ..
        } = err
        else {
            panic!("expected exhausted retries");
        };
        assert_eq!(attempts, max_retries + 1);
        assert_eq!(interfering.conditional_calls(), max_retries as usize + 1);
        let last = last_snapshot.expect("a conflicting snapshot was read");
        assert_eq!(
            last.document.fields.get("n"),
            Some(&Value::Integer(100 * i64::from(max_retries + 1)))
        );
    }
}

#[tokio::test]
async fn succeeds_once_interference_stops() {
    let (memory, interfering, ctx) = setup(3, Arc::new(IncomingWins));
    interfering.interfere(&key("doc"), increment(100), 2);

    let mutation = RetryEngine::new(&ctx)
        .patch(&key("doc"), increment(1), None, Utc::now())
        .await
        .unwrap();

    assert_eq!(mutation.attempts, 3);
    let n = memory.peek(&key("doc")).unwrap().document.fields.get("n").cloned();
    assert_eq!(n, Some(Value::Integer(201)));
}

#[tokio::test]
async fn stored_value_wins_and_converges() {
    let (memory, interfering, ctx) = setup(3, Arc::new(StoredWins));
    interfering.interfere(
        &key("doc"),
        vec![FieldOperation::set("/status", "published").unwrap()],
        1,
    );

    let mutation = RetryEngine::new(&ctx)
        .patch(
            &key("doc"),
            vec![FieldOperation::set("/status", "review").unwrap()],
            None,
            Utc::now(),
        )
        .await
        .unwrap();

    assert!(matches!(mutation.outcome, MutationOutcome::Converged(_)));
    assert_eq!(mutation.attempts, 1);
    let status = memory.peek(&key("doc")).unwrap().document.fields.get("status").cloned();
    assert_eq!(status, Some(Value::from("published")));
}

#[tokio::test]
async fn incoming_value_wins_on_retry() {
    let (memory, interfering, ctx) = setup(3, Arc::new(IncomingWins));
    interfering.interfere(
        &key("doc"),
        vec![FieldOperation::set("/status", "published").unwrap()],
        1,
    );

    let mutation = RetryEngine::new(&ctx)
        .patch(
            &key("doc"),
            vec![FieldOperation::set("/status", "review").unwrap()],
            None,
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(mutation.attempts, 2);
    let status = memory.peek(&key("doc")).unwrap().document.fields.get("status").cloned();
    assert_eq!(status, Some(Value::from("review")));
}

#[tokio::test]
async fn write_with_retry_reapplies_on_fresh_snapshot() {
    let (memory, interfering, ctx) = setup(3, Arc::new(IncomingWins));
    interfering.interfere(&key("doc"), increment(10), 1);

    let mutation = RetryEngine::new(&ctx)
        .write(&key("doc"), increment(1), None, Utc::now())
        .await
        .unwrap();

    assert_eq!(mutation.attempts, 2);
    let n = memory.peek(&key("doc")).unwrap().document.fields.get("n").cloned();
    assert_eq!(n, Some(Value::Integer(11)));
}

#[tokio::test]
async fn malformed_input_is_not_retried() {
    let (_, interfering, ctx) = setup(5, Arc::new(IncomingWins));
    let token = interfering.inner().peek(&key("doc")).unwrap().token;

    let err = RetryEngine::new(&ctx)
        .patch(
            &key("doc"),
            vec![FieldOperation::increment("/status", 1).unwrap()],
            Some(token),
            Utc::now(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::MalformedInput { .. }));
    assert_eq!(interfering.conditional_calls(), 1);
}

#[tokio::test]
async fn missing_document_is_not_retried() {
    let (_, interfering, ctx) = setup(5, Arc::new(IncomingWins));
    let err = RetryEngine::new(&ctx)
        .patch(&key("ghost"), increment(1), None, Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotFound { .. }));
    assert_eq!(interfering.conditional_calls(), 0);
}
