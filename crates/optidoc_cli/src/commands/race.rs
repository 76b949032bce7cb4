//! Race command implementation.

use chrono::Utc;
use optidoc_codec::{Document, DocumentKey, FieldOperation, Value};
use optidoc_core::{Context, CoreConfig, CoreError, RetryConfig, RetryEngine};
use optidoc_store::InMemoryStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Outcome of a race.
#[derive(Debug, Serialize)]
pub struct RaceResult {
    /// Number of concurrent writers.
    pub writers: usize,
    /// Counter value if every increment landed.
    pub expected: i64,
    /// Counter value read back from the store.
    pub counter: i64,
    /// Conditional writes issued across all writers.
    pub attempts: u64,
    /// Writes rejected with a precondition failure.
    pub conflicts: u64,
    /// Increments abandoned after exhausting their retries.
    pub exhausted: u64,
}

/// Runs the race command.
pub async fn run(
    writers: usize,
    increments: usize,
    max_retries: u32,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let key = DocumentKey::new("counter", "demo");
    store.insert(Document::new(key.clone()).field("counter", 0));

    let retry = RetryConfig::new(max_retries)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(20));
    let ctx = Context::new(store.clone(), CoreConfig::new().with_retry(retry));

    let mut tasks = JoinSet::new();
    for _ in 0..writers {
        let engine = RetryEngine::new(&ctx);
        let key = key.clone();
        tasks.spawn(async move {
            let mut attempts = 0u64;
            let mut exhausted = 0u64;
            for _ in 0..increments {
                let ops = vec![FieldOperation::increment("/counter", 1)?];
                match engine.patch(&key, ops, None, Utc::now()).await {
                    Ok(mutation) => attempts += u64::from(mutation.attempts),
                    Err(CoreError::RetryExhausted { attempts: made, .. }) => {
                        attempts += u64::from(made);
                        exhausted += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok::<_, CoreError>((attempts, exhausted))
        });
    }

    let mut result = RaceResult {
        writers,
        expected: i64::try_from(writers * increments)?,
        counter: 0,
        attempts: 0,
        conflicts: 0,
        exhausted: 0,
    };
    while let Some(joined) = tasks.join_next().await {
        let (attempts, exhausted) = joined??;
        result.attempts += attempts;
        result.exhausted += exhausted;
    }
    let landed = u64::try_from(writers * increments)?.saturating_sub(result.exhausted);
    result.conflicts = result.attempts.saturating_sub(landed);
    result.counter = store
        .peek(&key)
        .and_then(|doc| doc.document.fields.get("counter").and_then(Value::as_integer))
        .unwrap_or_default();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &RaceResult) {
    println!("optidoc increment race");
    println!("======================");
    println!();
    println!("Writers:   {}", result.writers);
    println!("Expected:  {}", result.expected);
    println!("Counter:   {}", result.counter);
    println!();
    println!("Writes:");
    println!("  Attempts:  {}", result.attempts);
    println!("  Conflicts: {}", result.conflicts);
    println!("  Exhausted: {}", result.exhausted);
    if result.counter == result.expected {
        println!();
        println!("No lost updates.");
    }
}
