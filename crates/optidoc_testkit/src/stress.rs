//! Concurrent stress helpers.

use chrono::Utc;
use optidoc_codec::{DocumentKey, FieldOperation};
use optidoc_core::{Context, CoreError, RetryEngine};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Operations that took effect.
    pub successful_ops: usize,
    /// Operations that failed, including exhausted retries.
    pub failed_ops: usize,
    /// Conditional calls made across all operations.
    pub attempts: u64,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, attempts: u64, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            attempts,
            duration,
            ops_per_second,
        }
    }

    /// Conditional calls that were rejected.
    pub fn conflicts(&self) -> u64 {
        self.attempts.saturating_sub(self.successful_ops as u64)
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Conflicts: {}", self.conflicts());
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent writers.
    pub writers: usize,
    /// Operations issued by each writer.
    pub ops_per_writer: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 8,
            ops_per_writer: 25,
        }
    }
}

/// Runs concurrent writers that each increment `field` of one document by 1.
///
/// With enough retries the field grows by exactly `writers * ops_per_writer`.
pub async fn concurrent_increments(
    ctx: &Context,
    key: &DocumentKey,
    field: &str,
    config: &StressConfig,
) -> StressResult {
    let path = format!("/{field}");
    let start = Instant::now();
    let mut tasks = JoinSet::new();

    for _ in 0..config.writers {
        let engine = RetryEngine::new(ctx);
        let key = key.clone();
        let path = path.clone();
        let ops = config.ops_per_writer;
        tasks.spawn(async move {
            let mut successful = 0usize;
            let mut attempts = 0u64;
            for _ in 0..ops {
                let op = FieldOperation::increment(&path, 1).expect("valid increment");
                match engine.patch(&key, vec![op], None, Utc::now()).await {
                    Ok(mutation) => {
                        successful += 1;
                        attempts += u64::from(mutation.attempts);
                    }
                    Err(CoreError::RetryExhausted { attempts: made, .. }) => {
                        attempts += u64::from(made);
                    }
                    Err(_) => {}
                }
            }
            (successful, attempts)
        });
    }

    let mut successful = 0;
    let mut attempts = 0;
    while let Some(joined) = tasks.join_next().await {
        let (ok, made) = joined.expect("writer task panicked");
        successful += ok;
        attempts += made;
    }

    let total = config.writers * config.ops_per_writer;
    StressResult::new(successful, total - successful, attempts, start.elapsed())
}
