//! Bulk-read command implementation.

use optidoc_codec::{Document, DocumentKey, FieldOperation};
use optidoc_core::{BulkExecutor, BulkReport, Context, CoreConfig};
use optidoc_store::{DocumentStore, InMemoryStore, StatusCode};
use serde::Serialize;
use std::sync::Arc;

/// Status counts of one read round.
#[derive(Debug, Serialize)]
pub struct RoundSummary {
    /// Bodies fetched.
    pub ok: usize,
    /// Tracked tokens that were still current.
    pub not_modified: usize,
    /// Documents that no longer exist.
    pub not_found: usize,
    /// Reads that failed.
    pub errors: usize,
}

impl From<&BulkReport> for RoundSummary {
    fn from(report: &BulkReport) -> Self {
        Self {
            ok: report.count(StatusCode::Ok),
            not_modified: report.count(StatusCode::NotModified),
            not_found: report.count(StatusCode::NotFound),
            errors: report.errors.len(),
        }
    }
}

/// Outcome of the bulk-read command.
#[derive(Debug, Serialize)]
pub struct BulkReadResult {
    /// Documents read per round.
    pub documents: usize,
    /// Documents modified between rounds.
    pub touched: usize,
    /// First round, with no tracked tokens.
    pub first: RoundSummary,
    /// Second round, reusing tracked tokens.
    pub second: RoundSummary,
    /// Bodies the store returned across both rounds.
    pub body_fetches: u64,
}

/// Runs the bulk-read command.
pub async fn run(
    documents: usize,
    touch: usize,
    concurrency: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let keys: Vec<DocumentKey> = (0..documents)
        .map(|i| DocumentKey::new(format!("item-{i:04}"), "catalog"))
        .collect();
    for key in &keys {
        store.insert(Document::new(key.clone()).field("views", 0));
    }

    let ctx = Context::new(store.clone(), CoreConfig::new().with_max_concurrency(concurrency));
    let bulk = BulkExecutor::new(&ctx);

    let first = bulk.read_all(keys.clone()).await?;

    let touched = touch.min(documents);
    let bump = [FieldOperation::increment("/views", 1)?];
    for key in keys.iter().take(touched) {
        store.patch(key, &bump, None).await?;
    }

    let second = bulk.read_all(keys).await?;

    let result = BulkReadResult {
        documents,
        touched,
        first: RoundSummary::from(&first),
        second: RoundSummary::from(&second),
        body_fetches: store.stats().body_fetches,
    };
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

fn print_round(name: &str, round: &RoundSummary) {
    println!("{name}:");
    println!("  OK:           {}", round.ok);
    println!("  NotModified:  {}", round.not_modified);
    println!("  NotFound:     {}", round.not_found);
    println!("  Errors:       {}", round.errors);
}

fn print_text_output(result: &BulkReadResult) {
    println!("optidoc bulk read");
    println!("=================");
    println!();
    println!("Documents: {}", result.documents);
    println!("Touched:   {}", result.touched);
    println!();
    print_round("First round", &result.first);
    print_round("Second round", &result.second);
    println!();
    println!("Bodies fetched: {}", result.body_fetches);
}
