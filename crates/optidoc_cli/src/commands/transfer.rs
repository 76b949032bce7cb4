//! Transfer command implementation.

use optidoc_codec::{Document, DocumentKey, FieldOperation, Value};
use optidoc_core::{
    Context, CoreConfig, CoreError, Operation, TransactionCoordinator, TransactionLog,
    TransactionStatus,
};
use optidoc_store::InMemoryStore;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of a transfer.
#[derive(Debug, Serialize)]
pub struct TransferResult {
    /// Transaction id.
    pub transaction: String,
    /// Final log status.
    pub status: TransactionStatus,
    /// Failure that triggered rollback, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Number of compensations that failed.
    pub rollback_errors: usize,
    /// Balances after the run.
    pub balances: Vec<Balance>,
}

/// Balance of one account.
#[derive(Debug, Serialize)]
pub struct Balance {
    /// Account id.
    pub account: String,
    /// Balance, if the account exists.
    pub balance: Option<i64>,
}

/// Runs the transfer command.
pub async fn run(amount: i64, fail: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let alice = DocumentKey::new("alice", "accounts");
    let bob = DocumentKey::new("bob", "accounts");
    store.insert(Document::new(alice.clone()).field("balance", 100));
    store.insert(Document::new(bob.clone()).field("balance", 50));

    // Crediting an account that does not exist fails the second step.
    let target = if fail {
        DocumentKey::new("carol", "accounts")
    } else {
        bob.clone()
    };
    let negated = amount
        .checked_neg()
        .ok_or_else(|| format!("amount {amount} cannot be debited"))?;
    let steps = vec![
        Operation::patch(
            alice.clone(),
            vec![FieldOperation::increment("/balance", negated)?],
        ),
        Operation::patch(target, vec![FieldOperation::increment("/balance", amount)?]),
    ];

    let ctx = Context::new(store.clone(), CoreConfig::default());
    let coordinator = TransactionCoordinator::new(&ctx);
    let log = match coordinator.run(steps).await {
        Ok(log) => log,
        Err(CoreError::TransactionAborted { log, .. }) => *log,
        Err(e) => return Err(e.into()),
    };

    let result = summarize(&log, &store, &[alice, bob]);
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

fn summarize(log: &TransactionLog, store: &InMemoryStore, accounts: &[DocumentKey]) -> TransferResult {
    let balances = accounts
        .iter()
        .map(|key| Balance {
            account: key.id.clone(),
            balance: store
                .peek(key)
                .and_then(|doc| doc.document.fields.get("balance").and_then(Value::as_integer)),
        })
        .collect();

    TransferResult {
        transaction: log.id.to_string(),
        status: log.status,
        failure: log.failure.clone(),
        rollback_errors: log.rollback_errors.len(),
        balances,
    }
}

fn print_text_output(result: &TransferResult) {
    println!("optidoc transfer");
    println!("================");
    println!();
    println!("Transaction: {}", result.transaction);
    println!("Status:      {}", result.status);
    if let Some(failure) = &result.failure {
        println!("Failure:     {failure}");
        println!("Rollback errors: {}", result.rollback_errors);
    }
    println!();
    println!("Balances:");
    for entry in &result.balances {
        match entry.balance {
            Some(balance) => println!("  {:<8} {balance}", entry.account),
            None => println!("  {:<8} (missing)", entry.account),
        }
    }
}
