//! Test fixtures and store helpers.
//!
//! Documents are written as JSON literals and converted into the
//! document model, so tests read like the payloads they describe.

use optidoc_codec::{Document, DocumentKey, Fields, Value, VersionToken};
use optidoc_core::{Context, CoreConfig, RetryConfig};
use optidoc_store::{DocumentStore, InMemoryStore};
use std::sync::Arc;

/// Partition used by fixture keys.
pub const TEST_PARTITION: &str = "test";

/// Builds a key in the fixture partition.
pub fn key(id: &str) -> DocumentKey {
    DocumentKey::new(id, TEST_PARTITION)
}

/// Converts a JSON value into a document value.
pub fn value(json: serde_json::Value) -> Value {
    serde_json::from_value(json).expect("JSON is not a document value")
}

/// Converts a JSON object into a field map.
pub fn fields(json: serde_json::Value) -> Fields {
    match value(json) {
        Value::Map(fields) => fields,
        other => panic!("expected a JSON object, got {}", other.type_name()),
    }
}

/// Builds a document in the fixture partition from a JSON object.
pub fn document(id: &str, json: serde_json::Value) -> Document {
    Document::with_fields(key(id), fields(json))
}

/// Retry settings with no delay between attempts.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new(max_retries).without_backoff()
}

/// An in-memory store with a context over it.
pub struct TestStore {
    /// The store.
    pub store: Arc<InMemoryStore>,
    /// Context over `store`.
    pub ctx: Context,
}

impl TestStore {
    /// Creates an empty store with fast retries.
    pub fn new() -> Self {
        Self::with_config(CoreConfig::new().with_retry(fast_retry(5)))
    }

    /// Creates an empty store with the given configuration.
    pub fn with_config(config: CoreConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let ctx = Context::new(Arc::clone(&store) as Arc<dyn DocumentStore>, config);
        Self { store, ctx }
    }

    /// Seeds a document from a JSON object and returns its token.
    pub fn seed(&self, id: &str, json: serde_json::Value) -> VersionToken {
        self.store.insert(document(id, json))
    }

    /// Current token of a document.
    pub fn token(&self, id: &str) -> Option<VersionToken> {
        self.store.peek(&key(id)).map(|doc| doc.token)
    }

    /// Current fields of a document.
    pub fn fields(&self, id: &str) -> Option<Fields> {
        self.store.peek(&key(id)).map(|doc| doc.document.fields)
    }

    /// Integer field of a document.
    pub fn integer(&self, id: &str, field: &str) -> Option<i64> {
        self.fields(id)
            .and_then(|fields| fields.get(field).and_then(Value::as_integer))
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = InMemoryStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
