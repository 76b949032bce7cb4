//! In-memory document store.

use crate::error::{StoreError, StoreResult};
use crate::outcome::StoreOutcome;
use crate::store::DocumentStore;
use async_trait::async_trait;
use optidoc_codec::{
    Document, DocumentKey, FieldOperation, Fields, VersionToken, VersionedDocument,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// Counters of calls served by an [`InMemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Read calls, conditional or not.
    pub reads: u64,
    /// Reads that returned a document body.
    pub body_fetches: u64,
    /// Reads answered `NotModified`.
    pub not_modified: u64,
    /// Successful writes.
    pub writes: u64,
    /// Successful patches that changed the document.
    pub patches: u64,
    /// Successful creates.
    pub creates: u64,
    /// Successful deletes.
    pub deletes: u64,
    /// Mutations refused because the token did not match.
    pub precondition_failures: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    fields: Fields,
    token: VersionToken,
}

impl Entry {
    fn snapshot(&self, key: &DocumentKey) -> VersionedDocument {
        VersionedDocument::new(
            Document::with_fields(key.clone(), self.fields.clone()),
            self.token.clone(),
        )
    }
}

/// A thread-safe in-memory document store.
///
/// Suitable for:
/// - unit and scenario tests
/// - the demo CLI
///
/// Every call yields to the runtime once before touching state, so
/// concurrent tasks interleave the way they would against a remote store.
///
/// # Example
///
/// ```rust
/// use optidoc_codec::{Document, DocumentKey};
/// use optidoc_store::{DocumentStore, InMemoryStore, StatusCode};
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// rt.block_on(async {
///     let store = InMemoryStore::new();
///     let key = DocumentKey::new("a", "pk");
///     let token = store.insert(Document::new(key.clone()).field("n", 1));
///     let outcome = store.read_conditional(&key, Some(&token)).await.unwrap();
///     assert_eq!(outcome.status(), StatusCode::NotModified);
/// });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<DocumentKey, Entry>>,
    stats: Mutex<StoreStats>,
    closed: AtomicBool,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document directly, bypassing preconditions. Returns its token.
    pub fn insert(&self, document: Document) -> VersionToken {
        let token = fresh_token();
        self.documents.write().insert(
            document.key,
            Entry {
                fields: document.fields,
                token: token.clone(),
            },
        );
        token
    }

    /// Returns a snapshot without counting it as a read.
    #[must_use]
    pub fn peek(&self, key: &DocumentKey) -> Option<VersionedDocument> {
        self.documents.read().get(key).map(|entry| entry.snapshot(key))
    }

    /// Returns true if the key holds a document.
    #[must_use]
    pub fn contains(&self, key: &DocumentKey) -> bool {
        self.documents.read().contains_key(key)
    }

    /// Returns the stored keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<DocumentKey> {
        let mut keys: Vec<_> = self.documents.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Returns a copy of the call counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().clone()
    }

    /// Closes the store. Every later call fails with [`StoreError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn enter(&self) -> StoreResult<()> {
        tokio::task::yield_now().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn record(&self, f: impl FnOnce(&mut StoreStats)) {
        f(&mut self.stats.lock());
    }

    fn precondition_failed<T>(&self, key: &DocumentKey) -> StoreResult<StoreOutcome<T>> {
        trace!(document = %key, "precondition failed");
        self.record(|s| s.precondition_failures += 1);
        Ok(StoreOutcome::PreconditionFailed)
    }
}

fn fresh_token() -> VersionToken {
    VersionToken::new(uuid::Uuid::new_v4().to_string())
}

fn token_matches(entry: &Entry, expected: Option<&VersionToken>) -> bool {
    expected.map_or(true, |token| &entry.token == token)
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn read_conditional(
        &self,
        key: &DocumentKey,
        if_none_match: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>> {
        self.enter().await?;
        self.record(|s| s.reads += 1);

        let documents = self.documents.read();
        let Some(entry) = documents.get(key) else {
            return Ok(StoreOutcome::NotFound);
        };
        if if_none_match == Some(&entry.token) {
            self.record(|s| s.not_modified += 1);
            return Ok(StoreOutcome::NotModified);
        }
        self.record(|s| s.body_fetches += 1);
        Ok(StoreOutcome::Ok(entry.snapshot(key)))
    }

    async fn write(
        &self,
        document: &Document,
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionToken>> {
        self.enter().await?;

        let mut documents = self.documents.write();
        match documents.get(&document.key) {
            Some(entry) if !token_matches(entry, expected) => {
                return self.precondition_failed(&document.key)
            }
            None if expected.is_some() => return Ok(StoreOutcome::NotFound),
            _ => {}
        }

        let token = fresh_token();
        documents.insert(
            document.key.clone(),
            Entry {
                fields: document.fields.clone(),
                token: token.clone(),
            },
        );
        trace!(document = %document.key, %token, "write");
        self.record(|s| s.writes += 1);
        Ok(StoreOutcome::Ok(token))
    }

    async fn patch(
        &self,
        key: &DocumentKey,
        ops: &[FieldOperation],
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>> {
        self.enter().await?;

        let mut documents = self.documents.write();
        let Some(entry) = documents.get_mut(key) else {
            return Ok(StoreOutcome::NotFound);
        };
        if !token_matches(entry, expected) {
            return self.precondition_failed(key);
        }

        let mut document = Document::with_fields(key.clone(), entry.fields.clone());
        document.apply(ops)?;
        if document.fields == entry.fields {
            return Ok(StoreOutcome::NotModified);
        }

        entry.fields = document.fields;
        entry.token = fresh_token();
        trace!(document = %key, token = %entry.token, ops = ops.len(), "patch");
        self.record(|s| s.patches += 1);
        Ok(StoreOutcome::Ok(entry.snapshot(key)))
    }

    async fn create(&self, document: &Document) -> StoreResult<StoreOutcome<VersionedDocument>> {
        self.enter().await?;

        let mut documents = self.documents.write();
        if documents.contains_key(&document.key) {
            return Ok(StoreOutcome::Conflict);
        }
        let entry = Entry {
            fields: document.fields.clone(),
            token: fresh_token(),
        };
        let snapshot = entry.snapshot(&document.key);
        documents.insert(document.key.clone(), entry);
        trace!(document = %document.key, "create");
        self.record(|s| s.creates += 1);
        Ok(StoreOutcome::Created(snapshot))
    }

    async fn delete(
        &self,
        key: &DocumentKey,
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<()>> {
        self.enter().await?;

        let mut documents = self.documents.write();
        match documents.get(key) {
            None => Ok(StoreOutcome::NotFound),
            Some(entry) if !token_matches(entry, expected) => self.precondition_failed(key),
            Some(_) => {
                documents.remove(key);
                trace!(document = %key, "delete");
                self.record(|s| s.deletes += 1);
                Ok(StoreOutcome::Ok(()))
            }
        }
    }
}
