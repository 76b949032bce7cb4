//! Conditional access to the document store.
//!
//! [`ConditionalAccessor`] is the only component that talks to the store.
//! It attaches version-token preconditions, turns raw store outcomes into
//! per-call outcome types and makes every call observe the cancellation
//! token. It keeps no state between calls and is cheap to clone.

use crate::error::{CoreError, CoreResult};
use optidoc_codec::{Document, DocumentKey, FieldOperation, VersionToken, VersionedDocument};
use optidoc_store::{DocumentStore, StatusCode, StoreOutcome, StoreResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The document and its current token.
    Found(VersionedDocument),
    /// The caller's token is still current; no body was fetched.
    NotModified,
    /// No such document.
    NotFound,
}

/// Outcome of a full-document write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Written; carries the new token.
    Written(VersionToken),
    /// The expected token is stale.
    PreconditionFailed,
    /// No such document.
    NotFound,
}

/// Outcome of a patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    /// Patched; carries the new snapshot.
    Patched(VersionedDocument),
    /// The expected token is stale.
    PreconditionFailed,
    /// The patch changed nothing.
    NotModified,
    /// No such document.
    NotFound,
}

/// Outcome of a create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Created; carries the stored snapshot.
    Created(VersionedDocument),
    /// The key is taken.
    Conflict,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deleted.
    Deleted,
    /// The expected token is stale.
    PreconditionFailed,
    /// No such document.
    NotFound,
}

impl ReadOutcome {
    /// Status code of this outcome.
    pub fn status(&self) -> StatusCode {
        match self {
            ReadOutcome::Found(_) => StatusCode::Ok,
            ReadOutcome::NotModified => StatusCode::NotModified,
            ReadOutcome::NotFound => StatusCode::NotFound,
        }
    }
}

impl WriteOutcome {
    /// Status code of this outcome.
    pub fn status(&self) -> StatusCode {
        match self {
            WriteOutcome::Written(_) => StatusCode::Ok,
            WriteOutcome::PreconditionFailed => StatusCode::PreconditionFailed,
            WriteOutcome::NotFound => StatusCode::NotFound,
        }
    }
}

impl PatchOutcome {
    /// Status code of this outcome.
    pub fn status(&self) -> StatusCode {
        match self {
            PatchOutcome::Patched(_) => StatusCode::Ok,
            PatchOutcome::PreconditionFailed => StatusCode::PreconditionFailed,
            PatchOutcome::NotModified => StatusCode::NotModified,
            PatchOutcome::NotFound => StatusCode::NotFound,
        }
    }
}

impl CreateOutcome {
    /// Status code of this outcome.
    pub fn status(&self) -> StatusCode {
        match self {
            CreateOutcome::Created(_) => StatusCode::Created,
            CreateOutcome::Conflict => StatusCode::Conflict,
        }
    }
}

impl DeleteOutcome {
    /// Status code of this outcome.
    pub fn status(&self) -> StatusCode {
        match self {
            DeleteOutcome::Deleted => StatusCode::Ok,
            DeleteOutcome::PreconditionFailed => StatusCode::PreconditionFailed,
            DeleteOutcome::NotFound => StatusCode::NotFound,
        }
    }
}

/// Token-gated, cancellation-aware store access.
#[derive(Clone)]
pub struct ConditionalAccessor {
    store: Arc<dyn DocumentStore>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConditionalAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalAccessor")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ConditionalAccessor {
    /// Creates an accessor over a store.
    pub fn new(store: Arc<dyn DocumentStore>, cancel: CancellationToken) -> Self {
        Self { store, cancel }
    }

    /// Returns an accessor on the same store that ignores cancellation.
    ///
    /// Rollback runs on a detached accessor so that compensations complete
    /// after the caller has cancelled.
    pub fn detached(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cancel: CancellationToken::new(),
        }
    }

    /// Returns true once the caller has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs a store call unless cancelled first.
    ///
    /// Cancellation observed before the call is polled yields
    /// [`CoreError::Cancelled`]. Once a mutating call may have reached the
    /// store, cancellation yields [`CoreError::Interrupted`].
    async fn guarded<T>(
        &self,
        mutates: bool,
        call: impl Future<Output = StoreResult<T>>,
    ) -> CoreResult<T> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(if mutates {
                CoreError::Interrupted
            } else {
                CoreError::Cancelled
            }),
            result = call => result.map_err(CoreError::from),
        }
    }

    /// Sleeps, waking early with [`CoreError::Cancelled`] on cancellation.
    pub async fn pause(&self, delay: Duration) -> CoreResult<()> {
        if delay.is_zero() {
            return if self.is_cancelled() {
                Err(CoreError::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CoreError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Reads a document, short-circuiting to `NotModified` when
    /// `if_none_match` is still current.
    pub async fn read(
        &self,
        key: &DocumentKey,
        if_none_match: Option<&VersionToken>,
    ) -> CoreResult<ReadOutcome> {
        match self.guarded(false, self.store.read_conditional(key, if_none_match)).await? {
            StoreOutcome::Ok(doc) => Ok(ReadOutcome::Found(doc)),
            StoreOutcome::NotModified => Ok(ReadOutcome::NotModified),
            StoreOutcome::NotFound => Ok(ReadOutcome::NotFound),
            other => Err(CoreError::unexpected(key, other.status())),
        }
    }

    /// Reads a document that must exist.
    pub async fn read_existing(&self, key: &DocumentKey) -> CoreResult<VersionedDocument> {
        match self.read(key, None).await? {
            ReadOutcome::Found(doc) => Ok(doc),
            ReadOutcome::NotFound => Err(CoreError::not_found(key)),
            ReadOutcome::NotModified => Err(CoreError::unexpected(key, StatusCode::NotModified)),
        }
    }

    /// Replaces a document. `None` as expected token is an upsert.
    pub async fn write(
        &self,
        document: &Document,
        expected: Option<&VersionToken>,
    ) -> CoreResult<WriteOutcome> {
        match self.guarded(true, self.store.write(document, expected)).await? {
            StoreOutcome::Ok(token) | StoreOutcome::Created(token) => Ok(WriteOutcome::Written(token)),
            StoreOutcome::PreconditionFailed => Ok(WriteOutcome::PreconditionFailed),
            StoreOutcome::NotFound => Ok(WriteOutcome::NotFound),
            other => Err(CoreError::unexpected(&document.key, other.status())),
        }
    }

    /// Applies field operations under an optional token precondition.
    pub async fn patch(
        &self,
        key: &DocumentKey,
        ops: &[FieldOperation],
        expected: Option<&VersionToken>,
    ) -> CoreResult<PatchOutcome> {
        match self.guarded(true, self.store.patch(key, ops, expected)).await? {
            StoreOutcome::Ok(doc) => Ok(PatchOutcome::Patched(doc)),
            StoreOutcome::PreconditionFailed => Ok(PatchOutcome::PreconditionFailed),
            StoreOutcome::NotModified => Ok(PatchOutcome::NotModified),
            StoreOutcome::NotFound => Ok(PatchOutcome::NotFound),
            other => Err(CoreError::unexpected(key, other.status())),
        }
    }

    /// Creates a document.
    pub async fn create(&self, document: &Document) -> CoreResult<CreateOutcome> {
        match self.guarded(true, self.store.create(document)).await? {
            StoreOutcome::Created(doc) | StoreOutcome::Ok(doc) => Ok(CreateOutcome::Created(doc)),
            StoreOutcome::Conflict => Ok(CreateOutcome::Conflict),
            other => Err(CoreError::unexpected(&document.key, other.status())),
        }
    }

    /// Deletes a document under an optional token precondition.
    pub async fn delete(
        &self,
        key: &DocumentKey,
        expected: Option<&VersionToken>,
    ) -> CoreResult<DeleteOutcome> {
        match self.guarded(true, self.store.delete(key, expected)).await? {
            StoreOutcome::Ok(()) => Ok(DeleteOutcome::Deleted),
            StoreOutcome::PreconditionFailed => Ok(DeleteOutcome::PreconditionFailed),
            StoreOutcome::NotFound => Ok(DeleteOutcome::NotFound),
            other => Err(CoreError::unexpected(key, other.status())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optidoc_store::InMemoryStore;

    fn setup() -> (Arc<InMemoryStore>, ConditionalAccessor, CancellationToken, VersionToken) {
        let store = Arc::new(InMemoryStore::new());
        let token = store.insert(Document::new(key()).field("counter", 0));
        let cancel = CancellationToken::new();
        let accessor = ConditionalAccessor::new(store.clone(), cancel.clone());
        (store, accessor, cancel, token)
    }

    fn key() -> DocumentKey {
        DocumentKey::new("c", "pk")
    }

    #[tokio::test]
    async fn read_classifies_outcomes() {
        let (_, accessor, _, token) = setup();
        assert_eq!(accessor.read(&key(), Some(&token)).await.unwrap(), ReadOutcome::NotModified);
        assert!(matches!(accessor.read(&key(), None).await.unwrap(), ReadOutcome::Found(_)));
        let missing = DocumentKey::new("nope", "pk");
        assert_eq!(accessor.read(&missing, None).await.unwrap(), ReadOutcome::NotFound);
        assert!(matches!(
            accessor.read_existing(&missing).await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stale_token_is_precondition_failed() {
        let (_, accessor, _, _) = setup();
        let stale = VersionToken::new("stale");
        let ops = vec![FieldOperation::increment("/counter", 1).unwrap()];
        let outcome = accessor.patch(&key(), &ops, Some(&stale)).await.unwrap();
        assert_eq!(outcome.status(), StatusCode::PreconditionFailed);

        let doc = Document::new(key());
        let outcome = accessor.write(&doc, Some(&stale)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::PreconditionFailed);
    }

    #[tokio::test]
    async fn cancelled_calls_do_not_reach_the_store() {
        let (store, accessor, cancel, token) = setup();
        cancel.cancel();
        let ops = vec![FieldOperation::increment("/counter", 1).unwrap()];
        let result = accessor.patch(&key(), &ops, Some(&token)).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert_eq!(store.stats().patches, 0);
        assert!(matches!(accessor.pause(Duration::from_secs(60)).await, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelling_an_inflight_mutation_is_interrupted() {
        let memory = Arc::new(InMemoryStore::new());
        memory.insert(Document::new(key()).field("counter", 0));
        let cancel = CancellationToken::new();
        let accessor = ConditionalAccessor::new(Arc::new(StalledStore(memory)), cancel.clone());

        let ops = vec![FieldOperation::increment("/counter", 1).unwrap()];
        let k = key();
        let (result, _) = tokio::join!(accessor.patch(&k, &ops, None), async {
            tokio::task::yield_now().await;
            cancel.cancel();
        });
        assert!(matches!(result, Err(CoreError::Interrupted)));
        assert!(matches!(accessor.read(&key(), None).await, Err(CoreError::Cancelled)));
    }

    /// Reads pass through; mutations never complete.
    struct StalledStore(Arc<InMemoryStore>);

    #[async_trait::async_trait]
    impl DocumentStore for StalledStore {
        async fn read_conditional(
            &self,
            key: &DocumentKey,
            if_none_match: Option<&VersionToken>,
        ) -> StoreResult<StoreOutcome<VersionedDocument>> {
            self.0.read_conditional(key, if_none_match).await
        }

        async fn write(
            &self,
            _: &Document,
            _: Option<&VersionToken>,
        ) -> StoreResult<StoreOutcome<VersionToken>> {
            std::future::pending().await
        }

        async fn patch(
            &self,
            _: &DocumentKey,
            _: &[FieldOperation],
            _: Option<&VersionToken>,
        ) -> StoreResult<StoreOutcome<VersionedDocument>> {
            std::future::pending().await
        }

        async fn create(&self, _: &Document) -> StoreResult<StoreOutcome<VersionedDocument>> {
            std::future::pending().await
        }

        async fn delete(
            &self,
            _: &DocumentKey,
            _: Option<&VersionToken>,
        ) -> StoreResult<StoreOutcome<()>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn detached_accessor_ignores_cancellation() {
        let (_, accessor, cancel, _) = setup();
        cancel.cancel();
        let detached = accessor.detached();
        assert!(!detached.is_cancelled());
        assert!(detached.read_existing(&key()).await.is_ok());
    }

    #[tokio::test]
    async fn create_and_delete() {
        let (_, accessor, _, token) = setup();
        assert_eq!(
            accessor.create(&Document::new(key())).await.unwrap(),
            CreateOutcome::Conflict
        );
        assert_eq!(accessor.delete(&key(), Some(&token)).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(accessor.delete(&key(), None).await.unwrap(), DeleteOutcome::NotFound);
    }
}
