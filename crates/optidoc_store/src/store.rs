//! Document store contract.

use crate::error::StoreResult;
use crate::outcome::StoreOutcome;
use async_trait::async_trait;
use optidoc_codec::{Document, DocumentKey, FieldOperation, VersionToken, VersionedDocument};

/// A partitioned document store with single-document atomicity.
///
/// Every successful mutation assigns a fresh [`VersionToken`]; tokens are
/// never reused. An expected token turns a mutation into a compare-and-swap:
/// if the stored token differs the call returns
/// [`StoreOutcome::PreconditionFailed`] and nothing changes. This is the only
/// concurrency gate the store offers; there are no multi-document
/// transactions.
///
/// # Outcomes and errors
///
/// Outcomes the caller is expected to branch on (not found, precondition
/// failed, conflict) are returned as [`StoreOutcome`] values. Transport
/// failures and rejected patches are [`crate::StoreError`]s.
///
/// # Implementors
///
/// - [`crate::InMemoryStore`] - reference store for tests and demos
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document unconditionally.
    async fn read(&self, key: &DocumentKey) -> StoreResult<StoreOutcome<VersionedDocument>> {
        self.read_conditional(key, None).await
    }

    /// Reads a document unless the caller's token is still current.
    ///
    /// When `if_none_match` equals the stored token the store answers
    /// [`StoreOutcome::NotModified`] without fetching the body.
    async fn read_conditional(
        &self,
        key: &DocumentKey,
        if_none_match: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>>;

    /// Replaces a document.
    ///
    /// Without an expected token this is an upsert. With one, the document
    /// must exist and carry that token.
    async fn write(
        &self,
        document: &Document,
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionToken>>;

    /// Applies field operations to a stored document, atomically.
    ///
    /// Returns [`StoreOutcome::NotModified`] if the operations leave the
    /// body unchanged; the token is not bumped in that case.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::InvalidPatch`] if any operation cannot
    /// be applied. The document is left untouched.
    async fn patch(
        &self,
        key: &DocumentKey,
        ops: &[FieldOperation],
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>>;

    /// Creates a document. Returns [`StoreOutcome::Conflict`] if the key is taken.
    async fn create(&self, document: &Document) -> StoreResult<StoreOutcome<VersionedDocument>>;

    /// Deletes a document, optionally gated on its token.
    async fn delete(
        &self,
        key: &DocumentKey,
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<()>>;
}
