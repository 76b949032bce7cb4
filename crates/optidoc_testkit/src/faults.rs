//! Fault-injecting store wrappers.
//!
//! [`FaultyStore`] fails or stalls selected calls. [`InterferingStore`]
//! simulates a concurrent writer that changes a document just before a
//! conditional call reaches the store.

use async_trait::async_trait;
use optidoc_codec::{Document, DocumentKey, FieldOperation, VersionToken, VersionedDocument};
use optidoc_store::{DocumentStore, InMemoryStore, StoreError, StoreOutcome, StoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Store method a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMethod {
    /// `read` and `read_conditional`.
    Read,
    /// `write`.
    Write,
    /// `patch`.
    Patch,
    /// `create`.
    Create,
    /// `delete`.
    Delete,
}

/// What happens to a faulted call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// Fail with a transport error.
    Transport {
        /// Whether the error reports itself as retryable.
        retryable: bool,
    },
    /// Never complete.
    Hang,
    /// Let the call reach the store, then fail with a transport error.
    LostReply {
        /// Whether the error reports itself as retryable.
        retryable: bool,
    },
}

#[derive(Debug, Clone)]
struct Fault {
    method: StoreMethod,
    key: Option<DocumentKey>,
    skip: usize,
    remaining: Option<usize>,
    kind: FaultKind,
}

impl Fault {
    fn matches(&self, method: StoreMethod, key: &DocumentKey) -> bool {
        self.method == method
            && self.key.as_ref().map_or(true, |k| k == key)
            && self.remaining != Some(0)
    }
}

/// Wraps a store and injects failures into chosen calls.
pub struct FaultyStore {
    inner: Arc<dyn DocumentStore>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<StoreMethod, usize>>,
}

impl FaultyStore {
    /// Wraps a store with no faults configured.
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fails the next `times` calls of `method` on `key` with a
    /// non-retryable transport error.
    pub fn fail_on(&self, method: StoreMethod, key: &DocumentKey, times: usize) {
        self.push(Fault {
            method,
            key: Some(key.clone()),
            skip: 0,
            remaining: Some(times),
            kind: FaultKind::Transport { retryable: false },
        });
    }

    /// Fails every call of `method` on `key`.
    pub fn always_fail(&self, method: StoreMethod, key: &DocumentKey) {
        self.push(Fault {
            method,
            key: Some(key.clone()),
            skip: 0,
            remaining: None,
            kind: FaultKind::Transport { retryable: false },
        });
    }

    /// Stalls every call of `method` on `key` forever.
    pub fn hang_on(&self, method: StoreMethod, key: &DocumentKey) {
        self.push(Fault {
            method,
            key: Some(key.clone()),
            skip: 0,
            remaining: None,
            kind: FaultKind::Hang,
        });
    }

    /// Lets `skip` calls of `method` through, then applies the next one but
    /// loses its reply.
    pub fn lose_reply(&self, method: StoreMethod, skip: usize, retryable: bool) {
        self.push(Fault {
            method,
            key: None,
            skip,
            remaining: Some(1),
            kind: FaultKind::LostReply { retryable },
        });
    }

    /// Removes all configured faults.
    pub fn heal(&self) {
        self.faults.lock().clear();
    }

    /// Number of calls made to `method`, faulted or not.
    pub fn calls(&self, method: StoreMethod) -> usize {
        self.calls.lock().get(&method).copied().unwrap_or(0)
    }

    /// Waits until `method` has been called at least `count` times.
    pub async fn wait_for_calls(&self, method: StoreMethod, count: usize) {
        while self.calls(method) < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn push(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    /// Counts the call and applies a matching fault. Returns the fault to
    /// apply once the inner call has completed.
    async fn enter(&self, method: StoreMethod, key: &DocumentKey) -> StoreResult<Option<FaultKind>> {
        *self.calls.lock().entry(method).or_insert(0) += 1;

        let kind = {
            let mut faults = self.faults.lock();
            faults.iter_mut().find(|f| f.matches(method, key)).and_then(|fault| {
                if fault.skip > 0 {
                    fault.skip -= 1;
                    return None;
                }
                if let Some(remaining) = fault.remaining.as_mut() {
                    *remaining -= 1;
                }
                Some(fault.kind.clone())
            })
        };
        match kind {
            Some(FaultKind::Transport { retryable }) => Err(StoreError::transport(
                format!("injected {method:?} failure on {key}"),
                retryable,
            )),
            Some(FaultKind::Hang) => std::future::pending().await,
            other => Ok(other),
        }
    }

    fn reply<T>(
        method: StoreMethod,
        key: &DocumentKey,
        after: Option<FaultKind>,
        result: StoreResult<T>,
    ) -> StoreResult<T> {
        match after {
            Some(FaultKind::LostReply { retryable }) => {
                let _applied = result?;
                Err(StoreError::transport(
                    format!("lost reply to {method:?} on {key}"),
                    retryable,
                ))
            }
            _ => result,
        }
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn read_conditional(
        &self,
        key: &DocumentKey,
        if_none_match: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>> {
        let after = self.enter(StoreMethod::Read, key).await?;
        Self::reply(StoreMethod::Read, key, after, self.inner.read_conditional(key, if_none_match).await)
    }

    async fn write(
        &self,
        document: &Document,
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionToken>> {
        let after = self.enter(StoreMethod::Write, &document.key).await?;
        Self::reply(StoreMethod::Write, &document.key, after, self.inner.write(document, expected).await)
    }

    async fn patch(
        &self,
        key: &DocumentKey,
        ops: &[FieldOperation],
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>> {
        let after = self.enter(StoreMethod::Patch, key).await?;
        Self::reply(StoreMethod::Patch, key, after, self.inner.patch(key, ops, expected).await)
    }

    async fn create(&self, document: &Document) -> StoreResult<StoreOutcome<VersionedDocument>> {
        let after = self.enter(StoreMethod::Create, &document.key).await?;
        Self::reply(StoreMethod::Create, &document.key, after, self.inner.create(document).await)
    }

    async fn delete(
        &self,
        key: &DocumentKey,
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<()>> {
        let after = self.enter(StoreMethod::Delete, key).await?;
        Self::reply(StoreMethod::Delete, key, after, self.inner.delete(key, expected).await)
    }
}

#[derive(Debug, Clone)]
struct Interference {
    ops: Vec<FieldOperation>,
    remaining: Option<usize>,
}

/// Wraps an [`InMemoryStore`]; before a conditional write, patch or delete
/// of a watched document, applies a competing patch so the caller's token
/// is stale by the time its call lands.
pub struct InterferingStore {
    inner: Arc<InMemoryStore>,
    watched: Mutex<HashMap<DocumentKey, Interference>>,
    conditional_calls: Mutex<usize>,
}

impl InterferingStore {
    /// Wraps a store with no interference configured.
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            watched: Mutex::new(HashMap::new()),
            conditional_calls: Mutex::new(0),
        }
    }

    /// Interferes with the next `times` conditional calls on `key`.
    pub fn interfere(&self, key: &DocumentKey, ops: Vec<FieldOperation>, times: usize) {
        self.watched.lock().insert(
            key.clone(),
            Interference {
                ops,
                remaining: Some(times),
            },
        );
    }

    /// Interferes with every conditional call on `key`.
    pub fn interfere_always(&self, key: &DocumentKey, ops: Vec<FieldOperation>) {
        self.watched.lock().insert(
            key.clone(),
            Interference {
                ops,
                remaining: None,
            },
        );
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    /// Number of conditional mutations received.
    pub fn conditional_calls(&self) -> usize {
        *self.conditional_calls.lock()
    }

    async fn before_conditional(&self, key: &DocumentKey, expected: Option<&VersionToken>) -> StoreResult<()> {
        if expected.is_none() {
            return Ok(());
        }
        *self.conditional_calls.lock() += 1;

        let ops = {
            let mut watched = self.watched.lock();
            match watched.get_mut(key) {
                Some(interference) if interference.remaining != Some(0) => {
                    if let Some(remaining) = interference.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    Some(interference.ops.clone())
                }
                _ => None,
            }
        };
        if let Some(ops) = ops {
            self.inner.patch(key, &ops, None).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InterferingStore {
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
        self.before_conditional(&document.key, expected).await?;
        self.inner.write(document, expected).await
    }

    async fn patch(
        &self,
        key: &DocumentKey,
        ops: &[FieldOperation],
        expected: Option<&VersionToken>,
    ) -> StoreResult<StoreOutcome<VersionedDocument>> {
        self.before_conditional(key, expected).await?;
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
        self.before_conditional(key, expected).await?;
        self.inner.delete(key, expected).await
    }
}
