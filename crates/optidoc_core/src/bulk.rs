//! Bounded fan-out of conditional reads and patches over many documents.

use crate::accessor::ReadOutcome;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::retry::{MutationOutcome, RetryEngine};
use crate::tags::TagTracker;
use chrono::Utc;
use dashmap::DashMap;
use optidoc_codec::{DocumentKey, FieldOperation};
use optidoc_store::StatusCode;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Per-document results of a bulk call.
#[derive(Debug, Default)]
pub struct BulkReport {
    /// Status of every document that was processed.
    pub statuses: DashMap<DocumentKey, StatusCode>,
    /// Documents whose processing failed with an error.
    pub errors: DashMap<DocumentKey, String>,
}

impl BulkReport {
    /// Status of one document.
    pub fn status(&self, key: &DocumentKey) -> Option<StatusCode> {
        self.statuses.get(key).map(|entry| *entry.value())
    }

    /// Number of documents that ended with `status`.
    pub fn count(&self, status: StatusCode) -> usize {
        self.statuses.iter().filter(|entry| *entry.value() == status).count()
    }

    /// Returns true if no document failed with an error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs per-document work with at most `max_concurrency` tasks in flight.
///
/// Tokens observed by reads and patches are remembered in a shared
/// [`TagTracker`]; later reads send them as `if_none_match`.
#[derive(Debug, Clone)]
pub struct BulkExecutor {
    ctx: Context,
    tracker: Arc<TagTracker>,
}

impl BulkExecutor {
    /// Creates an executor with a fresh tracker.
    pub fn new(ctx: &Context) -> Self {
        Self::with_tracker(ctx, Arc::new(TagTracker::new()))
    }

    /// Creates an executor sharing an existing tracker.
    pub fn with_tracker(ctx: &Context, tracker: Arc<TagTracker>) -> Self {
        Self {
            ctx: ctx.clone(),
            tracker,
        }
    }

    /// Returns the tag tracker.
    pub fn tracker(&self) -> &Arc<TagTracker> {
        &self.tracker
    }

    /// Drops tracked tags older than the configured time-to-live.
    pub fn prune_tags(&self) -> usize {
        let removed = self.tracker.prune_older_than(self.ctx.config().tag_ttl);
        if removed > 0 {
            debug!(removed, "pruned stale tags");
        }
        removed
    }

    /// Reads every document, conditionally when a token is tracked.
    ///
    /// Statuses are `OK` (body fetched, tracker updated), `NotModified`
    /// (tracked token still current) or `NotFound` (tracking dropped).
    pub async fn read_all(&self, keys: Vec<DocumentKey>) -> CoreResult<BulkReport> {
        let accessor = self.ctx.accessor();
        let tracker = Arc::clone(&self.tracker);
        let items = keys.into_iter().map(|key| (key, ())).collect();

        self.fan_out(items, move |key, ()| {
            let accessor = accessor.clone();
            let tracker = Arc::clone(&tracker);
            async move {
                let known = tracker.token(&key);
                let result = match accessor.read(&key, known.as_ref()).await {
                    Ok(ReadOutcome::Found(doc)) => tracker.observe(&doc).map(|_| StatusCode::Ok),
                    Ok(ReadOutcome::NotModified) => {
                        tracker.touch(&key);
                        Ok(StatusCode::NotModified)
                    }
                    Ok(ReadOutcome::NotFound) => {
                        tracker.forget(&key);
                        Ok(StatusCode::NotFound)
                    }
                    Err(e) => Err(e),
                };
                (key, result)
            }
        })
        .await
    }

    /// Patches every document with retry, starting from tracked tokens.
    ///
    /// Statuses are `OK` (applied), `NotModified` (nothing left to write),
    /// `NotFound`, or `PreconditionFailed` when retries were exhausted.
    pub async fn patch_all(
        &self,
        items: Vec<(DocumentKey, Vec<FieldOperation>)>,
    ) -> CoreResult<BulkReport> {
        let engine = RetryEngine::new(&self.ctx);
        let tracker = Arc::clone(&self.tracker);

        self.fan_out(items, move |key, ops| {
            let engine = engine.clone();
            let tracker = Arc::clone(&tracker);
            async move {
                let expected = tracker.token(&key);
                let result = match engine.patch(&key, ops, expected, Utc::now()).await {
                    Ok(mutation) => {
                        let observed = match mutation.document() {
                            Some(doc) => tracker.observe(doc).map(|_| ()),
                            None => Ok(()),
                        };
                        observed.map(|()| match mutation.outcome {
                            MutationOutcome::Applied(_) | MutationOutcome::Deleted => StatusCode::Ok,
                            MutationOutcome::Unchanged(_) | MutationOutcome::Converged(_) => {
                                StatusCode::NotModified
                            }
                        })
                    }
                    Err(CoreError::RetryExhausted { .. }) => Ok(StatusCode::PreconditionFailed),
                    Err(CoreError::NotFound { .. }) => {
                        tracker.forget(&key);
                        Ok(StatusCode::NotFound)
                    }
                    Err(e) => Err(e),
                };
                (key, result)
            }
        })
        .await
    }

    async fn fan_out<P, F, Fut>(&self, items: Vec<(DocumentKey, P)>, job: F) -> CoreResult<BulkReport>
    where
        P: Send + 'static,
        F: Fn(DocumentKey, P) -> Fut,
        Fut: Future<Output = (DocumentKey, CoreResult<StatusCode>)> + Send + 'static,
    {
        let cancel = self.ctx.cancellation().clone();
        let semaphore = Arc::new(Semaphore::new(self.ctx.config().max_concurrency));
        let report = Arc::new(BulkReport::default());
        let mut tasks = JoinSet::new();
        let mut items = items.into_iter();

        while let Some((key, payload)) = items.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.errors.insert(key, CoreError::Cancelled.to_string());
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| CoreError::Cancelled)?
                }
            };
            let work = job(key, payload);
            let report = Arc::clone(&report);
            tasks.spawn(async move {
                let _permit = permit;
                let (key, result) = work.await;
                match result {
                    Ok(status) => {
                        report.statuses.insert(key, status);
                    }
                    Err(e) => {
                        warn!(document = %key, error = %e, "bulk item failed");
                        report.errors.insert(key, e.to_string());
                    }
                }
            });
        }
        for (key, _) in items {
            report.errors.insert(key, CoreError::Cancelled.to_string());
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "bulk task did not complete");
            }
        }

        Ok(Arc::try_unwrap(report).unwrap_or_else(|shared| BulkReport {
            statuses: shared.statuses.clone(),
            errors: shared.errors.clone(),
        }))
    }
}
