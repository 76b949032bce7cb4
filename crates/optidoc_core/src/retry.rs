//! Bounded retry of conditional writes.
//!
//! Each attempt is `Attempting(n)`: a conditional call with the freshest
//! known token. A precondition failure re-reads the document, resolves
//! the pending operations against it and moves to `Attempting(n + 1)`,
//! unless resolution leaves nothing to write. With `max_retries = k` at
//! most `k + 1` conditional calls are made.

use crate::accessor::{ConditionalAccessor, DeleteOutcome, PatchOutcome, WriteOutcome};
use crate::config::RetryConfig;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::resolver::ConflictResolver;
use chrono::{DateTime, Utc};
use optidoc_codec::{DocumentKey, FieldOperation, VersionToken, VersionedDocument};
use tracing::{debug, warn};

/// How a retried mutation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The store applied the change; carries the new snapshot.
    Applied(VersionedDocument),
    /// The store reported that the change was a no-op.
    Unchanged(VersionToken),
    /// Resolution dropped every operation; carries the snapshot that
    /// already satisfies the intent.
    Converged(VersionedDocument),
    /// The document was deleted.
    Deleted,
}

/// Result of a retried mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Final outcome.
    pub outcome: MutationOutcome,
    /// Conditional calls made.
    pub attempts: u32,
    /// Latest snapshot read by the engine before its final call, if it read
    /// at all. This is the state the change was applied over.
    pub base: Option<VersionedDocument>,
}

impl Mutation {
    /// Returns the resulting snapshot when one is known.
    pub fn document(&self) -> Option<&VersionedDocument> {
        match &self.outcome {
            MutationOutcome::Applied(doc) | MutationOutcome::Converged(doc) => Some(doc),
            MutationOutcome::Unchanged(_) | MutationOutcome::Deleted => None,
        }
    }
}

/// Retry loop around [`ConditionalAccessor`] and [`ConflictResolver`].
#[derive(Debug, Clone)]
pub struct RetryEngine {
    accessor: ConditionalAccessor,
    resolver: ConflictResolver,
    config: RetryConfig,
}

impl RetryEngine {
    /// Creates an engine from a context.
    pub fn new(ctx: &Context) -> Self {
        Self::with_parts(ctx.accessor(), ctx.resolver(), ctx.config().retry.clone())
    }

    /// Creates an engine from explicit parts.
    pub fn with_parts(
        accessor: ConditionalAccessor,
        resolver: ConflictResolver,
        config: RetryConfig,
    ) -> Self {
        Self {
            accessor,
            resolver,
            config,
        }
    }

    /// Returns the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    async fn before_attempt(&self, key: &DocumentKey, attempt: u32) -> CoreResult<()> {
        if attempt > 0 {
            self.accessor.pause(self.config.delay_for_attempt(attempt)).await?;
        }
        debug!(document = %key, attempt, "conditional attempt");
        Ok(())
    }

    fn exhausted(&self, key: &DocumentKey, last_snapshot: Option<VersionedDocument>) -> CoreError {
        let attempts = self.config.max_attempts();
        warn!(document = %key, attempts, "retries exhausted");
        CoreError::RetryExhausted {
            key: key.clone(),
            attempts,
            last_snapshot: last_snapshot.map(Box::new),
        }
    }

    /// Patches a document, resolving conflicts and retrying on stale tokens.
    ///
    /// Without `expected` the document is read first to obtain a token.
    /// `intent_at` is handed to the tie-break policy.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MalformedInput`] for invalid operations (never retried)
    /// - [`CoreError::NotFound`] if the document does not exist
    /// - [`CoreError::RetryExhausted`] after `max_retries + 1` failed calls
    pub async fn patch(
        &self,
        key: &DocumentKey,
        ops: Vec<FieldOperation>,
        expected: Option<VersionToken>,
        intent_at: DateTime<Utc>,
    ) -> CoreResult<Mutation> {
        for op in &ops {
            op.validate()?;
        }

        let mut base = None;
        let mut token = match expected {
            Some(token) => token,
            None => {
                let latest = self.accessor.read_existing(key).await?;
                let token = latest.token.clone();
                base = Some(latest);
                token
            }
        };
        let mut pending = ops;

        for attempt in 0..self.config.max_attempts() {
            self.before_attempt(key, attempt).await?;
            let outcome = match self.accessor.patch(key, &pending, Some(&token)).await? {
                PatchOutcome::Patched(doc) => Some(MutationOutcome::Applied(doc)),
                PatchOutcome::NotModified => Some(MutationOutcome::Unchanged(token.clone())),
                PatchOutcome::NotFound => return Err(CoreError::not_found(key)),
                PatchOutcome::PreconditionFailed => None,
            };
            if let Some(outcome) = outcome {
                return Ok(Mutation {
                    outcome,
                    attempts: attempt + 1,
                    base,
                });
            }

            warn!(document = %key, attempt, "precondition failed, resolving");
            let latest = self.accessor.read_existing(key).await?;
            let resolution = self.resolver.resolve(&latest, &pending, intent_at)?;
            if resolution.is_empty() {
                debug!(document = %key, "converged without writing");
                return Ok(Mutation {
                    outcome: MutationOutcome::Converged(latest.clone()),
                    attempts: attempt + 1,
                    base: Some(latest),
                });
            }
            token = resolution.token;
            pending = resolution.ops;
            base = Some(latest);
        }

        Err(self.exhausted(key, base))
    }

    /// Replaces a document with the result of applying `ops` to its latest
    /// snapshot, retrying on stale tokens.
    ///
    /// The first call uses `expected` if given, otherwise the token of the
    /// initial read. Operations are always applied locally to a fresh body.
    pub async fn write(
        &self,
        key: &DocumentKey,
        ops: Vec<FieldOperation>,
        expected: Option<VersionToken>,
        intent_at: DateTime<Utc>,
    ) -> CoreResult<Mutation> {
        for op in &ops {
            op.validate()?;
        }

        let mut snapshot = self.accessor.read_existing(key).await?;
        let mut token = expected.unwrap_or_else(|| snapshot.token.clone());
        let mut pending = ops;

        for attempt in 0..self.config.max_attempts() {
            self.before_attempt(key, attempt).await?;
            let next = snapshot.document.patched(&pending)?;
            match self.accessor.write(&next, Some(&token)).await? {
                WriteOutcome::Written(new_token) => {
                    return Ok(Mutation {
                        outcome: MutationOutcome::Applied(VersionedDocument::new(next, new_token)),
                        attempts: attempt + 1,
                        base: Some(snapshot),
                    })
                }
                WriteOutcome::NotFound => return Err(CoreError::not_found(key)),
                WriteOutcome::PreconditionFailed => {}
            }

            warn!(document = %key, attempt, "precondition failed, resolving");
            let latest = self.accessor.read_existing(key).await?;
            let resolution = self.resolver.resolve(&latest, &pending, intent_at)?;
            if resolution.is_empty() {
                return Ok(Mutation {
                    outcome: MutationOutcome::Converged(latest.clone()),
                    attempts: attempt + 1,
                    base: Some(latest),
                });
            }
            token = resolution.token;
            pending = resolution.ops;
            snapshot = latest;
        }

        Err(self.exhausted(key, Some(snapshot)))
    }

    /// Deletes a document, refreshing the token on precondition failures.
    ///
    /// A delete has no field-level intent to resolve: a stale token is
    /// replaced by the current one and the delete is retried.
    pub async fn delete(&self, key: &DocumentKey, expected: Option<VersionToken>) -> CoreResult<Mutation> {
        let mut base = None;
        let mut token = expected;

        for attempt in 0..self.config.max_attempts() {
            self.before_attempt(key, attempt).await?;
            match self.accessor.delete(key, token.as_ref()).await? {
                DeleteOutcome::Deleted => {
                    return Ok(Mutation {
                        outcome: MutationOutcome::Deleted,
                        attempts: attempt + 1,
                        base,
                    })
                }
                DeleteOutcome::NotFound => return Err(CoreError::not_found(key)),
                DeleteOutcome::PreconditionFailed => {}
            }

            warn!(document = %key, attempt, "precondition failed on delete");
            let latest = self.accessor.read_existing(key).await?;
            token = Some(latest.token.clone());
            base = Some(latest);
        }

        Err(self.exhausted(key, base))
    }
}
