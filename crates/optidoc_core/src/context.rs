//! Explicit runtime context shared by accessor, retry engine and coordinator.

use crate::accessor::ConditionalAccessor;
use crate::config::CoreConfig;
use crate::resolver::{ConflictResolver, TieBreakPolicy, TimestampPolicy};
use optidoc_store::DocumentStore;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Store handle, configuration, tie-break policy and cancellation signal.
///
/// Built once and cloned into every component. Cloning is cheap.
#[derive(Clone)]
pub struct Context {
    store: Arc<dyn DocumentStore>,
    config: Arc<CoreConfig>,
    policy: Arc<dyn TieBreakPolicy>,
    cancel: CancellationToken,
}

impl Context {
    /// Creates a context with the default timestamp policy for `config`.
    pub fn new(store: Arc<dyn DocumentStore>, config: CoreConfig) -> Self {
        let policy = Arc::new(TimestampPolicy::new(config.timestamp_field.clone()));
        Self {
            store,
            config: Arc::new(config),
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the tie-break policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn TieBreakPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Returns the cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels every call made through this context and its clones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Builds an accessor observing this context's cancellation token.
    pub fn accessor(&self) -> ConditionalAccessor {
        ConditionalAccessor::new(Arc::clone(&self.store), self.cancel.clone())
    }

    /// Builds a resolver using this context's tie-break policy.
    pub fn resolver(&self) -> ConflictResolver {
        ConflictResolver::new(Arc::clone(&self.policy))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
