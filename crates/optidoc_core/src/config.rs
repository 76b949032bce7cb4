//! Configuration for optidoc core.

use rand::Rng;
use std::time::Duration;

/// Partition holding transaction log documents unless configured otherwise.
pub const DEFAULT_LOG_PARTITION: &str = "__transactions";

/// Field read by the default timestamp tie-break policy.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "lastUpdated";

/// Core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Retry behaviour for conditional writes.
    pub retry: RetryConfig,
    /// Maximum number of documents processed concurrently by bulk calls.
    pub max_concurrency: usize,
    /// Partition key under which transaction logs are stored.
    pub log_partition_key: String,
    /// Top-level field holding a document's last-modified timestamp.
    pub timestamp_field: String,
    /// How long tracked tags stay valid.
    pub tag_ttl: Duration,
}

impl CoreConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_concurrency: 8,
            log_partition_key: DEFAULT_LOG_PARTITION.to_string(),
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            tag_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the bulk concurrency limit. Zero is treated as one.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Sets the partition key of transaction logs.
    pub fn with_log_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.log_partition_key = partition_key.into();
        self
    }

    /// Sets the timestamp field used for tie-breaks.
    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    /// Sets the tag time-to-live.
    pub fn with_tag_ttl(mut self, ttl: Duration) -> Self {
        self.tag_ttl = ttl;
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for bounded retries of conditional writes.
///
/// `max_retries = k` allows `k + 1` write attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given retry bound.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self::new(0).without_backoff()
    }

    /// Removes all delays between attempts.
    pub fn without_backoff(mut self) -> Self {
        self.initial_delay = Duration::ZERO;
        self.max_delay = Duration::ZERO;
        self.backoff_multiplier = 1.0;
        self.add_jitter = false;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below one are treated as one.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Total number of write attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before attempt `attempt` (0-indexed; the first attempt has none).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // NaN or negative products collapse to a delay within [0, max_delay]
        let delay = base.min(self.max_delay.as_secs_f64()).max(0.0);

        if self.add_jitter && delay > 0.0 {
            let jitter = delay * rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay + jitter)
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
