//! Dispatcher configuration (spec.md §6 "Configuration (Outbox)").

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Slow-path poll cadence, used when the fast-path channel misses a
    /// message (producer and dispatcher in different processes, or the
    /// channel was full).
    pub polling_interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    /// How long a claimed lease is held before another worker may reclaim it
    /// (spec.md §4.6 "lease protocol").
    pub lease_duration: Duration,
    /// Grace period after `occurred_at` before the slow-path poller will
    /// pick a message up, giving the fast path first chance at it.
    pub initial_delay: Duration,
    /// Restricts this dispatcher's claims to messages tagged with this
    /// partition key, or with no partition key at all (spec.md §4.6 claim
    /// query: `partitionKey = filter OR partitionKey IS NULL`). `None` means
    /// this dispatcher claims every partition.
    pub partition_key: Option<String>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(10),
            batch_size: 20,
            max_retries: 3,
            lease_duration: Duration::from_secs(60),
            initial_delay: Duration::from_secs(120),
            partition_key: None,
        }
    }
}
