//! Outbox dispatcher: a fast-path in-process channel plus a slow-path poller
//! over `OutboxStore`, so delivery survives both a missed notification and a
//! process crash (spec.md §4.6).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::outbox::config::OutboxConfig;
use crate::outbox::message::OutboxMessage;
use crate::outbox::store::OutboxStore;

/// Delivers one outbox message to its ultimate consumer. Must be idempotent:
/// the lease protocol guarantees at-least-once, not exactly-once, delivery
/// (spec.md §4.6).
#[async_trait]
pub trait OutboxHandler: Send + Sync {
    async fn handle(&self, message: &OutboxMessage) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct OutboxStats {
    pub processed_count: AtomicU64,
    pub failed_count: AtomicU64,
    pub poisoned_count: AtomicU64,
}

/// Same-process hand-off from the producer to the dispatcher. Producers call
/// `notify` right after their transaction commits; a missed or dropped
/// notification is still recovered by the slow-path poller.
pub struct OutboxDispatcher {
    config: OutboxConfig,
    store: Arc<dyn OutboxStore>,
    handler: Arc<dyn OutboxHandler>,
    node_id: Uuid,
    fast_path_tx: mpsc::Sender<Uuid>,
    fast_path_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Uuid>>>,
    stats: OutboxStats,
}

impl OutboxDispatcher {
    pub fn new(config: OutboxConfig, store: Arc<dyn OutboxStore>, handler: Arc<dyn OutboxHandler>) -> Arc<Self> {
        let (fast_path_tx, fast_path_rx) = mpsc::channel(config.batch_size.max(1) * 4);
        Arc::new(Self {
            config,
            store,
            handler,
            node_id: Uuid::new_v4(),
            fast_path_tx,
            fast_path_rx: tokio::sync::Mutex::new(Some(fast_path_rx)),
            stats: OutboxStats::default(),
        })
    }

    /// Signals the dispatcher that `id` is ready without waiting for the next
    /// poll cycle. Best-effort: a full channel just falls back to the
    /// slow-path poller.
    pub fn notify(&self, id: Uuid) {
        let _ = self.fast_path_tx.try_send(id);
    }

    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.processed_count.load(Ordering::Relaxed),
            self.stats.failed_count.load(Ordering::Relaxed),
            self.stats.poisoned_count.load(Ordering::Relaxed),
        )
    }

    /// Runs both the fast-path listener and the slow-path poll loop until
    /// cancelled. Intended to be spawned once per process.
    pub async fn run(self: Arc<Self>) {
        let mut fast_path_rx = self
            .fast_path_rx
            .lock()
            .await
            .take()
            .expect("OutboxDispatcher::run called more than once");
        let mut poll_interval = tokio::time::interval(self.config.polling_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(id) = fast_path_rx.recv() => {
                    self.try_dispatch_one(id).await;
                }
                _ = poll_interval.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// Runs one slow-path poll cycle. Exposed so embedders (and tests) can
    /// drive the poller without waiting on `polling_interval`.
    pub async fn poll_once(&self) {
        let now = SystemTime::now();
        let Some(initial_delay_cutoff) = now.checked_sub(self.config.initial_delay) else {
            return;
        };
        match self
            .store
            .claimable(
                initial_delay_cutoff,
                now,
                self.config.batch_size,
                self.config.partition_key.as_deref(),
                self.config.max_retries,
            )
            .await
        {
            Ok(candidates) => {
                for message in candidates {
                    self.try_dispatch(message).await;
                }
            }
            Err(e) => warn!(error = %e, "outbox poll failed"),
        }
    }

    async fn try_dispatch_one(&self, id: Uuid) {
        let now = SystemTime::now();
        match self
            .store
            .claimable(
                now,
                now,
                usize::MAX,
                self.config.partition_key.as_deref(),
                self.config.max_retries,
            )
            .await
        {
            Ok(candidates) => {
                if let Some(message) = candidates.into_iter().find(|m| m.id == id) {
                    self.try_dispatch(message).await;
                }
            }
            Err(e) => warn!(error = %e, "fast-path lookup failed"),
        }
    }

    async fn try_dispatch(&self, message: OutboxMessage) {
        if message.is_poisoned(self.config.max_retries) {
            self.stats.poisoned_count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let lock_id = self.node_id;
        let lock_expiration = SystemTime::now() + self.config.lease_duration;
        let claimed = match self
            .store
            .claim_lease(message.id, message.version, lock_id, lock_expiration)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(error = %e, message_id = %message.id, "lease claim failed");
                return;
            }
        };
        if !claimed {
            // Another instance won the race; not our job this round.
            return;
        }

        match self.handler.handle(&message).await {
            Ok(()) => {
                if self
                    .store
                    .mark_processed(message.id, lock_id, SystemTime::now())
                    .await
                    .unwrap_or(false)
                {
                    self.stats.processed_count.fetch_add(1, Ordering::Relaxed);
                    info!(message_id = %message.id, "outbox message delivered");
                }
            }
            Err(e) => {
                self.stats.failed_count.fetch_add(1, Ordering::Relaxed);
                warn!(message_id = %message.id, error = %e, "outbox delivery failed");
                let _ = self.store.mark_failed(message.id, lock_id, e.to_string()).await;
                if message.retry_count + 1 >= self.config.max_retries {
                    self.stats.poisoned_count.fetch_add(1, Ordering::Relaxed);
                    warn!(message_id = %message.id, "outbox message poisoned after max retries");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::store::InMemoryOutboxStore;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl OutboxHandler for CountingHandler {
        async fn handle(&self, _message: &OutboxMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                return Err(crate::error::Error::Unavailable("simulated failure".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_and_marks_processed() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first_n: 0 });
        let dispatcher = OutboxDispatcher::new(OutboxConfig::default(), store.clone(), handler);

        let message = OutboxMessage::new("test", vec![1, 2, 3]);
        store.insert(message).await.unwrap();

        dispatcher.poll_once().await;
        let (processed, failed, poisoned) = dispatcher.stats();
        assert_eq!((processed, failed, poisoned), (1, 0, 0));
    }

    #[tokio::test]
    async fn poisons_after_max_retries() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first_n: 10 });
        let mut config = OutboxConfig::default();
        config.max_retries = 2;
        config.initial_delay = Duration::ZERO;
        let dispatcher = OutboxDispatcher::new(config, store.clone(), handler);

        let message = OutboxMessage::new("test", vec![]);
        let id = message.id;
        store.insert(message).await.unwrap();

        dispatcher.poll_once().await;
        dispatcher.poll_once().await;
        let (_, _, poisoned) = dispatcher.stats();
        assert_eq!(poisoned, 1);

        let now = SystemTime::now();
        let claimable = store.claimable(now, now, 10, None, u32::MAX).await.unwrap();
        assert!(claimable.iter().any(|m| m.id == id));
    }
}
