//! Durable outbox storage contract: the conditional-update lease protocol
//! that lets multiple dispatcher instances share one table safely
//! (spec.md §4.6).

use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::outbox::message::OutboxMessage;

/// Storage contract for outbox messages. Every state-changing method is a
/// conditional update keyed on `version`, so two dispatcher instances racing
/// on the same message never both believe they hold the lease
/// (spec.md §4.6 "optimistic concurrency").
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn insert(&self, message: OutboxMessage) -> Result<()>;

    /// Finds up to `batch_size` unprocessed, unleased-or-expired-lease,
    /// not-yet-poisoned messages older than `initial_delay`, ordered by
    /// `occurred_at`. `partition_key` restricts the claim to messages tagged
    /// with that key or with no key at all (spec.md §4.6 claim query:
    /// `partitionKey = filter OR partitionKey IS NULL`); `None` claims every
    /// partition. `max_retries` excludes messages whose `retry_count` has
    /// already reached it — a poisoned message must not keep being reclaimed.
    async fn claimable(
        &self,
        initial_delay_cutoff: SystemTime,
        now: SystemTime,
        batch_size: usize,
        partition_key: Option<&str>,
        max_retries: u32,
    ) -> Result<Vec<OutboxMessage>>;

    /// Attempts to claim the lease on `id`, succeeding only if `expected_version`
    /// still matches what's stored (spec.md §4.6 "conditional UPDATE").
    async fn claim_lease(
        &self,
        id: Uuid,
        expected_version: u64,
        lock_id: Uuid,
        lock_expiration: SystemTime,
    ) -> Result<bool>;

    /// Marks a leased message processed, succeeding only if `lock_id` still
    /// matches the caller's lease (spec.md §4.6 "lease ownership check").
    async fn mark_processed(&self, id: Uuid, lock_id: Uuid, processed_at: SystemTime) -> Result<bool>;

    /// Records a failed delivery attempt and releases the lease, succeeding
    /// only if `lock_id` still matches.
    async fn mark_failed(&self, id: Uuid, lock_id: Uuid, error: String) -> Result<bool>;
}

/// Reference in-memory store, grounded in the teacher's `streams/integration.rs`
/// DashMap-backed event buffer pattern.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    messages: DashMap<Uuid, OutboxMessage>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, message: OutboxMessage) -> Result<()> {
        self.messages.insert(message.id, message);
        Ok(())
    }

    async fn claimable(
        &self,
        initial_delay_cutoff: SystemTime,
        now: SystemTime,
        batch_size: usize,
        partition_key: Option<&str>,
        max_retries: u32,
    ) -> Result<Vec<OutboxMessage>> {
        let mut candidates: Vec<OutboxMessage> = self
            .messages
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|m| {
                !m.is_processed()
                    && m.occurred_at <= initial_delay_cutoff
                    && !m.is_leased(now)
                    && m.retry_count < max_retries
                    && match partition_key {
                        None => true,
                        Some(filter) => {
                            m.partition_key.as_deref() == Some(filter) || m.partition_key.is_none()
                        }
                    }
            })
            .collect();
        candidates.sort_by_key(|m| m.occurred_at);
        candidates.truncate(batch_size);
        Ok(candidates)
    }

    async fn claim_lease(
        &self,
        id: Uuid,
        expected_version: u64,
        lock_id: Uuid,
        lock_expiration: SystemTime,
    ) -> Result<bool> {
        let Some(mut entry) = self.messages.get_mut(&id) else {
            return Err(Error::NotFound(format!("outbox message {id} not found")));
        };
        if entry.version != expected_version {
            return Ok(false);
        }
        entry.lock_id = Some(lock_id);
        entry.lock_expiration = Some(lock_expiration);
        entry.version += 1;
        Ok(true)
    }

    async fn mark_processed(&self, id: Uuid, lock_id: Uuid, processed_at: SystemTime) -> Result<bool> {
        let Some(mut entry) = self.messages.get_mut(&id) else {
            return Err(Error::NotFound(format!("outbox message {id} not found")));
        };
        if entry.lock_id != Some(lock_id) {
            return Ok(false);
        }
        entry.processed_at = Some(processed_at);
        entry.lock_id = None;
        entry.lock_expiration = None;
        entry.version += 1;
        Ok(true)
    }

    async fn mark_failed(&self, id: Uuid, lock_id: Uuid, error: String) -> Result<bool> {
        let Some(mut entry) = self.messages.get_mut(&id) else {
            return Err(Error::NotFound(format!("outbox message {id} not found")));
        };
        if entry.lock_id != Some(lock_id) {
            return Ok(false);
        }
        entry.retry_count += 1;
        entry.last_error = Some(error);
        entry.lock_id = None;
        entry.lock_expiration = None;
        entry.version += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn claim_lease_fails_on_stale_version() {
        let store = InMemoryOutboxStore::new();
        let message = OutboxMessage::new("test", vec![1]);
        let id = message.id;
        store.insert(message).await.unwrap();

        let claimed = store
            .claim_lease(id, 0, Uuid::new_v4(), SystemTime::now() + Duration::from_secs(60))
            .await
            .unwrap();
        assert!(claimed);

        let claimed_again = store
            .claim_lease(id, 0, Uuid::new_v4(), SystemTime::now() + Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!claimed_again);
    }

    #[tokio::test]
    async fn mark_processed_requires_matching_lock() {
        let store = InMemoryOutboxStore::new();
        let message = OutboxMessage::new("test", vec![1]);
        let id = message.id;
        store.insert(message).await.unwrap();

        let lock_id = Uuid::new_v4();
        store
            .claim_lease(id, 0, lock_id, SystemTime::now() + Duration::from_secs(60))
            .await
            .unwrap();

        let wrong_lock_result = store.mark_processed(id, Uuid::new_v4(), SystemTime::now()).await.unwrap();
        assert!(!wrong_lock_result);

        let ok = store.mark_processed(id, lock_id, SystemTime::now()).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn claimable_skips_leased_and_processed() {
        let store = InMemoryOutboxStore::new();
        let processed = OutboxMessage::new("a", vec![]);
        let leased = OutboxMessage::new("b", vec![]);
        let available = OutboxMessage::new("c", vec![]);
        let processed_id = processed.id;
        let leased_id = leased.id;
        let available_id = available.id;

        store.insert(processed).await.unwrap();
        store.insert(leased).await.unwrap();
        store.insert(available).await.unwrap();

        store
            .mark_processed(processed_id, Uuid::new_v4(), SystemTime::now())
            .await
            .ok();
        store
            .claim_lease(leased_id, 0, Uuid::new_v4(), SystemTime::now() + Duration::from_secs(60))
            .await
            .unwrap();

        let now = SystemTime::now();
        let claimable = store.claimable(now, now, 10, None, 3).await.unwrap();
        assert_eq!(claimable.len(), 1);
        assert_eq!(claimable[0].id, available_id);
    }

    #[tokio::test]
    async fn claimable_respects_partition_filter() {
        let store = InMemoryOutboxStore::new();
        let a = OutboxMessage::new("evt", vec![]).with_partition_key("tenant-a");
        let b = OutboxMessage::new("evt", vec![]).with_partition_key("tenant-b");
        let unpartitioned = OutboxMessage::new("evt", vec![]);
        let a_id = a.id;
        let unpartitioned_id = unpartitioned.id;
        store.insert(a).await.unwrap();
        store.insert(b).await.unwrap();
        store.insert(unpartitioned).await.unwrap();

        let now = SystemTime::now();
        let claimable = store.claimable(now, now, 10, Some("tenant-a"), 3).await.unwrap();
        let mut ids: Vec<_> = claimable.iter().map(|m| m.id).collect();
        ids.sort();
        let mut expected = vec![a_id, unpartitioned_id];
        expected.sort();
        assert_eq!(ids, expected, "claim should include the matching partition plus unpartitioned rows");
    }

    #[tokio::test]
    async fn claimable_excludes_exhausted_retries() {
        let store = InMemoryOutboxStore::new();
        let message = OutboxMessage::new("evt", vec![]);
        let id = message.id;
        store.insert(message).await.unwrap();

        let lock_id = Uuid::new_v4();
        store
            .claim_lease(id, 0, lock_id, SystemTime::now() + Duration::from_secs(60))
            .await
            .unwrap();
        store.mark_failed(id, lock_id, "boom".into()).await.unwrap();

        let now = SystemTime::now();
        let claimable = store.claimable(now, now, 10, None, 1).await.unwrap();
        assert!(claimable.is_empty(), "a message at max_retries must not be claimable");
    }
}
