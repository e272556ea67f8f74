//! `OutboxMessage`: a durable, at-least-once unit of work written in the same
//! transaction as the business change that produced it (spec.md §3).

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// A single outbox entry. Producers insert these alongside their domain
/// write; the dispatcher is the only writer of the lease/retry fields after
/// that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub message_type: String,
    pub content: Vec<u8>,
    pub occurred_at: SystemTime,
    pub processed_at: Option<SystemTime>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    /// Messages sharing a key are dispatched in occurred_at order relative
    /// to each other (spec.md §4.6 "partition ordering").
    pub partition_key: Option<String>,
    pub lock_id: Option<Uuid>,
    pub lock_expiration: Option<SystemTime>,
    /// Optimistic-concurrency token, bumped on every update.
    pub version: u64,
}

impl OutboxMessage {
    pub fn new(message_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            content,
            occurred_at: SystemTime::now(),
            processed_at: None,
            last_error: None,
            retry_count: 0,
            partition_key: None,
            lock_id: None,
            lock_expiration: None,
            version: 0,
        }
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// A message is poisoned once retries are exhausted without success
    /// (spec.md §4.6 "poison semantics").
    pub fn is_poisoned(&self, max_retries: u32) -> bool {
        !self.is_processed() && self.retry_count >= max_retries
    }

    pub fn is_leased(&self, now: SystemTime) -> bool {
        matches!(self.lock_expiration, Some(expiration) if expiration > now)
    }
}
