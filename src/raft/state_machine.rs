//! Application state machine contract (spec.md §4.4).

use async_trait::async_trait;

use crate::error::Result;
use crate::raft::types::LogIndex;

/// Deterministic replicated state machine. `apply` must be idempotent under
/// re-application of the same `(index, command)` after a crash-restart
/// (spec.md §4.4 "exactly-once apply").
#[async_trait]
pub trait StateMachine: Send + Sync {
    /// Applies a committed command, returning an opaque result handed back to
    /// the proposer (spec.md §9 "Proposal" resolution value).
    async fn apply(&self, index: LogIndex, command: &[u8]) -> Result<Vec<u8>>;

    /// Serializes the full state for `InstallSnapshot` (spec.md §4.5).
    async fn snapshot(&self) -> Result<Vec<u8>>;

    /// Replaces the current state from a leader-provided snapshot.
    async fn restore(&self, snapshot: &[u8]) -> Result<()>;

    /// Index of the last entry this state machine has applied, used to skip
    /// re-applying entries already reflected on restart.
    fn last_applied(&self) -> LogIndex;
}

/// Reference state machine: an in-memory append log of applied commands,
/// grounded in the teacher's `networking/membership/raft/replication.rs`
/// "apply to state machine" stub, made concrete for testing the engine.
pub struct InMemoryStateMachine {
    applied: parking_lot::RwLock<Vec<(LogIndex, Vec<u8>)>>,
}

impl Default for InMemoryStateMachine {
    fn default() -> Self {
        Self {
            applied: parking_lot::RwLock::new(Vec::new()),
        }
    }
}

impl InMemoryStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_commands(&self) -> Vec<Vec<u8>> {
        self.applied.read().iter().map(|(_, c)| c.clone()).collect()
    }
}

#[async_trait]
impl StateMachine for InMemoryStateMachine {
    async fn apply(&self, index: LogIndex, command: &[u8]) -> Result<Vec<u8>> {
        let mut applied = self.applied.write();
        if let Some((last_index, _)) = applied.last() {
            if index <= *last_index {
                return Ok(command.to_vec());
            }
        }
        applied.push((index, command.to_vec()));
        Ok(command.to_vec())
    }

    async fn snapshot(&self) -> Result<Vec<u8>> {
        let applied = self.applied.read();
        Ok(bincode::serde::encode_to_vec(&*applied, bincode::config::standard())?)
    }

    async fn restore(&self, snapshot: &[u8]) -> Result<()> {
        let (restored, _): (Vec<(LogIndex, Vec<u8>)>, usize) =
            bincode::serde::decode_from_slice(snapshot, bincode::config::standard())?;
        *self.applied.write() = restored;
        Ok(())
    }

    fn last_applied(&self) -> LogIndex {
        self.applied.read().last().map(|(i, _)| *i).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_is_idempotent_for_already_applied_index() {
        let sm = InMemoryStateMachine::new();
        sm.apply(1, b"a").await.unwrap();
        sm.apply(2, b"b").await.unwrap();
        sm.apply(1, b"stale-retry").await.unwrap();
        assert_eq!(sm.last_applied(), 2);
        assert_eq!(sm.applied_commands(), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let sm = InMemoryStateMachine::new();
        sm.apply(1, b"a").await.unwrap();
        sm.apply(2, b"b").await.unwrap();
        let snap = sm.snapshot().await.unwrap();

        let sm2 = InMemoryStateMachine::new();
        sm2.restore(&snap).await.unwrap();
        assert_eq!(sm2.last_applied(), 2);
        assert_eq!(sm2.applied_commands(), sm.applied_commands());
    }
}
