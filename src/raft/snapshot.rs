//! Snapshot orchestration (spec.md §4.5): compacting the local log once it
//! grows past `snapshot_threshold`, and installing a leader-sent snapshot.

use std::sync::Arc;

use crate::error::Result;
use crate::raft::log_store::LogStore;
use crate::raft::state_machine::StateMachine;
use crate::raft::types::InstallSnapshotRequest;

/// Takes a snapshot of `state_machine` and compacts `log` up to
/// `(up_to_index, up_to_term)` once `appliedIndex - lastSnapshotIndex >=
/// threshold` (spec.md §4.5 "Periodic trigger"). Never discards entries the
/// state machine hasn't applied yet.
pub async fn maybe_compact(
    log: &mut LogStore,
    state_machine: &Arc<dyn StateMachine>,
    threshold: u64,
) -> Result<Option<Vec<u8>>> {
    let applied = state_machine.last_applied();
    let last_snapshot_index = log.last_snapshot_index();
    if applied <= last_snapshot_index || applied - last_snapshot_index < threshold {
        return Ok(None);
    }
    let up_to_index = applied.min(log.last_index());
    if up_to_index <= last_snapshot_index {
        return Ok(None);
    }
    let Some(up_to_term) = log.term_at(up_to_index) else {
        return Ok(None);
    };
    let snapshot_bytes = state_machine.snapshot().await?;
    log.compact(snapshot_bytes.clone(), up_to_index, up_to_term).await?;
    Ok(Some(snapshot_bytes))
}

/// Applies a leader-sent `InstallSnapshot` to the local state machine and log
/// boundary, discarding any conflicting local entries (spec.md §4.5).
pub async fn install_snapshot(
    request: &InstallSnapshotRequest,
    log: &mut LogStore,
    state_machine: &Arc<dyn StateMachine>,
) -> Result<()> {
    state_machine.restore(&request.data).await?;
    log.compact(
        request.data.clone(),
        request.last_included_index,
        request.last_included_term,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::state_machine::InMemoryStateMachine;
    use crate::raft::types::LogEntry;

    #[tokio::test]
    async fn compacts_once_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogStore::open(dir.path()).await.unwrap();
        let sm: Arc<dyn StateMachine> = Arc::new(InMemoryStateMachine::new());
        for i in 1..=5 {
            log.append(LogEntry::new(1, i, vec![i as u8])).await.unwrap();
            sm.apply(i, &[i as u8]).await.unwrap();
        }
        let snap = maybe_compact(&mut log, &sm, 3).await.unwrap();
        assert!(snap.is_some());
        assert_eq!(log.term_at(5), Some(1));
        assert_eq!(log.entry_at(1), None);
    }

    #[tokio::test]
    async fn no_compaction_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogStore::open(dir.path()).await.unwrap();
        let sm: Arc<dyn StateMachine> = Arc::new(InMemoryStateMachine::new());
        log.append(LogEntry::new(1, 1, vec![1])).await.unwrap();
        sm.apply(1, &[1]).await.unwrap();
        let snap = maybe_compact(&mut log, &sm, 10).await.unwrap();
        assert!(snap.is_none());
    }
}
