//! Durable `(currentTerm, votedFor)` storage (spec.md §3 "PersistentState", §4.3).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::common::NodeId;
use crate::error::Result;
use crate::raft::types::Term;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistentStateFile {
    current_term: Term,
    voted_for: Option<NodeId>,
}

/// Stores `(currentTerm, votedFor)` atomically, durable before any dependent
/// RPC response is sent (spec.md §3).
pub struct PersistentStateStore {
    path: PathBuf,
    state: PersistentStateFile,
}

impl PersistentStateStore {
    /// Load from `dir/state`, or start fresh (`currentTerm = 0, votedFor = None`).
    pub async fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("state");
        let state = match fs::read(&path).await {
            Ok(bytes) => {
                let (state, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistentStateFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, state })
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.state.voted_for.as_ref()
    }

    /// Sets the current term. Resets `votedFor` to `None` iff the new term
    /// strictly exceeds the old one (spec.md §4.3).
    pub async fn set_current_term(&mut self, term: Term) -> Result<()> {
        if term > self.state.current_term {
            self.state.current_term = term;
            self.state.voted_for = None;
        }
        self.flush().await
    }

    pub async fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<()> {
        self.state.voted_for = voted_for;
        self.flush().await
    }

    /// If `incoming_term` exceeds the current term, persists the new term and
    /// clears the vote, returning `true` (spec.md §4.3 `stepDownIfGreaterTerm`).
    pub async fn step_down_if_greater_term(&mut self, incoming_term: Term) -> Result<bool> {
        if incoming_term > self.state.current_term {
            self.state.current_term = incoming_term;
            self.state.voted_for = None;
            self.flush().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Atomic replace via write-to-temp-then-rename, so a crash mid-write
    /// never leaves a torn `state` file.
    async fn flush(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        let bytes = bincode::serde::encode_to_vec(&self.state, bincode::config::standard())?;
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_term_clears_vote() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PersistentStateStore::open(dir.path()).await.unwrap();
        store.set_voted_for(Some("node-2".to_string())).await.unwrap();
        store.set_current_term(5).await.unwrap();
        assert_eq!(store.current_term(), 5);
        assert_eq!(store.voted_for(), None);
    }

    #[tokio::test]
    async fn same_term_keeps_vote() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PersistentStateStore::open(dir.path()).await.unwrap();
        store.set_current_term(3).await.unwrap();
        store.set_voted_for(Some("node-2".to_string())).await.unwrap();
        store.set_current_term(3).await.unwrap();
        assert_eq!(store.voted_for(), Some(&"node-2".to_string()));
    }

    #[tokio::test]
    async fn recovers_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = PersistentStateStore::open(dir.path()).await.unwrap();
            store.set_current_term(7).await.unwrap();
            store.set_voted_for(Some("node-3".to_string())).await.unwrap();
        }
        let store = PersistentStateStore::open(dir.path()).await.unwrap();
        assert_eq!(store.current_term(), 7);
        assert_eq!(store.voted_for(), Some(&"node-3".to_string()));
    }

    #[tokio::test]
    async fn step_down_if_greater_term() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PersistentStateStore::open(dir.path()).await.unwrap();
        store.set_current_term(4).await.unwrap();
        assert!(!store.step_down_if_greater_term(4).await.unwrap());
        assert!(store.step_down_if_greater_term(5).await.unwrap());
        assert_eq!(store.current_term(), 5);
    }
}
