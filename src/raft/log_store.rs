//! Replicated log storage: append, truncate-on-conflict, compaction (spec.md §4.2).

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::raft::types::{LogEntry, LogIndex, Term};

/// In-memory log fronted by a periodic full-snapshot write to disk.
///
/// The teacher's `networking/membership/raft/log.rs` keeps the log as a
/// `Vec<LogEntry>` guarded by a lock and persists lazily; this keeps that
/// shape but adds the compaction boundary spec.md §4.5 requires.
pub struct LogStore {
    path: PathBuf,
    /// Index of the last entry folded into a snapshot. Entries at or below
    /// this index are not retained in `entries`.
    last_included_index: LogIndex,
    last_included_term: Term,
    /// State-machine bytes produced by the compaction at `last_included_index`,
    /// retained so a leader can serve `InstallSnapshot` to a lagging peer
    /// (spec.md §4.2 `snapshotData()`) without re-invoking the state machine.
    last_included_data: Option<Vec<u8>>,
    /// `entries[i]` holds log index `last_included_index + 1 + i`.
    entries: Vec<LogEntry>,
}

impl LogStore {
    pub async fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("log");
        match fs::read(&path).await {
            Ok(bytes) => {
                let (snapshot, _): (PersistedLog, usize) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                Ok(Self {
                    path,
                    last_included_index: snapshot.last_included_index,
                    last_included_term: snapshot.last_included_term,
                    last_included_data: snapshot.last_included_data,
                    entries: snapshot.entries,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                path,
                last_included_index: 0,
                last_included_term: 0,
                last_included_data: None,
                entries: Vec::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Index of the last entry in the log (0 if empty and nothing compacted).
    pub fn last_index(&self) -> LogIndex {
        self.last_included_index + self.entries.len() as LogIndex
    }

    pub fn last_term(&self) -> Term {
        self.entries
            .last()
            .map(|e| e.term)
            .unwrap_or(self.last_included_term)
    }

    /// Index of the most recent compaction boundary (0 if never compacted).
    pub fn last_snapshot_index(&self) -> LogIndex {
        self.last_included_index
    }

    pub fn last_snapshot_term(&self) -> Term {
        self.last_included_term
    }

    /// State-machine bytes from the most recent compaction, if any
    /// (spec.md §4.2 `snapshotData() -> bytes?`).
    pub fn snapshot_data(&self) -> Option<&[u8]> {
        self.last_included_data.as_deref()
    }

    /// Term of the entry at `index`, or `None` if it precedes the log's start,
    /// is compacted away, or does not yet exist.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == self.last_included_index {
            return Some(self.last_included_term);
        }
        if index < self.last_included_index || index == 0 {
            return None;
        }
        self.entry_at(index).map(|e| e.term)
    }

    pub fn entry_at(&self, index: LogIndex) -> Option<&LogEntry> {
        if index <= self.last_included_index {
            return None;
        }
        let offset = (index - self.last_included_index - 1) as usize;
        self.entries.get(offset)
    }

    pub fn entries_from(&self, start: LogIndex) -> Vec<LogEntry> {
        if start <= self.last_included_index {
            return self.entries.clone();
        }
        let offset = (start - self.last_included_index - 1) as usize;
        self.entries.get(offset..).map(|s| s.to_vec()).unwrap_or_default()
    }

    /// Finds the first index in `term`, used for AppendEntries conflict-term
    /// fast backtracking (SPEC_FULL §B).
    pub fn first_index_in_term(&self, term: Term) -> Option<LogIndex> {
        self.entries
            .iter()
            .find(|e| e.term == term)
            .map(|e| e.index)
    }

    /// Appends a leader-proposed entry at the end of the log.
    pub async fn append(&mut self, entry: LogEntry) -> Result<()> {
        self.entries.push(entry);
        self.persist().await
    }

    /// Applies a follower-side `AppendEntries`: truncates any conflicting
    /// suffix starting at `entries[0].index`, then appends `entries`.
    pub async fn append_entries(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        if let Some(first) = entries.first() {
            self.truncate_from(first.index);
        }
        self.entries.extend(entries);
        self.persist().await
    }

    fn truncate_from(&mut self, index: LogIndex) {
        if index <= self.last_included_index {
            self.entries.clear();
            return;
        }
        let offset = (index - self.last_included_index - 1) as usize;
        self.entries.truncate(offset);
    }

    /// Drops all entries at or below `up_to_index`, retaining `snapshot_data`
    /// and its term as the new compaction boundary (spec.md §4.2 `compact`,
    /// §4.5 "InstallSnapshot").
    pub async fn compact(
        &mut self,
        snapshot_data: Vec<u8>,
        up_to_index: LogIndex,
        up_to_term: Term,
    ) -> Result<()> {
        if up_to_index <= self.last_included_index {
            return Ok(());
        }
        if up_to_index > self.last_index() {
            return Err(Error::InvalidArgument(
                "cannot compact past the end of the log".into(),
            ));
        }
        let offset = (up_to_index - self.last_included_index) as usize;
        self.entries.drain(0..offset);
        self.last_included_index = up_to_index;
        self.last_included_term = up_to_term;
        self.last_included_data = Some(snapshot_data);
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = PersistedLog {
            last_included_index: self.last_included_index,
            last_included_term: self.last_included_term,
            last_included_data: self.last_included_data.clone(),
            entries: self.entries.clone(),
        };
        let tmp_path = self.path.with_extension("tmp");
        let bytes = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())?;
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedLog {
    last_included_index: LogIndex,
    last_included_term: Term,
    last_included_data: Option<Vec<u8>>,
    entries: Vec<LogEntry>,
}
