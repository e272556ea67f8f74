//! Wire and log types shared by every Raft role.
//!
//! Mirrors the teacher's `clustering/raft.rs` / `networking/membership/raft/{log,election,replication}.rs`
//! message shapes, collapsed into one module since this crate has a single Raft stack.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::common::NodeId;

/// Logical election epoch. Never decreases within a node's lifetime.
pub type Term = u64;

/// 1-based log position. 0 is the sentinel "before the log begins".
pub type LogIndex = u64;

/// An entry in the replicated log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Vec<u8>,
    pub timestamp: SystemTime,
}

impl LogEntry {
    pub fn new(term: Term, index: LogIndex, command: Vec<u8>) -> Self {
        Self {
            term,
            index,
            command,
            timestamp: SystemTime::now(),
        }
    }
}

/// `RequestVote` RPC request (spec.md §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// `AppendEntries` RPC request (spec.md §6.2). Empty `entries` is a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// Follower's last log index after applying this request, when successful.
    pub match_index: Option<LogIndex>,
    /// Fast-backtracking hint (SPEC_FULL §B): term of the conflicting entry.
    pub conflict_term: Option<Term>,
    /// Fast-backtracking hint: first index in that conflicting term.
    pub conflict_index: Option<LogIndex>,
}

/// `InstallSnapshot` RPC request (spec.md §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: Term,
}
