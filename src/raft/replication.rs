//! Leader-side replication bookkeeping: commit advancement and conflict-term
//! backtracking (spec.md §4.1 "AppendEntries sender" / §9).

use crate::raft::log_store::LogStore;
use crate::raft::types::{AppendEntriesResponse, LogIndex, Term};

/// Highest index replicated on a strict majority of servers (leader + peers),
/// restricted to entries the leader appended during its own `current_term`
/// (Raft paper §5.4.2 — never commit an old-term entry by counting replicas
/// alone).
pub fn advance_commit_index(
    current_commit_index: LogIndex,
    current_term: Term,
    match_indices: &[LogIndex],
    quorum: usize,
    log: &LogStore,
) -> LogIndex {
    let mut candidate = current_commit_index;
    for index in (current_commit_index + 1)..=log.last_index() {
        if log.term_at(index) != Some(current_term) {
            continue;
        }
        let replicated_count = match_indices.iter().filter(|m| **m >= index).count() + 1;
        if replicated_count >= quorum {
            candidate = index;
        }
    }
    candidate
}

/// New `next_index` to retry with after a rejected `AppendEntries`, using the
/// follower's conflict hints when present to skip the whole mismatched term
/// in one round trip instead of decrementing by one (SPEC_FULL §B).
pub fn backtrack_next_index(
    current_next_index: LogIndex,
    response: &AppendEntriesResponse,
    log: &LogStore,
) -> LogIndex {
    match (response.conflict_term, response.conflict_index) {
        (Some(conflict_term), Some(conflict_index)) => {
            match log.first_index_in_term(conflict_term) {
                Some(leader_first_in_term) => leader_first_in_term.max(1),
                None => conflict_index.max(1),
            }
        }
        _ => current_next_index.saturating_sub(1).max(1),
    }
}
