//! Vote granting and election-timeout randomization (spec.md §4.1).

use std::time::Duration;

use crate::raft::types::{LogIndex, Term, VoteRequest};

/// Picks a random timeout in `[base, 2*base)` (spec.md §4.1), re-rolled on
/// every reset so split votes don't repeat indefinitely.
pub fn randomized_election_timeout(base: Duration) -> Duration {
    let base_ms = base.as_millis().max(1) as u64;
    let jitter_ms = fastrand::u64(0..base_ms);
    base + Duration::from_millis(jitter_ms)
}

/// Decides whether this node should grant its vote to `request`, given the
/// receiver's own persisted state. Pure function so it can be unit tested
/// without spinning up the event loop (spec.md §4.1 "RequestVote receiver
/// implementation").
pub fn should_grant_vote(
    request: &VoteRequest,
    current_term: Term,
    voted_for: Option<&str>,
    last_log_index: LogIndex,
    last_log_term: Term,
) -> bool {
    if request.term < current_term {
        return false;
    }
    let already_voted_elsewhere = match voted_for {
        Some(existing) => existing != request.candidate_id,
        None => false,
    };
    if already_voted_elsewhere {
        return false;
    }
    candidate_log_is_at_least_as_up_to_date(
        request.last_log_term,
        request.last_log_index,
        last_log_term,
        last_log_index,
    )
}

/// Raft's log-comparison rule: higher term wins; equal term, longer log wins
/// (Raft paper §5.4.1).
fn candidate_log_is_at_least_as_up_to_date(
    candidate_last_term: Term,
    candidate_last_index: LogIndex,
    voter_last_term: Term,
    voter_last_index: LogIndex,
) -> bool {
    match candidate_last_term.cmp(&voter_last_term) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate_last_index >= voter_last_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote_req(term: Term, candidate: &str, last_index: LogIndex, last_term: Term) -> VoteRequest {
        VoteRequest {
            term,
            candidate_id: candidate.to_string(),
            last_log_index: last_index,
            last_log_term: last_term,
        }
    }

    #[test]
    fn rejects_stale_term() {
        let req = vote_req(3, "b", 5, 2);
        assert!(!should_grant_vote(&req, 4, None, 5, 2));
    }

    #[test]
    fn rejects_if_already_voted_for_someone_else() {
        let req = vote_req(3, "b", 5, 2);
        assert!(!should_grant_vote(&req, 3, Some("c"), 5, 2));
    }

    #[test]
    fn grants_if_already_voted_for_same_candidate() {
        let req = vote_req(3, "b", 5, 2);
        assert!(should_grant_vote(&req, 3, Some("b"), 5, 2));
    }

    #[test]
    fn rejects_if_candidate_log_is_behind() {
        let req = vote_req(3, "b", 4, 2);
        assert!(!should_grant_vote(&req, 3, None, 5, 2));
    }

    #[test]
    fn grants_if_candidate_log_is_caught_up() {
        let req = vote_req(3, "b", 5, 2);
        assert!(should_grant_vote(&req, 3, None, 5, 2));
    }

    #[test]
    fn grants_if_candidate_term_is_newer_even_with_shorter_log() {
        let req = vote_req(3, "b", 1, 3);
        assert!(should_grant_vote(&req, 3, None, 5, 2));
    }

    #[test]
    fn randomized_timeout_stays_in_expected_range() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let t = randomized_election_timeout(base);
            assert!(t >= base && t < base * 2);
        }
    }
}
