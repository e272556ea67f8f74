//! Proposal registry: tracks in-flight client commands from submission
//! through commit-and-apply resolution (spec.md §9 "Proposal").

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::raft::types::{LogIndex, Term};

/// Outcome delivered to whoever called `RaftNode::propose`.
pub type ProposalResult = Result<Vec<u8>>;

struct PendingProposal {
    /// Term under which the entry was appended to the leader's local log.
    /// If the node steps down before commit, any proposal whose term no
    /// longer matches the current leader term must resolve as `SteppedDown`
    /// rather than hang forever (spec.md §9 "a leadership change must
    /// resolve, not silently drop, every outstanding proposal").
    term: Term,
    completion: oneshot::Sender<ProposalResult>,
}

/// Maps `LogIndex -> completion`, consulted by the replication loop as the
/// commit index advances and by the role dispatcher on step-down.
#[derive(Default)]
pub struct ProposalRegistry {
    pending: Mutex<HashMap<LogIndex, PendingProposal>>,
}

impl ProposalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new proposal at `index`, returning the receiver half the
    /// caller awaits for the outcome.
    pub fn register(&self, index: LogIndex, term: Term) -> oneshot::Receiver<ProposalResult> {
        let (tx, rx) = oneshot::channel();
        self.register_with_sender(index, term, tx);
        rx
    }

    /// Registers a proposal whose completion sender was created upstream
    /// (the `RaftNode::propose` caller already holds the receiver half).
    pub fn register_with_sender(
        &self,
        index: LogIndex,
        term: Term,
        completion: oneshot::Sender<ProposalResult>,
    ) {
        self.pending.lock().insert(index, PendingProposal { term, completion });
    }

    /// Resolves every pending proposal with index `<= commit_index` using
    /// `resolve` to compute each one's applied result, in ascending index
    /// order so the state machine is applied in log order.
    pub fn resolve_up_to<F>(&self, commit_index: LogIndex, mut resolve: F)
    where
        F: FnMut(LogIndex) -> ProposalResult,
    {
        let mut pending = self.pending.lock();
        let mut indices: Vec<LogIndex> = pending
            .keys()
            .copied()
            .filter(|i| *i <= commit_index)
            .collect();
        indices.sort_unstable();
        for index in indices {
            if let Some(proposal) = pending.remove(&index) {
                let _ = proposal.completion.send(resolve(index));
            }
        }
    }

    /// Fails every proposal registered under a term that no longer matches
    /// the node's current term (spec.md §9 step-down resolution).
    pub fn fail_stale(&self, current_term: Term) {
        let mut pending = self.pending.lock();
        let stale: Vec<LogIndex> = pending
            .iter()
            .filter(|(_, p)| p.term != current_term)
            .map(|(i, _)| *i)
            .collect();
        for index in stale {
            if let Some(proposal) = pending.remove(&index) {
                let _ = proposal.completion.send(Err(Error::SteppedDown));
            }
        }
    }

    /// Fails every pending proposal unconditionally, used when this node
    /// steps down from leader entirely.
    pub fn fail_all(&self) {
        let mut pending = self.pending.lock();
        for (_, proposal) in pending.drain() {
            let _ = proposal.completion.send(Err(Error::SteppedDown));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
