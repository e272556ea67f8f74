//! Role state (spec.md §9 `Role`): a tagged enum dispatched on by the node's
//! single event loop, rather than virtual calls across role objects.

use std::collections::HashMap;

use crate::common::NodeId;
use crate::raft::types::LogIndex;

/// Per-peer replication progress, tracked only while this node is Leader
/// (Raft paper §5.3).
#[derive(Debug, Clone, Copy)]
pub struct PeerProgress {
    /// Next log index to send this peer.
    pub next_index: LogIndex,
    /// Highest index known replicated to this peer.
    pub match_index: LogIndex,
}

#[derive(Debug, Clone)]
pub struct LeaderState {
    pub peers: HashMap<NodeId, PeerProgress>,
}

impl LeaderState {
    pub fn new(peer_ids: impl IntoIterator<Item = NodeId>, last_log_index: LogIndex) -> Self {
        let peers = peer_ids
            .into_iter()
            .map(|id| {
                (
                    id,
                    PeerProgress {
                        next_index: last_log_index + 1,
                        match_index: 0,
                    },
                )
            })
            .collect();
        Self { peers }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandidateState {
    pub votes_received: std::collections::HashSet<NodeId>,
}

/// This node's current role, mirroring spec.md §9's three-state dispatcher.
/// `RaftNode` holds exactly one of these at a time and matches on it rather
/// than invoking trait methods across role boundaries.
#[derive(Debug, Clone)]
pub enum Role {
    Follower {
        /// Leader this node most recently heard from, for redirect hints
        /// (`Error::NotLeader { leader_hint }`).
        leader_hint: Option<NodeId>,
    },
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Default for Role {
    fn default() -> Self {
        Role::Follower { leader_hint: None }
    }
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader(_))
    }

    pub fn leader_hint(&self) -> Option<NodeId> {
        match self {
            Role::Follower { leader_hint } => leader_hint.clone(),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Follower { .. } => "follower",
            Role::Candidate(_) => "candidate",
            Role::Leader(_) => "leader",
        }
    }
}

/// Decides whether `votes` (including this node's own vote) reach quorum.
pub fn has_quorum(votes: usize, quorum: usize) -> bool {
    votes >= quorum
}
