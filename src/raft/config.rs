use std::time::Duration;

use crate::common::NodeId;
use crate::error::{Error, Result};

/// Static peer roster entry (spec.md §2.D "Cluster membership"): address only,
/// the RPC client handle is resolved by whatever `RaftRpcClient` impl the
/// embedder supplies (spec.md §1 "external collaborators").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub node_id: NodeId,
    pub address: String,
}

/// Raft node configuration (spec.md §6 "Configuration (Raft node)").
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub node_id: NodeId,
    pub peers: Vec<PeerAddr>,
    pub persistence_path: std::path::PathBuf,
    pub election_timeout_base: Duration,
    pub heartbeat_interval: Duration,
    pub rpc_timeout: Duration,
    pub snapshot_threshold: u64,
    pub max_entries_per_append: usize,
    pub proposal_queue_capacity: usize,
}

impl RaftConfig {
    pub fn new(node_id: NodeId, persistence_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            node_id,
            peers: Vec::new(),
            persistence_path: persistence_path.into(),
            election_timeout_base: Duration::from_millis(1250),
            heartbeat_interval: Duration::from_millis(1100),
            rpc_timeout: Duration::from_millis(1100),
            snapshot_threshold: 10_000,
            max_entries_per_append: 256,
            proposal_queue_capacity: 1024,
        }
    }

    /// Fail-fast validation at construction (spec.md §7 "programmer error").
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::InvalidConfig("node_id must not be empty".into()));
        }
        if self.peers.iter().any(|p| p.node_id == self.node_id) {
            return Err(Error::InvalidConfig(
                "peers must not include self".into(),
            ));
        }
        if self.heartbeat_interval >= self.election_timeout_base {
            return Err(Error::InvalidConfig(
                "heartbeat_interval must be well below election_timeout_base".into(),
            ));
        }
        if self.max_entries_per_append == 0 {
            return Err(Error::InvalidConfig(
                "max_entries_per_append must be nonzero".into(),
            ));
        }
        Ok(())
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn quorum(&self) -> usize {
        self.cluster_size() / 2 + 1
    }
}
