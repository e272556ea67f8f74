//! Standalone node binary: brings up a `RaftNode` and its outbox dispatcher
//! over a user-supplied peer roster. Wiring an actual network transport is
//! left to the embedder (spec.md §6 "external collaborators"); this binary
//! demonstrates the engine with an in-process, no-op RPC client so it can
//! run as a single-node cluster out of the box.

use std::sync::Arc;

use async_trait::async_trait;
use raftkit::error::Result;
use raftkit::raft::{InMemoryStateMachine, RaftConfig, RaftNode, RaftRpcClient};
use raftkit::raft::types::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};

struct UnreachablePeers;

#[async_trait]
impl RaftRpcClient for UnreachablePeers {
    async fn request_vote(&self, _peer: &str, _request: VoteRequest) -> Result<VoteResponse> {
        Err(raftkit::error::Error::Unavailable("no transport configured".into()))
    }

    async fn append_entries(
        &self,
        _peer: &str,
        _request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        Err(raftkit::error::Error::Unavailable("no transport configured".into()))
    }

    async fn install_snapshot(
        &self,
        _peer: &str,
        _request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        Err(raftkit::error::Error::Unavailable("no transport configured".into()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    raftkit::init_tracing();

    let node_id = std::env::var("RAFTKIT_NODE_ID").unwrap_or_else(|_| "node-1".to_string());
    let data_dir = std::env::var("RAFTKIT_DATA_DIR").unwrap_or_else(|_| "./data/raftkit".to_string());

    let config = RaftConfig::new(node_id, data_dir);
    let state_machine = Arc::new(InMemoryStateMachine::new());
    let rpc = Arc::new(UnreachablePeers);

    let node = RaftNode::new(config, state_machine, rpc).await?;
    tracing::info!(node_id = %node.node_id(), "raftkit node starting");
    node.run().await
}
