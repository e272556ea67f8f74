//! RPC transport contract (spec.md §6 "external collaborators").
//!
//! `RaftNode` depends only on this trait, never on a concrete transport, the
//! same separation the teacher's `networking/membership/raft/mod.rs` draws
//! between the consensus engine and its wire layer.

use async_trait::async_trait;

use crate::common::NodeId;
use crate::error::Result;
use crate::raft::types::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};

/// Sends Raft RPCs to a named peer. Implementations own retry policy and
/// connection management; the engine only sees `Result` and applies
/// `rpc_timeout` (spec.md §6) at the call site.
#[async_trait]
pub trait RaftRpcClient: Send + Sync {
    async fn request_vote(&self, peer: &NodeId, request: VoteRequest) -> Result<VoteResponse>;

    async fn append_entries(
        &self,
        peer: &NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;

    async fn install_snapshot(
        &self,
        peer: &NodeId,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse>;
}
