//! Shared identifier types used across the Raft, outbox, and Bloom cores.

/// Cluster-unique node identifier.
pub type NodeId = String;
