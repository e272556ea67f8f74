//! Raft consensus engine (spec.md §4.1-§4.5, §9).

pub mod config;
pub mod election;
pub mod log_store;
pub mod node;
pub mod persistent_state;
pub mod proposal;
pub mod replication;
pub mod role;
pub mod rpc;
pub mod snapshot;
pub mod state_machine;
pub mod types;

pub use config::{PeerAddr, RaftConfig};
pub use node::RaftNode;
pub use role::Role;
pub use rpc::RaftRpcClient;
pub use state_machine::{InMemoryStateMachine, StateMachine};
