//! raftkit - a Raft consensus engine, transactional outbox dispatcher, and
//! sharded persistent Bloom filter.

pub mod bloom;
pub mod common;
pub mod error;
pub mod outbox;
pub mod raft;

pub use error::{Error, Result};

/// Library-wide logging setup, grounded in the teacher's `tracing_subscriber`
/// initialization in its binary entry points.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
