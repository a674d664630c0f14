//! Typed error taxonomy at the hard interface boundaries named in the
//! error-handling design: queue admission, shard-manager spawn, and the
//! limits enforcer. Everything else in this crate uses `anyhow::Result`,
//! matching the teacher's pervasive use of `anyhow` in shard/engine code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue full: {0}")]
    Full(String),
    #[error("queue stopped")]
    Stopped,
    #[error("queue timeout")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum ShardManagerError {
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("no factory registered for type '{0}' (and no researcher/base-agent fallback)")]
    NoFactory(String),
    #[error("shard '{0}' panicked: {1}")]
    Panicked(String, String),
}

#[derive(Error, Debug)]
pub enum LimitsError {
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}
