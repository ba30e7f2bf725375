use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvlogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event decoding error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An event cannot be stored: payload over the 16-bit size limit, a record
    /// that can never fit a buffer, or no free buffer slots.
    #[error("Resource exhausted: {0}")]
    ResourceExhaustion(String),

    /// A second deferred buffer generation was requested while the first one
    /// still had open events.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A thread handle was torn down while one of its buffers still had open
    /// events.
    #[error("Invariant breach: {0}")]
    InvariantBreach(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EvlogError>;

impl From<serde_json::Error> for EvlogError {
    fn from(err: serde_json::Error) -> Self {
        EvlogError::Serialization(err.to_string())
    }
}
