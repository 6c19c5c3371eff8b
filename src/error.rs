//! Error types for the rebalancing core.

use crate::types::{NodeId, PartitionId};
use thiserror::Error;

/// Result type alias for rebalancing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the rebalancing core.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport errors while exchanging demand/supply messages.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An entry was routed to a partition this node no longer hosts.
    #[error("invalid partition: {0}")]
    InvalidPartition(PartitionId),

    /// Local store rejected an entry.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Transport layer errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer is no longer part of the cluster topology.
    #[error("node left cluster: {0}")]
    NodeLeft(NodeId),

    /// Failed to send a message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Send did not complete within the configured timeout.
    #[error("send timed out")]
    Timeout,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Whether this error means the peer is gone from the topology
    /// (as opposed to a transient send problem).
    pub fn is_node_left(&self) -> bool {
        matches!(self, TransportError::NodeLeft(_))
    }
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Transport(TransportError::Serialization(e.to_string()))
    }
}
