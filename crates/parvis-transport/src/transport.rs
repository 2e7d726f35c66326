//! The blocking transport abstraction
//!
//! A `Transport` reaches every process participating in a view. Calls block
//! until all targeted peers have acknowledged; this is what lets the frame
//! coordinator assume that a broadcast state change is visible cluster-wide
//! before the draw call that depends on it.

use serde_json::Value;
use thiserror::Error;

use crate::messages::{CommandReply, ProcessRank};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// No endpoint is registered for the targeted rank
    #[error("no endpoint registered for rank {rank}")]
    UnknownRank { rank: ProcessRank },

    /// A peer failed while handling a broadcast or invocation
    #[error("process {rank} failed during {operation}: {message}")]
    RemoteFailure {
        rank: ProcessRank,
        operation: String,
        message: String,
    },

    /// The remote object named by a property update does not exist
    #[error("unknown remote object: {object}")]
    UnknownObject { object: String },

    /// The invoked command is not handled by the peer
    #[error("unknown remote command: {command}")]
    UnknownCommand { command: String },

    /// Payload serialization failed
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Blocking cluster transport.
///
/// Implementations must deliver in deterministic rank order so that every
/// process observes state changes in the same sequence.
pub trait Transport {
    /// Rank of the process this transport belongs to
    fn local_rank(&self) -> ProcessRank;

    /// All ranks participating in the cluster, ascending, local rank included
    fn ranks(&self) -> Vec<ProcessRank>;

    /// Broadcast a named property value to the remote copies of an object.
    ///
    /// Blocks until every peer has acknowledged. The first failing peer
    /// aborts the broadcast with its error.
    fn push_property(&mut self, object: &str, property: &str, value: Value)
        -> TransportResult<()>;

    /// Invoke a named command on every peer and gather one reply per rank.
    ///
    /// Replies come back ordered by ascending rank. Blocks until all peers
    /// have replied.
    fn invoke(&mut self, command: &str, args: Value) -> TransportResult<Vec<CommandReply>>;

    /// Invoke a named command on a single peer.
    fn invoke_on(&mut self, rank: ProcessRank, command: &str, args: Value)
        -> TransportResult<Value>;

    /// Number of peer processes reachable through this transport.
    fn peer_count(&self) -> usize {
        self.ranks().len().saturating_sub(1)
    }
}
