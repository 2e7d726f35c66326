//! Message envelopes exchanged between cluster processes
//!
//! The transport ships two kinds of traffic: property updates pushed to the
//! remote copies of a named object, and command invocations that gather one
//! reply per process. Payloads are opaque JSON values; typed layers above
//! serialize their own state into them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rank of a process within the cluster. Rank 0 is conventionally the client.
pub type ProcessRank = u32;

/// A property update destined for the remote copies of a named object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyUpdate {
    /// Name of the remote object the property belongs to
    pub object: String,

    /// Property name
    pub property: String,

    /// Serialized property value
    pub value: Value,
}

impl PropertyUpdate {
    /// Create a new property update
    pub fn new(object: impl Into<String>, property: impl Into<String>, value: Value) -> Self {
        Self {
            object: object.into(),
            property: property.into(),
            value,
        }
    }
}

/// A command invocation shipped to every process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandInvocation {
    /// Command name, e.g. `select.extract`
    pub command: String,

    /// Serialized command arguments
    pub args: Value,
}

impl CommandInvocation {
    /// Create a new command invocation
    pub fn new(command: impl Into<String>, args: Value) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

/// One process's reply to a command invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    /// Rank of the replying process
    pub rank: ProcessRank,

    /// Serialized reply value
    pub value: Value,
}

impl CommandReply {
    /// Create a new command reply
    pub fn new(rank: ProcessRank, value: Value) -> Self {
        Self { rank, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_update_roundtrip() {
        let update = PropertyUpdate::new("view.compositing", "state", json!({"enabled": true}));
        let wire = serde_json::to_string(&update).unwrap();
        let decoded: PropertyUpdate = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_command_reply_carries_rank() {
        let reply = CommandReply::new(3, json!(42));
        assert_eq!(reply.rank, 3);
        assert_eq!(reply.value, json!(42));
    }
}
