//! In-process loopback cluster
//!
//! `LoopbackCluster` stands in for the real wire: peers are handler objects
//! registered by rank, and every delivery goes through an actual
//! serialize/deserialize round-trip so that state which cannot survive the
//! wire fails here too, not only in production.
//!
//! Delivery order is ascending rank, which keeps broadcasts deterministic:
//! every process observes the same sequence of state changes.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::messages::{CommandInvocation, CommandReply, ProcessRank, PropertyUpdate};
use crate::transport::{Transport, TransportError, TransportResult};

/// Handler for transport traffic arriving at one process.
///
/// Render and data processes implement this to receive property broadcasts
/// and answer command invocations.
pub trait RemoteEndpoint {
    /// Apply a property update to the named local object
    fn set_property(&mut self, object: &str, property: &str, value: &Value)
        -> TransportResult<()>;

    /// Handle a command invocation and produce a reply value
    fn invoke(&mut self, command: &str, args: &Value) -> TransportResult<Value>;
}

/// An in-process cluster of endpoints keyed by rank.
///
/// The local process does not register an endpoint for itself; it is the
/// initiator. A cluster with no registered endpoints is the degenerate
/// single-process configuration and every broadcast trivially succeeds.
pub struct LoopbackCluster {
    local_rank: ProcessRank,
    endpoints: BTreeMap<ProcessRank, Box<dyn RemoteEndpoint>>,
}

impl LoopbackCluster {
    /// Create a cluster with the given local rank and no peers
    pub fn new(local_rank: ProcessRank) -> Self {
        Self {
            local_rank,
            endpoints: BTreeMap::new(),
        }
    }

    /// Register a peer endpoint under its rank.
    ///
    /// Replaces any endpoint previously registered for the rank.
    pub fn register_endpoint(&mut self, rank: ProcessRank, endpoint: Box<dyn RemoteEndpoint>) {
        if rank == self.local_rank {
            tracing::warn!(rank, "refusing to register an endpoint for the local rank");
            return;
        }
        self.endpoints.insert(rank, endpoint);
    }

    /// Remove a peer endpoint, returning it if present
    pub fn remove_endpoint(&mut self, rank: ProcessRank) -> Option<Box<dyn RemoteEndpoint>> {
        self.endpoints.remove(&rank)
    }

    /// Access a registered endpoint, for test assertions
    pub fn endpoint(&self, rank: ProcessRank) -> Option<&dyn RemoteEndpoint> {
        self.endpoints.get(&rank).map(|e| e.as_ref())
    }

    /// Push a message through the same serialization the real wire uses, so
    /// state that cannot survive it fails here too.
    fn roundtrip<T: serde::Serialize + serde::de::DeserializeOwned>(
        message: &T,
    ) -> TransportResult<T> {
        let wire = serde_json::to_string(message)?;
        Ok(serde_json::from_str(&wire)?)
    }
}

impl Transport for LoopbackCluster {
    fn local_rank(&self) -> ProcessRank {
        self.local_rank
    }

    fn ranks(&self) -> Vec<ProcessRank> {
        let mut ranks: Vec<ProcessRank> = self.endpoints.keys().copied().collect();
        ranks.push(self.local_rank);
        ranks.sort_unstable();
        ranks.dedup();
        ranks
    }

    fn push_property(
        &mut self,
        object: &str,
        property: &str,
        value: Value,
    ) -> TransportResult<()> {
        let update = Self::roundtrip(&PropertyUpdate::new(object, property, value))?;
        for (&rank, endpoint) in self.endpoints.iter_mut() {
            endpoint
                .set_property(&update.object, &update.property, &update.value)
                .map_err(|err| TransportError::RemoteFailure {
                    rank,
                    operation: format!("push_property {object}.{property}"),
                    message: err.to_string(),
                })?;
        }
        tracing::debug!(object, property, peers = self.endpoints.len(), "property broadcast");
        Ok(())
    }

    fn invoke(&mut self, command: &str, args: Value) -> TransportResult<Vec<CommandReply>> {
        let invocation = Self::roundtrip(&CommandInvocation::new(command, args))?;
        let mut replies = Vec::with_capacity(self.endpoints.len());
        for (&rank, endpoint) in self.endpoints.iter_mut() {
            let value = endpoint
                .invoke(&invocation.command, &invocation.args)
                .map_err(|err| TransportError::RemoteFailure {
                    rank,
                    operation: format!("invoke {command}"),
                    message: err.to_string(),
                })?;
            replies.push(Self::roundtrip(&CommandReply::new(rank, value))?);
        }
        Ok(replies)
    }

    fn invoke_on(
        &mut self,
        rank: ProcessRank,
        command: &str,
        args: Value,
    ) -> TransportResult<Value> {
        let invocation = Self::roundtrip(&CommandInvocation::new(command, args))?;
        let endpoint = self
            .endpoints
            .get_mut(&rank)
            .ok_or(TransportError::UnknownRank { rank })?;
        let value = endpoint
            .invoke(&invocation.command, &invocation.args)
            .map_err(|err| TransportError::RemoteFailure {
                rank,
                operation: format!("invoke {command}"),
                message: err.to_string(),
            })?;
        Self::roundtrip(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Endpoint that records everything it receives and echoes invocations
    #[derive(Default)]
    struct RecordingEndpoint {
        properties: Vec<(String, String, Value)>,
        fail_next: bool,
    }

    impl RemoteEndpoint for RecordingEndpoint {
        fn set_property(
            &mut self,
            object: &str,
            property: &str,
            value: &Value,
        ) -> TransportResult<()> {
            if self.fail_next {
                return Err(TransportError::UnknownObject {
                    object: object.to_string(),
                });
            }
            self.properties
                .push((object.to_string(), property.to_string(), value.clone()));
            Ok(())
        }

        fn invoke(&mut self, command: &str, args: &Value) -> TransportResult<Value> {
            Ok(json!({"command": command, "args": args}))
        }
    }

    #[test]
    fn test_single_process_cluster() {
        let mut cluster = LoopbackCluster::new(0);
        assert_eq!(cluster.ranks(), vec![0]);
        assert_eq!(cluster.peer_count(), 0);

        // Broadcasts into an empty cluster trivially succeed.
        assert!(cluster
            .push_property("view.compositing", "state", json!(true))
            .is_ok());
        assert!(cluster.invoke("noop", Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_reaches_all_peers_in_rank_order() {
        let mut cluster = LoopbackCluster::new(0);
        cluster.register_endpoint(2, Box::<RecordingEndpoint>::default());
        cluster.register_endpoint(1, Box::<RecordingEndpoint>::default());

        cluster
            .push_property("view.compositing", "state", json!({"factor": 2}))
            .unwrap();

        let replies = cluster.invoke("echo", json!([1, 2, 3])).unwrap();
        let ranks: Vec<ProcessRank> = replies.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2]);
    }

    #[test]
    fn test_broadcast_survives_wire_roundtrip() {
        let mut cluster = LoopbackCluster::new(0);
        cluster.register_endpoint(1, Box::<RecordingEndpoint>::default());

        cluster
            .push_property("view.partition", "visitation-order", json!([2, 1, 0]))
            .unwrap();

        let reply = cluster
            .invoke_on(1, "echo", json!({"nested": [1.5, 2.5]}))
            .unwrap();
        assert_eq!(reply["args"]["nested"], json!([1.5, 2.5]));
    }

    #[test]
    fn test_failing_peer_aborts_broadcast() {
        let mut cluster = LoopbackCluster::new(0);
        cluster.register_endpoint(
            1,
            Box::new(RecordingEndpoint {
                fail_next: true,
                ..Default::default()
            }),
        );

        let err = cluster
            .push_property("view.compositing", "state", json!(1))
            .unwrap_err();
        assert!(matches!(err, TransportError::RemoteFailure { rank: 1, .. }));
    }

    #[test]
    fn test_invoke_on_unknown_rank() {
        let mut cluster = LoopbackCluster::new(0);
        let err = cluster.invoke_on(7, "echo", Value::Null).unwrap_err();
        assert!(matches!(err, TransportError::UnknownRank { rank: 7 }));
    }

    #[test]
    fn test_local_rank_not_registrable() {
        let mut cluster = LoopbackCluster::new(0);
        cluster.register_endpoint(0, Box::<RecordingEndpoint>::default());
        assert_eq!(cluster.ranks(), vec![0]);
        assert_eq!(cluster.peer_count(), 0);
    }
}
