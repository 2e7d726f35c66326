//! Frame-state consistency barrier
//!
//! Every process participating in a composited frame must hold the same
//! compositing state and partition visitation order before drawing; a
//! divergent process corrupts the composited image silently. The barrier
//! gathers a checksum of that state from every peer and reports ranks whose
//! checksum disagrees with the initiator's. Divergence is diagnostic, never
//! fatal: the frame still draws, the report is logged.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

use crate::messages::ProcessRank;
use crate::transport::{Transport, TransportResult};

/// Command every endpoint answers with its local frame-state checksum
pub const STATE_CHECKSUM_COMMAND: &str = "frame.state-checksum";

/// Outcome of a barrier round.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsistencyReport {
    /// Checksum the initiating process computed
    pub local_checksum: u64,

    /// Peers whose checksum disagreed, with the value they reported
    pub divergent: Vec<(ProcessRank, u64)>,

    /// Peers that replied with something other than a checksum
    pub unreadable: Vec<ProcessRank>,
}

impl ConsistencyReport {
    /// True when every peer agreed with the local checksum
    pub fn is_consistent(&self) -> bool {
        self.divergent.is_empty() && self.unreadable.is_empty()
    }
}

/// Compute the checksum of any serializable state.
///
/// Hashes the serialized form, so two processes agree iff their state
/// serializes identically. All ranks run the same binary, which keeps the
/// hasher comparable across the cluster.
pub fn state_checksum<T: Serialize>(state: &T) -> TransportResult<u64> {
    let wire = serde_json::to_string(state)?;
    let mut hasher = DefaultHasher::new();
    wire.hash(&mut hasher);
    Ok(hasher.finish())
}

/// Checksum barrier over a transport.
pub struct FrameBarrier;

impl FrameBarrier {
    /// Gather peer checksums and compare them against the local one.
    pub fn verify(
        transport: &mut dyn Transport,
        local_checksum: u64,
    ) -> TransportResult<ConsistencyReport> {
        let replies = transport.invoke(STATE_CHECKSUM_COMMAND, Value::Null)?;

        let mut divergent = Vec::new();
        let mut unreadable = Vec::new();
        for reply in replies {
            match reply.value.as_u64() {
                Some(checksum) if checksum == local_checksum => {}
                Some(checksum) => divergent.push((reply.rank, checksum)),
                None => unreadable.push(reply.rank),
            }
        }

        let report = ConsistencyReport {
            local_checksum,
            divergent,
            unreadable,
        };
        if !report.is_consistent() {
            tracing::warn!(
                local = report.local_checksum,
                divergent = ?report.divergent,
                unreadable = ?report.unreadable,
                "frame state diverged across processes"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackCluster, RemoteEndpoint};
    use crate::transport::TransportError;
    use serde_json::json;

    struct ChecksumEndpoint {
        reply: Value,
    }

    impl RemoteEndpoint for ChecksumEndpoint {
        fn set_property(&mut self, _: &str, _: &str, _: &Value) -> TransportResult<()> {
            Ok(())
        }

        fn invoke(&mut self, command: &str, _: &Value) -> TransportResult<Value> {
            if command == STATE_CHECKSUM_COMMAND {
                Ok(self.reply.clone())
            } else {
                Err(TransportError::UnknownCommand {
                    command: command.to_string(),
                })
            }
        }
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let a = state_checksum(&("state", vec![1u32, 2, 3])).unwrap();
        let b = state_checksum(&("state", vec![1u32, 2, 3])).unwrap();
        assert_eq!(a, b);

        let c = state_checksum(&("state", vec![3u32, 2, 1])).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_consistent_cluster() {
        let local = state_checksum(&"frame").unwrap();
        let mut cluster = LoopbackCluster::new(0);
        cluster.register_endpoint(
            1,
            Box::new(ChecksumEndpoint {
                reply: json!(local),
            }),
        );
        cluster.register_endpoint(
            2,
            Box::new(ChecksumEndpoint {
                reply: json!(local),
            }),
        );

        let report = FrameBarrier::verify(&mut cluster, local).unwrap();
        assert!(report.is_consistent());
    }

    #[test]
    fn test_divergent_rank_reported() {
        let local = state_checksum(&"frame").unwrap();
        let mut cluster = LoopbackCluster::new(0);
        cluster.register_endpoint(
            1,
            Box::new(ChecksumEndpoint {
                reply: json!(local),
            }),
        );
        cluster.register_endpoint(
            2,
            Box::new(ChecksumEndpoint {
                reply: json!(local.wrapping_add(1)),
            }),
        );

        let report = FrameBarrier::verify(&mut cluster, local).unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.divergent.len(), 1);
        assert_eq!(report.divergent[0].0, 2);
    }

    #[test]
    fn test_unreadable_reply_reported() {
        let local = state_checksum(&"frame").unwrap();
        let mut cluster = LoopbackCluster::new(0);
        cluster.register_endpoint(
            1,
            Box::new(ChecksumEndpoint {
                reply: json!("not a checksum"),
            }),
        );

        let report = FrameBarrier::verify(&mut cluster, local).unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.unreadable, vec![1]);
    }

    #[test]
    fn test_empty_cluster_is_consistent() {
        let local = state_checksum(&"frame").unwrap();
        let mut cluster = LoopbackCluster::new(0);
        let report = FrameBarrier::verify(&mut cluster, local).unwrap();
        assert!(report.is_consistent());
    }
}
