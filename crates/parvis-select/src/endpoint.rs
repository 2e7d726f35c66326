//! The data-process side of the protocols
//!
//! `DataProcessEndpoint` is what a data-holding process plugs into the
//! transport: it stores the frame-state broadcasts it receives, reports its
//! producer extents and pickable cell counts, answers the consistency
//! barrier from its own stored state, and runs local query extraction.

use serde_json::{json, Value};

use parvis_core::{
    frame_state_checksum, CompositingState, PointsRepresentation, ProducerPiece, Representation,
    COMPOSITING_OBJECT, LOCAL_BOUNDS_COMMAND, PARTITION_OBJECT, STATE_PROPERTY,
    VISITATION_ORDER_PROPERTY,
};
use parvis_transport::{
    ProcessRank, RemoteEndpoint, TransportError, TransportResult, STATE_CHECKSUM_COMMAND,
};

use crate::encode::CellIndexTable;
use crate::pick::{PropCellCount, CELL_COUNTS_COMMAND, INDEX_TABLE_PROPERTY, SELECT_OBJECT};
use crate::query::{extract_local, SelectionQuery, EXTRACT_COMMAND};

/// One data-holding process's protocol endpoint.
pub struct DataProcessEndpoint {
    rank: ProcessRank,
    representations: Vec<PointsRepresentation>,
    compositing: Option<CompositingState>,
    visitation_order: Option<Vec<ProcessRank>>,
    index_table: Option<CellIndexTable>,
}

impl DataProcessEndpoint {
    /// Create an endpoint for the given rank
    pub fn new(rank: ProcessRank) -> Self {
        Self {
            rank,
            representations: Vec::new(),
            compositing: None,
            visitation_order: None,
            index_table: None,
        }
    }

    /// Add a locally held representation
    pub fn with_representation(mut self, representation: PointsRepresentation) -> Self {
        self.representations.push(representation);
        self
    }

    /// Rank of this process
    pub fn rank(&self) -> ProcessRank {
        self.rank
    }

    /// The compositing state last broadcast to this process
    pub fn compositing_state(&self) -> Option<&CompositingState> {
        self.compositing.as_ref()
    }

    /// The visitation order last broadcast to this process
    pub fn visitation_order(&self) -> Option<&[ProcessRank]> {
        self.visitation_order.as_deref()
    }

    /// The cell-index table last broadcast to this process
    pub fn index_table(&self) -> Option<&CellIndexTable> {
        self.index_table.as_ref()
    }

    fn producer_pieces(&self) -> Vec<ProducerPiece> {
        self.representations
            .iter()
            .filter(|r| r.is_visible() && r.needs_ordered_compositing())
            .map(|r| ProducerPiece {
                bounds: r.bounds(),
                kind: r.data_kind(),
            })
            .collect()
    }

    fn cell_counts(&self) -> Vec<PropCellCount> {
        self.representations
            .iter()
            .filter(|r| r.is_visible() && r.is_pickable())
            .map(|r| PropCellCount {
                prop_id: r.prop_id(),
                source_id: r.source_id(),
                cell_count: r.cell_count(),
            })
            .collect()
    }
}

impl RemoteEndpoint for DataProcessEndpoint {
    fn set_property(
        &mut self,
        object: &str,
        property: &str,
        value: &Value,
    ) -> TransportResult<()> {
        match (object, property) {
            (COMPOSITING_OBJECT, STATE_PROPERTY) => {
                self.compositing = Some(serde_json::from_value(value.clone())?);
                Ok(())
            }
            (PARTITION_OBJECT, VISITATION_ORDER_PROPERTY) => {
                self.visitation_order = Some(serde_json::from_value(value.clone())?);
                Ok(())
            }
            (SELECT_OBJECT, INDEX_TABLE_PROPERTY) => {
                self.index_table = Some(serde_json::from_value(value.clone())?);
                Ok(())
            }
            _ => Err(TransportError::UnknownObject {
                object: format!("{object}.{property}"),
            }),
        }
    }

    fn invoke(&mut self, command: &str, args: &Value) -> TransportResult<Value> {
        match command {
            LOCAL_BOUNDS_COMMAND => Ok(json!(self.producer_pieces())),
            CELL_COUNTS_COMMAND => Ok(json!(self.cell_counts())),
            STATE_CHECKSUM_COMMAND => {
                let state = self.compositing.clone().unwrap_or_default();
                let checksum = frame_state_checksum(&state, self.visitation_order.as_deref())?;
                Ok(json!(checksum))
            }
            EXTRACT_COMMAND => {
                let query: SelectionQuery = serde_json::from_value(args.clone())?;
                let nodes = extract_local(self.rank, &query, &self.representations);
                Ok(json!(nodes))
            }
            _ => Err(TransportError::UnknownCommand {
                command: command.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parvis_core::{Bounds, DataKind};

    fn endpoint() -> DataProcessEndpoint {
        DataProcessEndpoint::new(1).with_representation(
            PointsRepresentation::new(
                "gas",
                1,
                10,
                vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]],
            )
            .with_kind(DataKind::Poly)
            .with_translucency(),
        )
    }

    #[test]
    fn test_reports_producer_pieces_for_translucent_reps() {
        let mut ep = endpoint();
        let reply = ep.invoke(LOCAL_BOUNDS_COMMAND, &Value::Null).unwrap();
        let pieces: Vec<ProducerPiece> = serde_json::from_value(reply).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].kind, DataKind::Poly);
        assert_eq!(pieces[0].bounds, Bounds::new([0.0; 3], [1.0; 3]));
    }

    #[test]
    fn test_reports_cell_counts() {
        let mut ep = endpoint();
        let reply = ep.invoke(CELL_COUNTS_COMMAND, &Value::Null).unwrap();
        let counts: Vec<PropCellCount> = serde_json::from_value(reply).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].cell_count, 2);
    }

    #[test]
    fn test_stores_broadcast_state_and_answers_checksum() {
        let mut ep = endpoint();
        let state = CompositingState {
            use_compositing: true,
            image_reduction_factor: 2,
            composite_threshold_mb: 20.0,
            last_decision: true,
        };
        ep.set_property(COMPOSITING_OBJECT, STATE_PROPERTY, &json!(state))
            .unwrap();
        ep.set_property(
            PARTITION_OBJECT,
            VISITATION_ORDER_PROPERTY,
            &json!([2, 1]),
        )
        .unwrap();

        assert_eq!(ep.rank(), 1);
        assert_eq!(ep.compositing_state(), Some(&state));
        assert_eq!(ep.visitation_order(), Some([2u32, 1].as_slice()));

        let reply = ep.invoke(STATE_CHECKSUM_COMMAND, &Value::Null).unwrap();
        let expected = frame_state_checksum(&state, Some(&[2, 1])).unwrap();
        assert_eq!(reply.as_u64(), Some(expected));
    }

    #[test]
    fn test_stores_index_table_broadcast() {
        let mut ep = endpoint();
        assert!(ep.index_table().is_none());

        let mut table = CellIndexTable::new();
        table.push(1, 1, 10, 2);
        ep.set_property(SELECT_OBJECT, INDEX_TABLE_PROPERTY, &json!(table))
            .unwrap();
        assert_eq!(ep.index_table(), Some(&table));
    }

    #[test]
    fn test_runs_local_extraction() {
        let mut ep = endpoint();
        let query = SelectionQuery::CellIds { ids: vec![1, 5] };
        let reply = ep.invoke(EXTRACT_COMMAND, &json!(query)).unwrap();
        let nodes: Vec<crate::selection::SelectionNode> =
            serde_json::from_value(reply).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].content.ids(), &[1]);
    }

    #[test]
    fn test_rejects_unknown_traffic() {
        let mut ep = endpoint();
        assert!(ep
            .set_property("view.unknown", "thing", &Value::Null)
            .is_err());
        assert!(ep.invoke("no.such.command", &Value::Null).is_err());
    }
}
