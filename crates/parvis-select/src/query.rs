//! Typed non-pixel selection queries
//!
//! Frustum, id, point and threshold selections do not depend on what is
//! rasterized, so no multi-pass encoding is needed: the query is serialized,
//! shipped to every data-holding process, extracted there against the
//! visible, pickable representations, and the per-process lists are merged
//! by the initiator.

use serde::{Deserialize, Serialize};

use parvis_core::{Bounds, CellSource, Representation};
use parvis_transport::ProcessRank;

use crate::selection::{SelectionContent, SelectionNode};

/// Command data processes answer with their local extraction result
pub const EXTRACT_COMMAND: &str = "select.extract";

/// An oriented plane in Hessian normal form; positive side is "inside".
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    /// Plane normal, pointing inside
    pub normal: [f64; 3],

    /// Offset such that `normal . p + offset >= 0` for inside points
    pub offset: f64,
}

impl Plane {
    /// Create a plane from its normal and a point on it
    pub fn from_point_normal(point: [f64; 3], normal: [f64; 3]) -> Self {
        let offset =
            -(normal[0] * point[0] + normal[1] * point[1] + normal[2] * point[2]);
        Self { normal, offset }
    }

    /// Signed distance of a point, positive inside
    pub fn signed_distance(&self, point: [f64; 3]) -> f64 {
        self.normal[0] * point[0]
            + self.normal[1] * point[1]
            + self.normal[2] * point[2]
            + self.offset
    }
}

/// A selection frustum: six inward-facing planes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// The axis-aligned frustum enclosing a box (used when a screen
    /// rectangle is unprojected into world space by the caller)
    pub fn from_bounds(bounds: &Bounds) -> Self {
        Self {
            planes: [
                Plane::from_point_normal([bounds.min[0], 0.0, 0.0], [1.0, 0.0, 0.0]),
                Plane::from_point_normal([bounds.max[0], 0.0, 0.0], [-1.0, 0.0, 0.0]),
                Plane::from_point_normal([0.0, bounds.min[1], 0.0], [0.0, 1.0, 0.0]),
                Plane::from_point_normal([0.0, bounds.max[1], 0.0], [0.0, -1.0, 0.0]),
                Plane::from_point_normal([0.0, 0.0, bounds.min[2]], [0.0, 0.0, 1.0]),
                Plane::from_point_normal([0.0, 0.0, bounds.max[2]], [0.0, 0.0, -1.0]),
            ],
        }
    }

    /// Test whether a point lies inside all six planes
    pub fn contains(&self, point: [f64; 3]) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }
}

/// A typed selection criterion, serialized to every data-holding process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SelectionQuery {
    /// Cells inside a world-space frustum
    Frustum(Frustum),

    /// Cells with the given local ids
    CellIds { ids: Vec<u64> },

    /// Cells within `radius` of any of the given points
    Points {
        points: Vec<[f64; 3]>,
        radius: f64,
    },

    /// Cells whose field value falls inside any of the given ranges
    Thresholds {
        field: String,
        ranges: Vec<(f64, f64)>,
    },
}

/// Extract a query against the representations one process holds.
///
/// Only visible, pickable representations participate; representations
/// with no matches contribute no node.
pub fn extract_local<R>(
    rank: ProcessRank,
    query: &SelectionQuery,
    representations: &[R],
) -> Vec<SelectionNode>
where
    R: Representation + CellSource,
{
    let mut nodes = Vec::new();
    for rep in representations {
        if !rep.is_visible() || !rep.is_pickable() {
            continue;
        }
        let content = extract_representation(query, rep);
        if !content.is_empty() {
            nodes.push(SelectionNode::new(
                rank,
                rep.prop_id(),
                rep.source_id(),
                content,
            ));
        }
    }
    nodes
}

fn extract_representation<R>(query: &SelectionQuery, rep: &R) -> SelectionContent
where
    R: Representation + CellSource,
{
    let cell_count = rep.source_cell_count();
    match query {
        SelectionQuery::Frustum(frustum) => {
            let ids = (0..cell_count)
                .filter(|&id| {
                    rep.cell_position(id)
                        .is_some_and(|p| frustum.contains(p))
                })
                .collect();
            SelectionContent::Frustum { ids }
        }

        SelectionQuery::CellIds { ids } => {
            let mut matched: Vec<u64> =
                ids.iter().copied().filter(|&id| id < cell_count).collect();
            matched.sort_unstable();
            matched.dedup();
            SelectionContent::CellIds { ids: matched }
        }

        SelectionQuery::Points { points, radius } => {
            let radius_sq = radius * radius;
            let mut ids = Vec::new();
            let mut positions = Vec::new();
            for id in 0..cell_count {
                let Some(position) = rep.cell_position(id) else {
                    continue;
                };
                let near = points.iter().any(|q| {
                    let dx = position[0] - q[0];
                    let dy = position[1] - q[1];
                    let dz = position[2] - q[2];
                    dx * dx + dy * dy + dz * dz <= radius_sq
                });
                if near {
                    ids.push(id);
                    positions.push(position);
                }
            }
            SelectionContent::Points { ids, positions }
        }

        SelectionQuery::Thresholds { field, ranges } => {
            let ids = (0..cell_count)
                .filter(|&id| {
                    rep.field_value(field, id).is_some_and(|value| {
                        ranges.iter().any(|&(lo, hi)| value >= lo && value <= hi)
                    })
                })
                .collect();
            SelectionContent::Thresholds { ids }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parvis_core::PointsRepresentation;

    fn process_reps() -> Vec<PointsRepresentation> {
        vec![
            PointsRepresentation::new(
                "gas",
                1,
                10,
                vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [5.0, 5.0, 5.0]],
            )
            .with_field("temperature", vec![10.0, 20.0, 30.0]),
            PointsRepresentation::new("halo", 2, 20, vec![[0.5, 0.5, 0.5]])
                .with_field("temperature", vec![15.0]),
        ]
    }

    #[test]
    fn test_frustum_extraction() {
        let reps = process_reps();
        let frustum = Frustum::from_bounds(&Bounds::new([-1.0; 3], [2.0; 3]));
        let nodes = extract_local(1, &SelectionQuery::Frustum(frustum), &reps);

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].prop_id, 1);
        assert_eq!(nodes[0].content.ids(), &[0, 1]);
        assert_eq!(nodes[1].prop_id, 2);
        assert_eq!(nodes[1].content.ids(), &[0]);
    }

    #[test]
    fn test_cell_id_extraction_clips_to_local_cells() {
        let reps = process_reps();
        let query = SelectionQuery::CellIds {
            ids: vec![2, 2, 0, 99],
        };
        let nodes = extract_local(1, &query, &reps);

        // 99 exists nowhere; the one-point rep only matches id 0.
        assert_eq!(nodes[0].content.ids(), &[0, 2]);
        assert_eq!(nodes[1].content.ids(), &[0]);
    }

    #[test]
    fn test_point_extraction_returns_positions() {
        let reps = process_reps();
        let query = SelectionQuery::Points {
            points: vec![[1.0, 1.0, 1.0]],
            radius: 1.0,
        };
        let nodes = extract_local(1, &query, &reps);

        assert_eq!(nodes.len(), 2);
        match &nodes[1].content {
            SelectionContent::Points { ids, positions } => {
                assert_eq!(ids, &[0]);
                assert_eq!(positions, &[[0.5, 0.5, 0.5]]);
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_threshold_extraction() {
        let reps = process_reps();
        let query = SelectionQuery::Thresholds {
            field: "temperature".to_string(),
            ranges: vec![(12.0, 22.0)],
        };
        let nodes = extract_local(1, &query, &reps);

        assert_eq!(nodes[0].content.ids(), &[1]);
        assert_eq!(nodes[1].content.ids(), &[0]);
    }

    #[test]
    fn test_invisible_and_unpickable_reps_are_excluded() {
        let mut reps = process_reps();
        reps[0].set_visible(false);
        reps[1].set_pickable(false);

        let query = SelectionQuery::CellIds { ids: vec![0] };
        assert!(extract_local(1, &query, &reps).is_empty());
    }

    #[test]
    fn test_unknown_field_matches_nothing() {
        let reps = process_reps();
        let query = SelectionQuery::Thresholds {
            field: "pressure".to_string(),
            ranges: vec![(0.0, 100.0)],
        };
        assert!(extract_local(1, &query, &reps).is_empty());
    }

    #[test]
    fn test_query_roundtrips_through_wire() {
        let query = SelectionQuery::Points {
            points: vec![[1.0, 2.0, 3.0]],
            radius: 0.5,
        };
        let wire = serde_json::to_string(&query).unwrap();
        let decoded: SelectionQuery = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, query);
    }
}
