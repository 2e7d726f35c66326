//! Representations: the per-dataset render units
//!
//! Representations are created and owned by the external pipeline layer;
//! the view holds them in its collection and refers to them by index. The
//! frame coordinator only ever mutates them through `update()`, never
//! through the compositing logic, so a compositing decision can never
//! trigger a pipeline re-execution.

use std::collections::HashMap;

use crate::error::RepresentationError;
use crate::types::{Bounds, DataKind};

/// A per-dataset render unit.
pub trait Representation {
    /// Human-readable name, used in log messages
    fn name(&self) -> &str;

    /// Id of the prop this representation renders into
    fn prop_id(&self) -> u32;

    /// Id of the upstream pipeline filter that produces the data
    fn source_id(&self) -> u32;

    /// Whether the representation is drawn at all
    fn is_visible(&self) -> bool;

    /// Whether the representation participates in picking
    fn is_pickable(&self) -> bool;

    /// Kind of dataset displayed
    fn data_kind(&self) -> DataKind;

    /// World-space bounds of the displayed data
    fn bounds(&self) -> Bounds;

    /// Number of cells in the displayed data
    fn cell_count(&self) -> u64;

    /// Size in bytes of what would be drawn.
    ///
    /// `full_resolution` selects the full-fidelity size (still renders);
    /// otherwise the currently displayed, possibly LOD-reduced size is
    /// reported (interactive renders).
    fn displayed_size_bytes(&self, full_resolution: bool) -> u64;

    /// True when the representation has translucent geometry split across
    /// processes and therefore needs ordered compositing
    fn needs_ordered_compositing(&self) -> bool;

    /// Re-execute the upstream pipeline if it is out of date.
    ///
    /// An upstream producer with zero output parts reports
    /// [`RepresentationError::EmptyOutput`]; the coordinator then skips the
    /// representation for the frame instead of failing the render.
    fn update(&mut self) -> Result<(), RepresentationError>;
}

/// Read access to the cells a data process holds for one representation.
///
/// This is the seam the non-pixel selection queries extract against: each
/// data-holding process evaluates the query over its local cells only.
pub trait CellSource {
    /// Number of local cells
    fn source_cell_count(&self) -> u64;

    /// World-space position of a cell (its representative point)
    fn cell_position(&self, index: u64) -> Option<[f64; 3]>;

    /// Value of a named field at a cell
    fn field_value(&self, field: &str, index: u64) -> Option<f64>;
}

/// An in-memory point-set representation.
///
/// This is the concrete representation data processes hold in tests and
/// single-machine runs: a point per cell plus named scalar fields. Real
/// deployments put their own pipeline-backed implementations behind the
/// [`Representation`] trait.
pub struct PointsRepresentation {
    name: String,
    prop_id: u32,
    source_id: u32,
    kind: DataKind,
    visible: bool,
    pickable: bool,
    translucent: bool,
    points: Vec<[f64; 3]>,
    fields: HashMap<String, Vec<f64>>,
    full_size_bytes: u64,
    lod_size_bytes: u64,
}

impl PointsRepresentation {
    /// Bytes a point occupies at full resolution (position + color + normal)
    const BYTES_PER_POINT: u64 = 36;

    /// Create a representation over a set of points
    pub fn new(name: impl Into<String>, prop_id: u32, source_id: u32, points: Vec<[f64; 3]>) -> Self {
        let full = points.len() as u64 * Self::BYTES_PER_POINT;
        Self {
            name: name.into(),
            prop_id,
            source_id,
            kind: DataKind::Unstructured,
            visible: true,
            pickable: true,
            translucent: false,
            points,
            fields: HashMap::new(),
            full_size_bytes: full,
            lod_size_bytes: full / 10,
        }
    }

    /// Set the dataset kind
    pub fn with_kind(mut self, kind: DataKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach a named scalar field (one value per point)
    pub fn with_field(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.fields.insert(name.into(), values);
        self
    }

    /// Mark the representation translucent (needs ordered compositing)
    pub fn with_translucency(mut self) -> Self {
        self.translucent = true;
        self
    }

    /// Override the reported displayed sizes
    pub fn with_displayed_sizes(mut self, full: u64, lod: u64) -> Self {
        self.full_size_bytes = full;
        self.lod_size_bytes = lod;
        self
    }

    /// Change visibility
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Change pickability
    pub fn set_pickable(&mut self, pickable: bool) {
        self.pickable = pickable;
    }

    /// The points backing this representation
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }
}

impl Representation for PointsRepresentation {
    fn name(&self) -> &str {
        &self.name
    }

    fn prop_id(&self) -> u32 {
        self.prop_id
    }

    fn source_id(&self) -> u32 {
        self.source_id
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn is_pickable(&self) -> bool {
        self.pickable
    }

    fn data_kind(&self) -> DataKind {
        self.kind
    }

    fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::empty();
        for &p in &self.points {
            bounds.expand_to_include(p);
        }
        bounds
    }

    fn cell_count(&self) -> u64 {
        self.points.len() as u64
    }

    fn displayed_size_bytes(&self, full_resolution: bool) -> u64 {
        if full_resolution {
            self.full_size_bytes
        } else {
            self.lod_size_bytes
        }
    }

    fn needs_ordered_compositing(&self) -> bool {
        self.translucent
    }

    fn update(&mut self) -> Result<(), RepresentationError> {
        if self.points.is_empty() {
            return Err(RepresentationError::EmptyOutput {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl CellSource for PointsRepresentation {
    fn source_cell_count(&self) -> u64 {
        self.points.len() as u64
    }

    fn cell_position(&self, index: u64) -> Option<[f64; 3]> {
        self.points.get(index as usize).copied()
    }

    fn field_value(&self, field: &str, index: u64) -> Option<f64> {
        self.fields.get(field)?.get(index as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PointsRepresentation {
        PointsRepresentation::new(
            "sample",
            1,
            10,
            vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [-1.0, 0.5, 0.0]],
        )
        .with_field("density", vec![1.0, 2.0, 3.0])
    }

    #[test]
    fn test_bounds_cover_all_points() {
        let rep = sample();
        let bounds = rep.bounds();
        assert_eq!(bounds.min, [-1.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_update_fails_on_empty_output() {
        let mut rep = PointsRepresentation::new("empty", 2, 20, Vec::new());
        let err = rep.update().unwrap_err();
        assert!(matches!(err, RepresentationError::EmptyOutput { .. }));
    }

    #[test]
    fn test_displayed_size_tracks_resolution() {
        let rep = sample().with_displayed_sizes(1000, 100);
        assert_eq!(rep.displayed_size_bytes(true), 1000);
        assert_eq!(rep.displayed_size_bytes(false), 100);
    }

    #[test]
    fn test_cell_source_access() {
        let rep = sample();
        assert_eq!(rep.source_cell_count(), 3);
        assert_eq!(rep.cell_position(1), Some([1.0, 2.0, 3.0]));
        assert_eq!(rep.field_value("density", 2), Some(3.0));
        assert_eq!(rep.field_value("missing", 0), None);
        assert_eq!(rep.cell_position(5), None);
    }

    #[test]
    fn test_translucency_flags_ordered_compositing() {
        let rep = sample();
        assert!(!rep.needs_ordered_compositing());
        let rep = sample().with_translucency();
        assert!(rep.needs_ordered_compositing());
    }
}
