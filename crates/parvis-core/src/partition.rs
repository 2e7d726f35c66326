//! Spatial partition manager
//!
//! Builds a binary k-d decomposition over the union of all distributed data
//! extents that need ordered compositing, and derives from it, for any view
//! direction, the back-to-front process order the compositing transport
//! blends partial images in.
//!
//! The partition is rebuilt when the producer set changes, when data is
//! invalidated, or when the process count changes. When a frame renders
//! locally or ordered compositing is off, the partition is discarded rather
//! than reused: a stale order is worse than none.

use serde::{Deserialize, Serialize};

use parvis_transport::ProcessRank;

use crate::error::{PartitionError, PartitionResult};
use crate::types::{Bounds, DataKind};

/// Remote object the visitation order is broadcast to
pub const PARTITION_OBJECT: &str = "view.partition";

/// Property name the visitation order travels under
pub const VISITATION_ORDER_PROPERTY: &str = "visitation-order";

/// Command data processes answer with their local producer extents
pub const LOCAL_BOUNDS_COMMAND: &str = "partition.local-bounds";

/// One process's piece of a distributed dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataProducer {
    /// Rank of the process holding this piece
    pub rank: ProcessRank,

    /// World-space extent of the piece
    pub bounds: Bounds,

    /// Dataset kind, selecting the split strategy
    pub kind: DataKind,
}

impl DataProducer {
    /// Create a producer piece
    pub fn new(rank: ProcessRank, bounds: Bounds, kind: DataKind) -> Self {
        Self { rank, bounds, kind }
    }
}

/// The extent one process reports for one of its ordered-compositing
/// representations, in reply to [`LOCAL_BOUNDS_COMMAND`]. The gathering
/// client tags it with the replying rank to form a [`DataProducer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProducerPiece {
    /// World-space extent of the local piece
    pub bounds: Bounds,

    /// Dataset kind of the piece
    pub kind: DataKind,
}

/// Configuration for partition construction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Maximum tree depth (default: 8)
    pub max_depth: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { max_depth: 8 }
    }
}

/// A node in the k-d partition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum KdNode {
    Leaf {
        bounds: Bounds,
        /// Ranks owning data in this region, ascending
        ranks: Vec<ProcessRank>,
    },
    Split {
        axis: usize,
        coordinate: f64,
        low: Box<KdNode>,
        high: Box<KdNode>,
    },
}

/// The spatial partition manager.
pub struct PartitionManager {
    config: PartitionConfig,
    structured: Vec<DataProducer>,
    unstructured: Vec<DataProducer>,
    root: Option<KdNode>,
    dirty: bool,
    process_count: usize,
}

impl PartitionManager {
    /// Create a manager with the given configuration
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            config,
            structured: Vec::new(),
            unstructured: Vec::new(),
            root: None,
            dirty: true,
            process_count: 0,
        }
    }

    /// Register a structured-grid producer piece.
    ///
    /// Structured and unstructured producers go through distinct slots
    /// because their split strategies differ (regular bisection vs. median
    /// of piece centers).
    pub fn register_structured(&mut self, producer: DataProducer) -> PartitionResult<()> {
        if producer.kind != DataKind::Structured {
            return Err(PartitionError::WrongSlot {
                kind: producer.kind.as_str(),
                slot: "structured",
            });
        }
        self.structured.push(producer);
        self.dirty = true;
        Ok(())
    }

    /// Register an unstructured or polygonal producer piece
    pub fn register_unstructured(&mut self, producer: DataProducer) -> PartitionResult<()> {
        if producer.kind == DataKind::Structured {
            return Err(PartitionError::WrongSlot {
                kind: producer.kind.as_str(),
                slot: "unstructured",
            });
        }
        self.unstructured.push(producer);
        self.dirty = true;
        Ok(())
    }

    /// Drop all registered producers
    pub fn clear_producers(&mut self) {
        self.structured.clear();
        self.unstructured.clear();
        self.dirty = true;
    }

    /// Mark the partition stale (producer data was invalidated)
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Record the cluster process count; a change invalidates the partition
    pub fn set_process_count(&mut self, count: usize) {
        if count != self.process_count {
            self.process_count = count;
            self.dirty = true;
        }
    }

    /// Whether a rebuild is pending
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a partition is currently available
    pub fn has_partition(&self) -> bool {
        self.root.is_some()
    }

    /// Replace the producer set with a freshly gathered one and rebuild if
    /// anything changed.
    ///
    /// Returns whether a rebuild happened. An unchanged producer set with a
    /// clean partition is left alone, which keeps the visitation order
    /// stable across frames.
    pub fn sync_producers(&mut self, producers: Vec<DataProducer>) -> PartitionResult<bool> {
        let mut structured = Vec::new();
        let mut unstructured = Vec::new();
        for producer in producers {
            match producer.kind {
                DataKind::Structured => structured.push(producer),
                DataKind::Unstructured | DataKind::Poly => unstructured.push(producer),
            }
        }

        let unchanged = structured == self.structured && unstructured == self.unstructured;
        if unchanged && !self.dirty && self.root.is_some() {
            return Ok(false);
        }

        self.structured = structured;
        self.unstructured = unstructured;
        self.rebuild()?;
        Ok(true)
    }

    /// Rebuild the partition from the registered producers.
    pub fn rebuild(&mut self) -> PartitionResult<()> {
        let producers: Vec<DataProducer> = self
            .structured
            .iter()
            .chain(self.unstructured.iter())
            .cloned()
            .collect();
        if producers.is_empty() {
            self.root = None;
            return Err(PartitionError::NoProducers);
        }

        let mut union = Bounds::empty();
        for producer in &producers {
            union.expand_to_include_box(&producer.bounds);
        }
        if union.is_degenerate() {
            self.root = None;
            return Err(PartitionError::DegenerateBounds);
        }

        self.root = Some(build_node(union, &producers, 0, self.config.max_depth));
        self.dirty = false;
        tracing::debug!(
            producers = producers.len(),
            leaves = self.leaf_count(),
            "partition rebuilt"
        );
        Ok(())
    }

    /// Discard the partition; a frame that renders locally must not reuse a
    /// previously computed order.
    pub fn discard(&mut self) {
        if self.root.take().is_some() {
            self.dirty = true;
            tracing::debug!("partition discarded");
        }
    }

    /// Derive the back-to-front process order for a view direction.
    ///
    /// Deterministic for an unchanged partition and direction; a process
    /// owning several regions keeps its farthest occurrence.
    pub fn visitation_order(&self, view_direction: [f64; 3]) -> PartitionResult<Vec<ProcessRank>> {
        let root = self.root.as_ref().ok_or(PartitionError::NotBuilt)?;

        let mut order = Vec::new();
        visit_back_to_front(root, view_direction, &mut order);

        let mut seen = Vec::new();
        order.retain(|rank| {
            if seen.contains(rank) {
                false
            } else {
                seen.push(*rank);
                true
            }
        });
        Ok(order)
    }

    /// Ranks owning the region containing a point
    pub fn ranks_for_point(&self, point: [f64; 3]) -> Vec<ProcessRank> {
        let mut node = match &self.root {
            Some(root) => root,
            None => return Vec::new(),
        };
        loop {
            match node {
                KdNode::Leaf { bounds, ranks } => {
                    return if bounds.contains_point(point) {
                        ranks.clone()
                    } else {
                        Vec::new()
                    };
                }
                KdNode::Split {
                    axis,
                    coordinate,
                    low,
                    high,
                } => {
                    node = if point[*axis] < *coordinate { low } else { high };
                }
            }
        }
    }

    /// Number of leaves in the current partition
    pub fn leaf_count(&self) -> usize {
        fn count(node: &KdNode) -> usize {
            match node {
                KdNode::Leaf { .. } => 1,
                KdNode::Split { low, high, .. } => count(low) + count(high),
            }
        }
        self.root.as_ref().map_or(0, count)
    }
}

impl Default for PartitionManager {
    fn default() -> Self {
        Self::new(PartitionConfig::default())
    }
}

fn rank_set(producers: &[&DataProducer]) -> Vec<ProcessRank> {
    let mut ranks: Vec<ProcessRank> = producers.iter().map(|p| p.rank).collect();
    ranks.sort_unstable();
    ranks.dedup();
    ranks
}

/// Half-open overlap test: pieces touching a region only at a face belong to
/// the neighbor, so a split along a shared boundary separates them cleanly.
/// Axes with zero extent (flat datasets) fall back to inclusive containment.
fn producer_overlaps(piece: &Bounds, region: &Bounds) -> bool {
    (0..3).all(|i| {
        if piece.min[i] == piece.max[i] {
            piece.min[i] >= region.min[i] && piece.min[i] <= region.max[i]
        } else {
            piece.min[i] < region.max[i] && piece.max[i] > region.min[i]
        }
    })
}

fn build_node(
    bounds: Bounds,
    producers: &[DataProducer],
    depth: usize,
    max_depth: usize,
) -> KdNode {
    let relevant: Vec<&DataProducer> = producers
        .iter()
        .filter(|p| producer_overlaps(&p.bounds, &bounds))
        .collect();
    let ranks = rank_set(&relevant);

    if relevant.len() <= 1 || ranks.len() <= 1 || depth >= max_depth {
        return KdNode::Leaf { bounds, ranks };
    }

    let axis = bounds.longest_axis();
    let coordinate = split_coordinate(&bounds, &relevant, axis);
    if coordinate <= bounds.min[axis] || coordinate >= bounds.max[axis] {
        return KdNode::Leaf { bounds, ranks };
    }

    let (low_bounds, high_bounds) = bounds.split_at(axis, coordinate);
    KdNode::Split {
        axis,
        coordinate,
        low: Box::new(build_node(low_bounds, producers, depth + 1, max_depth)),
        high: Box::new(build_node(high_bounds, producers, depth + 1, max_depth)),
    }
}

/// Split strategy table keyed by producer kind: any structured piece forces
/// regular bisection; pure unstructured regions split at the median of
/// piece centers.
fn split_coordinate(bounds: &Bounds, producers: &[&DataProducer], axis: usize) -> f64 {
    let midpoint = (bounds.min[axis] + bounds.max[axis]) / 2.0;
    if producers.iter().any(|p| p.kind == DataKind::Structured) {
        return midpoint;
    }

    let mut centers: Vec<f64> = producers.iter().map(|p| p.bounds.center()[axis]).collect();
    centers.sort_by(|a, b| a.total_cmp(b));
    let median = if centers.len() % 2 == 1 {
        centers[centers.len() / 2]
    } else {
        let upper = centers.len() / 2;
        (centers[upper - 1] + centers[upper]) / 2.0
    };

    if median <= bounds.min[axis] || median >= bounds.max[axis] {
        midpoint
    } else {
        median
    }
}

fn visit_back_to_front(node: &KdNode, direction: [f64; 3], out: &mut Vec<ProcessRank>) {
    match node {
        KdNode::Leaf { ranks, .. } => out.extend_from_slice(ranks),
        KdNode::Split {
            axis, low, high, ..
        } => {
            // Looking toward +axis, the high half is farther from the
            // camera and must composite first.
            if direction[*axis] > 0.0 {
                visit_back_to_front(high, direction, out);
                visit_back_to_front(low, direction, out);
            } else {
                visit_back_to_front(low, direction, out);
                visit_back_to_front(high, direction, out);
            }
        }
    }
}
