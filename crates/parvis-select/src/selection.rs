//! The selection data model
//!
//! A selection is a flat tree: one node per (process rank, prop) pair that
//! contributed matches. The content variant records which criterion
//! produced the node; all variants carry the matched local cell ids.
//! Selections are transient: built by one select call, consumed by the
//! caller to resolve back to the originating pipeline objects.

use serde::{Deserialize, Serialize};

use parvis_transport::ProcessRank;

/// Which criterion produced a selection node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Frustum,
    CellIds,
    Points,
    Thresholds,
    Pixel,
}

/// Matched cells plus the criterion that matched them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SelectionContent {
    /// Cells whose position fell inside a view frustum
    Frustum { ids: Vec<u64> },

    /// Cells matched by an explicit id query
    CellIds { ids: Vec<u64> },

    /// Cells within a radius of queried points, with their positions
    Points {
        ids: Vec<u64>,
        positions: Vec<[f64; 3]>,
    },

    /// Cells whose field value fell inside a threshold range
    Thresholds { ids: Vec<u64> },

    /// Cells visible in a picked screen rectangle, with their pixel
    /// coverage in that rectangle
    Pixel { ids: Vec<u64>, pixel_count: u64 },
}

impl SelectionContent {
    /// The criterion tag
    pub fn kind(&self) -> ContentKind {
        match self {
            SelectionContent::Frustum { .. } => ContentKind::Frustum,
            SelectionContent::CellIds { .. } => ContentKind::CellIds,
            SelectionContent::Points { .. } => ContentKind::Points,
            SelectionContent::Thresholds { .. } => ContentKind::Thresholds,
            SelectionContent::Pixel { .. } => ContentKind::Pixel,
        }
    }

    /// The matched local cell ids
    pub fn ids(&self) -> &[u64] {
        match self {
            SelectionContent::Frustum { ids }
            | SelectionContent::CellIds { ids }
            | SelectionContent::Points { ids, .. }
            | SelectionContent::Thresholds { ids }
            | SelectionContent::Pixel { ids, .. } => ids,
        }
    }

    /// Number of matched cells
    pub fn len(&self) -> usize {
        self.ids().len()
    }

    /// True when nothing matched
    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

/// One process's matches for one prop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionNode {
    /// Prop the matched cells render into
    pub prop_id: u32,

    /// Pipeline filter that produced the data
    pub source_id: u32,

    /// Rank of the process holding the cells
    pub process_rank: ProcessRank,

    /// The matches and their criterion
    pub content: SelectionContent,
}

impl SelectionNode {
    /// Create a node
    pub fn new(
        process_rank: ProcessRank,
        prop_id: u32,
        source_id: u32,
        content: SelectionContent,
    ) -> Self {
        Self {
            prop_id,
            source_id,
            process_rank,
            content,
        }
    }
}

/// A merged selection across the cluster.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    children: Vec<SelectionNode>,
}

impl Selection {
    /// The empty selection
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no node matched anything
    pub fn is_empty(&self) -> bool {
        self.children.iter().all(|c| c.content.is_empty())
    }

    /// Number of child nodes
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Append a node
    pub fn push(&mut self, node: SelectionNode) {
        self.children.push(node);
    }

    /// Merge one process's node list into this selection
    pub fn merge(&mut self, nodes: Vec<SelectionNode>) {
        self.children.extend(nodes);
    }

    /// The child nodes
    pub fn nodes(&self) -> &[SelectionNode] {
        &self.children
    }

    /// Find the node for a (rank, prop) pair
    pub fn find(&self, process_rank: ProcessRank, prop_id: u32) -> Option<&SelectionNode> {
        self.children
            .iter()
            .find(|c| c.process_rank == process_rank && c.prop_id == prop_id)
    }

    /// Total matched cells across all nodes
    pub fn total_matches(&self) -> u64 {
        self.children.iter().map(|c| c.content.len() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selection() {
        let selection = Selection::empty();
        assert!(selection.is_empty());
        assert_eq!(selection.len(), 0);
        assert_eq!(selection.total_matches(), 0);
    }

    #[test]
    fn test_merge_and_find() {
        let mut selection = Selection::empty();
        selection.merge(vec![
            SelectionNode::new(1, 7, 70, SelectionContent::CellIds { ids: vec![1, 2] }),
            SelectionNode::new(2, 7, 70, SelectionContent::CellIds { ids: vec![0] }),
        ]);

        assert_eq!(selection.len(), 2);
        assert_eq!(selection.total_matches(), 3);
        assert_eq!(selection.find(2, 7).unwrap().content.ids(), &[0]);
        assert!(selection.find(3, 7).is_none());
        assert_eq!(selection.nodes()[0].process_rank, 1);
    }

    #[test]
    fn test_content_kind_tags() {
        let content = SelectionContent::Pixel {
            ids: vec![5],
            pixel_count: 12,
        };
        assert_eq!(content.kind(), ContentKind::Pixel);
        assert_eq!(content.len(), 1);

        let content = SelectionContent::Points {
            ids: vec![],
            positions: vec![],
        };
        assert_eq!(content.kind(), ContentKind::Points);
        assert!(content.is_empty());
    }

    #[test]
    fn test_selection_with_only_empty_nodes_is_empty() {
        let mut selection = Selection::empty();
        selection.push(SelectionNode::new(
            1,
            1,
            1,
            SelectionContent::Thresholds { ids: vec![] },
        ));
        assert!(selection.is_empty());
        assert_eq!(selection.len(), 1);
    }

    #[test]
    fn test_selection_roundtrips_through_wire() {
        let mut selection = Selection::empty();
        selection.push(SelectionNode::new(
            3,
            9,
            90,
            SelectionContent::Points {
                ids: vec![4],
                positions: vec![[1.0, 2.0, 3.0]],
            },
        ));

        let wire = serde_json::to_string(&selection).unwrap();
        let decoded: Selection = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, selection);
    }
}
