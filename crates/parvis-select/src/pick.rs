//! The multi-pass visible-cell picking protocol
//!
//! `select_visible_cells` turns a screen rectangle into the set of
//! (process rank, prop, cell id) tuples visible in it:
//!
//! 1. agree cluster-wide on the global cell-index table,
//! 2. render one selection pass per 24-bit chunk of the index space, with
//!    the render state overridden (white background, anti-aliasing, overlay
//!    renderer and strips off, back-buffer only) and abort checks
//!    suppressed,
//! 3. read back exactly the requested sub-rectangle after each pass,
//!    strictly in pass order,
//! 4. decode all passes together, drop background pixels, and map the
//!    surviving indices back through the table.
//!
//! Whatever happens, the prior render state and interrupt setting are
//! restored before returning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use parvis_core::{
    DrawRequest, ParvisError, ParvisResult, RenderState, RenderStateGuard, RenderView,
    ScreenRect,
};
use parvis_transport::ProcessRank;

use crate::encode::{
    combine_chunks, decode_chunk, is_miss, passes_required, CellIndexTable, BITS_PER_PASS,
};
use crate::query::{Frustum, SelectionQuery, EXTRACT_COMMAND};
use crate::selection::{Selection, SelectionContent, SelectionNode};

/// Above this compositing threshold, color compositing is effectively
/// disabled and the encoded colors cannot be trusted.
pub const MAX_SELECTION_COMPOSITE_THRESHOLD_MB: f64 = 100.0;

/// Minimum framebuffer depth for reliable 8-bit chunk encoding
pub const MIN_COLOR_DEPTH_BITS: u32 = 8;

/// Remote object the index table is broadcast to
pub const SELECT_OBJECT: &str = "view.select";

/// Property name the index table travels under
pub const INDEX_TABLE_PROPERTY: &str = "index-table";

/// Command data processes answer with their pickable cell counts
pub const CELL_COUNTS_COMMAND: &str = "select.cell-counts";

/// One representation's pickable cell count, as reported per process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropCellCount {
    pub prop_id: u32,
    pub source_id: u32,
    pub cell_count: u64,
}

/// Why a selection was refused or failed.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Compositing threshold disables reliable color compositing
    #[error("compositing threshold {threshold_mb} MB disables color compositing")]
    CompositingUnavailable { threshold_mb: f64 },

    /// Framebuffer too shallow for 8-bit chunk encoding
    #[error("{bits} bits per color channel, need {MIN_COLOR_DEPTH_BITS}")]
    InsufficientColorDepth { bits: u32 },

    /// The view has no render backend to pick through
    #[error("view has no render backend")]
    MissingBackend,

    /// A pass read back a buffer of the wrong shape
    #[error("pass {pass}: buffer holds {actual} bytes, expected {expected}")]
    BufferShape {
        pass: u32,
        expected: usize,
        actual: usize,
    },

    /// Pass buffers arrived out of order
    #[error("passes out of order: expected pass {expected}, got {actual}")]
    PassOrder { expected: u32, actual: u32 },
}

impl From<SelectionError> for ParvisError {
    fn from(err: SelectionError) -> Self {
        ParvisError::Selection(err.to_string())
    }
}

/// One pass's raw readback, tagged with its pass index.
#[derive(Clone, Debug)]
pub struct PickBuffer {
    /// Pass this buffer belongs to
    pub pass: u32,

    /// Rectangle that was read back
    pub rect: ScreenRect,

    /// RGBA8 pixels, row-major
    pub rgba: Vec<u8>,
}

impl PickBuffer {
    /// The 24-bit chunk at a pixel position
    pub fn chunk_at(&self, pixel: usize) -> u32 {
        let offset = pixel * 4;
        decode_chunk([
            self.rgba[offset],
            self.rgba[offset + 1],
            self.rgba[offset + 2],
        ])
    }
}

/// Check the preconditions for pixel-based selection.
pub fn is_selection_available(view: &RenderView) -> Result<(), SelectionError> {
    let threshold_mb = view.compositing().config().composite_threshold_mb;
    if threshold_mb > MAX_SELECTION_COMPOSITE_THRESHOLD_MB {
        return Err(SelectionError::CompositingUnavailable { threshold_mb });
    }
    let backend = view.backend().ok_or(SelectionError::MissingBackend)?;
    let bits = backend.color_depth_bits();
    if bits < MIN_COLOR_DEPTH_BITS {
        return Err(SelectionError::InsufficientColorDepth { bits });
    }
    Ok(())
}

/// Select the cells visible inside a screen rectangle.
///
/// Refused preconditions degrade to an empty selection; transport and
/// backend failures propagate after the render state is restored.
pub fn select_visible_cells(
    view: &mut RenderView,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
) -> ParvisResult<Selection> {
    let rect = ScreenRect::new(x0, y0, x1, y1).normalized();

    if let Err(reason) = is_selection_available(view) {
        tracing::warn!(%reason, "selection refused");
        return Ok(Selection::empty());
    }

    let table = build_index_table(view)?;
    if table.total_cells() == 0 {
        tracing::debug!("no pickable cells in the cluster");
        return Ok(Selection::empty());
    }
    let passes = passes_required(table.total_cells());

    // The multi-pass sequence is atomic: a partially picked buffer set is
    // useless, so abort checks are suppressed for its whole duration.
    let previous_interrupts = view.render_interrupts_enabled();
    view.set_render_interrupts_enabled(false);
    let buffers = run_selection_passes(view, rect, passes);
    view.set_render_interrupts_enabled(previous_interrupts);

    let selection = decode_passes(&buffers?, &table)?;
    tracing::debug!(
        passes,
        nodes = selection.len(),
        matches = selection.total_matches(),
        "pixel selection complete"
    );
    Ok(selection)
}

/// Select cells inside a world-space frustum.
pub fn select_frustum(view: &mut RenderView, frustum: Frustum) -> ParvisResult<Selection> {
    select_by_query(view, SelectionQuery::Frustum(frustum))
}

/// Select cells by explicit local ids.
pub fn select_cell_ids(view: &mut RenderView, ids: Vec<u64>) -> ParvisResult<Selection> {
    select_by_query(view, SelectionQuery::CellIds { ids })
}

/// Select cells within a radius of the given points.
pub fn select_points(
    view: &mut RenderView,
    points: Vec<[f64; 3]>,
    radius: f64,
) -> ParvisResult<Selection> {
    select_by_query(view, SelectionQuery::Points { points, radius })
}

/// Select cells whose field value falls inside any of the ranges.
pub fn select_thresholds(
    view: &mut RenderView,
    field: impl Into<String>,
    ranges: Vec<(f64, f64)>,
) -> ParvisResult<Selection> {
    select_by_query(
        view,
        SelectionQuery::Thresholds {
            field: field.into(),
            ranges,
        },
    )
}

/// Ship a typed query to every data-holding process and merge the replies.
fn select_by_query(view: &mut RenderView, query: SelectionQuery) -> ParvisResult<Selection> {
    let replies = view.transport_mut().invoke(EXTRACT_COMMAND, json!(query))?;

    let mut selection = Selection::empty();
    for reply in replies {
        let nodes: Vec<SelectionNode> = serde_json::from_value(reply.value)
            .map_err(parvis_transport::TransportError::from)?;
        selection.merge(nodes);
    }
    tracing::debug!(
        nodes = selection.len(),
        matches = selection.total_matches(),
        "query selection complete"
    );
    Ok(selection)
}

/// Gather per-process cell counts, build the global index table, and
/// broadcast it so every process draws with the same offsets.
fn build_index_table(view: &mut RenderView) -> ParvisResult<CellIndexTable> {
    let local_rank = view.transport_mut().local_rank();
    let local: Vec<PropCellCount> = view
        .local_cell_counts()
        .into_iter()
        .map(|(prop_id, source_id, cell_count)| PropCellCount {
            prop_id,
            source_id,
            cell_count,
        })
        .collect();

    let replies = view.transport_mut().invoke(CELL_COUNTS_COMMAND, Value::Null)?;
    let mut per_rank: Vec<(ProcessRank, Vec<PropCellCount>)> = vec![(local_rank, local)];
    for reply in replies {
        let counts: Vec<PropCellCount> = serde_json::from_value(reply.value)
            .map_err(parvis_transport::TransportError::from)?;
        per_rank.push((reply.rank, counts));
    }
    per_rank.sort_by_key(|(rank, _)| *rank);

    let mut table = CellIndexTable::new();
    for (rank, counts) in per_rank {
        for count in counts {
            table.push(rank, count.prop_id, count.source_id, count.cell_count);
        }
    }

    view.transport_mut()
        .push_property(SELECT_OBJECT, INDEX_TABLE_PROPERTY, json!(table))?;
    Ok(table)
}

/// Run the selection passes under the render-state override, reading back
/// the rectangle after each pass.
fn run_selection_passes(
    view: &mut RenderView,
    rect: ScreenRect,
    passes: u32,
) -> ParvisResult<Vec<PickBuffer>> {
    let (backend, _transport) = view.selection_parts()?;
    let mut guard = RenderStateGuard::overriding(backend, RenderState::selection_override());

    let mut buffers = Vec::with_capacity(passes as usize);
    for pass in 0..passes {
        let shift = (BITS_PER_PASS * pass) as u8;
        let request = DrawRequest::selection_pass(shift);
        guard.backend().render(&request, &mut || false)?;

        let rgba = guard.backend().read_pixels(rect)?;
        let expected = rect.pixel_count() * 4;
        if rgba.len() != expected {
            return Err(SelectionError::BufferShape {
                pass,
                expected,
                actual: rgba.len(),
            }
            .into());
        }
        buffers.push(PickBuffer { pass, rect, rgba });
    }
    Ok(buffers)
}

/// Decode completed passes into a selection.
///
/// Buffers must cover the same rectangle in strict pass order; the decoder
/// addresses them by pass index.
pub fn decode_passes(
    buffers: &[PickBuffer],
    table: &CellIndexTable,
) -> Result<Selection, SelectionError> {
    let Some(first) = buffers.first() else {
        return Ok(Selection::empty());
    };
    let rect = first.rect;
    let pixels = rect.pixel_count();
    for (position, buffer) in buffers.iter().enumerate() {
        if buffer.pass != position as u32 {
            return Err(SelectionError::PassOrder {
                expected: position as u32,
                actual: buffer.pass,
            });
        }
        if buffer.rect != rect || buffer.rgba.len() != pixels * 4 {
            return Err(SelectionError::BufferShape {
                pass: buffer.pass,
                expected: pixels * 4,
                actual: buffer.rgba.len(),
            });
        }
    }

    struct PropHits {
        source_id: u32,
        ids: Vec<u64>,
        pixel_count: u64,
    }

    let mut hits: BTreeMap<(ProcessRank, u32), PropHits> = BTreeMap::new();
    let mut stray_pixels = 0u64;
    let mut chunks = vec![0u32; buffers.len()];
    for pixel in 0..pixels {
        for (pass, buffer) in buffers.iter().enumerate() {
            chunks[pass] = buffer.chunk_at(pixel);
        }
        if is_miss(&chunks) {
            continue;
        }

        let global = combine_chunks(&chunks);
        match table.resolve(global) {
            Some((range, local_id)) => {
                let entry = hits
                    .entry((range.rank, range.prop_id))
                    .or_insert_with(|| PropHits {
                        source_id: range.source_id,
                        ids: Vec::new(),
                        pixel_count: 0,
                    });
                entry.ids.push(local_id);
                entry.pixel_count += 1;
            }
            None => stray_pixels += 1,
        }
    }
    if stray_pixels > 0 {
        tracing::debug!(stray_pixels, "pixels decoded outside the cell index table");
    }

    let mut selection = Selection::empty();
    for ((rank, prop_id), mut prop_hits) in hits {
        prop_hits.ids.sort_unstable();
        prop_hits.ids.dedup();
        selection.push(SelectionNode::new(
            rank,
            prop_id,
            prop_hits.source_id,
            SelectionContent::Pixel {
                ids: prop_hits.ids,
                pixel_count: prop_hits.pixel_count,
            },
        ));
    }
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_chunk;

    fn buffer_from_indices(pass: u32, rect: ScreenRect, indices: &[Option<u64>]) -> PickBuffer {
        assert_eq!(indices.len(), rect.pixel_count());
        let mut rgba = Vec::with_capacity(indices.len() * 4);
        for &index in indices {
            let rgb = match index {
                Some(index) => encode_chunk(index, pass),
                None => [0xFF, 0xFF, 0xFF],
            };
            rgba.extend_from_slice(&rgb);
            rgba.push(0xFF);
        }
        PickBuffer { pass, rect, rgba }
    }

    #[test]
    fn test_decode_single_pass() {
        let mut table = CellIndexTable::new();
        table.push(1, 7, 70, 3);
        table.push(2, 7, 70, 2);

        let rect = ScreenRect::new(0, 0, 3, 0);
        let buffer =
            buffer_from_indices(0, rect, &[Some(1), Some(4), None, Some(1)]);

        let selection = decode_passes(&[buffer], &table).unwrap();
        assert_eq!(selection.len(), 2);

        let node = selection.find(1, 7).unwrap();
        assert_eq!(node.content.ids(), &[1]);
        match &node.content {
            SelectionContent::Pixel { pixel_count, .. } => assert_eq!(*pixel_count, 2),
            other => panic!("unexpected content: {other:?}"),
        }

        let node = selection.find(2, 7).unwrap();
        assert_eq!(node.content.ids(), &[1]);
    }

    #[test]
    fn test_decode_two_passes_recombines_high_bits() {
        let mut table = CellIndexTable::new();
        table.push(1, 7, 70, 1u64 << 25);

        let index = (1u64 << 24) + 5;
        let rect = ScreenRect::new(0, 0, 0, 0);
        let buffers = vec![
            buffer_from_indices(0, rect, &[Some(index)]),
            buffer_from_indices(1, rect, &[Some(index)]),
        ];

        let selection = decode_passes(&buffers, &table).unwrap();
        let node = selection.find(1, 7).unwrap();
        assert_eq!(node.content.ids(), &[index]);
    }

    #[test]
    fn test_decode_rejects_out_of_order_passes() {
        let table = CellIndexTable::new();
        let rect = ScreenRect::new(0, 0, 0, 0);
        let buffers = vec![buffer_from_indices(1, rect, &[None])];

        let err = decode_passes(&buffers, &table).unwrap_err();
        assert!(matches!(
            err,
            SelectionError::PassOrder {
                expected: 0,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_decode_drops_stray_indices() {
        let mut table = CellIndexTable::new();
        table.push(1, 7, 70, 2);

        let rect = ScreenRect::new(0, 0, 1, 0);
        // Index 5 is outside the table; only index 1 survives.
        let buffer = buffer_from_indices(0, rect, &[Some(5), Some(1)]);

        let selection = decode_passes(&[buffer], &table).unwrap();
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.find(1, 7).unwrap().content.ids(), &[1]);
    }

    #[test]
    fn test_decode_empty_buffers() {
        let table = CellIndexTable::new();
        assert!(decode_passes(&[], &table).unwrap().is_empty());
    }
}
