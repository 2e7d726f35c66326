//! Cell-index color encoding
//!
//! Selection passes write 24 bits of a global cell index per pass into the
//! RGB channels (8 bits per channel). The pass budget follows the size of
//! the global index space: one pass covers up to 2^24 cells, two up to
//! 2^48, three beyond that.
//!
//! The miss sentinel is the white background the selection override forces:
//! a pixel nothing drew into reads back all-ones in every pass. The pass
//! budget makes the sentinel collision-free: a real index whose every chunk
//! is all-ones would be exactly 2^(24·passes) - 1, and an index space that
//! large is already budgeted one more pass.

use serde::{Deserialize, Serialize};

use parvis_transport::ProcessRank;

/// Bits of index encoded per pass
pub const BITS_PER_PASS: u32 = 24;

/// The 24-bit chunk a missed (background) pixel reads back in every pass
pub const MISS_CHUNK: u32 = 0x00FF_FFFF;

/// Number of selection passes needed for a cell-index space of `max_cells`.
pub fn passes_required(max_cells: u64) -> u32 {
    1 + (max_cells >> 24 != 0) as u32 + (max_cells >> 48 != 0) as u32
}

/// The 24-bit chunk of `index` written in the given pass, as RGB bytes.
pub fn encode_chunk(index: u64, pass: u32) -> [u8; 3] {
    let chunk = ((index >> (BITS_PER_PASS * pass)) & MISS_CHUNK as u64) as u32;
    [
        ((chunk >> 16) & 0xFF) as u8,
        ((chunk >> 8) & 0xFF) as u8,
        (chunk & 0xFF) as u8,
    ]
}

/// Recover a 24-bit chunk from RGB bytes.
pub fn decode_chunk(rgb: [u8; 3]) -> u32 {
    ((rgb[0] as u32) << 16) | ((rgb[1] as u32) << 8) | rgb[2] as u32
}

/// Recombine per-pass chunks (chunk of pass p at position p) into an index.
pub fn combine_chunks(chunks: &[u32]) -> u64 {
    chunks
        .iter()
        .enumerate()
        .fold(0u64, |acc, (pass, &chunk)| {
            acc | ((chunk as u64) << (BITS_PER_PASS * pass as u32))
        })
}

/// True when a pixel read back the background sentinel in every pass.
pub fn is_miss(chunks: &[u32]) -> bool {
    chunks.iter().all(|&chunk| chunk == MISS_CHUNK)
}

/// One (rank, prop) pair's slice of the global cell-index space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexRange {
    /// Process holding the cells
    pub rank: ProcessRank,

    /// Prop the cells render into
    pub prop_id: u32,

    /// Pipeline filter that produced the data
    pub source_id: u32,

    /// First global index of the range
    pub start: u64,

    /// Number of cells in the range
    pub count: u64,
}

/// The cluster-wide agreement on who owns which slice of the global index.
///
/// Built identically on every process (entries pushed in ascending rank,
/// reply order within a rank) and broadcast before the first pass, so every
/// process draws with the same offsets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellIndexTable {
    ranges: Vec<IndexRange>,
    total: u64,
}

impl CellIndexTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a range for a (rank, prop) pair, returning its start index
    pub fn push(&mut self, rank: ProcessRank, prop_id: u32, source_id: u32, count: u64) -> u64 {
        let start = self.total;
        self.ranges.push(IndexRange {
            rank,
            prop_id,
            source_id,
            start,
            count,
        });
        self.total += count;
        start
    }

    /// Top of the global index space (total cell count)
    pub fn total_cells(&self) -> u64 {
        self.total
    }

    /// The registered ranges
    pub fn ranges(&self) -> &[IndexRange] {
        &self.ranges
    }

    /// Map a global index back to its range and local cell id.
    pub fn resolve(&self, global: u64) -> Option<(&IndexRange, u64)> {
        if global >= self.total {
            return None;
        }
        let position = self
            .ranges
            .partition_point(|range| range.start + range.count <= global);
        let range = self.ranges.get(position)?;
        // Zero-count ranges own no index.
        if global < range.start || global >= range.start + range.count {
            return None;
        }
        Some((range, global - range.start))
    }
}
