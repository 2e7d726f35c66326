//! parvis-core - Cluster-rendering coordination engine
//!
//! parvis coordinates interactive 3D rendering of large datasets across a
//! cluster of cooperating processes (one client, N render processes, M data
//! processes). This crate holds the parts every frame depends on:
//!
//! # Key Components
//!
//! - **Representation**: per-dataset render unit exposing visibility,
//!   displayed size, bounds and ordered-compositing needs
//! - **CompositingEngine**: the per-frame decision between local rendering
//!   and parallel compositing, plus image-reduction control
//! - **PartitionManager**: the k-d spatial partition that yields the
//!   back-to-front process order required for translucent compositing
//! - **RenderView**: the frame coordinator running the
//!   update -> decide -> (partition) -> draw sequence
//! - **RenderBackend**: the seam to the out-of-scope rasterizer, with the
//!   scoped render-state guard used by the picking protocol
//!
//! Everything that affects what a frame draws is broadcast through the
//! cluster transport before the draw call; no process applies such state
//! unilaterally.

pub mod camera;
pub mod compositing;
pub mod error;
pub mod partition;
pub mod render;
pub mod representation;
pub mod types;
pub mod view;

pub use camera::*;
pub use compositing::*;
pub use error::*;
pub use partition::*;
pub use render::*;
pub use representation::*;
pub use types::*;
pub use view::*;

pub use parvis_transport::ProcessRank;
