//! parvis-transport - Synchronous cluster transport for parvis
//!
//! This crate provides the cross-process coordination layer the parvis
//! renderers are built on:
//!
//! - **Transport**: blocking property broadcast and command invocation
//!   against every process in the cluster
//! - **LoopbackCluster**: an in-process cluster used by tests and
//!   single-machine runs, delivering through a real serialization round-trip
//! - **FrameBarrier**: a lightweight checksum barrier that detects divergent
//!   per-frame state across processes before a composited draw
//!
//! All calls are synchronous: a broadcast or invocation blocks the caller
//! until every targeted peer has replied. There is no partial or streaming
//! response.

pub mod barrier;
pub mod loopback;
pub mod messages;
pub mod transport;

pub use barrier::*;
pub use loopback::*;
pub use messages::*;
pub use transport::*;
