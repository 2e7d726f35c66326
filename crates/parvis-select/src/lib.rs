//! parvis-select - Cluster-wide visible-cell selection
//!
//! Converts a 2-D screen rectangle (or an explicit frustum/id/point/
//! threshold query) into the exact set of (process rank, prop, cell id)
//! tuples that are visible or match the query, even though no single
//! process holds the whole dataset.
//!
//! # How picking works
//!
//! Every (rank, prop) pair is assigned a contiguous range of a
//! monotonically increasing global cell index, agreed cluster-wide through
//! the transport. Each selection pass renders 24 bits of that index into
//! the RGB channels and reads back the requested sub-rectangle; after all
//! passes, the decoder recombines the chunks per pixel, drops background
//! pixels, and maps the surviving indices back through the table.
//!
//! Non-pixel queries skip the passes entirely: the typed query is shipped
//! to every data-holding process, extracted locally against visible,
//! pickable representations, and the per-process lists are merged.

pub mod encode;
pub mod endpoint;
pub mod pick;
pub mod query;
pub mod selection;

pub use encode::*;
pub use endpoint::*;
pub use pick::*;
pub use query::*;
pub use selection::*;
