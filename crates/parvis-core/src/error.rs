//! Error types for parvis-core
//!
//! The taxonomy follows the failure model of the cluster: configuration
//! errors make the affected operation a no-op, capability errors degrade to
//! a local render or an empty selection, transient pipeline errors skip one
//! representation for one frame. None of them tear down the session.

use thiserror::Error;

pub use parvis_transport::{TransportError, TransportResult};

/// Main error type for parvis operations
#[derive(Debug, Error)]
pub enum ParvisError {
    /// A required sub-object was never created or is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rendering failed
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// Spatial partition errors
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),

    /// Representation pipeline errors
    #[error("representation error: {0}")]
    Representation(#[from] RepresentationError),

    /// Cluster transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Selection errors, reported by the picking layer
    #[error("selection error: {0}")]
    Selection(String),
}

/// Errors caused by missing or invalid configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The view has no camera
    #[error("view has no camera")]
    MissingCamera,

    /// The view has no render backend
    #[error("view has no render backend")]
    MissingBackend,

    /// Composite threshold must be non-negative
    #[error("invalid composite threshold: {value} MB")]
    InvalidThreshold { value: f64 },

    /// Image reduction factor must be at least 1
    #[error("invalid image reduction factor: {factor}")]
    InvalidReductionFactor { factor: u32 },

    /// Clipping range must satisfy 0 < near < far
    #[error("invalid clipping range: [{near}, {far}]")]
    InvalidClippingRange { near: f64, far: f64 },
}

/// Errors related to rendering
#[derive(Debug, Error)]
pub enum RenderError {
    /// The backend failed while drawing
    #[error("backend failure: {message}")]
    BackendFailure { message: String },

    /// Framebuffer readback failed or returned the wrong amount of data
    #[error("readback failed: expected {expected} bytes, got {actual}")]
    ReadbackSize { expected: usize, actual: usize },
}

/// Errors related to the spatial partition
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Rebuild was requested with no registered producers
    #[error("no data producers registered")]
    NoProducers,

    /// The union of producer extents has no volume
    #[error("degenerate producer bounds")]
    DegenerateBounds,

    /// A producer was registered through the wrong input slot
    #[error("producer of kind {kind} registered through the {slot} slot")]
    WrongSlot {
        kind: &'static str,
        slot: &'static str,
    },

    /// Visitation order requested before any rebuild
    #[error("partition has not been built")]
    NotBuilt,
}

/// Errors raised by a representation's upstream pipeline
#[derive(Debug, Error)]
pub enum RepresentationError {
    /// The upstream producer generated zero output parts
    #[error("representation '{name}' produced no output")]
    EmptyOutput { name: String },

    /// The upstream pipeline failed to execute
    #[error("pipeline for '{name}' failed: {message}")]
    PipelineFailure { name: String, message: String },
}

/// Result type alias for parvis operations
pub type ParvisResult<T> = Result<T, ParvisError>;

/// Result type alias for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Result type alias for partition operations
pub type PartitionResult<T> = Result<T, PartitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidReductionFactor { factor: 0 };
        assert!(err.to_string().contains('0'));
    }

    #[test]
    fn test_partition_error_display() {
        let err = PartitionError::WrongSlot {
            kind: "structured",
            slot: "unstructured",
        };
        assert!(err.to_string().contains("structured"));
    }

    #[test]
    fn test_error_aggregation() {
        let err: ParvisError = ConfigError::MissingCamera.into();
        assert!(matches!(err, ParvisError::Config(_)));

        let err: ParvisError = RepresentationError::EmptyOutput {
            name: "iso".to_string(),
        }
        .into();
        assert!(err.to_string().contains("iso"));
    }
}
