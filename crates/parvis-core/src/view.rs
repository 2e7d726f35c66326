//! The render coordinator
//!
//! `RenderView` owns the camera, the representation collection, the
//! compositing engine and the partition manager, and runs the per-frame
//! sequence: update representations, decide compositing/LOD, rebuild the
//! partition order when ordered compositing applies, draw.
//!
//! The sequence is exposed as a two-phase protocol: `prepare_frame` produces
//! a [`FramePlan`] that `render` consumes by value. The LOD-before-
//! compositing ordering dependency is thereby enforced by the API instead of
//! by calling convention.

use std::cell::Cell;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use parvis_transport::{
    state_checksum, ConsistencyReport, FrameBarrier, ProcessRank, Transport, TransportResult,
};

use crate::camera::Camera;
use crate::compositing::{CompositingEngine, CompositingState, RenderStrategy};
use crate::error::{ConfigError, ParvisResult, PartitionError};
use crate::partition::{
    DataProducer, PartitionManager, ProducerPiece, LOCAL_BOUNDS_COMMAND, PARTITION_OBJECT,
    VISITATION_ORDER_PROPERTY,
};
use crate::render::{DrawOutcome, DrawRequest, RenderBackend};
use crate::representation::Representation;
use crate::types::{Bounds, RenderKind};

/// Checksum of the state every process must agree on before a composited
/// draw. Endpoints compute the same checksum from the broadcasts they
/// received; divergence means a broadcast was missed.
pub fn frame_state_checksum(
    state: &CompositingState,
    visitation_order: Option<&[ProcessRank]>,
) -> TransportResult<u64> {
    state_checksum(&(state, visitation_order))
}

/// View-level tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Update-rate hint for still renders, frames per second
    pub still_update_rate: f64,

    /// Update-rate hint while interacting, frames per second
    pub interactive_update_rate: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            still_update_rate: 0.002,
            interactive_update_rate: 5.0,
        }
    }
}

/// Phase of the per-frame state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    UpdatingRepresentations,
    DecidingComposite,
    RebuildingPartition,
    Drawing,
}

/// The outcome of `prepare_frame`: everything the draw depends on.
///
/// Consumed by value by `render`, so a frame cannot draw without having
/// decided, and a stale plan cannot be replayed for a later frame.
#[derive(Clone, Debug)]
pub struct FramePlan {
    /// Still or interactive
    pub kind: RenderKind,

    /// Whether this frame composites partial images
    pub use_compositing: bool,

    /// Resolution divisor pushed to the compositing transport
    pub image_reduction_factor: u32,

    /// Back-to-front process order, when ordered compositing applies
    pub visitation_order: Option<Vec<ProcessRank>>,

    /// Aggregate visible bytes the decision was made against
    pub total_visible_bytes: u64,

    /// Representations skipped this frame (empty upstream output)
    pub skipped: Vec<String>,

    /// Barrier report for composited ordered frames
    pub consistency: Option<ConsistencyReport>,
}

/// The per-view render coordinator.
///
/// A view whose camera or backend was never initialized stays inert: every
/// per-frame operation logs and returns instead of failing, because other
/// processes in the cluster may still be healthy.
pub struct RenderView {
    camera: Option<Camera>,
    backend: Option<Box<dyn RenderBackend>>,
    transport: Box<dyn Transport>,
    representations: Vec<Box<dyn Representation>>,
    compositing: CompositingEngine,
    partition: PartitionManager,
    config: ViewConfig,
    phase: FramePhase,
    render_interrupts_enabled: bool,
    abort_requested: Cell<bool>,
}

impl RenderView {
    /// Create a view over a transport; camera and backend attach separately
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            camera: None,
            backend: None,
            transport,
            representations: Vec::new(),
            compositing: CompositingEngine::default(),
            partition: PartitionManager::default(),
            config: ViewConfig::default(),
            phase: FramePhase::Idle,
            render_interrupts_enabled: true,
            abort_requested: Cell::new(false),
        }
    }

    /// Attach a camera
    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = Some(camera);
        self
    }

    /// Attach a render backend
    pub fn with_backend(mut self, backend: Box<dyn RenderBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the view configuration
    pub fn with_config(mut self, config: ViewConfig) -> Self {
        self.config = config;
        self
    }

    /// True when both camera and backend are attached
    pub fn is_ready(&self) -> bool {
        self.camera.is_some() && self.backend.is_some()
    }

    /// Current frame phase
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// The camera, if attached
    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    /// Mutable camera access for interaction handlers
    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.camera.as_mut()
    }

    /// The compositing engine
    pub fn compositing(&self) -> &CompositingEngine {
        &self.compositing
    }

    /// The partition manager
    pub fn partition(&self) -> &PartitionManager {
        &self.partition
    }

    /// The render backend, if attached
    pub fn backend(&self) -> Option<&dyn RenderBackend> {
        self.backend.as_deref()
    }

    /// The cluster transport
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        &mut *self.transport
    }

    /// Backend and transport together, for the picking protocol, which
    /// drives draws and broadcasts within one borrow scope.
    pub fn selection_parts(
        &mut self,
    ) -> ParvisResult<(&mut dyn RenderBackend, &mut dyn Transport)> {
        let backend = self
            .backend
            .as_deref_mut()
            .ok_or(ConfigError::MissingBackend)?;
        Ok((backend, &mut *self.transport))
    }

    /// Add a representation, returning its handle (index) in the collection
    pub fn add_representation(&mut self, representation: Box<dyn Representation>) -> usize {
        self.partition.invalidate();
        self.representations.push(representation);
        self.representations.len() - 1
    }

    /// Remove a representation by handle, returning it to the caller.
    ///
    /// Handles of later representations shift down by one.
    pub fn remove_representation(
        &mut self,
        handle: usize,
    ) -> Option<Box<dyn Representation>> {
        if handle >= self.representations.len() {
            return None;
        }
        self.partition.invalidate();
        Some(self.representations.remove(handle))
    }

    /// The representation collection
    pub fn representations(&self) -> &[Box<dyn Representation>] {
        &self.representations
    }

    /// Mark distributed geometry modified; forces a partition rebuild on the
    /// next ordered-compositing frame
    pub fn mark_geometry_modified(&mut self) {
        self.partition.invalidate();
    }

    /// Cell counts of the locally held visible, pickable representations,
    /// as (prop id, source id, cell count)
    pub fn local_cell_counts(&self) -> Vec<(u32, u32, u64)> {
        self.representations
            .iter()
            .filter(|r| r.is_visible() && r.is_pickable())
            .map(|r| (r.prop_id(), r.source_id(), r.cell_count()))
            .collect()
    }

    // --- configuration entry points -------------------------------------

    /// Set the compositing threshold in megabytes
    pub fn set_composite_threshold_mb(&mut self, value: f64) -> ParvisResult<()> {
        self.compositing.set_composite_threshold_mb(value)?;
        Ok(())
    }

    /// Set the interactive image reduction factor
    pub fn set_image_reduction_factor(&mut self, factor: u32) -> ParvisResult<()> {
        self.compositing.set_interactive_reduction_factor(factor)?;
        Ok(())
    }

    /// Enable or disable ordered compositing
    pub fn set_ordered_compositing_enabled(&mut self, enabled: bool) {
        self.compositing.set_ordered_compositing_enabled(enabled);
    }

    /// Enable or disable abort checks during draws.
    ///
    /// Disabled automatically around atomic sequences (multi-pass picking,
    /// batch capture) where a partial result is useless.
    pub fn set_render_interrupts_enabled(&mut self, enabled: bool) {
        self.render_interrupts_enabled = enabled;
    }

    /// Whether abort checks are currently honored
    pub fn render_interrupts_enabled(&self) -> bool {
        self.render_interrupts_enabled
    }

    /// Register a render strategy for compositing-change notifications
    pub fn register_strategy(&mut self, strategy: Box<dyn RenderStrategy>) {
        self.compositing.register_strategy(strategy);
    }

    /// Request that the current draw be aborted at its next abort check
    pub fn request_abort(&self) {
        self.abort_requested.set(true);
    }

    // --- per-frame operations -------------------------------------------

    /// Run the decision phases of a frame.
    ///
    /// Updates representations, decides compositing against what will
    /// actually be drawn, broadcasts the resulting state, and rebuilds the
    /// partition order when this frame composites translucent distributed
    /// geometry.
    pub fn prepare_frame(&mut self, kind: RenderKind) -> ParvisResult<FramePlan> {
        if self.camera.is_none() {
            return Err(ConfigError::MissingCamera.into());
        }
        if self.backend.is_none() {
            return Err(ConfigError::MissingBackend.into());
        }

        self.phase = FramePhase::UpdatingRepresentations;
        let mut skipped = Vec::new();
        for representation in &mut self.representations {
            if let Err(err) = representation.update() {
                tracing::warn!(
                    representation = representation.name(),
                    error = %err,
                    "skipping representation for this frame"
                );
                skipped.push(representation.name().to_string());
            }
        }

        self.phase = FramePhase::DecidingComposite;
        let full_resolution = !kind.is_interactive();
        let total_visible_bytes: u64 = self
            .representations
            .iter()
            .filter(|r| r.is_visible() && !skipped.iter().any(|s| s == r.name()))
            .map(|r| r.displayed_size_bytes(full_resolution))
            .sum();

        let use_compositing = self.compositing.decide(total_visible_bytes, kind);
        self.compositing.apply_reduction(kind);
        self.compositing.push_state(&mut *self.transport)?;

        let ordered_needed = self
            .representations
            .iter()
            .any(|r| {
                r.is_visible()
                    && r.needs_ordered_compositing()
                    && !skipped.iter().any(|s| s == r.name())
            });

        let mut visitation_order = None;
        let mut consistency = None;
        if use_compositing
            && self.compositing.config().ordered_compositing_enabled
            && ordered_needed
        {
            self.phase = FramePhase::RebuildingPartition;
            self.partition.set_process_count(self.transport.ranks().len());
            let producers = self.gather_producers()?;
            match self.partition.sync_producers(producers) {
                Ok(_) => {
                    let direction = self
                        .camera
                        .as_ref()
                        .map(Camera::view_direction)
                        .unwrap_or([0.0, 0.0, -1.0]);
                    let order = self.partition.visitation_order(direction)?;
                    self.transport.push_property(
                        PARTITION_OBJECT,
                        VISITATION_ORDER_PROPERTY,
                        json!(order),
                    )?;

                    let checksum =
                        frame_state_checksum(self.compositing.state(), Some(&order))?;
                    consistency =
                        Some(FrameBarrier::verify(&mut *self.transport, checksum)?);
                    visitation_order = Some(order);
                }
                Err(PartitionError::NoProducers) => {
                    tracing::warn!(
                        "ordered compositing needed but no process reported producer extents"
                    );
                    self.partition.discard();
                }
                Err(err) => {
                    self.phase = FramePhase::Idle;
                    return Err(err.into());
                }
            }
        } else {
            self.partition.discard();
        }

        self.phase = FramePhase::Idle;
        Ok(FramePlan {
            kind,
            use_compositing,
            image_reduction_factor: self.compositing.state().image_reduction_factor,
            visitation_order,
            total_visible_bytes,
            skipped,
            consistency,
        })
    }

    /// Draw a prepared frame.
    pub fn render(&mut self, plan: FramePlan) -> ParvisResult<DrawOutcome> {
        let Some(backend) = self.backend.as_deref_mut() else {
            tracing::warn!("view has no backend; draw is a no-op");
            return Ok(DrawOutcome::Completed);
        };

        self.phase = FramePhase::Drawing;
        if plan.kind.is_interactive() {
            backend.set_desired_update_rate(self.config.interactive_update_rate);
        }

        let request = DrawRequest::shaded(plan.kind, plan.image_reduction_factor);
        let interrupts = self.render_interrupts_enabled;
        let abort_flag = &self.abort_requested;
        let mut abort = || interrupts && abort_flag.get();
        let outcome = backend.render(&request, &mut abort)?;
        if outcome == DrawOutcome::Aborted {
            tracing::debug!("draw aborted at user request");
        }

        if plan.kind.is_interactive() {
            backend.set_desired_update_rate(self.config.still_update_rate);
        }

        self.abort_requested.set(false);
        self.phase = FramePhase::Idle;
        Ok(outcome)
    }

    /// Full-fidelity render: prepare and draw one still frame.
    pub fn still_render(&mut self) -> ParvisResult<()> {
        if !self.is_ready() {
            tracing::warn!("view not fully initialized; still render is a no-op");
            return Ok(());
        }
        let plan = self.prepare_frame(RenderKind::Still)?;
        self.render(plan)?;
        Ok(())
    }

    /// Reduced-fidelity render during interaction.
    pub fn interactive_render(&mut self) -> ParvisResult<()> {
        if !self.is_ready() {
            tracing::warn!("view not fully initialized; interactive render is a no-op");
            return Ok(());
        }
        let plan = self.prepare_frame(RenderKind::Interactive)?;
        self.render(plan)?;
        Ok(())
    }

    /// Fit the camera to the collective bounds of the visible
    /// representations and reset its clipping range.
    pub fn reset_camera(&mut self) {
        let bounds = self
            .representations
            .iter()
            .filter(|r| r.is_visible())
            .fold(Bounds::empty(), |acc, r| acc.union(&r.bounds()));
        match self.camera.as_mut() {
            Some(camera) if !bounds.is_empty() => camera.fit_to_bounds(&bounds),
            Some(_) => tracing::debug!("reset_camera with no visible bounds"),
            None => tracing::warn!("view has no camera; reset_camera is a no-op"),
        }
    }

    fn gather_producers(&mut self) -> ParvisResult<Vec<DataProducer>> {
        let replies = self.transport.invoke(LOCAL_BOUNDS_COMMAND, Value::Null)?;
        let mut producers = Vec::new();
        for reply in replies {
            let pieces: Vec<ProducerPiece> = serde_json::from_value(reply.value)
                .map_err(parvis_transport::TransportError::from)?;
            for piece in pieces {
                producers.push(DataProducer::new(reply.rank, piece.bounds, piece.kind));
            }
        }
        Ok(producers)
    }
}
