//! The seam to the rasterizer
//!
//! parvis never rasterizes; it drives a [`RenderBackend`] that does. The
//! backend also exposes the global render state (background color, layer
//! visibility, anti-alias/strip flags, buffer-swap policy) that the picking
//! protocol temporarily overrides. [`RenderStateGuard`] captures that state
//! on construction and restores it unconditionally on drop, so no early
//! return can leave a frame half-configured.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::types::{RenderKind, ScreenRect};

bitflags! {
    /// Boolean render toggles the picking protocol flips off as a set.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RenderStateFlags: u32 {
        /// Hardware anti-aliasing
        const ANTIALIASING = 1 << 0;
        /// The 2-D overlay renderer (annotations, orientation widget)
        const OVERLAY_RENDERER = 1 << 1;
        /// Additional render layers beyond the main 3-D layer
        const EXTRA_LAYERS = 1 << 2;
        /// Triangle-strip optimization in the mappers
        const TRIANGLE_STRIPS = 1 << 3;
        /// Swap to the front buffer after drawing
        const SWAP_BUFFERS = 1 << 4;
    }
}

/// Global render state captured and restored around picking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderState {
    /// Background color, RGB in [0, 1]
    pub background: [f64; 3],

    /// Active toggles
    pub flags: RenderStateFlags,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            background: [0.1, 0.1, 0.1],
            flags: RenderStateFlags::all(),
        }
    }
}

impl RenderState {
    /// The override active during selection passes: white background (the
    /// miss sentinel), everything that could perturb encoded colors off,
    /// back-buffer-only drawing so the front buffer is never corrupted.
    pub fn selection_override() -> Self {
        Self {
            background: [1.0, 1.0, 1.0],
            flags: RenderStateFlags::empty(),
        }
    }
}

/// What a draw call writes per fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawMode {
    /// Normal shaded rendering
    Shaded,

    /// Selection encoding: write bits `[shift, shift + 24)` of the global
    /// cell index into the RGB channels instead of shaded color
    CellIndexChunk { shift: u8 },
}

/// One draw call issued by the frame coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawRequest {
    /// Still or interactive render
    pub kind: RenderKind,

    /// Resolution divisor for transmitted partial images
    pub image_reduction_factor: u32,

    /// Fragment output mode
    pub mode: DrawMode,
}

impl DrawRequest {
    /// A shaded draw for the given render kind
    pub fn shaded(kind: RenderKind, image_reduction_factor: u32) -> Self {
        Self {
            kind,
            image_reduction_factor,
            mode: DrawMode::Shaded,
        }
    }

    /// A selection-encoding draw for one pass
    pub fn selection_pass(shift: u8) -> Self {
        Self {
            kind: RenderKind::Still,
            image_reduction_factor: 1,
            mode: DrawMode::CellIndexChunk { shift },
        }
    }
}

/// How a draw call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawOutcome {
    /// The frame completed
    Completed,

    /// The abort callback interrupted the draw; the frame is partial
    Aborted,
}

/// The rasterizer seam.
///
/// The backend polls `abort` periodically while drawing; returning true
/// interrupts the draw with [`DrawOutcome::Aborted`]. The coordinator wires
/// that callback to its render-interrupt flag.
pub trait RenderBackend {
    /// Bits per color channel of the framebuffer
    fn color_depth_bits(&self) -> u32;

    /// Current global render state
    fn render_state(&self) -> RenderState;

    /// Replace the global render state
    fn set_render_state(&mut self, state: RenderState);

    /// Desired update rate hint, frames per second
    fn set_desired_update_rate(&mut self, frames_per_second: f64);

    /// Issue a draw call
    fn render(
        &mut self,
        request: &DrawRequest,
        abort: &mut dyn FnMut() -> bool,
    ) -> RenderResult<DrawOutcome>;

    /// Read back an RGBA8 sub-rectangle of the framebuffer
    fn read_pixels(&mut self, rect: ScreenRect) -> RenderResult<Vec<u8>>;
}

/// Scoped render-state override.
///
/// Captures the backend's state on construction, installs the override, and
/// restores the captured state when dropped, whichever way scope is left.
pub struct RenderStateGuard<'a> {
    backend: &'a mut dyn RenderBackend,
    saved: RenderState,
}

impl<'a> RenderStateGuard<'a> {
    /// Install `override_state`, remembering the current state
    pub fn overriding(backend: &'a mut dyn RenderBackend, override_state: RenderState) -> Self {
        let saved = backend.render_state();
        backend.set_render_state(override_state);
        Self { backend, saved }
    }

    /// The guarded backend
    pub fn backend(&mut self) -> &mut dyn RenderBackend {
        self.backend
    }

    /// The state that will be restored on drop
    pub fn saved_state(&self) -> &RenderState {
        &self.saved
    }
}

impl Drop for RenderStateGuard<'_> {
    fn drop(&mut self) {
        self.backend.set_render_state(self.saved.clone());
    }
}

/// An offscreen backend without a rasterizer behind it.
///
/// Draw calls are recorded, readbacks come from a queue of prepared buffers
/// (or synthesize the background color when the queue is empty). Used by
/// tests and batch validation runs on processes that cannot open a display.
/// The request log is shared so a caller can keep watching draw calls after
/// handing the backend to a view.
pub struct HeadlessBackend {
    color_depth_bits: u32,
    state: RenderState,
    update_rate: f64,
    requests: Rc<RefCell<Vec<DrawRequest>>>,
    queued_readbacks: VecDeque<Vec<u8>>,
}

impl HeadlessBackend {
    /// Abort polls issued per simulated draw
    const ABORT_CHECKS_PER_DRAW: u32 = 3;

    /// Create a headless backend with an 8-bit-per-channel framebuffer
    pub fn new() -> Self {
        Self {
            color_depth_bits: 8,
            state: RenderState::default(),
            update_rate: 0.0,
            requests: Rc::new(RefCell::new(Vec::new())),
            queued_readbacks: VecDeque::new(),
        }
    }

    /// Override the reported color depth
    pub fn with_color_depth(mut self, bits: u32) -> Self {
        self.color_depth_bits = bits;
        self
    }

    /// Queue a buffer to serve the next readback
    pub fn queue_readback(&mut self, rgba: Vec<u8>) {
        self.queued_readbacks.push_back(rgba);
    }

    /// Draw calls issued so far
    pub fn requests(&self) -> Vec<DrawRequest> {
        self.requests.borrow().clone()
    }

    /// Shared handle onto the draw-call log
    pub fn request_log(&self) -> Rc<RefCell<Vec<DrawRequest>>> {
        Rc::clone(&self.requests)
    }

    /// The most recent draw call
    pub fn last_request(&self) -> Option<DrawRequest> {
        self.requests.borrow().last().copied()
    }

    /// Last update-rate hint
    pub fn desired_update_rate(&self) -> f64 {
        self.update_rate
    }

    fn background_rgba(&self) -> [u8; 4] {
        let to_byte = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [
            to_byte(self.state.background[0]),
            to_byte(self.state.background[1]),
            to_byte(self.state.background[2]),
            255,
        ]
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for HeadlessBackend {
    fn color_depth_bits(&self) -> u32 {
        self.color_depth_bits
    }

    fn render_state(&self) -> RenderState {
        self.state.clone()
    }

    fn set_render_state(&mut self, state: RenderState) {
        self.state = state;
    }

    fn set_desired_update_rate(&mut self, frames_per_second: f64) {
        self.update_rate = frames_per_second;
    }

    fn render(
        &mut self,
        request: &DrawRequest,
        abort: &mut dyn FnMut() -> bool,
    ) -> RenderResult<DrawOutcome> {
        self.requests.borrow_mut().push(*request);
        for _ in 0..Self::ABORT_CHECKS_PER_DRAW {
            if abort() {
                return Ok(DrawOutcome::Aborted);
            }
        }
        Ok(DrawOutcome::Completed)
    }

    fn read_pixels(&mut self, rect: ScreenRect) -> RenderResult<Vec<u8>> {
        let expected = rect.normalized().pixel_count() * 4;
        match self.queued_readbacks.pop_front() {
            Some(buffer) => {
                if buffer.len() != expected {
                    return Err(RenderError::ReadbackSize {
                        expected,
                        actual: buffer.len(),
                    });
                }
                Ok(buffer)
            }
            None => {
                let pixel = self.background_rgba();
                Ok(pixel
                    .iter()
                    .copied()
                    .cycle()
                    .take(expected)
                    .collect())
            }
        }
    }
}
