//! The compositing decision engine
//!
//! Decides, once per frame and identically on every process, whether the
//! frame renders locally or composites partial images from the cluster, and
//! how far the transmitted image may be reduced during interaction. The
//! resulting state is broadcast through the transport before the draw call;
//! the image reduction itself is applied by the compositing transport, not
//! here.

use serde::{Deserialize, Serialize};
use serde_json::json;

use parvis_transport::{Transport, TransportResult};

use crate::error::ConfigError;
use crate::types::RenderKind;

/// Remote object compositing state is broadcast to
pub const COMPOSITING_OBJECT: &str = "view.compositing";

/// Property name the broadcast state travels under
pub const STATE_PROPERTY: &str = "state";

/// Divisor converting bytes to the megabytes the threshold is expressed in
pub const BYTES_PER_MEGABYTE: f64 = 1_000_000.0;

/// Tunable compositing behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositingConfig {
    /// Aggregate visible size, in MB, at which compositing kicks in.
    ///
    /// A threshold far above any realistic dataset size disables
    /// compositing permanently; that is how local rendering is forced when
    /// a render process cannot open a display.
    pub composite_threshold_mb: f64,

    /// Image reduction factor used for interactive composited renders
    pub interactive_reduction_factor: u32,

    /// Whether ordered compositing may be used at all
    pub ordered_compositing_enabled: bool,
}

impl Default for CompositingConfig {
    fn default() -> Self {
        Self {
            composite_threshold_mb: 20.0,
            interactive_reduction_factor: 2,
            ordered_compositing_enabled: true,
        }
    }
}

/// Per-view compositing state, recomputed every frame and broadcast before
/// drawing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositingState {
    /// Whether the current frame composites partial images
    pub use_compositing: bool,

    /// Resolution divisor applied by the compositing transport
    pub image_reduction_factor: u32,

    /// Threshold the decision was made against
    pub composite_threshold_mb: f64,

    /// Outcome of the most recent decision
    pub last_decision: bool,
}

impl Default for CompositingState {
    fn default() -> Self {
        Self {
            use_compositing: false,
            image_reduction_factor: 1,
            composite_threshold_mb: CompositingConfig::default().composite_threshold_mb,
            last_decision: false,
        }
    }
}

/// A rendering strategy holding pipelines that cache the compositing mode.
///
/// Strategies that miss the invalidation callback keep rendering a stale
/// level of detail, so the engine notifies every registered strategy on
/// each change of the compositing decision.
pub trait RenderStrategy {
    /// Strategy name, used in log messages
    fn name(&self) -> &str;

    /// Called whenever the compositing decision flips
    fn invalidate_compositing(&mut self, use_compositing: bool);
}

/// Decision counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecisionStats {
    /// Frames decided
    pub frames: u64,

    /// Frames that decided to composite
    pub composited_frames: u64,
}

/// The per-view compositing decision engine.
pub struct CompositingEngine {
    config: CompositingConfig,
    state: CompositingState,
    stats: DecisionStats,
    strategies: Vec<Box<dyn RenderStrategy>>,
}

impl CompositingEngine {
    /// Create an engine with the given configuration
    pub fn new(config: CompositingConfig) -> Self {
        let state = CompositingState {
            composite_threshold_mb: config.composite_threshold_mb,
            ..CompositingState::default()
        };
        Self {
            config,
            state,
            stats: DecisionStats::default(),
            strategies: Vec::new(),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &CompositingConfig {
        &self.config
    }

    /// Current broadcastable state
    pub fn state(&self) -> &CompositingState {
        &self.state
    }

    /// Decision counters
    pub fn stats(&self) -> DecisionStats {
        self.stats
    }

    /// Set the compositing threshold in megabytes
    pub fn set_composite_threshold_mb(&mut self, value: f64) -> Result<(), ConfigError> {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::InvalidThreshold { value });
        }
        self.config.composite_threshold_mb = value;
        self.state.composite_threshold_mb = value;
        Ok(())
    }

    /// Set the interactive image reduction factor (>= 1)
    pub fn set_interactive_reduction_factor(&mut self, factor: u32) -> Result<(), ConfigError> {
        if factor == 0 {
            return Err(ConfigError::InvalidReductionFactor { factor });
        }
        self.config.interactive_reduction_factor = factor;
        Ok(())
    }

    /// Enable or disable ordered compositing
    pub fn set_ordered_compositing_enabled(&mut self, enabled: bool) {
        self.config.ordered_compositing_enabled = enabled;
    }

    /// Register a strategy for compositing-change notifications
    pub fn register_strategy(&mut self, strategy: Box<dyn RenderStrategy>) {
        self.strategies.push(strategy);
    }

    /// Decide whether the frame composites.
    ///
    /// `total_visible_bytes` must be computed after representations were
    /// updated for the frame's LOD decision: the decision has to reflect
    /// what will actually be drawn. An empty aggregate always renders
    /// locally.
    pub fn decide(&mut self, total_visible_bytes: u64, kind: RenderKind) -> bool {
        let megabytes = total_visible_bytes as f64 / BYTES_PER_MEGABYTE;
        let decision =
            total_visible_bytes > 0 && megabytes >= self.config.composite_threshold_mb;

        if decision != self.state.use_compositing {
            for strategy in &mut self.strategies {
                tracing::debug!(
                    strategy = strategy.name(),
                    use_compositing = decision,
                    "invalidating strategy pipelines"
                );
                strategy.invalidate_compositing(decision);
            }
        }

        self.state.use_compositing = decision;
        self.state.last_decision = decision;
        self.stats.frames += 1;
        if decision {
            self.stats.composited_frames += 1;
        }
        tracing::debug!(
            megabytes,
            threshold = self.config.composite_threshold_mb,
            ?kind,
            decision,
            "compositing decision"
        );
        decision
    }

    /// Reduction factor the given render kind will use.
    ///
    /// Still renders always run at factor 1; interactive renders trade
    /// resolution for frame rate only when the frame composites.
    pub fn reduction_for(&self, kind: RenderKind) -> u32 {
        match kind {
            RenderKind::Still => 1,
            RenderKind::Interactive if self.state.use_compositing => {
                self.config.interactive_reduction_factor
            }
            RenderKind::Interactive => 1,
        }
    }

    /// Record the reduction factor for the frame in the broadcast state
    pub fn apply_reduction(&mut self, kind: RenderKind) {
        self.state.image_reduction_factor = self.reduction_for(kind);
    }

    /// Broadcast the current state to every process.
    pub fn push_state(&self, transport: &mut dyn Transport) -> TransportResult<()> {
        transport.push_property(COMPOSITING_OBJECT, STATE_PROPERTY, json!(self.state))
    }
}

impl Default for CompositingEngine {
    fn default() -> Self {
        Self::new(CompositingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingStrategy {
        invalidations: std::rc::Rc<std::cell::Cell<u32>>,
    }

    impl RenderStrategy for CountingStrategy {
        fn name(&self) -> &str {
            "counting"
        }

        fn invalidate_compositing(&mut self, _use_compositing: bool) {
            self.invalidations.set(self.invalidations.get() + 1);
        }
    }

    #[test]
    fn test_decision_boundary() {
        let mut engine = CompositingEngine::default();
        engine.set_composite_threshold_mb(20.0).unwrap();

        // Below the threshold: local render.
        assert!(!engine.decide(19_999_999, RenderKind::Still));
        // Exactly at the threshold: composite.
        assert!(engine.decide(20_000_000, RenderKind::Still));
        // Above: composite.
        assert!(engine.decide(25_000_000, RenderKind::Still));
    }

    #[test]
    fn test_empty_aggregate_renders_locally() {
        let mut engine = CompositingEngine::default();
        engine.set_composite_threshold_mb(0.0).unwrap();
        assert!(!engine.decide(0, RenderKind::Interactive));
    }

    #[test]
    fn test_huge_threshold_disables_compositing() {
        let mut engine = CompositingEngine::default();
        engine.set_composite_threshold_mb(1e12).unwrap();
        // 100 TB displayed still renders locally.
        assert!(!engine.decide(100_000_000_000_000, RenderKind::Still));
    }

    #[test]
    fn test_reduction_factor_rules() {
        let mut engine = CompositingEngine::default();
        engine.set_interactive_reduction_factor(4).unwrap();

        engine.decide(25_000_000, RenderKind::Interactive);
        assert!(engine.state().use_compositing);
        assert_eq!(engine.reduction_for(RenderKind::Interactive), 4);
        assert_eq!(engine.reduction_for(RenderKind::Still), 1);

        engine.decide(1_000, RenderKind::Interactive);
        assert_eq!(engine.reduction_for(RenderKind::Interactive), 1);
    }

    #[test]
    fn test_apply_reduction_updates_state() {
        let mut engine = CompositingEngine::default();
        engine.set_interactive_reduction_factor(3).unwrap();
        engine.decide(25_000_000, RenderKind::Interactive);

        engine.apply_reduction(RenderKind::Interactive);
        assert_eq!(engine.state().image_reduction_factor, 3);

        engine.apply_reduction(RenderKind::Still);
        assert_eq!(engine.state().image_reduction_factor, 1);
    }

    #[test]
    fn test_strategies_notified_on_flip_only() {
        let invalidations = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut engine = CompositingEngine::default();
        engine.register_strategy(Box::new(CountingStrategy {
            invalidations: invalidations.clone(),
        }));

        engine.decide(25_000_000, RenderKind::Still); // off -> on
        engine.decide(30_000_000, RenderKind::Still); // unchanged
        engine.decide(1_000, RenderKind::Still); // on -> off
        assert_eq!(invalidations.get(), 2);
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let mut engine = CompositingEngine::default();
        assert!(engine.set_composite_threshold_mb(-1.0).is_err());
        assert!(engine.set_composite_threshold_mb(f64::NAN).is_err());
        assert!(engine.set_interactive_reduction_factor(0).is_err());
    }

    #[test]
    fn test_stats_track_decisions() {
        let mut engine = CompositingEngine::default();
        engine.decide(25_000_000, RenderKind::Still);
        engine.decide(100, RenderKind::Still);
        let stats = engine.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.composited_frames, 1);
    }
}
