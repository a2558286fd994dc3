use super::{Filter, FilterAuthor, FilterError, FilterKind, FilterStage, LifecycleState};
use crate::gpu::{GpuContext, ShaderLibrary};
use crate::params::{Bounds2, ParameterSet, SlotRole};

const SHADER: &str = include_str!("../gpu/shaders/feedback.wgsl");

/// Default fraction of the previous frame carried into the next.
pub const DEFAULT_DECAY: f32 = 0.85;

/// Blends each frame with the previous output.
///
/// The previous output arrives through the [`LastOutputProvider`](super::LastOutputProvider)
/// passed to `encode`; before the first frame it is the blank placeholder.
pub struct FeedbackFilter {
    stage: FilterStage,
}

impl FeedbackFilter {
    pub fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        let library = ShaderLibrary::from_wgsl("feedback", SHADER)?;
        let params = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::Destination, 1)
            .texture(SlotRole::LastOutput, 2)
            .float(SlotRole::Time, 0, 0.0, None)
            .float(Self::decay_role(), 1, DEFAULT_DECAY, Some((0.0, 1.0)))
            .vec2(SlotRole::UserControl, 2, [0.0, 0.0], Bounds2::default())
            .build()?;
        let stage = FilterStage::new(
            ctx,
            FilterKind::Feedback.name(),
            &library,
            "feedback_kernel",
            params,
            false,
        )?;
        Ok(Self { stage })
    }

    pub fn decay_role() -> SlotRole {
        SlotRole::custom("decay")
    }

    pub fn decay(&self) -> f32 {
        self.stage
            .with_params(|p| p.float(&Self::decay_role()))
            .unwrap_or(DEFAULT_DECAY)
    }

    pub fn set_decay(&self, decay: f32) {
        self.stage.with_params(|p| {
            let _ = p.set_float(&Self::decay_role(), decay);
        });
    }
}

impl Filter for FeedbackFilter {
    fn name(&self) -> &str {
        FilterKind::Feedback.name()
    }

    fn author(&self) -> FilterAuthor {
        FilterAuthor::ConnorBell
    }

    fn description(&self) -> &str {
        FilterKind::Feedback.description()
    }

    fn stage(&self) -> &FilterStage {
        &self.stage
    }

    /// Every activation starts from a fresh trail.
    fn start(&self) {
        self.stage.with_params(|p| p.reset_values());
        self.stage.set_state(LifecycleState::Active);
    }
}
