//! Filters: named GPU effects applied to every camera frame.
//!
//! Every filter owns one [`FilterStage`] (kernel plus parameter set) and
//! exposes the same capability set through the [`Filter`] trait:
//! - Passthrough: identity, never dispatched
//! - Invert: inverts colour channels
//! - Feedback: blends the previous output into the current frame
//! - Spectrum: draws audio spectrum bars (audio-reactive)

mod feedback;
mod invert;
mod passthrough;
mod registry;
mod spectrum;
mod stage;
pub mod transition;

pub use feedback::FeedbackFilter;
pub use invert::InvertFilter;
pub use passthrough::PassthroughFilter;
pub use registry::{create_filter, FilterRegistry};
pub use spectrum::SpectrumFilter;
pub use stage::{FilterStage, StageInputs};
pub use transition::{active_transition, transitions_duration, Transition, TransitionKind};

use std::sync::Arc;

use crate::gpu::{Image, KernelError, ShaderError};
use crate::params::ParameterError;

/// Errors raised while building or encoding a filter.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),
    #[error("Filter '{name}' wants audio = {wants_audio} but has {slots} audio slot(s)")]
    AudioSlotMismatch {
        name: String,
        wants_audio: bool,
        slots: usize,
    },
}

/// Who wrote a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterAuthor {
    ConnorBell,
    InvasiveCode,
    ColinDuffy,
    ColinDuffyAndInvasive,
}

impl FilterAuthor {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ConnorBell => "Connor Bell",
            Self::InvasiveCode => "Invasive Code",
            Self::ColinDuffy => "Colin Duffy",
            Self::ColinDuffyAndInvasive => "Colin Duffy & Invasive Code",
        }
    }
}

/// Whether a filter is currently applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Active,
}

/// Supplies the image a feedback filter reads as its previous frame.
pub trait LastOutputProvider {
    fn provide_last_output(&self, filter: &str) -> Arc<Image>;
}

/// Built-in filter kinds, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Passthrough,
    Invert,
    Feedback,
    Spectrum,
}

impl FilterKind {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "passthrough" | "pass-through" | "none" | "identity" => Some(Self::Passthrough),
            "invert" => Some(Self::Invert),
            "feedback" => Some(Self::Feedback),
            "spectrum" | "audio" => Some(Self::Spectrum),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Invert => "invert",
            Self::Feedback => "feedback",
            Self::Spectrum => "spectrum",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Passthrough => "Camera image, unmodified",
            Self::Invert => "Inverts every colour channel",
            Self::Feedback => "Trails of previous frames drift toward the touch point",
            Self::Spectrum => "Live audio spectrum drawn over the camera image",
        }
    }

    pub fn all() -> &'static [Self] {
        &[Self::Passthrough, Self::Invert, Self::Feedback, Self::Spectrum]
    }
}

/// The capability set every filter exposes.
///
/// Implementors only provide identity and their stage; the encode sequence
/// and parameter updates are shared.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn author(&self) -> FilterAuthor;

    fn description(&self) -> &str;

    fn stage(&self) -> &FilterStage;

    fn wants_audio(&self) -> bool {
        self.stage().wants_audio()
    }

    /// Identity filters let the frame processor skip the dispatch entirely.
    fn is_passthrough(&self) -> bool {
        false
    }

    fn state(&self) -> LifecycleState {
        self.stage().state()
    }

    fn start(&self) {
        self.stage().set_state(LifecycleState::Active);
    }

    fn stop(&self) {
        self.stage().set_state(LifecycleState::Idle);
    }

    fn pre_render(&self, _width: u32, _height: u32) {}

    fn post_render(&self) {}

    /// Record this filter's dispatch from `source` into `destination`.
    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &Arc<Image>,
        destination: &Arc<Image>,
        time: f32,
        last_output: &dyn LastOutputProvider,
    ) -> Result<(), FilterError> {
        self.pre_render(destination.width(), destination.height());
        self.stage().encode(
            encoder,
            self.name(),
            StageInputs {
                source,
                destination,
                second_source: None,
                time,
                progress: None,
            },
            last_output,
        )?;
        self.post_render();
        Ok(())
    }

    /// Copy a spectrum into the audio slot; read at the next encode.
    fn update_audio_params(&self, spectrum: &[f32]) {
        self.stage().update_audio(spectrum);
    }

    /// Map a normalized touch point into the user-control slot.
    fn update_user_control(&self, point: [f32; 2]) {
        self.stage().update_user_control(point);
    }

    /// Number of kernel dispatches recorded for this filter.
    fn dispatch_count(&self) -> u64 {
        self.stage().dispatch_count()
    }
}

impl std::fmt::Debug for dyn Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
