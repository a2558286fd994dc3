//! Timed two-source blends between clips.

use std::sync::Arc;

use super::{FilterError, FilterStage, LastOutputProvider, StageInputs};
use crate::gpu::{GpuContext, Image, ShaderLibrary};
use crate::params::{ParameterSet, SlotRole};

const CROSSFADE_SHADER: &str = include_str!("../gpu/shaders/crossfade.wgsl");
const WIPE_SHADER: &str = include_str!("../gpu/shaders/wipe.wgsl");

/// Longest window a transition may span, in seconds.
pub const MAXIMUM_DURATION: f64 = 0.5;

/// Built-in blend kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Crossfade,
    Wipe,
}

impl TransitionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Crossfade => "crossfade",
            Self::Wipe => "wipe",
        }
    }

    fn shader(&self) -> (&'static str, &'static str) {
        match self {
            Self::Crossfade => (CROSSFADE_SHADER, "crossfade_transition"),
            Self::Wipe => (WIPE_SHADER, "wipe_transition"),
        }
    }
}

/// A blend from clip `start_clip` into clip `end_clip` over `[start_time, end_time)`.
pub struct Transition {
    name: String,
    kind: TransitionKind,
    stage: FilterStage,
    pub start_time: f64,
    pub end_time: f64,
    pub start_clip: usize,
    pub end_clip: usize,
}

impl Transition {
    /// Build a transition. Windows longer than [`MAXIMUM_DURATION`] are shortened.
    pub fn new(
        ctx: &GpuContext,
        name: impl Into<String>,
        kind: TransitionKind,
        start_time: f64,
        end_time: f64,
        clips: (usize, usize),
    ) -> Result<Self, FilterError> {
        let name = name.into();
        let (source, entry_point) = kind.shader();
        let library = ShaderLibrary::from_wgsl(kind.name(), source)?;
        let params = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::Destination, 1)
            .texture(SlotRole::SecondSource, 2)
            .float(SlotRole::Time, 0, 0.0, None)
            .float(SlotRole::Progress, 1, 0.0, Some((0.0, 1.0)))
            .build()?;
        let stage = FilterStage::new(ctx, &name, &library, entry_point, params, false)?;

        let end_time = end_time.clamp(start_time, start_time + MAXIMUM_DURATION);
        Ok(Self {
            name,
            kind,
            stage,
            start_time,
            end_time,
            start_clip: clips.0,
            end_clip: clips.1,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn stage(&self) -> &FilterStage {
        &self.stage
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn is_active(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time
    }

    /// Fraction of the window elapsed at `time`, clamped to [0, 1].
    pub fn progress_at(&self, time: f64) -> f32 {
        progress(self.start_time, self.end_time, time)
    }

    /// Record the blend of `outgoing` into `incoming` at `time`.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        outgoing: &Arc<Image>,
        incoming: &Arc<Image>,
        destination: &Arc<Image>,
        time: f64,
        last_output: &dyn LastOutputProvider,
    ) -> Result<(), FilterError> {
        self.stage.encode(
            encoder,
            &self.name,
            StageInputs {
                source: outgoing,
                destination,
                second_source: Some(incoming),
                time: time as f32,
                progress: Some(self.progress_at(time)),
            },
            last_output,
        )
    }
}

impl PartialEq for Transition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .finish()
    }
}

fn progress(start: f64, end: f64, time: f64) -> f32 {
    let duration = end - start;
    if duration <= 0.0 {
        return if time >= end { 1.0 } else { 0.0 };
    }
    ((time - start) / duration).clamp(0.0, 1.0) as f32
}

/// Total time spent in transitions.
pub fn transitions_duration(transitions: &[Transition]) -> f64 {
    transitions.iter().map(Transition::duration).sum()
}

/// The transition whose window contains `time`, if any.
pub fn active_transition(transitions: &[Transition], time: f64) -> Option<&Transition> {
    transitions.iter().find(|t| t.is_active(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_clamped() {
        assert_eq!(progress(1.0, 1.5, 0.0), 0.0);
        assert_eq!(progress(1.0, 1.5, 1.25), 0.5);
        assert_eq!(progress(1.0, 1.5, 9.0), 1.0);
    }

    #[test]
    fn test_zero_length_window() {
        assert_eq!(progress(2.0, 2.0, 1.9), 0.0);
        assert_eq!(progress(2.0, 2.0, 2.0), 1.0);
    }

    #[tokio::test]
    async fn test_transition_window_and_equality() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };
        let a = Transition::new(&ctx, "cut-1", TransitionKind::Crossfade, 1.0, 3.0, (0, 1)).unwrap();
        let b = Transition::new(&ctx, "cut-1", TransitionKind::Wipe, 5.0, 5.25, (1, 2)).unwrap();
        let c = Transition::new(&ctx, "cut-2", TransitionKind::Wipe, 5.0, 5.25, (1, 2)).unwrap();

        assert_eq!(a.duration(), MAXIMUM_DURATION);
        assert_eq!(a, b);
        assert_ne!(b, c);

        let list = vec![a, c];
        assert!((transitions_duration(&list) - 0.75).abs() < 1e-9);
        assert_eq!(active_transition(&list, 1.2).map(|t| t.name()), Some("cut-1"));
        assert_eq!(active_transition(&list, 5.25).map(|t| t.name()), None);
        assert_eq!(active_transition(&list, 5.1).map(|t| t.name()), Some("cut-2"));
    }
}
