use super::{Filter, FilterAuthor, FilterError, FilterKind, FilterStage};
use crate::audio::SPECTRUM_LEN;
use crate::gpu::{GpuContext, ShaderLibrary};
use crate::params::{Bounds2, ParameterSet, SlotRole};

const SHADER: &str = include_str!("../gpu/shaders/spectrum.wgsl");

pub const DEFAULT_BANDS: i32 = 32;

/// Draws the live audio spectrum as bars over the camera image.
pub struct SpectrumFilter {
    stage: FilterStage,
}

impl SpectrumFilter {
    pub fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        let library = ShaderLibrary::from_wgsl("spectrum", SHADER)?;
        let params = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::Destination, 1)
            .float(SlotRole::Time, 0, 0.0, None)
            .vec2(SlotRole::UserControl, 1, [0.0, -1.0], Bounds2::default())
            .int(Self::bands_role(), 2, DEFAULT_BANDS)
            .audio(3)
            .build()?;
        let stage = FilterStage::new(
            ctx,
            FilterKind::Spectrum.name(),
            &library,
            "spectrum_kernel",
            params,
            true,
        )?;
        Ok(Self { stage })
    }

    pub fn bands_role() -> SlotRole {
        SlotRole::custom("bands")
    }

    /// Number of bars, clamped to 1..=128.
    pub fn set_bands(&self, bands: i32) {
        let bands = bands.clamp(1, SPECTRUM_LEN as i32);
        self.stage.with_params(|p| {
            let _ = p.set_int(&Self::bands_role(), bands);
        });
    }
}

impl Filter for SpectrumFilter {
    fn name(&self) -> &str {
        FilterKind::Spectrum.name()
    }

    fn author(&self) -> FilterAuthor {
        FilterAuthor::InvasiveCode
    }

    fn description(&self) -> &str {
        FilterKind::Spectrum.description()
    }

    fn stage(&self) -> &FilterStage {
        &self.stage
    }
}
