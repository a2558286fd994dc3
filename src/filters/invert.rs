use super::{Filter, FilterAuthor, FilterError, FilterKind, FilterStage};
use crate::gpu::{GpuContext, ShaderLibrary};
use crate::params::{ParameterSet, SlotRole};

const SHADER: &str = include_str!("../gpu/shaders/invert.wgsl");

/// Inverts the colour channels, keeping alpha.
pub struct InvertFilter {
    stage: FilterStage,
}

impl InvertFilter {
    pub fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        let library = ShaderLibrary::from_wgsl("invert", SHADER)?;
        let params = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::Destination, 1)
            .build()?;
        let stage = FilterStage::new(
            ctx,
            FilterKind::Invert.name(),
            &library,
            "invert_kernel",
            params,
            false,
        )?;
        Ok(Self { stage })
    }
}

impl Filter for InvertFilter {
    fn name(&self) -> &str {
        FilterKind::Invert.name()
    }

    fn author(&self) -> FilterAuthor {
        FilterAuthor::ConnorBell
    }

    fn description(&self) -> &str {
        FilterKind::Invert.description()
    }

    fn stage(&self) -> &FilterStage {
        &self.stage
    }
}
