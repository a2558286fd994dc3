use super::{Filter, FilterAuthor, FilterError, FilterKind, FilterStage};
use crate::gpu::{GpuContext, ShaderLibrary};
use crate::params::{ParameterSet, SlotRole};

const SHADER: &str = include_str!("../gpu/shaders/passthrough.wgsl");

/// The identity filter. The frame processor returns the converted camera
/// image directly, so its kernel only runs when encoded explicitly.
pub struct PassthroughFilter {
    stage: FilterStage,
}

impl PassthroughFilter {
    pub fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        let library = ShaderLibrary::from_wgsl("passthrough", SHADER)?;
        let params = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::Destination, 1)
            .build()?;
        let stage = FilterStage::new(
            ctx,
            FilterKind::Passthrough.name(),
            &library,
            "passthrough_kernel",
            params,
            false,
        )?;
        Ok(Self { stage })
    }
}

impl Filter for PassthroughFilter {
    fn name(&self) -> &str {
        FilterKind::Passthrough.name()
    }

    fn author(&self) -> FilterAuthor {
        FilterAuthor::InvasiveCode
    }

    fn description(&self) -> &str {
        FilterKind::Passthrough.description()
    }

    fn stage(&self) -> &FilterStage {
        &self.stage
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}
