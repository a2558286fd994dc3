//! WGSL shader libraries, parsed and validated with naga before any pipeline is built.

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::params::ResourceKind;

/// Errors raised while loading a shader library.
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("Failed to parse shader '{label}': {message}")]
    Parse { label: String, message: String },
    #[error("Shader '{label}' failed validation: {message}")]
    Validation { label: String, message: String },
}

/// Compute entry point found by reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointInfo {
    pub name: String,
    pub is_compute: bool,
    pub workgroup_size: [u32; 3],
}

/// Resource binding declared by the shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBinding {
    pub group: u32,
    pub binding: u32,
    pub kind: Option<ResourceKind>,
}

/// A validated WGSL source plus the reflection data kernels need.
#[derive(Debug)]
pub struct ShaderLibrary {
    label: String,
    source: &'static str,
    entry_points: Vec<EntryPointInfo>,
    bindings: Vec<ShaderBinding>,
}

impl ShaderLibrary {
    /// Parse and validate a WGSL module.
    pub fn from_wgsl(label: &str, source: &'static str) -> Result<Self, ShaderError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse {
            label: label.to_string(),
            message: e.emit_to_string(source),
        })?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        validator
            .validate(&module)
            .map_err(|e| ShaderError::Validation {
                label: label.to_string(),
                message: format!("{:?}", e),
            })?;

        let entry_points = module
            .entry_points
            .iter()
            .map(|ep| EntryPointInfo {
                name: ep.name.clone(),
                is_compute: ep.stage == naga::ShaderStage::Compute,
                workgroup_size: ep.workgroup_size,
            })
            .collect();

        let bindings = module
            .global_variables
            .iter()
            .filter_map(|(_, var)| {
                let binding = var.binding.as_ref()?;
                Some(ShaderBinding {
                    group: binding.group,
                    binding: binding.binding,
                    kind: resource_kind(&module, var),
                })
            })
            .collect();

        Ok(Self {
            label: label.to_string(),
            source,
            entry_points,
            bindings,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPointInfo> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    pub fn entry_points(&self) -> &[EntryPointInfo] {
        &self.entry_points
    }

    pub fn bindings(&self) -> &[ShaderBinding] {
        &self.bindings
    }
}

fn resource_kind(module: &naga::Module, var: &naga::GlobalVariable) -> Option<ResourceKind> {
    match var.space {
        naga::AddressSpace::Uniform => Some(ResourceKind::Uniform),
        naga::AddressSpace::Storage { .. } => Some(ResourceKind::Storage),
        naga::AddressSpace::Handle => match module.types[var.ty].inner {
            naga::TypeInner::Image {
                class: naga::ImageClass::Storage { .. },
                ..
            } => Some(ResourceKind::WriteTexture),
            naga::TypeInner::Image {
                class: naga::ImageClass::Sampled { .. },
                ..
            } => Some(ResourceKind::ReadTexture),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var dst: texture_storage_2d<rgba8unorm, write>;
@group(1) @binding(0) var<uniform> time: f32;

@compute @workgroup_size(16, 8, 1)
fn tint(@builtin(global_invocation_id) gid: vec3<u32>) {
    let c = textureLoad(src, vec2<i32>(gid.xy), 0);
    textureStore(dst, vec2<i32>(gid.xy), c * time);
}
"#;

    #[test]
    fn test_reflects_entry_point_and_workgroup_size() {
        let library = ShaderLibrary::from_wgsl("tint", SHADER).unwrap();
        let ep = library.entry_point("tint").unwrap();
        assert!(ep.is_compute);
        assert_eq!(ep.workgroup_size, [16, 8, 1]);
        assert!(library.entry_point("missing").is_none());
    }

    #[test]
    fn test_reflects_binding_kinds() {
        let library = ShaderLibrary::from_wgsl("tint", SHADER).unwrap();
        let kinds: Vec<_> = library
            .bindings()
            .iter()
            .map(|b| (b.group, b.binding, b.kind))
            .collect();
        assert!(kinds.contains(&(0, 0, Some(ResourceKind::ReadTexture))));
        assert!(kinds.contains(&(0, 1, Some(ResourceKind::WriteTexture))));
        assert!(kinds.contains(&(1, 0, Some(ResourceKind::Uniform))));
    }

    #[test]
    fn test_parse_error_reported() {
        let result = ShaderLibrary::from_wgsl("broken", "fn oops( {");
        assert!(matches!(result, Err(ShaderError::Parse { .. })));
    }
}
