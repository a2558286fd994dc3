//! Compute kernels: one WGSL entry point plus the pipeline state to run it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use wgpu::{BindGroupLayout, ComputePipeline};

use super::context::GpuContext;
use super::shader::ShaderLibrary;
use super::textures::Image;
use crate::params::{BindingDecl, ResourceKind, TEXTURE_GROUP, VALUE_GROUP};

/// Errors raised while building or dispatching a kernel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("Entry point '{entry_point}' not found in shader '{library}'")]
    MissingEntryPoint { library: String, entry_point: String },
    #[error("Entry point '{0}' is not a compute shader")]
    NotCompute(String),
    #[error("Kernel '{0}' declares no destination texture")]
    NoDestination(String),
    #[error("Shader binding @group({group}) @binding({binding}) does not match the parameter set")]
    SlotMismatch { group: u32, binding: u32 },
    #[error("Binding @group({group}) @binding({binding}) was not bound before dispatch")]
    UnboundSlot { group: u32, binding: u32 },
}

/// Number of workgroups needed so every pixel is covered.
pub fn workgroup_grid(width: u32, height: u32, workgroup_size: [u32; 3]) -> [u32; 3] {
    [
        width.div_ceil(workgroup_size[0].max(1)),
        height.div_ceil(workgroup_size[1].max(1)),
        1,
    ]
}

/// Resources handed to a kernel for one dispatch.
///
/// Filled by the `configure` callback of [`Kernel::dispatch`].
#[derive(Default)]
pub struct Bindings<'a> {
    entries: BTreeMap<(u32, u32), wgpu::BindingResource<'a>>,
}

impl<'a> Bindings<'a> {
    /// Bind an image to a texture slot (bind group 0).
    pub fn texture(&mut self, binding: u32, image: &'a Image) -> &mut Self {
        self.entries.insert(
            (TEXTURE_GROUP, binding),
            wgpu::BindingResource::TextureView(image.view()),
        );
        self
    }

    /// Bind a buffer to a value slot (bind group 1).
    pub fn buffer(&mut self, binding: u32, buffer: &'a wgpu::Buffer) -> &mut Self {
        self.entries
            .insert((VALUE_GROUP, binding), buffer.as_entire_binding());
        self
    }

    fn take(&mut self, group: u32, binding: u32) -> Result<wgpu::BindingResource<'a>, KernelError> {
        self.entries
            .remove(&(group, binding))
            .ok_or(KernelError::UnboundSlot { group, binding })
    }
}

/// A compiled compute entry point and its bind group layouts.
pub struct Kernel {
    name: String,
    pipeline: ComputePipeline,
    layouts: Vec<(u32, BindGroupLayout, Vec<u32>)>,
    workgroup_size: [u32; 3],
    dispatch_count: AtomicU64,
    device: std::sync::Arc<wgpu::Device>,
}

impl Kernel {
    /// Build the pipeline for `entry_point` with layouts derived from `layout`.
    ///
    /// Fails when the entry point is missing or is not a compute stage, and when
    /// the shader reads a binding the parameter set does not declare.
    pub fn new(
        ctx: &GpuContext,
        library: &ShaderLibrary,
        entry_point: &str,
        layout: &[BindingDecl],
    ) -> Result<Self, KernelError> {
        let info = library
            .entry_point(entry_point)
            .ok_or_else(|| KernelError::MissingEntryPoint {
                library: library.label().to_string(),
                entry_point: entry_point.to_string(),
            })?;
        if !info.is_compute {
            return Err(KernelError::NotCompute(entry_point.to_string()));
        }

        let writes_destination = layout
            .iter()
            .any(|d| d.group == TEXTURE_GROUP && d.kind == ResourceKind::WriteTexture);
        if !writes_destination {
            return Err(KernelError::NoDestination(entry_point.to_string()));
        }

        for binding in library.bindings() {
            let declared = layout.iter().any(|d| {
                d.group == binding.group
                    && d.binding == binding.binding
                    && Some(d.kind) == binding.kind
            });
            if !declared {
                return Err(KernelError::SlotMismatch {
                    group: binding.group,
                    binding: binding.binding,
                });
            }
        }

        let device = &ctx.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(library.label()),
            source: wgpu::ShaderSource::Wgsl(library.source().into()),
        });

        let layouts: Vec<(u32, BindGroupLayout, Vec<u32>)> = [TEXTURE_GROUP, VALUE_GROUP]
            .into_iter()
            .filter_map(|group| {
                let decls: Vec<&BindingDecl> = layout.iter().filter(|d| d.group == group).collect();
                if decls.is_empty() {
                    return None;
                }
                let entries: Vec<wgpu::BindGroupLayoutEntry> =
                    decls.iter().map(|d| layout_entry(d)).collect();
                let bind_group_layout =
                    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(&format!("{}_group{}_layout", entry_point, group)),
                        entries: &entries,
                    });
                Some((group, bind_group_layout, decls.iter().map(|d| d.binding).collect()))
            })
            .collect();

        let group_layouts: Vec<&BindGroupLayout> = layouts.iter().map(|(_, l, _)| l).collect();

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{}_pipeline_layout", entry_point)),
            bind_group_layouts: &group_layouts,
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("{}_pipeline", entry_point)),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        log::debug!(
            "Built kernel '{}' with workgroup size {:?}",
            entry_point,
            info.workgroup_size
        );

        Ok(Self {
            name: entry_point.to_string(),
            pipeline,
            layouts,
            workgroup_size: info.workgroup_size,
            dispatch_count: AtomicU64::new(0),
            device: ctx.device.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    /// Number of dispatches recorded so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count.load(Ordering::Relaxed)
    }

    /// Record one dispatch covering every pixel of `destination`.
    ///
    /// `configure` binds all slots before the pass is recorded. Nothing is
    /// recorded if a declared slot stays unbound.
    pub fn dispatch<'a>(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        destination: &Image,
        configure: impl FnOnce(&mut Bindings<'a>),
    ) -> Result<(), KernelError> {
        let mut bindings = Bindings::default();
        configure(&mut bindings);

        let mut bind_groups = Vec::with_capacity(self.layouts.len());
        for (group, layout, slots) in &self.layouts {
            let mut entries = Vec::with_capacity(slots.len());
            for &binding in slots {
                entries.push(wgpu::BindGroupEntry {
                    binding,
                    resource: bindings.take(*group, binding)?,
                });
            }
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{}_group{}", self.name, group)),
                layout,
                entries: &entries,
            });
            bind_groups.push((*group, bind_group));
        }

        let [x, y, z] = workgroup_grid(destination.width(), destination.height(), self.workgroup_size);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            for (group, bind_group) in &bind_groups {
                pass.set_bind_group(*group, bind_group, &[]);
            }
            pass.dispatch_workgroups(x, y, z);
        }

        self.dispatch_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn layout_entry(decl: &BindingDecl) -> wgpu::BindGroupLayoutEntry {
    let ty = match decl.kind {
        ResourceKind::ReadTexture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        ResourceKind::WriteTexture => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: wgpu::TextureFormat::Rgba8Unorm,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        ResourceKind::Uniform => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        ResourceKind::Storage => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    };
    wgpu::BindGroupLayoutEntry {
        binding: decl.binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_rounds_up() {
        assert_eq!(workgroup_grid(1920, 1080, [16, 16, 1]), [120, 68, 1]);
        assert_eq!(workgroup_grid(17, 1, [16, 16, 1]), [2, 1, 1]);
        assert_eq!(workgroup_grid(16, 16, [16, 16, 1]), [1, 1, 1]);
    }

    #[test]
    fn test_grid_covers_every_pixel() {
        for (w, h) in [(1, 1), (33, 7), (640, 481)] {
            let [gx, gy, _] = workgroup_grid(w, h, [8, 8, 1]);
            assert!(gx * 8 >= w && (gx - 1) * 8 < w);
            assert!(gy * 8 >= h && (gy - 1) * 8 < h);
        }
    }

    #[test]
    fn test_unbound_slot_reported() {
        let mut bindings = Bindings::default();
        assert_eq!(
            bindings.take(0, 3).err(),
            Some(KernelError::UnboundSlot { group: 0, binding: 3 })
        );
    }
}
