//! A kernel bound to its parameter set and the GPU buffers backing value slots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{FilterError, LastOutputProvider, LifecycleState};
use crate::audio::SPECTRUM_LEN;
use crate::gpu::{GpuContext, Image, Kernel, KernelError, ShaderLibrary};
use crate::params::{ParameterError, ParameterSet, ResourceKind, SlotRole, VALUE_GROUP};

/// Per-encode inputs. Transitions fill the second source and progress.
pub struct StageInputs<'a> {
    pub source: &'a Arc<Image>,
    pub destination: &'a Arc<Image>,
    pub second_source: Option<&'a Arc<Image>>,
    pub time: f32,
    pub progress: Option<f32>,
}

/// Slot positions of the roles `encode` fills every frame.
#[derive(Debug, Clone, Copy)]
struct FrameSlots {
    source: usize,
    destination: usize,
    last_output: Option<usize>,
    second_source: Option<usize>,
    time: Option<usize>,
    progress: Option<usize>,
}

impl FrameSlots {
    fn resolve(params: &ParameterSet) -> Result<Self, ParameterError> {
        let required = |role: SlotRole| {
            params
                .texture_index(&role)
                .ok_or(ParameterError::UnknownSlot { kind: "texture", role })
        };
        Ok(Self {
            source: required(SlotRole::Source)?,
            destination: required(SlotRole::Destination)?,
            last_output: params.texture_index(&SlotRole::LastOutput),
            second_source: params.texture_index(&SlotRole::SecondSource),
            time: params.float_index(&SlotRole::Time),
            progress: params.float_index(&SlotRole::Progress),
        })
    }
}

/// Kernel, parameters and slot buffers shared by filters and transitions.
pub struct FilterStage {
    kernel: Kernel,
    params: Mutex<ParameterSet>,
    slots: FrameSlots,
    /// In the order of [`ParameterSet::uniform_values`].
    uniforms: Vec<(u32, wgpu::Buffer)>,
    audio: Option<(u32, wgpu::Buffer)>,
    wants_audio: bool,
    active: AtomicBool,
    queue: Arc<wgpu::Queue>,
}

impl FilterStage {
    /// Build the kernel and allocate one buffer per value slot.
    ///
    /// A filter that wants audio must declare exactly one audio slot, and one
    /// that does not must declare none.
    pub fn new(
        ctx: &GpuContext,
        name: &str,
        library: &ShaderLibrary,
        entry_point: &str,
        params: ParameterSet,
        wants_audio: bool,
    ) -> Result<Self, FilterError> {
        let audio_slots = usize::from(params.audio().is_some());
        if wants_audio != (audio_slots == 1) {
            return Err(FilterError::AudioSlotMismatch {
                name: name.to_string(),
                wants_audio,
                slots: audio_slots,
            });
        }

        let slots = FrameSlots::resolve(&params)?;
        let layout = params.binding_layout();
        let kernel = Kernel::new(ctx, library, entry_point, &layout)?;

        let uniforms = layout
            .iter()
            .filter(|d| d.group == VALUE_GROUP && d.kind == ResourceKind::Uniform)
            .map(|d| {
                let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{}_uniform{}", name, d.binding)),
                    size: 16,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                (d.binding, buffer)
            })
            .collect();

        // Zero-initialized at creation, so a dispatch before any audio reads silence.
        let audio = params.audio().map(|slot| {
            let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{}_spectrum", name)),
                size: (SPECTRUM_LEN * std::mem::size_of::<f32>()) as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (slot.binding, buffer)
        });

        Ok(Self {
            kernel,
            params: Mutex::new(params),
            slots,
            uniforms,
            audio,
            wants_audio,
            active: AtomicBool::new(false),
            queue: ctx.queue.clone(),
        })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn wants_audio(&self) -> bool {
        self.wants_audio
    }

    pub fn state(&self) -> LifecycleState {
        if self.active.load(Ordering::Acquire) {
            LifecycleState::Active
        } else {
            LifecycleState::Idle
        }
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.active
            .store(state == LifecycleState::Active, Ordering::Release);
    }

    pub fn dispatch_count(&self) -> u64 {
        self.kernel.dispatch_count()
    }

    /// Snapshot of the current parameter values and bound textures.
    pub fn params(&self) -> ParameterSet {
        self.params.lock().clone()
    }

    /// Run `f` with exclusive access to the parameter set.
    pub fn with_params<R>(&self, f: impl FnOnce(&mut ParameterSet) -> R) -> R {
        f(&mut self.params.lock())
    }

    pub fn update_audio(&self, spectrum: &[f32]) {
        self.params.lock().update_audio(spectrum);
    }

    pub fn update_user_control(&self, point: [f32; 2]) {
        self.params.lock().update_user_control(point);
    }

    /// Bind every slot and record one dispatch.
    ///
    /// Source, destination, last output and second source come from the
    /// caller; other textures keep whatever was bound last.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        owner: &str,
        inputs: StageInputs<'_>,
        last_output: &dyn LastOutputProvider,
    ) -> Result<(), FilterError> {
        let (textures, uniform_values, spectrum) = {
            let mut params = self.params.lock();

            let slots = self.slots;
            params.bind_texture_at(slots.source, inputs.source.clone());
            params.bind_texture_at(slots.destination, inputs.destination.clone());
            if let Some(index) = slots.last_output {
                params.bind_texture_at(index, last_output.provide_last_output(owner));
            }
            if let Some(second) = inputs.second_source {
                let index = slots.second_source.ok_or(ParameterError::UnknownSlot {
                    kind: "texture",
                    role: SlotRole::SecondSource,
                })?;
                params.bind_texture_at(index, second.clone());
            }
            if let Some(index) = slots.time {
                params.set_float_at(index, inputs.time);
            }
            if let Some(progress) = inputs.progress {
                let index = slots.progress.ok_or(ParameterError::UnknownSlot {
                    kind: "float",
                    role: SlotRole::Progress,
                })?;
                params.set_float_at(index, progress);
            }

            let mut textures = Vec::with_capacity(params.textures().len());
            for slot in params.textures() {
                let image = slot.image().cloned().ok_or(KernelError::UnboundSlot {
                    group: crate::params::TEXTURE_GROUP,
                    binding: slot.binding,
                })?;
                textures.push((slot.binding, image));
            }
            let spectrum = params.audio().map(|slot| *slot.spectrum());
            (textures, params.uniform_values(), spectrum)
        };

        for ((binding, buffer), (value_binding, bytes)) in self.uniforms.iter().zip(&uniform_values) {
            debug_assert_eq!(binding, value_binding);
            self.queue.write_buffer(buffer, 0, bytes);
        }
        if let (Some((_, buffer)), Some(spectrum)) = (&self.audio, spectrum) {
            self.queue
                .write_buffer(buffer, 0, bytemuck::cast_slice(&spectrum));
        }

        self.kernel.dispatch(encoder, inputs.destination, |b| {
            for (binding, image) in &textures {
                b.texture(*binding, image);
            }
            for (binding, buffer) in &self.uniforms {
                b.buffer(*binding, buffer);
            }
            if let Some((binding, buffer)) = &self.audio {
                b.buffer(*binding, buffer);
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_slots_resolve_by_position() {
        let params = ParameterSet::builder()
            .texture(SlotRole::Destination, 1)
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::SecondSource, 2)
            .float(SlotRole::Time, 0, 0.0, None)
            .float(SlotRole::Progress, 1, 0.0, Some((0.0, 1.0)))
            .build()
            .unwrap();
        let slots = FrameSlots::resolve(&params).unwrap();
        assert_eq!((slots.source, slots.destination), (1, 0));
        assert_eq!(slots.second_source, Some(2));
        assert_eq!(slots.last_output, None);
        assert_eq!((slots.time, slots.progress), (Some(0), Some(1)));
    }

    #[test]
    fn test_frame_slots_need_source_and_destination() {
        let params = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .build()
            .unwrap();
        assert_eq!(
            FrameSlots::resolve(&params).unwrap_err(),
            ParameterError::UnknownSlot {
                kind: "texture",
                role: SlotRole::Destination
            }
        );
    }
}
