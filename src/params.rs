//! Typed shader inputs bound to a kernel.
//!
//! A [`ParameterSet`] holds every slot a kernel reads: textures in bind group 0
//! and value buffers (float, int, vec2, audio spectrum) in bind group 1. Slots
//! are addressed by [`SlotRole`], resolved once when the set is built.

use std::collections::HashSet;
use std::sync::Arc;

use crate::audio::SPECTRUM_LEN;
use crate::gpu::Image;

/// Bind group holding texture slots.
pub const TEXTURE_GROUP: u32 = 0;
/// Bind group holding float, int, vec2 and audio slots.
pub const VALUE_GROUP: u32 = 1;

/// Errors raised while building or updating a parameter set.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("Binding {binding} is used twice in bind group {group}")]
    DuplicateBinding { group: u32, binding: u32 },
    #[error("Slot role {0:?} is declared twice")]
    DuplicateRole(SlotRole),
    #[error("A parameter set holds at most one audio slot")]
    MultipleAudioSlots,
    #[error("No {kind} slot with role {role:?}")]
    UnknownSlot { kind: &'static str, role: SlotRole },
}

/// Well-known slot roles. Anything else is `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotRole {
    Source,
    Destination,
    LastOutput,
    Time,
    UserControl,
    SecondSource,
    Progress,
    Audio,
    Custom(String),
}

impl SlotRole {
    pub fn custom(name: impl Into<String>) -> Self {
        SlotRole::Custom(name.into())
    }
}

/// How a kernel accesses a texture slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureAccess {
    /// `texture_2d<f32>` read with `textureLoad`.
    Read,
    /// `texture_storage_2d<rgba8unorm, write>`.
    Write,
}

/// Shader resource type of one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ReadTexture,
    WriteTexture,
    Uniform,
    Storage,
}

/// One entry of the layout a kernel is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingDecl {
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

/// Axis-aligned rectangle a vec2 slot's value lives in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds2 {
    pub low: [f32; 2],
    pub high: [f32; 2],
}

impl Default for Bounds2 {
    fn default() -> Self {
        Self {
            low: [-1.0, -1.0],
            high: [1.0, 1.0],
        }
    }
}

impl Bounds2 {
    pub fn new(x: (f32, f32), y: (f32, f32)) -> Self {
        Self {
            low: [x.0, y.0],
            high: [x.1, y.1],
        }
    }

    /// Map a normalized point in [0,1]² into the rectangle, per axis.
    pub fn map(&self, input: [f32; 2]) -> [f32; 2] {
        [
            self.low[0] + (self.high[0] - self.low[0]) * input[0],
            self.low[1] + (self.high[1] - self.low[1]) * input[1],
        ]
    }

    pub fn midpoint(&self) -> [f32; 2] {
        self.map([0.5, 0.5])
    }
}

#[derive(Debug, Clone)]
pub struct TextureSlot {
    pub role: SlotRole,
    pub binding: u32,
    pub access: TextureAccess,
    image: Option<Arc<Image>>,
}

impl TextureSlot {
    /// The image bound by the most recent encode, if any.
    pub fn image(&self) -> Option<&Arc<Image>> {
        self.image.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatSlot {
    pub role: SlotRole,
    pub binding: u32,
    pub default: f32,
    pub range: Option<(f32, f32)>,
    value: f32,
}

impl FloatSlot {
    pub fn value(&self) -> f32 {
        self.value
    }

    fn set(&mut self, value: f32) {
        self.value = match self.range {
            Some((low, high)) => value.clamp(low, high),
            None => value,
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntSlot {
    pub role: SlotRole,
    pub binding: u32,
    pub default: i32,
    value: i32,
}

impl IntSlot {
    pub fn value(&self) -> i32 {
        self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vec2Slot {
    pub role: SlotRole,
    pub binding: u32,
    pub default: [f32; 2],
    pub bounds: Bounds2,
    value: [f32; 2],
}

impl Vec2Slot {
    pub fn value(&self) -> [f32; 2] {
        self.value
    }

    /// Set the value from a normalized point, mapped into `bounds`.
    pub fn update_with_point(&mut self, point: [f32; 2]) {
        self.value = self.bounds.map(point);
    }
}

/// Spectrum buffer bound as a read-only storage array. Starts zeroed.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSlot {
    pub binding: u32,
    spectrum: Box<[f32; SPECTRUM_LEN]>,
}

impl AudioSlot {
    pub fn spectrum(&self) -> &[f32; SPECTRUM_LEN] {
        &self.spectrum
    }
}

/// The full set of slots one kernel reads and writes.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    textures: Vec<TextureSlot>,
    floats: Vec<FloatSlot>,
    ints: Vec<IntSlot>,
    vec2s: Vec<Vec2Slot>,
    audio: Option<AudioSlot>,
}

impl ParameterSet {
    pub fn builder() -> ParameterSetBuilder {
        ParameterSetBuilder::default()
    }

    pub fn textures(&self) -> &[TextureSlot] {
        &self.textures
    }

    pub fn floats(&self) -> &[FloatSlot] {
        &self.floats
    }

    pub fn ints(&self) -> &[IntSlot] {
        &self.ints
    }

    pub fn vec2s(&self) -> &[Vec2Slot] {
        &self.vec2s
    }

    pub fn audio(&self) -> Option<&AudioSlot> {
        self.audio.as_ref()
    }

    pub fn texture(&self, role: &SlotRole) -> Option<&Arc<Image>> {
        self.textures
            .iter()
            .find(|s| &s.role == role)
            .and_then(|s| s.image.as_ref())
    }

    /// Position of the texture slot with `role`, stable for the life of the set.
    pub fn texture_index(&self, role: &SlotRole) -> Option<usize> {
        self.textures.iter().position(|s| &s.role == role)
    }

    /// Bind an image by slot position. It stays bound until replaced.
    ///
    /// Returns `false` for an out-of-range index.
    pub fn bind_texture_at(&mut self, index: usize, image: Arc<Image>) -> bool {
        match self.textures.get_mut(index) {
            Some(slot) => {
                slot.image = Some(image);
                true
            }
            None => false,
        }
    }

    pub fn float_index(&self, role: &SlotRole) -> Option<usize> {
        self.floats.iter().position(|s| &s.role == role)
    }

    /// Set a float by slot position, clamped like [`set_float`](Self::set_float).
    pub fn set_float_at(&mut self, index: usize, value: f32) -> bool {
        match self.floats.get_mut(index) {
            Some(slot) => {
                slot.set(value);
                true
            }
            None => false,
        }
    }

    pub fn float(&self, role: &SlotRole) -> Option<f32> {
        self.floats.iter().find(|s| &s.role == role).map(|s| s.value)
    }

    /// Set a float slot, clamped to its range when it has one.
    pub fn set_float(&mut self, role: &SlotRole, value: f32) -> Result<(), ParameterError> {
        let slot = self
            .floats
            .iter_mut()
            .find(|s| &s.role == role)
            .ok_or_else(|| ParameterError::UnknownSlot {
                kind: "float",
                role: role.clone(),
            })?;
        slot.set(value);
        Ok(())
    }

    pub fn int(&self, role: &SlotRole) -> Option<i32> {
        self.ints.iter().find(|s| &s.role == role).map(|s| s.value)
    }

    pub fn set_int(&mut self, role: &SlotRole, value: i32) -> Result<(), ParameterError> {
        let slot = self
            .ints
            .iter_mut()
            .find(|s| &s.role == role)
            .ok_or_else(|| ParameterError::UnknownSlot {
                kind: "int",
                role: role.clone(),
            })?;
        slot.value = value;
        Ok(())
    }

    pub fn vec2(&self, role: &SlotRole) -> Option<[f32; 2]> {
        self.vec2s.iter().find(|s| &s.role == role).map(|s| s.value)
    }

    pub fn vec2_slot(&self, role: &SlotRole) -> Option<&Vec2Slot> {
        self.vec2s.iter().find(|s| &s.role == role)
    }

    pub fn set_vec2(&mut self, role: &SlotRole, value: [f32; 2]) -> Result<(), ParameterError> {
        let slot = self
            .vec2s
            .iter_mut()
            .find(|s| &s.role == role)
            .ok_or_else(|| ParameterError::UnknownSlot {
                kind: "vec2",
                role: role.clone(),
            })?;
        slot.value = value;
        Ok(())
    }

    /// Map a normalized control point into the user-control slot.
    ///
    /// Returns `false` when the set has no such slot.
    pub fn update_user_control(&mut self, point: [f32; 2]) -> bool {
        match self
            .vec2s
            .iter_mut()
            .find(|s| s.role == SlotRole::UserControl)
        {
            Some(slot) => {
                slot.update_with_point(point);
                true
            }
            None => false,
        }
    }

    /// Copy a spectrum into the audio slot. Missing bins are zeroed.
    ///
    /// Returns `false` when the set has no audio slot.
    pub fn update_audio(&mut self, spectrum: &[f32]) -> bool {
        let Some(slot) = self.audio.as_mut() else {
            return false;
        };
        let n = spectrum.len().min(SPECTRUM_LEN);
        slot.spectrum[..n].copy_from_slice(&spectrum[..n]);
        slot.spectrum[n..].fill(0.0);
        true
    }

    /// Restore every value slot to its default. Texture bindings are kept.
    pub fn reset_values(&mut self) {
        for slot in &mut self.floats {
            slot.value = slot.default;
        }
        for slot in &mut self.ints {
            slot.value = slot.default;
        }
        for slot in &mut self.vec2s {
            slot.value = slot.default;
        }
    }

    /// Every binding the kernel has to declare, textures first.
    pub fn binding_layout(&self) -> Vec<BindingDecl> {
        let textures = self.textures.iter().map(|s| BindingDecl {
            group: TEXTURE_GROUP,
            binding: s.binding,
            kind: match s.access {
                TextureAccess::Read => ResourceKind::ReadTexture,
                TextureAccess::Write => ResourceKind::WriteTexture,
            },
        });
        let uniforms = self
            .floats
            .iter()
            .map(|s| s.binding)
            .chain(self.ints.iter().map(|s| s.binding))
            .chain(self.vec2s.iter().map(|s| s.binding))
            .map(|binding| BindingDecl {
                group: VALUE_GROUP,
                binding,
                kind: ResourceKind::Uniform,
            });
        let audio = self.audio.iter().map(|s| BindingDecl {
            group: VALUE_GROUP,
            binding: s.binding,
            kind: ResourceKind::Storage,
        });
        textures.chain(uniforms).chain(audio).collect()
    }

    /// Current value-slot contents as uniform bytes, keyed by binding.
    pub fn uniform_values(&self) -> Vec<(u32, Vec<u8>)> {
        let floats = self
            .floats
            .iter()
            .map(|s| (s.binding, bytemuck::bytes_of(&s.value).to_vec()));
        let ints = self
            .ints
            .iter()
            .map(|s| (s.binding, bytemuck::bytes_of(&s.value).to_vec()));
        let vec2s = self
            .vec2s
            .iter()
            .map(|s| (s.binding, bytemuck::cast_slice(&s.value).to_vec()));
        floats.chain(ints).chain(vec2s).collect()
    }
}

/// Builder that checks binding uniqueness before a set is handed to a kernel.
#[derive(Debug, Default)]
pub struct ParameterSetBuilder {
    set: ParameterSet,
    audio_slots: usize,
}

impl ParameterSetBuilder {
    /// Add a texture slot. The `Destination` role is written, every other role read.
    pub fn texture(mut self, role: SlotRole, binding: u32) -> Self {
        let access = if role == SlotRole::Destination {
            TextureAccess::Write
        } else {
            TextureAccess::Read
        };
        self.set.textures.push(TextureSlot {
            role,
            binding,
            access,
            image: None,
        });
        self
    }

    pub fn float(mut self, role: SlotRole, binding: u32, default: f32, range: Option<(f32, f32)>) -> Self {
        self.set.floats.push(FloatSlot {
            role,
            binding,
            default,
            range,
            value: default,
        });
        self
    }

    pub fn int(mut self, role: SlotRole, binding: u32, default: i32) -> Self {
        self.set.ints.push(IntSlot {
            role,
            binding,
            default,
            value: default,
        });
        self
    }

    pub fn vec2(mut self, role: SlotRole, binding: u32, default: [f32; 2], bounds: Bounds2) -> Self {
        self.set.vec2s.push(Vec2Slot {
            role,
            binding,
            default,
            bounds,
            value: default,
        });
        self
    }

    pub fn audio(mut self, binding: u32) -> Self {
        self.audio_slots += 1;
        self.set.audio = Some(AudioSlot {
            binding,
            spectrum: Box::new([0.0; SPECTRUM_LEN]),
        });
        self
    }

    pub fn build(self) -> Result<ParameterSet, ParameterError> {
        if self.audio_slots > 1 {
            return Err(ParameterError::MultipleAudioSlots);
        }

        let mut seen = HashSet::new();
        for decl in self.set.binding_layout() {
            if !seen.insert((decl.group, decl.binding)) {
                return Err(ParameterError::DuplicateBinding {
                    group: decl.group,
                    binding: decl.binding,
                });
            }
        }

        let set = &self.set;
        let roles = set
            .textures
            .iter()
            .map(|s| &s.role)
            .chain(set.floats.iter().map(|s| &s.role))
            .chain(set.ints.iter().map(|s| &s.role))
            .chain(set.vec2s.iter().map(|s| &s.role));
        let mut seen_roles = HashSet::new();
        for role in roles {
            if !seen_roles.insert(role) {
                return Err(ParameterError::DuplicateRole(role.clone()));
            }
        }

        Ok(self.set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback_like() -> ParameterSet {
        ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::Destination, 1)
            .texture(SlotRole::LastOutput, 2)
            .float(SlotRole::Time, 0, 0.0, None)
            .float(SlotRole::custom("decay"), 1, 0.85, Some((0.0, 1.0)))
            .vec2(SlotRole::UserControl, 2, [0.0, 0.0], Bounds2::default())
            .build()
            .unwrap()
    }

    #[test]
    fn test_user_control_maps_corners_and_midpoint() {
        let mut params = feedback_like();

        assert!(params.update_user_control([0.0, 0.0]));
        assert_eq!(params.vec2(&SlotRole::UserControl), Some([-1.0, -1.0]));

        params.update_user_control([1.0, 1.0]);
        assert_eq!(params.vec2(&SlotRole::UserControl), Some([1.0, 1.0]));

        params.update_user_control([0.5, 0.5]);
        assert_eq!(params.vec2(&SlotRole::UserControl), Some([0.0, 0.0]));
    }

    #[test]
    fn test_bounds_map_axes_independently() {
        let bounds = Bounds2::new((0.0, 10.0), (-4.0, 4.0));
        assert_eq!(bounds.map([0.0, 1.0]), [0.0, 4.0]);
        assert_eq!(bounds.map([1.0, 0.0]), [10.0, -4.0]);
        assert_eq!(bounds.midpoint(), [5.0, 0.0]);
    }

    #[test]
    fn test_duplicate_texture_binding_rejected() {
        let result = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::Destination, 0)
            .build();
        assert_eq!(
            result.unwrap_err(),
            ParameterError::DuplicateBinding {
                group: TEXTURE_GROUP,
                binding: 0
            }
        );
    }

    #[test]
    fn test_value_slots_share_a_namespace() {
        let result = ParameterSet::builder()
            .float(SlotRole::Time, 0, 0.0, None)
            .int(SlotRole::custom("bands"), 1, 8)
            .audio(0)
            .build();
        assert!(matches!(
            result,
            Err(ParameterError::DuplicateBinding { group: VALUE_GROUP, binding: 0 })
        ));
    }

    #[test]
    fn test_texture_and_value_bindings_do_not_collide() {
        let params = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .float(SlotRole::Time, 0, 0.0, None)
            .build();
        assert!(params.is_ok());
    }

    #[test]
    fn test_second_audio_slot_rejected() {
        let result = ParameterSet::builder().audio(0).audio(1).build();
        assert_eq!(result.unwrap_err(), ParameterError::MultipleAudioSlots);
    }

    #[test]
    fn test_audio_slot_starts_zeroed_and_pads_short_spectra() {
        let mut params = ParameterSet::builder().audio(3).build().unwrap();
        assert!(params.audio().unwrap().spectrum().iter().all(|&v| v == 0.0));

        params.update_audio(&[1.0; SPECTRUM_LEN]);
        params.update_audio(&[2.0, 3.0]);
        let spectrum = params.audio().unwrap().spectrum();
        assert_eq!(spectrum[0], 2.0);
        assert_eq!(spectrum[1], 3.0);
        assert!(spectrum[2..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_float_range_clamps_and_reset_restores_default() {
        let mut params = feedback_like();
        let decay = SlotRole::custom("decay");

        params.set_float(&decay, 3.0).unwrap();
        assert_eq!(params.float(&decay), Some(1.0));

        params.reset_values();
        assert_eq!(params.float(&decay), Some(0.85));
    }

    #[test]
    fn test_index_access_matches_roles() {
        let mut params = feedback_like();
        assert_eq!(params.texture_index(&SlotRole::LastOutput), Some(2));
        assert_eq!(params.texture_index(&SlotRole::SecondSource), None);

        let decay = params.float_index(&SlotRole::custom("decay")).unwrap();
        assert!(params.set_float_at(decay, -2.0));
        assert_eq!(params.float(&SlotRole::custom("decay")), Some(0.0));
        assert!(!params.set_float_at(params.floats().len(), 1.0));
    }

    #[test]
    fn test_unknown_slot_reported() {
        let mut params = feedback_like();
        let err = params.set_int(&SlotRole::custom("bands"), 4).unwrap_err();
        assert!(matches!(err, ParameterError::UnknownSlot { kind: "int", .. }));
        assert!(!params.update_audio(&[1.0]));
    }

    #[test]
    fn test_destination_is_the_only_written_texture() {
        let params = feedback_like();
        let kinds: Vec<_> = params
            .binding_layout()
            .into_iter()
            .filter(|d| d.group == TEXTURE_GROUP)
            .map(|d| d.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::ReadTexture,
                ResourceKind::WriteTexture,
                ResourceKind::ReadTexture
            ]
        );
    }

    #[test]
    fn test_uniform_values_encode_current_state() {
        let mut params = feedback_like();
        params.set_float(&SlotRole::Time, 2.5).unwrap();

        let values = params.uniform_values();
        let time = values.iter().find(|(b, _)| *b == 0).unwrap();
        assert_eq!(time.1, 2.5f32.to_ne_bytes().to_vec());
        let control = values.iter().find(|(b, _)| *b == 2).unwrap();
        assert_eq!(control.1.len(), 8);
    }
}
