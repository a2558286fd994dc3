//! GPU plumbing built on wgpu.
//!
//! One [`GpuContext`] is created at startup and shared by the texture
//! provider, every filter kernel and the recorder's readback path.

pub mod context;
pub mod kernel;
pub mod provider;
pub mod shader;
pub mod textures;

pub use context::{GpuContext, GpuError};
pub use kernel::{workgroup_grid, Bindings, Kernel, KernelError};
pub use provider::{PixelLayout, Plane, RawFrame, TextureError, TextureProvider, BLANK_TEXTURE};
pub use shader::{ShaderError, ShaderLibrary};
pub use textures::{Image, ReadbackBuffer};
