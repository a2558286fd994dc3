//! Texture provider: camera frames and static resources to GPU images.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::TextureFormat;

use super::context::{GpuContext, GpuError};
use super::kernel::{Kernel, KernelError};
use super::shader::{ShaderError, ShaderLibrary};
use super::textures::Image;
use crate::params::{ParameterSet, SlotRole};

const YCBCR_SHADER: &str = include_str!("shaders/ycbcr.wgsl");

/// Name of the built-in placeholder returned by [`TextureProvider::blank`].
pub const BLANK_TEXTURE: &str = "blankTexture";

/// Errors raised by the texture provider.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("Failed to read resource: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Unsupported frame layout: {0}")]
    UnsupportedLayout(String),
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
}

/// Pixel layouts delivered by the capture collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// One plane, 4 bytes per pixel, B G R A.
    Bgra8,
    /// Full-range 4:2:0, luma plane plus interleaved CbCr plane.
    YCbCr420FullRange,
    /// Video-range (16-235) 4:2:0, luma plane plus interleaved CbCr plane.
    YCbCr420VideoRange,
}

impl PixelLayout {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelLayout::Bgra8 => 1,
            PixelLayout::YCbCr420FullRange | PixelLayout::YCbCr420VideoRange => 2,
        }
    }
}

/// One plane of a raw frame. Rows may be padded.
#[derive(Debug, Clone)]
pub struct Plane {
    pub bytes_per_row: u32,
    pub data: Vec<u8>,
}

/// A camera pixel buffer as delivered by the capture collaborator.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub planes: Vec<Plane>,
}

impl RawFrame {
    /// Tightly packed single-plane BGRA frame.
    pub fn bgra(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout: PixelLayout::Bgra8,
            planes: vec![Plane {
                bytes_per_row: width * 4,
                data,
            }],
        }
    }

    /// Tightly packed full-range bi-planar frame.
    pub fn ycbcr420(width: u32, height: u32, luma: Vec<u8>, chroma: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout: PixelLayout::YCbCr420FullRange,
            planes: vec![
                Plane {
                    bytes_per_row: width,
                    data: luma,
                },
                Plane {
                    bytes_per_row: width.div_ceil(2) * 2,
                    data: chroma,
                },
            ],
        }
    }

    /// A frame filled with one BGRA colour.
    pub fn solid_bgra(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        let data = bgra.repeat((width * height) as usize);
        Self::bgra(width, height, data)
    }
}

/// Width, height and bytes per pixel of each plane for a layout.
fn plane_shapes(layout: PixelLayout, width: u32, height: u32) -> Vec<(u32, u32, u32, TextureFormat)> {
    match layout {
        PixelLayout::Bgra8 => vec![(width, height, 4, TextureFormat::Bgra8Unorm)],
        PixelLayout::YCbCr420FullRange | PixelLayout::YCbCr420VideoRange => vec![
            (width, height, 1, TextureFormat::R8Unorm),
            (
                width.div_ceil(2),
                height.div_ceil(2),
                2,
                TextureFormat::Rg8Unorm,
            ),
        ],
    }
}

/// Check that every plane holds enough bytes for its declared shape.
fn validate_planes(frame: &RawFrame) -> Result<(), TextureError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(TextureError::UnsupportedLayout(format!(
            "empty frame {}x{}",
            frame.width, frame.height
        )));
    }
    if frame.planes.len() != frame.layout.plane_count() {
        return Err(TextureError::UnsupportedLayout(format!(
            "{:?} expects {} planes, got {}",
            frame.layout,
            frame.layout.plane_count(),
            frame.planes.len()
        )));
    }
    let shapes = plane_shapes(frame.layout, frame.width, frame.height);
    for (index, (plane, (w, h, bpp, _))) in frame.planes.iter().zip(shapes).enumerate() {
        let row = w * bpp;
        let needed = plane.bytes_per_row as usize * (h as usize - 1) + row as usize;
        if plane.bytes_per_row < row || plane.data.len() < needed {
            return Err(TextureError::UnsupportedLayout(format!(
                "plane {} too small: {} bytes, stride {}, need {}",
                index,
                plane.data.len(),
                plane.bytes_per_row,
                needed
            )));
        }
    }
    Ok(())
}

/// Converts raw frames into shader-readable images and caches named resources.
pub struct TextureProvider {
    ctx: Arc<GpuContext>,
    resources_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Image>>>,
    blank: Arc<Image>,
    full_range: Kernel,
    video_range: Kernel,
}

impl TextureProvider {
    pub fn new(ctx: Arc<GpuContext>, resources_dir: impl Into<PathBuf>) -> Result<Self, TextureError> {
        let library = ShaderLibrary::from_wgsl("ycbcr", YCBCR_SHADER)?;
        let layout = ParameterSet::builder()
            .texture(SlotRole::Source, 0)
            .texture(SlotRole::Destination, 1)
            .texture(SlotRole::SecondSource, 2)
            .build()
            .map_err(|e| TextureError::UnsupportedLayout(e.to_string()))?
            .binding_layout();
        let full_range = Kernel::new(&ctx, &library, "ycbcr_full_range", &layout)?;
        let video_range = Kernel::new(&ctx, &library, "ycbcr_video_range", &layout)?;

        let blank = Image::for_upload(&ctx, BLANK_TEXTURE, 1, 1, TextureFormat::Rgba8Unorm)?;
        blank.write(&ctx, &[0, 0, 0, 0], 4);

        Ok(Self {
            ctx,
            resources_dir: resources_dir.into(),
            cache: Mutex::new(HashMap::new()),
            blank,
            full_range,
            video_range,
        })
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Transparent 1x1 placeholder, used before any frame has been produced.
    pub fn blank(&self) -> Arc<Image> {
        self.blank.clone()
    }

    /// Load `<resources_dir>/<name>.png`, once per name.
    ///
    /// [`BLANK_TEXTURE`] resolves to the built-in placeholder when no such file exists.
    pub fn load(&self, name: &str) -> Result<Arc<Image>, TextureError> {
        if let Some(image) = self.cache.lock().get(name) {
            return Ok(image.clone());
        }

        let path = self.resource_path(name);
        let image = if name == BLANK_TEXTURE && !path.exists() {
            self.blank.clone()
        } else {
            let decoded = image::open(&path)?.to_rgba8();
            log::debug!("Loaded texture '{}' from {}", name, path.display());
            self.from_rgba(name, &decoded)?
        };

        // Another thread may have loaded it meanwhile; keep the first entry.
        let mut cache = self.cache.lock();
        Ok(cache.entry(name.to_string()).or_insert(image).clone())
    }

    /// Number of cached resources.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    fn resource_path(&self, name: &str) -> PathBuf {
        let file = Path::new(name);
        if file.extension().is_some() {
            self.resources_dir.join(file)
        } else {
            self.resources_dir.join(format!("{}.png", name))
        }
    }

    /// Upload an arbitrary RGBA image.
    pub fn from_rgba(&self, label: &str, rgba: &image::RgbaImage) -> Result<Arc<Image>, TextureError> {
        let (width, height) = rgba.dimensions();
        let image = Image::for_upload(&self.ctx, label, width, height, TextureFormat::Rgba8Unorm)?;
        image.write(&self.ctx, rgba.as_raw(), width * 4);
        Ok(image)
    }

    /// Convert a camera frame into a shader-readable image.
    ///
    /// Returns `None` for unsupported or malformed layouts. BGRA frames are
    /// uploaded as-is; bi-planar frames are converted to RGBA on the GPU.
    pub fn convert(&self, frame: &RawFrame) -> Option<Arc<Image>> {
        match self.try_convert(frame) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("Dropping frame: {}", e);
                None
            }
        }
    }

    pub fn try_convert(&self, frame: &RawFrame) -> Result<Arc<Image>, TextureError> {
        validate_planes(frame)?;
        let shapes = plane_shapes(frame.layout, frame.width, frame.height);

        let mut planes = Vec::with_capacity(shapes.len());
        for (plane, (w, h, _, format)) in frame.planes.iter().zip(shapes) {
            let image = Image::for_upload(&self.ctx, "camera_plane", w, h, format)?;
            image.write(&self.ctx, &plane.data, plane.bytes_per_row);
            planes.push(image);
        }

        let kernel = match frame.layout {
            PixelLayout::Bgra8 => return Ok(planes.remove(0)),
            PixelLayout::YCbCr420FullRange => &self.full_range,
            PixelLayout::YCbCr420VideoRange => &self.video_range,
        };

        let output = Image::for_kernel_output(&self.ctx, "camera_rgba", frame.width, frame.height)?;
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ycbcr_convert"),
            });
        kernel.dispatch(&mut encoder, &output, |b| {
            b.texture(0, &planes[0])
                .texture(1, &output)
                .texture(2, &planes[1]);
        })?;
        // Later submissions on the same queue observe the converted image.
        self.ctx.queue.submit(Some(encoder.finish()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_count_mismatch_rejected() {
        let mut frame = RawFrame::solid_bgra(4, 4, [1, 2, 3, 4]);
        frame.layout = PixelLayout::YCbCr420FullRange;
        assert!(matches!(
            validate_planes(&frame),
            Err(TextureError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn test_short_plane_rejected() {
        let frame = RawFrame::bgra(4, 4, vec![0; 4 * 4 * 4 - 1]);
        assert!(validate_planes(&frame).is_err());
    }

    #[test]
    fn test_padded_rows_accepted() {
        let mut frame = RawFrame::bgra(3, 2, vec![0; 64 + 12]);
        frame.planes[0].bytes_per_row = 64;
        assert!(validate_planes(&frame).is_ok());
    }

    #[test]
    fn test_odd_sized_ycbcr_planes() {
        let frame = RawFrame::ycbcr420(5, 3, vec![0; 15], vec![0; 6 * 2]);
        assert!(validate_planes(&frame).is_ok());
        let shapes = plane_shapes(frame.layout, 5, 3);
        assert_eq!((shapes[1].0, shapes[1].1), (3, 2));
    }
}
