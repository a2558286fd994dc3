//! GPU-resident images and CPU readback.

use std::sync::Arc;

use wgpu::{Device, Texture, TextureFormat, TextureUsages, TextureView};

use super::context::{GpuContext, GpuError};

/// A 2D image on the GPU that owns both texture and view.
///
/// Width, height and format are fixed at creation; a new image is allocated
/// whenever the source dimensions change.
pub struct Image {
    texture: Texture,
    view: TextureView,
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

impl Image {
    /// Create a new image with the specified usage flags.
    ///
    /// Zero-sized images and images larger than the device limit are rejected
    /// instead of tripping wgpu validation.
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsages,
    ) -> Result<Arc<Self>, GpuError> {
        let max = ctx.max_image_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GpuError::InvalidDimensions { width, height, max });
        }

        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Arc::new(Self {
            texture,
            view,
            width,
            height,
            format,
        }))
    }

    /// Create a shader-readable image that can be filled from CPU memory.
    pub fn for_upload(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Arc<Self>, GpuError> {
        Self::new(
            ctx,
            label,
            width,
            height,
            format,
            TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST | TextureUsages::COPY_SRC,
        )
    }

    /// Create an RGBA image a compute kernel can write into.
    pub fn for_kernel_output(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<Arc<Self>, GpuError> {
        Self::new(
            ctx,
            label,
            width,
            height,
            TextureFormat::Rgba8Unorm,
            TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_SRC,
        )
    }

    /// Copy tightly or loosely packed rows into the image.
    ///
    /// `bytes_per_row` may exceed `width * bytes_per_pixel` (row padding).
    pub fn write(&self, ctx: &GpuContext, data: &[u8], bytes_per_row: u32) {
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(self.height),
            },
            self.extent(),
        );
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Get the texture view for binding.
    pub fn view(&self) -> &TextureView {
        &self.view
    }

    /// Get the underlying texture (for copy operations).
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    /// Read the raw texels back in the image's own format, without row padding.
    ///
    /// Blocks until the copy has completed.
    pub fn read_pixels(&self, ctx: &GpuContext) -> Result<Vec<u8>, GpuError> {
        let bytes_per_pixel = bytes_per_pixel(self.format)?;
        let readback = ReadbackBuffer::new(&ctx.device, self.width, self.height, bytes_per_pixel);

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("image_readback"),
            });
        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: readback.buffer(),
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(readback.padded_row_bytes()),
                    rows_per_image: Some(self.height),
                },
            },
            self.extent(),
        );
        ctx.queue.submit(Some(encoder.finish()));

        readback.read_pixels(&ctx.device)
    }

    /// Read the image back as tightly packed RGBA8, whatever its format.
    pub fn read_rgba(&self, ctx: &GpuContext) -> Result<Vec<u8>, GpuError> {
        let raw = self.read_pixels(ctx)?;
        Ok(to_rgba(self.format, raw))
    }
}

/// Bytes per texel for the formats images are created with.
pub fn bytes_per_pixel(format: TextureFormat) -> Result<u32, GpuError> {
    format
        .block_copy_size(None)
        .ok_or_else(|| GpuError::Readback(format!("unsupported readback format {:?}", format)))
}

fn to_rgba(format: TextureFormat, raw: Vec<u8>) -> Vec<u8> {
    match format {
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => {
            let mut pixels = raw;
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            pixels
        }
        TextureFormat::R8Unorm => raw.iter().flat_map(|&l| [l, l, l, 255]).collect(),
        TextureFormat::Rg8Unorm => raw
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[1], 0, 255])
            .collect(),
        _ => raw,
    }
}

/// Readback buffer for copying GPU texture data to CPU.
pub struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    height: u32,
    padded_row_bytes: u32,
    unpadded_row_bytes: u32,
}

impl ReadbackBuffer {
    /// Create a new readback buffer sized for the given dimensions.
    pub fn new(device: &Device, width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let unpadded_row_bytes = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = unpadded_row_bytes.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_buffer"),
            size: (padded_row_bytes * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            height,
            padded_row_bytes,
            unpadded_row_bytes,
        }
    }

    /// Get the underlying buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Get the padded bytes per row (for texture copy).
    pub fn padded_row_bytes(&self) -> u32 {
        self.padded_row_bytes
    }

    /// Read pixels from the mapped buffer, removing row padding.
    pub fn read_pixels(&self, device: &Device) -> Result<Vec<u8>, GpuError> {
        let buffer_slice = self.buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GpuError::Poll(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let pixels = {
            let data = buffer_slice.get_mapped_range();
            let mut pixels = Vec::with_capacity((self.unpadded_row_bytes * self.height) as usize);
            for row in 0..self.height {
                let start = (row * self.padded_row_bytes) as usize;
                let end = start + self.unpadded_row_bytes as usize;
                pixels.extend_from_slice(&data[start..end]);
            }
            pixels
        };
        self.buffer.unmap();
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_swizzle() {
        let rgba = to_rgba(TextureFormat::Bgra8Unorm, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(rgba, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_single_channel_expands_to_gray() {
        let rgba = to_rgba(TextureFormat::R8Unorm, vec![10, 20]);
        assert_eq!(rgba, vec![10, 10, 10, 255, 20, 20, 20, 255]);
    }

    #[tokio::test]
    async fn test_image_write_and_read_back() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let image = Image::for_upload(&ctx, "test", 3, 2, TextureFormat::Rgba8Unorm).unwrap();
        let data: Vec<u8> = (0..3 * 2 * 4).map(|i| i as u8).collect();
        image.write(&ctx, &data, 3 * 4);

        assert_eq!(image.read_pixels(&ctx).unwrap(), data);
    }

    #[tokio::test]
    async fn test_zero_sized_image_rejected() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let result = Image::for_kernel_output(&ctx, "empty", 0, 16);
        assert!(matches!(result, Err(GpuError::InvalidDimensions { .. })));
    }

    #[tokio::test]
    async fn test_readback_buffer_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let buffer = ReadbackBuffer::new(&ctx.device, 256, 256, 4);
        assert!(buffer.padded_row_bytes() >= 256 * 4);
    }
}
