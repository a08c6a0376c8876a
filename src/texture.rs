//! GPU textures and the frames that carry them through the graph.

use crate::error::{GraphError, Result};
use crate::gpu::GpuContext;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Texture format used for every texture in the graph.
pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Integer size of a texture in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What a texture is allocated for; decides its usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureRole {
    /// Written by a filter's compute kernel
    Output,
    /// Filled from CPU pixel data by a source
    Upload,
}

impl TextureRole {
    fn usage(self) -> wgpu::TextureUsages {
        match self {
            TextureRole::Output => {
                wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST
            }
            TextureRole::Upload => {
                wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC
            }
        }
    }
}

/// Process-unique identity of a texture allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TextureId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct TextureInner {
    id: TextureId,
    size: Size,
    raw: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Shared handle to an RGBA8 GPU texture.
///
/// Clones refer to the same allocation; the texture lives as long as any
/// producer cache or in-flight consumer buffer still holds a clone.
#[derive(Clone)]
pub struct Texture {
    inner: Arc<TextureInner>,
}

impl Texture {
    /// Allocate an uninitialised texture.
    pub fn new(ctx: &GpuContext, size: Size, role: TextureRole, label: &str) -> Result<Self> {
        let limit = ctx.max_texture_dimension();
        if size.is_empty() || size.width > limit || size.height > limit {
            return Err(GraphError::TextureAllocation {
                width: size.width,
                height: size.height,
                limit,
            });
        }

        let raw = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: role.usage(),
            view_formats: &[],
        });
        let view = raw.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            inner: Arc::new(TextureInner {
                id: TextureId::next(),
                size,
                raw,
                view,
            }),
        })
    }

    /// Allocate a texture and fill it with tightly packed RGBA8 pixels.
    pub fn from_rgba(ctx: &GpuContext, width: u32, height: u32, data: &[u8], label: &str) -> Result<Self> {
        let texture = Self::new(ctx, Size::new(width, height), TextureRole::Upload, label)?;
        texture.write_rgba(ctx, data)?;
        Ok(texture)
    }

    /// Upload an image decoded by the `image` crate.
    pub fn from_image(ctx: &GpuContext, image: &image::RgbaImage, label: &str) -> Result<Self> {
        Self::from_rgba(ctx, image.width(), image.height(), image.as_raw(), label)
    }

    /// Overwrite the whole texture with tightly packed RGBA8 pixels.
    pub fn write_rgba(&self, ctx: &GpuContext, data: &[u8]) -> Result<()> {
        let Size { width, height } = self.size();
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(GraphError::PixelDataSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.inner.raw,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Copy the texture back to the CPU, blocking until the GPU is done.
    pub fn read_rgba(&self, ctx: &GpuContext) -> Result<image::RgbaImage> {
        let Size { width, height } = self.size();
        let unpadded_row = width * 4;
        let padded_row = unpadded_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_row as wgpu::BufferAddress * height as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.inner.raw,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let submission = ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.wait_for(submission).map_err(GraphError::Readback)?;
        receiver
            .recv()
            .map_err(|e| GraphError::Readback(e.to_string()))?
            .map_err(|e| GraphError::Readback(e.to_string()))?;

        let mut pixels = Vec::with_capacity(unpadded_row as usize * height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded_row as usize) {
                pixels.extend_from_slice(&row[..unpadded_row as usize]);
            }
        }
        buffer.unmap();

        image::RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| GraphError::Readback("pixel buffer size mismatch".to_string()))
    }

    pub fn id(&self) -> TextureId {
        self.inner.id
    }

    pub fn size(&self) -> Size {
        self.inner.size
    }

    pub fn raw(&self) -> &wgpu::Texture {
        &self.inner.raw
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.inner.view
    }

    /// Whether both handles refer to the same allocation.
    pub fn same_texture(&self, other: &Texture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .finish()
    }
}

/// Which camera produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraFacing {
    Front,
    Back,
    External,
}

/// A texture plus its provenance, as delivered from a source to a consumer.
///
/// A frame without a sample time is a still image; a frame with one is
/// part of a stream.
#[derive(Clone)]
pub struct TextureFrame {
    pub texture: Texture,
    pub sample_time: Option<Duration>,
    pub facing: Option<CameraFacing>,
    /// Set on the one frame captured in response to a photo request
    pub is_photo: bool,
    /// Platform handle kept alive alongside the texture; never inspected
    pub retained: Option<Arc<dyn Any + Send + Sync>>,
}

impl TextureFrame {
    /// A still image frame.
    pub fn still(texture: Texture) -> Self {
        Self {
            texture,
            sample_time: None,
            facing: None,
            is_photo: false,
            retained: None,
        }
    }

    /// A frame of a stream captured at `sample_time`.
    pub fn streamed(texture: Texture, sample_time: Duration) -> Self {
        Self {
            sample_time: Some(sample_time),
            ..Self::still(texture)
        }
    }

    pub fn with_facing(mut self, facing: CameraFacing) -> Self {
        self.facing = Some(facing);
        self
    }

    pub fn as_photo(mut self) -> Self {
        self.is_photo = true;
        self
    }

    pub fn is_still(&self) -> bool {
        self.sample_time.is_none()
    }
}

impl fmt::Debug for TextureFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureFrame")
            .field("texture", &self.texture)
            .field("sample_time", &self.sample_time)
            .field("facing", &self.facing)
            .field("is_photo", &self.is_photo)
            .field("retained", &self.retained.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_texture_is_refused() {
        let ctx = GpuContext::headless();
        let err = Texture::new(&ctx, Size::new(0, 10), TextureRole::Output, "empty").unwrap_err();
        assert!(matches!(err, GraphError::TextureAllocation { width: 0, height: 10, .. }));
    }

    #[test]
    fn oversized_texture_is_refused() {
        let ctx = GpuContext::headless();
        let too_wide = ctx.max_texture_dimension() + 1;
        assert!(Texture::new(&ctx, Size::new(too_wide, 1), TextureRole::Output, "wide").is_err());
    }

    #[test]
    fn upload_checks_pixel_count() {
        let ctx = GpuContext::headless();
        let err = Texture::from_rgba(&ctx, 2, 2, &[0u8; 12], "short").unwrap_err();
        assert!(matches!(err, GraphError::PixelDataSize { expected: 16, actual: 12, .. }));
    }

    #[test]
    fn clones_share_identity() {
        let ctx = GpuContext::headless();
        let a = Texture::from_rgba(&ctx, 2, 1, &[255u8; 8], "a").unwrap();
        let b = Texture::from_rgba(&ctx, 2, 1, &[255u8; 8], "b").unwrap();
        assert!(a.same_texture(&a.clone()));
        assert_eq!(a.id(), a.clone().id());
        assert!(!a.same_texture(&b));
        assert_eq!(a.size(), Size::new(2, 1));
    }

    #[test]
    fn readback_returns_image_of_texture_size() {
        let ctx = GpuContext::headless();
        let texture = Texture::from_rgba(&ctx, 3, 2, &[7u8; 24], "readback").unwrap();
        let image = texture.read_rgba(&ctx).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
    }

    #[test]
    fn frame_kind_follows_sample_time() {
        let ctx = GpuContext::headless();
        let texture = Texture::from_rgba(&ctx, 1, 1, &[0u8; 4], "frame").unwrap();
        assert!(TextureFrame::still(texture.clone()).is_still());
        let streamed = TextureFrame::streamed(texture, Duration::from_millis(33))
            .with_facing(CameraFacing::Back)
            .as_photo();
        assert!(!streamed.is_still());
        assert_eq!(streamed.facing, Some(CameraFacing::Back));
        assert!(streamed.is_photo);
    }
}
