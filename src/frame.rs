//! CPU video frames as delivered by capture backends, and their conversion
//! to the RGBA layout the GPU graph consumes.

use crate::error::{GraphError, Result};

/// Supported pixel formats for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel)
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel)
    Rgba,
    /// BGRA with 8 bits per channel, the usual camera output on Apple devices
    Bgra,
    /// YUV 4:2:2 packed format (Y0 U0 Y1 V0)
    Yuyv,
    /// YUV 4:2:2 packed format (U0 Y0 V0 Y1)
    Uyvy,
    /// NV12 semi-planar format (Y plane + interleaved UV)
    Nv12,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` frame in this format.
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb => pixels * 3,
            PixelFormat::Rgba | PixelFormat::Bgra => pixels * 4,
            PixelFormat::Yuyv | PixelFormat::Uyvy => pixels * 2,
            PixelFormat::Nv12 => pixels + pixels / 2,
        }
    }
}

/// A video frame containing image data.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of the frame data
    pub format: PixelFormat,
    /// Raw pixel data
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a black frame with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::from_data(width, height, format, vec![0; format.frame_len(width, height)])
    }

    /// Creates a video frame from existing data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    fn check_len(&self) -> Result<()> {
        let expected = self.format.frame_len(self.width, self.height);
        if self.data.len() < expected {
            return Err(GraphError::PixelDataSize {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Converts this frame to RGBA format.
    pub fn to_rgba(&self) -> Result<VideoFrame> {
        self.check_len()?;
        if self.format == PixelFormat::Rgba {
            return Ok(self.clone());
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let pixel_count = width * height;
        let mut rgba_data = vec![0u8; pixel_count * 4];

        match self.format {
            PixelFormat::Rgb => {
                for (dst, src) in rgba_data.chunks_exact_mut(4).zip(self.data.chunks_exact(3)) {
                    dst[..3].copy_from_slice(src);
                    dst[3] = 255;
                }
            }
            PixelFormat::Bgra => {
                for (dst, src) in rgba_data.chunks_exact_mut(4).zip(self.data.chunks_exact(4)) {
                    dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
                }
            }
            PixelFormat::Yuyv | PixelFormat::Uyvy | PixelFormat::Nv12 => {
                self.convert_yuv(&mut rgba_data)?;
            }
            PixelFormat::Rgba => {}
        }

        Ok(VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba,
            data: rgba_data,
        })
    }

    fn convert_yuv(&self, rgba_data: &mut [u8]) -> Result<()> {
        let conversion = |e: &dyn std::fmt::Debug| GraphError::PixelConversion(format!("{:?}", e));
        let width = self.width as usize;
        let height = self.height as usize;

        let dst_color = ezk_image::ColorInfo::RGB(ezk_image::RgbColorInfo {
            transfer: ezk_image::ColorTransfer::Linear,
            primaries: ezk_image::ColorPrimaries::BT709,
        });
        let mut dst_image = ezk_image::Image::from_buffer(
            ezk_image::PixelFormat::RGBA,
            rgba_data,
            None,
            width,
            height,
            dst_color,
        )
        .map_err(|e| conversion(&e))?;

        let src_color = ezk_image::ColorInfo::YUV(ezk_image::YuvColorInfo {
            transfer: ezk_image::ColorTransfer::Linear,
            primaries: ezk_image::ColorPrimaries::BT709,
            space: ezk_image::ColorSpace::BT709,
            full_range: false,
        });

        // ezk-image has no UYVY reader; swap each byte pair into YUYV order.
        let swapped;
        let (format, data) = match self.format {
            PixelFormat::Uyvy => {
                swapped = self
                    .data
                    .chunks_exact(2)
                    .flat_map(|pair| [pair[1], pair[0]])
                    .collect::<Vec<u8>>();
                (ezk_image::PixelFormat::YUYV, &swapped[..])
            }
            PixelFormat::Yuyv => (ezk_image::PixelFormat::YUYV, &self.data[..]),
            _ => (ezk_image::PixelFormat::NV12, &self.data[..]),
        };

        let src_image = ezk_image::Image::from_buffer(format, data, None, width, height, src_color)
            .map_err(|e| conversion(&e))?;
        ezk_image::convert(&src_image, &mut dst_image).map_err(|e| conversion(&e))?;
        Ok(())
    }

    /// Converts to RGBA and wraps the pixels as an `image` buffer.
    pub fn into_rgba_image(self) -> Result<image::RgbaImage> {
        let rgba = self.to_rgba()?;
        let expected = rgba.format.frame_len(rgba.width, rgba.height);
        let mut data = rgba.data;
        data.truncate(expected);
        image::RgbaImage::from_raw(rgba.width, rgba.height, data)
            .ok_or_else(|| GraphError::PixelConversion("frame buffer too small".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_rgba_conversion() {
        let rgb_data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = VideoFrame::from_data(2, 2, PixelFormat::Rgb, rgb_data);
        let rgba_frame = frame.to_rgba().unwrap();

        assert_eq!(rgba_frame.format, PixelFormat::Rgba);
        assert_eq!(rgba_frame.data.len(), 16);
        assert_eq!(&rgba_frame.data[0..4], &[255, 0, 0, 255]);
        assert_eq!(&rgba_frame.data[4..8], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_bgra_channels_are_swapped() {
        let frame = VideoFrame::from_data(1, 1, PixelFormat::Bgra, vec![10, 20, 30, 40]);
        assert_eq!(frame.to_rgba().unwrap().data, vec![30, 20, 10, 40]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let frame = VideoFrame::from_data(4, 4, PixelFormat::Yuyv, vec![0; 8]);
        assert!(matches!(
            frame.to_rgba(),
            Err(GraphError::PixelDataSize { expected: 32, actual: 8, .. })
        ));
    }

    #[test]
    fn test_nv12_frame_len() {
        assert_eq!(PixelFormat::Nv12.frame_len(4, 2), 12);
        assert_eq!(VideoFrame::new(4, 2, PixelFormat::Nv12).data.len(), 12);
    }

    #[test]
    fn test_yuyv_converts_to_rgba_image() {
        let frame = VideoFrame::new(4, 2, PixelFormat::Yuyv);
        let image = frame.into_rgba_image().unwrap();
        assert_eq!(image.dimensions(), (4, 2));
    }
}
