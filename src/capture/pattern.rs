//! Synthetic frames for demos and headless runs.

use super::{Capture, CaptureBackend, CaptureDevice, CaptureRequest};
use crate::frame::{PixelFormat, VideoFrame};
use crate::texture::Size;
use anyhow::{bail, Result};
use std::time::Duration;

/// Synthetic camera producing a moving BGRA gradient.
///
/// Frames are produced as fast as they are requested; sample times follow
/// the requested frame rate.
pub struct PatternCapture {
    width: u32,
    height: u32,
    interval: Duration,
    frame_index: u64,
}

impl PatternCapture {
    fn render(&self) -> Vec<u8> {
        let shift = (self.frame_index * 4 % self.width as u64) as u32;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                let r = ((x + shift) % self.width * 255 / self.width) as u8;
                let g = (y * 255 / self.height) as u8;
                let b = (self.frame_index % 256) as u8;
                data.extend_from_slice(&[b, g, r, 255]);
            }
        }
        data
    }
}

impl CaptureBackend for PatternCapture {
    fn devices() -> Result<Vec<CaptureDevice>> {
        Ok(vec![CaptureDevice {
            index: 0,
            name: "Test pattern".to_string(),
        }])
    }

    fn open(request: &CaptureRequest) -> Result<Self> {
        let size = request.resolution;
        if size.is_empty() {
            bail!("pattern size must be non-zero, got {}", size);
        }
        tracing::info!("Opened test pattern at {}", size);
        Ok(Self {
            width: size.width,
            height: size.height,
            interval: request.frame_interval(),
            frame_index: 0,
        })
    }

    fn next_capture(&mut self) -> Result<Capture> {
        let frame = VideoFrame::from_data(self.width, self.height, PixelFormat::Bgra, self.render());
        let sample_time = self.interval * self.frame_index as u32;
        self.frame_index += 1;
        Ok(Capture { frame, sample_time })
    }

    fn resolution(&self) -> Size {
        Size::new(self.width, self.height)
    }
}
