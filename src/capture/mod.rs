//! Frame producers that drive a [`CameraSource`](crate::source::CameraSource).
//!
//! A backend hands out CPU frames together with their sample time; the
//! caller pushes them into a camera source with
//! [`CameraSource::push_frame`](crate::source::CameraSource::push_frame).

#[cfg(feature = "camera")]
mod nokhwa_backend;
mod pattern;

#[cfg(feature = "camera")]
pub use nokhwa_backend::NokhwaCapture;
pub use pattern::PatternCapture;

use crate::frame::VideoFrame;
use crate::texture::{CameraFacing, Size};
use anyhow::Result;
use std::time::Duration;

/// One captured frame, sampled `sample_time` after the stream started.
#[derive(Debug, Clone)]
pub struct Capture {
    pub frame: VideoFrame,
    pub sample_time: Duration,
}

pub trait CaptureBackend {
    fn devices() -> Result<Vec<CaptureDevice>>
    where
        Self: Sized;

    /// Open a stream as close to `request` as the device allows.
    fn open(request: &CaptureRequest) -> Result<Self>
    where
        Self: Sized;

    /// Block until the next frame is available.
    fn next_capture(&mut self) -> Result<Capture>;

    /// Size of the frames actually delivered.
    fn resolution(&self) -> Size;

    fn facing(&self) -> CameraFacing {
        CameraFacing::External
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    pub index: u32,
    pub name: String,
}

/// What to open: device, preferred frame size and rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub device: u32,
    pub resolution: Size,
    pub fps: u32,
}

impl CaptureRequest {
    /// Time between frames at the requested rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            device: 0,
            resolution: Size::new(1280, 720),
            fps: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_interval_guards_zero_rate() {
        let mut request = CaptureRequest::default();
        assert_eq!(request.frame_interval(), Duration::from_secs(1) / 30);
        request.fps = 0;
        assert_eq!(request.frame_interval(), Duration::from_secs(1));
    }
}
