//! Webcam capture through nokhwa.

use super::{Capture, CaptureBackend, CaptureDevice, CaptureRequest};
use crate::frame::{PixelFormat, VideoFrame};
use crate::texture::Size;
use anyhow::{anyhow, Result};
use std::time::Instant;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

/// Webcam capture using the nokhwa library.
pub struct NokhwaCapture {
    camera: Camera,
    resolution: Size,
    started: Instant,
}

/// Formats tried in order until one opens a stream. The requested size
/// comes first, then common sizes from large to small.
fn seed_formats(request: &CaptureRequest) -> Vec<CameraFormat> {
    let mut sizes = vec![(request.resolution.width, request.resolution.height)];
    for size in [(1920, 1080), (1280, 720), (640, 480)] {
        if !sizes.contains(&size) {
            sizes.push(size);
        }
    }

    let mut seeds = Vec::new();
    for (width, height) in sizes {
        for fps in [request.fps, 30, 15] {
            for format in [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG] {
                let seed = CameraFormat::new(Resolution::new(width, height), format, fps);
                if !seeds.contains(&seed) {
                    seeds.push(seed);
                }
            }
        }
    }
    seeds
}

/// Rank by pixel count, then frame rate, then NV12 > YUYV > MJPEG.
fn format_score(format: &CameraFormat) -> i64 {
    let pixels = format.width() as i64 * format.height() as i64;
    let kind = match format.format() {
        FrameFormat::NV12 => 3,
        FrameFormat::YUYV => 2,
        FrameFormat::MJPEG => 1,
        _ => 0,
    };
    pixels * 1_000_000 + format.frame_rate() as i64 * 10 + kind
}

fn request(format: CameraFormat) -> RequestedFormat<'static> {
    RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format))
}

impl CaptureBackend for NokhwaCapture {
    fn devices() -> Result<Vec<CaptureDevice>> {
        let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
        Ok(devices
            .into_iter()
            .map(|d| CaptureDevice {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    fn open(request: &CaptureRequest) -> Result<Self> {
        let index = CameraIndex::Index(request.device);
        let (mut camera, seed) = seed_formats(request)
            .into_iter()
            .find_map(|seed| {
                let mut camera = Camera::new(index.clone(), request(seed)).ok()?;
                camera.open_stream().ok()?;
                Some((camera, seed))
            })
            .ok_or_else(|| anyhow!("camera {} did not open with any known format", request.device))?;
        tracing::info!("Camera {} streaming with {:?}", request.device, seed);

        let best = camera
            .compatible_camera_formats()
            .ok()
            .and_then(|formats| formats.into_iter().max_by_key(format_score));
        if let Some(best) = best.filter(|best| format_score(best) > format_score(&seed)) {
            tracing::info!("Switching camera to {:?}", best);
            let _ = camera.stop_stream();
            let switched = camera.set_camera_requset(request(best)).is_ok() && camera.open_stream().is_ok();
            if !switched {
                tracing::warn!("Camera rejected {:?}, staying on {:?}", best, seed);
                let _ = camera.set_camera_requset(request(seed));
                camera.open_stream()?;
            }
        }

        let resolution = camera.resolution();
        tracing::info!("Camera opened with resolution: {}", resolution);

        Ok(Self {
            camera,
            resolution: Size::new(resolution.width(), resolution.height()),
            started: Instant::now(),
        })
    }

    fn next_capture(&mut self) -> Result<Capture> {
        let buffer = self.camera.frame()?;
        let sample_time = self.started.elapsed();
        let decoded = buffer.decode_image::<RgbFormat>()?;
        let (width, height) = decoded.dimensions();
        Ok(Capture {
            frame: VideoFrame::from_data(width, height, PixelFormat::Rgb, decoded.into_raw()),
            sample_time,
        })
    }

    fn resolution(&self) -> Size {
        self.resolution
    }
}
