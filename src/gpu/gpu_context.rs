//! Shared GPU context: one device, one queue, one color space.

use crate::error::{GraphError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Color space textures in the graph are interpreted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    /// 8-bit sRGB-encoded values (camera and still image default)
    #[default]
    Srgb,
    /// Linear light values
    LinearSrgb,
}

/// Records the reason the device was lost, shared with completion callbacks.
#[derive(Debug, Clone, Default)]
pub struct DeviceLoss(Arc<Mutex<Option<String>>>);

impl DeviceLoss {
    pub(crate) fn record(&self, reason: String) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    /// Reason the device was lost, if it has been.
    pub fn reason(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Device context every filter and source submits work through.
///
/// Constructed explicitly by the owner of the graph and shared as
/// `Arc<GpuContext>`; its lifetime is the lifetime of that owner.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    color_space: ColorSpace,
    adapter_info: Option<wgpu::AdapterInfo>,
    loss: DeviceLoss,
}

impl GpuContext {
    /// Initialize a context on the best available hardware adapter.
    pub fn new() -> Result<Self> {
        Self::with_color_space(ColorSpace::default())
    }

    /// Initialize a hardware context with an explicit color space.
    pub fn with_color_space(color_space: ColorSpace) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| GraphError::AdapterUnavailable(e.to_string()))?;

        let adapter_info = adapter.get_info();
        info!("Using GPU adapter {} ({:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Shutter Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

        Ok(Self::from_parts(device, queue, color_space, Some(adapter_info)))
    }

    /// Initialize a context on wgpu's no-op backend.
    ///
    /// Resources are created and work is "completed" without touching any
    /// hardware, so graph behaviour can be exercised where no GPU exists.
    /// Texture contents are undefined.
    pub fn headless() -> Self {
        let (device, queue) = wgpu::Device::noop(&wgpu::DeviceDescriptor::default());
        info!("Using headless no-op GPU device");
        Self::from_parts(device, queue, ColorSpace::default(), None)
    }

    fn from_parts(
        device: wgpu::Device,
        queue: wgpu::Queue,
        color_space: ColorSpace,
        adapter_info: Option<wgpu::AdapterInfo>,
    ) -> Self {
        let loss = DeviceLoss::default();
        let recorder = loss.clone();
        device.set_device_lost_callback(move |reason, message| {
            warn!("GPU device lost ({:?}): {}", reason, message);
            recorder.record(message);
        });

        Self {
            device,
            queue,
            color_space,
            adapter_info,
            loss,
        }
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Adapter description, `None` for the headless context.
    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.adapter_info.as_ref()
    }

    /// Largest texture edge the device accepts.
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    pub fn device_loss(&self) -> DeviceLoss {
        self.loss.clone()
    }

    /// Process finished GPU work without blocking, firing pending
    /// completion callbacks on the calling thread.
    pub fn poll(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            warn!("GPU poll failed: {}", e);
        }
    }

    /// Block until `submission` has completed on the GPU.
    pub fn wait_for(&self, submission: wgpu::SubmissionIndex) -> std::result::Result<(), String> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: Some(Duration::from_secs(5)),
            })
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Block until all submitted work has completed.
    pub fn wait_idle(&self) -> std::result::Result<(), String> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
