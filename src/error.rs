//! Error types for the frame graph.

use thiserror::Error;

/// Errors raised while building or driving the frame graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no suitable GPU adapter: {0}")]
    AdapterUnavailable(String),

    #[error("failed to create GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("cannot allocate a {width}x{height} texture (device limit {limit})")]
    TextureAllocation { width: u32, height: u32, limit: u32 },

    #[error("kernel `{name}` failed to build: {reason}")]
    KernelBuild { name: String, reason: String },

    #[error("filter `{0}` has no compute pipeline")]
    InertFilter(String),

    #[error("kernel `{name}` expects {expected} input textures, got {actual}")]
    InputCountMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("pixel data is {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    PixelDataSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("pixel format conversion failed: {0}")]
    PixelConversion(String),

    #[error("GPU readback failed: {0}")]
    Readback(String),

    #[error("filter `{0}` produced no output")]
    NoOutput(String),

    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure reported to completion handlers for a unit of GPU work.
///
/// Clonable so a single failure can be handed to every registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    #[error("waiting for GPU work failed: {0}")]
    Wait(String),

    #[error("frame could not be captured: {0}")]
    Capture(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
