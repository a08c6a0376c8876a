//! The closed set of filter specializations.

use crate::error::Result;
use crate::gpu::{GpuContext, KernelSource};
use crate::texture::{Size, Texture};
use std::fmt;
use std::sync::Arc;

/// Encodes GPU work itself instead of going through a compute kernel.
///
/// This is the path for filters built on externally provided kernels.
pub trait KernelEncoder: Send + Sync {
    /// Output size for the given first-input size.
    fn output_size(&self, input: Size) -> Size {
        input
    }

    fn encode(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &[Texture],
        output: &Texture,
    ) -> Result<()>;
}

/// Copies the input unchanged, or only forwards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassThrough {
    /// Run a real GPU copy into the filter's own output texture
    pub create_texture: bool,
}

/// Rotation about the image center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotate {
    radians: f32,
    /// Grow the output to contain the whole rotated image
    pub fit_size: bool,
}

impl Rotate {
    pub fn new(degrees: f32, fit_size: bool) -> Self {
        Self {
            radians: degrees.to_radians(),
            fit_size,
        }
    }

    pub fn degrees(&self) -> f32 {
        self.radians.to_degrees()
    }

    pub fn set_degrees(&mut self, degrees: f32) {
        self.radians = degrees.to_radians();
    }

    pub fn output_size(&self, input: Size) -> Size {
        if !self.fit_size {
            return input;
        }
        let (sin, cos) = (self.radians.sin().abs(), self.radians.cos().abs());
        let (w, h) = (input.width as f32, input.height as f32);
        Size::new((sin * h + cos * w) as u32, (sin * w + cos * h) as u32)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct RotateUniforms {
    angle: f32,
    _pad: [f32; 3],
}

/// How a compute filter derives its output size from the first input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSizing {
    #[default]
    SameAsInput,
    Fixed(Size),
    Scaled { numerator: u32, denominator: u32 },
}

impl OutputSizing {
    fn apply(&self, input: Size) -> Size {
        match *self {
            OutputSizing::SameAsInput => input,
            OutputSizing::Fixed(size) => size,
            OutputSizing::Scaled { numerator, denominator } => {
                let scale = |v: u32| (v as u64 * numerator as u64 / denominator.max(1) as u64) as u32;
                Size::new(scale(input.width), scale(input.height))
            }
        }
    }
}

/// A user-supplied N-input compute kernel.
#[derive(Debug, Clone)]
pub struct Compute {
    pub source: KernelSource,
    pub inputs: usize,
    pub sizing: OutputSizing,
    /// Uniform bytes bound at group 1; `None` means the kernel takes none
    pub parameters: Option<Vec<u8>>,
}

impl Compute {
    pub fn new(source: KernelSource, inputs: usize) -> Self {
        Self {
            source,
            inputs,
            sizing: OutputSizing::SameAsInput,
            parameters: None,
        }
    }

    pub fn with_sizing(mut self, sizing: OutputSizing) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn with_parameters<T: bytemuck::Pod>(mut self, value: &T) -> Self {
        self.parameters = Some(bytemuck::bytes_of(value).to_vec());
        self
    }

    /// Replace the uniform bytes bound on the next dispatch.
    pub fn set_parameters<T: bytemuck::Pod>(&mut self, value: &T) {
        self.parameters = Some(bytemuck::bytes_of(value).to_vec());
    }
}

/// Specialization of a [`Filter`](super::Filter).
#[derive(Clone)]
pub enum FilterKind {
    PassThrough(PassThrough),
    Rotate(Rotate),
    Compute(Compute),
    Custom(Arc<dyn KernelEncoder>),
}

impl FilterKind {
    /// Output texture size for a cycle whose first input has size `input`.
    pub fn compute_output_size(&self, input: Size) -> Size {
        match self {
            FilterKind::PassThrough(_) => input,
            FilterKind::Rotate(rotate) => rotate.output_size(input),
            FilterKind::Compute(compute) => compute.sizing.apply(input),
            FilterKind::Custom(encoder) => encoder.output_size(input),
        }
    }

    /// Uniform bytes for the kernel, padded to 16-byte multiples.
    pub fn bind_parameters(&self) -> Option<Vec<u8>> {
        let mut bytes = match self {
            FilterKind::Rotate(rotate) => bytemuck::bytes_of(&RotateUniforms {
                angle: rotate.radians,
                _pad: [0.0; 3],
            })
            .to_vec(),
            FilterKind::Compute(Compute {
                parameters: Some(bytes), ..
            }) => bytes.clone(),
            _ => return None,
        };
        let padded = bytes.len().max(1).div_ceil(16) * 16;
        bytes.resize(padded, 0);
        Some(bytes)
    }

    /// Whether deliveries are forwarded untouched without GPU work.
    pub(crate) fn forwards_unchanged(&self) -> bool {
        matches!(self, FilterKind::PassThrough(PassThrough { create_texture: false }))
    }

    /// Kernel source, input count and parameter use for the compute path.
    pub(crate) fn kernel(&self) -> Option<(KernelSource, usize, bool)> {
        match self {
            FilterKind::PassThrough(_) => Some((KernelSource::pass_through(), 1, false)),
            FilterKind::Rotate(_) => Some((KernelSource::rotate(), 1, true)),
            FilterKind::Compute(compute) => {
                Some((compute.source.clone(), compute.inputs, compute.parameters.is_some()))
            }
            FilterKind::Custom(_) => None,
        }
    }
}

impl fmt::Debug for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterKind::PassThrough(p) => f.debug_tuple("PassThrough").field(p).finish(),
            FilterKind::Rotate(r) => f.debug_tuple("Rotate").field(r).finish(),
            FilterKind::Compute(c) => f.debug_tuple("Compute").field(c).finish(),
            FilterKind::Custom(_) => f.write_str("Custom"),
        }
    }
}
