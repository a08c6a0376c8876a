//! GPU device context and compute kernels.

mod gpu_context;
mod kernel;

pub use gpu_context::{ColorSpace, DeviceLoss, GpuContext};
pub use kernel::{
    workgroup_count, KernelPipeline, KernelSource, PASS_THROUGH_KERNEL, ROTATE_KERNEL, WORKGROUP_SIZE,
};
