//! Shutter: a GPU frame graph for camera pipelines.
//!
//! Sources push textures into chained compute filters; each filter waits
//! for one frame from every input, dispatches once, and fans its output
//! out to every consumer.

pub mod capture;
pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod gpu;
pub mod graph;
pub mod sink;
pub mod source;
pub mod stats;
pub mod texture;

pub use error::{CompletionError, GraphError, Result};
pub use filter::Filter;
pub use gpu::GpuContext;
pub use graph::{ImageConsumer, ImageSource, SourceId};
pub use texture::{CameraFacing, Size, Texture, TextureFrame};
