//! Terminal consumer that keeps the most recent frame.

use crate::error::{GraphError, Result};
use crate::gpu::GpuContext;
use crate::graph::{ImageConsumer, SourceId};
use crate::texture::TextureFrame;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Default)]
struct SinkState {
    sources: Vec<SourceId>,
    latest: Option<TextureFrame>,
    received: u64,
    removals: u64,
}

/// End of a chain. Stores the latest delivered frame so it can be
/// presented or read back, and counts deliveries.
#[derive(Default)]
pub struct FrameSink {
    state: Mutex<SinkState>,
}

impl FrameSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latest(&self) -> Option<TextureFrame> {
        self.lock().latest.clone()
    }

    pub fn frames_received(&self) -> u64 {
        self.lock().received
    }

    /// How many times an upstream source detached itself.
    pub fn source_removals(&self) -> u64 {
        self.lock().removals
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.lock().sources.clone()
    }

    /// Read the latest frame back to the CPU.
    pub fn snapshot(&self, ctx: &GpuContext) -> Result<image::RgbaImage> {
        let frame = self
            .latest()
            .ok_or_else(|| GraphError::NoOutput("frame sink".to_string()))?;
        frame.texture.read_rgba(ctx)
    }
}

impl ImageConsumer for FrameSink {
    fn add_source(&self, source: SourceId) {
        self.lock().sources.push(source);
    }

    fn remove_source(&self, source: SourceId) {
        let mut state = self.lock();
        if let Some(index) = state.sources.iter().position(|s| *s == source) {
            state.sources.remove(index);
            state.removals += 1;
        }
    }

    fn new_texture_available(&self, frame: &TextureFrame, _source: SourceId) {
        trace!("Sink received {} frame", frame.texture.size());
        let mut state = self.lock();
        state.latest = Some(frame.clone());
        state.received += 1;
    }
}
