//! A still image as a graph source.

use crate::error::Result;
use crate::gpu::GpuContext;
use crate::graph::{ConsumerList, ImageConsumer, ImageSource, SourceId};
use crate::texture::{Texture, TextureFrame};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Source that injects one still texture into the graph on request.
pub struct StaticImageSource {
    id: SourceId,
    texture: Texture,
    consumers: Mutex<ConsumerList>,
}

impl StaticImageSource {
    /// Upload `image` and wrap it as a source.
    pub fn new(ctx: &GpuContext, image: &image::RgbaImage) -> Result<Self> {
        Ok(Self::from_texture(Texture::from_image(ctx, image, "static image")?))
    }

    /// Decode an image file and wrap it as a source.
    pub fn open(ctx: &GpuContext, path: impl AsRef<Path>) -> Result<Self> {
        let image = image::open(path.as_ref())?.to_rgba8();
        debug!("Loaded {:?} ({}x{})", path.as_ref(), image.width(), image.height());
        Self::new(ctx, &image)
    }

    pub fn from_texture(texture: Texture) -> Self {
        Self {
            id: SourceId::next(),
            texture,
            consumers: Mutex::new(ConsumerList::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConsumerList> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Push the image, without a sample time, to every consumer.
    pub fn transmit_texture(&self) {
        let consumers = self.lock().snapshot();
        let frame = TextureFrame::still(self.texture.clone());
        for consumer in consumers {
            consumer.new_texture_available(&frame, self.id);
        }
    }
}

impl ImageSource for StaticImageSource {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn attach_consumer(&self, consumer: Arc<dyn ImageConsumer>, index: Option<usize>) {
        self.lock().insert(consumer.clone(), index);
        consumer.add_source(self.id);
    }

    fn remove_consumer(&self, consumer: &dyn ImageConsumer) {
        let removed = self.lock().remove(consumer);
        if let Some(consumer) = removed {
            consumer.remove_source(self.id);
        }
    }

    fn remove_all_consumers(&self) {
        let consumers = self.lock().take_all();
        for consumer in consumers {
            consumer.remove_source(self.id);
        }
    }

    fn consumers(&self) -> Vec<Arc<dyn ImageConsumer>> {
        self.lock().snapshot()
    }
}

impl Drop for StaticImageSource {
    fn drop(&mut self) {
        self.remove_all_consumers();
    }
}
