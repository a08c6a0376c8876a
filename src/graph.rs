//! Source and consumer capabilities that nodes of the frame graph implement.
//!
//! Sources own their consumers (`Arc<dyn ImageConsumer>`); consumers only
//! remember the [`SourceId`] of each upstream source. Dropping a source
//! therefore tears its edges down deterministically: it tells every consumer
//! to forget it.

use crate::texture::TextureFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Non-owning identity of an image source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SourceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A node that accepts textures from upstream sources.
pub trait ImageConsumer: Send + Sync {
    /// Declare `source` as an input. Each call adds one binding.
    fn add_source(&self, source: SourceId);

    /// Forget the binding for `source`, if any.
    fn remove_source(&self, source: SourceId);

    /// Receive a texture pushed by `source`.
    fn new_texture_available(&self, frame: &TextureFrame, source: SourceId);
}

/// A node that produces textures and broadcasts them to its consumers.
pub trait ImageSource: Send + Sync {
    fn source_id(&self) -> SourceId;

    /// Insert `consumer` at `index` (append when `None`) and register this
    /// source with it.
    fn attach_consumer(&self, consumer: Arc<dyn ImageConsumer>, index: Option<usize>);

    /// Remove `consumer` by identity. The consumer is told to forget this
    /// source only if it was attached.
    fn remove_consumer(&self, consumer: &dyn ImageConsumer);

    /// Detach every consumer, notifying each one.
    fn remove_all_consumers(&self);

    /// Current consumers in delivery order.
    fn consumers(&self) -> Vec<Arc<dyn ImageConsumer>>;

    /// Append `consumer` and hand it back for chaining.
    fn add_consumer<C>(&self, consumer: Arc<C>) -> Arc<C>
    where
        C: ImageConsumer + 'static,
        Self: Sized,
    {
        self.attach_consumer(consumer.clone(), None);
        consumer
    }

    /// Insert `consumer` so it receives frames at position `index`.
    fn add_consumer_at(&self, consumer: Arc<dyn ImageConsumer>, index: usize) {
        self.attach_consumer(consumer, Some(index));
    }
}

/// Ordered consumer list held inside a source's locked state.
#[derive(Default)]
pub(crate) struct ConsumerList {
    consumers: Vec<Arc<dyn ImageConsumer>>,
}

impl ConsumerList {
    /// Insert at `index`, clamped to the list length.
    pub(crate) fn insert(&mut self, consumer: Arc<dyn ImageConsumer>, index: Option<usize>) {
        let index = index.map_or(self.consumers.len(), |i| i.min(self.consumers.len()));
        self.consumers.insert(index, consumer);
    }

    /// Remove the first entry that is `consumer`, returning it.
    pub(crate) fn remove(&mut self, consumer: &dyn ImageConsumer) -> Option<Arc<dyn ImageConsumer>> {
        let target = consumer as *const dyn ImageConsumer;
        let index = self
            .consumers
            .iter()
            .position(|c| std::ptr::addr_eq(Arc::as_ptr(c), target))?;
        Some(self.consumers.remove(index))
    }

    pub(crate) fn take_all(&mut self) -> Vec<Arc<dyn ImageConsumer>> {
        std::mem::take(&mut self.consumers)
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn ImageConsumer>> {
        self.consumers.clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    impl ImageConsumer for Nothing {
        fn add_source(&self, _source: SourceId) {}
        fn remove_source(&self, _source: SourceId) {}
        fn new_texture_available(&self, _frame: &TextureFrame, _source: SourceId) {}
    }

    #[test]
    fn source_ids_are_unique() {
        assert_ne!(SourceId::next(), SourceId::next());
    }

    #[test]
    fn insert_clamps_and_orders() {
        let a: Arc<dyn ImageConsumer> = Arc::new(Nothing);
        let b: Arc<dyn ImageConsumer> = Arc::new(Nothing);
        let c: Arc<dyn ImageConsumer> = Arc::new(Nothing);
        let mut list = ConsumerList::default();
        list.insert(a.clone(), None);
        list.insert(b.clone(), Some(99));
        list.insert(c.clone(), Some(0));

        let order = list.snapshot();
        assert!(Arc::ptr_eq(&order[0], &c));
        assert!(Arc::ptr_eq(&order[1], &a));
        assert!(Arc::ptr_eq(&order[2], &b));
    }

    #[test]
    fn removal_is_by_identity() {
        let a = Arc::new(Nothing);
        let twin = Arc::new(Nothing);
        let mut list = ConsumerList::default();
        list.insert(a.clone(), None);

        assert!(list.remove(&*twin).is_none());
        assert!(list.remove(&*a).is_some());
        assert!(list.is_empty());
        assert!(list.remove(&*a).is_none());
    }
}
