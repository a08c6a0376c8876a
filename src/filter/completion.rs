//! Callbacks fired when a filter's GPU work finishes.

use crate::error::CompletionError;
use crate::texture::{CameraFacing, Texture};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one unit of GPU work, with the provenance of its frame.
#[derive(Debug, Clone)]
pub struct CompletionInfo {
    pub result: Result<Texture, CompletionError>,
    pub sample_time: Option<Duration>,
    pub facing: Option<CameraFacing>,
    pub is_photo: bool,
}

/// Handlers run on whichever thread polls the device, or, for a
/// synchronous filter, on the dispatching thread once the wait returns.
/// The emitting filter is never locked while they run, though it may be
/// in the middle of another cycle.
pub type CompletionHandler = Arc<dyn Fn(&CompletionInfo) + Send + Sync>;

/// Key returned when registering a handler, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionKey(u64);

impl CompletionKey {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CompletionKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
pub(crate) struct CompletionRegistry {
    entries: Vec<(CompletionKey, CompletionHandler)>,
}

impl CompletionRegistry {
    pub(crate) fn add(&mut self, handler: CompletionHandler) -> CompletionKey {
        let key = CompletionKey::next();
        self.entries.push((key, handler));
        key
    }

    pub(crate) fn remove(&mut self, key: CompletionKey) {
        self.entries.retain(|(k, _)| *k != key);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn handlers(&self) -> Vec<CompletionHandler> {
        self.entries.iter().map(|(_, h)| h.clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_by_key_leaves_others() {
        let mut registry = CompletionRegistry::default();
        let first = registry.add(Arc::new(|_: &CompletionInfo| {}));
        let second = registry.add(Arc::new(|_: &CompletionInfo| {}));
        assert_ne!(first, second);

        registry.remove(first);
        assert_eq!(registry.len(), 1);
        registry.remove(first);
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.handlers().is_empty());
    }
}
