use super::Frame;
use image::RgbImage;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_CAPACITY: usize = 500;

/// Bounded, thread-safe LRU store of decoded frames keyed by frame index.
///
/// The lock is held only for the duration of a single map operation, never
/// across a decode.
pub struct FrameCache {
    inner: Mutex<LruCache<usize, Arc<RgbImage>>>,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    // A panic while holding the lock cannot leave the LRU half-updated in a way
    // that matters to readers, so a poisoned lock is simply recovered.
    fn lock(&self) -> MutexGuard<'_, LruCache<usize, Arc<RgbImage>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the cached frame and marks it most recently used.
    pub fn get(&self, index: usize) -> Option<Frame> {
        self.lock().get(&index).map(|image| Frame {
            index,
            image: Arc::clone(image),
        })
    }

    /// Inserts or replaces a frame, evicting the least recently used entry when full.
    pub fn put(&self, index: usize, image: impl Into<Arc<RgbImage>>) {
        let evicted = self.lock().push(index, image.into());
        if let Some((old, _)) = evicted {
            if old != index {
                tracing::trace!("FrameCache: evicted frame {}", old);
            }
        }
    }

    /// Membership test that does not touch recency order.
    pub fn contains(&self, index: usize) -> bool {
        self.lock().contains(&index)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Cached indices from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<usize> {
        let mut keys: Vec<usize> = self.lock().iter().map(|(k, _)| *k).collect();
        keys.reverse();
        keys
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
