// Frame delivery: cache, serialized decode access and background prefetch

pub mod cache;
pub mod gateway;
pub mod prefetch;

use crate::error::DecodeError;
use crate::video::VideoSource;
use cache::FrameCache;
use gateway::DecodeGateway;
use image::RgbImage;
use prefetch::{PrefetchEvent, Prefetcher};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A decoded frame. The image is shared and immutable, so handing it to the
/// display while the cache keeps a copy cannot corrupt either.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: usize,
    pub image: Arc<RgbImage>,
}

/// Owns the frame pipeline for one loaded video.
pub struct FramePlayer {
    cache: Arc<FrameCache>,
    gateway: Arc<DecodeGateway>,
    prefetcher: Prefetcher,
    radius: usize,
}

impl FramePlayer {
    pub fn new(
        source: Box<dyn VideoSource>,
        cache_capacity: usize,
        radius: usize,
        debounce: Duration,
    ) -> Self {
        let cache = Arc::new(FrameCache::new(cache_capacity));
        let gateway = Arc::new(DecodeGateway::new(source));
        let prefetcher = Prefetcher::new(Arc::clone(&gateway), Arc::clone(&cache), debounce);
        Self {
            cache,
            gateway,
            prefetcher,
            radius,
        }
    }

    pub fn total_frames(&self) -> usize {
        self.gateway.total_frames()
    }

    pub fn frame_rate(&self) -> f64 {
        self.gateway.frame_rate()
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn set_radius(&mut self, radius: usize) {
        self.radius = radius;
    }

    pub fn set_debounce(&mut self, debounce: Duration) {
        self.prefetcher.set_debounce(debounce);
    }

    /// Cache hit, or a synchronous decode on the calling thread. Waits for the
    /// gateway if the prefetcher is mid-decode.
    pub fn frame(&self, index: usize) -> Result<Frame, DecodeError> {
        if let Some(frame) = self.cache.get(index) {
            return Ok(frame);
        }
        let image = Arc::new(self.gateway.read_frame(index)?);
        self.cache.put(index, Arc::clone(&image));
        Ok(Frame { index, image })
    }

    /// Re-arm prefetch around `pivot` after the debounce delay.
    pub fn schedule_prefetch(&mut self, pivot: usize, now: Instant) {
        self.prefetcher.schedule(pivot, self.radius, now);
    }

    /// Start prefetching around `pivot` right away.
    pub fn prefetch_now(&mut self, pivot: usize) -> u64 {
        self.prefetcher.start(pivot, self.radius)
    }

    /// Starts a due prefetch and returns every event produced since the last call.
    pub fn poll(&mut self, now: Instant) -> Vec<PrefetchEvent> {
        self.prefetcher.poll(now);
        self.prefetcher.events().try_iter().collect()
    }

    pub fn events(&self) -> crossbeam::channel::Receiver<PrefetchEvent> {
        self.prefetcher.events()
    }

    pub fn is_prefetching(&self) -> bool {
        self.prefetcher.is_running()
    }

    pub fn stop_prefetch(&mut self) {
        self.prefetcher.stop();
    }
}

impl Drop for FramePlayer {
    fn drop(&mut self) {
        // Join the worker before the gateway goes away.
        self.prefetcher.stop();
        self.gateway.release();
    }
}
