// Prefetch worker: decodes a window of frames around the pivot into the cache
//
// One generation runs at a time. Re-arming stops and joins the previous worker
// before spawning, so two generations never share the decode handle.

use super::cache::FrameCache;
use super::gateway::DecodeGateway;
use crossbeam::channel::{self, Receiver, Sender};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_RADIUS: usize = 200;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchEvent {
    /// Emitted after every frame inserted into the cache.
    Progress {
        generation: u64,
        done: usize,
        total: usize,
    },
    /// Emitted once per generation, also when it was cancelled.
    Finished {
        generation: u64,
        done: usize,
        total: usize,
        completed: bool,
    },
}

/// `[pivot - radius, pivot + radius)` clipped to `[0, total_frames)`.
pub fn prefetch_window(pivot: usize, radius: usize, total_frames: usize) -> Range<usize> {
    let start = pivot.saturating_sub(radius).min(total_frames);
    let end = pivot.saturating_add(radius).min(total_frames);
    start..end.max(start)
}

/// Window indices ordered by distance from the pivot, forward side first on ties,
/// keeping at most `limit` of them.
fn fetch_order(window: Range<usize>, pivot: usize, limit: usize) -> Vec<usize> {
    let mut order: Vec<usize> = window.collect();
    order.sort_by_key(|&i| (i.abs_diff(pivot), i < pivot));
    order.truncate(limit);
    order
}

struct PrefetchJob {
    generation: u64,
    /// Nearest first. Never longer than the cache capacity.
    order: Vec<usize>,
    gateway: Arc<DecodeGateway>,
    cache: Arc<FrameCache>,
}

struct PrefetchWorker {
    generation: u64,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct PendingStart {
    pivot: usize,
    radius: usize,
    due: Instant,
}

pub struct Prefetcher {
    gateway: Arc<DecodeGateway>,
    cache: Arc<FrameCache>,
    tx: Sender<PrefetchEvent>,
    rx: Receiver<PrefetchEvent>,
    worker: Option<PrefetchWorker>,
    generation: u64,
    debounce: Duration,
    pending: Option<PendingStart>,
}

impl Prefetcher {
    pub fn new(gateway: Arc<DecodeGateway>, cache: Arc<FrameCache>, debounce: Duration) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            gateway,
            cache,
            tx,
            rx,
            worker: None,
            generation: 0,
            debounce,
            pending: None,
        }
    }

    /// Receiver for progress and completion events.
    pub fn events(&self) -> Receiver<PrefetchEvent> {
        self.rx.clone()
    }

    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop any running generation, then start decoding the window around `pivot`.
    /// A window wider than the cache is narrowed to the frames nearest the pivot.
    /// Returns the new generation number.
    pub fn start(&mut self, pivot: usize, radius: usize) -> u64 {
        self.stop();
        self.pending = None;

        let window = prefetch_window(pivot, radius, self.gateway.total_frames());
        let order = fetch_order(window, pivot, self.cache.capacity());

        self.generation += 1;
        let job = PrefetchJob {
            generation: self.generation,
            order,
            gateway: Arc::clone(&self.gateway),
            cache: Arc::clone(&self.cache),
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let tx = self.tx.clone();

        tracing::debug!(
            "Spawning prefetch worker generation={} pivot={} frames={}",
            job.generation,
            pivot,
            job.order.len()
        );
        let handle = thread::spawn(move || prefetch_worker(job, worker_cancel, tx));

        self.worker = Some(PrefetchWorker {
            generation: self.generation,
            cancel,
            handle,
        });
        self.generation
    }

    /// Request cancellation and wait for the worker to exit. The worker checks
    /// the flag between frames, so this waits at most one decode.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.store(true, Ordering::Relaxed);
            if worker.handle.join().is_err() {
                tracing::error!("Prefetch worker {} panicked", worker.generation);
            }
        }
    }

    /// Record a pivot to prefetch once no newer request arrives for the debounce delay.
    pub fn schedule(&mut self, pivot: usize, radius: usize, now: Instant) {
        self.pending = Some(PendingStart {
            pivot,
            radius,
            due: now + self.debounce,
        });
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Start the scheduled generation if its debounce delay has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<u64> {
        let due = self.pending.as_ref().map(|p| p.due)?;
        if now < due {
            return None;
        }
        let pending = self.pending.take()?;
        Some(self.start(pending.pivot, pending.radius))
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn prefetch_worker(job: PrefetchJob, cancel: Arc<AtomicBool>, tx: Sender<PrefetchEvent>) {
    // Promote frames already cached, farthest first, so the frames nearest the
    // pivot are the last to be evicted by this generation's inserts.
    let mut indices = Vec::with_capacity(job.order.len());
    for &index in job.order.iter().rev() {
        if job.cache.get(index).is_none() {
            indices.push(index);
        }
    }
    indices.reverse();

    let total = indices.len();
    let mut done = 0;
    let mut completed = true;

    for index in indices {
        if cancel.load(Ordering::Relaxed) {
            completed = false;
            break;
        }

        // The foreground may have decoded it since the window was computed.
        let fetched = if job.cache.contains(index) {
            true
        } else {
            match job.gateway.read_frame(index) {
                Ok(image) => {
                    job.cache.put(index, image);
                    true
                }
                Err(e) => {
                    tracing::debug!("Prefetch generation {}: skip frame {}: {}", job.generation, index, e);
                    false
                }
            }
        };
        if !fetched {
            continue;
        }

        done += 1;
        if tx
            .send(PrefetchEvent::Progress {
                generation: job.generation,
                done,
                total,
            })
            .is_err()
        {
            return; // Receiver closed
        }
    }

    tracing::debug!(
        "Prefetch worker generation={} finished done={}/{} completed={}",
        job.generation,
        done,
        total,
        completed
    );
    let _ = tx.send(PrefetchEvent::Finished {
        generation: job.generation,
        done,
        total,
        completed,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::gateway::tests::ReentryProbe;
    use crate::video::synthetic::SyntheticSource;

    fn setup(frames: usize, delay: Duration) -> (Arc<DecodeGateway>, Arc<FrameCache>) {
        let source = SyntheticSource::new(frames, 30.0).with_decode_delay(delay);
        (
            Arc::new(DecodeGateway::new(Box::new(source))),
            Arc::new(FrameCache::new(500)),
        )
    }

    fn wait_finished(rx: &Receiver<PrefetchEvent>, generation: u64) -> PrefetchEvent {
        loop {
            let event = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("prefetch did not finish");
            if let PrefetchEvent::Finished { generation: g, .. } = event {
                if g == generation {
                    return event;
                }
            }
        }
    }

    #[test]
    fn test_window_clipping() {
        assert_eq!(prefetch_window(5, 10, 100), 0..15);
        assert_eq!(prefetch_window(95, 10, 100), 85..100);
        assert_eq!(prefetch_window(50, 10, 100), 40..60);
        assert_eq!(prefetch_window(0, 0, 100), 0..0);
        assert_eq!(prefetch_window(500, 10, 100), 100..100);
    }

    #[test]
    fn test_fetch_order_is_nearest_first() {
        assert_eq!(fetch_order(3..8, 5, 10), vec![5, 6, 4, 7, 3]);
        assert_eq!(fetch_order(3..8, 5, 3), vec![5, 6, 4]);
    }

    #[test]
    fn test_window_wider_than_cache_keeps_frames_near_pivot() {
        let source = SyntheticSource::new(100, 30.0);
        let gateway = Arc::new(DecodeGateway::new(Box::new(source)));
        let cache = Arc::new(FrameCache::new(10));
        let mut prefetcher = Prefetcher::new(gateway, Arc::clone(&cache), DEFAULT_DEBOUNCE);
        let rx = prefetcher.events();

        let generation = prefetcher.start(50, 10);
        let finished = wait_finished(&rx, generation);

        assert_eq!(
            finished,
            PrefetchEvent::Finished {
                generation,
                done: 10,
                total: 10,
                completed: true
            }
        );
        assert_eq!(cache.len(), 10);
        for i in 46..=55 {
            assert!(cache.contains(i), "frame {} missing", i);
        }
    }

    #[test]
    fn test_cached_pivot_survives_full_cache() {
        let source = SyntheticSource::new(100, 30.0);
        let gateway = Arc::new(DecodeGateway::new(Box::new(source)));
        let cache = Arc::new(FrameCache::new(10));
        // Pivot is the least recently used entry of a full cache.
        cache.put(50, image::RgbImage::new(1, 1));
        for i in 90..99 {
            cache.put(i, image::RgbImage::new(1, 1));
        }
        let mut prefetcher = Prefetcher::new(gateway, Arc::clone(&cache), DEFAULT_DEBOUNCE);
        let rx = prefetcher.events();

        let generation = prefetcher.start(50, 10);
        wait_finished(&rx, generation);

        assert!(cache.contains(50));
        assert_eq!(cache.len(), 10);
        assert!((90..99).all(|i| !cache.contains(i)));
    }

    #[test]
    fn test_prefetch_fills_window_and_reports_progress() {
        let (gateway, cache) = setup(100, Duration::ZERO);
        cache.put(12, image::RgbImage::new(1, 1));
        let mut prefetcher = Prefetcher::new(gateway, Arc::clone(&cache), DEFAULT_DEBOUNCE);
        let rx = prefetcher.events();

        let generation = prefetcher.start(10, 5);
        let finished = wait_finished(&rx, generation);

        assert_eq!(
            finished,
            PrefetchEvent::Finished {
                generation,
                done: 9,
                total: 9,
                completed: true
            }
        );
        for i in 5..15 {
            assert!(cache.contains(i), "frame {} missing", i);
        }
        assert!(!cache.contains(15));
        assert!(!cache.contains(4));
    }

    #[test]
    fn test_frames_cached_by_foreground_count_as_done() {
        let (gateway, cache) = setup(100, Duration::from_millis(3));
        let mut prefetcher = Prefetcher::new(Arc::clone(&gateway), Arc::clone(&cache), DEFAULT_DEBOUNCE);
        let rx = prefetcher.events();

        let generation = prefetcher.start(50, 10);
        // Farthest frames are fetched last, so the foreground gets there first.
        for i in [40, 41, 42] {
            cache.put(i, image::RgbImage::new(1, 1));
        }
        let finished = wait_finished(&rx, generation);

        match finished {
            PrefetchEvent::Finished {
                done,
                total,
                completed,
                ..
            } => {
                assert!(completed);
                assert_eq!(done, total);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!((40..60).all(|i| cache.contains(i)));
    }

    #[test]
    fn test_restart_cancels_previous_generation() {
        let (gateway, cache) = setup(1_000, Duration::from_millis(2));
        let mut prefetcher = Prefetcher::new(gateway, cache, DEFAULT_DEBOUNCE);
        let rx = prefetcher.events();

        let first = prefetcher.start(100, 200);
        thread::sleep(Duration::from_millis(10));
        let second = prefetcher.start(800, 5);

        let mut first_finished = None;
        let mut second_finished = None;
        while second_finished.is_none() {
            let event = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("prefetch did not finish");
            if let PrefetchEvent::Finished {
                generation,
                completed,
                ..
            } = event
            {
                if generation == first {
                    // Joined by `start`, so it must arrive before the second generation ends.
                    first_finished = Some(completed);
                } else if generation == second {
                    second_finished = Some(completed);
                }
            }
        }
        assert_eq!(first_finished, Some(false));
        assert_eq!(second_finished, Some(true));
    }

    #[test]
    fn test_foreground_and_prefetch_share_gateway_safely() {
        let probe = ReentryProbe::new(400);
        let overlaps = Arc::clone(&probe.overlaps);
        let gateway = Arc::new(DecodeGateway::new(Box::new(probe)));
        let cache = Arc::new(FrameCache::new(500));
        let mut prefetcher =
            Prefetcher::new(Arc::clone(&gateway), Arc::clone(&cache), DEFAULT_DEBOUNCE);
        let rx = prefetcher.events();

        let generation = prefetcher.start(200, 200);
        for i in (0..400).rev().step_by(7) {
            if cache.get(i).is_none() {
                let image = gateway.read_frame(i).unwrap();
                cache.put(i, image);
            }
        }
        wait_finished(&rx, generation);

        assert_eq!(overlaps.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_debounce_coalesces_bursts() {
        let (gateway, cache) = setup(100, Duration::ZERO);
        let mut prefetcher = Prefetcher::new(gateway, cache, Duration::from_millis(100));
        let t0 = Instant::now();

        prefetcher.schedule(10, 5, t0);
        prefetcher.schedule(11, 5, t0 + Duration::from_millis(60));
        assert_eq!(prefetcher.poll(t0 + Duration::from_millis(120)), None);
        assert!(prefetcher.has_pending());

        let started = prefetcher.poll(t0 + Duration::from_millis(160));
        assert_eq!(started, Some(1));
        assert!(!prefetcher.has_pending());
        assert_eq!(prefetcher.poll(t0 + Duration::from_millis(400)), None);
    }
}
