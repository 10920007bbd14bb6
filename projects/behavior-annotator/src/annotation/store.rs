use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

/// How a closed range is written into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeOptions {
    /// Write `[start, end]` when true, `[start, end)` otherwise.
    pub include_last_frame: bool,
    /// Merge into each frame's label set when true, replace it otherwise.
    pub multitrack: bool,
}

impl Default for RangeOptions {
    fn default() -> Self {
        Self {
            include_last_frame: true,
            multitrack: true,
        }
    }
}

/// Frame index → set of behaviors active on that frame.
///
/// A frame is present only while its set is non-empty. Frames outside
/// `[0, total_frames)` are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationStore {
    total_frames: usize,
    frames: BTreeMap<usize, BTreeSet<String>>,
}

impl AnnotationStore {
    pub fn new(total_frames: usize) -> Self {
        Self {
            total_frames,
            frames: BTreeMap::new(),
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Clamp an arbitrary (possibly negative) index into the frame domain.
    pub fn clamp_frame(&self, frame: i64) -> Option<usize> {
        if self.total_frames == 0 {
            return None;
        }
        Some(frame.clamp(0, self.total_frames as i64 - 1) as usize)
    }

    pub fn labels(&self, frame: usize) -> Option<&BTreeSet<String>> {
        self.frames.get(&frame)
    }

    pub fn contains(&self, frame: usize, behavior: &str) -> bool {
        self.frames
            .get(&frame)
            .map(|set| set.contains(behavior))
            .unwrap_or(false)
    }

    /// Number of labeled frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BTreeSet<String>)> {
        self.frames.iter().map(|(f, set)| (*f, set))
    }

    /// Frames carrying `behavior`, ascending.
    pub fn frames_with<'a>(&'a self, behavior: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.frames
            .iter()
            .filter(move |(_, set)| set.contains(behavior))
            .map(|(f, _)| *f)
    }

    /// Label a single frame. Returns whether the store changed.
    pub fn add(&mut self, frame: usize, behavior: &str, multitrack: bool) -> bool {
        if frame >= self.total_frames {
            return false;
        }
        let set = self.frames.entry(frame).or_default();
        if multitrack {
            set.insert(behavior.to_string())
        } else {
            if set.len() == 1 && set.contains(behavior) {
                return false;
            }
            set.clear();
            set.insert(behavior.to_string());
            true
        }
    }

    /// Remove one behavior from a frame, dropping the frame if it empties.
    pub fn remove(&mut self, frame: usize, behavior: &str) -> bool {
        let Some(set) = self.frames.get_mut(&frame) else {
            return false;
        };
        let removed = set.remove(behavior);
        if set.is_empty() {
            self.frames.remove(&frame);
        }
        removed
    }

    /// Drop every label on a frame.
    pub fn clear_frame(&mut self, frame: usize) -> Option<BTreeSet<String>> {
        self.frames.remove(&frame)
    }

    pub fn has_labels_in(&self, a: usize, b: usize) -> bool {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        self.frames.range(lo..=hi).next().is_some()
    }

    /// Drop every label on frames in `[a, b]` (either order). Returns the cleared frames.
    pub fn clear_range(&mut self, a: usize, b: usize) -> Vec<usize> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let cleared: Vec<usize> = self.frames.range(lo..=hi).map(|(f, _)| *f).collect();
        for f in &cleared {
            self.frames.remove(f);
        }
        cleared
    }

    /// Frames a closed range `[start, end]` would write, after clamping and swapping.
    pub fn range_span(
        &self,
        start: i64,
        end: i64,
        include_last_frame: bool,
    ) -> Option<RangeInclusive<usize>> {
        let a = self.clamp_frame(start)?;
        let b = self.clamp_frame(end)?;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        if include_last_frame {
            Some(lo..=hi)
        } else if hi > lo {
            Some(lo..=hi - 1)
        } else {
            None
        }
    }

    /// Write `behavior` over a range. Applying the same range twice is a no-op
    /// the second time. Returns the number of frames in the span.
    pub fn apply_range(&mut self, behavior: &str, start: i64, end: i64, opts: RangeOptions) -> usize {
        let Some(span) = self.range_span(start, end, opts.include_last_frame) else {
            return 0;
        };
        let count = span.end() - span.start() + 1;
        for frame in span {
            self.add(frame, behavior, opts.multitrack);
        }
        count
    }

    /// Remove `behavior` from every frame strictly after `frame`. Returns the affected frames.
    pub fn remove_after(&mut self, behavior: &str, frame: usize) -> Vec<usize> {
        let affected: Vec<usize> = self
            .frames
            .range(frame.saturating_add(1)..)
            .filter(|(_, set)| set.contains(behavior))
            .map(|(f, _)| *f)
            .collect();
        for f in &affected {
            self.remove(*f, behavior);
        }
        affected
    }

    /// Strip a behavior from the whole store. Returns how many frames lost it.
    pub fn remove_behavior(&mut self, behavior: &str) -> usize {
        let mut count = 0;
        self.frames.retain(|_, set| {
            if set.remove(behavior) {
                count += 1;
            }
            !set.is_empty()
        });
        count
    }

    /// Replace a frame's set wholesale (used when loading persisted data).
    pub fn set_labels(&mut self, frame: usize, labels: BTreeSet<String>) {
        if frame >= self.total_frames {
            return;
        }
        if labels.is_empty() {
            self.frames.remove(&frame);
        } else {
            self.frames.insert(frame, labels);
        }
    }
}
