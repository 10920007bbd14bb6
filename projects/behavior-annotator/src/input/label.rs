// Per-behavior label input: one explicit phase per configured behavior
//
// toggle: press opens, next press closes. hold: press opens, release closes.
// both: a short press acts like toggle, a press still held after the hold time
// becomes a hold range starting where the key went down. Closing writes the
// range to the store in one step.

use crate::annotation::{AnnotationStore, RangeOptions};
use crate::config::{AnnotatorConfig, InputMode};
use crate::undo::UndoGate;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPhase {
    Idle,
    /// `both` mode press awaiting its outcome. `open` carries the start of a
    /// toggle range that was already open when the key went down.
    Pending {
        deadline: Instant,
        press_frame: usize,
        open: Option<usize>,
    },
    Open {
        start: usize,
        release_closes: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub phase: LabelPhase,
    pub held: bool,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            phase: LabelPhase::Idle,
            held: false,
        }
    }
}

impl Track {
    fn open_start(&self) -> Option<usize> {
        match self.phase {
            LabelPhase::Open { start, .. } => Some(start),
            LabelPhase::Pending { open, .. } => open,
            LabelPhase::Idle => None,
        }
    }

    fn is_engaged(&self) -> bool {
        self.held || self.phase != LabelPhase::Idle
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelEvent {
    Opened {
        behavior: String,
        start: usize,
    },
    /// `frames` is the number of frames written.
    Closed {
        behavior: String,
        start: usize,
        end: usize,
        frames: usize,
    },
    /// Labels stripped after the target of a backward move.
    Removed {
        behavior: String,
        frames: Vec<usize>,
    },
}

/// Everything a handler may read or mutate besides the machine itself.
pub struct LabelContext<'a> {
    pub store: &'a mut AnnotationStore,
    pub undo: &'a mut UndoGate,
    pub config: &'a AnnotatorConfig,
    pub current_frame: usize,
}

impl LabelContext<'_> {
    fn range_options(&self) -> RangeOptions {
        RangeOptions {
            include_last_frame: self.config.include_last_frame,
            multitrack: self.config.multitrack,
        }
    }
}

pub struct LabelStateMachine {
    tracks: BTreeMap<String, Track>,
    mode: InputMode,
}

impl LabelStateMachine {
    pub fn new(mode: InputMode) -> Self {
        Self {
            tracks: BTreeMap::new(),
            mode,
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn track(&self, behavior: &str) -> Option<&Track> {
        self.tracks.get(behavior)
    }

    /// Cancels pending disambiguation. Open ranges stay open and close by the
    /// new mode's rule.
    pub fn set_mode(&mut self, mode: InputMode) {
        if mode == self.mode {
            return;
        }
        tracing::debug!("Label input mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        for track in self.tracks.values_mut() {
            track.phase = match track.phase {
                LabelPhase::Pending { open: None, .. } => LabelPhase::Idle,
                LabelPhase::Pending {
                    open: Some(start), ..
                }
                | LabelPhase::Open { start, .. } => LabelPhase::Open {
                    start,
                    release_closes: mode == InputMode::Hold,
                },
                LabelPhase::Idle => LabelPhase::Idle,
            };
        }
    }

    fn sync_mode(&mut self, config: &AnnotatorConfig) {
        if config.input_mode != self.mode {
            self.set_mode(config.input_mode);
        }
    }

    pub fn press(
        &mut self,
        behavior: &str,
        repeat: bool,
        now: Instant,
        ctx: &mut LabelContext<'_>,
    ) -> Vec<LabelEvent> {
        self.sync_mode(ctx.config);
        if !ctx.config.has_behavior(behavior) {
            tracing::debug!("Ignoring press for unknown behavior {:?}", behavior);
            return Vec::new();
        }
        let track = self.tracks.entry(behavior.to_string()).or_default();
        if repeat || track.held {
            return Vec::new();
        }
        track.held = true;

        let current = ctx.current_frame;
        let mut events = Vec::new();
        match (self.mode, track.phase) {
            (InputMode::Toggle, LabelPhase::Open { start, .. }) => {
                events.extend(close(behavior, track, start, ctx));
            }
            (InputMode::Toggle, _) => {
                events.push(open(behavior, track, current, false, ctx));
            }
            (InputMode::Hold, LabelPhase::Open { start, .. }) => {
                track.phase = LabelPhase::Open {
                    start,
                    release_closes: true,
                };
            }
            (InputMode::Hold, _) => {
                events.push(open(behavior, track, current, true, ctx));
            }
            (InputMode::Both, phase) => {
                let open = match phase {
                    LabelPhase::Open { start, .. } => Some(start),
                    _ => None,
                };
                track.phase = LabelPhase::Pending {
                    deadline: now + ctx.config.hold_time(),
                    press_frame: current,
                    open,
                };
            }
        }
        events
    }

    pub fn release(&mut self, behavior: &str, now: Instant, ctx: &mut LabelContext<'_>) -> Vec<LabelEvent> {
        self.sync_mode(ctx.config);
        let Some(track) = self.tracks.get_mut(behavior) else {
            return Vec::new();
        };
        if !track.held {
            return Vec::new();
        }
        track.held = false;

        let mut events = Vec::new();
        match track.phase {
            LabelPhase::Pending {
                deadline,
                press_frame,
                open: existing,
            } => {
                let long_press = now >= deadline;
                match (existing, long_press) {
                    (Some(start), _) => events.extend(close(behavior, track, start, ctx)),
                    (None, true) => {
                        events.push(open(behavior, track, press_frame, true, ctx));
                        events.extend(close(behavior, track, press_frame, ctx));
                    }
                    (None, false) => {
                        events.push(open(behavior, track, press_frame, false, ctx));
                    }
                }
            }
            LabelPhase::Open {
                start,
                release_closes: true,
            } => events.extend(close(behavior, track, start, ctx)),
            _ => {}
        }

        ctx.undo.reset();
        events
    }

    /// Promotes `both` mode presses whose hold time has elapsed.
    pub fn tick(&mut self, now: Instant, ctx: &mut LabelContext<'_>) -> Vec<LabelEvent> {
        self.sync_mode(ctx.config);
        let mut events = Vec::new();
        for (behavior, track) in self.tracks.iter_mut() {
            let LabelPhase::Pending {
                deadline,
                press_frame,
                open: existing,
            } = track.phase
            else {
                continue;
            };
            if now < deadline || !track.held {
                continue;
            }
            match existing {
                Some(start) => {
                    track.phase = LabelPhase::Open {
                        start,
                        release_closes: true,
                    };
                }
                None => events.push(open(behavior, track, press_frame, true, ctx)),
            }
        }
        events
    }

    /// True while any behavior is held, pending or open.
    pub fn active_or_held(&self) -> bool {
        self.tracks.values().any(Track::is_engaged)
    }

    /// `(behavior, start)` of every range currently open.
    pub fn open_sessions(&self) -> Vec<(String, usize)> {
        self.tracks
            .iter()
            .filter_map(|(b, t)| t.open_start().map(|start| (b.clone(), start)))
            .collect()
    }

    /// Drops a behavior's track without writing its open range.
    pub fn forget(&mut self, behavior: &str) {
        self.tracks.remove(behavior);
    }

    /// Forgets every track whose behavior is no longer configured.
    pub fn retain_configured(&mut self, config: &AnnotatorConfig) {
        self.tracks.retain(|behavior, _| {
            let keep = config.has_behavior(behavior);
            if !keep {
                tracing::debug!("Forgetting track for removed behavior {:?}", behavior);
            }
            keep
        });
    }

    /// Before moving back to `target`: every held or open behavior already
    /// labeled on `target` loses its labels on later frames, and an open range
    /// starting after `target` is pulled back to it.
    pub fn backward_cleanup(&mut self, target: usize, ctx: &mut LabelContext<'_>) -> Vec<LabelEvent> {
        let mut events = Vec::new();
        for (behavior, track) in self.tracks.iter_mut() {
            if !track.is_engaged() || !ctx.store.contains(target, behavior) {
                continue;
            }
            let has_future = ctx.store.frames_with(behavior).any(|f| f > target);
            if has_future {
                ctx.undo.notify(ctx.store);
                let frames = ctx.store.remove_after(behavior, target);
                tracing::debug!(
                    "Backward cleanup: removed {:?} from {} frames after {}",
                    behavior,
                    frames.len(),
                    target
                );
                events.push(LabelEvent::Removed {
                    behavior: behavior.clone(),
                    frames,
                });
            }
            clamp_open_start(track, target);
        }
        events
    }
}

fn clamp_open_start(track: &mut Track, target: usize) {
    match &mut track.phase {
        LabelPhase::Open { start, .. } => *start = (*start).min(target),
        LabelPhase::Pending {
            press_frame, open, ..
        } => {
            *press_frame = (*press_frame).min(target);
            if let Some(start) = open {
                *start = (*start).min(target);
            }
        }
        LabelPhase::Idle => {}
    }
}

fn open(
    behavior: &str,
    track: &mut Track,
    start: usize,
    release_closes: bool,
    ctx: &mut LabelContext<'_>,
) -> LabelEvent {
    ctx.undo.notify(ctx.store);
    track.phase = LabelPhase::Open {
        start,
        release_closes,
    };
    tracing::debug!("Opened {:?} at frame {}", behavior, start);
    LabelEvent::Opened {
        behavior: behavior.to_string(),
        start,
    }
}

fn close(
    behavior: &str,
    track: &mut Track,
    start: usize,
    ctx: &mut LabelContext<'_>,
) -> Option<LabelEvent> {
    track.phase = LabelPhase::Idle;
    if !ctx.config.has_behavior(behavior) {
        tracing::debug!("Dropping range for unconfigured behavior {:?}", behavior);
        return None;
    }
    let end = ctx.current_frame;
    let opts = ctx.range_options();
    let frames = ctx.store.apply_range(behavior, start as i64, end as i64, opts);
    tracing::debug!("Closed {:?} over {}..={} ({} frames)", behavior, start, end, frames);
    Some(LabelEvent::Closed {
        behavior: behavior.to_string(),
        start,
        end,
        frames,
    })
}
