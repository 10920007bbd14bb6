// Foreground owner of one annotated video: current frame, input dispatch,
// erase mode and the frame pipeline.

use crate::annotation::AnnotationStore;
use crate::config::AnnotatorConfig;
use crate::error::DecodeError;
use crate::input::label::{LabelContext, LabelEvent, LabelStateMachine};
use crate::input::navigation::{AnalogStick, NavRelease, NavigationController};
use crate::input::InputEvent;
use crate::playback::prefetch::PrefetchEvent;
use crate::playback::{Frame, FramePlayer};
use crate::undo::{UndoGate, UndoHook};
use crate::video::VideoSource;
use serde::Serialize;
use std::time::Instant;

/// Externally observable happenings, drained by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    FrameChanged {
        from: usize,
        to: usize,
    },
    RangeOpened {
        behavior: String,
        start: usize,
    },
    RangeClosed {
        behavior: String,
        start: usize,
        end: usize,
        frames: usize,
    },
    LabelsRemoved {
        behavior: String,
        frames: Vec<usize>,
    },
    FramesErased {
        frames: Vec<usize>,
    },
    PreloadProgress {
        generation: u64,
        done: usize,
        total: usize,
    },
    PreloadFinished {
        generation: u64,
        done: usize,
        total: usize,
        completed: bool,
    },
    DecodeFailed {
        frame: usize,
        error: String,
    },
}

impl From<LabelEvent> for SessionEvent {
    fn from(event: LabelEvent) -> Self {
        match event {
            LabelEvent::Opened { behavior, start } => SessionEvent::RangeOpened { behavior, start },
            LabelEvent::Closed {
                behavior,
                start,
                end,
                frames,
            } => SessionEvent::RangeClosed {
                behavior,
                start,
                end,
                frames,
            },
            LabelEvent::Removed { behavior, frames } => {
                SessionEvent::LabelsRemoved { behavior, frames }
            }
        }
    }
}

impl From<PrefetchEvent> for SessionEvent {
    fn from(event: PrefetchEvent) -> Self {
        match event {
            PrefetchEvent::Progress {
                generation,
                done,
                total,
            } => SessionEvent::PreloadProgress {
                generation,
                done,
                total,
            },
            PrefetchEvent::Finished {
                generation,
                done,
                total,
                completed,
            } => SessionEvent::PreloadFinished {
                generation,
                done,
                total,
                completed,
            },
        }
    }
}

/// An open range as shown on screen before it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangePreview {
    pub behavior: String,
    pub first: usize,
    pub last: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overlay {
    pub frame: usize,
    /// Labels stored on `frame`.
    pub labels: Vec<String>,
    pub previews: Vec<RangePreview>,
}

pub struct AnnotationSession {
    config: AnnotatorConfig,
    store: AnnotationStore,
    labels: LabelStateMachine,
    nav: NavigationController,
    stick: AnalogStick,
    player: FramePlayer,
    undo: UndoGate,
    current: usize,
    erasing: bool,
    events: Vec<SessionEvent>,
}

impl AnnotationSession {
    /// Starts preloading around frame 0 right away.
    pub fn new(source: Box<dyn VideoSource>, config: AnnotatorConfig) -> Self {
        let mut player = FramePlayer::new(
            source,
            config.cache_capacity,
            config.preload_radius,
            config.prefetch_debounce(),
        );
        let total_frames = player.total_frames();
        tracing::info!(
            "Session opened: {} frames at {:.2} fps, mode {:?}",
            total_frames,
            player.frame_rate(),
            config.input_mode
        );
        if total_frames > 0 {
            player.prefetch_now(0);
        }

        Self {
            store: AnnotationStore::new(total_frames),
            labels: LabelStateMachine::new(config.input_mode),
            nav: NavigationController::new(&config),
            stick: AnalogStick::new(),
            player,
            undo: UndoGate::default(),
            current: 0,
            erasing: false,
            events: Vec::new(),
            config,
        }
    }

    pub fn set_undo_hook(&mut self, hook: Box<dyn UndoHook>) {
        self.undo.set_hook(hook);
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    pub fn total_frames(&self) -> usize {
        self.player.total_frames()
    }

    pub fn frame_rate(&self) -> f64 {
        self.player.frame_rate()
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn player(&self) -> &FramePlayer {
        &self.player
    }

    pub fn is_erasing(&self) -> bool {
        self.erasing
    }

    pub fn open_sessions(&self) -> Vec<(String, usize)> {
        self.labels.open_sessions()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Replaces the whole store, e.g. after loading a sidecar. Open ranges are dropped.
    pub fn load_annotations(&mut self, store: AnnotationStore) {
        let total = self.total_frames();
        self.store = if store.total_frames() == total {
            store
        } else {
            tracing::warn!(
                "Loaded annotations cover {} frames, video has {}",
                store.total_frames(),
                total
            );
            let mut resized = AnnotationStore::new(total);
            for (frame, set) in store.iter() {
                resized.set_labels(frame, set.clone());
            }
            resized
        };
        self.labels = LabelStateMachine::new(self.config.input_mode);
    }

    pub fn set_config(&mut self, config: AnnotatorConfig) {
        if config.input_mode != self.config.input_mode {
            self.labels.set_mode(config.input_mode);
            self.undo.reset();
        }
        self.labels.retain_configured(&config);
        self.player.set_radius(config.preload_radius);
        self.player.set_debounce(config.prefetch_debounce());
        self.config = config;
    }

    /// Strips a behavior everywhere and drops it from the configured list.
    pub fn remove_behavior(&mut self, behavior: &str) -> usize {
        self.undo.notify(&self.store);
        self.undo.reset();
        self.labels.forget(behavior);
        self.config.behaviors.retain(|b| b != behavior);
        let count = self.store.remove_behavior(behavior);
        tracing::info!("Removed behavior {:?} from {} frames", behavior, count);
        count
    }

    fn fine_stepping(&self) -> bool {
        self.erasing || self.labels.active_or_held()
    }

    fn label_context(&mut self) -> (LabelContext<'_>, &mut LabelStateMachine) {
        (
            LabelContext {
                store: &mut self.store,
                undo: &mut self.undo,
                config: &self.config,
                current_frame: self.current,
            },
            &mut self.labels,
        )
    }

    fn push_label_events(&mut self, events: Vec<LabelEvent>) {
        self.events.extend(events.into_iter().map(SessionEvent::from));
    }

    pub fn handle(&mut self, event: InputEvent, now: Instant) {
        match event {
            InputEvent::Navigate {
                direction,
                pressed: true,
                shift,
                repeat,
            } => {
                let delta = self.nav.press(direction, shift, repeat, now, &self.config);
                self.step_by(delta, now);
            }
            InputEvent::Navigate {
                direction,
                pressed: false,
                ..
            } => {
                if self.nav.release(direction, now, &self.config) == NavRelease::Stopped {
                    self.undo.reset();
                }
            }
            InputEvent::Label {
                behavior,
                pressed,
                repeat,
            } => {
                let (mut ctx, labels) = self.label_context();
                let events = if pressed {
                    labels.press(&behavior, repeat, now, &mut ctx)
                } else {
                    labels.release(&behavior, now, &mut ctx)
                };
                self.push_label_events(events);
            }
            InputEvent::Erase { pressed: true } => {
                if !self.erasing {
                    self.erasing = true;
                    self.undo.notify(&self.store);
                    if self.store.clear_frame(self.current).is_some() {
                        self.events.push(SessionEvent::FramesErased {
                            frames: vec![self.current],
                        });
                    }
                }
            }
            InputEvent::Erase { pressed: false } => {
                if self.erasing {
                    self.erasing = false;
                    self.undo.reset();
                }
            }
            InputEvent::Fast { pressed } => self.stick.set_fast(pressed),
            InputEvent::Axis { value } => {
                let update = self.stick.update(value, &self.config);
                if update.became_neutral {
                    self.undo.reset();
                }
                self.step_by(update.frames, now);
            }
            InputEvent::Seek { frame } => self.goto_frame(frame as i64, now),
        }
    }

    /// Advances label timers, held navigation and the prefetch debounce, then
    /// collects prefetch progress.
    pub fn tick(&mut self, now: Instant) {
        let (mut ctx, labels) = self.label_context();
        let events = labels.tick(now, &mut ctx);
        self.push_label_events(events);

        let fine = self.fine_stepping();
        let delta = self.nav.tick(now, &self.config, fine);
        self.step_by(delta, now);

        let prefetch = self.player.poll(now);
        self.events.extend(prefetch.into_iter().map(SessionEvent::from));
    }

    /// While a label or erase is engaged every frame must be visited, so the
    /// delta is applied one frame at a time.
    fn step_by(&mut self, delta: i64, now: Instant) {
        if delta == 0 {
            return;
        }
        if !self.fine_stepping() {
            self.goto_frame(self.current as i64 + delta, now);
            return;
        }
        let unit = delta.signum();
        for _ in 0..delta.unsigned_abs() {
            let before = self.current;
            self.goto_frame(self.current as i64 + unit, now);
            if self.current == before {
                break;
            }
        }
    }

    /// Clamps `target` into the video, then moves there.
    pub fn goto_frame(&mut self, target: i64, now: Instant) {
        let Some(target) = self.store.clamp_frame(target) else {
            return;
        };
        let from = self.current;
        if target == from {
            return;
        }

        if target < from && self.labels.active_or_held() {
            let (mut ctx, labels) = self.label_context();
            let events = labels.backward_cleanup(target, &mut ctx);
            self.push_label_events(events);
        }

        if self.erasing {
            if self.store.has_labels_in(from, target) {
                self.undo.notify(&self.store);
                let frames = self.store.clear_range(from, target);
                self.events.push(SessionEvent::FramesErased { frames });
            }
        }

        self.current = target;
        self.player.schedule_prefetch(target, now);
        self.events.push(SessionEvent::FrameChanged { from, to: target });
    }

    /// Image for the current frame, decoding synchronously on a cache miss.
    pub fn display_frame(&mut self) -> Option<Frame> {
        match self.player.frame(self.current) {
            Ok(frame) => Some(frame),
            Err(error) => {
                self.report_decode_failure(self.current, &error);
                None
            }
        }
    }

    fn report_decode_failure(&mut self, frame: usize, error: &DecodeError) {
        tracing::warn!("Failed to decode frame {}: {}", frame, error);
        self.events.push(SessionEvent::DecodeFailed {
            frame,
            error: error.to_string(),
        });
    }

    /// Stored labels on the current frame plus previews of open ranges.
    pub fn overlay(&self) -> Overlay {
        let labels = self
            .store
            .labels(self.current)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let previews = self
            .labels
            .open_sessions()
            .into_iter()
            .map(|(behavior, start)| RangePreview {
                behavior,
                first: start.min(self.current),
                last: start.max(self.current),
            })
            .collect();
        Overlay {
            frame: self.current,
            labels,
            previews,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::RangeOptions;
    use crate::config::InputMode;
    use crate::input::Direction;
    use crate::video::synthetic::SyntheticSource;
    use std::time::Duration;

    fn session(mode: InputMode, frames: usize) -> AnnotationSession {
        let config = AnnotatorConfig {
            input_mode: mode,
            behaviors: vec!["rearing".to_string(), "passive".to_string()],
            preload_radius: 4,
            ..Default::default()
        };
        AnnotationSession::new(Box::new(SyntheticSource::new(frames, 30.0)), config)
    }

    fn label(behavior: &str, pressed: bool) -> InputEvent {
        InputEvent::Label {
            behavior: behavior.to_string(),
            pressed,
            repeat: false,
        }
    }

    fn nav(direction: Direction, pressed: bool) -> InputEvent {
        InputEvent::Navigate {
            direction,
            pressed,
            shift: false,
            repeat: false,
        }
    }

    fn frames(s: &AnnotationSession, behavior: &str) -> Vec<usize> {
        s.annotations().frames_with(behavior).collect()
    }

    #[test]
    fn test_toggle_symmetry_through_navigation() {
        let t0 = Instant::now();
        let mut s = session(InputMode::Toggle, 100);
        s.goto_frame(30, t0);
        s.handle(label("rearing", true), t0);
        s.handle(label("rearing", false), t0);
        s.goto_frame(25, t0);
        s.handle(label("rearing", true), t0);
        s.handle(label("rearing", false), t0);
        assert_eq!(frames(&s, "rearing"), (25..=30).collect::<Vec<_>>());
    }

    #[test]
    fn test_both_mode_short_and_long_press() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);
        let mut s = session(InputMode::Both, 100);

        // Short press opens, second short press closes.
        s.goto_frame(10, ms(0));
        s.handle(label("rearing", true), ms(0));
        s.handle(label("rearing", false), ms(100));
        s.goto_frame(14, ms(200));
        s.handle(label("rearing", true), ms(300));
        s.handle(label("rearing", false), ms(350));
        assert_eq!(frames(&s, "rearing"), (10..=14).collect::<Vec<_>>());

        // Long press: open at the press frame, close on release.
        s.goto_frame(50, ms(1_000));
        s.handle(label("passive", true), ms(1_000));
        s.tick(ms(1_500));
        assert_eq!(s.open_sessions(), vec![("passive".to_string(), 50)]);
        s.goto_frame(55, ms(1_600));
        s.handle(label("passive", false), ms(1_700));
        assert_eq!(frames(&s, "passive"), (50..=55).collect::<Vec<_>>());
        assert!(s.open_sessions().is_empty());
    }

    #[test]
    fn test_backward_navigation_removes_future_labels() {
        let t0 = Instant::now();
        let mut s = session(InputMode::Hold, 100);
        let mut store = AnnotationStore::new(100);
        store.apply_range("rearing", 5, 20, RangeOptions::default());
        s.load_annotations(store);

        s.goto_frame(20, t0);
        s.handle(label("rearing", true), t0);
        s.drain_events();
        s.handle(InputEvent::Seek { frame: 12 }, t0);
        s.handle(label("rearing", false), t0);

        assert_eq!(frames(&s, "rearing"), (5..=12).collect::<Vec<_>>());
        let events = s.drain_events();
        assert!(events.contains(&SessionEvent::LabelsRemoved {
            behavior: "rearing".to_string(),
            frames: (13..=20).collect()
        }));
    }

    #[test]
    fn test_held_label_forces_unit_steps() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);
        let mut s = session(InputMode::Hold, 100);
        s.goto_frame(40, ms(0));

        let shifted = InputEvent::Navigate {
            direction: Direction::Forward,
            pressed: true,
            shift: true,
            repeat: false,
        };
        s.handle(shifted.clone(), ms(0));
        assert_eq!(s.current_frame(), 50);
        s.handle(nav(Direction::Forward, false), ms(10));

        s.handle(label("rearing", true), ms(20));
        s.handle(shifted, ms(30));
        assert_eq!(s.current_frame(), 60);
        s.handle(nav(Direction::Forward, false), ms(40));
        s.handle(label("rearing", false), ms(50));
        assert_eq!(frames(&s, "rearing"), (50..=60).collect::<Vec<_>>());
    }

    #[test]
    fn test_dropping_behavior_from_config_discards_its_range() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);
        let mut s = session(InputMode::Hold, 100);
        s.goto_frame(10, ms(0));
        s.handle(label("rearing", true), ms(0));
        s.goto_frame(15, ms(10));

        let config = AnnotatorConfig {
            behaviors: vec!["passive".to_string()],
            ..s.config().clone()
        };
        s.set_config(config);
        assert!(s.open_sessions().is_empty());
        assert!(s.overlay().previews.is_empty());

        s.handle(label("rearing", false), ms(20));
        assert!(frames(&s, "rearing").is_empty());

        // Fine stepping is off again: a shifted press jumps the full skip.
        s.handle(
            InputEvent::Navigate {
                direction: Direction::Forward,
                pressed: true,
                shift: true,
                repeat: false,
            },
            ms(30),
        );
        assert_eq!(s.current_frame(), 25);
    }

    #[test]
    fn test_held_navigation_ticks() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);
        let mut s = session(InputMode::Toggle, 100);

        s.handle(nav(Direction::Forward, true), ms(0));
        assert_eq!(s.current_frame(), 1);
        for n in (50..=700).step_by(50) {
            s.tick(ms(n));
        }
        // Ticks at 550, 600, 650 and 700.
        assert_eq!(s.current_frame(), 5);
        s.handle(nav(Direction::Forward, false), ms(710));
        s.tick(ms(1_000));
        assert_eq!(s.current_frame(), 5);
    }

    #[test]
    fn test_clamping_at_both_ends() {
        let t0 = Instant::now();
        let mut s = session(InputMode::Toggle, 10);
        s.handle(nav(Direction::Backward, true), t0);
        assert_eq!(s.current_frame(), 0);
        assert!(!s
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::FrameChanged { .. })));

        s.handle(InputEvent::Seek { frame: 500 }, t0);
        assert_eq!(s.current_frame(), 9);

        s.handle(label("rearing", true), t0);
        s.handle(label("rearing", false), t0);
        s.goto_frame(-40, t0);
        s.handle(label("rearing", true), t0);
        assert_eq!(frames(&s, "rearing"), (0..=9).collect::<Vec<_>>());
    }

    #[test]
    fn test_erase_sweeps_traversed_frames() {
        let t0 = Instant::now();
        let mut s = session(InputMode::Toggle, 100);
        let mut store = AnnotationStore::new(100);
        store.apply_range("rearing", 0, 30, RangeOptions::default());
        store.apply_range("passive", 25, 40, RangeOptions::default());
        s.load_annotations(store);

        s.goto_frame(10, t0);
        s.handle(InputEvent::Erase { pressed: true }, t0);
        assert!(s.annotations().labels(10).is_none());
        s.handle(InputEvent::Seek { frame: 28 }, t0);
        s.handle(InputEvent::Erase { pressed: false }, t0);
        s.handle(InputEvent::Seek { frame: 35 }, t0);

        assert_eq!(frames(&s, "rearing"), (0..10).chain(29..=30).collect::<Vec<_>>());
        assert_eq!(frames(&s, "passive"), (29..=40).collect::<Vec<_>>());
        assert!(!s.is_erasing());
    }

    #[test]
    fn test_overlay_shows_open_range_preview() {
        let t0 = Instant::now();
        let mut s = session(InputMode::Toggle, 100);
        s.goto_frame(8, t0);
        s.handle(label("passive", true), t0);
        s.goto_frame(3, t0);

        let overlay = s.overlay();
        assert_eq!(overlay.frame, 3);
        assert!(overlay.labels.is_empty());
        assert_eq!(
            overlay.previews,
            vec![RangePreview {
                behavior: "passive".to_string(),
                first: 3,
                last: 8
            }]
        );
    }

    #[test]
    fn test_display_frame_and_remove_behavior() {
        let t0 = Instant::now();
        let mut s = session(InputMode::Toggle, 100);
        s.goto_frame(42, t0);
        let frame = s.display_frame().unwrap();
        assert_eq!(frame.index, 42);
        assert_eq!(*frame.image.get_pixel(0, 0), SyntheticSource::color_for(42));

        let mut store = AnnotationStore::new(100);
        store.apply_range("rearing", 0, 4, RangeOptions::default());
        s.load_annotations(store);
        assert_eq!(s.remove_behavior("rearing"), 5);
        assert!(s.annotations().is_empty());
        assert!(!s.config().has_behavior("rearing"));
        s.handle(label("rearing", true), t0);
        assert!(s.open_sessions().is_empty());
    }

    #[test]
    fn test_preload_events_surface_on_tick() {
        let mut s = session(InputMode::Toggle, 100);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            s.tick(Instant::now());
            let done = s
                .drain_events()
                .into_iter()
                .any(|e| matches!(e, SessionEvent::PreloadFinished { completed: true, .. }));
            if done {
                break;
            }
            assert!(Instant::now() < deadline, "initial preload did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
        for i in 0..4 {
            assert!(s.player().cache().contains(i));
        }
    }
}
