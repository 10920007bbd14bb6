// Scripted input replay: drives a session from a JSON-lines file on a virtual clock

use crate::input::controller::{ControllerSnapshot, ControllerTracker};
use crate::input::keyboard::{self, KeyEvent};
use crate::input::InputEvent;
use crate::session::{AnnotationSession, SessionEvent};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::time::{Duration, Instant};

/// One timestamped input. Exactly one of `event`, `key` or `controller` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub input: ScriptInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptInput {
    Event(InputEvent),
    Key(KeyEvent),
    Controller(ControllerSnapshot),
}

/// Parses a script. Blank lines and lines starting with `#` are skipped;
/// timestamps must not decrease.
pub fn parse_script<R: BufRead>(reader: R) -> Result<Vec<ScriptStep>> {
    let mut steps: Vec<ScriptStep> = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let step: ScriptStep = serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid script step on line {}", n + 1))?;
        if let Some(last) = steps.last() {
            if step.at_ms < last.at_ms {
                anyhow::bail!(
                    "Line {}: at_ms {} goes back in time (previous {})",
                    n + 1,
                    step.at_ms,
                    last.at_ms
                );
            }
        }
        steps.push(step);
    }
    Ok(steps)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub steps: usize,
    pub ticks: usize,
    pub final_frame: usize,
    pub ranges_closed: usize,
    pub frames_erased: usize,
    pub labels_removed: usize,
    pub decode_failures: usize,
}

pub struct Replay {
    tick: Duration,
    settle: Duration,
    tracker: ControllerTracker,
}

impl Replay {
    pub fn new(session: &AnnotationSession) -> Self {
        let config = session.config();
        Self {
            tick: config.nav_tick(),
            settle: config.hold_time() + config.nav_tick(),
            tracker: ControllerTracker::new(config.controller_bindings.clone(), config.nav_axis),
        }
    }

    /// Time simulated after the last step so pending timers resolve.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Applies every step at its timestamp, ticking the session at the
    /// configured interval in between. Returns the summary and all events.
    pub fn run(
        &mut self,
        session: &mut AnnotationSession,
        steps: &[ScriptStep],
    ) -> (ReplaySummary, Vec<SessionEvent>) {
        let t0 = Instant::now();
        let mut clock = Duration::ZERO;
        let mut summary = ReplaySummary {
            steps: steps.len(),
            ..Default::default()
        };
        let mut events = Vec::new();

        for step in steps {
            let at = Duration::from_millis(step.at_ms);
            while clock + self.tick <= at {
                clock += self.tick;
                session.tick(t0 + clock);
                summary.ticks += 1;
            }
            clock = at;

            let now = t0 + clock;
            for input in self.translate(session, &step.input) {
                session.handle(input, now);
            }
            if session.display_frame().is_none() {
                tracing::debug!("Replay: no image for frame {}", session.current_frame());
            }
            events.extend(session.drain_events());
        }

        let end = clock + self.settle;
        while clock + self.tick <= end {
            clock += self.tick;
            session.tick(t0 + clock);
            summary.ticks += 1;
        }
        events.extend(session.drain_events());

        for event in &events {
            match event {
                SessionEvent::RangeClosed { .. } => summary.ranges_closed += 1,
                SessionEvent::FramesErased { frames } => summary.frames_erased += frames.len(),
                SessionEvent::LabelsRemoved { frames, .. } => summary.labels_removed += frames.len(),
                SessionEvent::DecodeFailed { .. } => summary.decode_failures += 1,
                _ => {}
            }
        }
        summary.final_frame = session.current_frame();
        tracing::info!(
            "Replayed {} steps over {} ticks, final frame {}",
            summary.steps,
            summary.ticks,
            summary.final_frame
        );
        (summary, events)
    }

    fn translate(&mut self, session: &AnnotationSession, input: &ScriptInput) -> Vec<InputEvent> {
        let behaviors = &session.config().behaviors;
        match input {
            ScriptInput::Event(event) => vec![event.clone()],
            ScriptInput::Key(key) => keyboard::translate(*key, behaviors).into_iter().collect(),
            ScriptInput::Controller(snapshot) => self.tracker.update(snapshot, behaviors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnnotatorConfig, InputMode};
    use crate::input::controller::{ControllerAction, ControllerBinding, ControllerInput};
    use crate::video::synthetic::SyntheticSource;

    const SCRIPT: &str = r#"
# hold-mode bout from frame 3 to frame 7, then a controller bout
{"at_ms": 0, "event": {"type": "seek", "frame": 3}}
{"at_ms": 10, "key": {"key": {"digit": 1}, "pressed": true}}
{"at_ms": 20, "key": {"key": "right", "pressed": true}}
{"at_ms": 30, "key": {"key": "right", "pressed": false}}
{"at_ms": 40, "event": {"type": "seek", "frame": 7}}
{"at_ms": 50, "key": {"key": {"digit": 1}, "pressed": false}}
{"at_ms": 100, "event": {"type": "seek", "frame": 20}}
{"at_ms": 110, "controller": {"buttons": [false, true]}}
{"at_ms": 120, "controller": {"buttons": [false, true], "axes": [1.0]}}
{"at_ms": 130, "controller": {"buttons": [false, false]}}
"#;

    fn session() -> AnnotationSession {
        let config = AnnotatorConfig {
            input_mode: InputMode::Hold,
            behaviors: vec!["rearing".to_string(), "passive".to_string()],
            joystick_sensitivity: 4,
            joystick_curve: crate::config::StickCurve::Linear,
            preload_radius: 8,
            controller_bindings: vec![ControllerBinding {
                input: ControllerInput::Button(1),
                action: ControllerAction::Behavior("passive".to_string()),
            }],
            ..Default::default()
        };
        AnnotationSession::new(Box::new(SyntheticSource::new(60, 30.0)), config)
    }

    #[test]
    fn test_parse_skips_comments_and_checks_order() {
        let steps = parse_script(SCRIPT.as_bytes()).unwrap();
        assert_eq!(steps.len(), 10);
        assert_eq!(
            steps[0].input,
            ScriptInput::Event(InputEvent::Seek { frame: 3 })
        );

        let backwards = "{\"at_ms\": 5, \"event\": {\"type\": \"erase\", \"pressed\": true}}\n\
                         {\"at_ms\": 1, \"event\": {\"type\": \"erase\", \"pressed\": false}}\n";
        assert!(parse_script(backwards.as_bytes()).is_err());
        assert!(parse_script("{\"at_ms\": 1}".as_bytes()).is_err());
    }

    #[test]
    fn test_replay_end_to_end() {
        let mut s = session();
        let steps = parse_script(SCRIPT.as_bytes()).unwrap();
        let (summary, events) = Replay::new(&s).run(&mut s, &steps);

        assert_eq!(summary.ranges_closed, 2);
        assert_eq!(summary.decode_failures, 0);
        assert!(summary.ticks >= 2);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::RangeOpened { start: 3, .. })));

        // Key 1 held from frame 3; the arrow tap stepped to 4 before the seek to 7.
        let rearing: Vec<usize> = s.annotations().frames_with("rearing").collect();
        assert_eq!(rearing, (3..=7).collect::<Vec<_>>());

        // Button 1 held at 20, stick full right once: 1.0 * 4 / 2 = 2 frames, unit-stepped.
        let passive: Vec<usize> = s.annotations().frames_with("passive").collect();
        assert_eq!(passive, (20..=22).collect::<Vec<_>>());
        assert_eq!(summary.final_frame, 22);
    }
}
