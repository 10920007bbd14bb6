// Directional stepping: tapped and held arrow keys, plus the analog stick

use super::Direction;
use crate::config::{AnnotatorConfig, StickCurve};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavPhase {
    Idle,
    /// Initial step taken; continuous motion starts at `deadline`.
    Arming { deadline: Instant },
    Moving { next_tick: Instant },
}

/// What a key release did to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavRelease {
    /// The other direction is still held and motion continues.
    Continued,
    /// Motion now runs the other way.
    Reversed,
    /// Both directions released.
    Stopped,
}

pub struct NavigationController {
    backward_held: bool,
    forward_held: bool,
    direction: Option<Direction>,
    phase: NavPhase,
    speed: usize,
}

impl NavigationController {
    pub fn new(config: &AnnotatorConfig) -> Self {
        Self {
            backward_held: false,
            forward_held: false,
            direction: None,
            phase: NavPhase::Idle,
            speed: config.frame_step.max(1),
        }
    }

    pub fn phase(&self) -> NavPhase {
        self.phase
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn speed(&self) -> usize {
        self.speed
    }

    pub fn is_held(&self, direction: Direction) -> bool {
        match direction {
            Direction::Backward => self.backward_held,
            Direction::Forward => self.forward_held,
        }
    }

    fn set_held(&mut self, direction: Direction, held: bool) {
        match direction {
            Direction::Backward => self.backward_held = held,
            Direction::Forward => self.forward_held = held,
        }
    }

    /// Signed frame delta of the immediate step for a new press. Auto-repeat
    /// presses return 0; held motion is produced by `tick`.
    pub fn press(
        &mut self,
        direction: Direction,
        shift: bool,
        repeat: bool,
        now: Instant,
        config: &AnnotatorConfig,
    ) -> i64 {
        if repeat {
            return 0;
        }
        self.set_held(direction, true);
        self.speed = if shift {
            config.shift_skip.max(1)
        } else {
            config.frame_step.max(1)
        };

        if self.direction != Some(direction) || self.phase == NavPhase::Idle {
            self.direction = Some(direction);
            self.phase = NavPhase::Arming {
                deadline: now + config.hold_time(),
            };
        }
        // Full speed even while fine stepping; the caller walks it frame by frame.
        direction.sign() * self.speed as i64
    }

    pub fn release(&mut self, direction: Direction, now: Instant, config: &AnnotatorConfig) -> NavRelease {
        self.set_held(direction, false);

        if !self.backward_held && !self.forward_held {
            self.reset(config);
            return NavRelease::Stopped;
        }

        let other = direction.opposite();
        if self.direction == Some(direction) && self.is_held(other) {
            self.direction = Some(other);
            self.phase = NavPhase::Moving {
                next_tick: now + config.nav_tick(),
            };
            return NavRelease::Reversed;
        }
        NavRelease::Continued
    }

    /// Signed frame delta accumulated since the last call.
    pub fn tick(&mut self, now: Instant, config: &AnnotatorConfig, fine: bool) -> i64 {
        let Some(direction) = self.direction else {
            return 0;
        };
        let interval = config.nav_tick();

        if let NavPhase::Arming { deadline } = self.phase {
            if now < deadline {
                return 0;
            }
            self.phase = NavPhase::Moving {
                next_tick: deadline + interval,
            };
        }

        let NavPhase::Moving { next_tick } = self.phase else {
            return 0;
        };
        if now < next_tick {
            return 0;
        }
        let elapsed = now.duration_since(next_tick);
        let ticks = (elapsed.as_nanos() / interval.as_nanos()) as u32 + 1;
        self.phase = NavPhase::Moving {
            next_tick: next_tick + interval * ticks,
        };
        direction.sign() * (self.step(fine) * ticks as usize) as i64
    }

    fn step(&self, fine: bool) -> usize {
        if fine {
            1
        } else {
            self.speed
        }
    }

    pub fn reset(&mut self, config: &AnnotatorConfig) {
        self.backward_held = false;
        self.forward_held = false;
        self.direction = None;
        self.phase = NavPhase::Idle;
        self.speed = config.frame_step.max(1);
    }
}

const DECAY: f64 = 0.9;
const SNAP: f64 = 0.1;

/// Fractional frame accumulator fed by stick polls.
#[derive(Debug)]
pub struct AnalogStick {
    accumulator: f64,
    fast: bool,
    neutral: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StickUpdate {
    /// Whole frames to move, signed.
    pub frames: i64,
    /// The stick crossed into the deadzone on this poll.
    pub became_neutral: bool,
}

impl AnalogStick {
    pub fn new() -> Self {
        Self {
            accumulator: 0.0,
            fast: false,
            neutral: true,
        }
    }

    pub fn set_fast(&mut self, fast: bool) {
        self.fast = fast;
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    pub fn update(&mut self, value: f64, config: &AnnotatorConfig) -> StickUpdate {
        let magnitude = value.abs().min(1.0);

        if magnitude <= config.deadzone() {
            let became_neutral = !self.neutral;
            self.neutral = true;
            if self.accumulator.abs() < SNAP {
                self.accumulator = 0.0;
            } else {
                self.accumulator *= DECAY;
            }
            return StickUpdate {
                frames: 0,
                became_neutral,
            };
        }
        self.neutral = false;

        let shaped = match config.joystick_curve {
            StickCurve::Linear => magnitude,
            StickCurve::Quadratic => magnitude * magnitude,
        };
        let mut change = shaped * f64::from(config.joystick_sensitivity) / 2.0;
        if self.fast {
            change *= f64::from(config.fast_forward_multiplier);
        }
        self.accumulator += change.copysign(value);

        let frames = self.accumulator.trunc();
        self.accumulator -= frames;
        StickUpdate {
            frames: frames as i64,
            became_neutral: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(t0: Instant, n: u64) -> Instant {
        t0 + Duration::from_millis(n)
    }

    #[test]
    fn test_press_steps_then_moves_after_hold_delay() {
        let config = AnnotatorConfig::default();
        let mut nav = NavigationController::new(&config);
        let t0 = Instant::now();

        assert_eq!(nav.press(Direction::Forward, false, false, t0, &config), 1);
        assert_eq!(nav.tick(ms(t0, 400), &config, false), 0);
        // Motion begins one tick after the 500 ms hold delay.
        assert_eq!(nav.tick(ms(t0, 520), &config, false), 0);
        assert_eq!(nav.tick(ms(t0, 550), &config, false), 1);
        assert_eq!(nav.tick(ms(t0, 560), &config, false), 0);
        assert_eq!(nav.tick(ms(t0, 600), &config, false), 1);
        assert_eq!(nav.tick(ms(t0, 700), &config, false), 2);
    }

    #[test]
    fn test_shift_skip_and_fine_stepping() {
        let config = AnnotatorConfig::default();
        let mut nav = NavigationController::new(&config);
        let t0 = Instant::now();

        assert_eq!(nav.press(Direction::Backward, true, false, t0, &config), -10);
        assert_eq!(nav.tick(ms(t0, 550), &config, false), -10);
        assert_eq!(nav.tick(ms(t0, 600), &config, true), -1);
    }

    #[test]
    fn test_auto_repeat_is_ignored() {
        let config = AnnotatorConfig::default();
        let mut nav = NavigationController::new(&config);
        let t0 = Instant::now();
        nav.press(Direction::Forward, false, false, t0, &config);
        assert_eq!(nav.press(Direction::Forward, false, true, ms(t0, 30), &config), 0);
        assert!(matches!(nav.phase(), NavPhase::Arming { .. }));
    }

    #[test]
    fn test_release_with_opposite_held_reverses_immediately() {
        let config = AnnotatorConfig::default();
        let mut nav = NavigationController::new(&config);
        let t0 = Instant::now();

        nav.press(Direction::Forward, false, false, t0, &config);
        nav.press(Direction::Backward, false, false, ms(t0, 100), &config);
        assert_eq!(nav.direction(), Some(Direction::Backward));

        assert_eq!(
            nav.release(Direction::Backward, ms(t0, 200), &config),
            NavRelease::Reversed
        );
        assert_eq!(nav.direction(), Some(Direction::Forward));
        // No re-arm delay: the next tick interval already moves.
        assert_eq!(nav.tick(ms(t0, 250), &config, false), 1);

        assert_eq!(
            nav.release(Direction::Forward, ms(t0, 260), &config),
            NavRelease::Stopped
        );
        assert_eq!(nav.phase(), NavPhase::Idle);
        assert_eq!(nav.tick(ms(t0, 900), &config, false), 0);
    }

    #[test]
    fn test_releasing_inactive_direction_keeps_motion() {
        let config = AnnotatorConfig::default();
        let mut nav = NavigationController::new(&config);
        let t0 = Instant::now();
        nav.press(Direction::Forward, false, false, t0, &config);
        nav.press(Direction::Backward, false, false, ms(t0, 10), &config);
        assert_eq!(
            nav.release(Direction::Forward, ms(t0, 20), &config),
            NavRelease::Continued
        );
        assert_eq!(nav.direction(), Some(Direction::Backward));
    }

    #[test]
    fn test_stick_accumulates_fractional_frames() {
        let config = AnnotatorConfig {
            joystick_curve: StickCurve::Linear,
            joystick_sensitivity: 1,
            ..Default::default()
        };
        let mut stick = AnalogStick::new();

        // 0.6 * 1 / 2 = 0.3 frames per poll.
        let frames: Vec<i64> = (0..4).map(|_| stick.update(0.6, &config).frames).collect();
        assert_eq!(frames, vec![0, 0, 0, 1]);
        assert!((stick.accumulator() - 0.2).abs() < 1e-9);

        let back = stick.update(-1.0, &config);
        assert_eq!(back.frames, 0);
        assert!((stick.accumulator() + 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_stick_quadratic_and_fast() {
        let config = AnnotatorConfig::default();
        let mut stick = AnalogStick::new();
        // 0.5^2 * 5 / 2 = 0.625, x10 = 6.25
        stick.set_fast(true);
        assert_eq!(stick.update(0.5, &config).frames, 6);
        stick.set_fast(false);
        assert_eq!(stick.update(-1.0, &config).frames, -2);
    }

    #[test]
    fn test_stick_decays_inside_deadzone() {
        let config = AnnotatorConfig {
            joystick_curve: StickCurve::Linear,
            joystick_sensitivity: 1,
            ..Default::default()
        };
        let mut stick = AnalogStick::new();
        stick.update(0.8, &config);
        assert!((stick.accumulator() - 0.4).abs() < 1e-9);

        let update = stick.update(0.05, &config);
        assert!(update.became_neutral);
        assert!((stick.accumulator() - 0.36).abs() < 1e-9);
        assert!(!stick.update(0.0, &config).became_neutral);

        for _ in 0..20 {
            stick.update(0.0, &config);
        }
        assert_eq!(stick.accumulator(), 0.0);
    }
}
