use super::InputEvent;
use serde::{Deserialize, Serialize};

/// Axis deflection beyond which an axis binding counts as pressed.
pub const AXIS_PRESS_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HatDirection {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisDirection {
    Positive,
    Negative,
}

/// A physical control on the gamepad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerInput {
    Button(usize),
    Hat(usize, HatDirection),
    Axis(usize, AxisDirection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerAction {
    Behavior(String),
    FastForward,
    FastBackward,
    Erase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerBinding {
    pub input: ControllerInput,
    pub action: ControllerAction,
}

/// Polled device state. Hats are `(x, y)` with components in `{-1, 0, 1}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    #[serde(default)]
    pub buttons: Vec<bool>,
    #[serde(default)]
    pub hats: Vec<(i8, i8)>,
    #[serde(default)]
    pub axes: Vec<f64>,
}

impl ControllerSnapshot {
    /// Controls the device does not report read as released.
    pub fn is_pressed(&self, input: ControllerInput) -> bool {
        match input {
            ControllerInput::Button(n) => self.buttons.get(n).copied().unwrap_or(false),
            ControllerInput::Hat(n, dir) => {
                let Some(&(x, y)) = self.hats.get(n) else {
                    return false;
                };
                match dir {
                    HatDirection::Right => x == 1,
                    HatDirection::Left => x == -1,
                    HatDirection::Up => y == 1,
                    HatDirection::Down => y == -1,
                }
            }
            ControllerInput::Axis(n, dir) => {
                let value = self.axes.get(n).copied().unwrap_or(0.0);
                match dir {
                    AxisDirection::Positive => value > AXIS_PRESS_THRESHOLD,
                    AxisDirection::Negative => value < -AXIS_PRESS_THRESHOLD,
                }
            }
        }
    }

    pub fn axis(&self, n: usize) -> f64 {
        self.axes.get(n).copied().unwrap_or(0.0)
    }
}

/// Turns successive snapshots into press/release edges for the bound actions.
pub struct ControllerTracker {
    bindings: Vec<ControllerBinding>,
    held: Vec<bool>,
    fast: bool,
    nav_axis: usize,
}

impl ControllerTracker {
    pub fn new(bindings: Vec<ControllerBinding>, nav_axis: usize) -> Self {
        let held = vec![false; bindings.len()];
        Self {
            bindings,
            held,
            fast: false,
            nav_axis,
        }
    }

    /// Edges since the previous snapshot, followed by the navigation stick value.
    /// Bindings to behaviors outside `behaviors` are ignored.
    pub fn update(&mut self, snapshot: &ControllerSnapshot, behaviors: &[String]) -> Vec<InputEvent> {
        let mut events = Vec::new();

        for (binding, held) in self.bindings.iter().zip(self.held.iter_mut()) {
            let pressed = snapshot.is_pressed(binding.input);
            if pressed == *held {
                continue;
            }
            *held = pressed;
            match &binding.action {
                ControllerAction::Behavior(name) => {
                    if behaviors.iter().any(|b| b == name) {
                        events.push(InputEvent::Label {
                            behavior: name.clone(),
                            pressed,
                            repeat: false,
                        });
                    }
                }
                ControllerAction::Erase => events.push(InputEvent::Erase { pressed }),
                ControllerAction::FastForward | ControllerAction::FastBackward => {}
            }
        }

        let fast = self
            .bindings
            .iter()
            .zip(&self.held)
            .any(|(b, held)| {
                *held
                    && matches!(
                        b.action,
                        ControllerAction::FastForward | ControllerAction::FastBackward
                    )
            });
        if fast != self.fast {
            self.fast = fast;
            events.push(InputEvent::Fast { pressed: fast });
        }

        events.push(InputEvent::Axis {
            value: snapshot.axis(self.nav_axis),
        });
        events
    }
}
