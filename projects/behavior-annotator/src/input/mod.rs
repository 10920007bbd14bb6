// Logical input events and the state machines that consume them

pub mod controller;
pub mod keyboard;
pub mod label;
pub mod navigation;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Backward,
    Forward,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Backward => -1,
            Direction::Forward => 1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Backward => Direction::Forward,
            Direction::Forward => Direction::Backward,
        }
    }
}

/// Device-independent input, as produced by the keyboard and controller translators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Navigate {
        direction: Direction,
        pressed: bool,
        #[serde(default)]
        shift: bool,
        #[serde(default)]
        repeat: bool,
    },
    Label {
        behavior: String,
        pressed: bool,
        #[serde(default)]
        repeat: bool,
    },
    Erase {
        pressed: bool,
    },
    /// Fast multiplier for the navigation stick.
    Fast {
        pressed: bool,
    },
    /// Navigation stick deflection in `[-1, 1]`.
    Axis {
        value: f64,
    },
    /// Jump straight to a frame (timeline click).
    Seek {
        frame: usize,
    },
}
