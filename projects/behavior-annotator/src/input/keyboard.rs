use super::{Direction, InputEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Key {
    Left,
    Right,
    Escape,
    /// `1..=9`, selecting the behavior at that position.
    Digit(u8),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: Key,
    pub pressed: bool,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub shift: bool,
}

/// Maps a raw key event to a logical event. Digits beyond the behavior list
/// and unbound keys produce nothing.
pub fn translate(event: KeyEvent, behaviors: &[String]) -> Option<InputEvent> {
    match event.key {
        Key::Left | Key::Right => Some(InputEvent::Navigate {
            direction: if event.key == Key::Left {
                Direction::Backward
            } else {
                Direction::Forward
            },
            pressed: event.pressed,
            shift: event.shift,
            repeat: event.repeat,
        }),
        Key::Escape => {
            if event.repeat {
                return None;
            }
            Some(InputEvent::Erase {
                pressed: event.pressed,
            })
        }
        Key::Digit(d) => {
            let behavior = behaviors.get(usize::from(d).checked_sub(1)?)?;
            Some(InputEvent::Label {
                behavior: behavior.clone(),
                pressed: event.pressed,
                repeat: event.repeat,
            })
        }
        Key::Other => None,
    }
}
