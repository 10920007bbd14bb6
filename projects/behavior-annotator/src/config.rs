use crate::input::controller::{ControllerAction, ControllerBinding, ControllerInput};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How label keys and buttons open and close ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Press once to open, press again to close.
    Toggle,
    /// Open on press, close on release.
    Hold,
    /// Short press toggles, long press holds.
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StickCurve {
    Linear,
    #[default]
    Quadratic,
}

pub fn default_behaviors() -> Vec<String> {
    [
        "nose-to-nose",
        "nose-to-body",
        "anogenital",
        "passive",
        "rearing",
        "fighting",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Face buttons 0..=3 map to the first four behaviors.
fn default_bindings(behaviors: &[String]) -> Vec<ControllerBinding> {
    behaviors
        .iter()
        .take(4)
        .enumerate()
        .map(|(i, b)| ControllerBinding {
            input: ControllerInput::Button(i),
            action: ControllerAction::Behavior(b.clone()),
        })
        .collect()
}

/// Every tunable of an annotation session. Missing fields in a settings file
/// fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    pub behaviors: Vec<String>,
    pub input_mode: InputMode,
    /// Long-press threshold for `both` mode and the navigation hold delay.
    pub hold_time_ms: u64,
    pub frame_step: usize,
    /// Step used while shift is held.
    pub shift_skip: usize,
    pub include_last_frame: bool,
    pub multitrack: bool,
    pub cache_capacity: usize,
    pub preload_radius: usize,
    pub prefetch_debounce_ms: u64,
    pub nav_tick_ms: u64,
    /// Stick deflection below this percentage is treated as neutral.
    pub deadzone_pct: u8,
    pub joystick_sensitivity: u8,
    pub joystick_curve: StickCurve,
    pub fast_forward_multiplier: u32,
    /// Axis index that drives frame navigation.
    pub nav_axis: usize,
    pub controller_bindings: Vec<ControllerBinding>,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        let behaviors = default_behaviors();
        let controller_bindings = default_bindings(&behaviors);
        Self {
            behaviors,
            input_mode: InputMode::Both,
            hold_time_ms: 500,
            frame_step: 1,
            shift_skip: 10,
            include_last_frame: true,
            multitrack: true,
            cache_capacity: 500,
            preload_radius: 200,
            prefetch_debounce_ms: 100,
            nav_tick_ms: 50,
            deadzone_pct: 10,
            joystick_sensitivity: 5,
            joystick_curve: StickCurve::Quadratic,
            fast_forward_multiplier: 10,
            nav_axis: 0,
            controller_bindings,
        }
    }
}

impl AnnotatorConfig {
    /// Reads a JSON settings file, or returns defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {:?}", path))?;
        tracing::info!(
            "Loaded settings from {:?}: {} behaviors, mode {:?}",
            path,
            config.behaviors.len(),
            config.input_mode
        );
        Ok(config)
    }

    pub fn hold_time(&self) -> Duration {
        Duration::from_millis(self.hold_time_ms)
    }

    pub fn nav_tick(&self) -> Duration {
        Duration::from_millis(self.nav_tick_ms.max(1))
    }

    pub fn prefetch_debounce(&self) -> Duration {
        Duration::from_millis(self.prefetch_debounce_ms)
    }

    pub fn deadzone(&self) -> f64 {
        f64::from(self.deadzone_pct.min(100)) / 100.0
    }

    pub fn has_behavior(&self, behavior: &str) -> bool {
        self.behaviors.iter().any(|b| b == behavior)
    }
}
