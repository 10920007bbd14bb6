use crate::config::{AnnotatorConfig, InputMode};
use crate::video::Backend;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

fn default_backend() -> Backend {
    if cfg!(feature = "opencv") {
        Backend::Opencv
    } else if cfg!(feature = "ffmpeg") {
        Backend::Ffmpeg
    } else {
        Backend::Synthetic
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON settings file
    #[arg(long, global = true, env = "ANNOTATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Video decoding backend
    #[arg(long, global = true, value_enum, default_value_t = default_backend(), env = "ANNOTATOR_BACKEND")]
    pub backend: Backend,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that take precedence over the settings file.
#[derive(ClapArgs, Debug, Default)]
pub struct ConfigOverrides {
    /// Comma-separated behavior list
    #[arg(long, global = true, value_delimiter = ',', env = "ANNOTATOR_BEHAVIORS")]
    pub behaviors: Option<Vec<String>>,

    /// Label key mode
    #[arg(long, global = true, value_enum, env = "ANNOTATOR_INPUT_MODE")]
    pub input_mode: Option<InputMode>,

    /// Long-press threshold in milliseconds
    #[arg(long, global = true, env = "ANNOTATOR_HOLD_TIME_MS")]
    pub hold_time_ms: Option<u64>,

    /// Maximum number of decoded frames kept in memory
    #[arg(long, global = true, env = "ANNOTATOR_CACHE_CAPACITY")]
    pub cache_capacity: Option<usize>,

    /// Frames preloaded on each side of the current frame
    #[arg(long, global = true, env = "ANNOTATOR_PRELOAD_RADIUS")]
    pub preload_radius: Option<usize>,

    /// Write closed ranges as [start, end) instead of [start, end]
    #[arg(long, global = true, env = "ANNOTATOR_EXCLUDE_LAST_FRAME")]
    pub exclude_last_frame: bool,

    /// Replace a frame's labels instead of merging into them
    #[arg(long, global = true, env = "ANNOTATOR_SINGLE_TRACK")]
    pub single_track: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut AnnotatorConfig) {
        if let Some(behaviors) = &self.behaviors {
            config.behaviors = behaviors
                .iter()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();
        }
        if let Some(mode) = self.input_mode {
            config.input_mode = mode;
        }
        if let Some(ms) = self.hold_time_ms {
            config.hold_time_ms = ms;
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache_capacity = capacity;
        }
        if let Some(radius) = self.preload_radius {
            config.preload_radius = radius;
        }
        if self.exclude_last_frame {
            config.include_last_frame = false;
        }
        if self.single_track {
            config.multitrack = false;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print frame count, frame rate and sidecar status
    Info { video: PathBuf },

    /// Decode the window around a frame into the cache and report timing
    Prefetch {
        video: PathBuf,

        #[arg(long, default_value_t = 0)]
        pivot: usize,
    },

    /// Replay a JSON-lines input script against a video and save the result
    Replay {
        video: PathBuf,

        /// Script file, one `{"at_ms": .., <input>}` object per line
        #[arg(long)]
        script: PathBuf,

        /// Keep the sidecar untouched
        #[arg(long)]
        dry_run: bool,

        /// Write every session event as JSON lines
        #[arg(long)]
        events_out: Option<PathBuf>,
    },

    /// Per-behavior statistics from a video's sidecar
    Stats { video: PathBuf },

    /// List videos under a directory with their annotation status
    Videos {
        #[arg(env = "ANNOTATOR_VIDEO_ROOT")]
        root: PathBuf,

        /// Only print the next video still missing a sidecar
        #[arg(long)]
        next: bool,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
