use thiserror::Error;

/// Failure reading a single frame through the decode path.
///
/// None of these are fatal: the foreground shows nothing new for the frame and
/// the prefetcher skips it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame {index} is outside the video (0..{total})")]
    OutOfRange { index: usize, total: usize },

    #[error("end of stream reached before frame {0}")]
    EndOfStream(usize),

    #[error("video handle is not open")]
    NotOpen,

    #[error("decode handle lock poisoned")]
    Poisoned,

    #[error("decoder backend error: {0}")]
    Backend(String),
}

/// Failure opening a video source.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video file not found: {0}")]
    NotFound(String),

    #[error("failed to open video {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("backend '{0}' is not compiled into this build")]
    BackendUnavailable(&'static str),
}
