#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_reader;
#[cfg(feature = "opencv")]
pub mod opencv_reader;
pub mod synthetic;

use crate::error::{DecodeError, VideoError};
use image::RgbImage;
use std::path::Path;

/// A seekable local video.
///
/// Implementations carry an internal read cursor, so `seek_and_read` must never
/// run concurrently on the same handle. `DecodeGateway` enforces that.
pub trait VideoSource: Send {
    fn frame_count(&self) -> usize;
    fn frame_rate(&self) -> f64;
    fn seek_and_read(&mut self, index: usize) -> Result<RgbImage, DecodeError>;
    fn release(&mut self);
}

/// Frame index of a presentation timestamp, counted from the stream's first
/// timestamp `start_pts`. Timestamps before the start map to frame 0.
pub fn frame_index_for_pts(pts: i64, start_pts: i64, time_base: f64, fps: f64) -> usize {
    let offset = pts.saturating_sub(start_pts) as f64;
    (offset * time_base * fps).round().max(0.0) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Opencv,
    Ffmpeg,
    /// Generated frames, no file access. `path` is ignored.
    Synthetic,
}

/// Opens `path` with the requested backend.
pub fn open_source(path: &Path, backend: Backend) -> Result<Box<dyn VideoSource>, VideoError> {
    let path_str = path.to_string_lossy().to_string();
    match backend {
        Backend::Synthetic => Ok(Box::new(synthetic::SyntheticSource::new(
            synthetic::DEFAULT_FRAMES,
            30.0,
        ))),
        Backend::Opencv => {
            #[cfg(feature = "opencv")]
            {
                if !path.exists() {
                    return Err(VideoError::NotFound(path_str));
                }
                let reader = opencv_reader::OpencvReader::new(&path_str)?;
                Ok(Box::new(reader))
            }
            #[cfg(not(feature = "opencv"))]
            {
                let _ = path_str;
                Err(VideoError::BackendUnavailable("opencv"))
            }
        }
        Backend::Ffmpeg => {
            #[cfg(feature = "ffmpeg")]
            {
                if !path.exists() {
                    return Err(VideoError::NotFound(path_str));
                }
                let reader = ffmpeg_reader::FfmpegReader::new(&path_str)?;
                Ok(Box::new(reader))
            }
            #[cfg(not(feature = "ffmpeg"))]
            {
                let _ = path_str;
                Err(VideoError::BackendUnavailable("ffmpeg"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_backend_ignores_path() {
        let source = open_source(Path::new("/does/not/exist.mp4"), Backend::Synthetic).unwrap();
        assert_eq!(source.frame_count(), synthetic::DEFAULT_FRAMES);
        assert!(source.frame_rate() > 0.0);
    }

    #[test]
    fn test_pts_index_subtracts_start_offset() {
        // 90 kHz clock, 30 fps, stream starting at 1.0s.
        let tb = 1.0 / 90_000.0;
        assert_eq!(frame_index_for_pts(90_000, 90_000, tb, 30.0), 0);
        assert_eq!(frame_index_for_pts(90_000 + 3_000 * 7, 90_000, tb, 30.0), 7);
        assert_eq!(frame_index_for_pts(3_000 * 7, 0, tb, 30.0), 7);
        assert_eq!(frame_index_for_pts(0, 90_000, tb, 30.0), 0);
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_disabled_backend_is_reported() {
        let err = open_source(Path::new("clip.mp4"), Backend::Opencv)
            .err()
            .expect("opencv is not compiled in");
        assert!(matches!(err, VideoError::BackendUnavailable("opencv")));
    }
}
