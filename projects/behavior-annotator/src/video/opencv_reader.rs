use super::VideoSource;
use crate::error::{DecodeError, VideoError};
use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_HW_ACCELERATION,
        CAP_PROP_POS_FRAMES, VIDEO_ACCELERATION_ANY,
    },
};

pub struct OpencvReader {
    capture: VideoCapture,
    fps: f64,
    total_frames: usize,
    /// Index of the frame the next `read` will return.
    cursor: usize,
    open: bool,
}

fn backend_err(e: opencv::Error) -> DecodeError {
    DecodeError::Backend(e.to_string())
}

impl OpencvReader {
    pub fn new(path: &str) -> Result<Self, VideoError> {
        let open_err = |reason: String| VideoError::Open {
            path: path.to_string(),
            reason,
        };

        let mut capture =
            VideoCapture::from_file(path, CAP_ANY).map_err(|e| open_err(e.to_string()))?;
        if !capture.is_opened().map_err(|e| open_err(e.to_string()))? {
            return Err(open_err("capture did not open".to_string()));
        }

        // Try to enable hardware acceleration (VideoToolbox on macOS, VA-API on Linux, etc.)
        match capture.set(CAP_PROP_HW_ACCELERATION, VIDEO_ACCELERATION_ANY as f64) {
            Ok(true) => tracing::debug!("OpencvReader: hardware acceleration enabled"),
            _ => tracing::debug!("OpencvReader: hardware acceleration not available"),
        }

        let mut fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);
        if fps <= 0.0 {
            tracing::warn!("OpencvReader: Failed to get FPS from metadata, falling back to 30.0");
            fps = 30.0;
        }
        let total_frames = capture
            .get(CAP_PROP_FRAME_COUNT)
            .map_err(|e| open_err(e.to_string()))? as usize;

        tracing::info!(
            "OpencvReader: opened {}, duration={:.2}s, fps={:.2}, frames={}",
            path,
            total_frames as f64 / fps,
            fps,
            total_frames
        );

        Ok(Self {
            capture,
            fps,
            total_frames,
            cursor: 0,
            open: true,
        })
    }

    fn read_mat(&mut self) -> Result<Mat, DecodeError> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame).map_err(backend_err)?;
        if !success || frame.empty() {
            return Err(DecodeError::EndOfStream(self.cursor));
        }
        self.cursor += 1;
        Ok(frame)
    }
}

/// Convert an OpenCV Mat (BGR) into an owned RGB image.
fn mat_to_rgb_image(mat: &Mat) -> Result<RgbImage, DecodeError> {
    let mut rgb_mat = Mat::default();
    imgproc::cvt_color_def(mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB).map_err(backend_err)?;

    let size = rgb_mat.size().map_err(backend_err)?;
    if !rgb_mat.is_continuous() {
        return Err(DecodeError::Backend("Mat is not continuous".to_string()));
    }
    let buffer = rgb_mat.data_bytes().map_err(backend_err)?.to_vec();

    RgbImage::from_vec(size.width as u32, size.height as u32, buffer)
        .ok_or_else(|| DecodeError::Backend("Mat data does not fit an RGB buffer".to_string()))
}

impl VideoSource for OpencvReader {
    fn frame_count(&self) -> usize {
        self.total_frames
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn seek_and_read(&mut self, index: usize) -> Result<RgbImage, DecodeError> {
        if !self.open {
            return Err(DecodeError::NotOpen);
        }
        if index >= self.total_frames {
            return Err(DecodeError::OutOfRange {
                index,
                total: self.total_frames,
            });
        }

        // Sequential reads skip the seek, which is the expensive part for most codecs.
        if index != self.cursor {
            self.capture
                .set(CAP_PROP_POS_FRAMES, index as f64)
                .map_err(backend_err)?;
            self.cursor = index;
        }

        let mat = self.read_mat()?;
        mat_to_rgb_image(&mat)
    }

    fn release(&mut self) {
        if self.open {
            if let Err(e) = self.capture.release() {
                tracing::warn!("OpencvReader: release failed: {}", e);
            }
            self.open = false;
        }
    }
}
