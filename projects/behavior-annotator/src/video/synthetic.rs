use super::VideoSource;
use crate::error::DecodeError;
use image::{Rgb, RgbImage};
use std::time::Duration;

pub const DEFAULT_FRAMES: usize = 1_800;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;

/// Deterministic stand-in for a decoded video.
///
/// Every frame is a solid color derived from its index, so tests can check
/// that the right frame came back. An optional per-frame delay imitates decode
/// latency.
pub struct SyntheticSource {
    frames: usize,
    fps: f64,
    decode_delay: Duration,
    open: bool,
}

impl SyntheticSource {
    pub fn new(frames: usize, fps: f64) -> Self {
        Self {
            frames,
            fps,
            decode_delay: Duration::ZERO,
            open: true,
        }
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    /// Pixel color used for frame `index`.
    pub fn color_for(index: usize) -> Rgb<u8> {
        Rgb([
            (index % 251) as u8,
            ((index / 251) % 251) as u8,
            (index.wrapping_mul(7) % 256) as u8,
        ])
    }
}

impl VideoSource for SyntheticSource {
    fn frame_count(&self) -> usize {
        self.frames
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn seek_and_read(&mut self, index: usize) -> Result<RgbImage, DecodeError> {
        if !self.open {
            return Err(DecodeError::NotOpen);
        }
        if index >= self.frames {
            return Err(DecodeError::EndOfStream(index));
        }
        if !self.decode_delay.is_zero() {
            std::thread::sleep(self.decode_delay);
        }
        Ok(RgbImage::from_pixel(WIDTH, HEIGHT, Self::color_for(index)))
    }

    fn release(&mut self) {
        self.open = false;
    }
}
