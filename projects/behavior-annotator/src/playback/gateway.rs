use crate::error::DecodeError;
use crate::video::VideoSource;
use image::RgbImage;
use std::sync::Mutex;

/// Serializes every seek+read pair on the single decode handle.
///
/// Both the foreground display path and the prefetch worker go through here;
/// the handle's internal cursor is only ever moved by the lock holder.
pub struct DecodeGateway {
    source: Mutex<Option<Box<dyn VideoSource>>>,
    total_frames: usize,
    frame_rate: f64,
}

impl DecodeGateway {
    pub fn new(source: Box<dyn VideoSource>) -> Self {
        let total_frames = source.frame_count();
        let frame_rate = source.frame_rate();
        Self {
            source: Mutex::new(Some(source)),
            total_frames,
            frame_rate,
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Seek to `index` and decode one frame. Blocks while another caller holds the handle.
    pub fn read_frame(&self, index: usize) -> Result<RgbImage, DecodeError> {
        if index >= self.total_frames {
            return Err(DecodeError::OutOfRange {
                index,
                total: self.total_frames,
            });
        }
        let mut guard = self.source.lock().map_err(|_| DecodeError::Poisoned)?;
        let source = guard.as_mut().ok_or(DecodeError::NotOpen)?;
        source.seek_and_read(index)
    }

    /// Close the handle. Later reads fail with `DecodeError::NotOpen`.
    pub fn release(&self) {
        match self.source.lock() {
            Ok(mut guard) => {
                if let Some(mut source) = guard.take() {
                    source.release();
                    tracing::debug!("DecodeGateway: video handle released");
                }
            }
            Err(_) => tracing::warn!("DecodeGateway: lock poisoned, handle not released"),
        }
    }
}

impl Drop for DecodeGateway {
    fn drop(&mut self) {
        self.release();
    }
}
