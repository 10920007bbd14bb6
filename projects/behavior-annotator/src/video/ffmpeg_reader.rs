use super::{frame_index_for_pts, VideoSource};
use crate::error::{DecodeError, VideoError};
use ffmpeg_next::ffi;
use image::RgbImage;
use std::path::Path;

/// Forward gaps at or below this many frames are decoded through instead of seeking.
const MAX_DECODE_AHEAD: usize = 50;

/// Video reader backed by FFmpeg via ffmpeg-next, CPU decoding into RGB24.
pub struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Lazily created on first frame (source format is only known then).
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    width: u32,
    height: u32,
    source_fps: f64,
    /// Seconds per stream timestamp unit.
    time_base: f64,
    /// First presentation timestamp of the stream, in stream units.
    start_pts: i64,
    total_frames: usize,
    /// Index of the next frame the decoder will hand out, when known.
    next_index: Option<usize>,
    /// Persistent packet object to avoid allocations.
    reuse_packet: ffmpeg_next::codec::packet::Packet,
    /// Whether we've sent EOF to the decoder.
    eof_sent: bool,
    open: bool,
}

// SAFETY: FfmpegReader is only touched by whoever holds the DecodeGateway lock.
// The raw pointers inside ffmpeg-next types are never shared across threads.
unsafe impl Send for FfmpegReader {}

fn backend_err(e: ffmpeg_next::Error) -> DecodeError {
    DecodeError::Backend(e.to_string())
}

impl FfmpegReader {
    pub fn new(path: &str) -> Result<Self, VideoError> {
        let open_err = |reason: String| VideoError::Open {
            path: path.to_string(),
            reason,
        };

        ffmpeg_next::init().map_err(|e| open_err(format!("Failed to initialize FFmpeg: {e}")))?;

        let source = Path::new(path);
        if !source.exists() {
            return Err(VideoError::NotFound(path.to_string()));
        }

        let input_ctx = ffmpeg_next::format::input(&source).map_err(|e| open_err(e.to_string()))?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| open_err("No video stream found".to_string()))?;
        let video_stream_index = video_stream.index();

        let rational_fps = video_stream.avg_frame_rate();
        let source_fps = if rational_fps.denominator() > 0 && rational_fps.numerator() > 0 {
            rational_fps.numerator() as f64 / rational_fps.denominator() as f64
        } else {
            tracing::warn!("FfmpegReader: could not determine FPS, defaulting to 30.0");
            30.0
        };
        let tb = video_stream.time_base();
        let time_base = if tb.denominator() > 0 {
            tb.numerator() as f64 / tb.denominator() as f64
        } else {
            1.0 / source_fps
        };

        let start_pts = match video_stream.start_time() {
            t if t == ffi::AV_NOPTS_VALUE => 0,
            t => t,
        };

        let stream_frames = video_stream.frames() as usize;
        let duration_secs = input_ctx.duration() as f64 / ffi::AV_TIME_BASE as f64;
        let total_frames = if stream_frames == 0 {
            (duration_secs * source_fps).round() as usize
        } else {
            stream_frames
        };

        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
                .map_err(|e| open_err(format!("Failed to create decoder context: {e}")))?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .map_err(|e| open_err(format!("Failed to open video decoder: {e}")))?;

        let width = decoder.width();
        let height = decoder.height();

        tracing::info!(
            "FfmpegReader: opened {}, duration={:.2}s, fps={:.2}, frames={}, {}x{}",
            path,
            duration_secs,
            source_fps,
            total_frames,
            width,
            height
        );

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            scaler: None,
            width,
            height,
            source_fps,
            time_base,
            start_pts,
            total_frames,
            next_index: Some(0),
            reuse_packet: ffmpeg_next::codec::packet::Packet::empty(),
            eof_sent: false,
            open: true,
        })
    }

    /// Seek to the keyframe at or before `index`. The exact position is unknown
    /// until the next frame's timestamp is decoded.
    fn seek_to_frame(&mut self, index: usize) -> Result<(), DecodeError> {
        let time_secs = index as f64 / self.source_fps + self.start_pts as f64 * self.time_base;
        let timestamp = (time_secs * ffi::AV_TIME_BASE as f64) as i64;
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .map_err(backend_err)?;
        self.decoder.flush();
        self.eof_sent = false;
        self.next_index = None;
        Ok(())
    }

    /// Pull the next decoded frame, feeding packets as needed.
    fn decode_next(&mut self) -> Result<ffmpeg_next::util::frame::Video, DecodeError> {
        let mut frame = ffmpeg_next::util::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => return Ok(frame),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Err(DecodeError::EndOfStream(self.next_index.unwrap_or(0)));
                    }
                }
                Err(ffmpeg_next::Error::Eof) => {
                    return Err(DecodeError::EndOfStream(self.next_index.unwrap_or(0)));
                }
                Err(e) => return Err(backend_err(e)),
            }

            let mut found_packet = false;
            while self.reuse_packet.read(&mut self.input_ctx).is_ok() {
                if self.reuse_packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&self.reuse_packet)
                        .map_err(backend_err)?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                self.decoder.send_eof().map_err(backend_err)?;
                self.eof_sent = true;
            }
        }
    }

    fn frame_index_of(&self, frame: &ffmpeg_next::util::frame::Video) -> Option<usize> {
        frame
            .timestamp()
            .or_else(|| frame.pts())
            .map(|pts| frame_index_for_pts(pts, self.start_pts, self.time_base, self.source_fps))
    }

    fn to_rgb_image(
        &mut self,
        frame: &ffmpeg_next::util::frame::Video,
    ) -> Result<RgbImage, DecodeError> {
        if self.scaler.is_none() {
            let scaler = ffmpeg_next::software::scaling::Context::get(
                frame.format(),
                self.width,
                self.height,
                ffmpeg_next::format::Pixel::RGB24,
                self.width,
                self.height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .map_err(backend_err)?;
            self.scaler = Some(scaler);
        }
        let scaler = self.scaler.as_mut().ok_or(DecodeError::NotOpen)?;

        let mut rgb = ffmpeg_next::util::frame::Video::empty();
        scaler.run(frame, &mut rgb).map_err(backend_err)?;

        // Rows are padded to `stride`; copy them out into a tightly packed buffer.
        let width = rgb.width() as usize;
        let height = rgb.height() as usize;
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut buffer = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            let row = y * stride;
            buffer.extend_from_slice(&data[row..row + width * 3]);
        }

        RgbImage::from_vec(width as u32, height as u32, buffer)
            .ok_or_else(|| DecodeError::Backend("scaled frame has unexpected size".to_string()))
    }
}

impl VideoSource for FfmpegReader {
    fn frame_count(&self) -> usize {
        self.total_frames
    }

    fn frame_rate(&self) -> f64 {
        self.source_fps
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

        let needs_seek = match self.next_index {
            Some(next) => index < next || index - next > MAX_DECODE_AHEAD,
            None => true,
        };
        if needs_seek {
            self.seek_to_frame(index)?;
        }

        // A seek may land past the request when timestamps and the estimated
        // frame rate disagree. Back off once, then give up rather than return
        // the wrong frame.
        let mut backed_off = false;
        loop {
            let frame = self.decode_next()?;
            let decoded = self
                .frame_index_of(&frame)
                .or(self.next_index)
                .unwrap_or(index);
            self.next_index = Some(decoded + 1);
            if decoded == index {
                return self.to_rgb_image(&frame);
            }
            if decoded > index {
                if backed_off {
                    return Err(DecodeError::Backend(format!(
                        "frame {} not reachable, decoder resumed at {}",
                        index, decoded
                    )));
                }
                backed_off = true;
                self.seek_to_frame(index.saturating_sub(MAX_DECODE_AHEAD))?;
            }
        }
    }

    fn release(&mut self) {
        self.open = false;
        self.scaler = None;
    }
}
