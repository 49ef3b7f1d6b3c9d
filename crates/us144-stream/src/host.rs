//! The host audio side: buffer formats, hardware parameters, the shared ring
//! buffer and the notification hooks.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::rate::SampleRate;
use crate::Direction;

pub const CHANNELS: usize = us144_codec::CHANNELS;
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024;
pub const MIN_PERIOD_FRAMES: usize = 48;
pub const MAX_PERIOD_FRAMES: usize = 1024;
pub const MIN_PERIODS: usize = 2;
pub const MAX_PERIODS: usize = 1024;

/// Sample layout of the host ring buffer. Channels are interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFormat {
    /// Three little-endian bytes per sample.
    #[default]
    S24Packed,
    /// Four little-endian bytes per sample, value in the top three.
    S32,
}

impl HostFormat {
    #[inline]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            HostFormat::S24Packed => 3,
            HostFormat::S32 => 4,
        }
    }

    #[inline]
    pub const fn bytes_per_frame(self) -> usize {
        self.bytes_per_sample() * CHANNELS
    }

    #[inline]
    pub const fn frames_to_bytes(self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    #[inline]
    pub const fn bytes_to_frames(self, bytes: usize) -> usize {
        bytes / self.bytes_per_frame()
    }
}

/// Negotiated hardware parameters of one substream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwParams {
    pub rate: SampleRate,
    pub format: HostFormat,
    pub channels: usize,
    pub buffer_frames: usize,
    pub period_frames: usize,
}

impl HwParams {
    pub fn new(rate: SampleRate, format: HostFormat, buffer_frames: usize, period_frames: usize) -> Self {
        Self {
            rate,
            format,
            channels: CHANNELS,
            buffer_frames,
            period_frames,
        }
    }

    pub fn periods(&self) -> usize {
        self.buffer_frames / self.period_frames.max(1)
    }

    pub fn buffer_bytes(&self) -> usize {
        self.format.frames_to_bytes(self.buffer_frames)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.channels != CHANNELS {
            return Err(StreamError::InvalidParams("the device streams exactly 4 channels"));
        }
        if !(MIN_PERIOD_FRAMES..=MAX_PERIOD_FRAMES).contains(&self.period_frames) {
            return Err(StreamError::InvalidParams("period size out of range"));
        }
        if self.buffer_frames % self.period_frames != 0 {
            return Err(StreamError::InvalidParams(
                "buffer size must be a whole number of periods",
            ));
        }
        if !(MIN_PERIODS..=MAX_PERIODS).contains(&self.periods()) {
            return Err(StreamError::InvalidParams("period count out of range"));
        }
        if self.buffer_bytes() > MAX_BUFFER_BYTES {
            return Err(StreamError::InvalidParams("buffer exceeds 1 MiB"));
        }
        Ok(())
    }
}

/// Ring buffer shared between the host and the engine.
///
/// The host reads and writes it through [`PcmBuffer::lock`]; the engine copies
/// in and out of it from the completion handlers.
#[derive(Debug)]
pub struct PcmBuffer {
    format: HostFormat,
    frames: usize,
    bytes: Mutex<Box<[u8]>>,
}

impl PcmBuffer {
    pub fn try_new(format: HostFormat, frames: usize) -> Result<Self, StreamError> {
        let bytes = crate::try_alloc(format.frames_to_bytes(frames), 0u8, "host buffer")?;
        Ok(Self {
            format,
            frames,
            bytes: Mutex::new(bytes),
        })
    }

    #[inline]
    pub fn format(&self) -> HostFormat {
        self.format
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.bytes.lock()
    }

    /// Copies `data` into the ring at `frame`, wrapping as needed.
    pub fn write_at(&self, frame: usize, data: &[u8]) {
        let bytes_per_frame = self.format.bytes_per_frame();
        let frames = data.len() / bytes_per_frame;
        let mut ring = self.bytes.lock();
        for (span, offset) in crate::ring::spans(frame, frames, self.frames) {
            let dst = span.start * bytes_per_frame..span.end * bytes_per_frame;
            let src = offset * bytes_per_frame;
            ring[dst.clone()].copy_from_slice(&data[src..src + dst.len()]);
        }
    }

    /// Copies frames starting at `frame` into `out`, wrapping as needed.
    pub fn read_at(&self, frame: usize, out: &mut [u8]) {
        let bytes_per_frame = self.format.bytes_per_frame();
        let frames = out.len() / bytes_per_frame;
        let ring = self.bytes.lock();
        for (span, offset) in crate::ring::spans(frame, frames, self.frames) {
            let src = span.start * bytes_per_frame..span.end * bytes_per_frame;
            let dst = offset * bytes_per_frame;
            out[dst..dst + src.len()].copy_from_slice(&ring[src]);
        }
    }

    pub fn clear(&self) {
        self.bytes.lock().fill(0);
    }
}

/// Notifications delivered to the host audio subsystem.
///
/// Always invoked without any engine lock held.
pub trait PcmHost: Send + Sync {
    fn period_elapsed(&self, direction: Direction);

    /// The stream stopped on an unrecoverable condition.
    fn xrun(&self, direction: Direction);
}
