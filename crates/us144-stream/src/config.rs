use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use us144_codec::{Decoder, BLOCK_BYTES, BLOCK_FRAMES, WIRE_BYTES_PER_FRAME};

use crate::error::ConfigError;
use crate::feedback::PATTERN_LEN;
use crate::rate::SampleRate;

/// Largest number of feedback packets batched into one transfer.
pub const MAX_FEEDBACK_PACKETS: usize = 5;

/// Layout of the raw capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureWireFormat {
    /// Plain packed 24-bit samples, 12 bytes per frame.
    Packed24,
    /// Bit-multiplexed 512-byte blocks of 8 frames.
    #[default]
    BitInterleaved,
}

impl CaptureWireFormat {
    pub const fn block_bytes(self) -> usize {
        match self {
            CaptureWireFormat::Packed24 => BLOCK_FRAMES * WIRE_BYTES_PER_FRAME,
            CaptureWireFormat::BitInterleaved => BLOCK_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    Reference,
    #[default]
    Transposed,
}

impl From<DecoderKind> for Decoder {
    fn from(kind: DecoderKind) -> Self {
        match kind {
            DecoderKind::Reference => Decoder::Reference,
            DecoderKind::Transposed => Decoder::Transposed,
        }
    }
}

/// Engine tuning. Defaults reproduce the device's stock driver setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub playback_transfers: usize,
    pub playback_packets: usize,
    pub feedback_transfers: usize,
    pub feedback_packets: usize,
    pub capture_transfers: usize,
    pub capture_transfer_bytes: usize,
    pub accumulator_slots: usize,
    pub sync_loss_threshold: u32,
    pub feedback_tolerance: u32,
    pub capture_format: CaptureWireFormat,
    pub decoder: DecoderKind,
    pub control_timeout_ms: u64,
    pub log_burst: u32,
    pub log_interval_ms: u64,
    pub event_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            playback_transfers: 8,
            playback_packets: 4,
            feedback_transfers: 4,
            feedback_packets: 1,
            capture_transfers: 8,
            capture_transfer_bytes: 512,
            accumulator_slots: 128,
            sync_loss_threshold: 41,
            feedback_tolerance: 2,
            capture_format: CaptureWireFormat::default(),
            decoder: DecoderKind::default(),
            control_timeout_ms: 1_000,
            log_burst: 10,
            log_interval_ms: 5_000,
            event_history: 64,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("playback_transfers", self.playback_transfers),
            ("playback_packets", self.playback_packets),
            ("feedback_transfers", self.feedback_transfers),
            ("feedback_packets", self.feedback_packets),
            ("capture_transfers", self.capture_transfers),
            ("capture_transfer_bytes", self.capture_transfer_bytes),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.feedback_packets > MAX_FEEDBACK_PACKETS {
            return Err(ConfigError::TooManyFeedbackPackets {
                max: MAX_FEEDBACK_PACKETS,
                got: self.feedback_packets,
            });
        }
        if self.accumulator_slots < 2 * PATTERN_LEN || self.accumulator_slots % PATTERN_LEN != 0 {
            return Err(ConfigError::AccumulatorSize(self.accumulator_slots));
        }
        let block = self.capture_format.block_bytes();
        if self.capture_transfer_bytes % block != 0 {
            return Err(ConfigError::CaptureTransferSize {
                block,
                got: self.capture_transfer_bytes,
            });
        }
        // The window must stay above zero at the slowest rate.
        let limit = SampleRate::Hz44100.frames_per_ms();
        if self.feedback_tolerance >= limit {
            return Err(ConfigError::FeedbackTolerance {
                limit,
                got: self.feedback_tolerance,
            });
        }
        self.capture_transfer_bytes
            .checked_mul(self.capture_transfers)
            .and_then(|bytes| bytes.checked_mul(4))
            .ok_or(ConfigError::Overflow("capture staging ring"))?;
        (SampleRate::Hz96000.max_frames_per_packet() as usize * WIRE_BYTES_PER_FRAME)
            .checked_mul(self.playback_packets)
            .ok_or(ConfigError::Overflow("playback transfer"))?;
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("invalid engine config {}", path.display()))
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    /// Bytes of the capture staging ring.
    pub fn capture_staging_bytes(&self) -> usize {
        self.capture_transfer_bytes
            .saturating_mul(self.capture_transfers)
            .saturating_mul(4)
    }
}
