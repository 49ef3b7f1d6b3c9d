use thiserror::Error;

use crate::control::{ControlError, ControlStep};
use crate::engine::StreamPhase;
use crate::transport::SubmitFailure;
use crate::Direction;

/// Errors surfaced by the synchronous stream API.
///
/// Completion handlers never produce these; their failures are either logged
/// or escalated through the deferred stop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("unsupported sample rate {0} Hz")]
    UnsupportedRate(u32),
    #[error("invalid hardware parameters: {0}")]
    InvalidParams(&'static str),
    #[error("rate change rejected while streaming")]
    Busy,
    #[error("transfers from the previous run are still in flight")]
    Again,
    #[error("{operation} not allowed for {direction:?} in state {phase:?}")]
    InvalidState {
        direction: Direction,
        phase: StreamPhase,
        operation: &'static str,
    },
    #[error("{direction:?} substream has no hardware parameters")]
    NotConfigured { direction: Direction },
    #[error("device control failed at {step:?}: {source}")]
    Control {
        step: ControlStep,
        #[source]
        source: ControlError,
    },
    #[error("failed to allocate {what}")]
    Allocation { what: &'static str },
    #[error("failed to submit transfers: {0}")]
    Submit(SubmitFailure),
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Rejections produced by [`crate::config::EngineConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("feedback_packets must not exceed {max}, got {got}")]
    TooManyFeedbackPackets { max: usize, got: usize },
    #[error("accumulator_slots must be a multiple of 8 and at least 16, got {0}")]
    AccumulatorSize(usize),
    #[error("capture_transfer_bytes must be a multiple of {block}, got {got}")]
    CaptureTransferSize { block: usize, got: usize },
    #[error("feedback_tolerance must be below {limit}, got {got}")]
    FeedbackTolerance { limit: u32, got: u32 },
    #[error("{0} is too large")]
    Overflow(&'static str),
}
