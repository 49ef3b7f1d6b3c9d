//! Feedback-synchronized isochronous streaming for the TASCAM US-144MKII.
//!
//! The device clocks itself and reports how many frames it consumed through a
//! feedback endpoint. [`engine::Engine`] turns those reports into per-packet
//! frame counts, keeps playback and capture running on the same clock and
//! moves audio between a host ring buffer and bus transfers from completion
//! callbacks that never block.
//!
//! The bus and the host audio subsystem are abstracted behind
//! [`transport::Transport`], [`control::ControlPipe`] and [`host::PcmHost`];
//! [`sim`] provides in-process implementations for tests and benchmarks.

#![deny(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod feedback;
#[cfg(any(test, feature = "fuzzing"))]
pub mod fuzzing;
pub mod host;
pub mod metrics;
mod orchestrator;
pub mod position;
pub mod rate;
pub mod ratelimit;
pub mod ring;
pub mod routing;
pub mod scheduler;
pub mod sim;
pub mod transport;

pub use config::{CaptureWireFormat, DecoderKind, EngineConfig};
pub use engine::{Engine, StreamPhase, TriggerCommand};
pub use error::{ConfigError, StreamError};
pub use feedback::SyncState;
pub use host::{HostFormat, HwParams, PcmBuffer, PcmHost};
pub use metrics::{StreamEvent, StreamStats};
pub use rate::SampleRate;
pub use routing::{CaptureSource, PlaybackSource, Routing};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Playback,
    Capture,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Playback, Direction::Capture];
}

/// Allocates a boxed slice, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Clone>(
    len: usize,
    value: T,
    what: &'static str,
) -> Result<Box<[T]>, StreamError> {
    let mut items = Vec::new();
    items
        .try_reserve_exact(len)
        .map_err(|_| StreamError::Allocation { what })?;
    items.resize(len, value);
    Ok(items.into_boxed_slice())
}
