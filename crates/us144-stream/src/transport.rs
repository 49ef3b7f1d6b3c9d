//! The boundary to the bus transport.
//!
//! The engine owns every [`Transfer`] it ever uses; ownership moves to the
//! transport on submission and comes back through a [`Completion`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::StreamError;

/// Isochronous feedback IN endpoint.
pub const EP_FEEDBACK_IN: u8 = 0x81;
/// Isochronous audio OUT endpoint.
pub const EP_AUDIO_OUT: u8 = 0x02;
/// Bulk audio IN endpoint.
pub const EP_AUDIO_IN: u8 = 0x86;
/// MIDI endpoints. Named for completeness; the engine does not drive them.
pub const EP_MIDI_IN: u8 = 0x83;
pub const EP_MIDI_OUT: u8 = 0x04;

/// Bytes in one feedback packet.
pub const FEEDBACK_PACKET_BYTES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Playback,
    Feedback,
    Capture,
}

impl EndpointClass {
    /// Submission order used when streaming starts.
    pub const START_ORDER: [EndpointClass; 3] = [
        EndpointClass::Feedback,
        EndpointClass::Playback,
        EndpointClass::Capture,
    ];

    pub const fn endpoint(self) -> u8 {
        match self {
            EndpointClass::Playback => EP_AUDIO_OUT,
            EndpointClass::Feedback => EP_FEEDBACK_IN,
            EndpointClass::Capture => EP_AUDIO_IN,
        }
    }

    pub const fn is_isochronous(self) -> bool {
        !matches!(self, EndpointClass::Capture)
    }
}

/// Completion status of a transfer or of a single isochronous packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    #[default]
    Completed,
    /// Unlinked by the engine.
    Cancelled,
    ConnectionReset,
    /// Endpoint shutting down.
    Shutdown,
    /// Device removed.
    NoDevice,
    Stall,
    Overflow,
    Protocol,
    Other(i32),
}

impl TransferStatus {
    /// Statuses that end streaming quietly.
    #[inline]
    pub const fn is_shutdown(self) -> bool {
        matches!(
            self,
            TransferStatus::Cancelled
                | TransferStatus::ConnectionReset
                | TransferStatus::Shutdown
                | TransferStatus::NoDevice
        )
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, TransferStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoPacket {
    pub offset: usize,
    pub length: usize,
    pub actual_length: usize,
    pub status: TransferStatus,
}

/// A transfer buffer plus its descriptors.
pub struct Transfer {
    class: EndpointClass,
    slot: usize,
    pub buffer: Box<[u8]>,
    /// Bytes to send, or bytes requested for IN transfers.
    pub length: usize,
    /// Isochronous packet descriptors; empty for bulk transfers.
    pub packets: Vec<IsoPacket>,
    pub status: TransferStatus,
    pub actual_length: usize,
}

impl Transfer {
    /// Allocates a transfer without aborting on allocation failure.
    pub fn try_new(
        class: EndpointClass,
        slot: usize,
        buffer_bytes: usize,
        packets: usize,
    ) -> Result<Self, StreamError> {
        let buffer = crate::try_alloc(buffer_bytes, 0u8, "transfer buffer")?;
        let descriptors = crate::try_alloc(packets, IsoPacket::default(), "packet descriptors")?;
        Ok(Self {
            class,
            slot,
            buffer,
            length: buffer_bytes,
            packets: descriptors.into_vec(),
            status: TransferStatus::Completed,
            actual_length: 0,
        })
    }

    #[inline]
    pub fn class(&self) -> EndpointClass {
        self.class
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn endpoint(&self) -> u8 {
        self.class.endpoint()
    }

    /// Bytes the device returned for packet `index`.
    pub fn packet_data(&self, index: usize) -> &[u8] {
        let Some(packet) = self.packets.get(index) else {
            return &[];
        };
        let end = (packet.offset + packet.actual_length).min(self.buffer.len());
        let start = packet.offset.min(end);
        &self.buffer[start..end]
    }

    /// Bytes received by a bulk transfer.
    pub fn received(&self) -> &[u8] {
        &self.buffer[..self.actual_length.min(self.buffer.len())]
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("class", &self.class)
            .field("slot", &self.slot)
            .field("length", &self.length)
            .field("packets", &self.packets.len())
            .field("status", &self.status)
            .field("actual_length", &self.actual_length)
            .finish()
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitFailure {
    #[error("device disconnected")]
    Disconnected,
    #[error("transport rejected the transfer (code {0})")]
    Rejected(i32),
}

/// A refused submission hands the transfer back to the engine.
#[derive(Debug)]
pub struct SubmitError {
    pub transfer: Transfer,
    pub reason: SubmitFailure,
}

/// Receives finished transfers. Runs in completion context: must not block.
pub trait CompletionSink: Send + Sync {
    fn on_complete(&self, transfer: Transfer, completion: &Completion);
}

/// Callback handle passed along with each submitted transfer.
#[derive(Clone)]
pub struct Completion {
    sink: Arc<dyn CompletionSink>,
}

impl Completion {
    pub fn new(sink: Arc<dyn CompletionSink>) -> Self {
        Self { sink }
    }

    /// Delivers a finished transfer to its owner.
    pub fn complete(&self, transfer: Transfer) {
        self.sink.on_complete(transfer, self);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

/// Submit/cancel surface of the bus.
pub trait Transport: Send + Sync {
    /// Queues `transfer`. Never blocks; callable from completion context.
    fn submit(&self, transfer: Transfer, completion: Completion) -> Result<(), SubmitError>;

    /// Cancels every queued transfer of `class` and waits until each one has
    /// been delivered to its completion with a shutdown status.
    fn cancel_all(&self, class: EndpointClass);
}
