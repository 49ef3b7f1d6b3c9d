//! Lays out the isochronous packets of one outbound transfer.

use crate::feedback::{FeedbackTracker, PacketSource};
use crate::transport::{IsoPacket, TransferStatus};

/// Result of sizing one playback transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketLayout {
    pub frames: usize,
    pub bytes: usize,
    pub from_accumulator: u32,
    pub underruns: u32,
}

fn place(packet: &mut IsoPacket, offset: usize, frames: usize, bytes_per_frame: usize) -> usize {
    let length = frames * bytes_per_frame;
    *packet = IsoPacket {
        offset,
        length,
        actual_length: 0,
        status: TransferStatus::Completed,
    };
    length
}

/// Sizes every packet from the tracker and packs them back to back.
///
/// Packet sizes are capped at `max_frames` so the layout always fits the
/// transfer buffer.
pub fn lay_out_packets(
    tracker: &mut FeedbackTracker,
    packets: &mut [IsoPacket],
    bytes_per_frame: usize,
    max_frames: usize,
) -> PacketLayout {
    let mut layout = PacketLayout::default();
    for packet in packets.iter_mut() {
        let (frames, source) = tracker.next_packet_frames();
        match source {
            PacketSource::Accumulator => layout.from_accumulator += 1,
            PacketSource::Underrun => layout.underruns += 1,
            PacketSource::Nominal => {}
        }
        let frames = (frames as usize).min(max_frames);
        layout.bytes += place(packet, layout.bytes, frames, bytes_per_frame);
        layout.frames += frames;
    }
    layout
}

/// Nominal layout used when transfers are prepared.
pub fn nominal_layout(packets: &mut [IsoPacket], frames: usize, bytes_per_frame: usize) -> usize {
    let mut offset = 0;
    for packet in packets.iter_mut() {
        offset += place(packet, offset, frames, bytes_per_frame);
    }
    offset
}
