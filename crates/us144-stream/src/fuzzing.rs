//! Entry points for the fuzz targets.

use us144_codec::{DecodedBlock, Decoder, BLOCK_BYTES, BLOCK_FRAMES};

use crate::bridge::{write_capture, CaptureDecoder};
use crate::config::CaptureWireFormat;
use crate::feedback::{Accumulator, FeedbackTracker, Reading};
use crate::host::HostFormat;
use crate::rate::SampleRate;
use crate::ring::ByteRing;
use crate::routing::CaptureRouting;

/// Drives the feedback tracker with arbitrary readings. The first byte picks
/// the rate; each following byte is one reading, 0xff meaning a missing one.
pub fn fuzz_feedback(data: &[u8]) {
    let Some((&selector, readings)) = data.split_first() else {
        return;
    };
    let rate = SampleRate::ALL[usize::from(selector) % SampleRate::ALL.len()];
    let slots = vec![0u32; 64].into_boxed_slice();
    let mut tracker = FeedbackTracker::new(Accumulator::new(slots), rate, 2, 41, 1);
    let max = rate.max_frames_per_packet();

    for chunk in readings.chunks(3) {
        tracker.ingest(chunk.iter().map(|&byte| match byte {
            0xff => Reading::Missing,
            value => Reading::Value(value),
        }));
        assert!(tracker.accumulator().len() < tracker.accumulator().index().capacity());
        for _ in 0..4 {
            let (frames, _) = tracker.next_packet_frames();
            assert!(frames <= max, "{frames} frames exceeds {max} at {rate}");
        }
    }
}

/// Pushes arbitrary capture bytes through staging, decoding and the host
/// ring write.
pub fn fuzz_decode_capture(data: &[u8]) {
    let Some((&selector, stream)) = data.split_first() else {
        return;
    };
    let format = if selector & 1 == 0 {
        CaptureWireFormat::BitInterleaved
    } else {
        CaptureWireFormat::Packed24
    };
    let host_format = if selector & 2 == 0 {
        HostFormat::S24Packed
    } else {
        HostFormat::S32
    };
    let decoder = CaptureDecoder::new(format, Decoder::Transposed);
    let mut staging = ByteRing::new(vec![0u8; BLOCK_BYTES * 4].into_boxed_slice());
    let buffer_frames = 100;
    let mut ring = vec![0u8; host_format.frames_to_bytes(buffer_frames)];
    let mut raw = [0u8; BLOCK_BYTES];
    let mut decoded: DecodedBlock = [[0; 4]; BLOCK_FRAMES];
    let mut offset = 0;

    for chunk in stream.chunks(700) {
        staging.push(chunk);
        let block = decoder.block_bytes();
        while staging.pop_into(&mut raw[..block]) {
            decoder.decode(&raw[..block], &mut decoded);
            write_capture(
                &decoded,
                &CaptureRouting::default(),
                &mut ring,
                host_format,
                buffer_frames,
                offset,
            );
            offset = (offset + BLOCK_FRAMES) % buffer_frames;
        }
    }
}
