//! Copies between the host ring buffer and transfer buffers.
//!
//! Both directions walk the host ring with [`spans`], so a copy window that
//! crosses the end of the buffer is split into two contiguous parts.

use us144_codec::{
    decode_frame, pack_container_s24le, DecodedBlock, Decoder, Frame, BLOCK_BYTES,
    WIRE_BYTES_PER_FRAME, WIRE_BYTES_PER_SAMPLE,
};

use crate::config::CaptureWireFormat;
use crate::host::{HostFormat, CHANNELS};
use crate::ring::spans;
use crate::routing::{CaptureRouting, PlaybackRouting};

type WireFrame = [[u8; WIRE_BYTES_PER_SAMPLE]; CHANNELS];

#[inline]
fn host_frame_to_wire(src: &[u8], format: HostFormat) -> WireFrame {
    let mut frame = [[0u8; WIRE_BYTES_PER_SAMPLE]; CHANNELS];
    let stride = format.bytes_per_sample();
    // The device takes the three most significant bytes of each sample.
    let skip = stride - WIRE_BYTES_PER_SAMPLE;
    for (sample, chunk) in frame.iter_mut().zip(src.chunks_exact(stride)) {
        sample.copy_from_slice(&chunk[skip..]);
    }
    frame
}

/// Fills `wire` with `frames` frames read from the host ring at
/// `offset_frames`, routed onto the output pairs.
pub fn copy_playback(
    ring: &[u8],
    format: HostFormat,
    buffer_frames: usize,
    offset_frames: usize,
    frames: usize,
    routing: &PlaybackRouting,
    wire: &mut [u8],
) {
    let host_stride = format.bytes_per_frame();
    let frames = frames.min(wire.len() / WIRE_BYTES_PER_FRAME);
    for (span, linear) in spans(offset_frames, frames, buffer_frames) {
        let src = &ring[span.start * host_stride..span.end * host_stride];
        let dst =
            &mut wire[linear * WIRE_BYTES_PER_FRAME..(linear + span.len()) * WIRE_BYTES_PER_FRAME];
        for (host_frame, wire_frame) in src
            .chunks_exact(host_stride)
            .zip(dst.chunks_exact_mut(WIRE_BYTES_PER_FRAME))
        {
            let routed = routing.apply(host_frame_to_wire(host_frame, format));
            for (sample, out) in routed
                .iter()
                .zip(wire_frame.chunks_exact_mut(WIRE_BYTES_PER_SAMPLE))
            {
                out.copy_from_slice(sample);
            }
        }
    }
}

/// Writes decoded capture frames into the host ring at `offset_frames`.
pub fn write_capture(
    frames: &[Frame],
    routing: &CaptureRouting,
    ring: &mut [u8],
    format: HostFormat,
    buffer_frames: usize,
    offset_frames: usize,
) {
    let host_stride = format.bytes_per_frame();
    let sample_stride = format.bytes_per_sample();
    for (span, linear) in spans(offset_frames, frames.len(), buffer_frames) {
        let dst = &mut ring[span.start * host_stride..span.end * host_stride];
        for (frame, host_frame) in frames[linear..linear + span.len()]
            .iter()
            .zip(dst.chunks_exact_mut(host_stride))
        {
            let routed = routing.apply(*frame);
            for (container, out) in routed.iter().zip(host_frame.chunks_exact_mut(sample_stride)) {
                match format {
                    HostFormat::S24Packed => pack_container_s24le(*container, out),
                    HostFormat::S32 => out.copy_from_slice(&container.to_le_bytes()),
                }
            }
        }
    }
}

/// Turns raw capture bytes into frames, one wire block at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDecoder {
    format: CaptureWireFormat,
    decoder: Decoder,
}

impl CaptureDecoder {
    pub fn new(format: CaptureWireFormat, decoder: Decoder) -> Self {
        Self { format, decoder }
    }

    /// Raw bytes consumed per [`CaptureDecoder::decode`] call.
    #[inline]
    pub const fn block_bytes(&self) -> usize {
        self.format.block_bytes()
    }

    /// Decodes one block of `block_bytes()` bytes into `out`. Every block
    /// carries eight frames.
    pub fn decode(&self, raw: &[u8], out: &mut DecodedBlock) {
        match self.format {
            CaptureWireFormat::BitInterleaved => {
                let block = raw
                    .get(..BLOCK_BYTES)
                    .and_then(|bytes| <&[u8; BLOCK_BYTES]>::try_from(bytes).ok());
                if let Some(block) = block {
                    self.decoder.decode(block, out);
                }
            }
            CaptureWireFormat::Packed24 => {
                for (frame, chunk) in out.iter_mut().zip(raw.chunks_exact(WIRE_BYTES_PER_FRAME)) {
                    *frame = decode_frame(chunk);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{CaptureSource, PlaybackSource};
    use us144_codec::{encode_block, BLOCK_FRAMES};

    const STRAIGHT: PlaybackRouting = PlaybackRouting {
        line_out: PlaybackSource::Playback12,
        digital_out: PlaybackSource::Playback34,
    };

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn wrapped_playback_copy_matches_doubled_buffer() {
        let format = HostFormat::S24Packed;
        let ring = ramp(format.frames_to_bytes(100));
        let mut wire = vec![0u8; 10 * WIRE_BYTES_PER_FRAME];
        copy_playback(&ring, format, 100, 95, 10, &STRAIGHT, &mut wire);

        let doubled = [ring.as_slice(), ring.as_slice()].concat();
        let stride = format.bytes_per_frame();
        assert_eq!(wire, &doubled[95 * stride..105 * stride]);
    }

    #[test]
    fn s32_playback_keeps_top_bytes() {
        let mut ring = vec![0u8; HostFormat::S32.frames_to_bytes(2)];
        for (i, chunk) in ring.chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&[0xEE, i as u8, 0x10 + i as u8, 0x20 + i as u8]);
        }
        let mut wire = vec![0u8; 2 * WIRE_BYTES_PER_FRAME];
        copy_playback(&ring, HostFormat::S32, 2, 0, 2, &STRAIGHT, &mut wire);
        assert_eq!(&wire[..6], &[0, 0x10, 0x20, 1, 0x11, 0x21]);
        assert!(!wire.contains(&0xEE));
    }

    #[test]
    fn wrapped_capture_write_matches_doubled_buffer() {
        let frames: Vec<Frame> = (0..10)
            .map(|f| [f << 8, (f + 100) << 8, (f + 200) << 8, -(f << 8)])
            .collect();
        let format = HostFormat::S32;
        let routing = CaptureRouting {
            capture_12: CaptureSource::Analog,
            capture_34: CaptureSource::Digital,
        };
        let mut ring = vec![0u8; format.frames_to_bytes(16)];
        write_capture(&frames, &routing, &mut ring, format, 16, 12);

        let stride = format.bytes_per_frame();
        let doubled = [ring.as_slice(), ring.as_slice()].concat();
        let linear: Vec<i32> = doubled[12 * stride..22 * stride]
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let expected: Vec<i32> = frames.iter().flatten().copied().collect();
        assert_eq!(linear, expected);
    }

    #[test]
    fn packed_capture_truncates_low_byte() {
        let frames = [[0x1234_5678, -0x100, 0, 0x7FFF_FF00]];
        let mut ring = vec![0u8; HostFormat::S24Packed.frames_to_bytes(1)];
        write_capture(
            &frames,
            &CaptureRouting {
                capture_12: CaptureSource::Analog,
                capture_34: CaptureSource::Digital,
            },
            &mut ring,
            HostFormat::S24Packed,
            1,
            0,
        );
        assert_eq!(&ring[..6], &[0x56, 0x34, 0x12, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&ring[9..], &[0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn capture_decoder_handles_both_wire_formats() {
        let block: DecodedBlock = std::array::from_fn(|f| {
            let f = f as i32;
            [f << 8, (f + 8) << 8, -((f + 1) << 8), 0x7F_FFFF << 8]
        });
        let mut raw = [0u8; BLOCK_BYTES];
        encode_block(&block, &mut raw);

        let mut out = [[0; 4]; BLOCK_FRAMES];
        let interleaved = CaptureDecoder::new(CaptureWireFormat::BitInterleaved, Decoder::Transposed);
        interleaved.decode(&raw, &mut out);
        assert_eq!(out, block);

        let mut packed = vec![0u8; BLOCK_FRAMES * WIRE_BYTES_PER_FRAME];
        for (frame, chunk) in block.iter().zip(packed.chunks_exact_mut(WIRE_BYTES_PER_FRAME)) {
            us144_codec::encode_frame(frame, chunk);
        }
        let packed_decoder = CaptureDecoder::new(CaptureWireFormat::Packed24, Decoder::Reference);
        assert_eq!(packed_decoder.block_bytes(), 96);
        let mut out = [[0; 4]; BLOCK_FRAMES];
        packed_decoder.decode(&packed, &mut out);
        assert_eq!(out, block);
    }
}
