//! US-144MKII sample codec
//! =======================
//! Bit-level transforms between the interface's wire formats and 32-bit
//! container samples. Everything here is a pure function over fixed-size
//! blocks so it can run inside transfer completion handlers.
//!
//! Two wire layouts exist:
//!
//! * **packed** – every channel is a little-endian 24-bit word, 12 bytes per
//!   frame. Playback always uses this layout.
//! * **bit-interleaved** – capture on newer firmware delivers 8 frames in a
//!   512-byte block where each of the 24 bit positions of a frame occupies one
//!   byte, two channels per byte.
//!
//! Decoded samples are "containers": the signed 24-bit value shifted into the
//! top three bytes of an `i32`, low byte zero.

#![deny(unsafe_code)]

pub mod interleave;
pub mod packed;

pub use interleave::{decode_block_reference, decode_block_transposed, encode_block, Decoder};
pub use packed::{
    container_from_s24, decode_frame, encode_frame, pack_container_s24le, pack_s24le,
    s24_from_container, unpack_s24le, unpack_s24le_container,
};

/// Channels carried by every frame, in both directions.
pub const CHANNELS: usize = 4;
/// Bytes of one packed 24-bit sample on the wire.
pub const WIRE_BYTES_PER_SAMPLE: usize = 3;
/// Bytes of one packed frame on the wire.
pub const WIRE_BYTES_PER_FRAME: usize = CHANNELS * WIRE_BYTES_PER_SAMPLE;
/// Frames carried by one bit-interleaved capture block.
pub const BLOCK_FRAMES: usize = 8;
/// Bytes of one bit-interleaved capture block.
pub const BLOCK_BYTES: usize = 512;
/// Bytes describing one frame inside a bit-interleaved block.
pub const FRAME_GROUP_BYTES: usize = BLOCK_BYTES / BLOCK_FRAMES;
/// Significant bits of every sample.
pub const SAMPLE_BITS: usize = 24;

/// Largest positive 24-bit sample value.
pub const S24_MAX: i32 = 0x7F_FFFF;
/// Most negative 24-bit sample value.
pub const S24_MIN: i32 = -0x80_0000;

/// One frame of container samples.
pub type Frame = [i32; CHANNELS];
/// Decoded contents of one bit-interleaved block.
pub type DecodedBlock = [Frame; BLOCK_FRAMES];
