//! Bit-interleaved capture blocks.
//!
//! Each frame owns a 64-byte group. Byte `bit` of the group carries bit
//! `23 - bit` of channel 0 (in bit 0) and channel 2 (in bit 1); byte
//! `bit + 32` does the same for channels 1 and 3. Bytes 24..32 and 56..64
//! are padding.

use crate::{DecodedBlock, BLOCK_BYTES, FRAME_GROUP_BYTES, SAMPLE_BITS};

const PAIR_OFFSET: usize = 32;

/// Selects the implementation used to demultiplex capture blocks.
///
/// Both variants produce identical output; the reference loop exists as the
/// oracle for the transposing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decoder {
    /// One bit per iteration, exactly as the layout is described.
    Reference,
    /// Eight bytes at a time through an 8x8 bit-matrix transpose.
    #[default]
    Transposed,
}

impl Decoder {
    #[inline]
    pub fn decode(self, src: &[u8; BLOCK_BYTES], dst: &mut DecodedBlock) {
        match self {
            Decoder::Reference => decode_block_reference(src, dst),
            Decoder::Transposed => decode_block_transposed(src, dst),
        }
    }
}

/// Decodes a block one bit at a time.
pub fn decode_block_reference(src: &[u8; BLOCK_BYTES], dst: &mut DecodedBlock) {
    for (group, frame) in src.chunks_exact(FRAME_GROUP_BYTES).zip(dst.iter_mut()) {
        let mut ch = [0u32; 4];
        for bit in 0..SAMPLE_BITS {
            let first = u32::from(group[bit]);
            let second = u32::from(group[bit + PAIR_OFFSET]);

            ch[0] = (ch[0] << 1) | (first & 1);
            ch[2] = (ch[2] << 1) | ((first >> 1) & 1);
            ch[1] = (ch[1] << 1) | (second & 1);
            ch[3] = (ch[3] << 1) | ((second >> 1) & 1);
        }
        for (out, value) in frame.iter_mut().zip(ch) {
            *out = (value << 8) as i32;
        }
    }
}

/// Transposes an 8x8 bit matrix stored row-major, row 0 in the most
/// significant byte and column 0 in the most significant bit of each row.
#[inline(always)]
fn transpose8(mut x: u64) -> u64 {
    let mut t = (x ^ (x >> 7)) & 0x00AA_00AA_00AA_00AA;
    x ^= t ^ (t << 7);
    t = (x ^ (x >> 14)) & 0x0000_CCCC_0000_CCCC;
    x ^= t ^ (t << 14);
    t = (x ^ (x >> 28)) & 0x0000_0000_F0F0_F0F0;
    x ^= t ^ (t << 28);
    x
}

#[inline(always)]
fn load_rows(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw).swap_bytes()
}

/// Decodes a block eight bit positions at a time.
///
/// After the transpose, bit plane `k` of eight consecutive source bytes sits
/// in byte `k` of the result with the first source byte in the top bit,
/// which is exactly the MSB-first order the samples are sent in.
pub fn decode_block_transposed(src: &[u8; BLOCK_BYTES], dst: &mut DecodedBlock) {
    for (group, frame) in src.chunks_exact(FRAME_GROUP_BYTES).zip(dst.iter_mut()) {
        let mut ch = [0u32; 4];
        for chunk in 0..SAMPLE_BITS / 8 {
            let start = chunk * 8;
            let even = transpose8(load_rows(&group[start..]));
            let odd = transpose8(load_rows(&group[start + PAIR_OFFSET..]));

            ch[0] = (ch[0] << 8) | (even & 0xFF) as u32;
            ch[2] = (ch[2] << 8) | ((even >> 8) & 0xFF) as u32;
            ch[1] = (ch[1] << 8) | (odd & 0xFF) as u32;
            ch[3] = (ch[3] << 8) | ((odd >> 8) & 0xFF) as u32;
        }
        for (out, value) in frame.iter_mut().zip(ch) {
            *out = (value << 8) as i32;
        }
    }
}

/// Builds the wire block a device would send for the given containers.
///
/// Only the top 24 bits of every container are representable; padding bytes
/// and the unused bits of every data byte are left at zero.
pub fn encode_block(frames: &DecodedBlock, dst: &mut [u8; BLOCK_BYTES]) {
    dst.fill(0);
    for (frame, group) in frames.iter().zip(dst.chunks_exact_mut(FRAME_GROUP_BYTES)) {
        let samples = frame.map(|container| (container as u32) >> 8);
        for bit in 0..SAMPLE_BITS {
            let shift = SAMPLE_BITS - 1 - bit;
            let bit_of = |sample: u32| ((sample >> shift) & 1) as u8;
            group[bit] = bit_of(samples[0]) | (bit_of(samples[2]) << 1);
            group[bit + PAIR_OFFSET] = bit_of(samples[1]) | (bit_of(samples[3]) << 1);
        }
    }
}
