//! Packed little-endian 24-bit samples.

use crate::{Frame, CHANNELS, WIRE_BYTES_PER_FRAME, WIRE_BYTES_PER_SAMPLE};

/// Moves a signed 24-bit value into the top three bytes of an `i32`.
#[inline]
pub const fn container_from_s24(value: i32) -> i32 {
    ((value as u32) << 8) as i32
}

/// Recovers the signed 24-bit value held by a container sample.
#[inline]
pub const fn s24_from_container(container: i32) -> i32 {
    container >> 8
}

/// Writes the low 24 bits of `value` as three little-endian bytes.
#[inline]
pub fn pack_s24le(value: i32, dst: &mut [u8]) {
    let bytes = value.to_le_bytes();
    dst[..WIRE_BYTES_PER_SAMPLE].copy_from_slice(&bytes[..WIRE_BYTES_PER_SAMPLE]);
}

/// Reads three little-endian bytes as a sign-extended 24-bit value.
#[inline]
pub fn unpack_s24le(src: &[u8]) -> i32 {
    let raw = i32::from_le_bytes([src[0], src[1], src[2], 0]);
    (raw << 8) >> 8
}

/// Writes the top three bytes of a container sample, dropping the low byte.
#[inline]
pub fn pack_container_s24le(container: i32, dst: &mut [u8]) {
    let bytes = container.to_le_bytes();
    dst[..WIRE_BYTES_PER_SAMPLE].copy_from_slice(&bytes[1..]);
}

/// Reads three little-endian bytes into a container sample.
#[inline]
pub fn unpack_s24le_container(src: &[u8]) -> i32 {
    i32::from_le_bytes([0, src[0], src[1], src[2]])
}

/// Decodes one packed wire frame into containers.
#[inline]
pub fn decode_frame(src: &[u8]) -> Frame {
    let mut frame = [0i32; CHANNELS];
    for (channel, chunk) in frame
        .iter_mut()
        .zip(src[..WIRE_BYTES_PER_FRAME].chunks_exact(WIRE_BYTES_PER_SAMPLE))
    {
        *channel = unpack_s24le_container(chunk);
    }
    frame
}

/// Encodes one frame of containers into a packed wire frame.
#[inline]
pub fn encode_frame(frame: &Frame, dst: &mut [u8]) {
    for (channel, chunk) in frame
        .iter()
        .zip(dst[..WIRE_BYTES_PER_FRAME].chunks_exact_mut(WIRE_BYTES_PER_SAMPLE))
    {
        pack_container_s24le(*channel, chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{S24_MAX, S24_MIN};

    #[test]
    fn s24_extremes_survive_packing() {
        let mut buf = [0u8; 3];
        for value in [0, 1, -1, S24_MAX, S24_MIN, 0x12_3456, -0x12_3456] {
            pack_s24le(value, &mut buf);
            assert_eq!(unpack_s24le(&buf), value, "value {value:#x}");
        }
    }

    #[test]
    fn packing_is_little_endian() {
        let mut buf = [0u8; 3];
        pack_s24le(0x12_3456, &mut buf);
        assert_eq!(buf, [0x56, 0x34, 0x12]);
    }

    #[test]
    fn container_keeps_top_three_bytes() {
        let container = container_from_s24(-2);
        assert_eq!(container as u32, 0xFFFF_FE00);
        let mut buf = [0u8; 3];
        pack_container_s24le(container, &mut buf);
        assert_eq!(buf, [0xFE, 0xFF, 0xFF]);
        assert_eq!(unpack_s24le_container(&buf), container);
        assert_eq!(s24_from_container(container), -2);
    }

    #[test]
    fn frame_layout_is_channel_major() {
        let frame = [
            container_from_s24(1),
            container_from_s24(2),
            container_from_s24(3),
            container_from_s24(S24_MIN),
        ];
        let mut wire = [0u8; WIRE_BYTES_PER_FRAME];
        encode_frame(&frame, &mut wire);
        assert_eq!(&wire[..3], &[1, 0, 0]);
        assert_eq!(&wire[6..9], &[3, 0, 0]);
        assert_eq!(&wire[9..], &[0, 0, 0x80]);
        assert_eq!(decode_frame(&wire), frame);
    }
}
