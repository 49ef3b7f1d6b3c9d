//! Modular index arithmetic shared by every ring in the engine.
//!
//! [`RingIndex`] is a producer/consumer pair over a fixed capacity. One slot
//! always stays free so `head == tail` unambiguously means empty; the fill
//! level therefore never exceeds `capacity - 1`.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    capacity: usize,
    head: usize,
    tail: usize,
}

impl RingIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            head: 0,
            tail: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Producer position.
    #[inline]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Consumer position.
    #[inline]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Slots written but not yet consumed.
    #[inline]
    pub fn len(&self) -> usize {
        self.distance(self.tail, self.head)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Slots the producer may still write without reaching the consumer.
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity - 1 - self.len()
    }

    /// Forward distance from `from` to `to`.
    #[inline]
    pub fn distance(&self, from: usize, to: usize) -> usize {
        (to + self.capacity - from % self.capacity) % self.capacity
    }

    /// Physical slot `offset` positions after the producer.
    #[inline]
    pub fn slot_after_head(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity
    }

    #[inline]
    pub fn advance_head(&mut self, count: usize) {
        self.head = (self.head + count) % self.capacity;
    }

    #[inline]
    pub fn advance_tail(&mut self, count: usize) {
        self.tail = (self.tail + count) % self.capacity;
    }

    /// Places the consumer `count` slots behind the producer.
    #[inline]
    pub fn set_len(&mut self, count: usize) {
        let count = count.min(self.capacity - 1);
        self.tail = (self.head + self.capacity - count) % self.capacity;
    }

    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

/// Splits `count` consecutive elements starting at `start` of a ring of
/// `capacity` into contiguous physical spans.
///
/// Yields `(physical_range, linear_offset)` pairs where `linear_offset` is the
/// position of the span inside the unwrapped sequence.
pub fn spans(start: usize, count: usize, capacity: usize) -> Spans {
    Spans {
        position: if capacity == 0 { 0 } else { start % capacity },
        remaining: if capacity == 0 { 0 } else { count },
        done: 0,
        capacity,
    }
}

#[derive(Debug, Clone)]
pub struct Spans {
    position: usize,
    remaining: usize,
    done: usize,
    capacity: usize,
}

impl Iterator for Spans {
    type Item = (Range<usize>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let len = self.remaining.min(self.capacity - self.position);
        let span = (self.position..self.position + len, self.done);
        self.position = (self.position + len) % self.capacity;
        self.remaining -= len;
        self.done += len;
        Some(span)
    }
}

/// Byte ring used to stage raw capture data until a full wire block exists.
#[derive(Debug)]
pub struct ByteRing {
    data: Box<[u8]>,
    index: RingIndex,
}

impl ByteRing {
    pub fn new(data: Box<[u8]>) -> Self {
        let index = RingIndex::new(data.len());
        Self { data, index }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Appends `bytes`, discarding the oldest staged bytes when full.
    ///
    /// Returns how many bytes were discarded.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let usable = self.index.capacity() - 1;
        let skipped_input = bytes.len().saturating_sub(usable);
        let bytes = &bytes[skipped_input..];
        let overflow = bytes.len().saturating_sub(self.index.free());
        if overflow > 0 {
            self.index.advance_tail(overflow);
        }
        for (range, offset) in spans(self.index.head(), bytes.len(), self.index.capacity()) {
            let len = range.len();
            self.data[range].copy_from_slice(&bytes[offset..offset + len]);
        }
        self.index.advance_head(bytes.len());
        overflow + skipped_input
    }

    /// Moves exactly `out.len()` bytes into `out`, or nothing if fewer are staged.
    pub fn pop_into(&mut self, out: &mut [u8]) -> bool {
        if self.index.len() < out.len() {
            return false;
        }
        for (range, offset) in spans(self.index.tail(), out.len(), self.index.capacity()) {
            let len = range.len();
            out[offset..offset + len].copy_from_slice(&self.data[range]);
        }
        self.index.advance_tail(out.len());
        true
    }

    pub fn clear(&mut self) {
        self.index.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_level_tracks_wraparound() {
        let mut ring = RingIndex::new(8);
        ring.advance_head(6);
        ring.advance_tail(4);
        assert_eq!(ring.len(), 2);
        ring.advance_head(5);
        assert_eq!(ring.head(), 3);
        assert_eq!(ring.len(), 7);
        assert_eq!(ring.free(), 0);
    }

    #[test]
    fn set_len_places_tail_behind_head() {
        let mut ring = RingIndex::new(128);
        ring.advance_head(8);
        ring.set_len(64);
        assert_eq!(ring.tail(), 72);
        assert_eq!(ring.len(), 64);
    }

    #[test]
    fn spans_split_at_capacity() {
        let parts: Vec<_> = spans(95, 10, 100).collect();
        assert_eq!(parts, vec![(95..100, 0), (0..5, 5)]);
        let whole: Vec<_> = spans(10, 20, 100).collect();
        assert_eq!(whole, vec![(10..30, 0)]);
    }

    #[test]
    fn spans_cover_multiple_laps() {
        let parts: Vec<_> = spans(3, 9, 4).collect();
        assert_eq!(parts, vec![(3..4, 0), (0..4, 1), (0..4, 5)]);
    }

    #[test]
    fn byte_ring_drops_oldest_on_overflow() {
        let mut ring = ByteRing::new(vec![0u8; 8].into_boxed_slice());
        assert_eq!(ring.push(&[1, 2, 3, 4, 5]), 0);
        assert_eq!(ring.push(&[6, 7, 8, 9]), 2);
        let mut out = [0u8; 7];
        assert!(ring.pop_into(&mut out));
        assert_eq!(out, [3, 4, 5, 6, 7, 8, 9]);
        assert!(ring.is_empty());
    }

    #[test]
    fn byte_ring_keeps_partial_blocks() {
        let mut ring = ByteRing::new(vec![0u8; 16].into_boxed_slice());
        ring.push(&[1, 2, 3]);
        let mut out = [0u8; 4];
        assert!(!ring.pop_into(&mut out));
        ring.push(&[4, 5]);
        assert!(ring.pop_into(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(ring.len(), 1);
    }
}
