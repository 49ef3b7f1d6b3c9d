//! Feedback endpoint tracking.
//!
//! Each feedback reading reports how many frames the device consumed during
//! the last eight microframes. The tracker validates the reading, spreads the
//! total over eight per-microframe packet sizes and appends them to the sync
//! accumulator, which the packet scheduler drains one slot per outbound
//! packet.

use crate::rate::{SampleRate, MICROFRAMES_PER_READING};
use crate::ring::RingIndex;

/// Slots written per feedback reading.
pub const PATTERN_LEN: usize = MICROFRAMES_PER_READING as usize;

pub type Pattern = [u32; PATTERN_LEN];

/// Spreads `target` frames over eight microframes around `nominal`.
///
/// The difference to `8 * nominal` is distributed one frame at a time with a
/// Bresenham accumulator, so the slots sum exactly to `target`.
pub fn spread_pattern(nominal: u32, target: u32) -> Pattern {
    let adjustment = i64::from(target) - i64::from(nominal) * PATTERN_LEN as i64;
    let step = adjustment.signum();
    let count = adjustment.unsigned_abs();
    let whole = (count / PATTERN_LEN as u64) as i64;
    let remainder = count % PATTERN_LEN as u64;

    let mut pattern = [0u32; PATTERN_LEN];
    let mut acc = 0u64;
    for slot in pattern.iter_mut() {
        let mut value = i64::from(nominal) + step * whole;
        acc += remainder;
        if acc >= PATTERN_LEN as u64 {
            value += step;
            acc -= PATTERN_LEN as u64;
        }
        *slot = value.max(0) as u32;
    }
    pattern
}

/// Accepted range of feedback bytes at one rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackWindow {
    pub base: u32,
    pub max: u32,
    pub nominal: u32,
}

impl FeedbackWindow {
    pub fn new(rate: SampleRate, tolerance: u32) -> Self {
        let centre = rate.frames_per_ms();
        Self {
            base: centre.saturating_sub(tolerance),
            max: centre.saturating_add(tolerance),
            nominal: rate.nominal_frames_per_packet(),
        }
    }

    #[inline]
    pub fn accepts(&self, value: u32) -> bool {
        (self.base..=self.max).contains(&value)
    }
}

/// One feedback packet as seen by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Value(u8),
    /// Packet error, empty packet or failed transfer.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Unsynced,
    WarmingUp,
    Synced,
}

/// Where the scheduler took a packet size from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSource {
    Accumulator,
    Nominal,
    /// Synced but the accumulator was empty.
    Underrun,
}

/// Summary of one feedback transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedbackReport {
    /// The transfer fell into the initial skip window.
    pub skipped: bool,
    pub accepted: u32,
    pub invalid: u32,
    /// Slots dropped because the accumulator was full.
    pub overruns: u32,
    pub acquired: bool,
    /// Consecutive invalid readings exceeded the threshold while synced.
    pub lost: bool,
    pub head: usize,
    pub tail: usize,
}

/// The sync accumulator: per-microframe frame counts between the feedback
/// handler (producer) and the playback handler (consumer).
#[derive(Debug)]
pub struct Accumulator {
    slots: Box<[u32]>,
    index: RingIndex,
}

impl Accumulator {
    pub fn new(slots: Box<[u32]>) -> Self {
        let index = RingIndex::new(slots.len());
        Self { slots, index }
    }

    #[inline]
    pub fn index(&self) -> &RingIndex {
        &self.index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn reset(&mut self, nominal: u32) {
        self.slots.fill(nominal);
        self.index.reset();
    }

    /// Writes eight slots at the producer index.
    ///
    /// With `guard` set the oldest unread slots are dropped first so the
    /// producer never laps the consumer; the number dropped is returned.
    fn push(&mut self, pattern: &Pattern, guard: bool) -> usize {
        let mut dropped = 0;
        if guard && self.index.free() < PATTERN_LEN {
            dropped = PATTERN_LEN - self.index.free();
            self.index.advance_tail(dropped);
        }
        for (offset, value) in pattern.iter().enumerate() {
            let slot = self.index.slot_after_head(offset);
            self.slots[slot] = *value;
        }
        self.index.advance_head(PATTERN_LEN);
        dropped
    }

    fn pop(&mut self) -> Option<u32> {
        if self.index.is_empty() {
            return None;
        }
        let value = self.slots[self.index.tail()];
        self.index.advance_tail(1);
        Some(value)
    }
}

/// Feedback validation, pattern generation and the sync state machine.
#[derive(Debug)]
pub struct FeedbackTracker {
    window: FeedbackWindow,
    tolerance: u32,
    accumulator: Accumulator,
    state: SyncState,
    consecutive_errors: u32,
    loss_threshold: u32,
    skip_initial: u32,
    skip_remaining: u32,
}

impl FeedbackTracker {
    pub fn new(
        accumulator: Accumulator,
        rate: SampleRate,
        tolerance: u32,
        loss_threshold: u32,
        skip_initial: u32,
    ) -> Self {
        let mut tracker = Self {
            window: FeedbackWindow::new(rate, tolerance),
            tolerance,
            accumulator,
            state: SyncState::Unsynced,
            consecutive_errors: 0,
            loss_threshold,
            skip_initial,
            skip_remaining: skip_initial,
        };
        tracker.reset(rate);
        tracker
    }

    /// Returns to the unsynced state for `rate` and refills the accumulator
    /// with nominal values.
    pub fn reset(&mut self, rate: SampleRate) {
        self.window = FeedbackWindow::new(rate, self.tolerance);
        self.accumulator.reset(self.window.nominal);
        self.state = SyncState::Unsynced;
        self.consecutive_errors = 0;
        self.skip_remaining = self.skip_initial;
    }

    #[inline]
    pub fn state(&self) -> SyncState {
        self.state
    }

    #[inline]
    pub fn window(&self) -> FeedbackWindow {
        self.window
    }

    #[inline]
    pub fn nominal(&self) -> u32 {
        self.window.nominal
    }

    #[inline]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    #[inline]
    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    /// Processes the readings of one feedback transfer.
    pub fn ingest<I>(&mut self, readings: I) -> FeedbackReport
    where
        I: IntoIterator<Item = Reading>,
    {
        let mut report = FeedbackReport::default();
        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            report.skipped = true;
            return self.finish(report);
        }
        if self.state == SyncState::Unsynced {
            self.state = SyncState::WarmingUp;
        }

        let old_head = self.accumulator.index.head();
        let guard = self.state == SyncState::Synced;
        for reading in readings {
            let pattern = match reading {
                Reading::Value(value) if self.window.accepts(u32::from(value)) => {
                    self.consecutive_errors = 0;
                    report.accepted += 1;
                    spread_pattern(self.window.nominal, u32::from(value))
                }
                _ => {
                    report.invalid += 1;
                    if self.state == SyncState::Synced {
                        self.consecutive_errors += 1;
                        if self.consecutive_errors > self.loss_threshold {
                            self.state = SyncState::Unsynced;
                            self.consecutive_errors = 0;
                            report.lost = true;
                            return self.finish(report);
                        }
                    }
                    [self.window.nominal; PATTERN_LEN]
                }
            };
            report.overruns += self.accumulator.push(&pattern, guard) as u32;
        }

        if self.state == SyncState::WarmingUp && self.crossed_consumer(old_head) {
            let half = self.accumulator.index.capacity() / 2;
            self.accumulator.index.set_len(half);
            self.state = SyncState::Synced;
            self.consecutive_errors = 0;
            report.acquired = true;
        }
        self.finish(report)
    }

    /// The producer moved from behind the parked consumer to within half a
    /// lap ahead of it.
    fn crossed_consumer(&self, old_head: usize) -> bool {
        let index = &self.accumulator.index;
        let half = index.capacity() / 2;
        let was_behind = index.distance(index.tail(), old_head) >= half;
        let is_ahead = index.distance(index.tail(), index.head()) < half;
        was_behind && is_ahead
    }

    fn finish(&self, mut report: FeedbackReport) -> FeedbackReport {
        report.head = self.accumulator.index.head();
        report.tail = self.accumulator.index.tail();
        report
    }

    /// Frame count for the next outbound packet.
    pub fn next_packet_frames(&mut self) -> (u32, PacketSource) {
        if self.state != SyncState::Synced {
            return (self.window.nominal, PacketSource::Nominal);
        }
        match self.accumulator.pop() {
            Some(frames) => (frames, PacketSource::Accumulator),
            None => (self.window.nominal, PacketSource::Underrun),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(rate: SampleRate, skip: u32) -> FeedbackTracker {
        let slots = vec![0u32; 128].into_boxed_slice();
        FeedbackTracker::new(Accumulator::new(slots), rate, 2, 41, skip)
    }

    fn sync(tracker: &mut FeedbackTracker, value: u8) -> usize {
        let mut readings = 0;
        while tracker.state() != SyncState::Synced {
            tracker.ingest([Reading::Value(value)]);
            readings += 1;
            assert!(readings < 64, "tracker never synchronised");
        }
        readings
    }

    #[test]
    fn patterns_sum_to_target_for_every_valid_reading() {
        for rate in SampleRate::ALL {
            let window = FeedbackWindow::new(rate, 2);
            for value in window.base..=window.max {
                let pattern = spread_pattern(window.nominal, value);
                assert_eq!(pattern.iter().sum::<u32>(), value, "{rate} value {value}");
                let spread = pattern.iter().max().unwrap() - pattern.iter().min().unwrap();
                assert!(spread <= 1, "{rate} value {value}: {pattern:?}");
            }
        }
    }

    #[test]
    fn spread_handles_large_adjustments() {
        let pattern = spread_pattern(6, 20);
        assert_eq!(pattern.iter().sum::<u32>(), 20);
        let pattern = spread_pattern(12, 130);
        assert_eq!(pattern.iter().sum::<u32>(), 130);
    }

    #[test]
    fn initial_readings_are_skipped() {
        let mut tracker = tracker(SampleRate::Hz48000, 4);
        for _ in 0..4 {
            let report = tracker.ingest([Reading::Value(48)]);
            assert!(report.skipped);
            assert_eq!(report.head, 0);
        }
        assert_eq!(tracker.state(), SyncState::Unsynced);
        let report = tracker.ingest([Reading::Value(48)]);
        assert!(!report.skipped);
        assert_eq!(tracker.state(), SyncState::WarmingUp);
    }

    #[test]
    fn sync_is_acquired_after_one_lap() {
        let mut tracker = tracker(SampleRate::Hz48000, 0);
        assert_eq!(tracker.next_packet_frames(), (6, PacketSource::Nominal));
        let readings = sync(&mut tracker, 49);
        assert_eq!(readings, 16);
        assert_eq!(tracker.accumulator().len(), 64);
        assert_eq!(tracker.next_packet_frames().1, PacketSource::Accumulator);
    }

    #[test]
    fn invalid_readings_fill_nominal_without_counting_while_warming() {
        let mut tracker = tracker(SampleRate::Hz44100, 0);
        for _ in 0..10 {
            let report = tracker.ingest([Reading::Missing]);
            assert_eq!(report.invalid, 1);
        }
        assert_eq!(tracker.consecutive_errors(), 0);
        assert_eq!(tracker.state(), SyncState::WarmingUp);
        assert_eq!(tracker.next_packet_frames(), (5, PacketSource::Nominal));
    }

    #[test]
    fn loss_is_reported_on_the_reading_past_the_threshold() {
        let mut tracker = tracker(SampleRate::Hz48000, 0);
        sync(&mut tracker, 48);
        for n in 1..=41 {
            let report = tracker.ingest([Reading::Value(0)]);
            assert!(!report.lost, "lost after {n} readings");
        }
        let report = tracker.ingest([Reading::Missing]);
        assert!(report.lost);
        assert_eq!(tracker.state(), SyncState::Unsynced);
    }

    #[test]
    fn valid_reading_resets_error_count() {
        let mut tracker = tracker(SampleRate::Hz48000, 0);
        sync(&mut tracker, 48);
        for _ in 0..30 {
            tracker.ingest([Reading::Missing]);
        }
        tracker.ingest([Reading::Value(47)]);
        assert_eq!(tracker.consecutive_errors(), 0);
    }

    #[test]
    fn producer_never_laps_consumer_once_synced() {
        let mut tracker = tracker(SampleRate::Hz96000, 0);
        sync(&mut tracker, 96);
        let mut overruns = 0;
        for _ in 0..40 {
            overruns += tracker.ingest([Reading::Value(97)]).overruns;
            assert!(tracker.accumulator().len() <= 127);
        }
        assert!(overruns > 0);
    }

    #[test]
    fn empty_accumulator_reports_underrun() {
        let mut tracker = tracker(SampleRate::Hz48000, 0);
        sync(&mut tracker, 48);
        for _ in 0..64 {
            assert_eq!(tracker.next_packet_frames().1, PacketSource::Accumulator);
        }
        assert_eq!(tracker.next_packet_frames(), (6, PacketSource::Underrun));
    }
}
