use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::Direction;

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub packets_from_accumulator: u64,
    pub scheduler_underruns: u64,
    pub accumulator_overruns: u64,
    pub feedback_invalid: u64,
    pub capture_overflow_bytes: u64,
    pub transport_errors: u64,
    pub failed_resubmits: u64,
    pub xruns: u64,
    pub playback_frames: u64,
    pub capture_frames: u64,
}

/// Notable state changes kept in the bounded event history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    SyncAcquired { head: usize, tail: usize },
    SyncLost,
    Xrun(Direction),
    Started,
    Stopped,
}

/// Lock-free counters shared by the completion handlers and control threads.
#[derive(Clone)]
pub struct StreamMetrics {
    inner: Arc<StreamMetricsInner>,
}

#[derive(Default)]
struct Counters {
    packets_from_accumulator: AtomicU64,
    scheduler_underruns: AtomicU64,
    accumulator_overruns: AtomicU64,
    feedback_invalid: AtomicU64,
    capture_overflow_bytes: AtomicU64,
    transport_errors: AtomicU64,
    failed_resubmits: AtomicU64,
    xruns: AtomicU64,
    playback_frames: AtomicU64,
    capture_frames: AtomicU64,
}

struct StreamMetricsInner {
    counters: Counters,
    history: EventRing,
}

#[inline]
fn bump(counter: &AtomicU64, amount: u64) {
    if amount > 0 {
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

impl StreamMetrics {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(StreamMetricsInner {
                counters: Counters::default(),
                history: EventRing::new(history_capacity),
            }),
        }
    }

    pub fn snapshot(&self) -> StreamStats {
        let c = &self.inner.counters;
        StreamStats {
            packets_from_accumulator: c.packets_from_accumulator.load(Ordering::Relaxed),
            scheduler_underruns: c.scheduler_underruns.load(Ordering::Relaxed),
            accumulator_overruns: c.accumulator_overruns.load(Ordering::Relaxed),
            feedback_invalid: c.feedback_invalid.load(Ordering::Relaxed),
            capture_overflow_bytes: c.capture_overflow_bytes.load(Ordering::Relaxed),
            transport_errors: c.transport_errors.load(Ordering::Relaxed),
            failed_resubmits: c.failed_resubmits.load(Ordering::Relaxed),
            xruns: c.xruns.load(Ordering::Relaxed),
            playback_frames: c.playback_frames.load(Ordering::Relaxed),
            capture_frames: c.capture_frames.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn record_playback(&self, frames: usize, from_accumulator: u32, underruns: u32) {
        let c = &self.inner.counters;
        bump(&c.playback_frames, frames as u64);
        bump(&c.packets_from_accumulator, u64::from(from_accumulator));
        bump(&c.scheduler_underruns, u64::from(underruns));
    }

    #[inline]
    pub fn record_feedback(&self, invalid: u32, overruns: u32) {
        let c = &self.inner.counters;
        bump(&c.feedback_invalid, u64::from(invalid));
        bump(&c.accumulator_overruns, u64::from(overruns));
    }

    #[inline]
    pub fn record_capture(&self, frames: usize, overflow_bytes: usize) {
        let c = &self.inner.counters;
        bump(&c.capture_frames, frames as u64);
        bump(&c.capture_overflow_bytes, overflow_bytes as u64);
    }

    #[inline]
    pub fn record_transport_error(&self) {
        bump(&self.inner.counters.transport_errors, 1);
    }

    #[inline]
    pub fn record_failed_resubmit(&self) {
        bump(&self.inner.counters.failed_resubmits, 1);
    }

    #[inline]
    pub fn register_xrun(&self, direction: Direction) {
        bump(&self.inner.counters.xruns, 1);
        self.inner.history.push(StreamEvent::Xrun(direction));
    }

    #[inline]
    pub fn record_event(&self, event: StreamEvent) {
        self.inner.history.push(event);
    }

    pub fn drain_events(&self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.inner.history.pop() {
            events.push(event);
        }
        events
    }

    pub fn reset(&self) {
        let c = &self.inner.counters;
        for counter in [
            &c.packets_from_accumulator,
            &c.scheduler_underruns,
            &c.accumulator_overruns,
            &c.feedback_invalid,
            &c.capture_overflow_bytes,
            &c.transport_errors,
            &c.failed_resubmits,
            &c.xruns,
            &c.playback_frames,
            &c.capture_frames,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.inner.history.clear();
    }
}

/// Bounded event history; the oldest entry is dropped when full.
struct EventRing {
    queue: ArrayQueue<StreamEvent>,
}

impl EventRing {
    fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(16)),
        }
    }

    #[inline]
    fn push(&self, event: StreamEvent) {
        if self.queue.push(event).is_err() {
            let _ = self.queue.pop();
            let _ = self.queue.push(event);
        }
    }

    #[inline]
    fn pop(&self) -> Option<StreamEvent> {
        self.queue.pop()
    }

    fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}
