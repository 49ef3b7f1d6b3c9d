use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Admits at most `burst` events per `interval`.
///
/// Lock free and allocation free, so it can gate logging from completion
/// context. When a new window opens the first admitted caller learns how many
/// events were suppressed in the previous one.
#[derive(Debug)]
pub struct RateLimiter {
    origin: Instant,
    interval_ns: u64,
    burst: u32,
    window_start: AtomicU64,
    admitted: AtomicU32,
    suppressed: AtomicU32,
}

impl RateLimiter {
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self {
            origin: Instant::now(),
            interval_ns: interval.as_nanos().min(u128::from(u64::MAX)) as u64,
            burst: burst.max(1),
            window_start: AtomicU64::new(0),
            admitted: AtomicU32::new(0),
            suppressed: AtomicU32::new(0),
        }
    }

    /// Returns `Some(suppressed_so_far)` when the event may be logged.
    pub fn check(&self) -> Option<u32> {
        let now = self.origin.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
        self.check_at(now)
    }

    fn check_at(&self, now: u64) -> Option<u32> {
        let start = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(start) >= self.interval_ns
            && self
                .window_start
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.admitted.store(0, Ordering::Relaxed);
        }
        if self.admitted.fetch_add(1, Ordering::Relaxed) < self.burst {
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}
