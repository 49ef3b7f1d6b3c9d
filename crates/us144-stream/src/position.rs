/// Frame position of one direction inside the host ring buffer.
///
/// The logical count only grows; the hardware pointer is derived from it so
/// `pointer() == frames() % buffer_frames` holds at every observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPosition {
    frames: u64,
    last_period: u64,
    buffer_frames: usize,
    period_frames: usize,
}

impl StreamPosition {
    pub fn new(buffer_frames: usize, period_frames: usize) -> Self {
        Self {
            frames: 0,
            last_period: 0,
            buffer_frames: buffer_frames.max(1),
            period_frames: period_frames.max(1),
        }
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[inline]
    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    #[inline]
    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    /// Current offset inside the ring buffer.
    #[inline]
    pub fn pointer(&self) -> usize {
        (self.frames % self.buffer_frames as u64) as usize
    }

    /// Adds `frames` and returns how many period boundaries were crossed.
    pub fn advance(&mut self, frames: usize) -> u64 {
        self.frames += frames as u64;
        let period = self.frames / self.period_frames as u64;
        let crossed = period - self.last_period;
        self.last_period = period;
        crossed
    }

    pub fn reset(&mut self) {
        self.frames = 0;
        self.last_period = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_crossings_follow_floor_division() {
        let mut position = StreamPosition::new(1024, 128);
        let mut fired = 0;
        for _ in 0..100 {
            for increment in [6, 6, 7, 6] {
                let before = position.frames();
                let crossed = position.advance(increment);
                assert_eq!(crossed, (before + increment as u64) / 128 - before / 128);
                fired += crossed;
            }
        }
        assert_eq!(position.frames(), 2500);
        assert_eq!(fired, 2500 / 128);
    }

    #[test]
    fn large_step_reports_every_period() {
        let mut position = StreamPosition::new(512, 64);
        assert_eq!(position.advance(200), 3);
        assert_eq!(position.pointer(), 200);
        assert_eq!(position.advance(400), 6);
        assert_eq!(position.pointer(), 600 % 512);
    }
}
