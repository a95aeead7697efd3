//! Monotonic timer for frame deltas and the shader `time` uniform.

use std::time::{Duration, Instant};

/// Measures time since creation and between ticks.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    ticks: u64,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            ticks: 0,
        }
    }

    /// Total time since the timer was created or last reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Returns the time since the previous tick and counts the tick.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.ticks += 1;
        delta
    }

    /// Number of [`tick`](Self::tick) calls since creation or reset.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.ticks = 0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts() {
        let mut timer = Timer::new();
        timer.tick();
        timer.tick();
        assert_eq!(timer.ticks(), 2);
        timer.reset();
        assert_eq!(timer.ticks(), 0);
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let timer = Timer::new();
        let a = timer.elapsed();
        let b = timer.elapsed();
        assert!(b >= a);
    }
}
