//! Frame-rate and capture-latency bookkeeping for live runs.

use std::time::{Duration, Instant};

/// Frame rate measured over consecutive reporting windows.
pub struct FpsCounter {
    window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    /// One-second windows.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            frames: 0,
        }
    }

    /// Count a frame. Returns the rate once per closed window.
    pub fn tick(&mut self) -> Option<f32> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window || elapsed.is_zero() {
            return None;
        }
        let rate = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(rate)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Average time spent pushing a captured frame through the graph.
///
/// The first frames after a reset include pipeline and texture warm-up and
/// are left out of the average.
#[derive(Debug, Clone, Default)]
pub struct CaptureBenchmark {
    frames: u32,
    total: Duration,
}

impl CaptureBenchmark {
    pub const IGNORED_INITIAL_FRAMES: u32 = 5;

    pub fn record(&mut self, elapsed: Duration) {
        self.frames += 1;
        if self.frames > Self::IGNORED_INITIAL_FRAMES {
            self.total += elapsed;
        }
    }

    /// Mean frame time, zero until a frame past the warm-up was recorded.
    pub fn average(&self) -> Duration {
        match self.frames.checked_sub(Self::IGNORED_INITIAL_FRAMES) {
            Some(counted) if counted > 0 => self.total / counted,
            _ => Duration::ZERO,
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benchmark_skips_warm_up_frames() {
        let mut bench = CaptureBenchmark::default();
        for _ in 0..CaptureBenchmark::IGNORED_INITIAL_FRAMES {
            bench.record(Duration::from_secs(1));
        }
        assert_eq!(bench.average(), Duration::ZERO);

        bench.record(Duration::from_millis(10));
        bench.record(Duration::from_millis(30));
        assert_eq!(bench.average(), Duration::from_millis(20));

        bench.reset();
        assert_eq!(bench.frames(), 0);
        assert_eq!(bench.average(), Duration::ZERO);
    }

    #[test]
    fn fps_reports_once_per_window() {
        let mut fps = FpsCounter::with_window(Duration::from_secs(1));
        let start = fps.window_start;
        for ms in [100, 400, 700] {
            assert!(fps.tick_at(start + Duration::from_millis(ms)).is_none());
        }
        let rate = fps.tick_at(start + Duration::from_secs(2)).unwrap();
        assert!((rate - 2.0).abs() < 1e-3);
        assert!(fps.tick_at(start + Duration::from_millis(2500)).is_none());
    }
}
