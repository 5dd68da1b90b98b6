//! Frame timing: a monotonic stopwatch and a rolling history of frame durations.

use std::time::Instant;

/// Number of frame durations kept in a [`FrameHistory`].
pub const FRAME_SAMPLES: usize = 60;

/// Monotonic stopwatch reporting fractional milliseconds.
///
/// Backed by [`Instant`], so wall-clock adjustments never affect it.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    start: Instant,
}

impl FrameClock {
    /// Create a clock started now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Reset the reference point to now
    pub fn start(&mut self) {
        self.start = Instant::now();
    }

    /// Milliseconds since the last `start()`
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity ring of recent frame durations in milliseconds.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    samples: Vec<f64>,
    capacity: usize,
    next: usize,
    filled: bool,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self::with_capacity(FRAME_SAMPLES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            filled: false,
        }
    }

    /// Record a frame duration, overwriting the oldest entry once full.
    ///
    /// Returns `true` when this push completed a full window and the write position
    /// wrapped back to the start.
    pub fn push(&mut self, ms: f64) -> bool {
        if self.samples.len() < self.capacity {
            self.samples.push(ms);
        } else {
            self.samples[self.next] = ms;
        }
        self.next += 1;
        if self.next == self.capacity {
            self.next = 0;
            self.filled = true;
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.filled
    }

    /// Samples from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let split = if self.filled { self.next } else { 0 };
        self.samples[split..]
            .iter()
            .chain(self.samples[..split].iter())
            .copied()
    }

    pub fn oldest(&self) -> Option<f64> {
        self.iter().next()
    }

    pub fn latest(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let idx = if self.next == 0 {
            self.samples.len() - 1
        } else {
            self.next - 1
        };
        self.samples.get(idx).copied()
    }

    /// Mean of the strictly positive samples
    pub fn average(&self) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|&&s| s > 0.0)
            .fold((0.0, 0usize), |(sum, count), &s| (sum + s, count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    /// Frames per second with every sample shorter than `target_len` counted as `target_len`.
    ///
    /// Paced frames spend their slack sleeping, so the pace is the fastest rate reported.
    pub fn display_fps(&self, target_len: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(|&s| s.max(target_len)).sum();
        let mean = total / self.samples.len() as f64;
        if mean > 0.0 {
            1000.0 / mean
        } else {
            0.0
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.next = 0;
        self.filled = false;
    }
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_is_monotonic() {
        let mut clock = FrameClock::new();
        std::thread::sleep(Duration::from_millis(2));
        let first = clock.elapsed();
        assert!(first >= 2.0);
        assert!(clock.elapsed() >= first);
        clock.start();
        assert!(clock.elapsed() < first);
    }

    #[test]
    fn test_history_wraps_after_capacity() {
        let mut history = FrameHistory::with_capacity(4);
        assert!(!history.push(1.0));
        assert!(!history.push(2.0));
        assert!(!history.push(3.0));
        assert!(history.push(4.0));
        assert!(history.is_full());
        assert_eq!(history.oldest(), Some(1.0));

        // The N+1th insertion evicts the oldest entry
        assert!(!history.push(5.0));
        assert_eq!(history.len(), 4);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(history.latest(), Some(5.0));
    }

    #[test]
    fn test_history_eviction_default_capacity() {
        let mut history = FrameHistory::new();
        for i in 0..FRAME_SAMPLES {
            history.push(i as f64);
        }
        assert_eq!(history.oldest(), Some(0.0));
        history.push(100.0);
        assert_eq!(history.oldest(), Some(1.0));
        assert_eq!(history.len(), FRAME_SAMPLES);
    }

    #[test]
    fn test_average_ignores_non_positive() {
        let mut history = FrameHistory::with_capacity(4);
        assert_eq!(history.average(), None);
        history.push(0.0);
        history.push(10.0);
        history.push(20.0);
        assert_eq!(history.average(), Some(15.0));
    }

    #[test]
    fn test_display_fps_clamps_to_target() {
        let mut history = FrameHistory::with_capacity(2);
        history.push(5.0);
        history.push(5.0);
        // Frames faster than the target are reported at the target rate
        assert!((history.display_fps(1000.0 / 60.0) - 60.0).abs() < 1e-9);

        history.push(50.0);
        history.push(50.0);
        assert!((history.display_fps(1000.0 / 60.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let mut history = FrameHistory::with_capacity(2);
        history.push(1.0);
        history.push(1.0);
        history.clear();
        assert!(history.is_empty());
        assert!(!history.is_full());
        assert_eq!(history.latest(), None);
    }
}
