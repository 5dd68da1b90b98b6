//! Frame pacing.
//!
//! Two strategies, picked by whether `present()` blocks for vsync:
//!
//! - **Unpaced**: sleep out the rest of the frame budget, then spin the remainder to
//!   correct for coarse sleep granularity.
//! - **Paced**: `present()` already waits for the next vblank for an unknown time, so
//!   sleeping the whole budget would double-wait. The controller searches for the
//!   sleep that minimises the observed frame length, bisecting between a floor and a
//!   ceiling once per full [`FrameHistory`](crate::clock::FrameHistory) window.

use crate::clock::FrameClock;
use crate::logging::{log, LogCategory, LogLevel};
use serde::Serialize;
use std::time::Duration;

/// Bound gap below which the vsync search counts as converged
pub const SEARCH_EPSILON_MS: f64 = 0.05;

/// Smallest sleep the vsync search may settle on
pub const MIN_SLEEP_MS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PacingMode {
    Unpaced,
    Paced,
}

impl PacingMode {
    pub fn for_backend(hardware_paced: bool) -> Self {
        if hardware_paced {
            PacingMode::Paced
        } else {
            PacingMode::Unpaced
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchDirection {
    Ascending,
    Descending,
}

/// Vsync search state, all values in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PacingState {
    pub target_frame_len: f64,
    pub sleep_estimate: f64,
    pub floor_bound: f64,
    pub ceiling_bound: f64,
    pub direction: SearchDirection,
    pub best_observed_sleep: f64,
    pub best_observed_len: f64,
}

impl PacingState {
    fn fresh(target_frame_len: f64) -> Self {
        Self {
            target_frame_len,
            sleep_estimate: target_frame_len,
            floor_bound: 0.0,
            ceiling_bound: target_frame_len + 1.0,
            direction: SearchDirection::Descending,
            best_observed_sleep: 0.0,
            // Any first window improves on this, so the search always starts descending
            best_observed_len: target_frame_len * 2.0,
        }
    }
}

/// Decides how long the render loop waits between frames.
#[derive(Debug, Clone)]
pub struct PacingController {
    state: PacingState,
}

impl PacingController {
    pub fn new(target_frame_len: f64) -> Self {
        Self {
            state: PacingState::fresh(target_frame_len),
        }
    }

    pub fn state(&self) -> &PacingState {
        &self.state
    }

    pub fn target_frame_len(&self) -> f64 {
        self.state.target_frame_len
    }

    pub fn sleep_estimate(&self) -> f64 {
        self.state.sleep_estimate
    }

    /// Apply a new target; any change restarts the vsync search. Returns whether the
    /// target changed.
    pub fn set_target(&mut self, target_frame_len: f64) -> bool {
        if (target_frame_len - self.state.target_frame_len).abs() <= f64::EPSILON {
            return false;
        }
        log(LogCategory::Pacing, LogLevel::Debug, || {
            format!(
                "Target frame length {:.3} -> {:.3} ms",
                self.state.target_frame_len, target_frame_len
            )
        });
        self.state = PacingState::fresh(target_frame_len);
        true
    }

    /// Restart the vsync search from the full budget
    pub fn reset(&mut self) {
        self.state = PacingState::fresh(self.state.target_frame_len);
    }

    pub fn is_converged(&self) -> bool {
        self.state.ceiling_bound - self.state.floor_bound <= SEARCH_EPSILON_MS
    }

    /// Feed the average frame length of a completed history window (paced mode).
    ///
    /// Ties with the best length so far count as no improvement.
    pub fn observe_window(&mut self, avg_len: f64) {
        let s = &mut self.state;
        if s.ceiling_bound - s.floor_bound > SEARCH_EPSILON_MS {
            let sleep = s.sleep_estimate;
            if avg_len < s.best_observed_len {
                s.best_observed_len = avg_len;
                s.best_observed_sleep = sleep;
            } else {
                s.direction = if sleep > s.best_observed_sleep {
                    SearchDirection::Descending
                } else {
                    SearchDirection::Ascending
                };
                match s.direction {
                    SearchDirection::Descending => s.ceiling_bound = sleep,
                    SearchDirection::Ascending => s.floor_bound = sleep,
                }
            }

            s.sleep_estimate = match s.direction {
                SearchDirection::Descending => (sleep + s.floor_bound) / 2.0,
                SearchDirection::Ascending => (sleep + s.ceiling_bound) / 2.0,
            };
            if s.ceiling_bound - s.floor_bound <= SEARCH_EPSILON_MS {
                s.sleep_estimate = s.floor_bound;
            }

            let state = *s;
            log(LogCategory::Pacing, LogLevel::Trace, || {
                format!(
                    "avg {:.3} ms: sleep {:.3} in [{:.3}, {:.3}] {:?}, best {:.3} at {:.3}",
                    avg_len,
                    state.sleep_estimate,
                    state.floor_bound,
                    state.ceiling_bound,
                    state.direction,
                    state.best_observed_len,
                    state.best_observed_sleep
                )
            });
        } else if avg_len >= s.target_frame_len {
            // Converged on a sleep that no longer keeps up
            log(LogCategory::Pacing, LogLevel::Debug, || {
                format!("avg {:.3} ms missed the target, restarting search", avg_len)
            });
            self.reset();
        }

        let s = &mut self.state;
        if s.sleep_estimate < MIN_SLEEP_MS {
            self.reset();
        } else if s.sleep_estimate > s.target_frame_len {
            s.sleep_estimate = s.target_frame_len;
            s.ceiling_bound = s.target_frame_len;
        }
    }

    /// Block until the next frame may start.
    ///
    /// Unpaced waits until `clock` reaches the target frame length. Paced expects a
    /// freshly started `clock` and waits the current sleep estimate.
    pub fn wait(&self, mode: PacingMode, clock: &FrameClock) {
        let budget = match mode {
            PacingMode::Unpaced => self.state.target_frame_len,
            PacingMode::Paced => self.state.sleep_estimate,
        };
        sleep_then_spin(clock, budget);
    }
}

/// Sleep whole milliseconds short of `budget_ms`, then spin until `clock` reaches it
pub fn sleep_then_spin(clock: &FrameClock, budget_ms: f64) {
    let remaining = budget_ms - clock.elapsed();
    if remaining >= 1.0 {
        std::thread::sleep(Duration::from_millis(remaining as u64));
    }
    while clock.elapsed() < budget_ms {
        std::hint::spin_loop();
    }
}
