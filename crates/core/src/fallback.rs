//! One-way downgrade from the GPU backend to the software backend.
//!
//! ```text
//! Healthy --failure--> Degrading --warning expired--> SoftwareOnly
//!    \____________________request__________________________/
//! ```
//!
//! Leaving `Healthy` is permanent for the session: nothing moves the state back.

use crate::config::PresentConfig;
use crate::logging::{log, LogCategory, LogLevel};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchReason {
    /// GPU setup failed before steady state
    InitFailed,
    /// GPU error during composite or present
    RuntimeFailure,
    /// External request, e.g. a hotkey
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Healthy,
    /// Switched to software; the warning is still on screen
    Degrading { since: Instant },
    SoftwareOnly,
}

/// Serializable name of a [`FallbackState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FallbackPhase {
    Healthy,
    Degrading,
    SoftwareOnly,
}

/// What the render loop must do after a failure was accepted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackAction {
    pub reason: SwitchReason,
    /// Conservative target rate to apply, if any
    pub lower_fps_to: Option<f64>,
    pub warning_armed: bool,
}

#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    state: FallbackState,
    warning_until: Option<Instant>,
    warning_duration: Duration,
    fallback_fps: f64,
    auto_fallback: bool,
}

impl FallbackPolicy {
    pub fn new(warning_duration: Duration, fallback_fps: f64, auto_fallback: bool) -> Self {
        Self {
            state: FallbackState::Healthy,
            warning_until: None,
            warning_duration,
            fallback_fps,
            auto_fallback,
        }
    }

    pub fn from_config(config: &PresentConfig) -> Self {
        Self::new(
            Duration::from_millis(config.warning_duration_ms),
            config.fallback_fps,
            config.auto_fallback,
        )
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn phase(&self) -> FallbackPhase {
        match self.state {
            FallbackState::Healthy => FallbackPhase::Healthy,
            FallbackState::Degrading { .. } => FallbackPhase::Degrading,
            FallbackState::SoftwareOnly => FallbackPhase::SoftwareOnly,
        }
    }

    /// Whether the GPU backend may still be selected
    pub fn allows_gpu(&self) -> bool {
        self.state == FallbackState::Healthy
    }

    /// Report a failure or switch request.
    ///
    /// Returns the action to take when this moves the session to software, `None` when
    /// the session already left the GPU or the failure is ignored.
    pub fn on_failure(&mut self, reason: SwitchReason, now: Instant) -> Option<FallbackAction> {
        if !self.allows_gpu() {
            return None;
        }
        if reason == SwitchReason::RuntimeFailure && !self.auto_fallback {
            log(LogCategory::Fallback, LogLevel::Warn, || {
                "GPU runtime failure ignored, automatic fallback disabled".to_string()
            });
            return None;
        }

        let action = match reason {
            SwitchReason::Requested => {
                self.state = FallbackState::SoftwareOnly;
                FallbackAction {
                    reason,
                    lower_fps_to: None,
                    warning_armed: false,
                }
            }
            SwitchReason::InitFailed | SwitchReason::RuntimeFailure => {
                self.state = FallbackState::Degrading { since: now };
                self.warning_until = Some(now + self.warning_duration);
                FallbackAction {
                    reason,
                    lower_fps_to: Some(self.fallback_fps),
                    warning_armed: true,
                }
            }
        };
        log(LogCategory::Fallback, LogLevel::Warn, || {
            format!("Switching to software rendering ({:?})", reason)
        });
        Some(action)
    }

    /// Advance time-based transitions
    pub fn tick(&mut self, now: Instant) {
        if let FallbackState::Degrading { since } = self.state {
            if !self.warning_visible(now) {
                self.state = FallbackState::SoftwareOnly;
                log(LogCategory::Fallback, LogLevel::Info, || {
                    format!(
                        "Fallback warning cleared after {} ms",
                        now.duration_since(since).as_millis()
                    )
                });
            }
        }
    }

    pub fn warning_visible(&self, now: Instant) -> bool {
        self.warning_until.is_some_and(|until| now < until)
    }
}
