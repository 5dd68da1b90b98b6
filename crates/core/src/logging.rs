//! Category-based logging for the presentation pipeline.
//!
//! The render thread runs once per frame, so logging here has to stay out of the frame
//! budget:
//!
//! - **LogConfig**: global configuration held in atomics, readable from any thread
//! - **LogLevel**: Off < Error < Warn < Info < Debug < Trace
//! - **LogCategory**: Render, Backend, Pacing, Geometry, Fallback, Surface
//! - **log()**: lazily formatted, rate limited, optionally written to a file by a
//!   background thread
//!
//! # Usage
//!
//! ```rust
//! use present_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Backend, LogLevel::Warn, || {
//!     format!("GPU init failed at step {}", "textures")
//! });
//! ```

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

const CATEGORY_COUNT: usize = 6;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Log category for the pipeline components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Render loop frame sequencing and session lifecycle
    Render,
    /// Backend initialization, capability probing, GPU errors
    Backend,
    /// Frame pacing and the vsync sleep search
    Pacing,
    /// Viewport recomputation
    Geometry,
    /// Backend downgrade decisions
    Fallback,
    /// Primary surface creation, locking, display mode changes
    Surface,
}

impl LogCategory {
    pub const ALL: [LogCategory; CATEGORY_COUNT] = [
        LogCategory::Render,
        LogCategory::Backend,
        LogCategory::Pacing,
        LogCategory::Geometry,
        LogCategory::Fallback,
        LogCategory::Surface,
    ];

    fn index(self) -> usize {
        match self {
            LogCategory::Render => 0,
            LogCategory::Backend => 1,
            LogCategory::Pacing => 2,
            LogCategory::Geometry => 3,
            LogCategory::Fallback => 4,
            LogCategory::Surface => 5,
        }
    }

    /// Parse a category name (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| format!("{:?}", c).eq_ignore_ascii_case(s))
    }
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sliding-window limiter, one window per category.
struct RateLimiter {
    max_logs_per_second: AtomicUsize,
    window_duration: Duration,
    state: Mutex<RateWindows>,
}

struct RateWindows {
    timestamps: [VecDeque<Instant>; CATEGORY_COUNT],
    dropped: [usize; CATEGORY_COUNT],
    last_drop_report: [Option<Instant>; CATEGORY_COUNT],
}

impl RateLimiter {
    fn new(max_logs_per_second: usize) -> Self {
        Self {
            max_logs_per_second: AtomicUsize::new(max_logs_per_second),
            window_duration: Duration::from_secs(1),
            state: Mutex::new(RateWindows {
                timestamps: Default::default(),
                dropped: [0; CATEGORY_COUNT],
                last_drop_report: [None; CATEGORY_COUNT],
            }),
        }
    }

    fn set_max_logs_per_second(&self, max: usize) {
        self.max_logs_per_second.store(max, Ordering::Relaxed);
    }

    fn max_logs_per_second(&self) -> usize {
        self.max_logs_per_second.load(Ordering::Relaxed)
    }

    /// Returns (allowed, dropped_count); dropped_count is Some(n) when drops should be reported
    fn should_allow(&self, category: LogCategory) -> (bool, Option<usize>) {
        let now = Instant::now();
        let idx = category.index();
        let mut state = lock_recover(&self.state);

        let window = &mut state.timestamps[idx];
        while let Some(&front) = window.front() {
            if now.duration_since(front) > self.window_duration {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.max_logs_per_second() {
            window.push_back(now);
            let dropped = state.dropped[idx];
            if dropped > 0 {
                state.dropped[idx] = 0;
                state.last_drop_report[idx] = Some(now);
                return (true, Some(dropped));
            }
            return (true, None);
        }

        state.dropped[idx] += 1;
        let should_report = match state.last_drop_report[idx] {
            None => true,
            Some(last) => now.duration_since(last) >= Duration::from_secs(1),
        };
        if should_report {
            let dropped = state.dropped[idx];
            state.dropped[idx] = 0;
            state.last_drop_report[idx] = Some(now);
            (false, Some(dropped))
        } else {
            (false, None)
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    global_level: AtomicU8,
    category_levels: [AtomicU8; CATEGORY_COUNT],
    log_sender: Mutex<Option<Sender<String>>>,
    file_logging_enabled: AtomicBool,
    rate_limiter: RateLimiter,
    epoch: Instant,
}

impl LogConfig {
    /// All logging disabled, 60 messages per second per category
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
            log_sender: Mutex::new(None),
            file_logging_enabled: AtomicBool::new(false),
            rate_limiter: RateLimiter::new(60),
            epoch: Instant::now(),
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category level other than Off overrides the global level
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    /// Set the maximum logs per second per category
    pub fn set_rate_limit(&self, max_logs_per_second: usize) {
        self.rate_limiter
            .set_max_logs_per_second(max_logs_per_second);
    }

    pub fn get_rate_limit(&self) -> usize {
        self.rate_limiter.max_logs_per_second()
    }

    /// Route output to `path`, appending.
    ///
    /// Writes happen on a `log-writer` thread so the render thread never blocks on disk I/O.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = channel::<String>();

        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                let mut file = file;
                while let Ok(message) = receiver.recv() {
                    let _ = writeln!(file, "{}", message);
                    let _ = file.flush();
                }
                let _ = file.flush();
            })?;

        *lock_recover(&self.log_sender) = Some(sender);
        self.file_logging_enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop logging to file; the writer thread exits once the sender is dropped
    pub fn clear_log_file(&self) {
        *lock_recover(&self.log_sender) = None;
        self.file_logging_enabled.store(false, Ordering::Relaxed);
    }

    /// Prefix with seconds since startup and the calling thread's name
    fn stamp(&self, category: LogCategory, label: &str, message: &str) -> String {
        let current = thread::current();
        format!(
            "{:>9.3} {:<14} [{:?}] {}: {}",
            self.epoch.elapsed().as_secs_f64(),
            current.name().unwrap_or("unnamed"),
            category,
            label,
            message
        )
    }

    fn write_message(&self, message: &str) {
        if self.file_logging_enabled.load(Ordering::Relaxed) {
            let log_sender = lock_recover(&self.log_sender);
            match log_sender.as_ref() {
                Some(sender) if sender.send(message.to_string()).is_ok() => {}
                _ => eprintln!("{}", message),
            }
        } else {
            eprintln!("{}", message);
        }
    }
}

/// Log a message with the specified category and level
///
/// The closure only runs when the category/level is enabled and the rate limiter lets the
/// message through. When messages were dropped, a summary line is emitted first.
///
/// ```rust
/// use present_core::logging::{log, LogCategory, LogLevel};
///
/// log(LogCategory::Pacing, LogLevel::Trace, || {
///     format!("sleep estimate {:.3} ms", 12.5)
/// });
/// ```
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if !config.should_log(category, level) {
        return;
    }

    let (allowed, dropped_count) = config.rate_limiter.should_allow(category);
    if let Some(count) = dropped_count.filter(|&count| count > 0) {
        config.write_message(&config.stamp(
            category,
            "Warn",
            &format!("rate limit hit, {} message(s) dropped", count),
        ));
    }

    if allowed {
        let message = message_fn();
        config.write_message(&config.stamp(category, &format!("{:?}", level), &message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::from_str("ERR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("3"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("loud"), None);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(LogCategory::from_str("pacing"), Some(LogCategory::Pacing));
        assert_eq!(LogCategory::from_str("FALLBACK"), Some(LogCategory::Fallback));
        assert_eq!(LogCategory::from_str("cpu"), None);
    }

    #[test]
    fn test_should_log_with_category_level() {
        let config = LogConfig::new();
        config.set_level(LogCategory::Backend, LogLevel::Info);

        assert!(config.should_log(LogCategory::Backend, LogLevel::Error));
        assert!(config.should_log(LogCategory::Backend, LogLevel::Info));
        assert!(!config.should_log(LogCategory::Backend, LogLevel::Debug));
        assert!(!config.should_log(LogCategory::Pacing, LogLevel::Error));
    }

    #[test]
    fn test_category_level_overrides_global() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Error);
        config.set_level(LogCategory::Pacing, LogLevel::Trace);

        assert!(config.should_log(LogCategory::Pacing, LogLevel::Trace));
        assert!(!config.should_log(LogCategory::Render, LogLevel::Warn));
        assert!(config.should_log(LogCategory::Render, LogLevel::Error));
    }

    #[test]
    fn test_off_is_never_logged() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Trace);
        assert!(!config.should_log(LogCategory::Render, LogLevel::Off));
    }

    #[test]
    fn test_reset() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Trace);
        config.set_level(LogCategory::Geometry, LogLevel::Debug);
        config.reset();
        assert_eq!(config.get_global_level(), LogLevel::Off);
        assert_eq!(config.get_level(LogCategory::Geometry), LogLevel::Off);
    }

    #[test]
    fn test_stamp_names_thread_and_category() {
        let config = LogConfig::new();
        let line = thread::Builder::new()
            .name("present-render".to_string())
            .spawn(move || config.stamp(LogCategory::Pacing, "Trace", "sleep 4.000 ms"))
            .unwrap()
            .join()
            .unwrap();
        assert!(line.contains("present-render"));
        assert!(line.ends_with("[Pacing] Trace: sleep 4.000 ms"));
    }

    #[test]
    fn test_rate_limiter_per_category() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.should_allow(LogCategory::Backend).0);
        }
        assert!(!limiter.should_allow(LogCategory::Backend).0);
        assert!(limiter.should_allow(LogCategory::Fallback).0);
    }

    #[test]
    fn test_rate_limiter_reports_first_drop() {
        let limiter = RateLimiter::new(1);
        assert_eq!(limiter.should_allow(LogCategory::Render), (true, None));
        assert_eq!(limiter.should_allow(LogCategory::Render), (false, Some(1)));
        assert_eq!(limiter.should_allow(LogCategory::Render), (false, None));
    }
}
