//! Presentation settings loaded at session start, plus the few values tuned live.

use crate::geometry::{ScalingMode, ScalingPolicy};
use crate::logging::{log, LogCategory, LogLevel};
use crate::types::Size;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const CONFIG_FILE: &str = "present.json";

/// Rate change applied by the speed hotkeys
pub const FPS_STEP: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentConfig {
    pub target_fps: f64,
    /// 0 = present immediately, 1 or more = wait for vsync
    pub swap_interval: u32,
    pub scaling: ScalingMode,
    pub stretch_to: Option<Size>,
    /// Transfer buffers in the upload ring, 0 disables the ring
    pub ring_depth: usize,
    pub convert_on_gpu: bool,
    pub auto_fallback: bool,
    pub prefer_gpu: bool,
    pub texture_pair: bool,
    pub gl_finish: bool,
    pub show_fps: bool,
    pub background_fps: Option<f64>,
    pub fallback_fps: f64,
    pub warning_duration_ms: u64,
    pub use_display_refresh: bool,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            swap_interval: 0,
            scaling: ScalingMode::None,
            stretch_to: None,
            ring_depth: 0,
            convert_on_gpu: true,
            auto_fallback: true,
            prefer_gpu: true,
            texture_pair: true,
            gl_finish: false,
            show_fps: false,
            background_fps: Some(10.0),
            fallback_fps: 30.0,
            warning_duration_ms: 10_000,
            use_display_refresh: true,
        }
    }
}

impl PresentConfig {
    /// Config file next to the executable
    pub fn config_path() -> PathBuf {
        let mut path = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_FILE);
        path
    }

    /// Load from present.json, falling back to defaults on error
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log(LogCategory::Render, LogLevel::Warn, || {
                        format!("Failed to parse {}: {}. Using defaults.", path.display(), e)
                    });
                    Self::default()
                }
            },
            // Missing file means defaults
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn scaling_policy(&self) -> ScalingPolicy {
        ScalingPolicy::new(self.scaling, self.stretch_to)
    }

    pub fn vsync(&self) -> bool {
        self.swap_interval > 0
    }
}

/// Frame length in milliseconds for a rate in frames per second
pub fn frame_len(fps: f64) -> f64 {
    if fps > 0.0 {
        1000.0 / fps
    } else {
        0.0
    }
}

/// Values other threads may change while the render loop runs.
///
/// Writers store atomically; the loop reads one [`TunableSnapshot`] per frame.
#[derive(Debug)]
pub struct LiveTunables {
    target_fps: AtomicU64,
    show_fps: AtomicBool,
}

/// Immutable per-frame copy of [`LiveTunables`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunableSnapshot {
    pub target_fps: f64,
    pub show_fps: bool,
}

impl TunableSnapshot {
    pub fn target_frame_len(&self) -> f64 {
        frame_len(self.target_fps)
    }
}

impl LiveTunables {
    pub fn new(target_fps: f64, show_fps: bool) -> Self {
        Self {
            target_fps: AtomicU64::new(target_fps.to_bits()),
            show_fps: AtomicBool::new(show_fps),
        }
    }

    pub fn from_config(config: &PresentConfig) -> Self {
        Self::new(config.target_fps, config.show_fps)
    }

    pub fn target_fps(&self) -> f64 {
        f64::from_bits(self.target_fps.load(Ordering::Relaxed))
    }

    /// Non-positive or non-finite rates are ignored
    pub fn set_target_fps(&self, fps: f64) {
        if fps.is_finite() && fps > 0.0 {
            self.target_fps.store(fps.to_bits(), Ordering::Relaxed);
        }
    }

    /// Step the rate up, or down while it stays above one step
    pub fn adjust_target_fps(&self, delta: f64) -> f64 {
        let result = self
            .target_fps
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let fps = f64::from_bits(bits);
                if delta > 0.0 || (fps + delta > 0.0 && fps > FPS_STEP) {
                    Some((fps + delta).to_bits())
                } else {
                    None
                }
            });
        match result {
            Ok(previous) => f64::from_bits(previous) + delta,
            Err(current) => f64::from_bits(current),
        }
    }

    pub fn show_fps(&self) -> bool {
        self.show_fps.load(Ordering::Relaxed)
    }

    pub fn set_show_fps(&self, show: bool) {
        self.show_fps.store(show, Ordering::Relaxed);
    }

    /// Returns the new state
    pub fn toggle_show_fps(&self) -> bool {
        !self.show_fps.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TunableSnapshot {
        TunableSnapshot {
            target_fps: self.target_fps(),
            show_fps: self.show_fps(),
        }
    }
}
