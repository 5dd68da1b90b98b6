use crate::window_backend::{string_to_key, Key};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyMapping {
    pub quit: String,
    pub toggle_fps: String,
    pub faster: String,
    pub slower: String,
    pub switch_backend: String,
}

impl Default for HotkeyMapping {
    fn default() -> Self {
        Self {
            quit: "Escape".to_string(),
            toggle_fps: "F2".to_string(),
            faster: "Equal".to_string(),
            slower: "Minus".to_string(),
            switch_backend: "F5".to_string(),
        }
    }
}

/// Resolved hotkeys; unknown key names disable the action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hotkeys {
    pub quit: Option<Key>,
    pub toggle_fps: Option<Key>,
    pub faster: Option<Key>,
    pub slower: Option<Key>,
    pub switch_backend: Option<Key>,
}

impl HotkeyMapping {
    pub fn resolve(&self) -> Hotkeys {
        let key = |name: &str| {
            let key = string_to_key(name);
            if key.is_none() {
                log::warn!("Unknown hotkey '{}', action disabled", name);
            }
            key
        };
        Hotkeys {
            quit: key(&self.quit),
            toggle_fps: key(&self.toggle_fps),
            faster: key(&self.faster),
            slower: key(&self.slower),
            switch_backend: key(&self.switch_backend),
        }
    }
}

impl Default for Hotkeys {
    fn default() -> Self {
        HotkeyMapping::default().resolve()
    }
}

/// Window-side settings; presentation settings live in `present.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuiSettings {
    pub hotkeys: HotkeyMapping,
    pub window_width: usize,
    pub window_height: usize,
    /// Primary surface created for the demo producer
    pub surface_width: u32,
    pub surface_height: u32,
    /// Frames buffered between the render thread and the window
    pub frame_queue: usize,
}

impl Default for GuiSettings {
    fn default() -> Self {
        Self {
            hotkeys: HotkeyMapping::default(),
            window_width: 640,
            window_height: 480,
            surface_width: 640,
            surface_height: 480,
            frame_queue: 2,
        }
    }
}

impl GuiSettings {
    /// Get the settings file path relative to the executable
    pub fn config_path() -> PathBuf {
        let mut path = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("ddpresent.json");
        path
    }

    /// Load settings from ddpresent.json, falling back to defaults on error
    pub fn load() -> Self {
        let path = Self::config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            // Missing file
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path();
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        Ok(())
    }
}
