//! Window backend abstraction
//!
//! The render thread never touches the window. Its software backend presents into a
//! [`ChannelSurface`]; the window thread drains the channel through a [`WindowPresenter`],
//! which also reports focus, size and hotkeys back to the session.

use std::error::Error;

mod channel;
mod minifb_backend;
mod presenter;

pub use channel::{channel_surface, ChannelSurface, PresentedFrame};
pub use minifb_backend::MinifbBackend;
pub use presenter::WindowPresenter;

/// Common key codes used across backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    // Function keys
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,

    // Rate keys
    Equal, Minus, NumPadPlus, NumPadMinus,

    // Special keys
    Escape, Enter, Space, Tab, Backspace,
}

/// Window backend trait
pub trait WindowBackend {
    /// Check if window is still open
    fn is_open(&self) -> bool;

    /// Check if a key was just pressed (no repeat)
    fn is_key_pressed(&self, key: Key) -> bool;

    /// Whether the window currently has input focus
    fn is_active(&mut self) -> bool;

    /// Update window with new frame buffer
    /// Buffer format: 0RGB (0x00RRGGBB)
    fn update_with_buffer(
        &mut self,
        buffer: &[u32],
        width: usize,
        height: usize,
    ) -> Result<(), Box<dyn Error>>;

    /// Process window events without a new frame
    fn update(&mut self);

    /// Get current client area size
    fn get_size(&self) -> (usize, usize);

    /// Bring the window back to the foreground after a backend swap
    fn reactivate(&mut self) {}

    /// Get the backend name (for debugging)
    fn name(&self) -> &str;
}

/// Convert a string key name to our unified Key enum
pub fn string_to_key(s: &str) -> Option<Key> {
    match s {
        "F1" => Some(Key::F1),
        "F2" => Some(Key::F2),
        "F3" => Some(Key::F3),
        "F4" => Some(Key::F4),
        "F5" => Some(Key::F5),
        "F6" => Some(Key::F6),
        "F7" => Some(Key::F7),
        "F8" => Some(Key::F8),
        "F9" => Some(Key::F9),
        "F10" => Some(Key::F10),
        "F11" => Some(Key::F11),
        "F12" => Some(Key::F12),
        "Equal" | "=" => Some(Key::Equal),
        "Minus" | "-" => Some(Key::Minus),
        "NumPadPlus" => Some(Key::NumPadPlus),
        "NumPadMinus" => Some(Key::NumPadMinus),
        "Escape" => Some(Key::Escape),
        "Enter" => Some(Key::Enter),
        "Space" => Some(Key::Space),
        "Tab" => Some(Key::Tab),
        "Backspace" => Some(Key::Backspace),
        _ => None,
    }
}
