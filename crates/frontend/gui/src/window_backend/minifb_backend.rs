//! minifb window

use super::{Key, WindowBackend};
use minifb::{KeyRepeat, ScaleMode, Window, WindowOptions};
use std::error::Error;

pub struct MinifbBackend {
    window: Window,
}

impl MinifbBackend {
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self, Box<dyn Error>> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: true,
                // Frames are already scaled to the client area by the backend
                scale_mode: ScaleMode::UpperLeft,
                ..WindowOptions::default()
            },
        )?;
        Ok(Self { window })
    }
}

fn to_minifb(key: Key) -> minifb::Key {
    match key {
        Key::F1 => minifb::Key::F1,
        Key::F2 => minifb::Key::F2,
        Key::F3 => minifb::Key::F3,
        Key::F4 => minifb::Key::F4,
        Key::F5 => minifb::Key::F5,
        Key::F6 => minifb::Key::F6,
        Key::F7 => minifb::Key::F7,
        Key::F8 => minifb::Key::F8,
        Key::F9 => minifb::Key::F9,
        Key::F10 => minifb::Key::F10,
        Key::F11 => minifb::Key::F11,
        Key::F12 => minifb::Key::F12,
        Key::Equal => minifb::Key::Equal,
        Key::Minus => minifb::Key::Minus,
        Key::NumPadPlus => minifb::Key::NumPadPlus,
        Key::NumPadMinus => minifb::Key::NumPadMinus,
        Key::Escape => minifb::Key::Escape,
        Key::Enter => minifb::Key::Enter,
        Key::Space => minifb::Key::Space,
        Key::Tab => minifb::Key::Tab,
        Key::Backspace => minifb::Key::Backspace,
    }
}

impl WindowBackend for MinifbBackend {
    fn is_open(&self) -> bool {
        self.window.is_open()
    }

    fn is_key_pressed(&self, key: Key) -> bool {
        self.window.is_key_pressed(to_minifb(key), KeyRepeat::No)
    }

    fn is_active(&mut self) -> bool {
        self.window.is_active()
    }

    fn update_with_buffer(
        &mut self,
        buffer: &[u32],
        width: usize,
        height: usize,
    ) -> Result<(), Box<dyn Error>> {
        self.window.update_with_buffer(buffer, width, height)?;
        Ok(())
    }

    fn update(&mut self) {
        self.window.update();
    }

    fn get_size(&self) -> (usize, usize) {
        self.window.get_size()
    }

    fn reactivate(&mut self) {
        // minifb cannot cycle activation; pumping events repaints and keeps input alive
        self.window.update();
    }

    fn name(&self) -> &str {
        "minifb"
    }
}
