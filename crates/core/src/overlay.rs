//! On-screen text: the diagnostic string and the fallback warning.
//!
//! Text is drawn with an 8x8 bitmap font straight into a pixel buffer, either the
//! software backend's 32-bit target or a 16-bit band uploaded by the GPU backend.

use crate::types::Size;

pub const FONT_WIDTH: usize = 8;
pub const FONT_HEIGHT: usize = 8;
/// Vertical distance between text baselines
pub const LINE_HEIGHT: usize = 10;

/// Shown while the fallback warning is armed.
pub const WARNING_TEXT: &str =
    "-WARNING- Using slow software rendering, please update your graphics card driver";

/// Text and background colors used by both backends
pub const TEXT_ARGB: u32 = 0xFFFF_FFFF;
pub const BACKGROUND_ARGB: u32 = 0xFF00_0000;
pub const TEXT_RGB565: u16 = 0xFFFF;
pub const BACKGROUND_RGB565: u16 = 0x0000;

fn glyph(c: char) -> [u8; 8] {
    match c {
        ' ' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        '!' => [0x18, 0x18, 0x18, 0x18, 0x00, 0x00, 0x18, 0x00],
        '(' => [0x0C, 0x18, 0x30, 0x30, 0x30, 0x18, 0x0C, 0x00],
        ')' => [0x30, 0x18, 0x0C, 0x0C, 0x0C, 0x18, 0x30, 0x00],
        '+' => [0x00, 0x18, 0x18, 0x7E, 0x18, 0x18, 0x00, 0x00],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x30],
        '-' => [0x00, 0x00, 0x00, 0x7E, 0x00, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00],
        '/' => [0x00, 0x03, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x00],
        '0' => [0x3C, 0x66, 0x6E, 0x7E, 0x76, 0x66, 0x3C, 0x00],
        '1' => [0x18, 0x38, 0x18, 0x18, 0x18, 0x18, 0x7E, 0x00],
        '2' => [0x3C, 0x66, 0x06, 0x0C, 0x18, 0x30, 0x7E, 0x00],
        '3' => [0x3C, 0x66, 0x06, 0x1C, 0x06, 0x66, 0x3C, 0x00],
        '4' => [0x0C, 0x1C, 0x3C, 0x6C, 0x7E, 0x0C, 0x0C, 0x00],
        '5' => [0x7E, 0x60, 0x7C, 0x06, 0x06, 0x66, 0x3C, 0x00],
        '6' => [0x1C, 0x30, 0x60, 0x7C, 0x66, 0x66, 0x3C, 0x00],
        '7' => [0x7E, 0x06, 0x0C, 0x18, 0x30, 0x30, 0x30, 0x00],
        '8' => [0x3C, 0x66, 0x66, 0x3C, 0x66, 0x66, 0x3C, 0x00],
        '9' => [0x3C, 0x66, 0x66, 0x3E, 0x06, 0x0C, 0x38, 0x00],
        ':' => [0x00, 0x18, 0x18, 0x00, 0x00, 0x18, 0x18, 0x00],
        '<' => [0x06, 0x0C, 0x18, 0x30, 0x18, 0x0C, 0x06, 0x00],
        '=' => [0x00, 0x00, 0x7E, 0x00, 0x7E, 0x00, 0x00, 0x00],
        '>' => [0x60, 0x30, 0x18, 0x0C, 0x18, 0x30, 0x60, 0x00],
        'A' => [0x3C, 0x66, 0x66, 0x7E, 0x66, 0x66, 0x66, 0x00],
        'B' => [0x7C, 0x66, 0x66, 0x7C, 0x66, 0x66, 0x7C, 0x00],
        'C' => [0x3C, 0x66, 0x60, 0x60, 0x60, 0x66, 0x3C, 0x00],
        'D' => [0x78, 0x6C, 0x66, 0x66, 0x66, 0x6C, 0x78, 0x00],
        'E' => [0x7E, 0x60, 0x60, 0x7C, 0x60, 0x60, 0x7E, 0x00],
        'F' => [0x7E, 0x60, 0x60, 0x7C, 0x60, 0x60, 0x60, 0x00],
        'G' => [0x3C, 0x66, 0x60, 0x6E, 0x66, 0x66, 0x3C, 0x00],
        'H' => [0x66, 0x66, 0x66, 0x7E, 0x66, 0x66, 0x66, 0x00],
        'I' => [0x7E, 0x18, 0x18, 0x18, 0x18, 0x18, 0x7E, 0x00],
        'J' => [0x3E, 0x0C, 0x0C, 0x0C, 0x0C, 0x6C, 0x38, 0x00],
        'K' => [0x66, 0x6C, 0x78, 0x70, 0x78, 0x6C, 0x66, 0x00],
        'L' => [0x60, 0x60, 0x60, 0x60, 0x60, 0x60, 0x7E, 0x00],
        'M' => [0x63, 0x77, 0x7F, 0x6B, 0x63, 0x63, 0x63, 0x00],
        'N' => [0x66, 0x76, 0x7E, 0x6E, 0x66, 0x66, 0x66, 0x00],
        'O' => [0x3C, 0x66, 0x66, 0x66, 0x66, 0x66, 0x3C, 0x00],
        'P' => [0x7C, 0x66, 0x66, 0x7C, 0x60, 0x60, 0x60, 0x00],
        'Q' => [0x3C, 0x66, 0x66, 0x66, 0x6A, 0x6C, 0x36, 0x00],
        'R' => [0x7C, 0x66, 0x66, 0x7C, 0x6C, 0x66, 0x66, 0x00],
        'S' => [0x3C, 0x66, 0x60, 0x3C, 0x06, 0x66, 0x3C, 0x00],
        'T' => [0x7E, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x00],
        'U' => [0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x3C, 0x00],
        'V' => [0x66, 0x66, 0x66, 0x66, 0x66, 0x3C, 0x18, 0x00],
        'W' => [0x63, 0x63, 0x63, 0x6B, 0x7F, 0x77, 0x63, 0x00],
        'X' => [0x66, 0x66, 0x3C, 0x18, 0x3C, 0x66, 0x66, 0x00],
        'Y' => [0x66, 0x66, 0x66, 0x3C, 0x18, 0x18, 0x18, 0x00],
        'Z' => [0x7E, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x7E, 0x00],
        'a' => [0x00, 0x00, 0x3C, 0x06, 0x3E, 0x66, 0x3E, 0x00],
        'b' => [0x60, 0x60, 0x7C, 0x66, 0x66, 0x66, 0x7C, 0x00],
        'c' => [0x00, 0x00, 0x3C, 0x66, 0x60, 0x66, 0x3C, 0x00],
        'd' => [0x06, 0x06, 0x3E, 0x66, 0x66, 0x66, 0x3E, 0x00],
        'e' => [0x00, 0x00, 0x3C, 0x66, 0x7E, 0x60, 0x3C, 0x00],
        'f' => [0x1C, 0x30, 0x30, 0x7C, 0x30, 0x30, 0x30, 0x00],
        'g' => [0x00, 0x00, 0x3E, 0x66, 0x66, 0x3E, 0x06, 0x3C],
        'h' => [0x60, 0x60, 0x7C, 0x66, 0x66, 0x66, 0x66, 0x00],
        'i' => [0x18, 0x00, 0x38, 0x18, 0x18, 0x18, 0x3C, 0x00],
        'j' => [0x0C, 0x00, 0x1C, 0x0C, 0x0C, 0x0C, 0x6C, 0x38],
        'k' => [0x60, 0x60, 0x66, 0x6C, 0x78, 0x6C, 0x66, 0x00],
        'l' => [0x38, 0x18, 0x18, 0x18, 0x18, 0x18, 0x3C, 0x00],
        'm' => [0x00, 0x00, 0x66, 0x7F, 0x6B, 0x6B, 0x63, 0x00],
        'n' => [0x00, 0x00, 0x7C, 0x66, 0x66, 0x66, 0x66, 0x00],
        'o' => [0x00, 0x00, 0x3C, 0x66, 0x66, 0x66, 0x3C, 0x00],
        'p' => [0x00, 0x00, 0x7C, 0x66, 0x66, 0x7C, 0x60, 0x60],
        'q' => [0x00, 0x00, 0x3E, 0x66, 0x66, 0x3E, 0x06, 0x06],
        'r' => [0x00, 0x00, 0x6C, 0x76, 0x60, 0x60, 0x60, 0x00],
        's' => [0x00, 0x00, 0x3E, 0x60, 0x3C, 0x06, 0x7C, 0x00],
        't' => [0x30, 0x30, 0x7C, 0x30, 0x30, 0x30, 0x1C, 0x00],
        'u' => [0x00, 0x00, 0x66, 0x66, 0x66, 0x66, 0x3E, 0x00],
        'v' => [0x00, 0x00, 0x66, 0x66, 0x66, 0x3C, 0x18, 0x00],
        'w' => [0x00, 0x00, 0x63, 0x6B, 0x6B, 0x7F, 0x36, 0x00],
        'x' => [0x00, 0x00, 0x66, 0x3C, 0x18, 0x3C, 0x66, 0x00],
        'y' => [0x00, 0x00, 0x66, 0x66, 0x66, 0x3E, 0x06, 0x3C],
        'z' => [0x00, 0x00, 0x7E, 0x0C, 0x18, 0x30, 0x7E, 0x00],
        _ => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    }
}

/// Mutable view of a pixel buffer that text can be drawn into.
pub struct TextCanvas<'a, P> {
    pub buffer: &'a mut [P],
    pub width: usize,
    pub height: usize,
    /// Row stride in pixels
    pub stride: usize,
}

impl<'a, P: Copy> TextCanvas<'a, P> {
    pub fn new(buffer: &'a mut [P], width: usize, height: usize, stride: usize) -> Self {
        Self {
            buffer,
            width,
            height,
            stride,
        }
    }

    fn put(&mut self, x: usize, y: usize, color: P) {
        if x >= self.width || y >= self.height {
            return;
        }
        if let Some(px) = self.buffer.get_mut(y * self.stride + x) {
            *px = color;
        }
    }

    /// Draw `text` starting at (`x`, `y`); `\n` starts a new line.
    ///
    /// With a background color every glyph cell is filled first so the text stays
    /// readable over any image.
    pub fn draw_text(&mut self, text: &str, x: usize, y: usize, color: P, background: Option<P>) {
        for (line_no, line) in text.lines().enumerate() {
            let line_y = y + line_no * LINE_HEIGHT;
            if line_y >= self.height {
                break;
            }
            let mut cursor_x = x;
            for c in line.chars() {
                if cursor_x >= self.width {
                    break;
                }
                let bitmap = glyph(c);
                for (row, &bits) in bitmap.iter().enumerate() {
                    for col in 0..FONT_WIDTH {
                        if (bits >> (7 - col)) & 1 == 1 {
                            self.put(cursor_x + col, line_y + row, color);
                        } else if let Some(bg) = background {
                            self.put(cursor_x + col, line_y + row, bg);
                        }
                    }
                }
                cursor_x += FONT_WIDTH;
            }
        }
    }
}

/// Pixel extent of `text` when drawn with [`TextCanvas::draw_text`]
pub fn text_size(text: &str) -> Size {
    let lines = text.lines().count();
    if lines == 0 {
        return Size::default();
    }
    let widest = text.lines().map(|l| l.chars().count()).max().unwrap_or(0);
    Size::new(
        (widest * FONT_WIDTH) as u32,
        ((lines - 1) * LINE_HEIGHT + FONT_HEIGHT) as u32,
    )
}

/// Per-frame diagnostic string shown by the FPS overlay
pub fn diagnostic_text(label: &str, fps: f64, target_fps: f64, render_ms: f64) -> String {
    format!(
        "{}\nFPS: {:3.0}\nTGT: {:3.0}\nRender Time: {:2.3} ms",
        label, fps, target_fps, render_ms
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_format() {
        let text = diagnostic_text("GPU2", 59.6, 60.0, 1.23456);
        assert_eq!(text, "GPU2\nFPS:  60\nTGT:  60\nRender Time: 1.235 ms");
    }

    #[test]
    fn test_text_size() {
        assert_eq!(text_size(""), Size::new(0, 0));
        assert_eq!(text_size("FPS"), Size::new(24, 8));
        assert_eq!(text_size("ab\nabcd"), Size::new(32, 18));
    }

    #[test]
    fn test_draw_text_u32() {
        let mut buffer = vec![0u32; 16 * 8];
        let mut canvas = TextCanvas::new(&mut buffer, 16, 8, 16);
        canvas.draw_text("1", 0, 0, 0xFFFF_FFFF, None);
        // Top row of '1' is 0x18: columns 3 and 4
        assert_eq!(&buffer[0..8], &[0, 0, 0, 0xFFFF_FFFF, 0xFFFF_FFFF, 0, 0, 0]);
    }

    #[test]
    fn test_draw_text_background_and_clip() {
        let mut buffer = vec![0x1234u16; 12 * 4];
        let mut canvas = TextCanvas::new(&mut buffer, 10, 4, 12);
        canvas.draw_text(" ", 4, 0, 0xFFFF, Some(0));
        // Background fills up to the clip width, padding columns untouched
        assert!(buffer[4..10].iter().all(|&p| p == 0));
        assert_eq!(buffer[10], 0x1234);
        assert_eq!(buffer[3], 0x1234);
    }

    #[test]
    fn test_multiline() {
        let mut buffer = vec![0u16; 8 * 20];
        let mut canvas = TextCanvas::new(&mut buffer, 8, 20, 8);
        canvas.draw_text("-\n-", 0, 0, 1, None);
        // '-' lights row 3 of each glyph
        assert_eq!(buffer[3 * 8 + 1], 1);
        assert_eq!(buffer[(LINE_HEIGHT + 3) * 8 + 1], 1);
        assert_eq!(buffer[8 + 1], 0);
    }
}
