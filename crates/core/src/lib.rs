//! Core presentation pipeline primitives.
//!
//! A legacy 2D surface (16-bit RGB565, fixed pitch) is written by a producer thread and
//! re-presented by a dedicated render thread through either a software blit backend or a
//! GPU texture backend, paced to a target frame rate.

pub mod backend;
pub mod clock;
pub mod config;
pub mod fallback;
pub mod framebuffer;
pub mod geometry;
pub mod logging;
pub mod overlay;
pub mod pacing;
pub mod render_loop;
pub mod session;

pub mod types {
    use serde::{Deserialize, Serialize};

    /// Width/height pair in pixels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Size {
        pub width: u32,
        pub height: u32,
    }

    impl Size {
        pub const fn new(width: u32, height: u32) -> Self {
            Self { width, height }
        }

        pub fn is_empty(&self) -> bool {
            self.width == 0 || self.height == 0
        }

        /// Number of pixels covered by this size
        pub fn area(&self) -> usize {
            self.width as usize * self.height as usize
        }

        /// Per-axis maximum of two sizes
        pub fn max(self, other: Size) -> Size {
            Size::new(self.width.max(other.width), self.height.max(other.height))
        }

        /// Per-axis minimum of two sizes
        pub fn min(self, other: Size) -> Size {
            Size::new(self.width.min(other.width), self.height.min(other.height))
        }
    }

    /// Axis-aligned pixel rectangle with a top-left origin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Rect {
        pub x: u32,
        pub y: u32,
        pub width: u32,
        pub height: u32,
    }

    impl Rect {
        pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
            Self {
                x,
                y,
                width,
                height,
            }
        }

        /// Rectangle covering a whole surface of the given size
        pub const fn from_size(size: Size) -> Self {
            Self::new(0, 0, size.width, size.height)
        }

        /// Exclusive right edge, saturating at `u32::MAX`
        pub fn right(&self) -> u32 {
            self.x.saturating_add(self.width)
        }

        /// Exclusive bottom edge, saturating at `u32::MAX`
        pub fn bottom(&self) -> u32 {
            self.y.saturating_add(self.height)
        }

        pub fn is_empty(&self) -> bool {
            self.width == 0 || self.height == 0
        }

        pub fn size(&self) -> Size {
            Size::new(self.width, self.height)
        }

        /// Smallest rectangle containing both rectangles
        pub fn union(&self, other: &Rect) -> Rect {
            if self.is_empty() {
                return *other;
            }
            if other.is_empty() {
                return *self;
            }
            let x = self.x.min(other.x);
            let y = self.y.min(other.y);
            let right = self.right().max(other.right());
            let bottom = self.bottom().max(other.bottom());
            Rect::new(x, y, right - x, bottom - y)
        }

        /// Intersection with the `[0, bounds)` area, `None` when nothing is left
        pub fn clamp_to(&self, bounds: Size) -> Option<Rect> {
            let x = self.x.min(bounds.width);
            let y = self.y.min(bounds.height);
            let right = self.right().min(bounds.width);
            let bottom = self.bottom().min(bounds.height);
            let clamped = Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y));
            (!clamped.is_empty()).then_some(clamped)
        }

        /// Whether this rectangle lies entirely inside `[0, bounds)`
        pub fn fits_within(&self, bounds: Size) -> bool {
            let right = self.x.checked_add(self.width);
            let bottom = self.y.checked_add(self.height);
            matches!((right, bottom), (Some(r), Some(b)) if r <= bounds.width && b <= bounds.height)
        }
    }
}
