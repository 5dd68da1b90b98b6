//! Shared 16-bit primary surface written by the producer and read by the render thread.
//!
//! One mutex guards the pixels. The producer holds it between `lock` and `unlock`; the
//! render thread holds it only while compositing, never across a present.

use crate::logging::{log, LogCategory, LogLevel};
use crate::types::{Rect, Size};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Bits per pixel of the primary surface.
pub const SURFACE_BPP: u32 = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("Surface has zero size ({0}x{1})")]
    ZeroSize(u32, u32),
    #[error("Pitch of {pitch} bytes cannot hold {width} 16-bit pixels")]
    InvalidPitch { pitch: u32, width: u32 },
    #[error("Unsupported color depth: {0} bpp")]
    UnsupportedDepth(u32),
    #[error("Display mode {0}x{1} does not fit the primary surface")]
    ModeTooLarge(u32, u32),
    #[error("Lock region {0:?} is outside the surface")]
    RegionOutOfBounds(Rect),
}

/// Fixed shape of a primary surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes
    pub pitch: u32,
}

impl SurfaceDesc {
    pub fn new(width: u32, height: u32, pitch: u32) -> Result<Self, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::ZeroSize(width, height));
        }
        if pitch % 2 != 0 || u64::from(pitch) < u64::from(width) * 2 {
            return Err(SurfaceError::InvalidPitch { pitch, width });
        }
        Ok(Self {
            width,
            height,
            pitch,
        })
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Row stride in pixels
    pub fn pitch_pixels(&self) -> usize {
        (self.pitch / 2) as usize
    }

    /// Pixels per region including row padding
    pub fn len(&self) -> usize {
        self.pitch_pixels() * self.height as usize
    }
}

/// Region the producer should write into next.
///
/// `depth` is the number of ring regions (1 when no transfer ring is in use).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritableRegion {
    pub index: usize,
    pub depth: usize,
}

impl WritableRegion {
    pub const SINGLE: WritableRegion = WritableRegion { index: 0, depth: 1 };
}

struct FramebufferState {
    regions: Vec<Vec<u16>>,
    active: usize,
    dirty: Option<Rect>,
    display: Size,
    mode_changed: bool,
}

/// Handle to the primary surface; clones share the same pixels.
#[derive(Clone)]
pub struct SharedFramebuffer {
    desc: SurfaceDesc,
    state: Arc<Mutex<FramebufferState>>,
}

impl SharedFramebuffer {
    pub fn new(desc: SurfaceDesc) -> Self {
        let display = desc.size();
        Self {
            desc,
            state: Arc::new(Mutex::new(FramebufferState {
                regions: vec![vec![0; desc.len()]],
                active: 0,
                dirty: Some(Rect::from_size(display)),
                display,
                mode_changed: false,
            })),
        }
    }

    pub fn desc(&self) -> SurfaceDesc {
        self.desc
    }

    fn guard(&self) -> MutexGuard<'_, FramebufferState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock a region (or the whole surface) for writing.
    ///
    /// The region is recorded as dirty when the returned guard is dropped.
    pub fn lock(&self, region: Option<Rect>) -> Result<FramebufferLock<'_>, SurfaceError> {
        let region = region.unwrap_or_else(|| Rect::from_size(self.desc.size()));
        if !region.fits_within(self.desc.size()) {
            return Err(SurfaceError::RegionOutOfBounds(region));
        }
        Ok(FramebufferLock {
            guard: self.guard(),
            desc: self.desc,
            region,
        })
    }

    /// Restrict the visible area to `width`x`height` at the top-left of the surface.
    pub fn set_display_mode(&self, width: u32, height: u32, bpp: u32) -> Result<(), SurfaceError> {
        if bpp != SURFACE_BPP {
            return Err(SurfaceError::UnsupportedDepth(bpp));
        }
        if width == 0 || height == 0 {
            return Err(SurfaceError::ZeroSize(width, height));
        }
        if width > self.desc.width || height > self.desc.height {
            return Err(SurfaceError::ModeTooLarge(width, height));
        }
        let mut state = self.guard();
        state.display = Size::new(width, height);
        state.dirty = Some(Rect::new(0, 0, width, height));
        state.mode_changed = true;
        log(LogCategory::Surface, LogLevel::Info, || {
            format!("Display mode set to {}x{}x{}", width, height, bpp)
        });
        Ok(())
    }

    pub fn display_size(&self) -> Size {
        self.guard().display
    }

    /// Exclusive read access for the render thread
    pub fn access(&self) -> FrameAccess<'_> {
        FrameAccess {
            guard: self.guard(),
            desc: self.desc,
        }
    }
}

/// Producer write guard returned by [`SharedFramebuffer::lock`].
pub struct FramebufferLock<'a> {
    guard: MutexGuard<'a, FramebufferState>,
    desc: SurfaceDesc,
    region: Rect,
}

impl FramebufferLock<'_> {
    pub fn region(&self) -> Rect {
        self.region
    }

    pub fn pitch_pixels(&self) -> usize {
        self.desc.pitch_pixels()
    }

    /// Whole active region, rows `pitch_pixels` apart
    pub fn pixels_mut(&mut self) -> &mut [u16] {
        let active = self.guard.active;
        &mut self.guard.regions[active]
    }

    /// One row of the surface, `width` pixels long
    pub fn row_mut(&mut self, y: u32) -> &mut [u16] {
        let pitch = self.desc.pitch_pixels();
        let width = self.desc.width as usize;
        let start = y as usize * pitch;
        &mut self.pixels_mut()[start..start + width]
    }

    /// Fill a rectangle clamped to the surface
    pub fn fill_rect(&mut self, rect: Rect, color: u16) {
        let Some(rect) = rect.clamp_to(self.desc.size()) else {
            return;
        };
        for y in rect.y..rect.bottom() {
            self.row_mut(y)[rect.x as usize..rect.right() as usize].fill(color);
        }
    }

    /// Copy rows from `src` (stride `src_pitch` pixels) to the top-left of the locked region
    pub fn copy_from(&mut self, src: &[u16], src_pitch: usize) {
        let region = self.region;
        for (row, y) in (region.y..region.bottom()).enumerate() {
            let from = row * src_pitch;
            if from >= src.len() {
                break;
            }
            let count = (region.width as usize).min(src.len() - from);
            let dst = &mut self.row_mut(y)[region.x as usize..region.x as usize + count];
            dst.copy_from_slice(&src[from..from + count]);
        }
    }

    pub fn unlock(self) {}
}

impl Drop for FramebufferLock<'_> {
    fn drop(&mut self) {
        let region = self.region;
        self.guard.dirty = Some(match self.guard.dirty {
            Some(dirty) => dirty.union(&region),
            None => region,
        });
    }
}

/// Render thread view of the surface while compositing.
pub struct FrameAccess<'a> {
    guard: MutexGuard<'a, FramebufferState>,
    desc: SurfaceDesc,
}

impl FrameAccess<'_> {
    pub fn desc(&self) -> SurfaceDesc {
        self.desc
    }

    pub fn pitch_pixels(&self) -> usize {
        self.desc.pitch_pixels()
    }

    /// Active region pixels, rows `pitch_pixels` apart
    pub fn pixels(&self) -> &[u16] {
        &self.guard.regions[self.guard.active]
    }

    pub fn display_size(&self) -> Size {
        self.guard.display
    }

    pub fn active_region(&self) -> WritableRegion {
        WritableRegion {
            index: self.guard.active,
            depth: self.guard.regions.len(),
        }
    }

    /// Area written since the last call, clamped to the display area
    pub fn take_dirty(&mut self) -> Option<Rect> {
        let display = self.guard.display;
        self.guard
            .dirty
            .take()
            .and_then(|dirty| dirty.clamp_to(display))
    }

    pub fn mark_all_dirty(&mut self) {
        self.guard.dirty = Some(Rect::from_size(self.guard.display));
    }

    /// New display size when the mode changed since the last call
    pub fn take_mode_change(&mut self) -> Option<Size> {
        std::mem::take(&mut self.guard.mode_changed).then_some(self.guard.display)
    }

    /// Make `region` the active one, resizing the ring to `region.depth`.
    ///
    /// The newly active region is seeded with the current image so the producer continues
    /// from the last presented frame.
    pub fn select(&mut self, region: WritableRegion) {
        let depth = region.depth.max(1);
        let index = region.index % depth;
        let state = &mut *self.guard;

        if state.regions.len() != depth {
            let current = std::mem::take(&mut state.regions[state.active]);
            state.regions = vec![current; depth];
            state.active = index;
            return;
        }

        if index != state.active {
            let (src, dst) = (state.active, index);
            let (low, high) = state.regions.split_at_mut(src.max(dst));
            if src < dst {
                high[0].copy_from_slice(&low[src]);
            } else {
                low[dst].copy_from_slice(&high[0]);
            }
            state.active = index;
        }
    }
}

/// Expand an RGB565 pixel to 0RGB8888
#[inline]
pub fn rgb565_to_argb(pixel: u16) -> u32 {
    let r = ((pixel >> 11) & 0x1F) as u32;
    let g = ((pixel >> 5) & 0x3F) as u32;
    let b = (pixel & 0x1F) as u32;
    let r = (r << 3) | (r >> 2);
    let g = (g << 2) | (g >> 4);
    let b = (b << 3) | (b >> 2);
    0xFF00_0000 | (r << 16) | (g << 8) | b
}

/// Pack 8-bit channels into RGB565
#[inline]
pub const fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}
