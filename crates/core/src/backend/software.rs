//! CPU presentation path: RGB565 to 0RGB8888 blit, optionally stretched.

use super::{Backend, BackendError, BackendKind, Capabilities};
use crate::framebuffer::{rgb565_to_argb, FrameAccess, SurfaceDesc};
use crate::geometry::{Layout, Viewport};
use crate::logging::{log, LogCategory, LogLevel};
use crate::overlay::{TextCanvas, BACKGROUND_ARGB, TEXT_ARGB};
use crate::types::Size;

/// Window-side sink for finished 32-bit frames.
pub trait SoftwareSurface {
    /// Show `frame` (`size.width * size.height` pixels, 0RGB8888)
    fn present(&mut self, frame: &[u32], size: Size) -> Result<(), BackendError>;

    fn name(&self) -> &str;
}

/// Blit `size` pixels from an RGB565 source 1:1 into the top-left of `dst`
pub fn blit_rgb565(src: &[u16], src_pitch: usize, size: Size, dst: &mut [u32], dst_width: usize) {
    let width = (size.width as usize).min(dst_width);
    for (y, dst_row) in dst.chunks_mut(dst_width).take(size.height as usize).enumerate() {
        let src_row = &src[y * src_pitch..y * src_pitch + width];
        for (d, &s) in dst_row[..width].iter_mut().zip(src_row) {
            *d = rgb565_to_argb(s);
        }
    }
}

/// Nearest-neighbour stretch of a `src_size` RGB565 image into `viewport` of `dst`
pub fn stretch_blit(
    src: &[u16],
    src_pitch: usize,
    src_size: Size,
    dst: &mut [u32],
    dst_width: usize,
    viewport: &Viewport,
) {
    if src_size.is_empty() || viewport.width == 0 || viewport.height == 0 {
        return;
    }
    let vw = viewport.width as usize;
    let vh = viewport.height as usize;
    let sw = src_size.width as usize;
    let sh = src_size.height as usize;
    let x0 = viewport.x as usize;
    let y0 = viewport.y as usize;

    let columns: Vec<usize> = (0..vw).map(|x| x * sw / vw).collect();
    for y in 0..vh {
        let sy = y * sh / vh;
        let src_row = &src[sy * src_pitch..sy * src_pitch + sw];
        let start = (y0 + y) * dst_width + x0;
        let Some(dst_row) = dst.get_mut(start..start + vw) else {
            break;
        };
        for (d, &sx) in dst_row.iter_mut().zip(&columns) {
            *d = rgb565_to_argb(src_row[sx]);
        }
    }
}

/// Software presentation backend.
///
/// Also serves as the safety net the render loop falls back to, so its setup must not
/// depend on any GPU state.
pub struct SoftwareBackend {
    surface: Box<dyn SoftwareSurface>,
    target: Vec<u32>,
    target_size: Size,
    needs_clear: bool,
    initialized: bool,
}

impl SoftwareBackend {
    pub fn new(surface: Box<dyn SoftwareSurface>) -> Self {
        Self {
            surface,
            target: Vec::new(),
            target_size: Size::default(),
            needs_clear: true,
            initialized: false,
        }
    }

    /// Last composited frame
    pub fn target(&self) -> (&[u32], Size) {
        (&self.target, self.target_size)
    }

    fn ensure_target(&mut self, size: Size) {
        if size != self.target_size {
            self.target_size = size;
            self.target.clear();
            self.target.resize(size.area(), BACKGROUND_ARGB);
            self.needs_clear = true;
        }
    }
}

impl Backend for SoftwareBackend {
    fn init(&mut self, surface: SurfaceDesc) -> Result<Capabilities, BackendError> {
        self.ensure_target(surface.size());
        self.needs_clear = true;
        self.initialized = true;
        log(LogCategory::Backend, LogLevel::Info, || {
            format!(
                "Software backend ready on {} ({}x{})",
                self.surface.name(),
                surface.width,
                surface.height
            )
        });
        Ok(Capabilities::software())
    }

    fn composite(
        &mut self,
        frame: &mut FrameAccess<'_>,
        layout: &Layout,
        overlay: Option<&str>,
    ) -> Result<(), BackendError> {
        if !self.initialized {
            return Err(BackendError::RuntimeFailure(
                "software backend used before init".to_string(),
            ));
        }
        self.ensure_target(layout.target);
        // The whole image is redrawn every frame
        frame.take_dirty();

        let viewport = layout.viewport;
        let logical = layout.logical.min(frame.desc().size());
        let width = self.target_size.width as usize;
        if viewport.stretched {
            if self.needs_clear {
                self.target.fill(BACKGROUND_ARGB);
                self.needs_clear = false;
            } else {
                stretch_blit(
                    frame.pixels(),
                    frame.pitch_pixels(),
                    logical,
                    &mut self.target,
                    width,
                    &viewport,
                );
            }
        } else {
            self.needs_clear = false;
            blit_rgb565(
                frame.pixels(),
                frame.pitch_pixels(),
                logical,
                &mut self.target,
                width,
            );
        }

        if let Some(text) = overlay {
            let height = self.target_size.height as usize;
            let mut canvas = TextCanvas::new(&mut self.target, width, height, width);
            canvas.draw_text(
                text,
                viewport.x as usize,
                viewport.y as usize,
                TEXT_ARGB,
                Some(BACKGROUND_ARGB),
            );
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        self.surface.present(&self.target, self.target_size)
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        self.target = Vec::new();
        self.target_size = Size::default();
    }

    fn invalidate(&mut self) {
        self.needs_clear = true;
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn name(&self) -> &str {
        "Software"
    }
}
