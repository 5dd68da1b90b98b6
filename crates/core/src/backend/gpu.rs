//! GPU texture presentation path.
//!
//! The framebuffer is uploaded into a power-of-two texture and drawn as a textured quad
//! covering the viewport. Device calls go through [`GpuDevice`] so the same pipeline runs
//! on OpenGL in the frontend and on the headless device in tests.
//!
//! # Capability levels
//!
//! `init()` walks an ordered list of [`PipelineLevel`]s and keeps the first that works:
//!
//! ```text
//! Converted  (RG8 texture + conversion shader)   shader self-test fails -> next level
//! Direct     (RGB565 / RGB5 + passthrough shader)
//! Immediate  (RGB565 / RGB5, fixed-function quad) only level without shader support
//! ```
//!
//! A failed device call at any step is `InitFailed`; the session then runs on software.

use super::{Backend, BackendError, BackendKind, Capabilities, GpuError, PipelineLevel};
use crate::config::PresentConfig;
use crate::framebuffer::{rgb565_to_argb, FrameAccess, SurfaceDesc, WritableRegion};
use crate::geometry::Layout;
use crate::logging::{log, LogCategory, LogLevel};
use crate::overlay::{text_size, TextCanvas, BACKGROUND_RGB565, TEXT_RGB565};
use crate::types::{Rect, Size};

/// Steady-state `take_error` polls after which error checking stops
pub const MAX_ERROR_CHECKS: u32 = 3;

/// Pattern size used by the upload and shader self-tests
const TEST_SIZE: Size = Size::new(4, 4);
const TEST_PATTERN: [u16; 4] = [0xF800, 0x07E0, 0x001F, 0xFFFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuadId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Storage format of a presentation texture. Source data is always RGB565.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// Raw 16-bit pixels as two 8-bit channels, decoded by the conversion shader
    Rg8,
    /// Native 5-6-5 storage
    Rgb565,
    /// 5-5-5 storage of 5-6-5 data, for drivers without RGB565 textures
    Rgb5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Decodes RG8 texels into RGB565 colors
    Convert,
    /// Samples the texture as is
    Passthrough,
}

/// What the device reported at probe time
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub renderer: String,
    pub version: String,
    pub shaders: bool,
    pub vertex_arrays: bool,
    pub transfer_buffers: bool,
    pub max_texture_size: u32,
    pub refresh_rate: Option<f64>,
}

/// One textured quad draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadDraw {
    pub texture: TextureId,
    pub format: TextureFormat,
    /// `None` draws with the fixed-function pipeline
    pub program: Option<ProgramId>,
    /// `None` submits the quad per draw instead of from a vertex array
    pub quad: Option<QuadId>,
    /// Destination in window coordinates, origin bottom-left
    pub viewport: Rect,
    /// Fraction of the texture covered by the image
    pub tex_scale: [f32; 2],
}

/// Minimal GPU command surface used by [`GpuBackend`].
///
/// Upload calls take the whole source image (`row_length` pixels per row) and copy the
/// `rect` sub-image into the same position of the texture.
pub trait GpuDevice {
    fn probe(&mut self) -> Result<DeviceInfo, GpuError>;
    fn set_swap_interval(&mut self, interval: u32) -> Result<(), GpuError>;
    /// Size of the drawable the viewport is expressed in
    fn set_target_size(&mut self, size: Size);

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramId, GpuError>;
    fn delete_program(&mut self, program: ProgramId);
    fn create_quad(&mut self, program: ProgramId) -> Result<QuadId, GpuError>;
    fn delete_quad(&mut self, quad: QuadId);

    fn create_texture(&mut self, size: Size, format: TextureFormat)
        -> Result<TextureId, GpuError>;
    fn delete_texture(&mut self, texture: TextureId);
    fn upload(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        rect: Rect,
        pixels: &[u16],
        row_length: usize,
    ) -> Result<(), GpuError>;
    /// Read back `size` texels from the texture origin
    fn read_texture(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        size: Size,
    ) -> Result<Vec<u16>, GpuError>;

    /// Create a transfer buffer holding `len` pixels
    fn create_transfer_buffer(&mut self, len: usize) -> Result<BufferId, GpuError>;
    fn write_transfer_buffer(&mut self, buffer: BufferId, pixels: &[u16]) -> Result<(), GpuError>;
    fn upload_from_transfer(
        &mut self,
        buffer: BufferId,
        texture: TextureId,
        format: TextureFormat,
        rect: Rect,
        row_length: usize,
    ) -> Result<(), GpuError>;
    fn delete_transfer_buffer(&mut self, buffer: BufferId);

    fn clear(&mut self) -> Result<(), GpuError>;
    fn draw(&mut self, draw: &QuadDraw) -> Result<(), GpuError>;
    /// Read back drawn pixels, rows bottom-up like the viewport
    fn read_pixels(&mut self, rect: Rect) -> Result<Vec<u32>, GpuError>;
    fn swap_buffers(&mut self) -> Result<(), GpuError>;
    /// Block until all submitted work completed
    fn finish(&mut self);
    /// Oldest error recorded by the device since the last call
    fn take_error(&mut self) -> Option<GpuError>;
}

/// Smallest power of two >= `value`
pub fn next_pow2(value: u32) -> u32 {
    value.max(1).next_power_of_two()
}

/// GPU backend settings taken from the session config
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuSettings {
    pub swap_interval: u32,
    pub ring_depth: usize,
    pub convert_on_gpu: bool,
    pub auto_fallback: bool,
    pub texture_pair: bool,
    pub gl_finish: bool,
}

impl From<&PresentConfig> for GpuSettings {
    fn from(config: &PresentConfig) -> Self {
        Self {
            swap_interval: config.swap_interval,
            ring_depth: config.ring_depth,
            convert_on_gpu: config.convert_on_gpu,
            auto_fallback: config.auto_fallback,
            texture_pair: config.texture_pair,
            gl_finish: config.gl_finish,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pipeline {
    level: PipelineLevel,
    format: TextureFormat,
    program: Option<ProgramId>,
    quad: Option<QuadId>,
}

enum LevelFailure {
    /// The level does not work here; a lower one may
    Unusable(String),
    Device(GpuError),
}

impl From<GpuError> for LevelFailure {
    fn from(err: GpuError) -> Self {
        LevelFailure::Device(err)
    }
}

fn init_failed(step: &str, err: GpuError) -> BackendError {
    BackendError::InitFailed(format!("{}: {}", step, err))
}

fn runtime(err: GpuError) -> BackendError {
    BackendError::RuntimeFailure(err.to_string())
}

fn close_enough(a: u32, b: u32) -> bool {
    (0..3).all(|i| {
        let shift = i * 8;
        let ca = ((a >> shift) & 0xFF) as i32;
        let cb = ((b >> shift) & 0xFF) as i32;
        (ca - cb).abs() <= 8
    })
}

fn test_pattern() -> Vec<u16> {
    (0..TEST_SIZE.area())
        .map(|i| TEST_PATTERN[(i + i / TEST_SIZE.width as usize) % TEST_PATTERN.len()])
        .collect()
}

/// Texture-based presentation backend
pub struct GpuBackend {
    device: Box<dyn GpuDevice>,
    settings: GpuSettings,
    pipeline: Option<Pipeline>,
    textures: Vec<TextureId>,
    /// Area each texture still has to receive, indexed like `textures`
    pending: Vec<Option<Rect>>,
    current: usize,
    ring: Vec<BufferId>,
    ring_index: usize,
    texture_size: Size,
    display: Size,
    error_checks_left: u32,
    refresh_rate: Option<f64>,
}

impl GpuBackend {
    pub fn new(device: Box<dyn GpuDevice>, settings: GpuSettings) -> Self {
        Self {
            device,
            settings,
            pipeline: None,
            textures: Vec::new(),
            pending: Vec::new(),
            current: 0,
            ring: Vec::new(),
            ring_index: 0,
            texture_size: Size::default(),
            display: Size::default(),
            error_checks_left: 0,
            refresh_rate: None,
        }
    }

    pub fn pipeline_level(&self) -> Option<PipelineLevel> {
        self.pipeline.map(|p| p.level)
    }

    pub fn ring_depth(&self) -> usize {
        self.ring.len()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            kind: BackendKind::Gpu,
            hardware_paced: self.settings.swap_interval > 0,
            pipeline: self.pipeline_level(),
            transfer_buffers: self.ring.len(),
            texture_size: Some(self.texture_size),
            refresh_rate: self.refresh_rate,
        }
    }

    fn force_full_upload(&mut self) {
        let full = Rect::from_size(self.display);
        for pending in &mut self.pending {
            *pending = Some(full);
        }
    }

    fn mark_pending(&mut self, rect: Rect) {
        for pending in &mut self.pending {
            *pending = Some(pending.map_or(rect, |p| p.union(&rect)));
        }
    }

    /// Upload the known pattern and compare the readback
    fn upload_test(&mut self, format: TextureFormat) -> Result<bool, GpuError> {
        let pattern = test_pattern();
        let texture = self.device.create_texture(TEST_SIZE, format)?;
        let result = self
            .device
            .upload(
                texture,
                format,
                Rect::from_size(TEST_SIZE),
                &pattern,
                TEST_SIZE.width as usize,
            )
            .and_then(|_| self.device.read_texture(texture, format, TEST_SIZE));
        self.device.delete_texture(texture);
        Ok(result? == pattern)
    }

    /// Draw the pattern through `pipeline` and check the rendered colors
    fn shader_test(&mut self, pipeline: &Pipeline) -> Result<bool, GpuError> {
        let pattern = test_pattern();
        let texture = self.device.create_texture(TEST_SIZE, pipeline.format)?;
        let rect = Rect::from_size(TEST_SIZE);
        let result = self
            .device
            .upload(texture, pipeline.format, rect, &pattern, TEST_SIZE.width as usize)
            .and_then(|_| {
                self.device.draw(&QuadDraw {
                    texture,
                    format: pipeline.format,
                    program: pipeline.program,
                    quad: pipeline.quad,
                    viewport: rect,
                    tex_scale: [1.0, 1.0],
                })
            })
            .and_then(|_| self.device.read_pixels(rect));
        self.device.delete_texture(texture);
        let pixels = result?;

        let width = TEST_SIZE.width as usize;
        let height = TEST_SIZE.height as usize;
        let ok = pixels.len() == pattern.len()
            && (0..height).all(|row| {
                // Readback rows are bottom-up
                let src_row = height - 1 - row;
                (0..width).all(|col| {
                    close_enough(
                        pixels[row * width + col],
                        rgb565_to_argb(pattern[src_row * width + col]),
                    )
                })
            });
        self.device.clear()?;
        Ok(ok)
    }

    fn release_pipeline(&mut self, pipeline: &Pipeline) {
        if let Some(quad) = pipeline.quad {
            self.device.delete_quad(quad);
        }
        if let Some(program) = pipeline.program {
            self.device.delete_program(program);
        }
    }

    fn first_working_format(
        &mut self,
        formats: &[TextureFormat],
    ) -> Result<Option<TextureFormat>, GpuError> {
        for &format in formats {
            if self.upload_test(format)? {
                return Ok(Some(format));
            }
            log(LogCategory::Backend, LogLevel::Info, || {
                format!("Texture upload test failed for {:?}", format)
            });
        }
        Ok(None)
    }

    fn setup_level(&mut self, level: PipelineLevel) -> Result<Pipeline, LevelFailure> {
        let formats: &[TextureFormat] = match level {
            PipelineLevel::Converted => &[TextureFormat::Rg8],
            PipelineLevel::Direct | PipelineLevel::Immediate => {
                &[TextureFormat::Rgb565, TextureFormat::Rgb5]
            }
        };
        let Some(format) = self.first_working_format(formats)? else {
            return Err(LevelFailure::Unusable(
                "no texture format passed the upload test".to_string(),
            ));
        };

        let mut pipeline = Pipeline {
            level,
            format,
            program: None,
            quad: None,
        };
        if level.uses_shaders() {
            let kind = if level == PipelineLevel::Converted {
                ProgramKind::Convert
            } else {
                ProgramKind::Passthrough
            };
            let program = self.device.create_program(kind)?;
            pipeline.program = Some(program);
            match self.device.create_quad(program) {
                Ok(quad) => pipeline.quad = Some(quad),
                Err(err) => {
                    self.release_pipeline(&pipeline);
                    return Err(err.into());
                }
            }
        }

        if level == PipelineLevel::Converted {
            match self.shader_test(&pipeline) {
                Ok(true) => {}
                Ok(false) => {
                    self.release_pipeline(&pipeline);
                    return Err(LevelFailure::Unusable("shader test failed".to_string()));
                }
                Err(err) => {
                    self.release_pipeline(&pipeline);
                    return Err(err.into());
                }
            }
        }
        Ok(pipeline)
    }

    fn setup_ring(&mut self, len: usize, supported: bool) {
        let depth = self.settings.ring_depth;
        if depth == 0 {
            return;
        }
        if !supported {
            log(LogCategory::Backend, LogLevel::Info, || {
                "Transfer buffers unsupported, using synchronous uploads".to_string()
            });
            return;
        }
        for _ in 0..depth {
            match self.device.create_transfer_buffer(len) {
                Ok(buffer) => self.ring.push(buffer),
                Err(err) => {
                    log(LogCategory::Backend, LogLevel::Warn, || {
                        format!(
                            "Transfer buffer setup failed ({}), using synchronous uploads",
                            err
                        )
                    });
                    for buffer in self.ring.drain(..) {
                        self.device.delete_transfer_buffer(buffer);
                    }
                    return;
                }
            }
        }
        self.ring_index = 0;
        log(LogCategory::Backend, LogLevel::Info, || {
            format!("Transfer ring of {} buffers active", depth)
        });
    }

    fn try_init(&mut self, surface: SurfaceDesc) -> Result<Capabilities, BackendError> {
        let info = self.device.probe().map_err(|e| init_failed("probe", e))?;
        log(LogCategory::Backend, LogLevel::Info, || {
            format!("GPU device: {} ({})", info.renderer, info.version)
        });

        self.device
            .set_swap_interval(self.settings.swap_interval)
            .map_err(|e| init_failed("swap interval", e))?;
        self.device.set_target_size(surface.size());

        let texture_size = Size::new(next_pow2(surface.width), next_pow2(surface.height));
        if texture_size.width > info.max_texture_size || texture_size.height > info.max_texture_size
        {
            return Err(BackendError::InitFailed(format!(
                "texture size {}x{} exceeds device limit {}",
                texture_size.width, texture_size.height, info.max_texture_size
            )));
        }
        self.texture_size = texture_size;

        let mut levels = Vec::with_capacity(3);
        if info.shaders && info.vertex_arrays {
            if self.settings.convert_on_gpu {
                levels.push(PipelineLevel::Converted);
            }
            levels.push(PipelineLevel::Direct);
        } else {
            levels.push(PipelineLevel::Immediate);
        }

        let mut pipeline = None;
        for level in levels {
            match self.setup_level(level) {
                Ok(p) => {
                    pipeline = Some(p);
                    break;
                }
                Err(LevelFailure::Unusable(reason)) if level == PipelineLevel::Converted => {
                    log(LogCategory::Backend, LogLevel::Warn, || {
                        format!("GPU color conversion disabled: {}", reason)
                    });
                }
                Err(LevelFailure::Unusable(reason)) => {
                    return Err(BackendError::InitFailed(format!("{:?}: {}", level, reason)));
                }
                Err(LevelFailure::Device(err)) => {
                    return Err(init_failed(&format!("{:?} pipeline", level), err));
                }
            }
        }
        let pipeline = pipeline
            .ok_or_else(|| BackendError::InitFailed("no pipeline level available".to_string()))?;
        self.pipeline = Some(pipeline);

        let count = if self.settings.texture_pair { 2 } else { 1 };
        for _ in 0..count {
            let texture = self
                .device
                .create_texture(texture_size, pipeline.format)
                .map_err(|e| init_failed("textures", e))?;
            self.textures.push(texture);
            self.pending.push(None);
        }

        self.setup_ring(surface.len(), info.transfer_buffers);

        if let Some(err) = self.device.take_error() {
            return Err(init_failed("setup", err));
        }

        self.refresh_rate = info.refresh_rate;
        self.display = surface.size();
        self.current = 0;
        self.error_checks_left = if self.settings.auto_fallback {
            MAX_ERROR_CHECKS
        } else {
            0
        };
        self.force_full_upload();
        Ok(self.capabilities())
    }

    fn upload_frame(&mut self, frame: &FrameAccess<'_>, texture: TextureId, rect: Rect) -> Result<(), GpuError> {
        let Some(pipeline) = self.pipeline else {
            return Ok(());
        };
        let pitch = frame.pitch_pixels();
        if self.ring.is_empty() {
            return self
                .device
                .upload(texture, pipeline.format, rect, frame.pixels(), pitch);
        }
        let slot = frame.active_region().index % self.ring.len();
        let buffer = self.ring[slot];
        self.device.write_transfer_buffer(buffer, frame.pixels())?;
        self.device
            .upload_from_transfer(buffer, texture, pipeline.format, rect, pitch)
    }

    fn upload_overlay(&mut self, frame: &FrameAccess<'_>, texture: TextureId, text: &str) -> Result<(), GpuError> {
        let Some(pipeline) = self.pipeline else {
            return Ok(());
        };
        let band = text_size(text).min(self.display);
        if band.is_empty() {
            return Ok(());
        }
        let width = band.width as usize;
        let pitch = frame.pitch_pixels();
        let mut pixels = Vec::with_capacity(band.area());
        for y in 0..band.height as usize {
            pixels.extend_from_slice(&frame.pixels()[y * pitch..y * pitch + width]);
        }
        TextCanvas::new(&mut pixels, width, band.height as usize, width).draw_text(
            text,
            0,
            0,
            TEXT_RGB565,
            Some(BACKGROUND_RGB565),
        );
        let rect = Rect::from_size(band);
        self.device
            .upload(texture, pipeline.format, rect, &pixels, width)?;
        // Restore the covered pixels on every texture next frame
        self.mark_pending(rect);
        Ok(())
    }
}

impl Backend for GpuBackend {
    fn init(&mut self, surface: SurfaceDesc) -> Result<Capabilities, BackendError> {
        match self.try_init(surface) {
            Ok(caps) => {
                log(LogCategory::Backend, LogLevel::Info, || {
                    format!(
                        "GPU backend ready: {:?}, texture {}x{}, ring {}",
                        caps.pipeline,
                        self.texture_size.width,
                        self.texture_size.height,
                        self.ring.len()
                    )
                });
                Ok(caps)
            }
            Err(err) => {
                log(LogCategory::Backend, LogLevel::Error, || err.to_string());
                self.shutdown();
                Err(err)
            }
        }
    }

    fn begin_frame(&mut self) -> WritableRegion {
        if self.ring.is_empty() {
            return WritableRegion::SINGLE;
        }
        self.ring_index = (self.ring_index + 1) % self.ring.len();
        WritableRegion {
            index: self.ring_index,
            depth: self.ring.len(),
        }
    }

    fn composite(
        &mut self,
        frame: &mut FrameAccess<'_>,
        layout: &Layout,
        overlay: Option<&str>,
    ) -> Result<(), BackendError> {
        let Some(pipeline) = self.pipeline else {
            return Err(BackendError::RuntimeFailure(
                "GPU backend used before init".to_string(),
            ));
        };
        if self.textures.is_empty() {
            return Err(BackendError::RuntimeFailure("no textures".to_string()));
        }

        let display = frame.display_size();
        if display != self.display {
            self.display = display;
            self.force_full_upload();
        }
        if let Some(dirty) = frame.take_dirty() {
            self.mark_pending(dirty);
        }

        self.device.set_target_size(layout.target);
        if layout.viewport.stretched {
            self.device.clear().map_err(runtime)?;
        }

        let slot = self.current;
        let texture = self.textures[slot];
        if let Some(rect) = self.pending[slot].take() {
            self.upload_frame(frame, texture, rect).map_err(runtime)?;
        }
        if let Some(text) = overlay {
            self.upload_overlay(frame, texture, text).map_err(runtime)?;
        }

        let vp = layout.viewport;
        let logical = layout.logical;
        let draw = QuadDraw {
            texture,
            format: pipeline.format,
            program: pipeline.program,
            quad: pipeline.quad,
            viewport: Rect::new(
                vp.x,
                layout.target.height.saturating_sub(vp.y + vp.height),
                vp.width,
                vp.height,
            ),
            tex_scale: [
                logical.width as f32 / self.texture_size.width as f32,
                logical.height as f32 / self.texture_size.height as f32,
            ],
        };
        self.device.draw(&draw).map_err(runtime)?;

        self.current = (self.current + 1) % self.textures.len();
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        self.device.swap_buffers().map_err(runtime)?;
        if self.settings.gl_finish {
            self.device.finish();
        }
        if self.error_checks_left > 0 {
            self.error_checks_left -= 1;
            if let Some(err) = self.device.take_error() {
                log(LogCategory::Backend, LogLevel::Error, || {
                    format!("GPU error during presentation: {}", err)
                });
                return Err(runtime(err));
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        for buffer in std::mem::take(&mut self.ring) {
            self.device.delete_transfer_buffer(buffer);
        }
        for texture in std::mem::take(&mut self.textures) {
            self.device.delete_texture(texture);
        }
        self.pending.clear();
        if let Some(pipeline) = self.pipeline.take() {
            self.release_pipeline(&pipeline);
        }
    }

    fn invalidate(&mut self) {
        self.force_full_upload();
    }

    fn focus_regained(&mut self) -> Result<(), BackendError> {
        self.device
            .set_swap_interval(self.settings.swap_interval)
            .map_err(runtime)?;
        self.force_full_upload();
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn name(&self) -> &str {
        match self.pipeline_level() {
            Some(PipelineLevel::Converted) => "GPU (converted)",
            Some(PipelineLevel::Direct) => "GPU (direct)",
            Some(PipelineLevel::Immediate) => "GPU (immediate)",
            None => "GPU",
        }
    }

    fn is_hardware_accelerated(&self) -> bool {
        true
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessDevice, HeadlessFaults, InitStep};
    use crate::framebuffer::SharedFramebuffer;
    use crate::geometry::{try_resolve, ScalingMode, ScalingPolicy};

    fn settings() -> GpuSettings {
        GpuSettings::from(&PresentConfig::default())
    }

    fn backend_with(faults: HeadlessFaults, settings: GpuSettings) -> (GpuBackend, HeadlessDevice) {
        let device = HeadlessDevice::new(faults);
        let backend = GpuBackend::new(Box::new(device.clone()), settings);
        (backend, device)
    }

    fn surface(width: u32, height: u32) -> (SurfaceDesc, SharedFramebuffer) {
        let desc = SurfaceDesc::new(width, height, width * 2).unwrap();
        (desc, SharedFramebuffer::new(desc))
    }

    #[test]
    fn test_next_pow2() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(320), 512);
        assert_eq!(next_pow2(512), 512);
        assert_eq!(next_pow2(600), 1024);
    }

    #[test]
    fn test_init_full_pipeline() {
        let (mut backend, _) = backend_with(HeadlessFaults::default(), settings());
        let (desc, _) = surface(320, 200);
        let caps = backend.init(desc).unwrap();
        assert_eq!(caps.kind, BackendKind::Gpu);
        assert_eq!(caps.pipeline, Some(PipelineLevel::Converted));
        assert_eq!(caps.texture_size, Some(Size::new(512, 256)));
        assert!(!caps.hardware_paced);
        assert!(backend.is_hardware_accelerated());
    }

    #[test]
    fn test_init_failure_at_step() {
        for step in [InitStep::Probe, InitStep::SwapInterval, InitStep::Program, InitStep::Texture] {
            let faults = HeadlessFaults {
                fail_step: Some(step),
                ..Default::default()
            };
            let (mut backend, device) = backend_with(faults, settings());
            let (desc, _) = surface(64, 64);
            assert!(
                matches!(backend.init(desc), Err(BackendError::InitFailed(_))),
                "{:?}",
                step
            );
            assert_eq!(device.live_resources(), 0, "{:?} leaked resources", step);
        }
    }

    #[test]
    fn test_shader_test_failure_drops_to_direct() {
        let faults = HeadlessFaults {
            fail_shader_test: true,
            ..Default::default()
        };
        let (mut backend, _) = backend_with(faults, settings());
        let (desc, _) = surface(64, 64);
        let caps = backend.init(desc).unwrap();
        assert_eq!(caps.pipeline, Some(PipelineLevel::Direct));
    }

    #[test]
    fn test_no_shaders_uses_immediate_with_rgb5() {
        let faults = HeadlessFaults {
            no_shaders: true,
            failing_formats: vec![TextureFormat::Rgb565],
            ..Default::default()
        };
        let (mut backend, _) = backend_with(faults, settings());
        let (desc, _) = surface(64, 64);
        let caps = backend.init(desc).unwrap();
        assert_eq!(caps.pipeline, Some(PipelineLevel::Immediate));
    }

    #[test]
    fn test_all_formats_failing_is_init_failure() {
        let faults = HeadlessFaults {
            failing_formats: vec![TextureFormat::Rg8, TextureFormat::Rgb565, TextureFormat::Rgb5],
            ..Default::default()
        };
        let (mut backend, _) = backend_with(faults, settings());
        let (desc, _) = surface(64, 64);
        assert!(matches!(backend.init(desc), Err(BackendError::InitFailed(_))));
    }

    #[test]
    fn test_transfer_ring_failure_disables_ring() {
        let faults = HeadlessFaults {
            fail_transfer_setup: true,
            ..Default::default()
        };
        let config = PresentConfig {
            ring_depth: 3,
            ..Default::default()
        };
        let (mut backend, device) = backend_with(faults, GpuSettings::from(&config));
        let (desc, _) = surface(64, 64);
        let caps = backend.init(desc).unwrap();
        assert_eq!(caps.transfer_buffers, 0);
        assert_eq!(backend.begin_frame(), WritableRegion::SINGLE);
        assert_eq!(device.transfer_buffer_count(), 0);
    }

    #[test]
    fn test_ring_rotates_regions() {
        let config = PresentConfig {
            ring_depth: 3,
            ..Default::default()
        };
        let (mut backend, _) = backend_with(HeadlessFaults::default(), GpuSettings::from(&config));
        let (desc, _) = surface(64, 64);
        assert_eq!(backend.init(desc).unwrap().transfer_buffers, 3);
        let indices: Vec<usize> = (0..4).map(|_| backend.begin_frame().index).collect();
        assert_eq!(indices, vec![1, 2, 0, 1]);
    }

    #[test]
    fn test_composite_draws_frame() {
        let (mut backend, device) = backend_with(HeadlessFaults::default(), settings());
        let (desc, fb) = surface(8, 8);
        backend.init(desc).unwrap();
        fb.lock(None).unwrap().fill_rect(Rect::new(0, 0, 8, 8), 0xF800);

        let policy = ScalingPolicy::new(ScalingMode::AspectPreserve, None);
        let layout = try_resolve(Size::new(8, 8), Size::new(32, 16), &policy).unwrap();
        let mut access = fb.access();
        access.select(backend.begin_frame());
        backend.composite(&mut access, &layout, None).unwrap();
        drop(access);
        backend.present().unwrap();

        let (pixels, size) = device.presented().unwrap();
        assert_eq!(size, Size::new(32, 16));
        // Viewport is 16x16 centered at x=8
        assert_eq!(pixels[0], 0xFF00_0000);
        assert_eq!(pixels[8], 0xFFFF_0000);
        assert_eq!(pixels[15 * 32 + 23], 0xFFFF_0000);
        assert_eq!(pixels[15 * 32 + 24], 0xFF00_0000);
    }

    #[test]
    fn test_texture_pair_tracks_pending_per_texture() {
        let (mut backend, device) = backend_with(HeadlessFaults::default(), settings());
        let (desc, fb) = surface(8, 8);
        backend.init(desc).unwrap();
        device.clear_upload_log();
        let layout = try_resolve(Size::new(8, 8), Size::new(8, 8), &ScalingPolicy::default()).unwrap();

        let frame = |backend: &mut GpuBackend| {
            backend.composite(&mut fb.access(), &layout, None).unwrap();
            backend.present().unwrap();
        };
        frame(&mut backend);
        frame(&mut backend);
        let uploads = device.upload_log();
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().all(|&(_, rect)| rect == Rect::new(0, 0, 8, 8)));

        fb.lock(Some(Rect::new(2, 2, 2, 2))).unwrap().fill_rect(Rect::new(2, 2, 2, 2), 0xFFFF);
        frame(&mut backend);
        frame(&mut backend);
        let uploads = device.upload_log();
        assert_eq!(uploads.len(), 4);
        // Both textures receive the partial update, one each frame
        assert_eq!(uploads[2].1, Rect::new(2, 2, 2, 2));
        assert_eq!(uploads[3].1, Rect::new(2, 2, 2, 2));
        assert_ne!(uploads[2].0, uploads[3].0);

        frame(&mut backend);
        assert_eq!(device.upload_log().len(), 4);
        assert_eq!(device.presented().unwrap().0[2 * 8 + 2], 0xFFFF_FFFF);
    }

    #[test]
    fn test_runtime_error_reported() {
        let faults = HeadlessFaults {
            error_after_frames: Some(1),
            ..Default::default()
        };
        let (mut backend, _) = backend_with(faults, settings());
        let (desc, fb) = surface(8, 8);
        backend.init(desc).unwrap();
        let layout = try_resolve(Size::new(8, 8), Size::new(8, 8), &ScalingPolicy::default()).unwrap();

        backend.composite(&mut fb.access(), &layout, None).unwrap();
        assert!(backend.present().is_ok());
        backend.composite(&mut fb.access(), &layout, None).unwrap();
        assert!(matches!(backend.present(), Err(BackendError::RuntimeFailure(_))));
    }

    #[test]
    fn test_runtime_error_checks_are_capped() {
        let faults = HeadlessFaults {
            error_after_frames: Some(MAX_ERROR_CHECKS as u64),
            ..Default::default()
        };
        let (mut backend, _) = backend_with(faults, settings());
        let (desc, fb) = surface(8, 8);
        backend.init(desc).unwrap();
        let layout = try_resolve(Size::new(8, 8), Size::new(8, 8), &ScalingPolicy::default()).unwrap();

        // Errors appearing after the checked frames go unnoticed
        for _ in 0..MAX_ERROR_CHECKS + 2 {
            backend.composite(&mut fb.access(), &layout, None).unwrap();
            assert!(backend.present().is_ok());
        }
    }

    #[test]
    fn test_no_error_checks_without_auto_fallback() {
        let faults = HeadlessFaults {
            error_after_frames: Some(0),
            ..Default::default()
        };
        let config = PresentConfig {
            auto_fallback: false,
            ..Default::default()
        };
        let (mut backend, _) = backend_with(faults, GpuSettings::from(&config));
        let (desc, fb) = surface(8, 8);
        backend.init(desc).unwrap();
        let layout = try_resolve(Size::new(8, 8), Size::new(8, 8), &ScalingPolicy::default()).unwrap();
        for _ in 0..5 {
            backend.composite(&mut fb.access(), &layout, None).unwrap();
            assert!(backend.present().is_ok());
        }
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let config = PresentConfig {
            ring_depth: 2,
            ..Default::default()
        };
        let (mut backend, device) = backend_with(HeadlessFaults::default(), GpuSettings::from(&config));
        let (desc, _) = surface(16, 16);
        backend.init(desc).unwrap();
        assert!(device.live_resources() > 0);
        backend.shutdown();
        assert_eq!(device.live_resources(), 0);
    }
}
