//! In-memory GPU device and window surface.
//!
//! Used by tests and the benchmark CLI. The device keeps textures and the drawable as
//! plain vectors, performs the same sampling the real shaders do, and can be told to
//! fail at specific points.

use super::gpu::{
    BufferId, DeviceInfo, GpuDevice, ProgramId, ProgramKind, QuadDraw, QuadId, TextureFormat,
    TextureId,
};
use super::software::SoftwareSurface;
use super::{BackendError, GpuError};
use crate::framebuffer::rgb565_to_argb;
use crate::types::{Rect, Size};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const GL_INVALID_VALUE: u32 = 0x0501;
const GL_INVALID_OPERATION: u32 = 0x0502;
const BLACK: u32 = 0xFF00_0000;

/// Most recent uploads kept for inspection
pub const UPLOAD_LOG_LIMIT: usize = 256;

/// Init call that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Probe,
    SwapInterval,
    Program,
    Quad,
    Texture,
}

/// Vertical blank timing of the simulated display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VsyncModel {
    pub period_ms: f64,
    /// Simulated GPU time spent before the swap can wait for a vblank
    pub present_cost_ms: f64,
}

impl VsyncModel {
    pub fn from_hz(hz: f64) -> Self {
        Self {
            period_ms: 1000.0 / hz,
            present_cost_ms: 0.0,
        }
    }

    pub fn with_present_cost(self, present_cost_ms: f64) -> Self {
        Self {
            present_cost_ms: present_cost_ms.max(0.0),
            ..self
        }
    }
}

/// Faults and quirks injected into a [`HeadlessDevice`]
#[derive(Debug, Clone, Default)]
pub struct HeadlessFaults {
    pub fail_step: Option<InitStep>,
    /// The conversion shader renders black
    pub fail_shader_test: bool,
    /// Transfer buffer creation fails after the first buffer
    pub fail_transfer_setup: bool,
    /// Formats whose texture readback never matches the upload
    pub failing_formats: Vec<TextureFormat>,
    /// Report no shader or vertex array support
    pub no_shaders: bool,
    pub no_transfer_buffers: bool,
    /// Raise a device error once more than this many frames were presented
    pub error_after_frames: Option<u64>,
    /// Block in `swap_buffers` until the next vblank when the swap interval is set
    pub vsync: Option<VsyncModel>,
}

struct HeadlessTexture {
    size: Size,
    format: TextureFormat,
    texels: Vec<u16>,
}

struct HeadlessState {
    faults: HeadlessFaults,
    next_id: u32,
    textures: HashMap<u32, HeadlessTexture>,
    programs: HashMap<u32, ProgramKind>,
    quads: HashSet<u32>,
    buffers: HashMap<u32, Vec<u16>>,
    target_size: Size,
    back: Vec<u32>,
    presented: Option<(Vec<u32>, Size)>,
    swap_interval: u32,
    swaps: u64,
    uploads: VecDeque<(TextureId, Rect)>,
    pending_error: Option<GpuError>,
    epoch: Instant,
}

impl HeadlessState {
    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn fail(&self, step: InitStep) -> Result<(), GpuError> {
        if self.faults.fail_step == Some(step) {
            Err(GpuError::Other(format!("injected failure at {:?}", step)))
        } else {
            Ok(())
        }
    }

    fn record_error(&mut self, code: u32) {
        if self.pending_error.is_none() {
            self.pending_error = Some(GpuError::Code(code));
        }
    }

    fn write_texels(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        rect: Rect,
        pixels: &[u16],
        row_length: usize,
    ) {
        let failing = self.faults.failing_formats.contains(&format);
        let Some(tex) = self.textures.get_mut(&texture.0) else {
            self.record_error(GL_INVALID_OPERATION);
            return;
        };
        if tex.format != format || !rect.fits_within(tex.size) {
            self.record_error(GL_INVALID_VALUE);
            return;
        }
        let needed = (rect.bottom() as usize).saturating_sub(1) * row_length + rect.right() as usize;
        if pixels.len() < needed {
            self.record_error(GL_INVALID_OPERATION);
            return;
        }
        if self.uploads.len() == UPLOAD_LOG_LIMIT {
            self.uploads.pop_front();
        }
        self.uploads.push_back((texture, rect));
        if failing {
            return;
        }
        let tex_width = tex.size.width as usize;
        for y in rect.y as usize..rect.bottom() as usize {
            let src = &pixels[y * row_length + rect.x as usize..y * row_length + rect.right() as usize];
            let start = y * tex_width + rect.x as usize;
            tex.texels[start..start + src.len()].copy_from_slice(src);
        }
    }

    fn draw(&mut self, draw: &QuadDraw) -> Result<(), GpuError> {
        let kind = match draw.program {
            Some(program) => match self.programs.get(&program.0) {
                Some(&kind) => Some(kind),
                None => {
                    self.record_error(GL_INVALID_OPERATION);
                    return Ok(());
                }
            },
            None => None,
        };
        let Some(tex) = self.textures.get(&draw.texture.0) else {
            self.record_error(GL_INVALID_OPERATION);
            return Ok(());
        };
        let black_out = kind == Some(ProgramKind::Convert)
            && (self.faults.fail_shader_test || tex.format != TextureFormat::Rg8);

        let target = self.target_size;
        let vp = draw.viewport;
        let src_w = (draw.tex_scale[0] * tex.size.width as f32).round() as usize;
        let src_h = (draw.tex_scale[1] * tex.size.height as f32).round() as usize;
        let tex_width = tex.size.width as usize;
        let top = target.height as i64 - vp.y as i64 - vp.height as i64;

        for dy in 0..vp.height as usize {
            let y = top + dy as i64;
            if y < 0 || y >= target.height as i64 {
                continue;
            }
            let ty = dy * src_h / vp.height as usize;
            for dx in 0..vp.width as usize {
                let x = vp.x as usize + dx;
                if x >= target.width as usize {
                    break;
                }
                let tx = dx * src_w / vp.width as usize;
                let color = if black_out {
                    BLACK
                } else {
                    rgb565_to_argb(tex.texels[ty * tex_width + tx])
                };
                self.back[y as usize * target.width as usize + x] = color;
            }
        }
        Ok(())
    }
}

/// Shared-state fake GPU; clones observe the same device.
#[derive(Clone)]
pub struct HeadlessDevice {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessDevice {
    pub fn new(faults: HeadlessFaults) -> Self {
        Self {
            state: Arc::new(Mutex::new(HeadlessState {
                faults,
                next_id: 0,
                textures: HashMap::new(),
                programs: HashMap::new(),
                quads: HashSet::new(),
                buffers: HashMap::new(),
                target_size: Size::default(),
                back: Vec::new(),
                presented: None,
                swap_interval: 0,
                swaps: 0,
                uploads: VecDeque::new(),
                pending_error: None,
                epoch: Instant::now(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Textures, programs, quads and transfer buffers currently alive
    pub fn live_resources(&self) -> usize {
        let state = self.state();
        state.textures.len() + state.programs.len() + state.quads.len() + state.buffers.len()
    }

    pub fn transfer_buffer_count(&self) -> usize {
        self.state().buffers.len()
    }

    /// Most recent texture uploads (direct and from transfer buffers), oldest first
    pub fn upload_log(&self) -> Vec<(TextureId, Rect)> {
        self.state().uploads.iter().copied().collect()
    }

    pub fn clear_upload_log(&self) {
        self.state().uploads.clear();
    }

    /// Drawable contents at the last swap
    pub fn presented(&self) -> Option<(Vec<u32>, Size)> {
        self.state().presented.clone()
    }

    pub fn swap_count(&self) -> u64 {
        self.state().swaps
    }
}

impl GpuDevice for HeadlessDevice {
    fn probe(&mut self) -> Result<DeviceInfo, GpuError> {
        let state = self.state();
        state.fail(InitStep::Probe)?;
        let shaders = !state.faults.no_shaders;
        Ok(DeviceInfo {
            renderer: "Headless".to_string(),
            version: "simulated".to_string(),
            shaders,
            vertex_arrays: shaders,
            transfer_buffers: !state.faults.no_transfer_buffers,
            max_texture_size: 4096,
            refresh_rate: state.faults.vsync.map(|v| 1000.0 / v.period_ms),
        })
    }

    fn set_swap_interval(&mut self, interval: u32) -> Result<(), GpuError> {
        let mut state = self.state();
        state.fail(InitStep::SwapInterval)?;
        state.swap_interval = interval;
        Ok(())
    }

    fn set_target_size(&mut self, size: Size) {
        let mut state = self.state();
        if state.target_size != size {
            state.target_size = size;
            state.back = vec![BLACK; size.area()];
        }
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramId, GpuError> {
        let mut state = self.state();
        state.fail(InitStep::Program)?;
        if state.faults.no_shaders {
            return Err(GpuError::Unsupported("shaders".to_string()));
        }
        let id = state.id();
        state.programs.insert(id, kind);
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.state().programs.remove(&program.0);
    }

    fn create_quad(&mut self, program: ProgramId) -> Result<QuadId, GpuError> {
        let mut state = self.state();
        state.fail(InitStep::Quad)?;
        if !state.programs.contains_key(&program.0) {
            return Err(GpuError::Code(GL_INVALID_OPERATION));
        }
        let id = state.id();
        state.quads.insert(id);
        Ok(QuadId(id))
    }

    fn delete_quad(&mut self, quad: QuadId) {
        self.state().quads.remove(&quad.0);
    }

    fn create_texture(&mut self, size: Size, format: TextureFormat) -> Result<TextureId, GpuError> {
        let mut state = self.state();
        state.fail(InitStep::Texture)?;
        let id = state.id();
        state.textures.insert(
            id,
            HeadlessTexture {
                size,
                format,
                texels: vec![0; size.area()],
            },
        );
        Ok(TextureId(id))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.state().textures.remove(&texture.0);
    }

    fn upload(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        rect: Rect,
        pixels: &[u16],
        row_length: usize,
    ) -> Result<(), GpuError> {
        self.state()
            .write_texels(texture, format, rect, pixels, row_length);
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureId,
        _format: TextureFormat,
        size: Size,
    ) -> Result<Vec<u16>, GpuError> {
        let state = self.state();
        let tex = state
            .textures
            .get(&texture.0)
            .ok_or(GpuError::Code(GL_INVALID_OPERATION))?;
        let width = tex.size.width as usize;
        let mut out = Vec::with_capacity(size.area());
        for y in 0..size.height.min(tex.size.height) as usize {
            let count = (size.width as usize).min(width);
            out.extend_from_slice(&tex.texels[y * width..y * width + count]);
        }
        Ok(out)
    }

    fn create_transfer_buffer(&mut self, len: usize) -> Result<BufferId, GpuError> {
        let mut state = self.state();
        if state.faults.fail_transfer_setup && !state.buffers.is_empty() {
            return Err(GpuError::Other("injected transfer buffer failure".to_string()));
        }
        let id = state.id();
        state.buffers.insert(id, vec![0; len]);
        Ok(BufferId(id))
    }

    fn write_transfer_buffer(&mut self, buffer: BufferId, pixels: &[u16]) -> Result<(), GpuError> {
        let mut state = self.state();
        match state.buffers.get_mut(&buffer.0) {
            Some(data) => {
                let count = data.len().min(pixels.len());
                data[..count].copy_from_slice(&pixels[..count]);
                Ok(())
            }
            None => Err(GpuError::Code(GL_INVALID_OPERATION)),
        }
    }

    fn upload_from_transfer(
        &mut self,
        buffer: BufferId,
        texture: TextureId,
        format: TextureFormat,
        rect: Rect,
        row_length: usize,
    ) -> Result<(), GpuError> {
        let mut state = self.state();
        let data = state
            .buffers
            .get(&buffer.0)
            .cloned()
            .ok_or(GpuError::Code(GL_INVALID_OPERATION))?;
        state.write_texels(texture, format, rect, &data, row_length);
        Ok(())
    }

    fn delete_transfer_buffer(&mut self, buffer: BufferId) {
        self.state().buffers.remove(&buffer.0);
    }

    fn clear(&mut self) -> Result<(), GpuError> {
        self.state().back.fill(BLACK);
        Ok(())
    }

    fn draw(&mut self, draw: &QuadDraw) -> Result<(), GpuError> {
        self.state().draw(draw)
    }

    fn read_pixels(&mut self, rect: Rect) -> Result<Vec<u32>, GpuError> {
        let state = self.state();
        let target = state.target_size;
        if !rect.fits_within(target) {
            return Err(GpuError::Code(GL_INVALID_VALUE));
        }
        let width = target.width as usize;
        let mut out = Vec::with_capacity(rect.size().area());
        for row in 0..rect.height {
            let y = (target.height - (rect.y + row) - 1) as usize;
            let start = y * width + rect.x as usize;
            out.extend_from_slice(&state.back[start..start + rect.width as usize]);
        }
        Ok(out)
    }

    fn swap_buffers(&mut self) -> Result<(), GpuError> {
        let wait = {
            let mut state = self.state();
            state.swaps += 1;
            let snapshot = (state.back.clone(), state.target_size);
            state.presented = Some(snapshot);
            match state.faults.vsync {
                Some(vsync) if state.swap_interval > 0 => {
                    let now = state.epoch.elapsed().as_secs_f64() * 1000.0;
                    let ready = now + vsync.present_cost_ms;
                    let next = ((ready / vsync.period_ms).floor() + 1.0) * vsync.period_ms;
                    Some(next - now)
                }
                _ => None,
            }
        };
        // Sleep outside the lock so inspectors never wait on a vblank
        if let Some(ms) = wait {
            std::thread::sleep(Duration::from_secs_f64(ms / 1000.0));
        }
        Ok(())
    }

    fn finish(&mut self) {}

    fn take_error(&mut self) -> Option<GpuError> {
        let mut state = self.state();
        if let Some(after) = state.faults.error_after_frames {
            if state.swaps > after {
                return Some(GpuError::Code(GL_INVALID_OPERATION));
            }
        }
        state.pending_error.take()
    }
}

/// Window surface that keeps the last presented frame
#[derive(Clone, Default)]
pub struct HeadlessSurface {
    state: Arc<Mutex<HeadlessSurfaceState>>,
}

#[derive(Default)]
struct HeadlessSurfaceState {
    frames: u64,
    last: Option<(Vec<u32>, Size)>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HeadlessSurfaceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn frames(&self) -> u64 {
        self.state().frames
    }

    pub fn last_frame(&self) -> Option<(Vec<u32>, Size)> {
        self.state().last.clone()
    }
}

impl SoftwareSurface for HeadlessSurface {
    fn present(&mut self, frame: &[u32], size: Size) -> Result<(), BackendError> {
        let mut state = self.state();
        state.frames += 1;
        match &mut state.last {
            Some((pixels, last_size)) => {
                pixels.clear();
                pixels.extend_from_slice(frame);
                *last_size = size;
            }
            None => state.last = Some((frame.to_vec(), size)),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "headless"
    }
}
