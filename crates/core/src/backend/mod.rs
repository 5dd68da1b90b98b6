//! Presentation backends
//!
//! A backend takes the shared framebuffer once per frame and puts it on screen. Two
//! implementations exist and the render loop may swap between them at runtime:
//!
//! - **SoftwareBackend**: CPU blit (1:1 or nearest-neighbour stretch) into a 32-bit
//!   target handed to a [`software::SoftwareSurface`]. Always available.
//! - **GpuBackend**: texture upload and a textured quad through a
//!   [`gpu::GpuDevice`], probing capability levels at init.
//!
//! # Frame protocol
//!
//! ```text
//! begin_frame() -> WritableRegion     (ring slot the producer writes next)
//! composite(frame, layout, overlay)   (framebuffer mutex held)
//! present()                           (mutex released, may block on vsync)
//! ```

use crate::framebuffer::{FrameAccess, SurfaceDesc};
use crate::geometry::Layout;
use crate::types::Size;
use serde::Serialize;
use thiserror::Error;

pub mod gpu;
pub mod headless;
pub mod software;

pub use crate::framebuffer::WritableRegion;
pub use gpu::{GpuBackend, GpuDevice};
pub use software::{SoftwareBackend, SoftwareSurface};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Setup failed before steady state; the session continues on software
    #[error("Backend initialization failed: {0}")]
    InitFailed(String),
    /// Error during steady-state composite or present
    #[error("Backend runtime failure: {0}")]
    RuntimeFailure(String),
    /// The presentation target went away (window closed)
    #[error("Presentation surface lost: {0}")]
    SurfaceLost(String),
}

/// Device-level GPU failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    #[error("GL error 0x{0:04X}")]
    Code(u32),
    #[error("Shader compilation failed: {0}")]
    Shader(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendKind {
    Software,
    Gpu,
}

/// GPU pipeline level that initialized successfully, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineLevel {
    /// RG8 upload converted to RGB by a shader, vertex array quad
    Converted,
    /// RGB565 upload drawn by a passthrough shader, vertex array quad
    Direct,
    /// RGB565 upload, fixed-function quad per draw
    Immediate,
}

impl PipelineLevel {
    /// Number shown in the diagnostic label
    pub fn number(self) -> u8 {
        match self {
            PipelineLevel::Converted => 2,
            PipelineLevel::Direct => 1,
            PipelineLevel::Immediate => 0,
        }
    }

    pub fn uses_shaders(self) -> bool {
        self != PipelineLevel::Immediate
    }
}

/// What an initialized backend can do
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capabilities {
    pub kind: BackendKind,
    /// `present()` blocks for vsync, so pacing must estimate around it
    pub hardware_paced: bool,
    pub pipeline: Option<PipelineLevel>,
    /// Active transfer-buffer ring depth, 0 when uploads are synchronous
    pub transfer_buffers: usize,
    pub texture_size: Option<Size>,
    /// Display refresh rate in Hz, when the device reports one
    pub refresh_rate: Option<f64>,
}

impl Capabilities {
    pub fn software() -> Self {
        Self {
            kind: BackendKind::Software,
            hardware_paced: false,
            pipeline: None,
            transfer_buffers: 0,
            texture_size: None,
            refresh_rate: None,
        }
    }

    /// Label used in the diagnostic overlay
    pub fn label(&self) -> String {
        match (self.kind, self.pipeline) {
            (BackendKind::Gpu, Some(level)) => format!("GPU{}", level.number()),
            (BackendKind::Gpu, None) => "GPU".to_string(),
            (BackendKind::Software, _) => "Software".to_string(),
        }
    }
}

/// A presentation backend driven by the render loop.
///
/// Backends are created and used on the render thread only.
pub trait Backend {
    /// Acquire device resources for a surface of the given shape
    fn init(&mut self, surface: SurfaceDesc) -> Result<Capabilities, BackendError>;

    /// Region the producer should write for the coming frame
    fn begin_frame(&mut self) -> WritableRegion {
        WritableRegion::SINGLE
    }

    /// Move the current framebuffer contents to the presentation target
    fn composite(
        &mut self,
        frame: &mut FrameAccess<'_>,
        layout: &Layout,
        overlay: Option<&str>,
    ) -> Result<(), BackendError>;

    /// Show the composited frame; may block for vsync
    fn present(&mut self) -> Result<(), BackendError>;

    /// Release all device resources
    fn shutdown(&mut self);

    /// Layout changed: clear the target and refresh the whole image next frame
    fn invalidate(&mut self);

    /// Window regained focus: re-acquire anything released while inactive
    fn focus_regained(&mut self) -> Result<(), BackendError> {
        self.invalidate();
        Ok(())
    }

    fn kind(&self) -> BackendKind;

    /// Get the name of this backend (for logs/diagnostics)
    fn name(&self) -> &str;

    fn is_hardware_accelerated(&self) -> bool {
        false
    }
}
