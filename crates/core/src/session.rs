//! A presentation session: one primary surface plus the render thread that shows it.
//!
//! Startup handshake:
//!
//! 1. `create_primary_surface` spawns the render thread, which builds its backends.
//! 2. The thread reports "backend ready" (or the error) and blocks.
//! 3. The caller finishes its own window setup and calls [`PresentSession::attach`].
//! 4. The loop runs until [`PresentSession::stop`] or drop.

use crate::backend::{
    BackendError, BackendKind, Capabilities, GpuDevice, GpuError, PipelineLevel, SoftwareSurface,
};
use crate::config::PresentConfig;
use crate::fallback::{FallbackPhase, SwitchReason};
use crate::framebuffer::{FramebufferLock, SharedFramebuffer, SurfaceDesc, SurfaceError};
use crate::geometry::Viewport;
use crate::logging::{log, LogCategory, LogLevel};
use crate::pacing::PacingMode;
use crate::render_loop::{LoopControls, LoopSetup, RenderLoop};
use crate::types::{Rect, Size};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Builds the window-side sink on the render thread
pub type SurfaceFactory =
    Box<dyn FnOnce() -> Result<Box<dyn SoftwareSurface>, BackendError> + Send>;

/// Builds the GPU device on the render thread, where its context must live
pub type DeviceFactory = Box<dyn FnOnce() -> Result<Box<dyn GpuDevice>, GpuError> + Send>;

/// Platform collaborators handed to the render thread
pub struct BackendProvider {
    pub surface: SurfaceFactory,
    pub device: Option<DeviceFactory>,
}

impl BackendProvider {
    pub fn software_only(surface: SurfaceFactory) -> Self {
        Self {
            surface,
            device: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid primary surface: {0}")]
    Surface(#[from] SurfaceError),
    #[error("Failed to spawn render thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("No working backend: {0}")]
    NoWorkingBackend(BackendError),
    #[error("Render thread panicked")]
    RenderThreadPanicked,
}

/// Notifications for the window owner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    BackendReady(Capabilities),
    BackendSwitched { reason: SwitchReason },
    /// The window should be re-activated after a backend swap
    ReactivateWindow,
    Stopped { frames: u64 },
}

/// Snapshot published by the render loop after every frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub backend: BackendKind,
    pub pipeline: Option<PipelineLevel>,
    pub accelerated: bool,
    pub stretched: bool,
    pub viewport: Option<Viewport>,
    pub fallback: FallbackPhase,
    pub warning_visible: bool,
    pub focused: bool,
    pub frames: u64,
    pub target_fps: f64,
    pub pacing: PacingMode,
    pub sleep_estimate_ms: f64,
    pub diagnostics: String,
}

impl SessionStatus {
    pub fn starting(target_fps: f64) -> Self {
        Self {
            backend: BackendKind::Software,
            pipeline: None,
            accelerated: false,
            stretched: false,
            viewport: None,
            fallback: FallbackPhase::Healthy,
            warning_visible: false,
            focused: true,
            frames: 0,
            target_fps,
            pacing: PacingMode::Unpaced,
            sleep_estimate_ms: 0.0,
            diagnostics: String::new(),
        }
    }
}

pub struct PresentSession {
    framebuffer: SharedFramebuffer,
    controls: Arc<LoopControls>,
    capabilities: Capabilities,
    events: Receiver<SessionEvent>,
    attach: Option<SyncSender<()>>,
    thread: Option<JoinHandle<u64>>,
}

impl PresentSession {
    /// Create the primary surface and start its render thread.
    ///
    /// Returns once the backend is ready; frames are presented only after [`attach`].
    ///
    /// [`attach`]: PresentSession::attach
    pub fn create_primary_surface(
        width: u32,
        height: u32,
        pitch: u32,
        config: PresentConfig,
        provider: BackendProvider,
    ) -> Result<Self, SessionError> {
        let desc = SurfaceDesc::new(width, height, pitch)?;
        let framebuffer = SharedFramebuffer::new(desc);
        let controls = Arc::new(LoopControls::new(&config));
        let (event_tx, event_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Capabilities, BackendError>>(1);
        let (attach_tx, attach_rx) = mpsc::sync_channel::<()>(1);

        log(LogCategory::Surface, LogLevel::Info, || {
            format!("Creating primary surface {}x{} (pitch {})", width, height, pitch)
        });

        let setup = LoopSetup {
            framebuffer: framebuffer.clone(),
            controls: controls.clone(),
            events: event_tx.clone(),
            config,
        };
        let thread = thread::Builder::new()
            .name("present-render".to_string())
            .spawn(move || {
                let started = (provider.surface)()
                    .and_then(|surface| RenderLoop::start(setup, surface, provider.device));
                let render_loop = match started {
                    Ok(render_loop) => render_loop,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return 0;
                    }
                };
                if ready_tx.send(Ok(render_loop.capabilities().clone())).is_err() {
                    return render_loop.shutdown();
                }
                // The sender is dropped if the session goes away before attaching
                match attach_rx.recv() {
                    Ok(()) => render_loop.run(),
                    Err(_) => render_loop.shutdown(),
                }
            })?;

        let capabilities = match ready_rx.recv() {
            Ok(Ok(capabilities)) => capabilities,
            Ok(Err(err)) => {
                let _ = thread.join();
                log(LogCategory::Backend, LogLevel::Error, || {
                    format!("No backend could be initialized: {}", err)
                });
                return Err(SessionError::NoWorkingBackend(err));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(SessionError::RenderThreadPanicked);
            }
        };
        log(LogCategory::Backend, LogLevel::Info, || {
            format!("Backend ready: {}", capabilities.label())
        });
        let _ = event_tx.send(SessionEvent::BackendReady(capabilities.clone()));

        Ok(Self {
            framebuffer,
            controls,
            capabilities,
            events: event_rx,
            attach: Some(attach_tx),
            thread: Some(thread),
        })
    }

    /// Signal that the window is set up; the render loop starts presenting
    pub fn attach(&mut self) {
        if let Some(attach) = self.attach.take() {
            let _ = attach.send(());
        }
    }

    /// Capabilities of the backend chosen at startup
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Handle for producer threads
    pub fn framebuffer(&self) -> SharedFramebuffer {
        self.framebuffer.clone()
    }

    pub fn lock(&self, region: Option<Rect>) -> Result<FramebufferLock<'_>, SurfaceError> {
        self.framebuffer.lock(region)
    }

    pub fn set_display_mode(&self, width: u32, height: u32, bpp: u32) -> Result<(), SurfaceError> {
        self.framebuffer.set_display_mode(width, height, bpp)
    }

    pub fn set_window_size(&self, width: u32, height: u32) {
        self.controls.set_window_size(Size::new(width, height));
    }

    pub fn notify_focus_changed(&self, gained: bool) {
        self.controls.notify_focus_changed(gained);
    }

    /// Ask the render thread to drop the GPU backend for good
    pub fn request_backend_switch(&self) {
        self.controls.request_backend_switch();
    }

    pub fn set_target_fps(&self, fps: f64) {
        self.controls.tunables.set_target_fps(fps);
    }

    pub fn adjust_target_fps(&self, delta: f64) -> f64 {
        self.controls.tunables.adjust_target_fps(delta)
    }

    pub fn toggle_fps_overlay(&self) -> bool {
        self.controls.tunables.toggle_show_fps()
    }

    pub fn diagnostics(&self) -> String {
        self.controls.status().diagnostics
    }

    pub fn is_accelerated(&self) -> bool {
        self.controls.status().accelerated
    }

    pub fn is_stretched(&self) -> bool {
        self.controls.status().stretched
    }

    pub fn status(&self) -> SessionStatus {
        self.controls.status()
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Stop the render thread and wait for it. Returns the number of frames presented.
    pub fn stop(mut self) -> Result<u64, SessionError> {
        self.join()
    }

    fn join(&mut self) -> Result<u64, SessionError> {
        self.controls.request_stop();
        self.attach = None;
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| SessionError::RenderThreadPanicked),
            None => Ok(0),
        }
    }
}

impl Drop for PresentSession {
    fn drop(&mut self) {
        if let Err(err) = self.join() {
            log(LogCategory::Render, LogLevel::Error, || err.to_string());
        }
    }
}
