//! The per-surface render loop.
//!
//! One iteration:
//!
//! ```text
//! apply controls (stop, switch request, focus edge, window size)
//! fallback tick, tunable snapshot
//! begin_frame -> lock framebuffer -> composite -> unlock
//! present (mutex released, may block on vsync)
//! backend error -> FallbackPolicy
//! measure -> FrameHistory -> PacingController window
//! pace
//! ```

use crate::backend::gpu::GpuSettings;
use crate::backend::{
    Backend, BackendError, BackendKind, Capabilities, GpuBackend, SoftwareBackend,
    SoftwareSurface,
};
use crate::clock::{FrameClock, FrameHistory};
use crate::config::{frame_len, LiveTunables, PresentConfig, TunableSnapshot};
use crate::fallback::{FallbackAction, FallbackPolicy, SwitchReason};
use crate::framebuffer::SharedFramebuffer;
use crate::geometry::GeometryResolver;
use crate::logging::{log, LogCategory, LogLevel};
use crate::overlay::{diagnostic_text, WARNING_TEXT};
use crate::pacing::{PacingController, PacingMode};
use crate::session::{DeviceFactory, SessionEvent, SessionStatus};
use crate::types::Size;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Signals from other threads, read by the loop at the top of each frame
#[derive(Debug)]
pub struct LoopControls {
    pub tunables: LiveTunables,
    stop: AtomicBool,
    switch_requested: AtomicBool,
    focus: Mutex<Option<bool>>,
    window_size: Mutex<Option<Size>>,
    status: Mutex<SessionStatus>,
}

impl LoopControls {
    pub fn new(config: &PresentConfig) -> Self {
        Self {
            tunables: LiveTunables::from_config(config),
            stop: AtomicBool::new(false),
            switch_requested: AtomicBool::new(false),
            focus: Mutex::new(None),
            window_size: Mutex::new(None),
            status: Mutex::new(SessionStatus::starting(config.target_fps)),
        }
    }

    /// End the loop after the current frame
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_backend_switch(&self) {
        self.switch_requested.store(true, Ordering::Release);
    }

    pub fn notify_focus_changed(&self, gained: bool) {
        *lock_recover(&self.focus) = Some(gained);
    }

    pub fn set_window_size(&self, size: Size) {
        *lock_recover(&self.window_size) = Some(size);
    }

    pub fn status(&self) -> SessionStatus {
        lock_recover(&self.status).clone()
    }

    fn take_switch_request(&self) -> bool {
        self.switch_requested.swap(false, Ordering::AcqRel)
    }

    fn take_focus_change(&self) -> Option<bool> {
        lock_recover(&self.focus).take()
    }

    fn take_window_size(&self) -> Option<Size> {
        lock_recover(&self.window_size).take()
    }

    fn publish(&self, status: SessionStatus) {
        *lock_recover(&self.status) = status;
    }
}

/// Everything the loop needs besides the backends
pub struct LoopSetup {
    pub framebuffer: SharedFramebuffer,
    pub controls: Arc<LoopControls>,
    pub events: Sender<SessionEvent>,
    pub config: PresentConfig,
}

/// Values overridden while the window is in the background
#[derive(Debug, Default)]
struct BackgroundOverride {
    target_fps: Option<f64>,
    show_fps: Option<bool>,
}

pub struct RenderLoop {
    framebuffer: SharedFramebuffer,
    controls: Arc<LoopControls>,
    events: Sender<SessionEvent>,
    config: PresentConfig,
    software: SoftwareBackend,
    gpu: Option<GpuBackend>,
    active: BackendKind,
    caps: Capabilities,
    geometry: GeometryResolver,
    clock: FrameClock,
    history: FrameHistory,
    pacing: PacingController,
    fallback: FallbackPolicy,
    background: BackgroundOverride,
    focused: bool,
    running: bool,
    frames: u64,
    diagnostics: String,
}

impl RenderLoop {
    /// Initialize the backends on the calling (render) thread.
    ///
    /// Only a software backend failure is an error; a GPU failure degrades to software.
    pub fn start(
        setup: LoopSetup,
        surface: Box<dyn SoftwareSurface>,
        device: Option<DeviceFactory>,
    ) -> Result<Self, BackendError> {
        let LoopSetup {
            framebuffer,
            controls,
            events,
            config,
        } = setup;
        let desc = framebuffer.desc();

        let mut software = SoftwareBackend::new(surface);
        let software_caps = software.init(desc)?;
        let mut fallback = FallbackPolicy::from_config(&config);

        let mut gpu = None;
        let mut caps = software_caps.clone();
        let mut init_failure = None;
        if let (true, Some(factory)) = (config.prefer_gpu, device) {
            let attempt = factory()
                .map_err(|e| BackendError::InitFailed(format!("device: {}", e)))
                .and_then(|device| {
                    let mut backend = GpuBackend::new(device, GpuSettings::from(&config));
                    backend.init(desc).map(|caps| (backend, caps))
                });
            match attempt {
                Ok((backend, gpu_caps)) => {
                    gpu = Some(backend);
                    caps = gpu_caps;
                }
                Err(err) => {
                    log(LogCategory::Backend, LogLevel::Error, || {
                        format!("GPU backend unavailable, using software: {}", err)
                    });
                    init_failure = fallback.on_failure(SwitchReason::InitFailed, Instant::now());
                }
            }
        }

        if let Some(FallbackAction {
            lower_fps_to: Some(fps),
            ..
        }) = init_failure
        {
            controls.tunables.set_target_fps(fps);
        }

        if caps.hardware_paced && config.use_display_refresh {
            if let Some(hz) = caps.refresh_rate.filter(|hz| *hz > 0.0) {
                log(LogCategory::Pacing, LogLevel::Info, || {
                    format!("Adopting display refresh rate {:.2} Hz as target", hz)
                });
                controls.tunables.set_target_fps(hz);
            }
        }

        let geometry = GeometryResolver::new(
            framebuffer.display_size(),
            desc.size(),
            config.scaling_policy(),
        );
        let pacing = PacingController::new(frame_len(controls.tunables.target_fps()));
        let active = caps.kind;

        Ok(Self {
            framebuffer,
            controls,
            events,
            config,
            software,
            gpu,
            active,
            caps,
            geometry,
            clock: FrameClock::new(),
            history: FrameHistory::new(),
            pacing,
            fallback,
            background: BackgroundOverride::default(),
            focused: true,
            running: true,
            frames: 0,
            diagnostics: String::new(),
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn backend(&mut self) -> &mut dyn Backend {
        match (self.active, self.gpu.as_mut()) {
            (BackendKind::Gpu, Some(gpu)) => gpu,
            _ => &mut self.software,
        }
    }

    /// Run until stopped, then release every backend. Returns the frame count.
    pub fn run(mut self) -> u64 {
        log(LogCategory::Render, LogLevel::Info, || {
            format!("Render loop started on {}", self.caps.label())
        });
        self.clock.start();
        while self.run_frame() {}
        self.shutdown()
    }

    /// Release the backends without running; returns the frame count
    pub fn shutdown(mut self) -> u64 {
        if let Some(mut gpu) = self.gpu.take() {
            gpu.shutdown();
        }
        self.software.shutdown();
        log(LogCategory::Render, LogLevel::Info, || {
            format!("Render loop stopped after {} frames", self.frames)
        });
        let _ = self.events.send(SessionEvent::Stopped {
            frames: self.frames,
        });
        self.frames
    }

    /// One full frame. Returns `false` once the loop should exit.
    pub fn run_frame(&mut self) -> bool {
        if !self.running || self.controls.stop_requested() {
            return false;
        }
        let now = Instant::now();
        self.apply_controls(now);
        self.fallback.tick(now);

        let snapshot = self.controls.tunables.snapshot();
        if self.pacing.set_target(snapshot.target_frame_len()) {
            // Start the new search from an empty window
            self.history.clear();
        }
        let mode = PacingMode::for_backend(self.caps.hardware_paced);
        let overlay = self.overlay_text(snapshot, now);

        let region = self.backend().begin_frame();
        let composited = {
            let framebuffer = self.framebuffer.clone();
            let mut access = framebuffer.access();
            access.select(region);
            if let Some(display) = access.take_mode_change() {
                self.geometry.set_logical(display);
                self.geometry.invalidate();
            }
            if self.geometry.take_invalidated() {
                self.backend().invalidate();
            }
            let layout = *self.geometry.layout();
            let result = self
                .backend()
                .composite(&mut access, &layout, overlay.as_deref());
            result
        };
        let result = composited.and_then(|_| self.backend().present());
        if let Err(err) = result {
            self.handle_backend_error(err, now);
        }

        let work = self.clock.elapsed();
        let wrapped = self.history.push(work);
        self.frames += 1;
        if mode == PacingMode::Paced && wrapped {
            if let Some(avg) = self.history.average() {
                self.pacing.observe_window(avg);
            }
        }
        self.publish_status(snapshot, mode, now);

        match mode {
            PacingMode::Paced => {
                // Only the work and the vsync block are measured, not the sleep
                self.pacing.wait(mode, &FrameClock::new());
            }
            PacingMode::Unpaced => self.pacing.wait(mode, &self.clock),
        }
        self.clock.start();
        self.running
    }

    fn apply_controls(&mut self, now: Instant) {
        if self.controls.take_switch_request() {
            if self.gpu.is_some() {
                if let Some(action) = self.fallback.on_failure(SwitchReason::Requested, now) {
                    self.switch_to_software(action);
                }
            } else {
                log(LogCategory::Fallback, LogLevel::Debug, || {
                    "Backend switch requested while already on software".to_string()
                });
            }
        }
        if let Some(gained) = self.controls.take_focus_change() {
            self.on_focus_changed(gained);
        }
        if let Some(size) = self.controls.take_window_size() {
            self.geometry.set_available(size);
        }
    }

    fn on_focus_changed(&mut self, gained: bool) {
        if gained == self.focused {
            return;
        }
        self.focused = gained;
        let tunables = &self.controls.tunables;
        if gained {
            if let Some(fps) = self.background.target_fps.take() {
                tunables.set_target_fps(fps);
            }
            if let Some(show) = self.background.show_fps.take() {
                tunables.set_show_fps(show);
            }
            self.geometry.invalidate();
            if let Err(err) = self.backend().focus_regained() {
                self.handle_backend_error(err, Instant::now());
            }
        } else {
            if let Some(fps) = self.config.background_fps {
                self.background.target_fps = Some(tunables.target_fps());
                tunables.set_target_fps(fps);
            }
            self.background.show_fps = Some(tunables.show_fps());
            tunables.set_show_fps(false);
        }
        log(LogCategory::Render, LogLevel::Debug, || {
            format!("Window focus {}", if gained { "gained" } else { "lost" })
        });
    }

    fn handle_backend_error(&mut self, err: BackendError, now: Instant) {
        match (&err, self.active) {
            (BackendError::SurfaceLost(_), _) => {
                log(LogCategory::Render, LogLevel::Warn, || err.to_string());
                self.running = false;
            }
            (_, BackendKind::Gpu) => {
                if let Some(action) = self.fallback.on_failure(SwitchReason::RuntimeFailure, now) {
                    self.switch_to_software(action);
                }
            }
            (_, BackendKind::Software) => {
                log(LogCategory::Render, LogLevel::Warn, || {
                    format!("Software present failed: {}", err)
                });
            }
        }
    }

    /// One-way swap to the software backend
    fn switch_to_software(&mut self, action: FallbackAction) {
        if let Some(mut gpu) = self.gpu.take() {
            gpu.shutdown();
        }
        self.active = BackendKind::Software;
        self.caps = Capabilities::software();
        self.software.invalidate();
        self.geometry.invalidate();
        self.history.clear();

        if let Some(fps) = action.lower_fps_to {
            if self.background.target_fps.is_some() {
                self.background.target_fps = Some(fps);
            } else {
                self.controls.tunables.set_target_fps(fps);
            }
        }
        log(LogCategory::Fallback, LogLevel::Warn, || {
            format!("Now presenting with the software backend ({:?})", action.reason)
        });
        let _ = self.events.send(SessionEvent::BackendSwitched {
            reason: action.reason,
        });
        let _ = self.events.send(SessionEvent::ReactivateWindow);
    }

    fn overlay_text(&self, snapshot: TunableSnapshot, now: Instant) -> Option<String> {
        let warning = self.fallback.warning_visible(now);
        match (warning, snapshot.show_fps && !self.diagnostics.is_empty()) {
            (true, true) => Some(format!("{}\n{}", WARNING_TEXT, self.diagnostics)),
            (true, false) => Some(WARNING_TEXT.to_string()),
            (false, true) => Some(self.diagnostics.clone()),
            (false, false) => None,
        }
    }

    fn publish_status(&mut self, snapshot: TunableSnapshot, mode: PacingMode, now: Instant) {
        let target_len = snapshot.target_frame_len();
        self.diagnostics = diagnostic_text(
            &self.caps.label(),
            self.history.display_fps(target_len),
            snapshot.target_fps,
            self.history.average().unwrap_or(0.0),
        );
        let layout = self.geometry.layout();
        self.controls.publish(SessionStatus {
            backend: self.active,
            pipeline: self.caps.pipeline,
            accelerated: self.active == BackendKind::Gpu,
            stretched: layout.viewport.stretched,
            viewport: Some(layout.viewport),
            fallback: self.fallback.phase(),
            warning_visible: self.fallback.warning_visible(now),
            focused: self.focused,
            frames: self.frames,
            target_fps: snapshot.target_fps,
            pacing: mode,
            sleep_estimate_ms: self.pacing.sleep_estimate(),
            diagnostics: self.diagnostics.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessDevice, HeadlessFaults, HeadlessSurface, VsyncModel};
    use crate::fallback::FallbackPhase;
    use crate::framebuffer::SurfaceDesc;
    use crate::geometry::ScalingMode;
    use std::sync::mpsc::{channel, Receiver};

    struct Harness {
        render_loop: RenderLoop,
        controls: Arc<LoopControls>,
        events: Receiver<SessionEvent>,
        framebuffer: SharedFramebuffer,
    }

    fn harness(config: PresentConfig, device: Option<HeadlessDevice>) -> Harness {
        let framebuffer = SharedFramebuffer::new(SurfaceDesc::new(32, 16, 64).unwrap());
        let controls = Arc::new(LoopControls::new(&config));
        let (tx, rx) = channel();
        let factory: Option<DeviceFactory> = device.map(|device| -> DeviceFactory {
            Box::new(move || Ok(Box::new(device) as Box<dyn crate::backend::GpuDevice>))
        });
        let render_loop = RenderLoop::start(
            LoopSetup {
                framebuffer: framebuffer.clone(),
                controls: controls.clone(),
                events: tx,
                config,
            },
            Box::new(HeadlessSurface::new()),
            factory,
        )
        .unwrap();
        Harness {
            render_loop,
            controls,
            events: rx,
            framebuffer,
        }
    }

    fn fast() -> PresentConfig {
        PresentConfig {
            target_fps: 1000.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_software_only_frames() {
        let mut h = harness(fast(), None);
        for _ in 0..3 {
            assert!(h.render_loop.run_frame());
        }
        let status = h.controls.status();
        assert_eq!(status.backend, BackendKind::Software);
        assert_eq!(status.frames, 3);
        assert!(!status.accelerated);
        assert!(status.diagnostics.starts_with("Software\nFPS:"));
    }

    #[test]
    fn test_gpu_runtime_failure_switches_once() {
        let faults = HeadlessFaults {
            error_after_frames: Some(1),
            ..Default::default()
        };
        let mut h = harness(fast(), Some(HeadlessDevice::new(faults)));
        assert_eq!(h.render_loop.capabilities().kind, BackendKind::Gpu);

        h.render_loop.run_frame();
        assert_eq!(h.controls.status().backend, BackendKind::Gpu);
        h.render_loop.run_frame();

        let status = h.controls.status();
        assert_eq!(status.backend, BackendKind::Software);
        assert_eq!(status.fallback, FallbackPhase::Degrading);
        assert!(status.warning_visible);
        assert_eq!(h.controls.tunables.target_fps(), 30.0);

        let events: Vec<SessionEvent> = h.events.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::BackendSwitched {
                    reason: SwitchReason::RuntimeFailure
                },
                SessionEvent::ReactivateWindow
            ]
        );

        // Later frames never go back to the GPU
        h.controls.tunables.set_target_fps(1000.0);
        for _ in 0..5 {
            h.render_loop.run_frame();
            assert_eq!(h.controls.status().backend, BackendKind::Software);
        }
        assert!(h.events.try_iter().next().is_none());
    }

    #[test]
    fn test_requested_switch_has_no_warning() {
        let mut h = harness(fast(), Some(HeadlessDevice::new(HeadlessFaults::default())));
        h.render_loop.run_frame();
        h.controls.request_backend_switch();
        h.render_loop.run_frame();
        let status = h.controls.status();
        assert_eq!(status.backend, BackendKind::Software);
        assert_eq!(status.fallback, FallbackPhase::SoftwareOnly);
        assert!(!status.warning_visible);
        assert_eq!(h.controls.tunables.target_fps(), 1000.0);
    }

    #[test]
    fn test_focus_throttles_and_restores() {
        let config = PresentConfig {
            show_fps: true,
            background_fps: Some(500.0),
            ..fast()
        };
        let mut h = harness(config, None);
        h.render_loop.run_frame();

        h.controls.notify_focus_changed(false);
        h.render_loop.run_frame();
        assert_eq!(h.controls.tunables.target_fps(), 500.0);
        assert!(!h.controls.tunables.show_fps());
        assert!(!h.controls.status().focused);

        h.controls.notify_focus_changed(true);
        h.render_loop.run_frame();
        assert_eq!(h.controls.tunables.target_fps(), 1000.0);
        assert!(h.controls.tunables.show_fps());
    }

    #[test]
    fn test_window_size_and_display_mode_update_geometry() {
        let config = PresentConfig {
            scaling: ScalingMode::AspectPreserve,
            ..fast()
        };
        let mut h = harness(config, None);
        h.controls.set_window_size(Size::new(64, 64));
        h.render_loop.run_frame();
        let viewport = h.controls.status().viewport.unwrap();
        assert_eq!((viewport.width, viewport.height), (64, 32));
        assert!(h.controls.status().stretched);

        h.framebuffer.set_display_mode(16, 16, 16).unwrap();
        h.render_loop.run_frame();
        let viewport = h.controls.status().viewport.unwrap();
        assert_eq!((viewport.width, viewport.height), (64, 64));
    }

    #[test]
    fn test_vsync_adopts_refresh_rate() {
        let faults = HeadlessFaults {
            vsync: Some(VsyncModel::from_hz(200.0)),
            ..Default::default()
        };
        let config = PresentConfig {
            swap_interval: 1,
            ..fast()
        };
        let mut h = harness(config, Some(HeadlessDevice::new(faults)));
        assert!(h.render_loop.capabilities().hardware_paced);
        assert!((h.controls.tunables.target_fps() - 200.0).abs() < 1e-9);
        h.render_loop.run_frame();
        assert_eq!(h.controls.status().pacing, PacingMode::Paced);
    }

    #[test]
    fn test_vsync_search_settles_below_present_cost() {
        let faults = HeadlessFaults {
            vsync: Some(VsyncModel::from_hz(100.0).with_present_cost(2.0)),
            ..Default::default()
        };
        let config = PresentConfig {
            swap_interval: 1,
            ..fast()
        };
        let mut h = harness(config, Some(HeadlessDevice::new(faults)));
        h.render_loop.history = FrameHistory::with_capacity(8);
        assert!((h.render_loop.pacing.target_frame_len() - 10.0).abs() < 1e-9);

        for _ in 0..600 {
            h.render_loop.run_frame();
            let state = *h.render_loop.pacing.state();
            assert!(
                state.sleep_estimate >= state.floor_bound - 1e-9
                    && state.sleep_estimate <= state.ceiling_bound + 1e-9,
                "{:?}",
                state
            );
            if h.render_loop.pacing.is_converged() {
                break;
            }
        }
        assert!(h.render_loop.pacing.is_converged());

        // Sleeping past 10 - 2 ms misses the vblank, so the search settles just below it
        let sleep = h.controls.status().sleep_estimate_ms;
        assert!(sleep <= 8.1 && sleep >= 6.0, "sleep {} ms", sleep);
    }

    #[test]
    fn test_target_change_clears_history() {
        let mut h = harness(fast(), None);
        for _ in 0..3 {
            h.render_loop.run_frame();
        }
        assert_eq!(h.render_loop.history.len(), 3);

        h.controls.tunables.set_target_fps(500.0);
        h.render_loop.run_frame();
        assert_eq!(h.render_loop.history.len(), 1);
        h.render_loop.run_frame();
        assert_eq!(h.render_loop.history.len(), 2);
    }

    #[test]
    fn test_stop_ends_loop() {
        let h = harness(fast(), None);
        h.controls.request_stop();
        let frames = h.render_loop.run();
        assert_eq!(frames, 0);
        assert_eq!(
            h.events.try_iter().last(),
            Some(SessionEvent::Stopped { frames: 0 })
        );
    }
}
