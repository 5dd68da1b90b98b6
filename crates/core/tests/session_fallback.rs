//! End-to-end fallback behaviour of a presentation session
//!
//! Every test drives a real render thread against the headless GPU device, injecting
//! faults at setup or after a number of presented frames.

use present_core::backend::headless::{
    HeadlessDevice, HeadlessFaults, HeadlessSurface, InitStep,
};
use present_core::backend::{BackendKind, GpuDevice, SoftwareSurface};
use present_core::config::PresentConfig;
use present_core::fallback::{FallbackPhase, SwitchReason};
use present_core::logging::{LogCategory, LogConfig, LogLevel};
use present_core::overlay::WARNING_TEXT;
use present_core::session::{
    BackendProvider, DeviceFactory, PresentSession, SessionEvent, SessionStatus,
};
use std::thread;
use std::time::{Duration, Instant};

fn provider(surface: &HeadlessSurface, device: &HeadlessDevice) -> BackendProvider {
    let surface = surface.clone();
    let device = device.clone();
    let factory: DeviceFactory = Box::new(move || Ok(Box::new(device) as Box<dyn GpuDevice>));
    BackendProvider {
        surface: Box::new(move || Ok(Box::new(surface) as Box<dyn SoftwareSurface>)),
        device: Some(factory),
    }
}

fn config() -> PresentConfig {
    PresentConfig {
        target_fps: 250.0,
        swap_interval: 0,
        warning_duration_ms: 150,
        ..Default::default()
    }
}

fn wait_for(session: &PresentSession, what: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = session.status();
        if what(&status) {
            return status;
        }
        assert!(Instant::now() < deadline, "timed out, last status {:?}", status);
        thread::sleep(Duration::from_millis(2));
    }
}

fn switch_events(session: &PresentSession) -> Vec<SessionEvent> {
    session
        .events()
        .try_iter()
        .filter(|e| !matches!(e, SessionEvent::BackendReady(_)))
        .collect()
}

#[test]
fn test_init_failure_shows_warning_then_settles() {
    LogConfig::global().set_level(LogCategory::Fallback, LogLevel::Info);

    let surface = HeadlessSurface::new();
    let device = HeadlessDevice::new(HeadlessFaults {
        fail_step: Some(InitStep::Texture),
        ..Default::default()
    });
    let config = PresentConfig {
        warning_duration_ms: 400,
        ..config()
    };
    let mut session =
        PresentSession::create_primary_surface(64, 48, 128, config, provider(&surface, &device))
            .unwrap();
    assert_eq!(session.capabilities().kind, BackendKind::Software);
    assert_eq!(device.live_resources(), 0);
    session.attach();

    let status = wait_for(&session, |s| s.frames >= 2);
    assert_eq!(status.fallback, FallbackPhase::Degrading);
    assert!(status.warning_visible);
    assert_eq!(status.target_fps, 30.0);

    // The warning's first line is drawn in white at the top-left of the window
    let (frame, size) = surface.last_frame().unwrap();
    assert!(size.width >= 64);
    assert!(frame[..size.width as usize * 8].iter().any(|&px| px & 0xFFFFFF == 0xFFFFFF));
    assert!(WARNING_TEXT.starts_with("-WARNING-"));

    let status = wait_for(&session, |s| s.fallback == FallbackPhase::SoftwareOnly);
    assert!(!status.warning_visible);
    assert_eq!(status.backend, BackendKind::Software);
    session.stop().unwrap();
}

#[test]
fn test_runtime_failure_falls_back_once() {
    let surface = HeadlessSurface::new();
    let device = HeadlessDevice::new(HeadlessFaults {
        error_after_frames: Some(2),
        ..Default::default()
    });
    let mut session =
        PresentSession::create_primary_surface(64, 48, 128, config(), provider(&surface, &device))
            .unwrap();
    assert_eq!(session.capabilities().kind, BackendKind::Gpu);
    session.attach();

    let status = wait_for(&session, |s| s.backend == BackendKind::Software);
    assert!(!status.accelerated);
    assert_eq!(device.live_resources(), 0);

    // Further frames keep presenting through the software surface only
    let presented = surface.frames();
    wait_for(&session, |s| s.frames >= status.frames + 5);
    assert!(surface.frames() > presented);
    assert_eq!(session.status().backend, BackendKind::Software);

    let events = switch_events(&session);
    assert_eq!(
        events,
        vec![
            SessionEvent::BackendSwitched {
                reason: SwitchReason::RuntimeFailure
            },
            SessionEvent::ReactivateWindow
        ]
    );
    session.stop().unwrap();
}

#[test]
fn test_requested_switch_is_one_way() {
    let surface = HeadlessSurface::new();
    let device = HeadlessDevice::new(HeadlessFaults::default());
    let mut session =
        PresentSession::create_primary_surface(64, 48, 128, config(), provider(&surface, &device))
            .unwrap();
    session.attach();
    wait_for(&session, |s| s.frames >= 2 && s.accelerated);

    session.request_backend_switch();
    let status = wait_for(&session, |s| s.backend == BackendKind::Software);
    assert_eq!(status.fallback, FallbackPhase::SoftwareOnly);
    assert!(!status.warning_visible);

    // A second request is a no-op
    session.request_backend_switch();
    wait_for(&session, |s| s.frames >= status.frames + 3);
    let events = switch_events(&session);
    assert_eq!(
        events,
        vec![
            SessionEvent::BackendSwitched {
                reason: SwitchReason::Requested
            },
            SessionEvent::ReactivateWindow
        ]
    );
    assert_eq!(session.status().target_fps, 250.0);
    session.stop().unwrap();
}

#[test]
fn test_auto_fallback_disabled_keeps_gpu() {
    let surface = HeadlessSurface::new();
    let device = HeadlessDevice::new(HeadlessFaults {
        error_after_frames: Some(1),
        ..Default::default()
    });
    let config = PresentConfig {
        auto_fallback: false,
        ..config()
    };
    let mut session =
        PresentSession::create_primary_surface(64, 48, 128, config, provider(&surface, &device))
            .unwrap();
    session.attach();
    let status = wait_for(&session, |s| s.frames >= 10);
    assert_eq!(status.backend, BackendKind::Gpu);
    assert_eq!(status.fallback, FallbackPhase::Healthy);
    session.stop().unwrap();
}
