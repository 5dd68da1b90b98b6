use super::{PresentedFrame, WindowBackend};
use crate::settings::Hotkeys;
use present_core::config::FPS_STEP;
use present_core::session::{PresentSession, SessionEvent};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Longest wait for a frame before pumping window events anyway
const FRAME_WAIT: Duration = Duration::from_millis(16);

/// Drives the window from the window thread
pub struct WindowPresenter<W: WindowBackend> {
    window: W,
    hotkeys: Hotkeys,
    focused: bool,
    size: (usize, usize),
    shown: u64,
}

impl<W: WindowBackend> WindowPresenter<W> {
    pub fn new(window: W, hotkeys: Hotkeys) -> Self {
        Self {
            window,
            hotkeys,
            focused: true,
            size: (0, 0),
            shown: 0,
        }
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    /// Frames put on screen so far
    pub fn frames_shown(&self) -> u64 {
        self.shown
    }

    /// Show the newest frame and forward window input. Returns `false` once the window
    /// should close.
    pub fn pump(&mut self, session: &PresentSession, frames: &Receiver<PresentedFrame>) -> bool {
        if !self.window.is_open() || self.pressed(self.hotkeys.quit) {
            return false;
        }

        let mut latest = match frames.recv_timeout(FRAME_WAIT) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => return false,
        };
        loop {
            match frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return false,
            }
        }

        match latest {
            Some(frame) => {
                let (width, height) = (frame.size.width as usize, frame.size.height as usize);
                if let Err(e) = self.window.update_with_buffer(&frame.pixels, width, height) {
                    log::error!("Failed to update {} window: {}", self.window.name(), e);
                    return false;
                }
                self.shown += 1;
            }
            None => self.window.update(),
        }

        self.forward_window_state(session);
        self.handle_hotkeys(session);
        self.handle_events(session);
        true
    }

    fn pressed(&self, key: Option<super::Key>) -> bool {
        key.is_some_and(|key| self.window.is_key_pressed(key))
    }

    fn forward_window_state(&mut self, session: &PresentSession) {
        let size = self.window.get_size();
        if size != self.size && size.0 > 0 && size.1 > 0 {
            self.size = size;
            session.set_window_size(size.0 as u32, size.1 as u32);
        }
        let focused = self.window.is_active();
        if focused != self.focused {
            self.focused = focused;
            session.notify_focus_changed(focused);
        }
    }

    fn handle_hotkeys(&mut self, session: &PresentSession) {
        if self.pressed(self.hotkeys.toggle_fps) {
            let shown = session.toggle_fps_overlay();
            log::info!("FPS overlay {}", if shown { "on" } else { "off" });
        }
        if self.pressed(self.hotkeys.faster) {
            log::info!("Target rate {:.0} fps", session.adjust_target_fps(FPS_STEP));
        }
        if self.pressed(self.hotkeys.slower) {
            log::info!("Target rate {:.0} fps", session.adjust_target_fps(-FPS_STEP));
        }
        if self.pressed(self.hotkeys.switch_backend) {
            log::info!("Switching to the software backend");
            session.request_backend_switch();
        }
    }

    fn handle_events(&mut self, session: &PresentSession) {
        for event in session.events().try_iter() {
            match event {
                SessionEvent::ReactivateWindow => self.window.reactivate(),
                SessionEvent::BackendSwitched { reason } => {
                    log::warn!("Presentation backend switched ({:?})", reason)
                }
                SessionEvent::BackendReady(caps) => log::info!("Backend ready: {}", caps.label()),
                SessionEvent::Stopped { frames } => {
                    log::info!("Render thread stopped after {} frames", frames)
                }
            }
        }
    }
}
