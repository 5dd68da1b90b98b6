//! ddpresent window frontend
//!
//! Hosts a [`present_core::session::PresentSession`] in a desktop window: frames from the
//! software backend travel over a channel to the window thread, which also feeds focus,
//! size and hotkey input back into the session.

pub mod demo;
pub mod settings;
pub mod window_backend;
