use present_core::backend::{BackendError, SoftwareSurface};
use present_core::types::Size;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

/// One composited frame on its way to the window
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    pub pixels: Vec<u32>,
    pub size: Size,
}

/// Software surface that hands frames to the window thread.
///
/// Never blocks the render thread: a frame that does not fit the queue is dropped.
pub struct ChannelSurface {
    tx: SyncSender<PresentedFrame>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSurface {
    /// Shared counter of frames dropped because the window fell behind
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

/// Create a surface and the receiver the window thread drains
pub fn channel_surface(depth: usize) -> (ChannelSurface, Receiver<PresentedFrame>) {
    let (tx, rx) = sync_channel(depth.max(1));
    (
        ChannelSurface {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl SoftwareSurface for ChannelSurface {
    fn present(&mut self, frame: &[u32], size: Size) -> Result<(), BackendError> {
        let frame = PresentedFrame {
            pixels: frame.to_vec(),
            size,
        };
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(BackendError::SurfaceLost(
                "window closed".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "channel"
    }
}
