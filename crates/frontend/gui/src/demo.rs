//! Demo producer: animates the primary surface from its own thread, the way a legacy
//! application writes through Lock/Unlock while the render thread presents.

use present_core::framebuffer::{rgb565, FramebufferLock, SharedFramebuffer};
use present_core::types::{Rect, Size};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const BARS: [u16; 8] = [
    rgb565(255, 255, 255),
    rgb565(255, 255, 0),
    rgb565(0, 255, 255),
    rgb565(0, 255, 0),
    rgb565(255, 0, 255),
    rgb565(255, 0, 0),
    rgb565(0, 0, 255),
    rgb565(0, 0, 0),
];

const BOX_SIZE: u32 = 32;

/// Draw color bars with a box bouncing across them
pub fn draw_frame(lock: &mut FramebufferLock<'_>, display: Size, frame: u64) {
    if display.is_empty() {
        return;
    }
    let bar_width = (display.width / BARS.len() as u32).max(1);
    for (i, color) in BARS.iter().enumerate() {
        let x = i as u32 * bar_width;
        lock.fill_rect(Rect::new(x, 0, bar_width, display.height), *color);
    }

    let travel_x = display.width.saturating_sub(BOX_SIZE).max(1) as u64;
    let travel_y = display.height.saturating_sub(BOX_SIZE).max(1) as u64;
    let bounce = |t: u64, span: u64| {
        let t = t % (span * 2);
        (if t < span { t } else { span * 2 - t }) as u32
    };
    let x = bounce(frame * 3, travel_x);
    let y = bounce(frame * 2, travel_y);
    lock.fill_rect(Rect::new(x, y, BOX_SIZE, BOX_SIZE), rgb565(255, 128, 0));
}

/// Background thread writing frames at a fixed rate
pub struct DemoProducer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl DemoProducer {
    pub fn spawn(framebuffer: SharedFramebuffer, fps: f64) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let period = Duration::from_secs_f64(1.0 / fps.max(1.0));
        let handle = thread::Builder::new()
            .name("demo-producer".to_string())
            .spawn(move || {
                let mut frame = 0u64;
                while !flag.load(Ordering::Relaxed) {
                    let start = Instant::now();
                    let display = framebuffer.display_size();
                    match framebuffer.lock(None) {
                        Ok(mut lock) => draw_frame(&mut lock, display, frame),
                        Err(e) => {
                            log::error!("Demo producer lock failed: {}", e);
                            break;
                        }
                    }
                    frame += 1;
                    if let Some(rest) = period.checked_sub(start.elapsed()) {
                        thread::sleep(rest);
                    }
                }
                frame
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread; returns the number of frames written
    pub fn stop(mut self) -> u64 {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for DemoProducer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use present_core::framebuffer::SurfaceDesc;

    #[test]
    fn test_draw_frame_paints_bars_and_box() {
        let fb = SharedFramebuffer::new(SurfaceDesc::new(64, 48, 128).unwrap());
        {
            let mut lock = fb.lock(None).unwrap();
            draw_frame(&mut lock, Size::new(64, 48), 0);
            assert_eq!(lock.row_mut(47)[63], BARS[7]);
            // Box starts at the origin
            assert_eq!(lock.row_mut(0)[0], rgb565(255, 128, 0));
            assert_eq!(lock.row_mut(40)[0], BARS[0]);
        }
    }

    #[test]
    fn test_producer_writes_frames() {
        let fb = SharedFramebuffer::new(SurfaceDesc::new(32, 32, 64).unwrap());
        let producer = DemoProducer::spawn(fb.clone(), 500.0).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(producer.stop() > 0);
        // Either the white bar or the box, never the initial black
        assert_ne!(fb.access().pixels()[0], 0);
    }
}
