//! Frame sources.
//!
//! Screen capture is platform glue; the host only needs something that
//! yields a [`PixelSurface`] on demand. [`PatternSource`] draws a
//! desktop-like scene that changes over time so every encoder path gets
//! exercised without a display.

use std::time::{Duration, Instant};

use trickle_core::surface::{PixelSurface, Rect};

/// Produces the frames a session encodes.
///
/// Called from the blocking pool, once per served frame.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> PixelSurface;

    /// Text to push to the viewer when it changes.
    fn clipboard(&self) -> Option<String> {
        None
    }
}

// ── PatternSource ────────────────────────────────────────────────

const DESKTOP: u32 = 0x1E3A5F;
const TASKBAR: u32 = 0x202020;
const CLOCK: u32 = 0x3FA34D;
const TITLE: u32 = 0x2B5797;
const WINDOW: u32 = 0xF3F3F3;
const TEXT: u32 = 0x404040;

const TASKBAR_HEIGHT: u32 = 24;
const ICON: u32 = 32;
const WINDOW_WIDTH: u32 = 320;
const WINDOW_HEIGHT: u32 = 200;
/// Pixels the window travels per second.
const WINDOW_SPEED: f64 = 120.0;

/// Synthetic desktop: a static background with icons, a window
/// bouncing left and right, and a taskbar clock that fills once a
/// minute.
#[derive(Debug, Clone)]
pub struct PatternSource {
    width: u32,
    height: u32,
    started: Instant,
}

impl PatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            started: Instant::now(),
        }
    }

    /// The scene `elapsed` after start.
    pub fn frame_at(&self, elapsed: Duration) -> PixelSurface {
        let mut frame = PixelSurface::filled(self.width, self.height, DESKTOP);
        self.draw_icons(&mut frame);
        self.draw_window(&mut frame, elapsed);
        self.draw_taskbar(&mut frame, elapsed);
        frame
    }

    fn draw_icons(&self, frame: &mut PixelSurface) {
        let rows = self.height.saturating_sub(TASKBAR_HEIGHT) / (ICON * 2);
        for row in 0..rows.min(6) {
            let (x0, y0) = (ICON / 2, ICON / 2 + row * ICON * 2);
            for y in 0..ICON {
                for x in 0..ICON {
                    if x0 + x < self.width && y0 + y < self.height {
                        let shade = (x * 7 + y * 3 + row * 41) & 0xFF;
                        frame.set_pixel(x0 + x, y0 + y, shade << 16 | (255 - shade) << 8 | 0x80);
                    }
                }
            }
        }
    }

    fn draw_window(&self, frame: &mut PixelSurface, elapsed: Duration) {
        let travel = self.width.saturating_sub(WINDOW_WIDTH).max(1) as f64;
        let phase = (elapsed.as_secs_f64() * WINDOW_SPEED) % (travel * 2.0);
        let x = (if phase < travel { phase } else { travel * 2.0 - phase }) as u32;
        let y = self.height / 5;

        let window = Rect::new(x, y, WINDOW_WIDTH, WINDOW_HEIGHT).clipped_to(self.width, self.height);
        frame.fill(WINDOW, window);
        frame.fill(TITLE, Rect::new(window.x, window.y, window.width, window.height.min(20)));

        let mut line = window.y + 32;
        while line + 2 < window.bottom() {
            let len = (window.width.saturating_sub(24) * (3 + line % 5)) / 8;
            frame.fill(
                TEXT,
                Rect::new(window.x + 12, line, len, 2).clipped_to(self.width, self.height),
            );
            line += 12;
        }
    }

    fn draw_taskbar(&self, frame: &mut PixelSurface, elapsed: Duration) {
        let top = self.height.saturating_sub(TASKBAR_HEIGHT);
        frame.fill(TASKBAR, Rect::new(0, top, self.width, TASKBAR_HEIGHT).clipped_to(self.width, self.height));

        let millis = (elapsed.as_millis() % 60_000) as u64;
        let filled = (self.width as u64 * millis / 60_000) as u32;
        frame.fill(CLOCK, Rect::new(0, top + 8, filled, 8).clipped_to(self.width, self.height));
    }
}

impl FrameSource for PatternSource {
    fn capture(&self) -> PixelSurface {
        self.frame_at(self.started.elapsed())
    }
}

// ── Tests ────────────────────────────────────────────────────────
