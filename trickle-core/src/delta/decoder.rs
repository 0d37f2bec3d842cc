//! Draw-string replay onto a persistent canvas.
//!
//! The decoder keeps the canvas and block size across draw strings;
//! cursors, fill color and duplicate origin start at zero for each one.
//!
//! ```text
//!  payload grid (source)          canvas grid (target)
//!  ┌──┬──┬──┐                    ┌──┬──┬──┬──┬──┐
//!  │0 │1 │2 │  C3 ─────────────► │K │K │0 │1 │2 │ ...
//!  ├──┼──┼──┤                    ├──┼──┼──┼──┼──┤
//!  │3 │  │  │  d3 D2 ──────────► │3 │3 │S │S │K │ ...
//!  └──┴──┴──┘                    └──┴──┴──┴──┴──┘
//! ```

use tracing::trace;

use crate::delta::opcode::{Opcode, OpcodeReader};
use crate::delta::{BlockGrid, DEFAULT_BLOCK_SIZE};
use crate::error::TrickleError;
use crate::surface::{PixelSurface, Rect};

/// What one draw string did to the canvas, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawSummary {
    pub copied: u32,
    pub solid: u32,
    pub duplicated: u32,
    pub skipped: u32,
    /// Unknown opcodes passed over.
    pub ignored: u32,
    /// Whether a `!` replaced the canvas content.
    pub full: bool,
}

/// Registers reset at the start of every draw string.
#[derive(Debug, Default)]
struct Cursors {
    source: u64,
    target: u64,
    color: u32,
    duplicate: u64,
}

/// Largest canvas a draw header may ask for, in pixels.
pub const MAX_CANVAS_PIXELS: u64 = 8192 * 8192;

/// Owns the viewer canvas and applies draw strings to it.
#[derive(Debug, Clone)]
pub struct DrawDecoder {
    canvas: PixelSurface,
    block_size: u32,
    /// Per-axis limits from the viewer config; 0 means none.
    max_width: u32,
    max_height: u32,
}

impl Default for DrawDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawDecoder {
    /// An empty canvas; the first draw string sizes it.
    pub fn new() -> Self {
        Self::with_canvas(PixelSurface::default())
    }

    /// Start from existing canvas content.
    pub fn with_canvas(canvas: PixelSurface) -> Self {
        Self {
            canvas,
            block_size: DEFAULT_BLOCK_SIZE,
            max_width: 0,
            max_height: 0,
        }
    }

    /// Reject draw headers wider or taller than the given size.
    pub fn with_max_size(mut self, max_width: u32, max_height: u32) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    pub fn canvas(&self) -> &PixelSurface {
        &self.canvas
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Apply one draw string using `payload` as the source grid.
    ///
    /// On error the canvas may be partially drawn.
    pub fn apply(&mut self, draw: &str, payload: &PixelSurface) -> Result<DrawSummary, TrickleError> {
        let mut cur = Cursors::default();
        let mut summary = DrawSummary::default();

        for op in OpcodeReader::new(draw) {
            match op? {
                Opcode::Width(w) => self.resize(w, self.canvas.height())?,
                Opcode::Height(h) => self.resize(self.canvas.width(), h)?,
                Opcode::BlockSize(bs) => {
                    if bs == 0 {
                        return Err(TrickleError::protocol("block size 0"));
                    }
                    self.block_size = bs;
                }
                Opcode::Skip(n) => {
                    self.advance(&mut cur, n)?;
                    summary.skipped += n;
                }
                Opcode::Copy(n) => {
                    self.copy_run(&mut cur, n, payload)?;
                    summary.copied += n;
                }
                Opcode::SetColor(color) => cur.color = color,
                Opcode::Solid(n) => {
                    self.solid_run(&mut cur, n)?;
                    summary.solid += n;
                }
                Opcode::SetDuplicate(cell) => cur.duplicate = cell as u64,
                Opcode::Duplicate(n) => {
                    self.duplicate_run(&mut cur, n, payload)?;
                    summary.duplicated += n;
                }
                Opcode::FullCopy => {
                    let overlap = payload
                        .bounds()
                        .clipped_to(self.canvas.width(), self.canvas.height());
                    if !overlap.is_empty() {
                        payload.copy_to(overlap, &mut self.canvas, 0, 0);
                    }
                    summary.full = true;
                }
                Opcode::Unknown(letter, n) => {
                    trace!(%letter, n, "skipping unknown opcode");
                    summary.ignored += 1;
                }
            }
        }

        Ok(summary)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), TrickleError> {
        if width == self.canvas.width() && height == self.canvas.height() {
            return Ok(());
        }
        let over_axis = (self.max_width != 0 && width > self.max_width)
            || (self.max_height != 0 && height > self.max_height);
        if over_axis || width as u64 * height as u64 > MAX_CANVAS_PIXELS {
            return Err(TrickleError::protocol(format!(
                "canvas {width}x{height} exceeds the viewer limit"
            )));
        }
        self.canvas = self.canvas.resized(width, height);
        Ok(())
    }

    // ── Runs ─────────────────────────────────────────────────────

    fn target_grid(&self) -> BlockGrid {
        BlockGrid::new(self.canvas.width(), self.canvas.height(), self.block_size)
    }

    fn source_grid(&self, payload: &PixelSurface) -> BlockGrid {
        BlockGrid::new(payload.width(), payload.height(), self.block_size)
    }

    /// Reserve `n` target blocks starting at the cursor.
    fn advance(&self, cur: &mut Cursors, n: u32) -> Result<u64, TrickleError> {
        let total = self.target_grid().len() as u64;
        let start = cur.target;
        if start + n as u64 > total {
            return Err(TrickleError::protocol(format!(
                "run of {n} at block {start} passes the end of a {total}-block grid"
            )));
        }
        cur.target += n as u64;
        Ok(start)
    }

    fn copy_run(&mut self, cur: &mut Cursors, n: u32, payload: &PixelSurface) -> Result<(), TrickleError> {
        let src = self.source_grid(payload);
        let dst = self.target_grid();
        if cur.source + n as u64 > src.len() as u64 {
            return Err(TrickleError::protocol(format!(
                "copy of {n} at cell {} passes the end of a {}-cell payload",
                cur.source,
                src.len()
            )));
        }
        let mut target = self.advance(cur, n)?;

        let mut left = n as u64;
        while left > 0 {
            // Neither span may wrap a row of its grid.
            let src_room = src.blocks_x as u64 - cur.source % src.blocks_x as u64;
            let dst_room = dst.blocks_x as u64 - target % dst.blocks_x as u64;
            let span = left.min(src_room).min(dst_room);

            let (sx, sy) = src.origin(cur.source as usize);
            let (dx, dy) = dst.origin(target as usize);
            let width = (span as u32 * self.block_size).min(self.canvas.width() - dx);
            let height = self.block_size.min(self.canvas.height() - dy);
            let from = source_rect(payload, Rect::new(sx, sy, width, height))?;
            payload.copy_to(from, &mut self.canvas, dx, dy);

            cur.source += span;
            target += span;
            left -= span;
        }
        Ok(())
    }

    fn solid_run(&mut self, cur: &mut Cursors, n: u32) -> Result<(), TrickleError> {
        let dst = self.target_grid();
        let start = self.advance(cur, n)?;
        for index in start..start + n as u64 {
            self.canvas.fill(cur.color, dst.rect(index as usize));
        }
        Ok(())
    }

    fn duplicate_run(&mut self, cur: &mut Cursors, n: u32, payload: &PixelSurface) -> Result<(), TrickleError> {
        let src = self.source_grid(payload);
        if cur.duplicate >= src.len() as u64 {
            return Err(TrickleError::protocol(format!(
                "duplicate cell {} outside a {}-cell payload",
                cur.duplicate,
                src.len()
            )));
        }
        let dst = self.target_grid();
        let start = self.advance(cur, n)?;
        let (sx, sy) = src.origin(cur.duplicate as usize);

        for index in start..start + n as u64 {
            let rect = dst.rect(index as usize);
            let from = source_rect(payload, Rect::new(sx, sy, rect.width, rect.height))?;
            payload.copy_to(from, &mut self.canvas, rect.x, rect.y);
        }
        Ok(())
    }
}

/// `rect` if the payload holds it; a ragged payload cannot feed a full block.
fn source_rect(payload: &PixelSurface, rect: Rect) -> Result<Rect, TrickleError> {
    if rect.right() > payload.width() || rect.bottom() > payload.height() {
        return Err(TrickleError::protocol(format!(
            "source {rect:?} outside {}x{} payload",
            payload.width(),
            payload.height()
        )));
    }
    Ok(rect)
}

// ── Tests ────────────────────────────────────────────────────────
