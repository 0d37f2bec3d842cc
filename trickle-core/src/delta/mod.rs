//! Block-level delta compression between consecutive frames.
//!
//! ```text
//!  previous ─┐
//!            ├─► BlockClassifier ─► Classification ─► DeltaEncoder ─► EncodedFrame
//!  current ──┘                                                         (draw string + compact payload per tile)
//!
//!  EncodedFrame ─► DrawDecoder::apply(draw, payload) ─► canvas == current
//! ```
//!
//! | Module     | Purpose                                                  |
//! |------------|----------------------------------------------------------|
//! | `classify` | Unchanged / Solid / Duplicate / Copy decision per block  |
//! | `opcode`   | Draw-string opcodes and their reader                     |
//! | `encoder`  | Run-length draw string + compacted payload builder       |
//! | `decoder`  | Draw-string replay onto a persistent canvas              |

pub mod classify;
pub mod decoder;
pub mod encoder;
pub mod opcode;

pub use classify::{BlockClass, BlockClassifier, Classification, ClassifierOptions, Complexity};
pub use decoder::{DrawDecoder, DrawSummary, MAX_CANVAS_PIXELS};
pub use encoder::{DeltaEncoder, EncodedFrame, EncodedTile, EncoderConfig};
pub use opcode::{Opcode, OpcodeReader};

use crate::surface::Rect;

/// Block edge used when nothing else is configured.
pub const DEFAULT_BLOCK_SIZE: u32 = 16;

// ── BlockGrid ────────────────────────────────────────────────────

/// Geometry of a surface cut into `block_size × block_size` tiles,
/// addressed row-major (`index = row * blocks_x + col`).
///
/// Blocks on the right and bottom edges are clipped to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    pub width: u32,
    pub height: u32,
    pub block_size: u32,
    pub blocks_x: u32,
    pub blocks_y: u32,
}

impl BlockGrid {
    pub fn new(width: u32, height: u32, block_size: u32) -> Self {
        assert!(block_size > 0, "block_size must be > 0");
        Self {
            width,
            height,
            block_size,
            blocks_x: width.div_ceil(block_size),
            blocks_y: height.div_ceil(block_size),
        }
    }

    /// Total number of blocks.
    pub fn len(&self) -> usize {
        self.blocks_x as usize * self.blocks_y as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-left pixel of block `index`.
    pub fn origin(&self, index: usize) -> (u32, u32) {
        let col = (index % self.blocks_x as usize) as u32;
        let row = (index / self.blocks_x as usize) as u32;
        (col * self.block_size, row * self.block_size)
    }

    /// The clipped rectangle covered by block `index`.
    pub fn rect(&self, index: usize) -> Rect {
        assert!(index < self.len(), "block {index} outside grid of {}", self.len());
        let (x, y) = self.origin(index);
        Rect::new(x, y, self.block_size, self.block_size).clipped_to(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_geometry_rounds_up() {
        let grid = BlockGrid::new(800, 600, 16);
        assert_eq!(grid.blocks_x, 50);
        assert_eq!(grid.blocks_y, 38);
        assert_eq!(grid.len(), 1900);
    }

    #[test]
    fn edge_blocks_are_clipped() {
        let grid = BlockGrid::new(40, 20, 16);
        assert_eq!(grid.rect(0), Rect::new(0, 0, 16, 16));
        assert_eq!(grid.rect(2), Rect::new(32, 0, 8, 16));
        assert_eq!(grid.rect(5), Rect::new(32, 16, 8, 4));
    }

    #[test]
    #[should_panic(expected = "block_size")]
    fn zero_block_size_panics() {
        BlockGrid::new(10, 10, 0);
    }
}
