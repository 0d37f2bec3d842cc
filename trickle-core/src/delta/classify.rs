//! Per-block change classification against the previous frame.
//!
//! Each block gets exactly one [`BlockClass`], decided in fixed priority
//! order and never revisited:
//!
//! 1. `Unchanged`: pixel-identical to the same block of the previous frame.
//! 2. `Solid`: a single color.
//! 3. `Duplicate`: bit-exact copy of an earlier `Copy` block of this frame
//!    (hash lookup, confirmed by a pixel compare).
//! 4. `Copy`: new content; its hash is recorded for later lookups.

use std::collections::HashMap;

use crate::delta::BlockGrid;
use crate::surface::{LOW_FREQUENCY_THRESHOLD, PixelSurface, Rect};

// ── BlockClass ───────────────────────────────────────────────────

/// How a block changed since the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Unchanged,
    /// Every pixel has this color.
    Solid(u32),
    /// Same pixels as the earlier block at this index.
    Duplicate(usize),
    Copy,
}

/// Texture rating of a copied block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// Most pixels repeat a neighbour (UI chrome, text on flat color).
    Flat,
    /// Gentle gradients.
    Smooth,
    /// Everything else (photos, dithering).
    Textured,
}

/// Per-frame counts of [`Complexity`] ratings over `Copy` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComplexityCounts {
    pub flat: u32,
    pub smooth: u32,
    pub textured: u32,
}

impl ComplexityCounts {
    fn record(&mut self, complexity: Complexity) {
        match complexity {
            Complexity::Flat => self.flat += 1,
            Complexity::Smooth => self.smooth += 1,
            Complexity::Textured => self.textured += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.flat + self.smooth + self.textured
    }
}

// ── Classification ───────────────────────────────────────────────

/// Result of one classification pass.
#[derive(Debug, Clone)]
pub struct Classification {
    pub grid: BlockGrid,
    /// One entry per block, row-major.
    pub blocks: Vec<BlockClass>,
    pub complexity: ComplexityCounts,
    /// Whether a same-sized previous frame took part.
    pub had_previous: bool,
}

impl Classification {
    /// Number of `Copy` blocks.
    pub fn copies(&self) -> usize {
        self.blocks.iter().filter(|b| matches!(b, BlockClass::Copy)).count()
    }

    /// Whether no block changed.
    pub fn is_unchanged(&self) -> bool {
        self.blocks.iter().all(|b| matches!(b, BlockClass::Unchanged))
    }

    /// Fraction of blocks classified `Copy` (0.0 – 1.0).
    pub fn copy_ratio(&self) -> f64 {
        if self.blocks.is_empty() {
            return 0.0;
        }
        self.copies() as f64 / self.blocks.len() as f64
    }
}

// ── BlockClassifier ──────────────────────────────────────────────

/// Steps of the classification that may be switched off per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierOptions {
    pub solids: bool,
    pub duplicates: bool,
    pub low_frequency_threshold: u8,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            solids: true,
            duplicates: true,
            low_frequency_threshold: LOW_FREQUENCY_THRESHOLD,
        }
    }
}

/// Stateless block classifier.
///
/// The previous frame is owned by the caller (see
/// [`HostSession`](crate::session::HostSession)), which swaps it after a
/// successful pass; the classifier only ever reads it.
#[derive(Debug, Clone)]
pub struct BlockClassifier {
    block_size: u32,
    options: ClassifierOptions,
}

impl BlockClassifier {
    pub fn new(block_size: u32) -> Self {
        Self::with_options(block_size, ClassifierOptions::default())
    }

    pub fn with_options(block_size: u32, options: ClassifierOptions) -> Self {
        assert!(block_size > 0, "block_size must be > 0");
        Self {
            block_size,
            options,
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn options(&self) -> ClassifierOptions {
        self.options
    }

    /// Classify every block of `current`.
    ///
    /// A missing previous frame, or one with different dimensions, means
    /// no block can be `Unchanged`.
    pub fn classify(
        &self,
        previous: Option<&PixelSurface>,
        current: &PixelSurface,
    ) -> Classification {
        let grid = BlockGrid::new(current.width(), current.height(), self.block_size);
        let previous = previous
            .filter(|p| p.width() == current.width() && p.height() == current.height());

        // hash → Copy blocks that produced it (collisions keep every candidate).
        let mut seen: HashMap<u32, Vec<usize>> = HashMap::new();
        let mut blocks = Vec::with_capacity(grid.len());
        let mut complexity = ComplexityCounts::default();

        for index in 0..grid.len() {
            let rect = grid.rect(index);

            if let Some(prev) = previous {
                if current.is_match(rect, prev, rect.x, rect.y) {
                    blocks.push(BlockClass::Unchanged);
                    continue;
                }
            }

            if self.options.solids {
                if let Some(color) = current.solid_color(rect) {
                    blocks.push(BlockClass::Solid(color));
                    continue;
                }
            }

            if self.options.duplicates {
                let hash = current.hash(rect);
                if let Some(first) = find_duplicate(&grid, current, rect, seen.get(&hash)) {
                    blocks.push(BlockClass::Duplicate(first));
                    continue;
                }
                seen.entry(hash).or_default().push(index);
            }

            complexity.record(self.rate(current, rect));
            blocks.push(BlockClass::Copy);
        }

        Classification {
            grid,
            blocks,
            complexity,
            had_previous: previous.is_some(),
        }
    }

    fn rate(&self, surface: &PixelSurface, rect: Rect) -> Complexity {
        if surface.rle_score(rect) as u64 * 4 >= rect.area() * 3 {
            Complexity::Flat
        } else if surface.is_low_frequency(rect, self.options.low_frequency_threshold) {
            Complexity::Smooth
        } else {
            Complexity::Textured
        }
    }
}

/// First candidate with the same clipped size and identical pixels.
fn find_duplicate(
    grid: &BlockGrid,
    surface: &PixelSurface,
    rect: Rect,
    candidates: Option<&Vec<usize>>,
) -> Option<usize> {
    candidates?.iter().copied().find(|&candidate| {
        let other = grid.rect(candidate);
        other.width == rect.width
            && other.height == rect.height
            && surface.is_match(rect, surface, other.x, other.y)
    })
}

// ── Tests ────────────────────────────────────────────────────────
