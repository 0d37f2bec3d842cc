//! Draw string and compact payload builder.
//!
//! The encoder walks a [`Classification`] in block order and groups
//! consecutive blocks of the same kind into one opcode run:
//!
//! | Blocks                         | Emitted                           |
//! |--------------------------------|-----------------------------------|
//! | `Unchanged` × n                | `K<n>`                            |
//! | `Solid(c)` × n                 | `s<c>` (if `c` changed) + `S<n>`  |
//! | `Copy` × n                     | `C<n>`, pixels packed into payload |
//! | `Duplicate` of payload cell p × n | `d<p>` (if `p` changed) + `D<n>` |
//!
//! Only `Copy` blocks cost payload pixels. The payload is a tight grid of
//! `block_size²` cells, `ceil(sqrt(copies))` cells wide.
//!
//! A frame whose copies exceed `max_tile_blocks` is split into several
//! tiles, each with its own draw string and payload. A frame that is
//! mostly new content is sent whole (`!`) instead.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::time::Instant;

use tracing::trace;

use crate::delta::BlockGrid;
use crate::delta::classify::{BlockClass, Classification, ComplexityCounts};
use crate::error::TrickleError;
use crate::protocol::{FrameMessage, FrameStats, FrameTile};
use crate::surface::{PixelPayload, PixelSurface, RGB_MASK};

/// zstd level never exceeded by the flat-content boost.
const MAX_ADAPTIVE_LEVEL: i32 = 9;

// ── EncoderConfig ────────────────────────────────────────────────

/// Tuning knobs for [`DeltaEncoder`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderConfig {
    /// Share of `Copy` blocks above which the whole surface is sent.
    pub full_frame_ratio: f64,
    /// Maximum `Copy` blocks per payload (0 = unlimited).
    pub max_tile_blocks: usize,
    /// Base zstd level for payloads.
    pub zstd_level: i32,
    /// Send the first frame of a session whole.
    pub full_frame_on_first: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            full_frame_ratio: 0.8,
            max_tile_blocks: 1024,
            zstd_level: 1,
            full_frame_on_first: false,
        }
    }
}

// ── EncodedFrame ─────────────────────────────────────────────────

/// One draw string and the uncompressed payload it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTile {
    pub draw: String,
    pub payload: PixelSurface,
}

/// Output of [`DeltaEncoder::encode`], not yet compressed.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub tiles: Vec<EncodedTile>,
    pub stats: FrameStats,
    /// zstd level picked for the payloads.
    pub level: i32,
}

impl EncodedFrame {
    /// Compress every tile payload and wrap the result for the wire.
    pub fn into_message(self, seq: u64) -> Result<FrameMessage, TrickleError> {
        let started = Instant::now();
        let mut stats = self.stats;
        let mut frames = Vec::with_capacity(self.tiles.len());

        for tile in self.tiles {
            let image = PixelPayload::encode(&tile.payload, self.level)?;
            stats.payload_bytes += image.byte_len() as u64;
            frames.push(FrameTile {
                draw: tile.draw,
                image,
            });
        }
        stats.encode_micros += started.elapsed().as_micros() as u64;

        Ok(FrameMessage {
            seq,
            frames,
            stats,
            clip: None,
        })
    }

    /// Whether the frame draws nothing but skips.
    pub fn is_idle(&self) -> bool {
        self.stats.blocks == self.stats.unchanged + self.stats.dropped_duplicates
            && !self.stats.full_frame
    }
}

// ── DeltaEncoder ─────────────────────────────────────────────────

/// Turns classifications into draw strings and payloads.
#[derive(Debug, Clone, Default)]
pub struct DeltaEncoder {
    config: EncoderConfig,
}

impl DeltaEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encode `current` as classified against the previous frame.
    ///
    /// Fails when the classification was made for a surface of another
    /// size.
    pub fn encode(
        &self,
        classification: &Classification,
        current: &PixelSurface,
    ) -> Result<EncodedFrame, TrickleError> {
        let grid = classification.grid;
        if grid.width != current.width()
            || grid.height != current.height()
            || classification.blocks.len() != grid.len()
        {
            return Err(TrickleError::protocol(format!(
                "classification for {}x{} applied to {}x{} surface",
                grid.width,
                grid.height,
                current.width(),
                current.height()
            )));
        }

        let started = Instant::now();
        let wants_full = classification.copy_ratio() > self.config.full_frame_ratio
            || (self.config.full_frame_on_first && !classification.had_previous);

        let mut frame = if wants_full && !grid.is_empty() {
            self.full_frame(grid, current, classification.complexity)
        } else {
            self.delta_frame(classification, current)
        };
        frame.stats.encode_micros = started.elapsed().as_micros() as u64;

        trace!(
            tiles = frame.stats.tiles,
            copied = frame.stats.copied,
            solid = frame.stats.solid,
            duplicate = frame.stats.duplicate,
            full = frame.stats.full_frame,
            "frame encoded"
        );
        Ok(frame)
    }

    /// Encode `current` as a single `!` tile regardless of history.
    pub fn encode_full(&self, current: &PixelSurface, block_size: u32) -> EncodedFrame {
        let started = Instant::now();
        let grid = BlockGrid::new(current.width(), current.height(), block_size);
        let mut frame = self.full_frame(grid, current, ComplexityCounts::default());
        frame.stats.encode_micros = started.elapsed().as_micros() as u64;
        frame
    }

    /// zstd level for a payload of blocks with the given ratings.
    pub fn level_for(&self, counts: ComplexityCounts) -> i32 {
        let total = counts.total();
        if total > 0 && counts.textured * 2 > total {
            1
        } else if total > 0 && counts.flat == total {
            (self.config.zstd_level + 2).min(MAX_ADAPTIVE_LEVEL)
        } else {
            self.config.zstd_level
        }
    }

    fn full_frame(
        &self,
        grid: BlockGrid,
        current: &PixelSurface,
        complexity: ComplexityCounts,
    ) -> EncodedFrame {
        let mut draw = header(&grid);
        draw.push('!');

        let mut stats = FrameStats {
            blocks: grid.len() as u32,
            copied: grid.len() as u32,
            tiles: 1,
            full_frame: true,
            ..Default::default()
        };
        stats.record_complexity(complexity);

        EncodedFrame {
            tiles: vec![EncodedTile {
                draw,
                payload: current.clone(),
            }],
            stats,
            level: self.level_for(complexity),
        }
    }

    fn delta_frame(&self, classification: &Classification, current: &PixelSurface) -> EncodedFrame {
        let grid = classification.grid;
        let mut stats = FrameStats {
            blocks: grid.len() as u32,
            ..Default::default()
        };
        stats.record_complexity(classification.complexity);

        let mut tiles = Vec::new();
        let mut tile = TileBuilder::start(&grid, 0);
        // Blocks that reached the payload of an earlier tile.
        let mut copied_before: HashSet<usize> = HashSet::new();

        for (index, class) in classification.blocks.iter().enumerate() {
            match *class {
                BlockClass::Unchanged => {
                    stats.unchanged += 1;
                    tile.writer.skip();
                }
                BlockClass::Solid(color) => {
                    stats.solid += 1;
                    tile.writer.solid(color);
                }
                BlockClass::Copy => {
                    if tile.is_full(self.config.max_tile_blocks) {
                        copied_before.extend(tile.payload_blocks.iter().copied());
                        tiles.push(tile.finish(&grid, current));
                        tile = TileBuilder::start(&grid, index);
                    }
                    stats.copied += 1;
                    tile.copy(index, index);
                }
                BlockClass::Duplicate(reference) => {
                    if let Some(&cell) = tile.resolved.get(&reference) {
                        stats.duplicate += 1;
                        tile.writer.duplicate(cell);
                    } else if copied_before.contains(&reference) {
                        // Reference lives in another tile's payload.
                        if tile.is_full(self.config.max_tile_blocks) {
                            copied_before.extend(tile.payload_blocks.iter().copied());
                            tiles.push(tile.finish(&grid, current));
                            tile = TileBuilder::start(&grid, index);
                        }
                        stats.copied += 1;
                        tile.copy(index, reference);
                    } else {
                        stats.dropped_duplicates += 1;
                        tile.writer.skip();
                    }
                }
            }
        }
        tiles.push(tile.finish(&grid, current));

        stats.tiles = tiles.len() as u32;
        EncodedFrame {
            tiles,
            stats,
            level: self.level_for(classification.complexity),
        }
    }
}

fn header(grid: &BlockGrid) -> String {
    format!("X{}Y{}B{}", grid.width, grid.height, grid.block_size)
}

/// Cells per payload row for `copies` blocks.
pub(crate) fn payload_columns(copies: usize) -> usize {
    let cols = copies.isqrt();
    if cols * cols < copies { cols + 1 } else { cols }
}

// ── TileBuilder ──────────────────────────────────────────────────

/// Draw string and payload blocks of the tile being built.
struct TileBuilder {
    writer: DrawWriter,
    /// Block indices in payload cell order.
    payload_blocks: Vec<usize>,
    /// Block index → payload cell holding its pixels.
    resolved: HashMap<usize, u32>,
}

impl TileBuilder {
    fn start(grid: &BlockGrid, first_block: usize) -> Self {
        let mut writer = DrawWriter::new(header(grid));
        for _ in 0..first_block {
            writer.skip();
        }
        Self {
            writer,
            payload_blocks: Vec::new(),
            resolved: HashMap::new(),
        }
    }

    fn is_full(&self, max_tile_blocks: usize) -> bool {
        max_tile_blocks > 0 && self.payload_blocks.len() >= max_tile_blocks
    }

    /// Copy block `index` into the payload; later duplicates of `key`
    /// replay the new cell.
    fn copy(&mut self, index: usize, key: usize) {
        let cell = self.payload_blocks.len() as u32;
        self.payload_blocks.push(index);
        self.resolved.insert(key, cell);
        self.writer.copy();
    }

    fn finish(self, grid: &BlockGrid, current: &PixelSurface) -> EncodedTile {
        let copies = self.payload_blocks.len();
        let payload = if copies == 0 {
            PixelSurface::default()
        } else {
            let cols = payload_columns(copies);
            let rows = copies.div_ceil(cols);
            let bs = grid.block_size;
            let mut payload = PixelSurface::new(cols as u32 * bs, rows as u32 * bs);
            for (cell, &block) in self.payload_blocks.iter().enumerate() {
                let x = (cell % cols) as u32 * bs;
                let y = (cell / cols) as u32 * bs;
                current.copy_to(grid.rect(block), &mut payload, x, y);
            }
            payload
        };

        EncodedTile {
            draw: self.writer.finish(),
            payload,
        }
    }
}

// ── DrawWriter ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    Skip,
    Copy,
    Solid,
    Duplicate,
}

impl Run {
    fn letter(self) -> char {
        match self {
            Self::Skip => 'K',
            Self::Copy => 'C',
            Self::Solid => 'S',
            Self::Duplicate => 'D',
        }
    }
}

/// Run-length groups opcodes while tracking the decoder's registers.
struct DrawWriter {
    out: String,
    pending: Option<(Run, u32)>,
    color: u32,
    duplicate_cell: u32,
}

impl DrawWriter {
    fn new(header: String) -> Self {
        Self {
            out: header,
            pending: None,
            color: 0,
            duplicate_cell: 0,
        }
    }

    fn skip(&mut self) {
        self.extend(Run::Skip);
    }

    fn copy(&mut self) {
        self.extend(Run::Copy);
    }

    fn solid(&mut self, color: u32) {
        let color = color & RGB_MASK;
        if color != self.color {
            self.flush();
            let _ = write!(self.out, "s{color}");
            self.color = color;
        }
        self.extend(Run::Solid);
    }

    fn duplicate(&mut self, cell: u32) {
        if cell != self.duplicate_cell {
            self.flush();
            let _ = write!(self.out, "d{cell}");
            self.duplicate_cell = cell;
        }
        self.extend(Run::Duplicate);
    }

    fn extend(&mut self, run: Run) {
        match &mut self.pending {
            Some((kind, n)) if *kind == run => *n += 1,
            _ => {
                self.flush();
                self.pending = Some((run, 1));
            }
        }
    }

    fn flush(&mut self) {
        if let Some((run, n)) = self.pending.take() {
            let _ = write!(self.out, "{}{n}", run.letter());
        }
    }

    fn finish(mut self) -> String {
        self.flush();
        self.out
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::classify::BlockClassifier;
    use crate::surface::Rect;

    fn noisy(seed: u32, size: u32) -> PixelSurface {
        let pixels = (0..size * size)
            .map(|i| (i.wrapping_mul(2_654_435_761) ^ seed.wrapping_mul(40_503)) & 0xFFFFFF)
            .collect();
        PixelSurface::from_pixels(size, size, pixels)
    }

    /// A 16px-high strip of the given 16×16 tiles side by side.
    fn strip(tiles: &[&PixelSurface]) -> PixelSurface {
        let mut out = PixelSurface::new(16 * tiles.len() as u32, 16);
        for (i, t) in tiles.iter().enumerate() {
            t.copy_to(t.bounds(), &mut out, i as u32 * 16, 0);
        }
        out
    }

    fn encode(prev: Option<&PixelSurface>, cur: &PixelSurface, config: EncoderConfig) -> EncodedFrame {
        let c = BlockClassifier::new(16).classify(prev, cur);
        DeltaEncoder::new(config).encode(&c, cur).unwrap()
    }

    fn no_full_frames() -> EncoderConfig {
        EncoderConfig {
            full_frame_ratio: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn single_changed_block_is_one_solid() {
        let prev = PixelSurface::filled(800, 600, 0x336699);
        let mut cur = prev.clone();
        // Block (10, 2) of a 50-wide grid.
        cur.fill(0x000000, Rect::new(160, 32, 16, 16));

        let frame = encode(Some(&prev), &cur, EncoderConfig::default());
        assert_eq!(frame.tiles.len(), 1);
        assert_eq!(frame.tiles[0].draw, "X800Y600B16K110S1K1789");
        assert!(frame.tiles[0].payload.is_empty());

        let msg = frame.into_message(1).unwrap();
        assert_eq!(msg.stats.payload_bytes, 0);
        assert_eq!(msg.stats.solid, 1);
        assert_eq!(msg.stats.unchanged, 1899);
    }

    #[test]
    fn identical_frame_is_one_skip() {
        let mut frame = PixelSurface::filled(800, 600, 0x336699);
        frame.fill(0xABCDEF, Rect::new(3, 5, 300, 200));
        let encoded = encode(Some(&frame), &frame, EncoderConfig::default());
        assert_eq!(encoded.tiles[0].draw, "X800Y600B16K1900");
        assert!(encoded.tiles[0].payload.is_empty());
        assert!(encoded.is_idle());
    }

    #[test]
    fn same_color_blocks_share_one_run() {
        let red = PixelSurface::filled(64, 16, 0xFF0000);
        assert_eq!(encode(None, &red, EncoderConfig::default()).tiles[0].draw, "X64Y16B16s16711680S4");

        // Initial fill color is black on both sides.
        let black = PixelSurface::new(64, 16);
        assert_eq!(encode(None, &black, EncoderConfig::default()).tiles[0].draw, "X64Y16B16S4");
    }

    #[test]
    fn color_changes_emit_set_color() {
        let mut cur = PixelSurface::filled(64, 16, 0x00FF00);
        cur.fill(0x0000FF, Rect::new(32, 0, 32, 16));
        let frame = encode(None, &cur, EncoderConfig::default());
        assert_eq!(frame.tiles[0].draw, "X64Y16B16s65280S2s255S2");
    }

    #[test]
    fn duplicates_replay_the_first_copy() {
        let a = noisy(1, 16);
        let b = noisy(2, 16);

        let frame = encode(None, &strip(&[&a, &a, &a]), EncoderConfig::default());
        assert_eq!(frame.tiles[0].draw, "X48Y16B16C1D2");
        assert_eq!(frame.tiles[0].payload.width(), 16);

        let frame = encode(None, &strip(&[&a, &b, &a]), EncoderConfig::default());
        assert_eq!(frame.tiles[0].draw, "X48Y16B16C2D1");

        let frame = encode(None, &strip(&[&a, &b, &b]), EncoderConfig::default());
        assert_eq!(frame.tiles[0].draw, "X48Y16B16C2d1D1");
        assert_eq!(frame.stats.duplicate, 1);
        assert_eq!(frame.stats.copied, 2);
    }

    #[test]
    fn dangling_duplicate_is_dropped_as_skip() {
        let cur = strip(&[&noisy(1, 16), &noisy(1, 16), &noisy(3, 16)]);
        let classification = Classification {
            grid: BlockGrid::new(48, 16, 16),
            blocks: vec![BlockClass::Unchanged, BlockClass::Duplicate(0), BlockClass::Copy],
            complexity: ComplexityCounts::default(),
            had_previous: true,
        };
        let frame = DeltaEncoder::default().encode(&classification, &cur).unwrap();
        assert_eq!(frame.tiles[0].draw, "X48Y16B16K2C1");
        assert_eq!(frame.stats.dropped_duplicates, 1);
        assert_eq!(frame.stats.copied, 1);
    }

    #[test]
    fn copies_are_split_across_tiles() {
        let tiles: Vec<_> = (0..4).map(|s| noisy(s + 10, 16)).collect();
        let cur = strip(&tiles.iter().collect::<Vec<_>>());
        let frame = encode(
            None,
            &cur,
            EncoderConfig {
                max_tile_blocks: 2,
                ..no_full_frames()
            },
        );
        let draws: Vec<_> = frame.tiles.iter().map(|t| t.draw.as_str()).collect();
        assert_eq!(draws, ["X64Y16B16C2", "X64Y16B16K2C2"]);
        assert_eq!(frame.stats.tiles, 2);
    }

    #[test]
    fn duplicate_of_earlier_tile_is_promoted() {
        let (a, b, c) = (noisy(1, 16), noisy(2, 16), noisy(3, 16));
        let cur = strip(&[&a, &b, &c, &a]);
        let frame = encode(
            None,
            &cur,
            EncoderConfig {
                max_tile_blocks: 2,
                ..no_full_frames()
            },
        );
        let draws: Vec<_> = frame.tiles.iter().map(|t| t.draw.as_str()).collect();
        assert_eq!(draws, ["X64Y16B16C2", "X64Y16B16K2C2"]);
        assert_eq!(frame.stats.copied, 4);
        assert_eq!(frame.stats.duplicate, 0);
    }

    #[test]
    fn mostly_new_content_goes_full_frame() {
        let cur = strip(&[&noisy(1, 16), &noisy(2, 16), &noisy(3, 16)]);
        let frame = encode(None, &cur, EncoderConfig::default());
        assert_eq!(frame.tiles[0].draw, "X48Y16B16!");
        assert_eq!(frame.tiles[0].payload, cur);
        assert!(frame.stats.full_frame);
    }

    #[test]
    fn first_frame_can_be_forced_whole() {
        let cur = PixelSurface::filled(32, 32, 0x123456);
        let config = EncoderConfig {
            full_frame_on_first: true,
            ..Default::default()
        };
        assert!(encode(None, &cur, config).stats.full_frame);
        assert!(!encode(Some(&cur), &cur, config).stats.full_frame);
    }

    #[test]
    fn payload_grid_is_near_square() {
        assert_eq!(payload_columns(1), 1);
        assert_eq!(payload_columns(2), 2);
        assert_eq!(payload_columns(4), 2);
        assert_eq!(payload_columns(5), 3);
        assert_eq!(payload_columns(1024), 32);
    }

    #[test]
    fn level_follows_content() {
        let encoder = DeltaEncoder::new(EncoderConfig {
            zstd_level: 3,
            ..Default::default()
        });
        let textured = ComplexityCounts { flat: 1, smooth: 0, textured: 2 };
        let flat = ComplexityCounts { flat: 4, smooth: 0, textured: 0 };
        let mixed = ComplexityCounts { flat: 1, smooth: 1, textured: 1 };
        assert_eq!(encoder.level_for(textured), 1);
        assert_eq!(encoder.level_for(flat), 5);
        assert_eq!(encoder.level_for(mixed), 3);

        let high = DeltaEncoder::new(EncoderConfig {
            zstd_level: 8,
            ..Default::default()
        });
        assert_eq!(high.level_for(flat), 9);
    }

    #[test]
    fn mismatched_classification_is_rejected() {
        let c = BlockClassifier::new(16).classify(None, &PixelSurface::new(32, 32));
        let err = DeltaEncoder::default().encode(&c, &PixelSurface::new(16, 16)).unwrap_err();
        assert!(matches!(err, TrickleError::Protocol(_)));
    }
}
