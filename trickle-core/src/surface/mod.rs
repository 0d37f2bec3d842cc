//! Owned pixel surfaces and their block-level analysis primitives.
//!
//! A [`PixelSurface`] is a contiguous `width × height` array of packed
//! `0x00RRGGBB` pixels. Every block operation takes a [`Rect`] and
//! asserts that it lies inside the surface: a rectangle outside the
//! bounds is a bug in the caller (classifier / encoder / decoder), not a
//! runtime condition, so it panics instead of returning an error.
//!
//! Hot loops (hash, compare, low-frequency test) walk validated row
//! slices obtained through [`PixelSurface::span`], so indexing never
//! leaves the buffer.

pub mod payload;

pub use payload::PixelPayload;

use std::fmt;

// ── Constants ────────────────────────────────────────────────────

/// Mask applied to every stored pixel. The top byte is always zero so a
/// solid color survives the `s<n>` opcode unchanged.
pub const RGB_MASK: u32 = 0x00FF_FFFF;

/// Default per-channel delta allowed by [`PixelSurface::is_low_frequency`].
pub const LOW_FREQUENCY_THRESHOLD: u8 = 8;

/// Pixels fed to the hasher per `update` call.
const HASH_CHUNK_PIXELS: usize = 64;

// ── Rect ─────────────────────────────────────────────────────────

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// One past the right-most column.
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    /// One past the bottom-most row.
    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Same size, moved to `(x, y)`.
    pub const fn at(&self, x: u32, y: u32) -> Self {
        Self::new(x, y, self.width, self.height)
    }

    /// Intersection with `0..width × 0..height`.
    pub fn clipped_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self::new(
            x,
            y,
            self.right().min(width) - x,
            self.bottom().min(height) - y,
        )
    }
}

// ── PixelSurface ─────────────────────────────────────────────────

/// An owned, row-major 32-bit pixel buffer.
///
/// `stride` is the row pitch in **pixels**; surfaces built by this crate
/// always use `stride == width`.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    stride: usize,
    pixels: Vec<u32>,
}

impl fmt::Debug for PixelSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

impl Default for PixelSurface {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl PixelSurface {
    /// A black surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0)
    }

    /// A surface where every pixel is `color`.
    pub fn filled(width: u32, height: u32, color: u32) -> Self {
        Self {
            width,
            height,
            stride: width as usize,
            pixels: vec![color & RGB_MASK; width as usize * height as usize],
        }
    }

    /// Wrap an existing pixel vector (`width * height` entries).
    ///
    /// # Panics
    ///
    /// Panics if `pixels.len()` does not match the dimensions.
    pub fn from_pixels(width: u32, height: u32, mut pixels: Vec<u32>) -> Self {
        assert_eq!(
            pixels.len(),
            width as usize * height as usize,
            "pixel vector does not match {width}x{height}"
        );
        for px in &mut pixels {
            *px &= RGB_MASK;
        }
        Self {
            width,
            height,
            stride: width as usize,
            pixels,
        }
    }

    /// Convert a 4-byte BGRA capture buffer whose rows are `stride_bytes`
    /// apart (capture APIs may pad rows).
    pub fn from_bgra(width: u32, height: u32, stride_bytes: usize, data: &[u8]) -> Self {
        let row_bytes = width as usize * 4;
        assert!(stride_bytes >= row_bytes, "stride shorter than a row");
        assert!(
            data.len() >= stride_bytes * height.saturating_sub(1) as usize + row_bytes
                || height == 0,
            "BGRA buffer too short"
        );

        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height as usize {
            let row = &data[y * stride_bytes..y * stride_bytes + row_bytes];
            pixels.extend(
                row.chunks_exact(4)
                    .map(|bgra| u32::from_le_bytes([bgra[0], bgra[1], bgra[2], 0])),
            );
        }
        Self {
            width,
            height,
            stride: width as usize,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row pitch in pixels.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The whole buffer, row-major.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// `0, 0, width, height`.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.check(Rect::new(x, y, 1, 1));
        self.pixels[y as usize * self.stride + x as usize]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: u32) {
        self.check(Rect::new(x, y, 1, 1));
        self.pixels[y as usize * self.stride + x as usize] = color & RGB_MASK;
    }

    /// A copy of this surface resized to `width × height`, keeping the
    /// overlapping top-left region and filling the rest with black.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        let mut out = Self::new(width, height);
        let overlap = self.bounds().clipped_to(width, height);
        if !overlap.is_empty() {
            self.copy_to(overlap, &mut out, 0, 0);
        }
        out
    }

    // ── Block operations ─────────────────────────────────────────

    /// Copy `src` from this surface into `dst` with its top-left corner at
    /// `(dst_x, dst_y)`.
    pub fn copy_to(&self, src: Rect, dst: &mut PixelSurface, dst_x: u32, dst_y: u32) {
        self.check(src);
        dst.check(src.at(dst_x, dst_y));

        for row in 0..src.height {
            let from = self.span(src.x, src.y + row, src.width);
            let start = (dst_y + row) as usize * dst.stride + dst_x as usize;
            dst.pixels[start..start + src.width as usize].copy_from_slice(from);
        }
    }

    /// Fill `rect` with `color`.
    pub fn fill(&mut self, color: u32, rect: Rect) {
        self.check(rect);
        let color = color & RGB_MASK;
        for y in rect.y..rect.bottom() {
            let start = y as usize * self.stride + rect.x as usize;
            self.pixels[start..start + rect.width as usize].fill(color);
        }
    }

    /// The single color of `rect`, if every pixel in it is the same.
    pub fn solid_color(&self, rect: Rect) -> Option<u32> {
        self.check(rect);
        if rect.is_empty() {
            return None;
        }
        let color = self.span(rect.x, rect.y, 1)[0];
        (rect.y..rect.bottom())
            .all(|y| self.span(rect.x, y, rect.width).iter().all(|&px| px == color))
            .then_some(color)
    }

    pub fn is_solid(&self, rect: Rect) -> bool {
        self.solid_color(rect).is_some()
    }

    /// 32-bit content hash of `rect` (dimensions included).
    ///
    /// Only a candidate filter: equal hashes must still be confirmed
    /// with [`is_match`](Self::is_match).
    pub fn hash(&self, rect: Rect) -> u32 {
        self.check(rect);
        let mut hasher = blake3::Hasher::new();
        hasher.update(&rect.width.to_le_bytes());
        hasher.update(&rect.height.to_le_bytes());

        let mut buf = [0u8; HASH_CHUNK_PIXELS * 4];
        for y in rect.y..rect.bottom() {
            for chunk in self.span(rect.x, y, rect.width).chunks(HASH_CHUNK_PIXELS) {
                for (dst, px) in buf.chunks_exact_mut(4).zip(chunk) {
                    dst.copy_from_slice(&px.to_le_bytes());
                }
                hasher.update(&buf[..chunk.len() * 4]);
            }
        }

        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Whether `rect` of this surface equals the same-sized rectangle of
    /// `other` at `(other_x, other_y)`, pixel for pixel.
    pub fn is_match(&self, rect: Rect, other: &PixelSurface, other_x: u32, other_y: u32) -> bool {
        self.check(rect);
        other.check(rect.at(other_x, other_y));
        (0..rect.height).all(|row| {
            self.span(rect.x, rect.y + row, rect.width)
                == other.span(other_x, other_y + row, rect.width)
        })
    }

    /// Number of pixels in `rect` equal to their right or lower
    /// neighbour (neighbours outside `rect` do not count).
    pub fn rle_score(&self, rect: Rect) -> u32 {
        self.check(rect);
        let mut score = 0;
        for y in rect.y..rect.bottom() {
            let row = self.span(rect.x, y, rect.width);
            let below = (y + 1 < rect.bottom()).then(|| self.span(rect.x, y + 1, rect.width));
            for (i, &px) in row.iter().enumerate() {
                let right_eq = row.get(i + 1) == Some(&px);
                let below_eq = below.is_some_and(|b| b[i] == px);
                if right_eq || below_eq {
                    score += 1;
                }
            }
        }
        score
    }

    /// Whether every channel of every pixel in `rect` stays within
    /// `threshold` of its right and lower neighbours.
    pub fn is_low_frequency(&self, rect: Rect, threshold: u8) -> bool {
        self.check(rect);
        for y in rect.y..rect.bottom() {
            let row = self.span(rect.x, y, rect.width);
            let below = (y + 1 < rect.bottom()).then(|| self.span(rect.x, y + 1, rect.width));
            for (i, &px) in row.iter().enumerate() {
                // A missing neighbour compares against the pixel itself.
                let right = row.get(i + 1).copied().unwrap_or(px);
                let down = below.map_or(px, |b| b[i]);
                if !neighbours_within(px, right, down, threshold) {
                    return false;
                }
            }
        }
        true
    }

    // ── Internal ─────────────────────────────────────────────────

    /// `len` pixels of row `y` starting at column `x`.
    fn span(&self, x: u32, y: u32, len: u32) -> &[u32] {
        let start = y as usize * self.stride + x as usize;
        &self.pixels[start..start + len as usize]
    }

    fn check(&self, rect: Rect) {
        assert!(
            rect.right() <= self.width && rect.bottom() <= self.height,
            "rect {rect:?} exceeds {}x{} surface",
            self.width,
            self.height,
        );
    }
}

// ── Packed channel arithmetic ────────────────────────────────────
//
// Two pixels are compared at once by spreading their R, G and B bytes
// into six 16-bit lanes of a u128 (lanes 3 and 7 stay zero). Every
// per-lane intermediate stays below 0x10000, so no carry or borrow
// crosses a lane boundary.

/// One bit at the bottom of each used lane.
const LANE_ONES: u128 = 1 | 1 << 16 | 1 << 32 | 1 << 64 | 1 << 80 | 1 << 96;

const fn lanes(v: u16) -> u128 {
    v as u128 * LANE_ONES
}

const LANE_SIGN: u128 = lanes(0x8000);

fn spread(px: u32) -> u64 {
    let px = px as u64;
    (px & 0xFF) | ((px & 0xFF00) << 8) | ((px & 0xFF_0000) << 16)
}

fn pair(a: u32, b: u32) -> u128 {
    spread(a) as u128 | (spread(b) as u128) << 64
}

/// `|px - right| <= t` and `|px - down| <= t` on every channel.
fn neighbours_within(px: u32, right: u32, down: u32, threshold: u8) -> bool {
    let t = threshold as u16;
    // Per lane: px - n + 256 + t, in 1..=766.
    let biased = (pair(px, px) + lanes(0x100 + t)) - pair(right, down);
    // Bit 15 set where biased >= 256.
    let lower = biased + lanes(0x8000 - 0x100);
    // Bit 15 set where biased <= 256 + 2t.
    let upper = lanes(0x8000 + 0x100 + 2 * t) - biased;
    lower & upper & LANE_SIGN == LANE_SIGN
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> PixelSurface {
        let pixels = (0..w * h).map(|i| (i % w) << 16 | (i / w) << 8).collect();
        PixelSurface::from_pixels(w, h, pixels)
    }

    #[test]
    fn from_pixels_masks_top_byte() {
        let s = PixelSurface::from_pixels(1, 1, vec![0xFF12_3456]);
        assert_eq!(s.pixel(0, 0), 0x12_3456);
    }

    #[test]
    fn from_bgra_honours_stride() {
        // 2x2, rows padded to 12 bytes.
        let mut data = vec![0u8; 24];
        data[0..4].copy_from_slice(&[0x01, 0x02, 0x03, 0xFF]);
        data[12..16].copy_from_slice(&[0x0A, 0x0B, 0x0C, 0xFF]);
        let s = PixelSurface::from_bgra(2, 2, 12, &data);
        assert_eq!(s.pixel(0, 0), 0x03_0201);
        assert_eq!(s.pixel(0, 1), 0x0C_0B0A);
        assert_eq!(s.pixel(1, 1), 0);
    }

    #[test]
    fn copy_and_fill() {
        let src = gradient(8, 8);
        let mut dst = PixelSurface::new(8, 8);
        src.copy_to(Rect::new(2, 2, 3, 3), &mut dst, 0, 5);
        assert_eq!(dst.pixel(0, 5), src.pixel(2, 2));
        assert_eq!(dst.pixel(2, 7), src.pixel(4, 4));

        dst.fill(0xABCDEF, Rect::new(4, 0, 4, 2));
        assert!(dst.is_solid(Rect::new(4, 0, 4, 2)));
        assert_eq!(dst.solid_color(Rect::new(4, 0, 4, 2)), Some(0xABCDEF));
        assert!(!dst.is_solid(Rect::new(3, 0, 4, 2)));
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn out_of_bounds_panics() {
        let s = PixelSurface::new(4, 4);
        s.is_solid(Rect::new(2, 2, 4, 1));
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn copy_outside_destination_panics() {
        let src = PixelSurface::new(4, 4);
        let mut dst = PixelSurface::new(2, 2);
        src.copy_to(Rect::new(0, 0, 4, 4), &mut dst, 0, 0);
    }

    #[test]
    fn hash_and_match() {
        let mut s = PixelSurface::new(16, 8);
        let tile = gradient(4, 4);
        tile.copy_to(tile.bounds(), &mut s, 0, 0);
        tile.copy_to(tile.bounds(), &mut s, 8, 4);

        let a = Rect::new(0, 0, 4, 4);
        let b = Rect::new(8, 4, 4, 4);
        assert_eq!(s.hash(a), s.hash(b));
        assert!(s.is_match(a, &s, 8, 4));
        assert!(!s.is_match(a, &s, 4, 0));
        assert_ne!(s.hash(a), s.hash(Rect::new(4, 0, 4, 4)));
    }

    #[test]
    fn hash_depends_on_shape() {
        let s = PixelSurface::new(8, 8);
        assert_ne!(s.hash(Rect::new(0, 0, 4, 2)), s.hash(Rect::new(0, 0, 2, 4)));
    }

    #[test]
    fn rle_score_counts_neighbours() {
        let flat = PixelSurface::filled(4, 4, 7);
        // Every pixel except the bottom-right corner has an equal neighbour.
        assert_eq!(flat.rle_score(flat.bounds()), 15);

        let mut checker = PixelSurface::new(2, 2);
        checker.set_pixel(1, 0, 1);
        checker.set_pixel(0, 1, 1);
        assert_eq!(checker.rle_score(checker.bounds()), 0);
    }

    #[test]
    fn low_frequency_detects_smooth_gradients() {
        let smooth = gradient(16, 16);
        assert!(smooth.is_low_frequency(smooth.bounds(), LOW_FREQUENCY_THRESHOLD));

        let mut edged = smooth.clone();
        edged.set_pixel(5, 5, 0xFFFFFF);
        assert!(!edged.is_low_frequency(edged.bounds(), LOW_FREQUENCY_THRESHOLD));
        // The spike is outside this rect.
        assert!(edged.is_low_frequency(Rect::new(8, 8, 8, 8), LOW_FREQUENCY_THRESHOLD));
    }

    #[test]
    fn neighbour_threshold_is_inclusive() {
        assert!(neighbours_within(0x101010, 0x181818, 0x080808, 8));
        assert!(!neighbours_within(0x101010, 0x191010, 0x101010, 8));
        assert!(!neighbours_within(0x101010, 0x101010, 0x101007, 8));
        assert!(neighbours_within(0x000000, 0x000000, 0x000000, 0));
        assert!(neighbours_within(0xFF00FF, 0x00FF00, 0xFFFFFF, 255));
    }

    #[test]
    fn resized_keeps_overlap() {
        let s = gradient(4, 4);
        let bigger = s.resized(6, 3);
        assert_eq!(bigger.width(), 6);
        assert_eq!(bigger.pixel(3, 2), s.pixel(3, 2));
        assert_eq!(bigger.pixel(5, 0), 0);
    }

    #[test]
    fn rect_clipping() {
        let r = Rect::new(12, 12, 8, 8).clipped_to(16, 14);
        assert_eq!(r, Rect::new(12, 12, 4, 2));
        assert!(Rect::new(20, 0, 4, 4).clipped_to(16, 16).is_empty());
    }
}
