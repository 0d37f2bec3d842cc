//! Compact pixel payload as carried on the wire.
//!
//! The payload is the compacted surface built by the encoder, stored as
//! zstd-compressed little-endian pixels. An empty surface (no copied
//! blocks) is sent as an empty byte vector without touching zstd.
//! Inside the JSON envelope the compressed bytes travel as base64.

use serde::{Deserialize, Serialize};

use crate::error::TrickleError;
use crate::surface::PixelSurface;

/// Serialized form of a [`PixelSurface`].
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PixelPayload {
    /// Payload width in pixels.
    pub width: u32,
    /// Payload height in pixels.
    pub height: u32,
    /// zstd frame of `width * height` little-endian `u32` pixels.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl std::fmt::Debug for PixelPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelPayload")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelPayload {
    /// Compress `surface` at the given zstd level.
    pub fn encode(surface: &PixelSurface, level: i32) -> Result<Self, TrickleError> {
        if surface.is_empty() {
            return Ok(Self {
                width: surface.width(),
                height: surface.height(),
                data: Vec::new(),
            });
        }

        let mut raw = Vec::with_capacity(surface.pixels().len() * 4);
        for px in surface.pixels() {
            raw.extend_from_slice(&px.to_le_bytes());
        }

        let data = zstd::encode_all(raw.as_slice(), level)
            .map_err(|e| TrickleError::Encoding(format!("zstd encode failed: {e}")))?;

        Ok(Self {
            width: surface.width(),
            height: surface.height(),
            data,
        })
    }

    /// Materialise the pixels.
    ///
    /// Fails with [`TrickleError::Decode`] when the bytes do not
    /// decompress or do not hold exactly `width * height` pixels.
    pub fn decode(&self) -> Result<PixelSurface, TrickleError> {
        let expected = self.width as usize * self.height as usize * 4;
        if expected == 0 {
            if !self.data.is_empty() {
                return Err(TrickleError::decode("empty payload carries data"));
            }
            return Ok(PixelSurface::new(self.width, self.height));
        }

        // Output is capped at the declared size; anything longer fails here.
        let raw = zstd::bulk::decompress(&self.data, expected)
            .map_err(|e| TrickleError::decode(format!("zstd decode failed: {e}")))?;
        if raw.len() != expected {
            return Err(TrickleError::decode(format!(
                "payload holds {} bytes, expected {expected}",
                raw.len()
            )));
        }

        let pixels = raw
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(PixelSurface::from_pixels(self.width, self.height, pixels))
    }

    /// Whether the payload carries no pixels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Compressed size in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

// ── Tests ────────────────────────────────────────────────────────
