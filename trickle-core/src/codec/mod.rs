//! Length-prefixed JSON framing for `tokio_util::codec::Framed`.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 LE  │ JSON document (len bytes)    │
//! └──────────────┴──────────────────────────────┘
//! ```

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TrickleError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Largest accepted message body.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Decodes `In`, encodes `Out`.
pub struct MessageCodec<In, Out> {
    max_frame: usize,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Viewer side: reads [`ServerMessage`], writes [`ClientMessage`].
pub type ClientCodec = MessageCodec<ServerMessage, ClientMessage>;

/// Host side: reads [`ClientMessage`], writes [`ServerMessage`].
pub type HostCodec = MessageCodec<ClientMessage, ServerMessage>;

impl<In, Out> MessageCodec<In, Out> {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame,
            _marker: PhantomData,
        }
    }
}

impl<In, Out> Default for MessageCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned, Out> Decoder for MessageCodec<In, Out> {
    type Item = In;
    type Error = TrickleError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_le_bytes(prefix) as usize;

        if len > self.max_frame {
            return Err(TrickleError::protocol(format!(
                "frame of {len} bytes exceeds {}",
                self.max_frame
            )));
        }
        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let body = src.split_to(len);
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| TrickleError::protocol(format!("malformed message: {e}")))
    }
}

impl<In, Out: Serialize> Encoder<Out> for MessageCodec<In, Out> {
    type Error = TrickleError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > self.max_frame {
            return Err(TrickleError::Encoding(format!(
                "message of {} bytes exceeds {}",
                body.len(),
                self.max_frame
            )));
        }
        dst.reserve(LENGTH_PREFIX + body.len());
        dst.put_u32_le(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
