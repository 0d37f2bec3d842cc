//! Draw-string opcodes.
//!
//! A draw string is ASCII: a command letter followed by an optional
//! decimal run-length (default 1), repeated. Whitespace between
//! commands is ignored.
//!
//! | Letter | Opcode          | Argument                          |
//! |--------|-----------------|-----------------------------------|
//! | `X`    | `Width`         | target width in pixels            |
//! | `Y`    | `Height`        | target height in pixels           |
//! | `B`    | `BlockSize`     | block edge in pixels              |
//! | `K`    | `Skip`          | blocks to skip                    |
//! | `C`    | `Copy`          | blocks to copy from the payload   |
//! | `s`    | `SetColor`      | packed `0xRRGGBB` fill color      |
//! | `S`    | `Solid`         | blocks to fill                    |
//! | `d`    | `SetDuplicate`  | payload grid index to replay      |
//! | `D`    | `Duplicate`     | blocks to fill with that tile     |
//! | `!`    | `FullCopy`      | -                                 |

use std::fmt;

use crate::error::TrickleError;

/// One decoded draw-string command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Width(u32),
    Height(u32),
    BlockSize(u32),
    Skip(u32),
    Copy(u32),
    SetColor(u32),
    Solid(u32),
    SetDuplicate(u32),
    Duplicate(u32),
    FullCopy,
    /// A letter this decoder does not know; skipped.
    Unknown(char, u32),
}

impl Opcode {
    fn from_letter(letter: char, n: u32) -> Self {
        match letter {
            'X' => Self::Width(n),
            'Y' => Self::Height(n),
            'B' => Self::BlockSize(n),
            'K' => Self::Skip(n),
            'C' => Self::Copy(n),
            's' => Self::SetColor(n),
            'S' => Self::Solid(n),
            'd' => Self::SetDuplicate(n),
            'D' => Self::Duplicate(n),
            '!' => Self::FullCopy,
            other => Self::Unknown(other, n),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Width(n) => write!(f, "X{n}"),
            Self::Height(n) => write!(f, "Y{n}"),
            Self::BlockSize(n) => write!(f, "B{n}"),
            Self::Skip(n) => write!(f, "K{n}"),
            Self::Copy(n) => write!(f, "C{n}"),
            Self::SetColor(n) => write!(f, "s{n}"),
            Self::Solid(n) => write!(f, "S{n}"),
            Self::SetDuplicate(n) => write!(f, "d{n}"),
            Self::Duplicate(n) => write!(f, "D{n}"),
            Self::FullCopy => write!(f, "!"),
            Self::Unknown(c, n) => write!(f, "{c}{n}"),
        }
    }
}

// ── OpcodeReader ─────────────────────────────────────────────────

/// Iterator over the opcodes of a draw string.
///
/// Yields `Err` only for a run-length that overflows `u32`; unknown
/// letters come out as [`Opcode::Unknown`].
pub struct OpcodeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> OpcodeReader<'a> {
    pub fn new(draw: &'a str) -> Self {
        Self {
            bytes: draw.as_bytes(),
            pos: 0,
        }
    }

    /// Greedy ASCII-digit run starting at `pos`; `None` when there is none.
    fn number(&mut self) -> Result<Option<u32>, TrickleError> {
        let start = self.pos;
        let mut value: u32 = 0;
        while let Some(&b) = self.bytes.get(self.pos) {
            if !b.is_ascii_digit() {
                break;
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((b - b'0') as u32))
                .ok_or_else(|| {
                    TrickleError::protocol(format!("run-length overflow at offset {start}"))
                })?;
            self.pos += 1;
        }
        Ok((self.pos > start).then_some(value))
    }
}

impl Iterator for OpcodeReader<'_> {
    type Item = Result<Opcode, TrickleError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.bytes.get(self.pos)?.is_ascii_whitespace() {
            self.pos += 1;
        }
        let letter = self.bytes[self.pos] as char;
        self.pos += 1;
        Some(
            self.number()
                .map(|n| Opcode::from_letter(letter, n.unwrap_or(1))),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
