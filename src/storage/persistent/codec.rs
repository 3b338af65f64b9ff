//! Byte layout of the commit log.
//!
//! ```text
//! file   [b"DLOG"][format: 1 byte]
//! frame  [kind: 1 byte][sequence: 8 bytes LE][length: 4 bytes LE][body: JSON][crc32: 4 bytes LE]
//! ```
//!
//! The checksum covers the kind, sequence and length as well as the body, so
//! a damaged header is caught the same way as a damaged body.

use std::io::{self, Read, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"DLOG";

/// Layout version written after the magic.
pub const LOG_FORMAT: u8 = 2;

pub const HEADER_LEN: u64 = 5;

/// kind + sequence + length
const FRAME_HEAD: usize = 1 + 8 + 4;
const FRAME_TAIL: usize = 4;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// One atomically committed batch of store operations.
    Batch = 1,
}

impl FrameKind {
    const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Batch),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    /// The input ended inside a frame: a write was cut short.
    #[error("frame cut short")]
    Truncated,

    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),

    #[error("frame body of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },

    #[error("checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    Checksum { stored: u32, computed: u32 },

    #[error("frame body is not a valid entry: {0}")]
    Body(#[from] serde_json::Error),

    #[error("not a commit log (magic {0:?})")]
    BadMagic([u8; 4]),

    #[error("unsupported commit log format {0}")]
    UnsupportedFormat(u8),

    #[error("commit log I/O failed: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(e)
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    pub kind: FrameKind,
    pub sequence: u64,
    pub body: T,
}

/// Encodes and decodes frames under one body size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_body: usize,
}

impl FrameCodec {
    #[must_use]
    pub const fn new(max_body: usize) -> Self {
        Self { max_body }
    }

    /// Serializes `body` into one checksummed frame.
    ///
    /// # Errors
    ///
    /// `FrameError::TooLarge` if the JSON body exceeds the limit, or
    /// `FrameError::Body` if it cannot be serialized.
    pub fn encode<T: Serialize>(&self, kind: FrameKind, sequence: u64, body: &T) -> Result<Vec<u8>, FrameError> {
        let data = serde_json::to_vec(body)?;
        let len = self.check_len(data.len())?;

        let mut out = Vec::with_capacity(FRAME_HEAD + data.len() + FRAME_TAIL);
        out.push(kind as u8);
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&data);
        let crc = checksum(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    /// Reads and verifies one frame.
    ///
    /// # Errors
    ///
    /// `FrameError::Truncated` when the reader ends mid-frame; any other
    /// variant means the bytes are damaged.
    pub fn decode<T: DeserializeOwned>(&self, reader: &mut impl Read) -> Result<Frame<T>, FrameError> {
        let mut head = [0u8; FRAME_HEAD];
        reader.read_exact(&mut head)?;

        let kind = FrameKind::from_byte(head[0]).ok_or(FrameError::UnknownKind(head[0]))?;
        let mut sequence = [0u8; 8];
        sequence.copy_from_slice(&head[1..9]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&head[9..13]);
        let len = u32::from_le_bytes(len) as usize;
        self.check_len(len)?;

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut stored = [0u8; FRAME_TAIL];
        reader.read_exact(&mut stored)?;
        let stored = u32::from_le_bytes(stored);

        let mut hasher = Hasher::new();
        hasher.update(&head);
        hasher.update(&data);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(FrameError::Checksum { stored, computed });
        }

        Ok(Frame {
            kind,
            sequence: u64::from_le_bytes(sequence),
            body: serde_json::from_slice(&data)?,
        })
    }

    fn check_len(&self, len: usize) -> Result<u32, FrameError> {
        let too_large = FrameError::TooLarge {
            len,
            limit: self.max_body,
        };
        if len > self.max_body {
            return Err(too_large);
        }
        u32::try_from(len).map_err(|_| too_large)
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

pub fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[LOG_FORMAT])
}

/// # Errors
///
/// `FrameError::BadMagic` or `FrameError::UnsupportedFormat` for a file that
/// is not a commit log of this layout.
pub fn read_header(reader: &mut impl Read) -> Result<(), FrameError> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&header[..4]);
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }
    if header[4] != LOG_FORMAT {
        return Err(FrameError::UnsupportedFormat(header[4]));
    }
    Ok(())
}
