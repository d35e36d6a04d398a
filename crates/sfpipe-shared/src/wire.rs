//! Field codec for the pipe protocol
//!
//! Two field kinds travel over the channels:
//! ```text
//! string: │ len: u8 │ len bytes │   (no terminator, at most 255 bytes)
//! number: │ u32 little-endian     │
//! ```
//!
//! The codec is message-agnostic. [`crate::messages`] decides which fields
//! follow each other for every request and response.

use std::io::{self, Read, Write};
use thiserror::Error;

/// Longest payload a string field can carry
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

/// Errors raised while moving fields over a channel
#[derive(Debug, Error)]
pub enum WireError {
    /// Reading from the channel failed or hit end of stream
    #[error("failed to read from channel: {0}")]
    Read(#[source] io::Error),

    /// Writing to the channel failed
    #[error("failed to write to channel: {0}")]
    Write(#[source] io::Error),

    /// Payload does not fit a one-byte length prefix
    #[error("string field of {0} bytes exceeds the 255-byte limit")]
    StringTooLong(usize),

    /// Fields arrived but do not form a valid message
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl WireError {
    /// True when the peer closed the channel before a full field arrived
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Read(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Write a length-prefixed string field
///
/// Nothing is written when the payload is too long.
pub fn write_string<W: Write + ?Sized>(w: &mut W, s: impl AsRef<[u8]>) -> Result<(), WireError> {
    let s = s.as_ref();
    let len = u8::try_from(s.len()).map_err(|_| WireError::StringTooLong(s.len()))?;

    let mut field = Vec::with_capacity(1 + s.len());
    field.push(len);
    field.extend_from_slice(s);
    w.write_all(&field).map_err(WireError::Write)
}

/// Read a length-prefixed string field
pub fn read_string<R: Read + ?Sized>(r: &mut R) -> Result<Vec<u8>, WireError> {
    let mut len = [0u8; 1];
    r.read_exact(&mut len).map_err(WireError::Read)?;

    let mut payload = vec![0u8; len[0] as usize];
    r.read_exact(&mut payload).map_err(WireError::Read)?;
    Ok(payload)
}

/// Write a 4-byte number field
pub fn write_u32<W: Write + ?Sized>(w: &mut W, n: u32) -> Result<(), WireError> {
    w.write_all(&n.to_le_bytes()).map_err(WireError::Write)
}

/// Read a 4-byte number field
pub fn read_u32<R: Read + ?Sized>(r: &mut R) -> Result<u32, WireError> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes).map_err(WireError::Read)?;
    Ok(u32::from_le_bytes(bytes))
}
