//! SF container format
//!
//! Layout (packed, little-endian):
//! ```text
//! offset 0   magic[4]        "1A4P", not NUL-terminated
//! offset 4   header_size     u16
//! offset 6   version         i16   47..=128
//! offset 8   section_count   u8    5..=19
//! offset 9   section_count × section record (31 bytes each)
//!
//! section record:
//!   +0   name[19]   not guaranteed NUL-terminated
//!   +19  type       i32   one of 19, 10, 58, 57, 11, 53
//!   +23  offset     i32   byte offset in the file
//!   +27  size       i32   byte length
//! ```
//!
//! Every field is decoded explicitly from a byte slice; nothing is overlaid
//! on mapped memory. Section offsets and sizes are not checked against the
//! file here, that depends on the request being served.

use std::borrow::Cow;
use thiserror::Error;

/// Magic bytes at the start of every SF file
pub const SF_MAGIC: &[u8; 4] = b"1A4P";

/// Encoded size of [`SfHeader`]
pub const SF_HEADER_SIZE: usize = 9;

/// Encoded size of one [`SectionHeader`]
pub const SECTION_HEADER_SIZE: usize = 31;

/// Width of the fixed section name field
pub const SECTION_NAME_LEN: usize = 19;

/// Lowest accepted version
pub const MIN_VERSION: i16 = 47;
/// Highest accepted version
pub const MAX_VERSION: i16 = 128;

/// Fewest sections a valid file declares
pub const MIN_SECTIONS: u8 = 5;
/// Most sections a valid file declares
pub const MAX_SECTIONS: u8 = 19;

/// Section types accepted in a section record
pub const VALID_SECTION_TYPES: [i32; 6] = [19, 10, 58, 57, 11, 53];

/// Reasons an SF file fails validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A header or record runs past the end of the buffer
    #[error("need {needed} bytes but only {available} are available")]
    Truncated {
        /// Bytes the lookup needed
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// First four bytes are not `1A4P`
    #[error("wrong magic {0:02x?}")]
    Magic([u8; 4]),

    /// Version outside the accepted range
    #[error("version {0} outside 47..=128")]
    Version(i16),

    /// Section count outside the accepted range
    #[error("section count {0} outside 5..=19")]
    SectionCount(u8),

    /// A section record carries a type outside [`VALID_SECTION_TYPES`]
    #[error("section {index} has invalid type {sect_type}")]
    SectionType {
        /// Zero-based record index
        index: usize,
        /// Type found in the record
        sect_type: i32,
    },
}

/// Global SF header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfHeader {
    /// Raw magic bytes
    pub magic: [u8; 4],
    /// Size of the header and section table as recorded in the file
    pub header_size: u16,
    /// Format version
    pub version: i16,
    /// Number of section records that follow
    pub section_count: u8,
}

impl SfHeader {
    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; SF_HEADER_SIZE] {
        let mut bytes = [0u8; SF_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..6].copy_from_slice(&self.header_size.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8] = self.section_count;
        bytes
    }
}

/// One entry of the section table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Fixed-width name field, NUL-padded when shorter
    pub name: [u8; SECTION_NAME_LEN],
    /// Section type
    pub sect_type: i32,
    /// Byte offset of the section in the file
    pub offset: i32,
    /// Section length in bytes
    pub size: i32,
}

impl SectionHeader {
    /// Section name up to the first NUL, lossily decoded
    pub fn name(&self) -> Cow<'_, str> {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(SECTION_NAME_LEN);
        String::from_utf8_lossy(&self.name[..len])
    }

    /// Check the type against the accepted set; `index` is zero-based
    pub fn validate(self, index: usize) -> Result<Self, FormatError> {
        if VALID_SECTION_TYPES.contains(&self.sect_type) {
            Ok(self)
        } else {
            Err(FormatError::SectionType {
                index,
                sect_type: self.sect_type,
            })
        }
    }

    /// Serialize record to bytes
    pub fn to_bytes(&self) -> [u8; SECTION_HEADER_SIZE] {
        let mut bytes = [0u8; SECTION_HEADER_SIZE];
        bytes[0..19].copy_from_slice(&self.name);
        bytes[19..23].copy_from_slice(&self.sect_type.to_le_bytes());
        bytes[23..27].copy_from_slice(&self.offset.to_le_bytes());
        bytes[27..31].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; SECTION_NAME_LEN];
        name.copy_from_slice(&raw[0..19]);
        Self {
            name,
            sect_type: i32::from_le_bytes([raw[19], raw[20], raw[21], raw[22]]),
            offset: i32::from_le_bytes([raw[23], raw[24], raw[25], raw[26]]),
            size: i32::from_le_bytes([raw[27], raw[28], raw[29], raw[30]]),
        }
    }
}

/// Decode and validate the global header at the start of `bytes`
///
/// Checks run in field order (magic, version, section count) and the first
/// failing field is reported.
pub fn parse_header(bytes: &[u8]) -> Result<SfHeader, FormatError> {
    let raw = bytes.get(..SF_HEADER_SIZE).ok_or(FormatError::Truncated {
        needed: SF_HEADER_SIZE,
        available: bytes.len(),
    })?;

    let header = SfHeader {
        magic: [raw[0], raw[1], raw[2], raw[3]],
        header_size: u16::from_le_bytes([raw[4], raw[5]]),
        version: i16::from_le_bytes([raw[6], raw[7]]),
        section_count: raw[8],
    };

    if &header.magic != SF_MAGIC {
        return Err(FormatError::Magic(header.magic));
    }
    if !(MIN_VERSION..=MAX_VERSION).contains(&header.version) {
        return Err(FormatError::Version(header.version));
    }
    if !(MIN_SECTIONS..=MAX_SECTIONS).contains(&header.section_count) {
        return Err(FormatError::SectionCount(header.section_count));
    }

    Ok(header)
}

/// Decode and type-check the zero-based `index`-th section record
pub fn parse_section_header(bytes: &[u8], index: usize) -> Result<SectionHeader, FormatError> {
    let start = index
        .checked_mul(SECTION_HEADER_SIZE)
        .and_then(|n| n.checked_add(SF_HEADER_SIZE))
        .unwrap_or(usize::MAX);
    let end = start.saturating_add(SECTION_HEADER_SIZE);

    let raw = bytes.get(start..end).ok_or(FormatError::Truncated {
        needed: end,
        available: bytes.len(),
    })?;

    SectionHeader::decode(raw).validate(index)
}

/// A validated header together with the bytes it describes
///
/// Section records are decoded lazily, one per lookup.
#[derive(Debug, Clone, Copy)]
pub struct SfFile<'a> {
    header: SfHeader,
    bytes: &'a [u8],
}

impl<'a> SfFile<'a> {
    /// Validate the global header of `bytes`
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FormatError> {
        Ok(Self {
            header: parse_header(bytes)?,
            bytes,
        })
    }

    /// The validated global header
    pub fn header(&self) -> &SfHeader {
        &self.header
    }

    /// The whole file
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Zero-based section lookup
    pub fn section(&self, index: usize) -> Result<SectionHeader, FormatError> {
        parse_section_header(self.bytes, index)
    }

    /// All sections in table order
    pub fn sections(&self) -> impl Iterator<Item = Result<SectionHeader, FormatError>> + '_ {
        (0..self.header.section_count as usize).map(|i| self.section(i))
    }
}
