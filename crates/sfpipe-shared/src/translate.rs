//! Offset translation
//!
//! Turns the three addressing modes of the protocol into a byte range of the
//! mapped file:
//!
//! - raw: `(offset, length)` taken as-is
//! - section: `(section_number, offset, length)`, 1-based section numbers
//! - logical: `(logical_offset, length)` in a space where every section
//!   occupies a whole number of [`LOGICAL_PAGE_SIZE`] pages
//!
//! ```text
//! logical   0          6144       9216
//!           │ section 1 │ section 2 │
//!           │ 4000 │pad │2000│pad   │
//! ```
//!
//! A logical offset is never used to address the file directly; it is always
//! mapped back to `section.offset + byte_offset`, and offsets that fall into
//! padding are rejected.

use crate::format::{FormatError, SectionHeader, SfFile};
use std::ops::Range;
use thiserror::Error;

/// Granularity of the logical address space
pub const LOGICAL_PAGE_SIZE: u64 = 3072;

/// Why a requested range cannot be served
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoundsError {
    /// The range ends past the mapped file
    #[error("bytes {start}..{end} run past the end of the {file_size}-byte file")]
    PastEndOfFile {
        /// First file byte requested
        start: u64,
        /// One past the last file byte requested
        end: u64,
        /// Length of the mapped file
        file_size: u64,
    },

    /// More bytes requested than the shared region holds
    #[error("length {length} exceeds the {region_size}-byte shared region")]
    LongerThanRegion {
        /// Requested length
        length: u32,
        /// Size of the shared region
        region_size: u64,
    },

    /// Section number is zero or above the section count
    #[error("section {number} outside 1..={count}")]
    NoSuchSection {
        /// Requested 1-based section number
        number: u32,
        /// Sections in the file
        count: usize,
    },

    /// The range starts or ends past the section
    #[error("bytes {start}..{end} run past the end of a {size}-byte section")]
    PastEndOfSection {
        /// Offset inside the section
        start: u64,
        /// Offset plus length
        end: u64,
        /// Section size
        size: u64,
    },

    /// A section record holds a negative offset or size
    #[error("section {index} has a negative offset or size")]
    NegativeExtent {
        /// Zero-based record index
        index: usize,
    },

    /// No section covers the logical offset
    #[error("logical offset {0} lies beyond the last section")]
    BeyondLogicalSpace(u32),
}

/// Failure of a section-based lookup
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// A visited section record is invalid
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The range itself is out of bounds
    #[error(transparent)]
    Bounds(#[from] BoundsError),
}

/// Sizes every translated range is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Length of the mapped file
    pub file_size: u64,
    /// Size of the shared region
    pub region_size: u64,
}

/// Half-open byte range inside the mapped file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRange {
    /// First byte
    pub start: usize,
    /// Number of bytes
    pub len: usize,
}

impl FileRange {
    /// One past the last byte
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// The range as a slice index
    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Source of type-checked section records, indexed from zero
pub trait SectionTable {
    /// Number of section records
    fn section_count(&self) -> usize;

    /// Record `index`, rejected if its type is invalid
    fn section(&self, index: usize) -> Result<SectionHeader, FormatError>;
}

impl SectionTable for SfFile<'_> {
    fn section_count(&self) -> usize {
        self.header().section_count as usize
    }

    fn section(&self, index: usize) -> Result<SectionHeader, FormatError> {
        SfFile::section(self, index)
    }
}

impl SectionTable for [SectionHeader] {
    fn section_count(&self) -> usize {
        self.len()
    }

    fn section(&self, index: usize) -> Result<SectionHeader, FormatError> {
        let record = self.get(index).ok_or(FormatError::Truncated {
            needed: index + 1,
            available: self.len(),
        })?;
        record.validate(index)
    }
}

/// Number of logical bytes a section of `size` bytes occupies
pub fn logical_span(size: u64) -> u64 {
    size.div_ceil(LOGICAL_PAGE_SIZE) * LOGICAL_PAGE_SIZE
}

/// Range for a raw file offset
pub fn raw_range(offset: u32, length: u32, limits: Limits) -> Result<FileRange, BoundsError> {
    fits_region(length, limits)?;
    within_file(offset as u64, length as u64, limits)
}

/// Range for an offset inside a 1-based section
pub fn section_range<T: SectionTable + ?Sized>(
    table: &T,
    number: u32,
    offset: u32,
    length: u32,
    limits: Limits,
) -> Result<FileRange, TranslateError> {
    let count = table.section_count();
    let index = (number as usize)
        .checked_sub(1)
        .filter(|&i| i < count)
        .ok_or(BoundsError::NoSuchSection { number, count })?;

    let section = table.section(index)?;
    let (sect_offset, sect_size) = extent(&section, index)?;

    if offset as u64 > sect_size {
        return Err(BoundsError::PastEndOfSection {
            start: offset as u64,
            end: offset as u64 + length as u64,
            size: sect_size,
        }
        .into());
    }
    fits_region(length, limits)?;

    Ok(within_file(sect_offset + offset as u64, length as u64, limits)?)
}

/// Range for an offset in the page-rounded logical space
///
/// Sections are walked in order and each visited record is type-checked. An
/// offset sitting exactly on a section's logical end belongs to the next
/// section.
pub fn logical_range<T: SectionTable + ?Sized>(
    table: &T,
    logical_offset: u32,
    length: u32,
    limits: Limits,
) -> Result<FileRange, TranslateError> {
    fits_region(length, limits)?;

    let target = logical_offset as u64;
    let mut section_start = 0u64;

    for index in 0..table.section_count() {
        let section = table.section(index)?;
        let (sect_offset, sect_size) = extent(&section, index)?;
        let section_end = section_start + logical_span(sect_size);

        if target < section_end {
            let byte_offset = target - section_start;
            let byte_end = byte_offset + length as u64;
            if byte_offset > sect_size || byte_end > sect_size {
                return Err(BoundsError::PastEndOfSection {
                    start: byte_offset,
                    end: byte_end,
                    size: sect_size,
                }
                .into());
            }
            return Ok(within_file(sect_offset + byte_offset, length as u64, limits)?);
        }

        section_start = section_end;
    }

    Err(BoundsError::BeyondLogicalSpace(logical_offset).into())
}

fn fits_region(length: u32, limits: Limits) -> Result<(), BoundsError> {
    if length as u64 > limits.region_size {
        return Err(BoundsError::LongerThanRegion {
            length,
            region_size: limits.region_size,
        });
    }
    Ok(())
}

fn within_file(start: u64, length: u64, limits: Limits) -> Result<FileRange, BoundsError> {
    let end = start + length;
    if end > limits.file_size {
        return Err(BoundsError::PastEndOfFile {
            start,
            end,
            file_size: limits.file_size,
        });
    }
    Ok(FileRange {
        start: start as usize,
        len: length as usize,
    })
}

fn extent(section: &SectionHeader, index: usize) -> Result<(u64, u64), BoundsError> {
    let offset = u64::try_from(section.offset).map_err(|_| BoundsError::NegativeExtent { index })?;
    let size = u64::try_from(section.size).map_err(|_| BoundsError::NegativeExtent { index })?;
    Ok((offset, size))
}
