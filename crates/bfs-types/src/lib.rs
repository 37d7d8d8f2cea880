#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Fixed page size of the container, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// 64-bit container magic, stored big-endian at offset 0 of page 0.
pub const CONTAINER_MAGIC: u64 = 0x0000_0000_DEAD_BEEF;

/// On-disk format version.
pub const FORMAT_VERSION: u64 = 1;

/// Encoded header length in bytes (five big-endian u64 fields).
pub const HEADER_LEN: usize = 40;

/// Encoded inode record length in bytes.
pub const INODE_RECORD_LEN: usize = 32;

/// Inode records per inode-table page.
pub const INODES_PER_PAGE: u32 = (PAGE_SIZE / INODE_RECORD_LEN) as u32;

/// Block-index entries in one meta-page.
pub const PTRS_PER_PAGE: u32 = (PAGE_SIZE / 4) as u32;

/// Maximum file size: one meta-page of content pointers, no double indirection.
pub const MAX_FILE_SIZE: u64 = PTRS_PER_PAGE as u64 * PAGE_SIZE as u64;

/// Encoded directory entry length: child index + name length + name payload.
pub const DIR_ENTRY_LEN: usize = 4 + 8 + NAME_CAP;

/// Maximum directory entry name length in bytes.
pub const NAME_CAP: usize = 255;

/// Data blocks addressable by the single bitmap page (one bit each).
pub const BITMAP_CAPACITY: u32 = (PAGE_SIZE * 8) as u32;

/// Absolute page number within the container.
///
/// Pages and blocks are the same unit; "block" is a page addressed through
/// the bitmap/data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageIndex(pub u32);

/// Index into the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeIndex(pub u32);

impl InodeIndex {
    /// The root directory of every container.
    pub const ROOT: Self = Self(0);
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container geometry derived from the header.
///
/// Layout: page 0 header, pages `1..=T` inode table, page `T+1` bitmap,
/// data blocks from `T+2` up to `total_pages()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    inode_count: u32,
    max_data_blocks: u32,
}

impl Geometry {
    /// Validate and build a geometry.
    ///
    /// `max_data_blocks` is capped by the single bitmap page.
    pub fn new(inode_count: u32, max_data_blocks: u32) -> Result<Self, ParseError> {
        if inode_count == 0 {
            return Err(ParseError::InvalidField {
                field: "inode_count",
                reason: "must be non-zero",
            });
        }
        if max_data_blocks == 0 || max_data_blocks > BITMAP_CAPACITY {
            return Err(ParseError::InvalidField {
                field: "max_data_blocks",
                reason: "must be in 1..=32768 (one bitmap page)",
            });
        }
        Ok(Self {
            inode_count,
            max_data_blocks,
        })
    }

    #[must_use]
    pub fn inode_count(&self) -> u32 {
        self.inode_count
    }

    #[must_use]
    pub fn max_data_blocks(&self) -> u32 {
        self.max_data_blocks
    }

    /// Number of pages occupied by the inode table.
    #[must_use]
    pub fn inode_table_pages(&self) -> u32 {
        self.inode_count.div_ceil(INODES_PER_PAGE)
    }

    /// Page holding the data-block bitmap.
    #[must_use]
    pub fn bitmap_page(&self) -> PageIndex {
        PageIndex(1 + self.inode_table_pages())
    }

    /// First page of the data region.
    #[must_use]
    pub fn first_data_block(&self) -> PageIndex {
        PageIndex(2 + self.inode_table_pages())
    }

    /// Total container size in pages.
    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.first_data_block().0 + self.max_data_blocks
    }

    /// Whether `index` names a slot inside the inode table.
    #[must_use]
    pub fn contains_inode(&self, index: InodeIndex) -> bool {
        index.0 < self.inode_count
    }

    /// `(page, byte offset)` of an inode record within the table region.
    #[must_use]
    pub fn inode_location(&self, index: InodeIndex) -> Option<(PageIndex, usize)> {
        if !self.contains_inode(index) {
            return None;
        }
        let page = 1 + index.0 / INODES_PER_PAGE;
        let offset = (index.0 % INODES_PER_PAGE) as usize * INODE_RECORD_LEN;
        Some((PageIndex(page), offset))
    }

    /// Whether `page` lies within the data region.
    #[must_use]
    pub fn contains_data_block(&self, page: PageIndex) -> bool {
        page.0 >= self.first_data_block().0 && page.0 < self.total_pages()
    }
}

/// Codec-level failure while reading or writing on-disk records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_be_i32(data: &[u8], offset: usize) -> Result<i32, ParseError> {
    read_be_u32(data, offset).map(|v| v as i32)
}

#[inline]
pub fn read_be_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_be_i64(data: &[u8], offset: usize) -> Result<i64, ParseError> {
    read_be_u64(data, offset).map(|v| v as i64)
}

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// Timestamps before the epoch clamp to zero.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
