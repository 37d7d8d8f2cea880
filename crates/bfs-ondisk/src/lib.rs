#![forbid(unsafe_code)]
//! Bit-exact on-disk records for the BoxFS container format.
//!
//! All multi-byte fields are big-endian. Three record kinds live here:
//! the 40-byte container header, the 32-byte inode record, and the
//! 267-byte directory entry.

use bfs_types::{
    CONTAINER_MAGIC, DIR_ENTRY_LEN, FORMAT_VERSION, Geometry, INODE_RECORD_LEN, InodeIndex,
    NAME_CAP, PAGE_SIZE, PageIndex, ParseError, ensure_slice, read_be_i32, read_be_i64,
    read_be_u32, read_be_u64,
};
use serde::{Deserialize, Serialize};

// ── Header ──────────────────────────────────────────────────────────────────

/// Container header, stored at the start of page 0.
///
/// Field order: magic, version, inode count, max data-block count, page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub inode_count: u32,
    pub max_data_blocks: u32,
}

impl Header {
    /// Parse and validate a header from the first page.
    ///
    /// A byte-swapped magic is detected explicitly so that a container
    /// written with the opposite endianness is rejected with a message
    /// naming the cause rather than a generic magic mismatch.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_be_u64(data, 0)?;
        if magic != CONTAINER_MAGIC {
            if magic.swap_bytes() == CONTAINER_MAGIC {
                return Err(ParseError::InvalidField {
                    field: "magic",
                    reason: "byte-swapped magic: container written with opposite endianness",
                });
            }
            return Err(ParseError::InvalidMagic {
                expected: CONTAINER_MAGIC,
                actual: magic,
            });
        }

        let version = read_be_u64(data, 8)?;
        if version != FORMAT_VERSION {
            return Err(ParseError::InvalidField {
                field: "version",
                reason: "unsupported format version",
            });
        }

        let inode_count = read_be_u64(data, 16)?;
        let max_data_blocks = read_be_u64(data, 24)?;
        let page_size = read_be_u64(data, 32)?;
        if page_size != PAGE_SIZE as u64 {
            return Err(ParseError::InvalidField {
                field: "page_size",
                reason: "page size does not match this implementation",
            });
        }

        let inode_count = u32::try_from(inode_count).map_err(|_| ParseError::InvalidField {
            field: "inode_count",
            reason: "exceeds u32",
        })?;
        let max_data_blocks =
            u32::try_from(max_data_blocks).map_err(|_| ParseError::InvalidField {
                field: "max_data_blocks",
                reason: "exceeds u32",
            })?;

        // Geometry::new re-validates the counts against the bitmap capacity.
        Geometry::new(inode_count, max_data_blocks)?;

        Ok(Self {
            inode_count,
            max_data_blocks,
        })
    }

    /// Encode the header into the first `HEADER_LEN` bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&CONTAINER_MAGIC.to_be_bytes());
        out[8..16].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        out[16..24].copy_from_slice(&u64::from(self.inode_count).to_be_bytes());
        out[24..32].copy_from_slice(&u64::from(self.max_data_blocks).to_be_bytes());
        out[32..40].copy_from_slice(&(PAGE_SIZE as u64).to_be_bytes());
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        // Validated at parse/create time.
        Geometry::new(self.inode_count, self.max_data_blocks)
            .expect("header holds a validated geometry")
    }
}

// ── Inode record ────────────────────────────────────────────────────────────

/// Inode type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeKind {
    Unused,
    File,
    Dir,
}

impl InodeKind {
    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            Self::Unused => 0,
            Self::File => 1,
            Self::Dir => 2,
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self, ParseError> {
        match tag {
            0 => Ok(Self::Unused),
            1 => Ok(Self::File),
            2 => Ok(Self::Dir),
            _ => Err(ParseError::InvalidField {
                field: "inode_type",
                reason: "unknown type tag",
            }),
        }
    }
}

/// Persisted portion of an inode: 32 bytes on disk.
///
/// Runtime reference counts and lock state live in the inode table only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRecord {
    pub kind: InodeKind,
    pub link: i32,
    pub size: i32,
    pub meta_page: PageIndex,
    pub created_at: i64,
    pub modified_at: i64,
}

impl InodeRecord {
    /// An all-zero, unused slot.
    #[must_use]
    pub fn unused() -> Self {
        Self {
            kind: InodeKind::Unused,
            link: 0,
            size: 0,
            meta_page: PageIndex(0),
            created_at: 0,
            modified_at: 0,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(data, 0, INODE_RECORD_LEN)?;
        let kind = InodeKind::from_tag(read_be_u32(data, 0)?)?;
        Ok(Self {
            kind,
            link: read_be_i32(data, 4)?,
            size: read_be_i32(data, 8)?,
            meta_page: PageIndex(read_be_u32(data, 12)?),
            created_at: read_be_i64(data, 16)?,
            modified_at: read_be_i64(data, 24)?,
        })
    }

    pub fn encode_into(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.kind.tag().to_be_bytes());
        out[4..8].copy_from_slice(&self.link.to_be_bytes());
        out[8..12].copy_from_slice(&self.size.to_be_bytes());
        out[12..16].copy_from_slice(&self.meta_page.0.to_be_bytes());
        out[16..24].copy_from_slice(&self.created_at.to_be_bytes());
        out[24..32].copy_from_slice(&self.modified_at.to_be_bytes());
    }
}

// ── Directory entry ─────────────────────────────────────────────────────────

/// Fixed-width directory entry: child inode index, name length, name payload.
///
/// An entry whose inode field is 0 is a tombstone; its name bytes are
/// meaningless and ignored on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeIndex,
    pub name: String,
}

impl DirEntry {
    /// Whether a raw entry slot is a tombstone, without decoding the name.
    pub fn is_tombstone(data: &[u8]) -> Result<bool, ParseError> {
        Ok(read_be_u32(data, 0)? == 0)
    }

    /// Decode a live entry. Tombstones decode to `None`.
    pub fn parse(data: &[u8]) -> Result<Option<Self>, ParseError> {
        ensure_slice(data, 0, DIR_ENTRY_LEN)?;
        let inode = read_be_u32(data, 0)?;
        if inode == 0 {
            return Ok(None);
        }
        let len = read_be_u64(data, 4)?;
        if len == 0 || len > NAME_CAP as u64 {
            return Err(ParseError::InvalidField {
                field: "name_len",
                reason: "directory entry name length out of range",
            });
        }
        let len = len as usize;
        let name = std::str::from_utf8(&data[12..12 + len])
            .map_err(|_| ParseError::InvalidField {
                field: "name",
                reason: "directory entry name is not valid UTF-8",
            })?
            .to_owned();
        Ok(Some(Self {
            inode: InodeIndex(inode),
            name,
        }))
    }

    /// Encode a live entry. The name must be 1..=255 bytes.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<(), ParseError> {
        let bytes = self.name.as_bytes();
        if bytes.is_empty() || bytes.len() > NAME_CAP {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "directory entry name must be 1..=255 bytes",
            });
        }
        if self.inode.0 == 0 {
            return Err(ParseError::InvalidField {
                field: "inode",
                reason: "live directory entry cannot reference inode 0",
            });
        }
        out[..DIR_ENTRY_LEN].fill(0);
        out[0..4].copy_from_slice(&self.inode.0.to_be_bytes());
        out[4..12].copy_from_slice(&(bytes.len() as u64).to_be_bytes());
        out[12..12 + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Overwrite an entry slot with a tombstone.
    pub fn encode_tombstone_into(out: &mut [u8]) {
        out[..DIR_ENTRY_LEN].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_types::HEADER_LEN;
    use proptest::prelude::*;

    fn header_page() -> Vec<u8> {
        let mut page = vec![0_u8; PAGE_SIZE];
        Header {
            inode_count: 512,
            max_data_blocks: 4096,
        }
        .encode_into(&mut page);
        page
    }

    #[test]
    fn header_round_trip() {
        let page = header_page();
        let parsed = Header::parse(&page).expect("parse");
        assert_eq!(parsed.inode_count, 512);
        assert_eq!(parsed.max_data_blocks, 4096);
        assert_eq!(parsed.geometry().first_data_block(), PageIndex(6));
    }

    #[test]
    fn header_encoded_layout_is_fixed() {
        let page = header_page();
        assert_eq!(&page[0..8], &CONTAINER_MAGIC.to_be_bytes());
        assert_eq!(&page[8..16], &1_u64.to_be_bytes());
        assert_eq!(&page[16..24], &512_u64.to_be_bytes());
        assert_eq!(&page[24..32], &4096_u64.to_be_bytes());
        assert_eq!(&page[32..40], &4096_u64.to_be_bytes());
        assert_eq!(HEADER_LEN, 40);
    }

    #[test]
    fn header_rejects_wrong_magic() {
        let mut page = header_page();
        page[0] = 0x42;
        assert!(matches!(
            Header::parse(&page),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn header_detects_byte_swapped_magic() {
        let mut page = header_page();
        page[0..8].copy_from_slice(&CONTAINER_MAGIC.swap_bytes().to_be_bytes());
        let err = Header::parse(&page).unwrap_err();
        assert!(err.to_string().contains("endianness"), "got: {err}");
    }

    #[test]
    fn header_rejects_bad_version_and_page_size() {
        let mut page = header_page();
        page[8..16].copy_from_slice(&2_u64.to_be_bytes());
        assert!(Header::parse(&page).is_err());

        let mut page = header_page();
        page[32..40].copy_from_slice(&8192_u64.to_be_bytes());
        assert!(Header::parse(&page).is_err());
    }

    #[test]
    fn inode_record_round_trip() {
        let record = InodeRecord {
            kind: InodeKind::Dir,
            link: 3,
            size: 267 * 2,
            meta_page: PageIndex(17),
            created_at: 1_700_000_000_000,
            modified_at: 1_700_000_000_500,
        };
        let mut buf = [0_u8; INODE_RECORD_LEN];
        record.encode_into(&mut buf);
        assert_eq!(InodeRecord::parse(&buf).expect("parse"), record);
    }

    #[test]
    fn inode_record_unused_is_all_zero() {
        let mut buf = [0xFF_u8; INODE_RECORD_LEN];
        InodeRecord::unused().encode_into(&mut buf);
        assert_eq!(buf, [0_u8; INODE_RECORD_LEN]);
        let parsed = InodeRecord::parse(&buf).expect("parse");
        assert_eq!(parsed.kind, InodeKind::Unused);
    }

    #[test]
    fn inode_record_rejects_unknown_tag() {
        let mut buf = [0_u8; INODE_RECORD_LEN];
        buf[0..4].copy_from_slice(&7_u32.to_be_bytes());
        assert!(InodeRecord::parse(&buf).is_err());
    }

    #[test]
    fn dir_entry_round_trip() {
        let entry = DirEntry {
            inode: InodeIndex(42),
            name: "hello.txt".to_owned(),
        };
        let mut buf = [0_u8; DIR_ENTRY_LEN];
        entry.encode_into(&mut buf).expect("encode");
        assert_eq!(DirEntry::parse(&buf).expect("parse"), Some(entry));
        assert!(!DirEntry::is_tombstone(&buf).unwrap());
    }

    #[test]
    fn dir_entry_tombstone() {
        let mut buf = [0xAA_u8; DIR_ENTRY_LEN];
        DirEntry::encode_tombstone_into(&mut buf);
        assert!(DirEntry::is_tombstone(&buf).unwrap());
        assert_eq!(DirEntry::parse(&buf).expect("parse"), None);
    }

    #[test]
    fn dir_entry_name_bounds() {
        let mut buf = [0_u8; DIR_ENTRY_LEN];
        let too_long = DirEntry {
            inode: InodeIndex(1),
            name: "x".repeat(NAME_CAP + 1),
        };
        assert!(too_long.encode_into(&mut buf).is_err());

        let empty = DirEntry {
            inode: InodeIndex(1),
            name: String::new(),
        };
        assert!(empty.encode_into(&mut buf).is_err());

        let max = DirEntry {
            inode: InodeIndex(1),
            name: "x".repeat(NAME_CAP),
        };
        max.encode_into(&mut buf).expect("encode");
        assert_eq!(DirEntry::parse(&buf).expect("parse"), Some(max));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn header_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..=HEADER_LEN * 2)) {
            let _ = Header::parse(&data);
        }

        #[test]
        fn inode_record_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..=INODE_RECORD_LEN * 2)) {
            let _ = InodeRecord::parse(&data);
        }

        #[test]
        fn dir_entry_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..=DIR_ENTRY_LEN * 2)) {
            let _ = DirEntry::parse(&data);
        }

        #[test]
        fn dir_entry_round_trips_valid_names(
            inode in 1_u32..=u32::MAX,
            name in "[a-zA-Z0-9._-]{1,255}",
        ) {
            let entry = DirEntry { inode: InodeIndex(inode), name };
            let mut buf = [0_u8; DIR_ENTRY_LEN];
            entry.encode_into(&mut buf).expect("encode");
            prop_assert_eq!(DirEntry::parse(&buf).expect("parse"), Some(entry));
        }

        #[test]
        fn inode_record_round_trips(
            tag in 0_u32..=2,
            link in any::<i32>(),
            size in any::<i32>(),
            meta in any::<u32>(),
            created in any::<i64>(),
            modified in any::<i64>(),
        ) {
            let record = InodeRecord {
                kind: InodeKind::from_tag(tag).unwrap(),
                link,
                size,
                meta_page: PageIndex(meta),
                created_at: created,
                modified_at: modified,
            };
            let mut buf = [0_u8; INODE_RECORD_LEN];
            record.encode_into(&mut buf);
            prop_assert_eq!(InodeRecord::parse(&buf).expect("parse"), record);
        }
    }
}
