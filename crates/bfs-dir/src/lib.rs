#![forbid(unsafe_code)]
//! Directory entry management.
//!
//! A directory inode's content is a tightly packed sequence of fixed-width
//! entries. Entries whose inode field is 0 are tombstones: skipped on read,
//! reused on insert.

use bfs_error::{BfsError, Result};
use bfs_inode::InodeTable;
use bfs_ondisk::{DirEntry, InodeKind};
use bfs_types::{DIR_ENTRY_LEN, InodeIndex, NAME_CAP};
use tracing::trace;

/// Validate a single path component.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.as_bytes().len() > NAME_CAP {
        return Err(BfsError::InvalidArgument(format!(
            "name must be 1..=255 bytes: {name:?}"
        )));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(BfsError::InvalidArgument(format!(
            "invalid path component: {name:?}"
        )));
    }
    Ok(())
}

/// Number of entry slots (live or tombstone) in a directory.
pub fn slot_count(table: &InodeTable, dir: InodeIndex) -> Result<u64> {
    let inode = require_dir(table, dir)?;
    let size = inode.size();
    if size % DIR_ENTRY_LEN as u64 != 0 {
        return Err(BfsError::Format(format!(
            "directory {dir} has a ragged entry region ({size} bytes)"
        )));
    }
    Ok(size / DIR_ENTRY_LEN as u64)
}

/// Scan for a live entry by name.
pub fn lookup(table: &InodeTable, dir: InodeIndex, name: &str) -> Result<InodeIndex> {
    let slots = slot_count(table, dir)?;
    let mut buf = [0_u8; DIR_ENTRY_LEN];
    for slot in 0..slots {
        table.read(dir, slot * DIR_ENTRY_LEN as u64, &mut buf)?;
        if let Some(entry) = DirEntry::parse(&buf)? {
            if entry.name == name {
                return Ok(entry.inode);
            }
        }
    }
    Err(BfsError::NotFound(name.to_owned()))
}

/// Insert a live entry, reusing the first tombstone slot or appending.
///
/// Fails `AlreadyExists` if a live entry carries the name. On success the
/// child's link count is incremented.
pub fn insert(table: &InodeTable, dir: InodeIndex, name: &str, child: InodeIndex) -> Result<()> {
    validate_name(name)?;
    let slots = slot_count(table, dir)?;

    let mut buf = [0_u8; DIR_ENTRY_LEN];
    let mut reusable = None;
    for slot in 0..slots {
        table.read(dir, slot * DIR_ENTRY_LEN as u64, &mut buf)?;
        match DirEntry::parse(&buf)? {
            Some(entry) if entry.name == name => {
                return Err(BfsError::AlreadyExists(name.to_owned()));
            }
            Some(_) => {}
            None => {
                if reusable.is_none() {
                    reusable = Some(slot);
                }
            }
        }
    }

    let slot = reusable.unwrap_or(slots);
    DirEntry {
        inode: child,
        name: name.to_owned(),
    }
    .encode_into(&mut buf)?;
    table.write(dir, slot * DIR_ENTRY_LEN as u64, &buf)?;
    table.link(child)?;
    trace!(event = "dir_insert", dir = dir.0, child = child.0, slot, name);
    Ok(())
}

/// Tombstone the live entry named `name`, then unlink the child outside the
/// directory critical section. Returns the child's index.
pub fn remove(table: &InodeTable, dir: InodeIndex, name: &str) -> Result<InodeIndex> {
    let slots = slot_count(table, dir)?;
    let mut buf = [0_u8; DIR_ENTRY_LEN];
    let mut found = None;
    for slot in 0..slots {
        table.read(dir, slot * DIR_ENTRY_LEN as u64, &mut buf)?;
        if let Some(entry) = DirEntry::parse(&buf)? {
            if entry.name == name {
                found = Some((slot, entry.inode));
                break;
            }
        }
    }
    let (slot, child) = found.ok_or_else(|| BfsError::NotFound(name.to_owned()))?;

    DirEntry::encode_tombstone_into(&mut buf);
    table.write(dir, slot * DIR_ENTRY_LEN as u64, &buf)?;
    trace!(event = "dir_remove", dir = dir.0, child = child.0, slot, name);

    table.unlink(child)?;
    Ok(child)
}

/// The `index`-th live entry of a directory, skipping tombstones.
pub fn read_at(table: &InodeTable, dir: InodeIndex, index: u64) -> Result<Option<DirEntry>> {
    let slots = slot_count(table, dir)?;
    let mut buf = [0_u8; DIR_ENTRY_LEN];
    let mut live = 0;
    for slot in 0..slots {
        table.read(dir, slot * DIR_ENTRY_LEN as u64, &mut buf)?;
        if let Some(entry) = DirEntry::parse(&buf)? {
            if live == index {
                return Ok(Some(entry));
            }
            live += 1;
        }
    }
    Ok(None)
}

/// All live entries of a directory, in slot order.
pub fn entries(table: &InodeTable, dir: InodeIndex) -> Result<Vec<DirEntry>> {
    let slots = slot_count(table, dir)?;
    let mut buf = [0_u8; DIR_ENTRY_LEN];
    let mut out = Vec::new();
    for slot in 0..slots {
        table.read(dir, slot * DIR_ENTRY_LEN as u64, &mut buf)?;
        if let Some(entry) = DirEntry::parse(&buf)? {
            out.push(entry);
        }
    }
    Ok(out)
}

fn require_dir(table: &InodeTable, dir: InodeIndex) -> Result<bfs_inode::Inode> {
    let inode = table.get(dir)?;
    if inode.kind != InodeKind::Dir {
        return Err(BfsError::InvalidArgument(format!(
            "inode {dir} is not a directory"
        )));
    }
    Ok(inode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_alloc::BlockAllocator;
    use bfs_block::{PageCache, PageDevice};
    use bfs_types::Geometry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn make_table(dir: &TempDir) -> InodeTable {
        let geo = Geometry::new(64, 256).unwrap();
        let device = PageDevice::create(dir.path().join("dirs.img"), geo.total_pages()).unwrap();
        let cache = Arc::new(PageCache::new(device, 32));
        let blocks = Arc::new(BlockAllocator::new(Arc::clone(&cache), &geo));
        InodeTable::new(cache, blocks, geo)
    }

    fn make_dir(table: &InodeTable) -> InodeIndex {
        let d = table.alloc(InodeKind::Dir).unwrap();
        table.link(d).unwrap();
        d
    }

    #[test]
    fn insert_lookup_remove_cycle() {
        let tmp = TempDir::new().unwrap();
        let table = make_table(&tmp);
        let d = make_dir(&table);
        let f = table.alloc(InodeKind::File).unwrap();

        insert(&table, d, "a.txt", f).unwrap();
        assert_eq!(table.get(f).unwrap().link, 1);
        assert_eq!(lookup(&table, d, "a.txt").unwrap(), f);

        let removed = remove(&table, d, "a.txt").unwrap();
        assert_eq!(removed, f);
        assert!(matches!(
            lookup(&table, d, "a.txt"),
            Err(BfsError::NotFound(_))
        ));
        // Last link dropped, no refs: the file was reclaimed.
        assert_eq!(table.get(f).unwrap().kind, InodeKind::Unused);
    }

    #[test]
    fn duplicate_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let table = make_table(&tmp);
        let d = make_dir(&table);
        let f = table.alloc(InodeKind::File).unwrap();
        let g = table.alloc(InodeKind::File).unwrap();

        insert(&table, d, "dup", f).unwrap();
        assert!(matches!(
            insert(&table, d, "dup", g),
            Err(BfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn tombstones_are_reused() {
        let tmp = TempDir::new().unwrap();
        let table = make_table(&tmp);
        let d = make_dir(&table);

        let files: Vec<_> = (0..3)
            .map(|_| {
                let f = table.alloc(InodeKind::File).unwrap();
                table.retain(f).unwrap();
                f
            })
            .collect();
        insert(&table, d, "a", files[0]).unwrap();
        insert(&table, d, "b", files[1]).unwrap();
        let size_before = table.get(d).unwrap().size();

        remove(&table, d, "a").unwrap();
        insert(&table, d, "c", files[2]).unwrap();

        // The tombstone slot was reused; the directory did not grow.
        assert_eq!(table.get(d).unwrap().size(), size_before);
        assert_eq!(lookup(&table, d, "c").unwrap(), files[2]);
    }

    #[test]
    fn read_at_skips_tombstones() {
        let tmp = TempDir::new().unwrap();
        let table = make_table(&tmp);
        let d = make_dir(&table);

        let mut files = Vec::new();
        for name in ["x", "y", "z"] {
            let f = table.alloc(InodeKind::File).unwrap();
            table.retain(f).unwrap();
            insert(&table, d, name, f).unwrap();
            files.push(f);
        }
        remove(&table, d, "y").unwrap();

        let first = read_at(&table, d, 0).unwrap().unwrap();
        let second = read_at(&table, d, 1).unwrap().unwrap();
        assert_eq!(first.name, "x");
        assert_eq!(second.name, "z");
        assert!(read_at(&table, d, 2).unwrap().is_none());

        let names: Vec<_> = entries(&table, d)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["x", "z"]);
    }

    #[test]
    fn entries_straddle_page_boundaries() {
        let tmp = TempDir::new().unwrap();
        let table = make_table(&tmp);
        let d = make_dir(&table);

        // 4096 / 267 ≈ 15.3 entries per page; 40 entries span three pages.
        for i in 0..40 {
            let f = table.alloc(InodeKind::File).unwrap();
            table.retain(f).unwrap();
            insert(&table, d, &format!("file-{i:02}"), f).unwrap();
        }
        for i in 0..40 {
            assert!(lookup(&table, d, &format!("file-{i:02}")).is_ok(), "entry {i}");
        }
        assert_eq!(entries(&table, d).unwrap().len(), 40);
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("ok.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
        assert!(validate_name(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn operations_require_a_directory() {
        let tmp = TempDir::new().unwrap();
        let table = make_table(&tmp);
        let f = table.alloc(InodeKind::File).unwrap();
        assert!(matches!(
            lookup(&table, f, "nope"),
            Err(BfsError::InvalidArgument(_))
        ));
    }
}
