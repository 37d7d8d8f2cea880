#![forbid(unsafe_code)]
//! Inode table management.
//!
//! Typed inode records with indirect-block mapping, a write-through
//! in-memory table, allocation, the dual link/ref counting scheme that
//! controls inode lifetime, the per-inode read/write lock protocol, and
//! byte-level read/write/truncate/copy.

use bfs_alloc::BlockAllocator;
use bfs_block::PageCache;
use bfs_error::{BfsError, Result};
use bfs_ondisk::{DirEntry, InodeKind, InodeRecord};
use bfs_types::{
    DIR_ENTRY_LEN, Geometry, INODE_RECORD_LEN, InodeIndex, MAX_FILE_SIZE, PAGE_SIZE,
    PTRS_PER_PAGE, PageIndex, now_millis, read_be_u32,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// One live inode: the persisted record plus runtime-only state.
///
/// `refs`, `write_locked`, and `read_locks` are never written to disk.
#[derive(Debug, Clone)]
pub struct Inode {
    pub kind: InodeKind,
    pub link: i32,
    pub size: i32,
    pub meta_page: PageIndex,
    pub created_at: i64,
    pub modified_at: i64,
    pub refs: u32,
    pub write_locked: bool,
    pub read_locks: u32,
}

impl Inode {
    fn from_record(record: InodeRecord) -> Self {
        Self {
            kind: record.kind,
            link: record.link,
            size: record.size,
            meta_page: record.meta_page,
            created_at: record.created_at,
            modified_at: record.modified_at,
            refs: 0,
            write_locked: false,
            read_locks: 0,
        }
    }

    #[must_use]
    pub fn record(&self) -> InodeRecord {
        InodeRecord {
            kind: self.kind,
            link: self.link,
            size: self.size,
            meta_page: self.meta_page,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        u64::try_from(self.size).unwrap_or(0)
    }
}

type Table = HashMap<InodeIndex, Inode>;

/// The inode table: in-memory cache over the on-disk table region.
///
/// The map is populated lazily on first access and written through on every
/// mutation of persisted fields, so `modified_at` and `size` are visible to
/// subsequent opens before a mutating operation returns.
#[derive(Debug)]
pub struct InodeTable {
    cache: Arc<PageCache>,
    blocks: Arc<BlockAllocator>,
    geometry: Geometry,
    state: Mutex<Table>,
}

impl InodeTable {
    #[must_use]
    pub fn new(cache: Arc<PageCache>, blocks: Arc<BlockAllocator>, geometry: Geometry) -> Self {
        Self {
            cache,
            blocks,
            geometry,
            state: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Snapshot of an inode's current state.
    pub fn get(&self, index: InodeIndex) -> Result<Inode> {
        let mut table = self.state.lock();
        Ok(self.load(&mut table, index)?.clone())
    }

    // ── Allocation & lifetime ───────────────────────────────────────────

    /// Allocate the first unused inode slot as `kind`.
    ///
    /// The new inode owns a freshly allocated (zeroed) meta-page and carries
    /// `link = 0`; callers link it into a directory. Fails `NoInodes` when
    /// the table is full.
    pub fn alloc(&self, kind: InodeKind) -> Result<InodeIndex> {
        if kind == InodeKind::Unused {
            return Err(BfsError::InvalidArgument(
                "cannot allocate an unused inode".to_owned(),
            ));
        }

        let mut table = self.state.lock();
        let mut found = None;
        for idx in 0..self.geometry.inode_count() {
            let index = InodeIndex(idx);
            if self.load(&mut table, index)?.kind == InodeKind::Unused {
                found = Some(index);
                break;
            }
        }
        let index = found.ok_or(BfsError::NoInodes)?;

        let meta_page = self.blocks.allocate()?;
        let now = now_millis();
        let inode = Inode {
            kind,
            link: 0,
            size: 0,
            meta_page,
            created_at: now,
            modified_at: now,
            refs: 0,
            write_locked: false,
            read_locks: 0,
        };
        let record = inode.record();
        table.insert(index, inode);
        self.store(index, &record)?;
        debug!(event = "inode_alloc", inode = index.0, kind = ?kind);
        Ok(index)
    }

    /// Increment the on-disk link count.
    pub fn link(&self, index: InodeIndex) -> Result<()> {
        let mut table = self.state.lock();
        self.adjust_link(&mut table, index, 1)
    }

    /// Decrement the on-disk link count and run the reclaim check.
    pub fn unlink(&self, index: InodeIndex) -> Result<()> {
        let mut table = self.state.lock();
        self.adjust_link(&mut table, index, -1)
    }

    /// Take a runtime reference (one per open handle).
    pub fn retain(&self, index: InodeIndex) -> Result<()> {
        let mut table = self.state.lock();
        let inode = self.load(&mut table, index)?;
        inode.refs += 1;
        Ok(())
    }

    /// Drop a runtime reference and run the reclaim check.
    pub fn release(&self, index: InodeIndex) -> Result<()> {
        let mut table = self.state.lock();
        {
            let inode = self.load(&mut table, index)?;
            inode.refs = inode.refs.saturating_sub(1);
        }
        self.reclaim_if_dead(&mut table, index)
    }

    // ── Per-inode lock protocol ─────────────────────────────────────────

    /// Take a shared lock. Fails `Busy` if a writer holds the inode.
    pub fn lock_ro(&self, index: InodeIndex) -> Result<()> {
        let mut table = self.state.lock();
        let inode = self.load(&mut table, index)?;
        if inode.write_locked {
            return Err(BfsError::Busy(format!("inode {index} is open read-write")));
        }
        inode.read_locks += 1;
        Ok(())
    }

    pub fn unlock_ro(&self, index: InodeIndex) -> Result<()> {
        let mut table = self.state.lock();
        let inode = self.load(&mut table, index)?;
        debug_assert!(inode.read_locks > 0, "unlock_ro without lock_ro");
        inode.read_locks = inode.read_locks.saturating_sub(1);
        Ok(())
    }

    /// Take the exclusive lock. Fails `Busy` if any holder exists.
    pub fn lock_rw(&self, index: InodeIndex) -> Result<()> {
        let mut table = self.state.lock();
        let inode = self.load(&mut table, index)?;
        if inode.write_locked || inode.read_locks > 0 {
            return Err(BfsError::Busy(format!("inode {index} is already open")));
        }
        inode.write_locked = true;
        Ok(())
    }

    pub fn unlock_rw(&self, index: InodeIndex) -> Result<()> {
        let mut table = self.state.lock();
        let inode = self.load(&mut table, index)?;
        debug_assert!(inode.write_locked, "unlock_rw without lock_rw");
        inode.write_locked = false;
        Ok(())
    }

    // ── Data plane ──────────────────────────────────────────────────────

    /// Read up to `buf.len()` bytes at `offset`, clamped to the file size.
    ///
    /// A zero meta-page entry reads as zeros; reads never allocate.
    pub fn read(&self, index: InodeIndex, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inode = self.get(index)?;
        if inode.kind == InodeKind::Unused {
            return Err(BfsError::InvalidArgument(format!(
                "inode {index} is unused"
            )));
        }
        self.read_range(inode.meta_page, inode.size(), offset, buf)
    }

    /// Write `data` at `offset`, allocating content blocks lazily.
    ///
    /// Requires `offset ≤ size` (a stale cursor can never shrink a file) and
    /// `offset + len ≤ 4 MiB`. Grows the size if the write extends the file,
    /// stamps `modified_at`, and writes the record through before returning.
    pub fn write(&self, index: InodeIndex, offset: u64, data: &[u8]) -> Result<usize> {
        let inode = self.get(index)?;
        if inode.kind == InodeKind::Unused {
            return Err(BfsError::InvalidArgument(format!(
                "inode {index} is unused"
            )));
        }
        if offset > inode.size() {
            return Err(BfsError::InvalidArgument(format!(
                "write offset {offset} is beyond end of file ({})",
                inode.size()
            )));
        }
        let end = offset + data.len() as u64;
        if end > MAX_FILE_SIZE {
            return Err(BfsError::InvalidArgument(format!(
                "write to offset {end} exceeds the maximum file size"
            )));
        }

        let mut done = 0;
        while done < data.len() {
            let pos = offset + done as u64;
            let page_no = (pos / PAGE_SIZE as u64) as u32;
            let in_page = (pos % PAGE_SIZE as u64) as usize;
            let chunk = (PAGE_SIZE - in_page).min(data.len() - done);
            let block = self.ensure_block(inode.meta_page, page_no)?;
            self.cache
                .write_at(block, in_page, &data[done..done + chunk])?;
            done += chunk;
        }

        let mut table = self.state.lock();
        let inode = self.load(&mut table, index)?;
        inode.size = inode.size.max(end as i32);
        inode.modified_at = now_millis();
        let record = inode.record();
        self.store(index, &record)?;
        trace!(event = "inode_write", inode = index.0, offset, len = data.len());
        Ok(data.len())
    }

    /// Free every content block and zero the meta-page.
    ///
    /// The size field is not reset here; the writable handle resets its
    /// cursor and size through `set_size`.
    pub fn truncate(&self, index: InodeIndex) -> Result<()> {
        let inode = self.get(index)?;
        let freed = self.release_content_blocks(inode.meta_page, true)?;
        debug!(event = "inode_truncate", inode = index.0, freed);
        Ok(())
    }

    /// Reset the size field, stamping `modified_at` and writing through.
    pub fn set_size(&self, index: InodeIndex, size: u64) -> Result<()> {
        if size > MAX_FILE_SIZE {
            return Err(BfsError::InvalidArgument(format!(
                "size {size} exceeds the maximum file size"
            )));
        }
        let mut table = self.state.lock();
        let inode = self.load(&mut table, index)?;
        inode.size = size as i32;
        inode.modified_at = now_millis();
        let record = inode.record();
        self.store(index, &record)
    }

    /// Deep-copy an inode's content into a fresh inode of the same type.
    pub fn copy(&self, index: InodeIndex) -> Result<InodeIndex> {
        let src = self.get(index)?;
        if src.kind == InodeKind::Unused {
            return Err(BfsError::InvalidArgument(format!(
                "inode {index} is unused"
            )));
        }
        let dest = self.alloc(src.kind)?;

        let size = src.size();
        let result = (|| -> Result<()> {
            let mut buf = vec![0_u8; PAGE_SIZE];
            let mut offset = 0_u64;
            while offset < size {
                let n = self.read(index, offset, &mut buf)?;
                if n == 0 {
                    break;
                }
                self.write(dest, offset, &buf[..n])?;
                offset += n as u64;
            }
            Ok(())
        })();
        if let Err(err) = result {
            // The half-copied destination was never linked; send it back
            // through the reclaim check.
            let _ = self.retain(dest);
            let _ = self.release(dest);
            return Err(err);
        }
        debug!(event = "inode_copy", src = index.0, dest = dest.0, bytes = size);
        Ok(dest)
    }

    /// Resolve the `k`-th content page of an inode's meta-page.
    ///
    /// Returns `PageIndex(0)` for a hole.
    pub fn map_page(&self, index: InodeIndex, k: u32) -> Result<PageIndex> {
        let inode = self.get(index)?;
        self.meta_entry(inode.meta_page, k)
    }

    // ── Internal helpers ────────────────────────────────────────────────

    /// Load an inode into the in-memory table (read-through).
    fn load<'t>(&self, table: &'t mut Table, index: InodeIndex) -> Result<&'t mut Inode> {
        if !self.geometry.contains_inode(index) {
            return Err(BfsError::InvalidArgument(format!(
                "inode {index} out of range"
            )));
        }
        if !table.contains_key(&index) {
            let (page, offset) = self
                .geometry
                .inode_location(index)
                .expect("checked index is in range");
            let mut buf = [0_u8; INODE_RECORD_LEN];
            self.cache.read_at(page, offset, &mut buf)?;
            let record = InodeRecord::parse(&buf)?;
            table.insert(index, Inode::from_record(record));
        }
        Ok(table.get_mut(&index).expect("entry inserted above"))
    }

    /// Write an inode record through to its table slot.
    fn store(&self, index: InodeIndex, record: &InodeRecord) -> Result<()> {
        let (page, offset) = self
            .geometry
            .inode_location(index)
            .ok_or_else(|| BfsError::InvalidArgument(format!("inode {index} out of range")))?;
        let mut buf = [0_u8; INODE_RECORD_LEN];
        record.encode_into(&mut buf);
        self.cache.write_at(page, offset, &buf)
    }

    fn adjust_link(&self, table: &mut Table, index: InodeIndex, delta: i32) -> Result<()> {
        {
            let inode = self.load(table, index)?;
            inode.link += delta;
            debug_assert!(inode.link >= 0, "negative link count on inode {index}");
            let record = inode.record();
            self.store(index, &record)?;
        }
        if delta < 0 {
            self.reclaim_if_dead(table, index)?;
        }
        Ok(())
    }

    /// Reclaim an inode once both counters reach zero: recursively unlink
    /// directory children, free all content blocks and the meta-page, and
    /// mark the slot unused.
    fn reclaim_if_dead(&self, table: &mut Table, index: InodeIndex) -> Result<()> {
        let (kind, meta_page, size) = {
            let inode = self.load(table, index)?;
            if inode.kind == InodeKind::Unused || inode.link > 0 || inode.refs > 0 {
                return Ok(());
            }
            (inode.kind, inode.meta_page, inode.size())
        };

        debug!(event = "inode_reclaim", inode = index.0, kind = ?kind);

        if kind == InodeKind::Dir {
            let entries = size / DIR_ENTRY_LEN as u64;
            let mut buf = [0_u8; DIR_ENTRY_LEN];
            for slot in 0..entries {
                let offset = slot * DIR_ENTRY_LEN as u64;
                self.read_range(meta_page, size, offset, &mut buf)?;
                if let Some(entry) = DirEntry::parse(&buf)? {
                    self.adjust_link(table, entry.inode, -1)?;
                }
            }
        }

        self.release_content_blocks(meta_page, false)?;
        self.blocks.free(meta_page)?;

        let unused = InodeRecord::unused();
        table.insert(index, Inode::from_record(unused));
        self.store(index, &unused)
    }

    /// Free every non-zero meta-page entry; optionally zero the meta-page
    /// (truncate keeps it, reclaim frees it right after).
    fn release_content_blocks(&self, meta_page: PageIndex, zero_meta: bool) -> Result<u32> {
        let blocks: Vec<u32> = self.cache.with_page(meta_page, |page| {
            let mut blocks = Vec::new();
            for k in 0..PTRS_PER_PAGE {
                let entry = read_be_u32(page, (k * 4) as usize)?;
                if entry != 0 {
                    blocks.push(entry);
                }
            }
            if zero_meta {
                page.fill(0);
            }
            Ok(blocks)
        })?;
        let freed = blocks.len() as u32;
        for block in blocks {
            self.blocks.free(PageIndex(block))?;
        }
        Ok(freed)
    }

    /// Copy bytes out of the content pages reached through `meta_page`,
    /// clamped to `size`. Holes read as zeros.
    fn read_range(
        &self,
        meta_page: PageIndex,
        size: u64,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        if offset >= size {
            return Ok(0);
        }
        let len = buf.len().min((size - offset) as usize);
        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let page_no = (pos / PAGE_SIZE as u64) as u32;
            let in_page = (pos % PAGE_SIZE as u64) as usize;
            let chunk = (PAGE_SIZE - in_page).min(len - done);
            let block = self.meta_entry(meta_page, page_no)?;
            if block.0 == 0 {
                buf[done..done + chunk].fill(0);
            } else {
                self.cache
                    .read_at(block, in_page, &mut buf[done..done + chunk])?;
            }
            done += chunk;
        }
        Ok(len)
    }

    fn meta_entry(&self, meta_page: PageIndex, k: u32) -> Result<PageIndex> {
        if k >= PTRS_PER_PAGE {
            return Err(BfsError::InvalidArgument(format!(
                "content page {k} exceeds the meta-page span"
            )));
        }
        self.cache.with_page(meta_page, |page| {
            Ok(PageIndex(read_be_u32(page, (k * 4) as usize)?))
        })
    }

    /// Resolve content page `k`, allocating (and recording) a block for a
    /// hole. Write paths only; reads treat holes as zeros.
    fn ensure_block(&self, meta_page: PageIndex, k: u32) -> Result<PageIndex> {
        let current = self.meta_entry(meta_page, k)?;
        if current.0 != 0 {
            return Ok(current);
        }
        let block = self.blocks.allocate()?;
        self.cache.with_page(meta_page, |page| {
            let at = (k * 4) as usize;
            page[at..at + 4].copy_from_slice(&block.0.to_be_bytes());
            Ok(())
        })?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_block::PageDevice;
    use tempfile::TempDir;

    fn make_table(dir: &TempDir) -> (Arc<PageCache>, Arc<BlockAllocator>, InodeTable) {
        let geo = Geometry::new(8, 128).unwrap();
        let device = PageDevice::create(dir.path().join("inodes.img"), geo.total_pages()).unwrap();
        let cache = Arc::new(PageCache::new(device, 32));
        let blocks = Arc::new(BlockAllocator::new(Arc::clone(&cache), &geo));
        let table = InodeTable::new(Arc::clone(&cache), Arc::clone(&blocks), geo);
        (cache, blocks, table)
    }

    #[test]
    fn alloc_fills_first_unused_slot() {
        let dir = TempDir::new().unwrap();
        let (_cache, blocks, table) = make_table(&dir);

        let a = table.alloc(InodeKind::Dir).unwrap();
        let b = table.alloc(InodeKind::File).unwrap();
        assert_eq!(a, InodeIndex(0));
        assert_eq!(b, InodeIndex(1));

        let inode = table.get(a).unwrap();
        assert_eq!(inode.kind, InodeKind::Dir);
        assert_eq!(inode.link, 0);
        assert_eq!(inode.size, 0);
        assert_ne!(inode.meta_page, PageIndex(0));
        assert_eq!(inode.created_at, inode.modified_at);
        assert!(blocks.is_allocated(inode.meta_page).unwrap());
    }

    #[test]
    fn alloc_exhaustion_reports_no_inodes() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);

        for _ in 0..8 {
            table.alloc(InodeKind::File).unwrap();
        }
        assert!(matches!(table.alloc(InodeKind::File), Err(BfsError::NoInodes)));
    }

    #[test]
    fn write_read_round_trip_across_pages() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();

        let data: Vec<u8> = (0..10_000_u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(table.write(file, 0, &data).unwrap(), data.len());
        assert_eq!(table.get(file).unwrap().size(), data.len() as u64);

        let mut out = vec![0_u8; data.len()];
        assert_eq!(table.read(file, 0, &mut out).unwrap(), data.len());
        assert_eq!(out, data);

        // Partial read from the middle of page two.
        let mut out = vec![0_u8; 100];
        assert_eq!(table.read(file, 5000, &mut out).unwrap(), 100);
        assert_eq!(out, data[5000..5100]);
    }

    #[test]
    fn read_clamps_to_size_and_eof_is_zero() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();
        table.write(file, 0, b"abc").unwrap();

        let mut out = [0_u8; 8];
        assert_eq!(table.read(file, 0, &mut out).unwrap(), 3);
        assert_eq!(table.read(file, 3, &mut out).unwrap(), 0);
        assert_eq!(table.read(file, 100, &mut out).unwrap(), 0);
    }

    #[test]
    fn write_rejects_offset_beyond_size() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();

        table.write(file, 0, b"1234").unwrap();
        // Appending exactly at the end is fine.
        table.write(file, 4, b"5678").unwrap();
        assert!(matches!(
            table.write(file, 9, b"x"),
            Err(BfsError::InvalidArgument(_))
        ));
        // A stale, smaller offset never shrinks the file.
        table.write(file, 2, b"zz").unwrap();
        assert_eq!(table.get(file).unwrap().size(), 8);
    }

    #[test]
    fn write_rejects_max_file_size_overflow() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();
        // Size validation fires before any allocation.
        assert!(matches!(
            table.write(file, 0, &vec![0_u8; (MAX_FILE_SIZE + 1) as usize]),
            Err(BfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn modified_at_advances_on_write() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();
        let created = table.get(file).unwrap().created_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        table.write(file, 0, b"stamp").unwrap();
        let inode = table.get(file).unwrap();
        assert!(inode.modified_at > created);
        assert!(inode.modified_at >= inode.created_at);
    }

    #[test]
    fn truncate_frees_blocks_and_leaves_holes() {
        let dir = TempDir::new().unwrap();
        let (_cache, blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();

        let free_before = blocks.free_count().unwrap();
        table.write(file, 0, &vec![0xAB_u8; PAGE_SIZE * 2]).unwrap();
        assert_eq!(blocks.free_count().unwrap(), free_before - 2);

        table.truncate(file).unwrap();
        assert_eq!(blocks.free_count().unwrap(), free_before);

        // Size is untouched by truncate itself; the freed range reads zeros.
        assert_eq!(table.get(file).unwrap().size(), PAGE_SIZE as u64 * 2);
        let mut out = vec![0xFF_u8; 64];
        assert_eq!(table.read(file, 100, &mut out).unwrap(), 64);
        assert!(out.iter().all(|&b| b == 0));

        table.set_size(file, 0).unwrap();
        assert_eq!(table.get(file).unwrap().size(), 0);
    }

    #[test]
    fn copy_is_isolated_from_source() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        let src = table.alloc(InodeKind::File).unwrap();
        table.write(src, 0, b"original content").unwrap();

        let dest = table.copy(src).unwrap();
        assert_ne!(src, dest);
        assert_eq!(table.get(dest).unwrap().kind, InodeKind::File);

        table.write(src, 0, b"SCRIBBLE").unwrap();

        let mut out = vec![0_u8; 16];
        table.read(dest, 0, &mut out).unwrap();
        assert_eq!(&out, b"original content");
    }

    #[test]
    fn lock_protocol_enforces_exclusivity() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();

        table.lock_ro(file).unwrap();
        table.lock_ro(file).unwrap();
        assert!(matches!(table.lock_rw(file), Err(BfsError::Busy(_))));

        table.unlock_ro(file).unwrap();
        table.unlock_ro(file).unwrap();
        table.lock_rw(file).unwrap();
        assert!(matches!(table.lock_ro(file), Err(BfsError::Busy(_))));
        assert!(matches!(table.lock_rw(file), Err(BfsError::Busy(_))));

        table.unlock_rw(file).unwrap();
        table.lock_ro(file).unwrap();
    }

    #[test]
    fn reclaim_waits_for_both_counters() {
        let dir = TempDir::new().unwrap();
        let (_cache, blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();
        table.write(file, 0, &vec![1_u8; PAGE_SIZE + 1]).unwrap();
        let meta = table.get(file).unwrap().meta_page;

        table.link(file).unwrap();
        table.retain(file).unwrap();

        // Last link gone, but a handle still holds a reference.
        table.unlink(file).unwrap();
        assert_eq!(table.get(file).unwrap().kind, InodeKind::File);

        table.release(file).unwrap();
        assert_eq!(table.get(file).unwrap().kind, InodeKind::Unused);
        assert!(!blocks.is_allocated(meta).unwrap());
        // Everything the file held went back to the allocator.
        assert_eq!(blocks.free_count().unwrap(), blocks.capacity());
    }

    #[test]
    fn reclaim_recurses_through_directories() {
        let dir = TempDir::new().unwrap();
        let (_cache, blocks, table) = make_table(&dir);

        // A directory holding two files, entries written through the codec.
        let d = table.alloc(InodeKind::Dir).unwrap();
        let f1 = table.alloc(InodeKind::File).unwrap();
        let f2 = table.alloc(InodeKind::File).unwrap();
        table.write(f1, 0, b"one").unwrap();
        table.write(f2, 0, &vec![2_u8; PAGE_SIZE * 3]).unwrap();

        let mut buf = [0_u8; DIR_ENTRY_LEN];
        for (slot, (name, child)) in [("one", f1), ("two", f2)].iter().enumerate() {
            DirEntry {
                inode: *child,
                name: (*name).to_owned(),
            }
            .encode_into(&mut buf)
            .unwrap();
            table
                .write(d, (slot * DIR_ENTRY_LEN) as u64, &buf)
                .unwrap();
            table.link(*child).unwrap();
        }
        table.link(d).unwrap();

        table.unlink(d).unwrap();

        assert_eq!(table.get(d).unwrap().kind, InodeKind::Unused);
        assert_eq!(table.get(f1).unwrap().kind, InodeKind::Unused);
        assert_eq!(table.get(f2).unwrap().kind, InodeKind::Unused);
        assert_eq!(blocks.free_count().unwrap(), blocks.capacity());
    }

    #[test]
    fn map_page_reports_holes() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        let file = table.alloc(InodeKind::File).unwrap();

        assert_eq!(table.map_page(file, 0).unwrap(), PageIndex(0));
        table.write(file, 0, b"x").unwrap();
        assert_ne!(table.map_page(file, 0).unwrap(), PageIndex(0));
        assert_eq!(table.map_page(file, 1).unwrap(), PageIndex(0));
        assert!(table.map_page(file, PTRS_PER_PAGE).is_err());
    }

    #[test]
    fn out_of_range_inode_rejected() {
        let dir = TempDir::new().unwrap();
        let (_cache, _blocks, table) = make_table(&dir);
        assert!(matches!(
            table.get(InodeIndex(8)),
            Err(BfsError::InvalidArgument(_))
        ));
    }
}
