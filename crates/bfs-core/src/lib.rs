#![forbid(unsafe_code)]
//! The BoxFS filesystem: lifecycle, namespace operations, and handles.
//!
//! A container file holds a hierarchical namespace of directories and
//! regular files. Namespace operations serialise on one coarse lock and
//! acquire per-inode locks top-down along the resolved path; data-plane
//! reads and writes run outside the coarse lock under the per-inode open
//! lock taken at `open` time.

use bfs_alloc::BlockAllocator;
use bfs_block::{CacheMetrics, DEFAULT_CACHE_SLOTS, PageCache, PageDevice};
use bfs_error::{BfsError, Result};
use bfs_inode::InodeTable;
use bfs_ondisk::{Header, InodeKind};
use bfs_types::{Geometry, InodeIndex, PageIndex};
use parking_lot::Mutex;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

// ── Configuration ───────────────────────────────────────────────────────────

/// Sizing knobs for a fresh container.
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// Inode table slots.
    pub inode_count: u32,
    /// Data-region blocks (one bitmap bit each, at most 32768).
    pub max_data_blocks: u32,
    /// Page-cache slots.
    pub cache_slots: usize,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            inode_count: 512,
            max_data_blocks: 4096,
            cache_slots: DEFAULT_CACHE_SLOTS,
        }
    }
}

/// Open mode of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Shared: any number of concurrent readers.
    ReadOnly,
    /// Exclusive: no other handle of any mode.
    ReadWrite,
}

/// Metadata snapshot for a path.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub is_dir: bool,
    pub size: u64,
    pub created_at: i64,
    pub modified_at: i64,
    pub link_count: i32,
}

/// Container-level counters.
#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub free_blocks: u32,
    pub total_blocks: u32,
    pub cache: CacheMetrics,
}

// ── Filesystem ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct FsInner {
    cache: Arc<PageCache>,
    blocks: Arc<BlockAllocator>,
    inodes: InodeTable,
    /// Coarse lock around every namespace entry point; prevents ABA on path
    /// resolution.
    ns_lock: Mutex<()>,
    closed: AtomicBool,
}

/// A BoxFS filesystem embedded in one host file.
#[derive(Debug)]
pub struct Filesystem {
    inner: Arc<FsInner>,
}

impl Filesystem {
    /// Create a fresh container at `host_path`, sized by `options`, with an
    /// empty root directory at inode 0.
    pub fn create(host_path: impl AsRef<Path>, options: CreateOptions) -> Result<Self> {
        let geometry = Geometry::new(options.inode_count, options.max_data_blocks)?;
        let device = PageDevice::create(host_path.as_ref(), geometry.total_pages())?;
        let cache = Arc::new(PageCache::new(device, options.cache_slots));

        cache.with_page(PageIndex(0), |page| {
            Header {
                inode_count: options.inode_count,
                max_data_blocks: options.max_data_blocks,
            }
            .encode_into(page);
            Ok(())
        })?;

        let blocks = Arc::new(BlockAllocator::new(Arc::clone(&cache), &geometry));
        let inodes = InodeTable::new(Arc::clone(&cache), Arc::clone(&blocks), geometry);

        let root = inodes.alloc(InodeKind::Dir)?;
        debug_assert_eq!(root, InodeIndex::ROOT);
        // The root has no parent entry; a permanent link keeps it alive.
        inodes.link(root)?;
        cache.sync()?;

        info!(
            event = "fs_create",
            path = %host_path.as_ref().display(),
            inodes = options.inode_count,
            blocks = options.max_data_blocks
        );
        Ok(Self {
            inner: Arc::new(FsInner {
                cache,
                blocks,
                inodes,
                ns_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open an existing container, validating its header and root inode.
    pub fn open(host_path: impl AsRef<Path>) -> Result<Self> {
        let device = PageDevice::open(host_path.as_ref())?;
        let page0 = device.read_page(PageIndex(0))?;
        let header = Header::parse(&page0)?;
        let geometry = header.geometry();
        if device.page_count() != geometry.total_pages() {
            return Err(BfsError::Format(format!(
                "container holds {} pages but the header describes {}",
                device.page_count(),
                geometry.total_pages()
            )));
        }

        let cache = Arc::new(PageCache::new(device, DEFAULT_CACHE_SLOTS));
        let blocks = Arc::new(BlockAllocator::new(Arc::clone(&cache), &geometry));
        let inodes = InodeTable::new(Arc::clone(&cache), Arc::clone(&blocks), geometry);

        let root = inodes.get(InodeIndex::ROOT)?;
        if root.kind != InodeKind::Dir {
            return Err(BfsError::Format(
                "root inode is not a directory".to_owned(),
            ));
        }

        info!(event = "fs_open", path = %host_path.as_ref().display());
        Ok(Self {
            inner: Arc::new(FsInner {
                cache,
                blocks,
                inodes,
                ns_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Flush and mark the filesystem closed. Subsequent operations on the
    /// filesystem or any of its handles fail `Closed`.
    pub fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.cache.sync()?;
            debug!(event = "fs_close");
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BfsError::Closed);
        }
        Ok(())
    }

    /// Container-level counters (free blocks, cache behaviour).
    pub fn stats(&self) -> Result<FsStats> {
        self.ensure_open()?;
        Ok(FsStats {
            free_blocks: self.inner.blocks.free_count()?,
            total_blocks: self.inner.blocks.capacity(),
            cache: self.inner.cache.metrics(),
        })
    }

    // ── Namespace operations ────────────────────────────────────────────

    /// Open `path` with the given mode. Fails `NotFound` for missing files.
    pub fn open_path(&self, path: impl AsRef<Path>, mode: Mode) -> Result<Handle> {
        self.open_with(path, mode, false)
    }

    /// Open `path`; when `create` is set and the final component is missing,
    /// a regular file is allocated and inserted into the parent first.
    pub fn open_with(&self, path: impl AsRef<Path>, mode: Mode, create: bool) -> Result<Handle> {
        let path = path.as_ref();
        let _ns = self.inner.ns_lock.lock();
        self.ensure_open()?;
        let comps = components(path)?;

        let mut path_locks = Vec::new();
        let result = self.open_locked(&comps, mode, create, &mut path_locks);
        // The path-RO locks guard handle construction against a racing
        // unlink; once the target holds its own lock (or the open failed),
        // they unwind. Target-lock exclusivity persists for the handle.
        for &inode in path_locks.iter().rev() {
            let _ = self.inner.inodes.unlock_ro(inode);
        }
        let target = result?;

        let kind = self.inner.inodes.get(target)?.kind;
        debug!(event = "open", path = %path.display(), inode = target.0, mode = ?mode);
        Ok(Handle {
            fs: Arc::clone(&self.inner),
            inode: target,
            kind,
            mode,
            pos: 0,
            open: true,
        })
    }

    /// Resolve and lock a path for open: shared locks on each ancestor, then
    /// the mode lock on the target. Acquired ancestor locks are recorded in
    /// `path_locks` for the caller to unwind.
    fn open_locked(
        &self,
        comps: &[String],
        mode: Mode,
        create: bool,
        path_locks: &mut Vec<InodeIndex>,
    ) -> Result<InodeIndex> {
        let inodes = &self.inner.inodes;

        let target = if let Some((leaf, ancestors)) = comps.split_last() {
            let mut cur = InodeIndex::ROOT;
            inodes.lock_ro(cur)?;
            path_locks.push(cur);
            for name in ancestors {
                let child = bfs_dir::lookup(inodes, cur, name)?;
                if inodes.get(child)?.kind != InodeKind::Dir {
                    return Err(BfsError::NotFound(name.clone()));
                }
                inodes.lock_ro(child)?;
                path_locks.push(child);
                cur = child;
            }

            match bfs_dir::lookup(inodes, cur, leaf) {
                Ok(found) => found,
                Err(BfsError::NotFound(_)) if create => {
                    bfs_dir::validate_name(leaf)?;
                    let file = inodes.alloc(InodeKind::File)?;
                    if let Err(err) = bfs_dir::insert(inodes, cur, leaf, file) {
                        // Zero links and zero refs: a retain/release pair
                        // sends the orphan through the reclaim check.
                        let _ = inodes.retain(file);
                        let _ = inodes.release(file);
                        return Err(err);
                    }
                    file
                }
                Err(err) => return Err(err),
            }
        } else {
            InodeIndex::ROOT
        };

        let kind = inodes.get(target)?.kind;
        if kind == InodeKind::Dir && mode == Mode::ReadWrite {
            return Err(BfsError::InvalidArgument(
                "directories may only be opened read-only".to_owned(),
            ));
        }

        match mode {
            Mode::ReadOnly => inodes.lock_ro(target)?,
            Mode::ReadWrite => inodes.lock_rw(target)?,
        }
        if let Err(err) = inodes.retain(target) {
            match mode {
                Mode::ReadOnly => {
                    let _ = inodes.unlock_ro(target);
                }
                Mode::ReadWrite => {
                    let _ = inodes.unlock_rw(target);
                }
            }
            return Err(err);
        }
        Ok(target)
    }

    /// Create a directory at `path`. The parent must exist.
    pub fn make_dir(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let _ns = self.inner.ns_lock.lock();
        self.ensure_open()?;
        let comps = components(path)?;
        let (leaf, ancestors) = comps
            .split_last()
            .ok_or_else(|| BfsError::AlreadyExists("/".to_owned()))?;

        let parent = self.resolve(ancestors)?;
        self.require_dir(parent, path)?;
        bfs_dir::validate_name(leaf)?;
        if bfs_dir::lookup(&self.inner.inodes, parent, leaf).is_ok() {
            return Err(BfsError::AlreadyExists(path.display().to_string()));
        }

        let dir = self.inner.inodes.alloc(InodeKind::Dir)?;
        if let Err(err) = bfs_dir::insert(&self.inner.inodes, parent, leaf, dir) {
            let _ = self.inner.inodes.retain(dir);
            let _ = self.inner.inodes.release(dir);
            return Err(err);
        }
        debug!(event = "make_dir", path = %path.display(), inode = dir.0);
        Ok(())
    }

    /// Remove the entry at `path`, recursively reclaiming unreferenced
    /// inodes. The parent directory is locked exclusively for the update.
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let _ns = self.inner.ns_lock.lock();
        self.ensure_open()?;
        let comps = components(path)?;
        let (leaf, ancestors) = comps.split_last().ok_or_else(|| {
            BfsError::InvalidArgument("cannot remove the root directory".to_owned())
        })?;

        let parent = self.resolve(ancestors)?;
        self.require_dir(parent, path)?;

        self.inner.inodes.lock_rw(parent)?;
        let result = bfs_dir::remove(&self.inner.inodes, parent, leaf);
        self.inner.inodes.unlock_rw(parent)?;
        let child = result?;
        debug!(event = "remove", path = %path.display(), inode = child.0);
        Ok(())
    }

    /// Move the entry at `src` to `dest`. Both parents are locked
    /// exclusively in ascending inode order; the moved inode's net link
    /// count is unchanged.
    pub fn rename(&self, src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
        let (src, dest) = (src.as_ref(), dest.as_ref());
        let _ns = self.inner.ns_lock.lock();
        self.ensure_open()?;
        let src_comps = components(src)?;
        let dest_comps = components(dest)?;

        let (src_leaf, src_anc) = src_comps.split_last().ok_or_else(|| {
            BfsError::InvalidArgument("cannot move the root directory".to_owned())
        })?;
        let (dest_leaf, dest_anc) = dest_comps
            .split_last()
            .ok_or_else(|| BfsError::AlreadyExists("/".to_owned()))?;
        if dest_comps.len() >= src_comps.len() && dest_comps[..src_comps.len()] == src_comps[..] {
            return Err(BfsError::InvalidArgument(
                "destination lies inside the source".to_owned(),
            ));
        }
        bfs_dir::validate_name(dest_leaf)?;

        let src_parent = self.resolve(src_anc)?;
        self.require_dir(src_parent, src)?;
        let dest_parent = self.resolve(dest_anc)?;
        self.require_dir(dest_parent, dest)?;

        self.lock_parents_rw(src_parent, dest_parent)?;
        let result = (|| -> Result<InodeIndex> {
            let child = bfs_dir::lookup(&self.inner.inodes, src_parent, src_leaf)?;
            if bfs_dir::lookup(&self.inner.inodes, dest_parent, dest_leaf).is_ok() {
                return Err(BfsError::AlreadyExists(dest.display().to_string()));
            }
            bfs_dir::insert(&self.inner.inodes, dest_parent, dest_leaf, child)?;
            bfs_dir::remove(&self.inner.inodes, src_parent, src_leaf)?;
            Ok(child)
        })();
        self.unlock_parents_rw(src_parent, dest_parent);

        let child = result?;
        debug!(
            event = "rename",
            src = %src.display(),
            dest = %dest.display(),
            inode = child.0
        );
        Ok(())
    }

    /// Recursively copy `src` to `dest`. Files are deep-copied page by page;
    /// directories are recreated and descended.
    pub fn copy(&self, src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
        let (src, dest) = (src.as_ref(), dest.as_ref());
        let _ns = self.inner.ns_lock.lock();
        self.ensure_open()?;
        let src_comps = components(src)?;
        let dest_comps = components(dest)?;

        let (dest_leaf, dest_anc) = dest_comps
            .split_last()
            .ok_or_else(|| BfsError::AlreadyExists("/".to_owned()))?;
        if dest_comps.len() >= src_comps.len() && dest_comps[..src_comps.len()] == src_comps[..] {
            return Err(BfsError::InvalidArgument(
                "destination lies inside the source".to_owned(),
            ));
        }
        bfs_dir::validate_name(dest_leaf)?;

        let src_inode = self.resolve(&src_comps)?;
        let dest_parent = self.resolve(dest_anc)?;
        self.require_dir(dest_parent, dest)?;
        if bfs_dir::lookup(&self.inner.inodes, dest_parent, dest_leaf).is_ok() {
            return Err(BfsError::AlreadyExists(dest.display().to_string()));
        }

        self.copy_tree(src_inode, dest_parent, dest_leaf)?;
        debug!(event = "copy", src = %src.display(), dest = %dest.display());
        Ok(())
    }

    fn copy_tree(&self, src: InodeIndex, dest_parent: InodeIndex, name: &str) -> Result<()> {
        let inodes = &self.inner.inodes;
        match inodes.get(src)?.kind {
            InodeKind::File => {
                let copied = inodes.copy(src)?;
                if let Err(err) = bfs_dir::insert(inodes, dest_parent, name, copied) {
                    let _ = inodes.retain(copied);
                    let _ = inodes.release(copied);
                    return Err(err);
                }
                Ok(())
            }
            InodeKind::Dir => {
                let dir = inodes.alloc(InodeKind::Dir)?;
                if let Err(err) = bfs_dir::insert(inodes, dest_parent, name, dir) {
                    let _ = inodes.retain(dir);
                    let _ = inodes.release(dir);
                    return Err(err);
                }
                for entry in bfs_dir::entries(inodes, src)? {
                    self.copy_tree(entry.inode, dir, &entry.name)?;
                }
                Ok(())
            }
            InodeKind::Unused => Err(BfsError::Format(format!(
                "directory entry references unused inode {src}"
            ))),
        }
    }

    /// Metadata snapshot for `path`.
    pub fn metadata(&self, path: impl AsRef<Path>) -> Result<Metadata> {
        let path = path.as_ref();
        let _ns = self.inner.ns_lock.lock();
        self.ensure_open()?;
        let comps = components(path)?;
        let inode = self.resolve(&comps)?;
        let info = self.inner.inodes.get(inode)?;
        Ok(Metadata {
            is_dir: info.kind == InodeKind::Dir,
            size: info.size(),
            created_at: info.created_at,
            modified_at: info.modified_at,
            link_count: info.link,
        })
    }

    /// Fully-qualified paths of the live entries under `path`.
    pub fn read_dir(&self, path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        self.read_dir_filtered(path, |_| true)
    }

    /// Directory iteration with a per-path filter predicate.
    pub fn read_dir_filtered(
        &self,
        path: impl AsRef<Path>,
        mut filter: impl FnMut(&Path) -> bool,
    ) -> Result<Vec<PathBuf>> {
        let path = path.as_ref();
        let _ns = self.inner.ns_lock.lock();
        self.ensure_open()?;
        let comps = components(path)?;
        let dir = self.resolve(&comps)?;
        self.require_dir(dir, path)?;

        self.inner.inodes.lock_ro(dir)?;
        let entries = bfs_dir::entries(&self.inner.inodes, dir);
        self.inner.inodes.unlock_ro(dir)?;

        Ok(entries?
            .into_iter()
            .map(|entry| path.join(entry.name))
            .filter(|child| filter(child))
            .collect())
    }

    // ── Resolution helpers (namespace lock held) ────────────────────────

    fn resolve(&self, comps: &[String]) -> Result<InodeIndex> {
        let inodes = &self.inner.inodes;
        let mut cur = InodeIndex::ROOT;
        for name in comps {
            if inodes.get(cur)?.kind != InodeKind::Dir {
                return Err(BfsError::NotFound(name.clone()));
            }
            cur = bfs_dir::lookup(inodes, cur, name)?;
        }
        Ok(cur)
    }

    fn require_dir(&self, inode: InodeIndex, path: &Path) -> Result<()> {
        if self.inner.inodes.get(inode)?.kind != InodeKind::Dir {
            return Err(BfsError::NotFound(path.display().to_string()));
        }
        Ok(())
    }

    fn lock_parents_rw(&self, a: InodeIndex, b: InodeIndex) -> Result<()> {
        let inodes = &self.inner.inodes;
        if a == b {
            return inodes.lock_rw(a);
        }
        let (first, second) = if a.0 < b.0 { (a, b) } else { (b, a) };
        inodes.lock_rw(first)?;
        if let Err(err) = inodes.lock_rw(second) {
            let _ = inodes.unlock_rw(first);
            return Err(err);
        }
        Ok(())
    }

    fn unlock_parents_rw(&self, a: InodeIndex, b: InodeIndex) {
        let inodes = &self.inner.inodes;
        if a == b {
            let _ = inodes.unlock_rw(a);
            return;
        }
        let (first, second) = if a.0 < b.0 { (a, b) } else { (b, a) };
        let _ = inodes.unlock_rw(second);
        let _ = inodes.unlock_rw(first);
    }
}

impl Drop for Filesystem {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Split an absolute path into its normal components.
fn components(path: &Path) -> Result<Vec<String>> {
    if !path.is_absolute() {
        return Err(BfsError::InvalidArgument(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }
    let mut comps = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir => {}
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| {
                    BfsError::InvalidArgument(format!(
                        "path is not valid UTF-8: {}",
                        path.display()
                    ))
                })?;
                comps.push(name.to_owned());
            }
            Component::CurDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(BfsError::InvalidArgument(format!(
                    "path may not contain '.', '..', or a prefix: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(comps)
}

// ── Handle ──────────────────────────────────────────────────────────────────

/// An open file or directory.
///
/// One concrete state for all three variants (directory, read-only file,
/// read-write file); the capability split lives in `kind` and `mode`. The
/// handle owns one inode reference and one open-mode lock; `close` (or
/// drop) releases both.
#[derive(Debug)]
pub struct Handle {
    fs: Arc<FsInner>,
    inode: InodeIndex,
    kind: InodeKind,
    mode: Mode,
    pos: u64,
    open: bool,
}

impl Handle {
    fn ensure_open(&self) -> Result<()> {
        if !self.open || self.fs.closed.load(Ordering::SeqCst) {
            return Err(BfsError::Closed);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Dir
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == InodeKind::File
    }

    #[must_use]
    pub fn can_read(&self) -> bool {
        self.is_file()
    }

    #[must_use]
    pub fn can_write(&self) -> bool {
        self.mode == Mode::ReadWrite
    }

    pub fn size(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.fs.inodes.get(self.inode)?.size())
    }

    pub fn created_at(&self) -> Result<i64> {
        self.ensure_open()?;
        Ok(self.fs.inodes.get(self.inode)?.created_at)
    }

    pub fn modified_at(&self) -> Result<i64> {
        self.ensure_open()?;
        Ok(self.fs.inodes.get(self.inode)?.modified_at)
    }

    /// Bytes between the cursor and end of file.
    pub fn available(&self) -> Result<u64> {
        Ok(self.size()?.saturating_sub(self.pos))
    }

    /// Rewind the cursor to the start.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.pos = 0;
        Ok(())
    }

    /// Position the cursor. `pos` must lie in `[0, size]`.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.ensure_open()?;
        let size = self.fs.inodes.get(self.inode)?.size();
        if pos > size {
            return Err(BfsError::InvalidArgument(format!(
                "seek position {pos} is outside the file (size {size})"
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Read at the cursor, returning the bytes actually read; 0 at EOF.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if self.is_dir() {
            return Err(BfsError::Unsupported("reading a directory as a file"));
        }
        let n = self.fs.inodes.read(self.inode, self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at the cursor, returning the bytes written.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if self.mode == Mode::ReadOnly {
            return Err(BfsError::Unsupported("writing to a read-only handle"));
        }
        let n = self.fs.inodes.write(self.inode, self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Discard all content: free the data pages, reset size and cursor.
    pub fn truncate(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.mode == Mode::ReadOnly {
            return Err(BfsError::Unsupported("truncating a read-only handle"));
        }
        self.fs.inodes.truncate(self.inode)?;
        self.fs.inodes.set_size(self.inode, 0)?;
        self.pos = 0;
        Ok(())
    }

    /// Release the open-mode lock and the inode reference (which may
    /// reclaim an unlinked inode). Idempotent; runs even after the
    /// filesystem itself was closed.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        match self.mode {
            Mode::ReadOnly => self.fs.inodes.unlock_ro(self.inode)?,
            Mode::ReadWrite => self.fs.inodes.unlock_rw(self.inode)?,
        }
        self.fs.inodes.release(self.inode)?;
        Ok(())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn to_io_error(err: BfsError) -> std::io::Error {
    use std::io::ErrorKind;
    let kind = match &err {
        BfsError::NotFound(_) => ErrorKind::NotFound,
        BfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
        BfsError::InvalidArgument(_) => ErrorKind::InvalidInput,
        BfsError::Unsupported(_) => ErrorKind::Unsupported,
        BfsError::Io(io) => io.kind(),
        _ => return std::io::Error::other(err),
    };
    std::io::Error::new(kind, err)
}

impl std::io::Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Handle::read(self, buf).map_err(to_io_error)
    }
}

impl std::io::Write for Handle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Handle::write(self, buf).map_err(to_io_error)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::io::Seek for Handle {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        use std::io::SeekFrom;
        let size = self.size().map_err(to_io_error)?;
        let target = match pos {
            SeekFrom::Start(p) => i64::try_from(p).unwrap_or(i64::MAX),
            SeekFrom::End(d) => size as i64 + d,
            SeekFrom::Current(d) => self.pos as i64 + d,
        };
        if target < 0 {
            return Err(to_io_error(BfsError::InvalidArgument(
                "seek before start of file".to_owned(),
            )));
        }
        Handle::seek(self, target as u64).map_err(to_io_error)?;
        Ok(self.pos)
    }
}
