//! Block I/O layer: the container page device and the clock page cache.
//!
//! `PageDevice` maps the container file one page at a time; `PageCache`
//! bounds the number of live mappings with clock replacement and per-slot
//! pinning. Same-page accesses serialise on a per-slot lock; distinct pages
//! proceed in parallel.

use bfs_error::{BfsError, Result};
use bfs_types::{PAGE_SIZE, PageIndex};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Default number of cache slots.
pub const DEFAULT_CACHE_SLOTS: usize = 512;

// ── Page device ─────────────────────────────────────────────────────────────

/// The container file, addressed as fixed-size pages.
///
/// Each `map_page` call produces an independent shared mapping of one page.
/// Writes through any mapping are observable to every other mapping of the
/// same page once the write returns; durability across crashes is not
/// promised.
#[derive(Debug, Clone)]
pub struct PageDevice {
    file: Arc<File>,
    page_count: u32,
}

impl PageDevice {
    /// Open an existing container file read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len == 0 || len % PAGE_SIZE as u64 != 0 {
            return Err(BfsError::Format(format!(
                "container length {len} is not a multiple of the page size"
            )));
        }
        let page_count = u32::try_from(len / PAGE_SIZE as u64)
            .map_err(|_| BfsError::Format("container page count exceeds u32".to_owned()))?;
        Ok(Self {
            file: Arc::new(file),
            page_count,
        })
    }

    /// Create (or truncate) a container file of `page_count` zero pages.
    pub fn create(path: impl AsRef<Path>, page_count: u32) -> Result<Self> {
        if page_count == 0 {
            return Err(BfsError::InvalidArgument(
                "container must hold at least one page".to_owned(),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(u64::from(page_count) * PAGE_SIZE as u64)?;
        debug!(event = "container_create", pages = page_count);
        Ok(Self {
            file: Arc::new(file),
            page_count,
        })
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Map page `n` as a writable shared view.
    pub fn map_page(&self, n: PageIndex) -> Result<MmapMut> {
        if n.0 >= self.page_count {
            return Err(BfsError::Format(format!(
                "page out of range: page={} page_count={}",
                n.0, self.page_count
            )));
        }
        let offset = u64::from(n.0) * PAGE_SIZE as u64;
        // SAFETY: the mapping covers a fixed in-bounds region of a file this
        // process holds open for the lifetime of the map; all access goes
        // through &mut/& borrows of the returned mapping.
        let map = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(PAGE_SIZE)
                .map_mut(&*self.file)
        }?;
        Ok(map)
    }

    /// Overwrite page `n` with zeros.
    pub fn zero_page(&self, n: PageIndex) -> Result<()> {
        let mut map = self.map_page(n)?;
        map.fill(0);
        map.flush()?;
        Ok(())
    }

    /// Read a full copy of page `n`, bypassing the cache.
    pub fn read_page(&self, n: PageIndex) -> Result<Vec<u8>> {
        let map = self.map_page(n)?;
        Ok(map.to_vec())
    }

    /// Flush file metadata and contents to the host filesystem.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

// ── Page cache ──────────────────────────────────────────────────────────────

/// Snapshot of cache counters.
///
/// All counters are monotonically increasing for the lifetime of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident: usize,
    pub pinned: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct Slot {
    key: Option<PageIndex>,
    page: Option<Arc<Mutex<MmapMut>>>,
    pins: u32,
    used: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            key: None,
            page: None,
            pins: 0,
            used: false,
        }
    }
}

#[derive(Debug)]
struct CacheState {
    slots: Vec<Slot>,
    index: HashMap<PageIndex, usize>,
    hand: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded clock-replacement cache of page mappings.
///
/// `with_page` serialises lookup, pin acquisition, and eviction on one
/// internal lock; the caller's closure runs outside that critical section so
/// distinct pages are consumed in parallel. A pinned slot is never evicted.
#[derive(Debug)]
pub struct PageCache {
    device: PageDevice,
    state: Mutex<CacheState>,
}

impl PageCache {
    #[must_use]
    pub fn new(device: PageDevice, slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            device,
            state: Mutex::new(CacheState {
                slots: (0..slots).map(|_| Slot::empty()).collect(),
                index: HashMap::new(),
                hand: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    #[must_use]
    pub fn device(&self) -> &PageDevice {
        &self.device
    }

    /// Run `f` with exclusive access to the bytes of page `n`.
    ///
    /// The slot stays pinned for the duration of `f`. When every slot is
    /// pinned the call spins until one frees up; the slot count is sized far
    /// above the number of concurrently in-flight operations.
    pub fn with_page<R>(&self, n: PageIndex, f: impl FnOnce(&mut [u8]) -> Result<R>) -> Result<R> {
        let page = self.pin(n)?;
        let result = {
            let mut guard = page.lock();
            f(&mut guard[..])
        };
        self.unpin(n);
        result
    }

    /// Copy `buf.len()` bytes out of page `n` starting at `offset`.
    pub fn read_at(&self, n: PageIndex, offset: usize, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        if offset + len > PAGE_SIZE {
            return Err(BfsError::InvalidArgument(format!(
                "page read out of bounds: offset={offset} len={len}"
            )));
        }
        self.with_page(n, |page| {
            buf.copy_from_slice(&page[offset..offset + len]);
            Ok(())
        })
    }

    /// Copy `buf` into page `n` starting at `offset`.
    pub fn write_at(&self, n: PageIndex, offset: usize, buf: &[u8]) -> Result<()> {
        let len = buf.len();
        if offset + len > PAGE_SIZE {
            return Err(BfsError::InvalidArgument(format!(
                "page write out of bounds: offset={offset} len={len}"
            )));
        }
        self.with_page(n, |page| {
            page[offset..offset + len].copy_from_slice(buf);
            Ok(())
        })
    }

    /// Fill page `n` with zeros.
    pub fn zero_page(&self, n: PageIndex) -> Result<()> {
        self.with_page(n, |page| {
            page.fill(0);
            Ok(())
        })
    }

    /// Flush every resident mapping and the backing file.
    pub fn sync(&self) -> Result<()> {
        let pages: Vec<Arc<Mutex<MmapMut>>> = {
            let state = self.state.lock();
            state
                .slots
                .iter()
                .filter_map(|slot| slot.page.as_ref().map(Arc::clone))
                .collect()
        };
        for page in pages {
            page.lock().flush().map_err(BfsError::Io)?;
        }
        self.device.sync()
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let state = self.state.lock();
        CacheMetrics {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            resident: state.index.len(),
            pinned: state.slots.iter().filter(|s| s.pins > 0).count(),
            capacity: state.slots.len(),
        }
    }

    fn pin(&self, n: PageIndex) -> Result<Arc<Mutex<MmapMut>>> {
        loop {
            let mut state = self.state.lock();
            if let Some(&idx) = state.index.get(&n) {
                state.hits += 1;
                let slot = &mut state.slots[idx];
                slot.used = true;
                slot.pins += 1;
                return Ok(Arc::clone(slot.page.as_ref().expect("resident slot has a page")));
            }

            state.misses += 1;
            match Self::claim_slot(&mut state)? {
                Some(idx) => {
                    let map = self.device.map_page(n)?;
                    let page = Arc::new(Mutex::new(map));
                    let slot = &mut state.slots[idx];
                    slot.key = Some(n);
                    slot.page = Some(Arc::clone(&page));
                    slot.pins = 1;
                    slot.used = true;
                    state.index.insert(n, idx);
                    trace!(event = "cache_install", page = n.0, slot = idx);
                    return Ok(page);
                }
                None => {
                    // Every slot is pinned; let the holders make progress.
                    drop(state);
                    std::thread::yield_now();
                }
            }
        }
    }

    fn unpin(&self, n: PageIndex) {
        let mut state = self.state.lock();
        if let Some(&idx) = state.index.get(&n) {
            let slot = &mut state.slots[idx];
            debug_assert!(slot.pins > 0, "unpin without a matching pin");
            slot.pins = slot.pins.saturating_sub(1);
        }
    }

    /// Clock sweep: skip pinned slots, clear used bits, evict the first
    /// unused unpinned slot. Returns `None` when every slot is pinned.
    fn claim_slot(state: &mut CacheState) -> Result<Option<usize>> {
        let slots = state.slots.len();
        for _ in 0..slots * 2 {
            let idx = state.hand;
            state.hand = (state.hand + 1) % slots;
            let slot = &mut state.slots[idx];
            if slot.pins > 0 {
                continue;
            }
            if slot.key.is_none() {
                return Ok(Some(idx));
            }
            if slot.used {
                slot.used = false;
                continue;
            }
            // Evict. The slot is unpinned, so no thread holds or can acquire
            // its mutex (acquisition requires a pin).
            let key = slot.key.take().expect("occupied slot has a key");
            let page = slot.page.take().expect("occupied slot has a page");
            state.index.remove(&key);
            state.evictions += 1;
            page.lock().flush().map_err(BfsError::Io)?;
            trace!(event = "cache_evict", page = key.0, slot = idx);
            return Ok(Some(idx));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_device(dir: &TempDir, pages: u32) -> PageDevice {
        PageDevice::create(dir.path().join("pages.img"), pages).expect("create container")
    }

    #[test]
    fn create_and_reopen_device() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.img");
        let dev = PageDevice::create(&path, 8).unwrap();
        assert_eq!(dev.page_count(), 8);
        drop(dev);

        let dev = PageDevice::open(&path).unwrap();
        assert_eq!(dev.page_count(), 8);
    }

    #[test]
    fn open_rejects_unaligned_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ragged.img");
        std::fs::write(&path, vec![0_u8; PAGE_SIZE + 1]).unwrap();
        assert!(matches!(
            PageDevice::open(&path),
            Err(BfsError::Format(_))
        ));
    }

    #[test]
    fn writes_are_visible_across_mappings() {
        let dir = TempDir::new().unwrap();
        let dev = make_device(&dir, 4);

        let mut a = dev.map_page(PageIndex(2)).unwrap();
        a[0..4].copy_from_slice(b"ping");
        let b = dev.map_page(PageIndex(2)).unwrap();
        assert_eq!(&b[0..4], b"ping");
    }

    #[test]
    fn map_page_bounds_checked() {
        let dir = TempDir::new().unwrap();
        let dev = make_device(&dir, 4);
        assert!(dev.map_page(PageIndex(4)).is_err());
    }

    #[test]
    fn zero_page_clears_contents() {
        let dir = TempDir::new().unwrap();
        let dev = make_device(&dir, 4);
        let mut map = dev.map_page(PageIndex(1)).unwrap();
        map.fill(0xAB);
        map.flush().unwrap();
        drop(map);

        dev.zero_page(PageIndex(1)).unwrap();
        assert!(dev.read_page(PageIndex(1)).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn cache_round_trips_data() {
        let dir = TempDir::new().unwrap();
        let cache = PageCache::new(make_device(&dir, 8), 4);

        cache.write_at(PageIndex(3), 100, b"hello").unwrap();
        let mut buf = [0_u8; 5];
        cache.read_at(PageIndex(3), 100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn cache_counts_hits_and_misses() {
        let dir = TempDir::new().unwrap();
        let cache = PageCache::new(make_device(&dir, 8), 4);

        cache.zero_page(PageIndex(0)).unwrap();
        cache.zero_page(PageIndex(0)).unwrap();
        cache.zero_page(PageIndex(1)).unwrap();

        let m = cache.metrics();
        assert_eq!(m.misses, 2);
        assert_eq!(m.hits, 1);
        assert_eq!(m.resident, 2);
        assert_eq!(m.pinned, 0);
    }

    #[test]
    fn eviction_preserves_written_data() {
        let dir = TempDir::new().unwrap();
        let cache = PageCache::new(make_device(&dir, 16), 4);

        for i in 0..12_u32 {
            cache
                .write_at(PageIndex(i), 0, &i.to_be_bytes())
                .unwrap();
        }
        let m = cache.metrics();
        assert!(m.evictions > 0, "small cache must evict: {m:?}");
        assert!(m.resident <= 4);

        // Every page reads back what was written, evicted or not.
        for i in 0..12_u32 {
            let mut buf = [0_u8; 4];
            cache.read_at(PageIndex(i), 0, &mut buf).unwrap();
            assert_eq!(buf, i.to_be_bytes(), "page {i}");
        }
    }

    #[test]
    fn clock_prefers_unused_slots() {
        let dir = TempDir::new().unwrap();
        let cache = PageCache::new(make_device(&dir, 16), 2);

        cache.zero_page(PageIndex(0)).unwrap();
        cache.zero_page(PageIndex(1)).unwrap();
        // Re-touch page 0 so its used bit is set, then fault page 2:
        // the sweep should clear used bits and still complete.
        cache.zero_page(PageIndex(0)).unwrap();
        cache.zero_page(PageIndex(2)).unwrap();

        let m = cache.metrics();
        assert_eq!(m.evictions, 1);
        assert_eq!(m.resident, 2);
    }

    #[test]
    fn with_page_reports_closure_errors() {
        let dir = TempDir::new().unwrap();
        let cache = PageCache::new(make_device(&dir, 4), 2);

        let err = cache
            .with_page(PageIndex(0), |_| -> Result<()> {
                Err(BfsError::Unsupported("proof"))
            })
            .unwrap_err();
        assert!(matches!(err, BfsError::Unsupported("proof")));
        // The pin is released even on error.
        assert_eq!(cache.metrics().pinned, 0);
    }

    #[test]
    fn concurrent_distinct_pages() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(PageCache::new(make_device(&dir, 64), 16));

        let mut handles = Vec::new();
        for t in 0..4_u32 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..16_u32 {
                    let page = PageIndex(t * 16 + i);
                    cache.write_at(page, 8, &page.0.to_be_bytes()).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        for p in 0..64_u32 {
            let mut buf = [0_u8; 4];
            cache.read_at(PageIndex(p), 8, &mut buf).unwrap();
            assert_eq!(buf, p.to_be_bytes());
        }
    }
}
