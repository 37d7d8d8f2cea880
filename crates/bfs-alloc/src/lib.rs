#![forbid(unsafe_code)]
//! Data-block allocation over the bitmap page.
//!
//! One bit per data block, LSB-first within each byte: bit `n` set means
//! block `first_data_block + n` is allocated.

use bfs_block::PageCache;
use bfs_error::{BfsError, Result};
use bfs_types::{Geometry, PageIndex};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

// ── Bitmap operations ───────────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Count free (zero) bits in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    let full_bytes = (count / 8) as usize;
    let remainder = count % 8;
    let mut free = 0u32;

    for &byte in bitmap.iter().take(full_bytes) {
        free += byte.count_zeros();
    }

    if remainder > 0 && full_bytes < bitmap.len() {
        let byte = bitmap[full_bytes];
        for bit in 0..remainder {
            if (byte >> bit) & 1 == 0 {
                free += 1;
            }
        }
    }

    free
}

/// Find the first free (zero) bit in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_find_free(bitmap: &[u8], count: u32) -> Option<u32> {
    (0..count).find(|&idx| !bitmap_get(bitmap, idx))
}

// ── Block allocator ─────────────────────────────────────────────────────────

/// First-fit allocator over the container's data region.
///
/// All state transitions are mutually exclusive; the bitmap page itself is
/// reached through the page cache.
#[derive(Debug)]
pub struct BlockAllocator {
    cache: Arc<PageCache>,
    bitmap_page: PageIndex,
    first_data_block: PageIndex,
    capacity: u32,
    lock: Mutex<()>,
}

impl BlockAllocator {
    #[must_use]
    pub fn new(cache: Arc<PageCache>, geometry: &Geometry) -> Self {
        Self {
            cache,
            bitmap_page: geometry.bitmap_page(),
            first_data_block: geometry.first_data_block(),
            capacity: geometry.max_data_blocks(),
            lock: Mutex::new(()),
        }
    }

    /// Total data blocks this allocator manages.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Allocate the lowest free data block and zero it.
    ///
    /// Fails with `NoSpace` when every bit is set.
    pub fn allocate(&self) -> Result<PageIndex> {
        let _guard = self.lock.lock();
        let capacity = self.capacity;
        let idx = self.cache.with_page(self.bitmap_page, |bitmap| {
            match bitmap_find_free(bitmap, capacity) {
                Some(idx) => {
                    bitmap_set(bitmap, idx);
                    Ok(idx)
                }
                None => Err(BfsError::NoSpace),
            }
        })?;

        let block = PageIndex(self.first_data_block.0 + idx);
        self.cache.zero_page(block)?;
        trace!(event = "block_alloc", block = block.0);
        Ok(block)
    }

    /// Free a data block. Idempotent at the bit level.
    pub fn free(&self, block: PageIndex) -> Result<()> {
        let idx = self.bit_index(block)?;
        let _guard = self.lock.lock();
        self.cache.with_page(self.bitmap_page, |bitmap| {
            bitmap_clear(bitmap, idx);
            Ok(())
        })?;
        trace!(event = "block_free", block = block.0);
        Ok(())
    }

    /// Whether `block` is currently marked allocated.
    pub fn is_allocated(&self, block: PageIndex) -> Result<bool> {
        let idx = self.bit_index(block)?;
        let _guard = self.lock.lock();
        self.cache
            .with_page(self.bitmap_page, |bitmap| Ok(bitmap_get(bitmap, idx)))
    }

    /// Number of free data blocks.
    pub fn free_count(&self) -> Result<u32> {
        let capacity = self.capacity;
        let _guard = self.lock.lock();
        self.cache
            .with_page(self.bitmap_page, |bitmap| Ok(bitmap_count_free(bitmap, capacity)))
    }

    fn bit_index(&self, block: PageIndex) -> Result<u32> {
        let idx = block
            .0
            .checked_sub(self.first_data_block.0)
            .filter(|&idx| idx < self.capacity);
        idx.ok_or_else(|| {
            BfsError::InvalidArgument(format!(
                "block {} is outside the data region",
                block.0
            ))
        })
    }
}
