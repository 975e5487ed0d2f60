use std::ptr::{self, NonNull};

use tracing::{debug, trace};

use crate::{
    block::{BLOCK_CANARY, Block, BlockHandle, PageHandle},
    cache::RecencyCache,
    chain::BlockTable,
    error::{MIN_UNIT_SIZE, PoolError},
    host::HostMemory,
    page::{PAGE_CANARY, Page, PageTable},
    utils::units_for,
};

/// Construction parameters for a [`Pool`], all fixed at creation time.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Units in the starting page.
    pub start_units: usize,
    /// Units added per growth chunk.
    pub chunk_units: usize,
    /// Byte size of one allocation unit. Must be at least
    /// [`MIN_UNIT_SIZE`].
    pub unit_size: usize,
    /// Slots in the recency cache. Zero disables caching entirely.
    pub cache_slots: usize,
    /// How many cache slots a lookup may inspect.
    pub cache_radius: usize,
    /// Diagnostic owner label for the pool and its unowned blocks.
    pub tag: &'static str,
    /// Pin pages against swapping as they are acquired.
    pub lock_pages: bool,
    /// Maintain and check canary fields on blocks and pages.
    pub canaries: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            start_units: 4096,
            chunk_units: 1024,
            unit_size: 64,
            cache_slots: 32,
            cache_radius: 8,
            tag: "pool",
            lock_pages: false,
            canaries: cfg!(debug_assertions),
        }
    }
}

/// Unit-granular memory pool.
///
/// The pool owns a set of pages obtained from its host memory provider and
/// subdivides them into blocks linked in one pool-wide chain. All sizes are
/// expressed in allocation units, never raw bytes. Operations on one pool
/// must be serialized by the caller; there is no internal locking.
pub struct Pool<H: HostMemory> {
    host: H,
    pub(crate) blocks: BlockTable,
    pub(crate) pages: PageTable,
    pub(crate) cache: RecencyCache,
    pub(crate) total_units: usize,
    chunk_units: usize,
    unit_size: usize,
    tag: &'static str,
    lock_pages: bool,
    pub(crate) canaries: bool,
    last_error: Option<PoolError>,
    pub(crate) poisoned: bool,
}

impl<H: HostMemory> Pool<H> {
    /// Creates a pool with one page of `start_units` spanned by a single
    /// free block.
    pub fn create(config: PoolConfig, host: H) -> Result<Self, PoolError> {
        if config.unit_size < MIN_UNIT_SIZE {
            return Err(PoolError::UnitSizeTooSmall(config.unit_size));
        }

        let mut pool = Self {
            host,
            blocks: BlockTable::new(),
            pages: PageTable::new(),
            cache: RecencyCache::new(config.cache_slots, config.cache_radius),
            total_units: 0,
            chunk_units: config.chunk_units,
            unit_size: config.unit_size,
            tag: config.tag,
            lock_pages: config.lock_pages,
            canaries: config.canaries,
            last_error: None,
            poisoned: false,
        };

        pool.acquire_page(config.start_units)?;
        Ok(pool)
    }

    #[inline]
    pub fn total_units(&self) -> usize {
        self.total_units
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    #[inline]
    pub fn owner_tag(&self) -> &'static str {
        self.tag
    }

    /// Most recent recoverable failure, kept for postmortem inspection.
    #[inline]
    pub fn last_error(&self) -> Option<PoolError> {
        self.last_error
    }

    /// How many units a request of `bytes` occupies in this pool.
    #[inline]
    pub fn units_for_bytes(&self, bytes: usize) -> usize {
        units_for(bytes, self.unit_size)
    }

    /// Size of a block in units.
    pub fn block_units(&self, handle: BlockHandle) -> usize {
        self.blocks.block(handle).units
    }

    /// Satisfies a new or resized request.
    ///
    /// With `existing` set this doubles as reallocate: an exact fit returns
    /// the same handle, a shrink carves the tail off in place, a growth
    /// first tries to absorb a free same-page successor and otherwise
    /// relocates the payload into a fresh block and frees the old one. With
    /// no `existing` block the request goes to the recency cache, then a
    /// bounded chain scan, then a single growth step.
    pub fn allocate(
        &mut self,
        existing: Option<BlockHandle>,
        bytes: usize,
        tag: &'static str,
    ) -> Result<BlockHandle, PoolError> {
        self.assert_usable();
        let units = units_for(bytes, self.unit_size);

        match existing {
            Some(handle) => self.resize(handle, units, tag),
            None => self.allocate_units(units, tag),
        }
    }

    /// Frees a block, coalescing it with free same-page neighbours and
    /// returning its page to the host once nothing on it is used.
    ///
    /// # Panics
    ///
    /// Panics on a dead handle or a block that is already free: both mean a
    /// double free, which is unrecoverable misuse.
    pub fn free(&mut self, handle: BlockHandle) {
        self.assert_usable();

        let page = match self.blocks.get(handle) {
            Some(block) if block.used => block.page,
            Some(block) => panic!(
                "pool '{}': double free of block tagged '{}'",
                self.tag, block.tag
            ),
            None => panic!("pool '{}': free of a dead block handle", self.tag),
        };

        {
            let block = self.blocks.block_mut(handle);
            block.used = false;
            block.tag = self.tag;
        }
        self.pages.page_mut(page).used_blocks -= 1;
        self.cache_insert(handle);

        self.try_merge_next(handle);

        // Merging backward dissolves this block into its predecessor.
        if let Some(prev) = self.blocks.block(handle).prev {
            let before = self.blocks.block(prev);
            if !before.used && before.page == page {
                self.cache_remove(handle);
                let merged = self.blocks.remove(handle);
                self.pages.page_mut(page).blocks -= 1;
                self.blocks.block_mut(prev).units += merged.units;
                trace!(tag = self.tag, units = merged.units, "blocks merged");
            }
        }

        // An emptied page goes back to the host, except the last one: the
        // pool always retains one page so the arena never vanishes under a
        // caller that is merely between allocations.
        if self.pages.page(page).used_blocks == 0 && self.pages.len() > 1 {
            self.release_page(page);
        }
    }

    /// Appends one new page of `chunks * chunk_units` units, spanned by a
    /// single free block prepended to the chain.
    pub fn extend(&mut self, chunks: usize) -> Result<(), PoolError> {
        self.assert_usable();
        if chunks == 0 {
            return Ok(());
        }

        self.acquire_page(chunks * self.chunk_units)?;
        Ok(())
    }

    /// Read access to a block's payload bytes.
    pub fn payload(&self, handle: BlockHandle) -> &[u8] {
        let (addr, len) = self.extent(handle);
        // SAFETY: the extent lies inside a live host page, which is
        // zero-initialized on acquire, and `&self` prevents concurrent
        // mutation through the pool.
        unsafe { std::slice::from_raw_parts(addr.as_ptr(), len) }
    }

    /// Write access to a block's payload bytes.
    pub fn payload_mut(&mut self, handle: BlockHandle) -> &mut [u8] {
        let (addr, len) = self.extent(handle);
        // SAFETY: as in `payload`, plus `&mut self` gives exclusive access.
        unsafe { std::slice::from_raw_parts_mut(addr.as_ptr(), len) }
    }

    /// Base address of a block's payload.
    pub fn payload_ptr(&self, handle: BlockHandle) -> NonNull<u8> {
        self.extent(handle).0
    }

    fn extent(&self, handle: BlockHandle) -> (NonNull<u8>, usize) {
        let block = self.blocks.block(handle);
        let page = self.pages.page(block.page);
        // SAFETY: block extents never leave their page, so the offset stays
        // inside the host mapping.
        let addr = unsafe { page.base.add(block.offset * self.unit_size) };
        (addr, block.units * self.unit_size)
    }

    fn assert_usable(&self) {
        if self.poisoned {
            panic!(
                "pool '{}' failed verification and refuses further use",
                self.tag
            );
        }
    }

    /// Fresh allocation path: cache first, then a bounded chain scan, then
    /// a growth step sized to the request and a rescan.
    fn allocate_units(&mut self, units: usize, tag: &'static str) -> Result<BlockHandle, PoolError> {
        let found = self
            .cache
            .find_fit(units, &self.blocks)
            .or_else(|| self.scan_free(units));

        let found = match found {
            Some(handle) => handle,
            None => {
                // Enough chunks that the new page alone can satisfy the
                // request, so the rescan cannot miss.
                let chunks = units.div_ceil(self.chunk_units).max(1);
                self.extend(chunks)?;
                match self.scan_free(units) {
                    Some(handle) => handle,
                    None => {
                        let err = PoolError::NoFreeBlock(units);
                        self.last_error = Some(err);
                        return Err(err);
                    }
                }
            }
        };

        self.claim(found, units, tag);
        Ok(found)
    }

    /// Resize path of [`Pool::allocate`].
    fn resize(
        &mut self,
        handle: BlockHandle,
        units: usize,
        tag: &'static str,
    ) -> Result<BlockHandle, PoolError> {
        let (current, page, used) = {
            let block = self.blocks.block(handle);
            (block.units, block.page, block.used)
        };
        if !used {
            panic!("pool '{}': resize of a free block", self.tag);
        }

        if units == current {
            return Ok(handle);
        }

        if units < current {
            self.split_tail(handle, units);
            return Ok(handle);
        }

        // Growing: absorb a free same-page successor when the combined size
        // reaches the request.
        if let Some(next) = self.blocks.block(handle).next {
            let (next_units, absorbable) = {
                let after = self.blocks.block(next);
                (after.units, !after.used && after.page == page)
            };

            if absorbable && current + next_units >= units {
                self.cache_remove(next);
                let absorbed = self.blocks.remove(next);
                self.pages.page_mut(page).blocks -= 1;
                self.blocks.block_mut(handle).units += absorbed.units;
                trace!(tag = self.tag, units = absorbed.units, "blocks merged");

                if self.blocks.block(handle).units > units {
                    self.split_tail(handle, units);
                }
                return Ok(handle);
            }
        }

        // No room in place: relocate, copy the payload, release the old
        // block.
        let fresh = self.allocate_units(units, tag)?;
        let copy_bytes = current.min(units) * self.unit_size;
        let src = self.payload_ptr(handle);
        let dst = self.payload_ptr(fresh);
        // SAFETY: both extents are live and distinct blocks never overlap.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), copy_bytes) };
        self.free(handle);

        Ok(fresh)
    }

    /// Marks a free block used, splitting off the tail first when it is
    /// larger than the request.
    fn claim(&mut self, handle: BlockHandle, units: usize, tag: &'static str) {
        self.cache_remove(handle);

        if self.blocks.block(handle).units > units {
            self.split_tail(handle, units);
        }

        let page = {
            let block = self.blocks.block_mut(handle);
            block.used = true;
            block.tag = tag;
            block.page
        };
        self.pages.page_mut(page).used_blocks += 1;
    }

    /// Carves the tail of `handle` beyond `keep` units into a new free
    /// block, inserted after it in the chain and into the recency cache.
    /// The new block immediately coalesces with a free same-page successor.
    fn split_tail(&mut self, handle: BlockHandle, keep: usize) {
        let (page, offset, total) = {
            let block = self.blocks.block_mut(handle);
            let fields = (block.page, block.offset, block.units);
            block.units = keep;
            fields
        };

        let rest = self.blocks.insert_after(
            handle,
            Block {
                used: false,
                tag: self.tag,
                page,
                offset: offset + keep,
                units: total - keep,
                cache_slot: None,
                next: None,
                prev: None,
                canary: BLOCK_CANARY,
            },
        );
        self.pages.page_mut(page).blocks += 1;
        self.cache_insert(rest);
        trace!(tag = self.tag, kept = keep, rest = total - keep, "block split");

        self.try_merge_next(rest);
    }

    /// Folds a free same-page successor into `handle` when `handle` itself
    /// is free. Returns whether a merge happened.
    fn try_merge_next(&mut self, handle: BlockHandle) -> bool {
        let (page, used, next) = {
            let block = self.blocks.block(handle);
            (block.page, block.used, block.next)
        };
        if used {
            return false;
        }
        let Some(next) = next else {
            return false;
        };

        {
            let after = self.blocks.block(next);
            if after.used || after.page != page {
                return false;
            }
        }

        self.cache_remove(next);
        let merged = self.blocks.remove(next);
        self.pages.page_mut(page).blocks -= 1;
        self.blocks.block_mut(handle).units += merged.units;
        trace!(tag = self.tag, units = merged.units, "blocks merged");

        true
    }

    /// First-fit scan over the whole chain, bounded by the tracked block
    /// count. Walking past that bound means the directory links are corrupt.
    fn scan_free(&self, units: usize) -> Option<BlockHandle> {
        let mut visited = 0;
        let mut current = self.blocks.head();

        while let Some(handle) = current {
            visited += 1;
            if visited > self.blocks.len() {
                panic!(
                    "pool '{}': block chain exceeds the tracked count of {}; directory corrupted",
                    self.tag,
                    self.blocks.len()
                );
            }

            let block = self.blocks.block(handle);
            if !block.used && block.units >= units {
                return Some(handle);
            }
            current = block.next;
        }

        None
    }

    /// Acquires one page of `units` from the host and threads its spanning
    /// free block onto the front of the chain.
    fn acquire_page(&mut self, units: usize) -> Result<BlockHandle, PoolError> {
        let bytes = units * self.unit_size;

        let Some(base) = self.host.acquire(bytes, self.tag) else {
            let err = PoolError::HostAllocFailed(bytes);
            self.last_error = Some(err);
            return Err(err);
        };

        if self.lock_pages && !self.host.lock(base, bytes) {
            self.host.release(base, bytes);
            let err = PoolError::PageLockFailed(bytes);
            self.last_error = Some(err);
            return Err(err);
        }

        let page = self.pages.insert(Page {
            base,
            units,
            bytes,
            blocks: 1,
            used_blocks: 0,
            canary: PAGE_CANARY,
        });

        let handle = self.blocks.insert_head(Block {
            used: false,
            tag: self.tag,
            page,
            offset: 0,
            units,
            cache_slot: None,
            next: None,
            prev: None,
            canary: BLOCK_CANARY,
        });

        self.total_units += units;
        self.cache_insert(handle);
        debug!(tag = self.tag, page = page.0, units, bytes, "page acquired");

        Ok(handle)
    }

    /// Unthreads every block of an emptied page from the chain and the
    /// cache, then hands the memory back to the host.
    fn release_page(&mut self, page: PageHandle) {
        let doomed: Vec<BlockHandle> = self
            .blocks
            .chain()
            .filter(|&handle| self.blocks.block(handle).page == page)
            .collect();

        for handle in doomed {
            self.cache_remove(handle);
            self.blocks.remove(handle);
        }

        let record = self.pages.remove(page);
        self.total_units -= record.units;
        self.host.release(record.base, record.bytes);
        debug!(
            tag = self.tag,
            page = page.0,
            units = record.units,
            "page released"
        );
    }

    /// Records a free block in the cache, fixing up the back-pointer of
    /// whichever block the write evicted.
    fn cache_insert(&mut self, handle: BlockHandle) {
        let Some((slot, evicted)) = self.cache.insert(handle) else {
            return;
        };

        self.blocks.block_mut(handle).cache_slot = Some(slot);

        if let Some(old) = evicted {
            if old != handle {
                let block = self.blocks.block_mut(old);
                if block.cache_slot == Some(slot) {
                    block.cache_slot = None;
                }
            }
        }
    }

    /// Drops a block's cache entry, if it has one. Safe on uncached blocks.
    fn cache_remove(&mut self, handle: BlockHandle) {
        if let Some(slot) = self.blocks.block_mut(handle).cache_slot.take() {
            self.cache.remove(slot);
        }
    }
}

impl<H: HostMemory> Drop for Pool<H> {
    fn drop(&mut self) {
        // A poisoned pool's page records cannot be trusted; leaking beats
        // handing the host addresses that may be wrong.
        if self.poisoned {
            return;
        }

        let doomed: Vec<(NonNull<u8>, usize)> = self
            .pages
            .iter()
            .map(|(_, page)| (page.base, page.bytes))
            .collect();

        for (base, bytes) in doomed {
            self.host.release(base, bytes);
        }
    }
}
