use crate::block::BlockHandle;
use crate::chain::BlockTable;

/// Bounded table of recently freed blocks.
///
/// Allocation and free traffic in a language runtime is overwhelmingly
/// size-homogeneous, so the blocks freed most recently are disproportionately
/// likely to satisfy the next request. Instead of a full free list we keep a
/// fixed circular table of handles:
///
/// ```text
///             cursor (next write)
///                  |
///                  v
/// +------+------+------+------+------+------+
/// | B 12 | B  7 |      | B  3 |      | B 40 |
/// +------+------+------+------+------+------+
///    ^      ^
///    |      +-- most recent write, where lookups start
///    +--------- older entries, reached by scanning backward
/// ```
///
/// Writes overwrite whatever occupied the slot; the evicted block stays free
/// and simply becomes reachable only through the full chain scan. Lookups
/// walk backward from the most recent write for at most `radius` steps, which
/// keeps the worst-case allocation cost flat even once the table fills with
/// stale sizes.
pub(crate) struct RecencyCache {
    slots: Box<[Option<BlockHandle>]>,
    /// Next write position; advances circularly on every insert.
    cursor: usize,
    /// Number of occupied slots.
    live: usize,
    /// How many slots a lookup may inspect before giving up.
    radius: usize,
}

impl RecencyCache {
    pub fn new(capacity: usize, radius: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            cursor: 0,
            live: 0,
            radius,
        }
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn slots(&self) -> &[Option<BlockHandle>] {
        &self.slots
    }

    /// Records `handle` at the write cursor.
    ///
    /// Returns the slot it landed in together with the evicted previous
    /// occupant, if any; the pool must clear the evicted block's back-pointer
    /// or a later removal would null the wrong slot. A zero-capacity cache
    /// accepts nothing and returns `None`.
    pub fn insert(&mut self, handle: BlockHandle) -> Option<(u32, Option<BlockHandle>)> {
        if self.slots.is_empty() {
            return None;
        }

        let slot = self.cursor;
        let evicted = self.slots[slot].replace(handle);
        self.cursor = (self.cursor + 1) % self.slots.len();

        if evicted.is_none() {
            self.live += 1;
        }

        Some((slot as u32, evicted))
    }

    /// Clears one slot. Safe to call on a slot that was already emptied.
    pub fn remove(&mut self, slot: u32) {
        if self.slots[slot as usize].take().is_some() {
            self.live -= 1;
        }
    }

    /// Scans backward from the most recently written slot, wrapping at the
    /// table edge, for the first free block of at least `units`. Gives up
    /// after `radius` slots so the lookup cost stays bounded.
    pub fn find_fit(&self, units: usize, table: &BlockTable) -> Option<BlockHandle> {
        if self.slots.is_empty() || self.live == 0 {
            return None;
        }

        let capacity = self.slots.len();
        let mut position = (self.cursor + capacity - 1) % capacity;

        for _ in 0..self.radius.min(capacity) {
            if let Some(handle) = self.slots[position] {
                let block = table.block(handle);
                if !block.used && block.units >= units {
                    return Some(handle);
                }
            }
            position = (position + capacity - 1) % capacity;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BLOCK_CANARY, Block, PageHandle};

    fn free_block(units: usize) -> Block {
        Block {
            used: false,
            tag: "test",
            page: PageHandle(0),
            offset: 0,
            units,
            cache_slot: None,
            next: None,
            prev: None,
            canary: BLOCK_CANARY,
        }
    }

    #[test]
    fn insert_wraps_and_evicts() {
        let mut cache = RecencyCache::new(2, 2);

        let (s0, e0) = cache.insert(BlockHandle(10)).unwrap();
        let (s1, e1) = cache.insert(BlockHandle(11)).unwrap();
        assert_eq!((s0, s1), (0, 1));
        assert!(e0.is_none() && e1.is_none());
        assert_eq!(cache.live(), 2);

        // Third insert wraps to slot 0 and evicts the oldest entry.
        let (s2, evicted) = cache.insert(BlockHandle(12)).unwrap();
        assert_eq!(s2, 0);
        assert_eq!(evicted, Some(BlockHandle(10)));
        assert_eq!(cache.live(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut cache = RecencyCache::new(4, 4);

        let (slot, _) = cache.insert(BlockHandle(3)).unwrap();
        cache.remove(slot);
        assert_eq!(cache.live(), 0);

        cache.remove(slot);
        assert_eq!(cache.live(), 0);
    }

    #[test]
    fn zero_capacity_cache_is_inert() {
        let mut cache = RecencyCache::new(0, 4);
        let table = BlockTable::new();

        assert!(cache.insert(BlockHandle(0)).is_none());
        assert!(cache.find_fit(1, &table).is_none());
    }

    #[test]
    fn find_fit_prefers_recent_entries() {
        let mut table = BlockTable::new();
        let big_old = table.insert_head(free_block(8));
        let big_new = table.insert_head(free_block(8));

        let mut cache = RecencyCache::new(4, 4);
        cache.insert(big_old).unwrap();
        cache.insert(big_new).unwrap();

        assert_eq!(cache.find_fit(4, &table), Some(big_new));
    }

    #[test]
    fn find_fit_respects_search_radius() {
        let mut table = BlockTable::new();
        let fits = table.insert_head(free_block(8));
        let too_small = table.insert_head(free_block(1));

        let mut cache = RecencyCache::new(8, 1);
        cache.insert(fits).unwrap();
        cache.insert(too_small).unwrap();

        // The only fitting entry is one step past the radius.
        assert!(cache.find_fit(4, &table).is_none());
    }

    #[test]
    fn find_fit_skips_undersized_blocks() {
        let mut table = BlockTable::new();
        let fits = table.insert_head(free_block(16));
        let small = table.insert_head(free_block(2));

        let mut cache = RecencyCache::new(8, 8);
        cache.insert(fits).unwrap();
        cache.insert(small).unwrap();

        assert_eq!(cache.find_fit(10, &table), Some(fits));
    }
}
