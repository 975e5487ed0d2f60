use crate::block::{Block, BlockHandle};

/// Slot-indexed storage for blocks plus the single pool-wide chain that
/// orders them.
///
/// The chain is a doubly-linked list threaded through the `next`/`prev`
/// handles of the blocks themselves. Within one page the chain order is the
/// physical order, so chain-adjacent blocks of the same page are also
/// byte-adjacent, which is what makes coalescing a pure link operation.
///
/// Callers guarantee structural preconditions here; the table itself only
/// rewires links and recycles slots.
pub(crate) struct BlockTable {
    slots: Vec<Option<Block>>,
    free_slots: Vec<u32>,
    head: Option<BlockHandle>,
    len: usize,
}

impl BlockTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            head: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn head(&self) -> Option<BlockHandle> {
        self.head
    }

    /// Number of slots ever created, live or not. The integrity pass uses
    /// this to size its visited map.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn store(&mut self, block: Block) -> BlockHandle {
        self.len += 1;

        if let Some(slot) = self.free_slots.pop() {
            self.slots[slot as usize] = Some(block);
            return BlockHandle(slot);
        }

        self.slots.push(Some(block));
        BlockHandle((self.slots.len() - 1) as u32)
    }

    /// Prepends `block` to the front of the chain. Used when a freshly
    /// acquired page contributes its spanning free block.
    pub fn insert_head(&mut self, mut block: Block) -> BlockHandle {
        let old_head = self.head;
        block.prev = None;
        block.next = old_head;

        let handle = self.store(block);

        if let Some(next) = old_head {
            self.block_mut(next).prev = Some(handle);
        }
        self.head = Some(handle);

        handle
    }

    /// Inserts `block` into the chain right after `at`. Used when splitting
    /// carves a remainder off an oversized block.
    pub fn insert_after(&mut self, at: BlockHandle, mut block: Block) -> BlockHandle {
        let next = self.block(at).next;
        block.prev = Some(at);
        block.next = next;

        let handle = self.store(block);

        self.block_mut(at).next = Some(handle);
        if let Some(next) = next {
            self.block_mut(next).prev = Some(handle);
        }

        handle
    }

    /// Splices a block out of the chain and frees its slot, returning the
    /// record so the caller can fold its units into a neighbour.
    pub fn remove(&mut self, handle: BlockHandle) -> Block {
        let block = self.slots[handle.0 as usize]
            .take()
            .expect("block table: remove of a dead block handle");

        match block.prev {
            Some(prev) => self.block_mut(prev).next = block.next,
            None => self.head = block.next,
        }
        if let Some(next) = block.next {
            self.block_mut(next).prev = block.prev;
        }

        self.free_slots.push(handle.0);
        self.len -= 1;

        block
    }

    pub fn get(&self, handle: BlockHandle) -> Option<&Block> {
        self.slots.get(handle.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: BlockHandle) -> Option<&mut Block> {
        self.slots.get_mut(handle.0 as usize)?.as_mut()
    }

    /// Like [`BlockTable::get`] but treats a dead handle as bookkeeping
    /// corruption and panics.
    pub fn block(&self, handle: BlockHandle) -> &Block {
        self.get(handle)
            .expect("block table: lookup of a dead block handle")
    }

    pub fn block_mut(&mut self, handle: BlockHandle) -> &mut Block {
        self.get_mut(handle)
            .expect("block table: lookup of a dead block handle")
    }

    /// Iterates the chain in order from the head.
    ///
    /// The iterator trusts the links; traversals that must survive a
    /// corrupted chain (the allocation scan, the integrity pass) bound their
    /// own step count instead.
    pub fn chain(&self) -> ChainIter<'_> {
        ChainIter {
            table: self,
            current: self.head,
        }
    }
}

pub(crate) struct ChainIter<'a> {
    table: &'a BlockTable,
    current: Option<BlockHandle>,
}

impl Iterator for ChainIter<'_> {
    type Item = BlockHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.current?;
        self.current = self.table.block(handle).next;
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BLOCK_CANARY, PageHandle};

    fn block(units: usize) -> Block {
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

    fn chain_units(table: &BlockTable) -> Vec<usize> {
        table.chain().map(|h| table.block(h).units).collect()
    }

    #[test]
    fn new_table_is_empty() {
        let table = BlockTable::new();

        assert_eq!(table.len(), 0);
        assert!(table.head().is_none());
        assert!(table.chain().next().is_none());
    }

    #[test]
    fn insert_head_prepends() {
        let mut table = BlockTable::new();

        table.insert_head(block(1));
        table.insert_head(block(2));
        table.insert_head(block(3));

        assert_eq!(chain_units(&table), vec![3, 2, 1]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn insert_after_links_both_sides() {
        let mut table = BlockTable::new();

        let tail = table.insert_head(block(1));
        let head = table.insert_head(block(3));
        // Chain is now [3, 1]; wedge a block in the middle.
        let middle = table.insert_after(head, block(2));

        assert_eq!(chain_units(&table), vec![3, 2, 1]);
        assert_eq!(table.block(middle).prev, Some(head));
        assert_eq!(table.block(middle).next, Some(tail));
        assert_eq!(table.block(tail).prev, Some(middle));
    }

    #[test]
    fn remove_splices_and_recycles_slots() {
        let mut table = BlockTable::new();

        let first = table.insert_head(block(1));
        let middle = table.insert_head(block(2));
        let last = table.insert_head(block(3));

        let removed = table.remove(middle);
        assert_eq!(removed.units, 2);
        assert_eq!(chain_units(&table), vec![3, 1]);
        assert_eq!(table.block(last).next, Some(first));
        assert_eq!(table.block(first).prev, Some(last));

        // The freed slot is handed back to the next insertion.
        let reused = table.insert_head(block(4));
        assert_eq!(reused, middle);
    }

    #[test]
    fn remove_head_moves_head_forward() {
        let mut table = BlockTable::new();

        let first = table.insert_head(block(1));
        let head = table.insert_head(block(2));

        table.remove(head);
        assert_eq!(table.head(), Some(first));
        assert!(table.block(first).prev.is_none());
    }

    #[test]
    #[should_panic(expected = "dead block handle")]
    fn dead_handle_lookup_panics() {
        let mut table = BlockTable::new();
        let handle = table.insert_head(block(1));
        table.remove(handle);
        table.block(handle);
    }
}
