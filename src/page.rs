use std::ptr::NonNull;

use crate::block::PageHandle;

/// Sentinel written into every page record when canaries are enabled.
pub(crate) const PAGE_CANARY: u32 = 0x9A6E_AA55;

/// One contiguous memory region obtained from the host provider.
///
/// The host hands out whole pages and takes whole pages back; blocks only
/// ever subdivide a page, never span two of them. Because pages from the
/// host are not adjacent, the pool-wide block chain is the only structure
/// that ties them together:
///
/// ```text
/// +----------------------------------------------+      +----------------------------------------------+
/// |        | +-------+    +-------+    +-------+ |      |        | +-------+    +-------+    +-------+ |
/// |  Page  | | Block | -> | Block | -> | Block | | ---> |  Page  | | Block | -> | Block | -> | Block | |
/// |        | +-------+    +-------+    +-------+ |      |        | +-------+    +-------+    +-------+ |
/// +----------------------------------------------+      +----------------------------------------------+
/// ```
///
/// A page is created by `create`/`extend` and destroyed exactly when its
/// used-block counter returns to zero.
pub(crate) struct Page {
    /// Base address of the region, as returned by the host.
    pub base: NonNull<u8>,
    /// Capacity of the page, in units.
    pub units: usize,
    /// Byte size requested from the host for this page.
    pub bytes: usize,
    /// How many blocks currently subdivide the page.
    pub blocks: usize,
    /// How many of those blocks are in use.
    pub used_blocks: usize,
    /// Corruption canary, checked by the integrity pass when enabled.
    pub canary: u32,
}

/// Slot-indexed storage for pages, addressed by [`PageHandle`].
pub(crate) struct PageTable {
    slots: Vec<Option<Page>>,
    free_slots: Vec<u32>,
    len: usize,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn insert(&mut self, page: Page) -> PageHandle {
        self.len += 1;

        if let Some(slot) = self.free_slots.pop() {
            self.slots[slot as usize] = Some(page);
            return PageHandle(slot);
        }

        self.slots.push(Some(page));
        PageHandle((self.slots.len() - 1) as u32)
    }

    pub fn remove(&mut self, handle: PageHandle) -> Page {
        let page = self.slots[handle.0 as usize]
            .take()
            .expect("page table: remove of a dead page handle");

        self.free_slots.push(handle.0);
        self.len -= 1;

        page
    }

    pub fn get(&self, handle: PageHandle) -> Option<&Page> {
        self.slots.get(handle.0 as usize)?.as_ref()
    }

    /// Like [`PageTable::get`] but treats a dead handle as bookkeeping
    /// corruption and panics.
    pub fn page(&self, handle: PageHandle) -> &Page {
        self.get(handle)
            .expect("page table: lookup of a dead page handle")
    }

    pub fn page_mut(&mut self, handle: PageHandle) -> &mut Page {
        self.slots
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .expect("page table: lookup of a dead page handle")
    }

    pub fn iter(&self) -> impl Iterator<Item = (PageHandle, &Page)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|page| (PageHandle(index as u32), page)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(units: usize) -> Page {
        Page {
            base: NonNull::dangling(),
            units,
            bytes: units * 64,
            blocks: 1,
            used_blocks: 0,
            canary: PAGE_CANARY,
        }
    }

    #[test]
    fn slots_are_reused_after_removal() {
        let mut table = PageTable::new();

        let first = table.insert(page(8));
        let second = table.insert(page(16));
        assert_eq!(table.len(), 2);

        table.remove(first);
        assert!(table.get(first).is_none());

        let third = table.insert(page(32));
        assert_eq!(third, first); // freed slot comes back first
        assert_eq!(table.page(third).units, 32);
        assert_eq!(table.page(second).units, 16);
    }

    #[test]
    #[should_panic(expected = "dead page handle")]
    fn dead_handle_lookup_panics() {
        let mut table = PageTable::new();
        let handle = table.insert(page(8));
        table.remove(handle);
        table.page(handle);
    }
}
