use std::mem;

/// Handle to a [`Block`] slot inside the pool's block table.
///
/// Handles replace the raw header pointers a classic in-band allocator would
/// use: the chain links and the recency cache all speak in terms of these
/// indices, so stale references can never dangle into freed memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockHandle(pub(crate) u32);

/// Handle to a [`Page`](crate::page::Page) slot inside the pool's page table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageHandle(pub(crate) u32);

/// Byte cost charged to every allocation for its header.
///
/// The header itself lives out-of-line in the block table, but unit
/// accounting still reserves its size per block so the arithmetic matches the
/// embedded-header layout this pool models.
pub const BLOCK_HEADER_SIZE: usize = mem::size_of::<Block>();

/// Sentinel written into every block header when canaries are enabled.
pub(crate) const BLOCK_CANARY: u32 = 0xB10C_AA55;

/// This is the metadata of one block. In an embedded-header design these
/// fields would sit directly in front of the payload bytes:
///
/// ```text
/// +---------------------+ <------+
/// |     used / tag      |        |
/// +---------------------+        |
/// |    page / offset    |        | -> Header (kept in the block table)
/// +---------------------+        |
/// |  units / links ...  |        |
/// +---------------------+ <------+
/// |       Payload       |        |
/// |         ...         |        | -> Addressable content (in the page)
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// Here the header lives in the table and only the payload occupies page
/// memory. A block's extent is `units * unit_size` bytes starting at
/// `offset * unit_size` from its page base.
pub(crate) struct Block {
    /// Whether the block currently backs a live allocation.
    pub used: bool,
    /// Diagnostic owner label. Never consulted for correctness.
    pub tag: &'static str,
    /// Page which the block belongs to.
    pub page: PageHandle,
    /// Distance from the page base, in units.
    pub offset: usize,
    /// Size of the block, in units.
    pub units: usize,
    /// Slot this block occupies in the recency cache, if any.
    pub cache_slot: Option<u32>,
    /// Next block in the pool-wide chain.
    pub next: Option<BlockHandle>,
    /// Previous block in the pool-wide chain.
    pub prev: Option<BlockHandle>,
    /// Corruption canary, checked by the integrity pass when enabled.
    pub canary: u32,
}
