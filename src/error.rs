use thiserror::Error;

use crate::block::{BlockHandle, PageHandle};

/// Smallest allocation unit the pool accepts, in bytes. Anything finer and
/// the per-block header cost dominates the payload.
pub const MIN_UNIT_SIZE: usize = 16;

/// Recoverable construction and growth failures.
///
/// These are returned as values so the caller can retry with different
/// parameters or degrade gracefully. Corruption and misuse (double free,
/// broken chain linkage) are not in this enum: they mean the pool's own
/// bookkeeping is wrong and surface as panics instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The configured allocation unit is below [`MIN_UNIT_SIZE`].
    #[error("allocation unit size of {0} bytes is below the {MIN_UNIT_SIZE}-byte minimum")]
    UnitSizeTooSmall(usize),

    /// The host memory provider could not supply a page.
    #[error("host memory provider could not supply {0} bytes")]
    HostAllocFailed(usize),

    /// The host could not pin a freshly acquired page.
    #[error("could not pin {0} bytes of page memory")]
    PageLockFailed(usize),

    /// No free block could satisfy the request even after growth. Growth
    /// adds a spanning free block, so hitting this after a successful extend
    /// points at a sizing bug in the caller's configuration.
    #[error("no free block can satisfy a request for {0} units")]
    NoFreeBlock(usize),
}

/// First invariant found broken by [`Pool::verify`](crate::Pool::verify).
///
/// A pool that has reported any of these is poisoned: every further mutating
/// call panics rather than run on corrupted bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    /// The block chain revisited a node before covering the tracked count.
    #[error("block chain cycles back through {at:?}")]
    ChainCycle { at: BlockHandle },

    /// A chain link names a handle with no live block behind it.
    #[error("block {block:?} links to a dead handle")]
    DanglingLink { block: BlockHandle },

    /// A `prev` pointer disagrees with the `next` pointer that reaches it.
    #[error("chain links around {block:?} disagree")]
    ChainLink { block: BlockHandle },

    /// Chain units do not add up to the pool's total.
    #[error("chain holds {found} units but the pool tracks {expected}")]
    UnitTotal { expected: usize, found: usize },

    /// Chain length does not match the tracked block count.
    #[error("chain holds {found} blocks but the pool tracks {expected}")]
    BlockCount { expected: usize, found: usize },

    /// Two chain-adjacent blocks on one page are both free; coalescing is
    /// never deferred, so this cannot happen in a healthy pool.
    #[error("{first:?} and {second:?} are adjacent on one page and both free")]
    AdjacentFree {
        first: BlockHandle,
        second: BlockHandle,
    },

    /// A block's extent leaves its page, or same-page neighbours are not
    /// physically contiguous.
    #[error("block {block:?} does not fit the layout of its page")]
    BadExtent { block: BlockHandle },

    /// A page's block or used-block counter disagrees with the blocks
    /// actually found on it.
    #[error("page {page:?} counter mismatch: recorded {recorded}, chain shows {counted}")]
    PageCounters {
        page: PageHandle,
        recorded: usize,
        counted: usize,
    },

    /// An occupied cache slot does not resolve to a live free block whose
    /// recorded slot index points back at it.
    #[error("recency cache slot {slot} does not resolve to a free block")]
    CacheSlot { slot: u32 },

    /// A block's canary field was overwritten.
    #[error("canary clobbered on block {block:?}")]
    BlockCanary { block: BlockHandle },

    /// A page's canary field was overwritten.
    #[error("canary clobbered on page {page:?}")]
    PageCanary { page: PageHandle },
}
