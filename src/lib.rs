//! Unit-granular memory pool allocator.
//!
//! The pool is the low-level memory provider for a language runtime: callers
//! request bytes, the pool hands back block handles carved from pages it
//! obtained from a [`HostMemory`] provider. All sizes are tracked as counts
//! of fixed-size *allocation units* rather than raw bytes, which bounds the
//! header overhead and keeps the split/coalesce arithmetic simple.
//!
//! Every block lives in one pool-wide chain ordered across all pages:
//!
//! ```text
//!                                     Recency cache
//!
//!                      recently freed                recently freed
//!                +----------------------+  +-------------------------------------+
//!                |                      |  |                                     |
//! +--------------|----------------------|--|----+      +-------------------------|------------------+
//! |        | +---|--+    +------+    +--|--|-+  |      |        | +------+    +--|---+    +------+  |
//! |  Page  | | Free | -> | Used | -> |  Free |  | ---> |  Page  | | Used | -> | Free | -> | Used |  |
//! |        | +------+    +------+    +-------+  |      |        | +------+    +------+    +------+  |
//! +---------------------------------------------+      +--------------------------------------------+
//! ```
//!
//! Allocation reuses a recently freed block when the bounded cache holds a
//! fit, falls back to a first-fit chain scan, and grows the arena by one
//! chunk when nothing fits. Freeing coalesces eagerly with free same-page
//! neighbours and returns fully emptied pages to the host.
//!
//! Unlike a classic in-band allocator, block and page headers are not
//! overlaid on the arena bytes: bookkeeping lives in slot-indexed tables
//! addressed by handles, and page memory holds payloads only. Raw pointers
//! appear solely at the payload access boundary.
//!
//! The pool is single-threaded by design. One pool per interpreter context;
//! "locking" in this crate always means pinning pages against swapping,
//! never mutual exclusion.
//!
//! # Example
//!
//! ```no_run
//! use unitpool::{Pool, PoolConfig, SystemHost};
//!
//! let mut pool = Pool::create(PoolConfig::default(), SystemHost::new())?;
//!
//! let block = pool.allocate(None, 256, "scratch")?;
//! pool.payload_mut(block)[0] = 42;
//!
//! // Reallocate in place or by relocation, then release.
//! let block = pool.allocate(Some(block), 512, "scratch")?;
//! pool.free(block);
//! # Ok::<(), unitpool::PoolError>(())
//! ```
//!
//! In debug-oriented setups, [`Pool::verify`] walks the whole pool and
//! reports the first broken invariant; a pool that has failed verification
//! refuses any further mutation.

mod block;
mod cache;
mod chain;
mod error;
mod host;
mod page;
mod pool;
mod utils;
mod verify;

pub use block::{BLOCK_HEADER_SIZE, BlockHandle, PageHandle};
pub use error::{MIN_UNIT_SIZE, PoolError, Violation};
pub use host::{HostMemory, SystemHost};
pub use pool::{Pool, PoolConfig};
pub use utils::units_for;
