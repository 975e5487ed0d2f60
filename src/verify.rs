use std::collections::HashMap;

use tracing::error;

use crate::{
    block::BLOCK_CANARY,
    error::Violation,
    host::HostMemory,
    page::PAGE_CANARY,
    pool::Pool,
};

impl<H: HostMemory> Pool<H> {
    /// Exhaustive consistency pass over the whole pool.
    ///
    /// Walks the block chain once and checks every structural invariant:
    /// unit totals, block counts, deferred-coalescing absence, page
    /// counters, extent bounds, cache slot resolution, cycle freedom, and
    /// canary integrity when enabled. Meant for debug builds and
    /// property-style tests, not the allocation hot path.
    ///
    /// Returns the first violated invariant. A pool that has reported a
    /// violation is poisoned: every further `allocate`/`free`/`extend`
    /// panics, since running on corrupted bookkeeping can only make the
    /// damage harder to diagnose.
    pub fn verify(&mut self) -> Result<(), Violation> {
        let result = self.check_invariants();

        if let Err(violation) = result {
            self.poisoned = true;
            error!(tag = self.owner_tag(), %violation, "pool verification failed");
        }

        result
    }

    fn check_invariants(&self) -> Result<(), Violation> {
        let mut visited = vec![false; self.blocks.slot_count()];
        let mut chain_units = 0;
        let mut chain_blocks = 0;
        // Per page: (blocks seen, used blocks seen).
        let mut per_page: HashMap<u32, (usize, usize)> = HashMap::new();

        if let Some(head) = self.blocks.head() {
            let at_head = self
                .blocks
                .get(head)
                .ok_or(Violation::DanglingLink { block: head })?;
            if at_head.prev.is_some() {
                return Err(Violation::ChainLink { block: head });
            }
        }

        let mut current = self.blocks.head();
        while let Some(handle) = current {
            let index = handle.0 as usize;
            if index >= visited.len() {
                return Err(Violation::DanglingLink { block: handle });
            }
            if visited[index] {
                return Err(Violation::ChainCycle { at: handle });
            }
            visited[index] = true;

            let block = self
                .blocks
                .get(handle)
                .ok_or(Violation::DanglingLink { block: handle })?;

            chain_units += block.units;
            chain_blocks += 1;

            if self.canaries && block.canary != BLOCK_CANARY {
                return Err(Violation::BlockCanary { block: handle });
            }

            let page = self
                .pages
                .get(block.page)
                .ok_or(Violation::BadExtent { block: handle })?;
            if block.offset + block.units > page.units {
                return Err(Violation::BadExtent { block: handle });
            }

            let counters = per_page.entry(block.page.0).or_insert((0, 0));
            counters.0 += 1;
            if block.used {
                counters.1 += 1;
            }

            // A block that claims a cache slot must be free and the slot
            // must point straight back at it.
            if let Some(slot) = block.cache_slot {
                let resolves =
                    self.cache.slots().get(slot as usize).copied().flatten() == Some(handle);
                if block.used || !resolves {
                    return Err(Violation::CacheSlot { slot });
                }
            }

            if let Some(next) = block.next {
                let after = self
                    .blocks
                    .get(next)
                    .ok_or(Violation::DanglingLink { block: handle })?;
                if after.prev != Some(handle) {
                    return Err(Violation::ChainLink { block: next });
                }
                if after.page == block.page {
                    if !block.used && !after.used {
                        return Err(Violation::AdjacentFree {
                            first: handle,
                            second: next,
                        });
                    }
                    if after.offset != block.offset + block.units {
                        return Err(Violation::BadExtent { block: next });
                    }
                }
            }

            current = block.next;
        }

        if chain_units != self.total_units {
            return Err(Violation::UnitTotal {
                expected: self.total_units,
                found: chain_units,
            });
        }
        if chain_blocks != self.blocks.len() {
            return Err(Violation::BlockCount {
                expected: self.blocks.len(),
                found: chain_blocks,
            });
        }

        for (handle, page) in self.pages.iter() {
            if self.canaries && page.canary != PAGE_CANARY {
                return Err(Violation::PageCanary { page: handle });
            }

            let (blocks, used) = per_page.get(&handle.0).copied().unwrap_or((0, 0));
            if page.blocks != blocks {
                return Err(Violation::PageCounters {
                    page: handle,
                    recorded: page.blocks,
                    counted: blocks,
                });
            }
            if page.used_blocks != used {
                return Err(Violation::PageCounters {
                    page: handle,
                    recorded: page.used_blocks,
                    counted: used,
                });
            }
        }

        // Every occupied cache slot must resolve to a free block that the
        // traversal actually saw.
        for (slot, entry) in self.cache.slots().iter().enumerate() {
            let Some(handle) = *entry else {
                continue;
            };

            let seen = visited.get(handle.0 as usize).copied().unwrap_or(false);
            let healthy = seen
                && self
                    .blocks
                    .get(handle)
                    .is_some_and(|block| !block.used && block.cache_slot == Some(slot as u32));

            if !healthy {
                return Err(Violation::CacheSlot { slot: slot as u32 });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{host::testing::TestHost, pool::PoolConfig};

    fn pool() -> Pool<TestHost> {
        let cfg = PoolConfig {
            start_units: 32,
            chunk_units: 8,
            unit_size: 64,
            cache_slots: 8,
            cache_radius: 4,
            tag: "verify-pool",
            lock_pages: false,
            canaries: true,
        };
        Pool::create(cfg, TestHost::new().0).unwrap()
    }

    #[test]
    fn fresh_pool_verifies_clean() {
        let mut pool = pool();
        pool.verify().unwrap();
    }

    #[test]
    fn tampered_unit_total_is_reported() {
        let mut pool = pool();
        pool.total_units += 3;

        assert_eq!(
            pool.verify(),
            Err(Violation::UnitTotal {
                expected: 35,
                found: 32
            })
        );
        assert!(pool.poisoned);
    }

    #[test]
    fn clobbered_block_canary_is_reported() {
        let mut pool = pool();
        let handle = pool.blocks.head().unwrap();
        pool.blocks.block_mut(handle).canary = 0;

        assert_eq!(pool.verify(), Err(Violation::BlockCanary { block: handle }));
    }

    #[test]
    fn fake_free_flag_shows_up_as_adjacent_free() {
        let mut pool = pool();
        let first = pool.allocate(None, 200, "a").unwrap();
        let second = pool.allocate(None, 200, "b").unwrap();

        pool.free(first);
        // Clear the used flag behind the release engine's back: two free
        // same-page neighbours should never survive a free.
        pool.blocks.block_mut(second).used = false;

        assert_eq!(
            pool.verify(),
            Err(Violation::AdjacentFree {
                first,
                second
            })
        );
    }

    #[test]
    fn drifted_page_counter_is_reported() {
        let mut pool = pool();
        let _keep = pool.allocate(None, 200, "keep").unwrap();

        let page = pool.pages.iter().next().unwrap().0;
        pool.pages.page_mut(page).used_blocks += 1;

        assert_eq!(
            pool.verify(),
            Err(Violation::PageCounters {
                page,
                recorded: 2,
                counted: 1
            })
        );
    }

    #[test]
    fn stale_cache_back_pointer_is_reported() {
        let mut pool = pool();
        let handle = pool.allocate(None, 200, "cached?").unwrap();

        // A used block must never claim a cache slot.
        pool.blocks.block_mut(handle).cache_slot = Some(0);

        assert_eq!(pool.verify(), Err(Violation::CacheSlot { slot: 0 }));
    }

    #[test]
    fn severed_prev_link_is_reported() {
        let mut pool = pool();
        let first = pool.allocate(None, 200, "a").unwrap();
        let _second = pool.allocate(None, 200, "b").unwrap();

        let next = pool.blocks.block(first).next.unwrap();
        pool.blocks.block_mut(next).prev = None;

        assert_eq!(pool.verify(), Err(Violation::ChainLink { block: next }));
    }
}
