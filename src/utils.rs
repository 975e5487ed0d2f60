//! Helper arithmetic shared across the allocator.
//! These functions don't particularly belong to any concrete module of the pool.

use crate::block::BLOCK_HEADER_SIZE;

/// Converts a request of `bytes` into a size in allocation units.
///
/// Every block reserves room for its header cost on top of the payload, and
/// the result is always at least one unit larger than the exact quotient so
/// a request never receives less space than it asked for.
pub fn units_for(bytes: usize, unit_size: usize) -> usize {
    (bytes + BLOCK_HEADER_SIZE) / unit_size + 1
}

/// It aligns `to_be_aligned` upward using `alignment` (a power of two).
///
/// This is used to round page requests up to a multiple of the operating
/// system's page size before they reach the host memory provider.
pub fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let alignments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn unit_conversion_floors_then_adds_one() {
        let unit = 64;

        // One byte still needs the header plus the extra unit.
        assert_eq!(units_for(1, unit), (1 + BLOCK_HEADER_SIZE) / unit + 1);

        // An exact multiple of the unit size lands on the floor boundary.
        let bytes = 4 * unit - BLOCK_HEADER_SIZE;
        assert_eq!(units_for(bytes, unit), 5);
    }

    #[test]
    fn unit_conversion_is_monotonic() {
        let unit = 64;
        let mut last = 0;

        for bytes in 0..2048 {
            let units = units_for(bytes, unit);
            assert!(units >= last);
            last = units;
        }
    }
}
