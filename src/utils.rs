//! This file contains the helper functions shared by every container.
//! These are functions that don't particularly belong to any concrete module of the crate.

/// Alignment used when callers don't ask for anything specific. Matches the
/// strictest fundamental alignment on the platforms we target.
pub const DEFAULT_ALIGN: usize = 16;

/// It aligns `to_be_aligned` using `aligment`.
///
/// This is used to round OS requests up to a multiple of the page size.
/// `aligment` must be a power of two.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Bytes that must be skipped from `addr` so the next byte sits on an
/// `aligment` boundary. `aligment` must be a power of two.
#[inline]
pub fn padding_for(addr: usize, aligment: usize) -> usize {
    addr.wrapping_neg() & (aligment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn align_pointer_size() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, mem::size_of::<usize>()));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn padding_reaches_next_boundary() {
        assert_eq!(padding_for(0, 8), 0);
        assert_eq!(padding_for(1, 8), 7);
        assert_eq!(padding_for(7, 8), 1);
        assert_eq!(padding_for(8, 8), 0);
        assert_eq!(padding_for(13, 1), 0);
        for addr in 0..64 {
            assert_eq!((addr + padding_for(addr, 16)) % 16, 0);
        }
    }
}
