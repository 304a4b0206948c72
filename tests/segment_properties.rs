//! Property tests for segment projection and copies
//!
//! These verify that segment requests are validated against the buffer
//! bounds and that valid requests describe exactly the requested bytes.

use proptest::prelude::*;
use slabpool::{PoolError, SlabPool};

const SLAB: usize = 256 * 1024;

prop_compose! {
    fn arb_contents()(bytes in prop::collection::vec(any::<u8>(), 0..2048)) -> Vec<u8> {
        bytes
    }
}

proptest! {
    /// Property: valid ranges describe `contents[offset..offset + len]`,
    /// invalid ranges fail with OutOfRange
    #[test]
    fn segments_match_contents(
        contents in arb_contents(),
        offset in 0usize..2100,
        len in 0usize..2100,
        pad in 0usize..512,
    ) {
        let pool = SlabPool::with_capacity(SLAB, 1, 1).unwrap();
        // Push the buffer away from offset 0 in its slab
        let _pad = pool.allocate(pad).unwrap();
        let size = contents.len();
        let buf = pool.allocate_filled(size, &contents).unwrap();

        let valid = offset + len <= size && (size == 0 || offset < size);
        match buf.segments_range(offset, len) {
            Ok(segments) => {
                prop_assert!(valid);
                prop_assert_eq!(segments.len(), 1);
                prop_assert_eq!(segments[0].len(), len);
                if size > 0 {
                    prop_assert_eq!(segments[0].as_slice(), &contents[offset..offset + len]);
                }
            }
            Err(err) => {
                prop_assert!(!valid);
                let is_out_of_range = matches!(err, PoolError::OutOfRange { .. });
                prop_assert!(is_out_of_range);
            }
        }
    }

    /// Property: a copy-in followed by a copy-out reproduces the source
    #[test]
    fn copy_round_trip(contents in arb_contents(), extra in 0usize..64) {
        let pool = SlabPool::with_capacity(SLAB, 1, 1).unwrap();
        let mut buf = pool.allocate(contents.len() + extra).unwrap();
        buf.copy_in(&contents).unwrap();

        let mut out = vec![0u8; contents.len()];
        buf.copy_out_range(&mut out, 0, contents.len()).unwrap();
        prop_assert_eq!(out, contents);
    }

    /// Property: buffers never share bytes while both are live
    #[test]
    fn live_buffers_are_disjoint(sizes in prop::collection::vec(1usize..4096, 1..32)) {
        let pool = SlabPool::with_capacity(SLAB, 1, 1).unwrap();
        let buffers: Vec<_> = sizes.iter().map(|&size| pool.allocate(size).unwrap()).collect();

        let mut ranges: Vec<_> = buffers
            .iter()
            .map(|buf| {
                let segments = buf.segments().unwrap();
                (segments[0].slab_id(), segments[0].range())
            })
            .collect();
        ranges.sort_by_key(|(slab, range)| (*slab, range.start));

        for pair in ranges.windows(2) {
            let (slab_a, a) = &pair[0];
            let (slab_b, b) = &pair[1];
            prop_assert!(slab_a != slab_b || a.end <= b.start);
        }
    }
}
