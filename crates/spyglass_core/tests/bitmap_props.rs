//! Property tests for the bitmap layer against a naive model.

use proptest::prelude::*;
use spyglass_core::bitmap::EwahBitmap;
use spyglass_core::codec::ByteReader;

fn build(bits: &[bool]) -> EwahBitmap {
    let mut bm = EwahBitmap::new();
    for &bit in bits {
        bm.append_bit(bit);
    }
    bm
}

fn model_positions(bits: &[bool]) -> Vec<u64> {
    bits.iter()
        .enumerate()
        .filter_map(|(i, &b)| b.then_some(i as u64))
        .collect()
}

proptest! {
    #[test]
    fn ones_match_the_model(bits in proptest::collection::vec(any::<bool>(), 0..512)) {
        let bm = build(&bits);
        prop_assert_eq!(bm.len(), bits.len() as u64);
        prop_assert_eq!(bm.ones().collect::<Vec<_>>(), model_positions(&bits));
    }

    #[test]
    fn serialization_round_trips_bit_for_bit(
        bits in proptest::collection::vec(any::<bool>(), 0..512),
        runs in proptest::collection::vec((any::<bool>(), 0u64..200), 0..8),
    ) {
        let mut bm = build(&bits);
        for (bit, n) in runs {
            bm.append_bits(bit, n);
        }
        let mut buf = Vec::new();
        bm.encode(&mut buf);
        let decoded = EwahBitmap::decode(&mut ByteReader::new(&buf)).unwrap();
        prop_assert_eq!(&decoded, &bm);
        let mut again = Vec::new();
        decoded.encode(&mut again);
        prop_assert_eq!(again, buf);
    }

    #[test]
    fn boolean_algebra_matches_the_model(
        a in proptest::collection::vec(any::<bool>(), 0..300),
        b in proptest::collection::vec(any::<bool>(), 0..300),
    ) {
        let (x, y) = (build(&a), build(&b));
        let len = a.len().max(b.len());
        let at = |v: &[bool], i: usize| v.get(i).copied().unwrap_or(false);
        let expect = |f: fn(bool, bool) -> bool| -> Vec<u64> {
            (0..len)
                .filter_map(|i| f(at(&a, i), at(&b, i)).then_some(i as u64))
                .collect()
        };
        prop_assert_eq!((&x & &y).ones().collect::<Vec<_>>(), expect(|p, q| p && q));
        prop_assert_eq!((&x | &y).ones().collect::<Vec<_>>(), expect(|p, q| p || q));
        prop_assert_eq!((&x ^ &y).ones().collect::<Vec<_>>(), expect(|p, q| p != q));
        prop_assert_eq!((&x - &y).ones().collect::<Vec<_>>(), expect(|p, q| p && !q));
        let flipped: Vec<u64> = (0..a.len())
            .filter_map(|i| (!at(&a, i)).then_some(i as u64))
            .collect();
        prop_assert_eq!((!&x).ones().collect::<Vec<_>>(), flipped);
    }

    #[test]
    fn append_bits_equals_repeated_append_bit(
        prefix in proptest::collection::vec(any::<bool>(), 0..100),
        bit in any::<bool>(),
        n in 0u64..300,
    ) {
        let mut bulk = build(&prefix);
        bulk.append_bits(bit, n);
        let mut single = build(&prefix);
        for _ in 0..n {
            single.append_bit(bit);
        }
        prop_assert_eq!(bulk, single);
    }
}
