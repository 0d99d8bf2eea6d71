//! Property-based tests for chain work arithmetic
//!
//! These tests check the algebraic laws best-chain selection relies on.

use super::*;
use num_bigint::BigUint;
use proptest::prelude::*;

fn bounded_work() -> impl Strategy<Value = ChainWork> {
    // Keep the top byte clear so two operands can never carry out of 256 bits
    prop::array::uniform32(any::<u8>()).prop_map(|mut bytes| {
        bytes[0] = 0;
        ChainWork::from_array(bytes)
    })
}

proptest! {
    #[test]
    fn chain_work_byte_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
        let work = ChainWork::from_bytes(&bytes).unwrap();
        prop_assert_eq!(work.to_bytes(), bytes);
    }

    #[test]
    fn chain_work_rejects_other_lengths(bytes in prop::collection::vec(any::<u8>(), 0..64usize)) {
        prop_assume!(bytes.len() != 32);
        prop_assert!(ChainWork::from_bytes(&bytes).is_none());
    }

    #[test]
    fn addition_never_decreases_work(a in bounded_work(), b in bounded_work()) {
        let sum = a + b;
        prop_assert!(sum >= a);
        prop_assert!(sum >= b);
    }

    #[test]
    fn addition_matches_big_integer_modulo_2_256(
        a in prop::array::uniform32(any::<u8>()),
        b in prop::array::uniform32(any::<u8>()),
    ) {
        let a = ChainWork::from_array(a);
        let b = ChainWork::from_array(b);
        let modulus = BigUint::from(1u32) << 256usize;
        let expected = (a.to_biguint() + b.to_biguint()) % modulus;
        prop_assert_eq!((a + b).to_biguint(), expected);
    }

    #[test]
    fn ordering_matches_big_integer(
        a in prop::array::uniform32(any::<u8>()),
        b in prop::array::uniform32(any::<u8>()),
    ) {
        let a = ChainWork::from_array(a);
        let b = ChainWork::from_array(b);
        prop_assert_eq!(a.cmp(&b), a.to_biguint().cmp(&b.to_biguint()));
    }

    #[test]
    fn addition_is_commutative(a in bounded_work(), b in bounded_work()) {
        prop_assert_eq!(a + b, b + a);
    }
}
