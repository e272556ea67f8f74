//! Double hashing (spec.md §4.7): derive `k` bit positions from two base
//! hashes instead of computing `k` independent hash functions
//! (Kirsch-Mitzenmacher).

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Rotates the filter's seed for the second base hash so `h1` and `h2` don't
/// collapse onto the same stream for any item (spec.md §4.7 `h2 = hash(item,
/// seed XOR rotate)`).
const SEED_ROTATE: u64 = 0x9e3779b97f4a7c15;

/// Returns the two base hashes used to generate every probe position for
/// `item` (`position_i = (h1 + i*h2) mod m`), both seeded from the filter's
/// configured `seed`.
pub fn base_hashes(item: &[u8], seed: u64) -> (u64, u64) {
    let mut h1 = XxHash64::with_seed(seed);
    h1.write(item);
    let mut h2 = XxHash64::with_seed(seed ^ SEED_ROTATE.rotate_left(1));
    h2.write(item);
    (h1.finish(), h2.finish())
}

/// Generates the `k` bit positions (each in `0..m`) for `item`.
pub fn positions(item: &[u8], seed: u64, hash_count: u32, m: u64) -> Vec<u64> {
    let (h1, h2) = base_hashes(item, seed);
    (0..hash_count as u64)
        .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_deterministic() {
        let a = positions(b"hello", 7, 7, 1_000_000);
        let b = positions(b"hello", 7, 7, 1_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn positions_stay_in_range() {
        let positions = positions(b"world", 3, 10, 257);
        assert!(positions.iter().all(|p| *p < 257));
    }

    #[test]
    fn different_items_usually_diverge() {
        let a = positions(b"alpha", 5, 5, 1_000_000);
        let b = positions(b"beta", 5, 5, 1_000_000);
        assert_ne!(a, b);
    }

    #[test]
    fn different_seeds_usually_diverge_for_same_item() {
        let a = positions(b"alpha", 1, 5, 1_000_000);
        let b = positions(b"alpha", 2, 5, 1_000_000);
        assert_ne!(a, b);
    }
}
