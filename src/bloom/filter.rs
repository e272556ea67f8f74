//! Sharded Bloom filter (spec.md §4.7).

use crate::bloom::config::{BloomConfig, FilterName};
use crate::bloom::hash::{base_hashes, positions};
use crate::bloom::shard::BloomShard;

pub struct BloomFilter {
    name: FilterName,
    config: BloomConfig,
    shards: Vec<BloomShard>,
}

impl BloomFilter {
    pub fn new(name: FilterName, config: BloomConfig) -> Self {
        let bits_per_shard = config.bits_per_shard();
        let shards = (0..config.shard_count)
            .map(|_| BloomShard::new(bits_per_shard))
            .collect();
        Self { name, config, shards }
    }

    pub(crate) fn from_shards(name: FilterName, config: BloomConfig, shards: Vec<BloomShard>) -> Self {
        Self { name, config, shards }
    }

    pub fn name(&self) -> &FilterName {
        &self.name
    }

    pub fn config(&self) -> &BloomConfig {
        &self.config
    }

    pub(crate) fn shards(&self) -> &[BloomShard] {
        &self.shards
    }

    /// Routes `item` to one shard via its first base hash, then sets its `k`
    /// bit positions within that shard.
    pub fn insert(&self, item: &[u8]) {
        let shard = &self.shards[self.shard_index(item)];
        for position in positions(item, self.config.hash_seed, self.config.hash_count(), shard.bit_len()) {
            shard.set(position);
        }
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        let shard = &self.shards[self.shard_index(item)];
        positions(item, self.config.hash_seed, self.config.hash_count(), shard.bit_len())
            .into_iter()
            .all(|position| shard.get(position))
    }

    fn shard_index(&self, item: &[u8]) -> usize {
        let (h1, _) = base_hashes(item, self.config.hash_seed);
        (h1 % self.shards.len() as u64) as usize
    }

    /// Fraction of set bits across all shards, a proxy for saturation that
    /// drives `AutoSeeder` re-seed decisions.
    pub fn fill_ratio(&self) -> f64 {
        let total_bits: u64 = self.shards.iter().map(|s| s.bit_len()).sum();
        let set_bits: u64 = self.shards.iter().map(|s| s.popcount()).sum();
        if total_bits == 0 {
            0.0
        } else {
            set_bits as f64 / total_bits as f64
        }
    }

    /// True once any shard has bits set since its last [`BloomShard::clear_dirty`]
    /// (spec.md §4.7 "Save flow" dirty-flag invariant).
    pub fn is_dirty(&self) -> bool {
        self.shards.iter().any(|s| s.is_dirty())
    }

    pub(crate) fn clear_all_dirty(&self) {
        for shard in &self.shards {
            shard.clear_dirty();
        }
    }

    pub fn stats(&self) -> BloomFilterStats {
        BloomFilterStats {
            shard_count: self.shards.len(),
            total_bits: self.shards.iter().map(|s| s.bit_len()).sum(),
            set_bits: self.shards.iter().map(|s| s.popcount()).sum(),
            hash_count: self.config.hash_count(),
        }
    }
}

/// Observability snapshot (SPEC_FULL §B, grounded in the teacher's
/// `index/simd_bloom.rs` stats struct).
#[derive(Debug, Clone, Copy)]
pub struct BloomFilterStats {
    pub shard_count: usize,
    pub total_bits: u64,
    pub set_bits: u64,
    pub hash_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> BloomFilter {
        let config = BloomConfig::new(1000, 0.01, 4).unwrap();
        BloomFilter::new(FilterName::new("test").unwrap(), config)
    }

    #[test]
    fn contains_after_insert() {
        let filter = filter();
        filter.insert(b"alpha");
        assert!(filter.contains(b"alpha"));
    }

    #[test]
    fn never_false_negative() {
        let filter = filter();
        for i in 0..200u32 {
            filter.insert(&i.to_le_bytes());
        }
        for i in 0..200u32 {
            assert!(filter.contains(&i.to_le_bytes()));
        }
    }

    #[test]
    fn likely_absent_for_unrelated_item() {
        let filter = filter();
        filter.insert(b"present");
        assert!(!filter.contains(b"definitely-not-present-xyz"));
    }

    #[test]
    fn fill_ratio_increases_with_inserts() {
        let filter = filter();
        let before = filter.fill_ratio();
        for i in 0..50u32 {
            filter.insert(&i.to_le_bytes());
        }
        assert!(filter.fill_ratio() > before);
    }
}
