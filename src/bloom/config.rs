//! Filter naming and sizing (spec.md §4.7).

use crate::error::{Error, Result};

/// A validated filter identifier: non-empty, ASCII alphanumeric plus
/// `-`/`_`/`.`, used as the persistence file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterName(String);

impl FilterName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > 128 {
            return Err(Error::InvalidArgument(
                "filter name must be 1-128 characters".into(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::InvalidArgument(
                "filter name must be ASCII alphanumeric, '-', '_', or '.'".into(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FilterName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sizing and sharding parameters for one named filter (spec.md §4.7
/// "parameter derivation").
#[derive(Debug, Clone, Copy)]
pub struct BloomConfig {
    /// Expected number of distinct items.
    pub expected_items: u64,
    /// Target false-positive probability, e.g. `0.01`.
    pub false_positive_rate: f64,
    /// Number of independent shards, each with its own lock.
    pub shard_count: usize,
    /// Seeds every hash derived for this filter (spec.md §3 "BloomShard
    /// hashSeed", §4.7 "hashing"). Fixed at construction and carried in the
    /// persistence header's `configFingerprint` so a reseeded filter never
    /// reuses stale bit positions under a different seed.
    pub hash_seed: u64,
}

impl BloomConfig {
    pub fn new(expected_items: u64, false_positive_rate: f64, shard_count: usize) -> Result<Self> {
        Self::with_seed(expected_items, false_positive_rate, shard_count, fastrand::u64(..))
    }

    /// Same as [`Self::new`] but with an explicit seed, for deterministic
    /// tests and for restoring a filter whose seed must match its on-disk
    /// bits.
    pub fn with_seed(
        expected_items: u64,
        false_positive_rate: f64,
        shard_count: usize,
        hash_seed: u64,
    ) -> Result<Self> {
        if expected_items == 0 {
            return Err(Error::InvalidArgument("expected_items must be nonzero".into()));
        }
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(Error::InvalidArgument(
                "false_positive_rate must be in (0, 1)".into(),
            ));
        }
        if shard_count == 0 {
            return Err(Error::InvalidArgument("shard_count must be nonzero".into()));
        }
        Ok(Self { expected_items, false_positive_rate, shard_count, hash_seed })
    }

    /// `m = ceil(-n * ln(p) / (ln 2)^2)` total bits across all shards.
    pub fn total_bits(&self) -> u64 {
        let n = self.expected_items as f64;
        let p = self.false_positive_rate;
        (-n * p.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64
    }

    /// `k = ceil((m/n) * ln 2)` hash functions.
    pub fn hash_count(&self) -> u32 {
        let m = self.total_bits() as f64;
        let n = self.expected_items as f64;
        ((m / n) * std::f64::consts::LN_2).ceil() as u32
    }

    pub fn bits_per_shard(&self) -> u64 {
        self.total_bits().div_ceil(self.shard_count as u64)
    }

    /// Fingerprint of the parameters that determined this layout, stored in
    /// the persistence header so a loader can detect a config change that
    /// would make the on-disk bits meaningless (spec.md §4.7
    /// "configFingerprint").
    pub fn fingerprint(&self) -> u64 {
        use std::hash::Hasher;
        let mut hasher = twox_hash::XxHash64::with_seed(0);
        hasher.write_u64(self.expected_items);
        hasher.write_u64(self.false_positive_rate.to_bits());
        hasher.write_u64(self.shard_count as u64);
        hasher.write_u64(self.bits_per_shard());
        hasher.write_u32(self.hash_count());
        hasher.write_u64(self.hash_seed);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_names() {
        assert!(FilterName::new("").is_err());
        assert!(FilterName::new("has space").is_err());
        assert!(FilterName::new("valid-name_1.0").is_ok());
    }

    #[test]
    fn derives_reasonable_parameters_for_one_percent_fpr() {
        let config = BloomConfig::new(1_000_000, 0.01, 16).unwrap();
        // Standard reference values for n=1e6, p=0.01: m ~ 9,585,058, k ~ 7.
        assert!(config.total_bits() > 9_500_000 && config.total_bits() < 9_700_000);
        assert_eq!(config.hash_count(), 7);
    }

    #[test]
    fn fingerprint_changes_with_parameters() {
        let a = BloomConfig::new(1000, 0.01, 4).unwrap();
        let b = BloomConfig::new(2000, 0.01, 4).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
