//! On-disk snapshot format and auto-reseed path (spec.md §4.7 "persistence
//! header", "AutoSeeder").

use std::hash::Hasher;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::bloom::config::{BloomConfig, FilterName};
use crate::bloom::filter::BloomFilter;
use crate::bloom::shard::BloomShard;
use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"WBF1";
const FORMAT_VERSION: u32 = 1;

/// Reads and writes the raw bytes for a named filter's snapshot. Kept
/// separate from the on-disk layout so embedders can swap a filesystem
/// implementation for object storage without touching the header format.
#[async_trait]
pub trait BloomStorageProvider: Send + Sync {
    async fn load(&self, name: &FilterName) -> Result<Option<Vec<u8>>>;
    async fn save(&self, name: &FilterName, bytes: &[u8]) -> Result<()>;
}

/// Filesystem-backed provider storing one file per filter under a root
/// directory.
pub struct FilesystemBloomStorage {
    root: std::path::PathBuf,
}

impl FilesystemBloomStorage {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &FilterName) -> std::path::PathBuf {
        self.root.join(format!("{name}.wbf"))
    }
}

#[async_trait]
impl BloomStorageProvider for FilesystemBloomStorage {
    async fn load(&self, name: &FilterName) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, name: &FilterName, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(name);
        let tmp_path = path.with_extension("wbf.tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

/// Serializes `filter` as:
/// `[magic="WBF1"|version:u32|checksum:u64|sizeInBits:u64|hashCount:u32|configFingerprint:u64|bits...]`
pub fn encode(filter: &BloomFilter) -> Vec<u8> {
    let bits_per_shard = filter.config().bits_per_shard();
    let mut body = Vec::new();
    body.extend_from_slice(&bits_per_shard.to_le_bytes());
    body.extend_from_slice(&filter.config().hash_count().to_le_bytes());
    body.extend_from_slice(&filter.config().fingerprint().to_le_bytes());
    body.extend_from_slice(&(filter.shards().len() as u64).to_le_bytes());
    for shard in filter.shards() {
        let words = shard.snapshot_words();
        body.extend_from_slice(&(words.len() as u64).to_le_bytes());
        for word in words {
            body.extend_from_slice(&word.to_le_bytes());
        }
    }

    let checksum = checksum_of(&body);
    let mut out = Vec::with_capacity(4 + 4 + 8 + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Parses a snapshot written by [`encode`], validating magic, checksum, and
/// that `expected_config`'s fingerprint still matches what produced the
/// stored bits.
pub fn decode(
    name: FilterName,
    expected_config: BloomConfig,
    bytes: &[u8],
) -> Result<BloomFilter> {
    if bytes.len() < 4 + 4 + 8 {
        return Err(Error::Corruption("bloom snapshot truncated".into()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(Error::Corruption("bloom snapshot bad magic".into()));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(Error::Corruption(format!(
            "unsupported bloom snapshot version {version}"
        )));
    }
    let stored_checksum = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let body = &bytes[16..];
    if checksum_of(body) != stored_checksum {
        return Err(Error::Corruption("bloom snapshot checksum mismatch".into()));
    }

    let mut cursor = 0usize;
    let bits_per_shard = read_u64(body, &mut cursor)?;
    let hash_count = read_u32(body, &mut cursor)?;
    let config_fingerprint = read_u64(body, &mut cursor)?;
    let shard_count = read_u64(body, &mut cursor)? as usize;

    if config_fingerprint != expected_config.fingerprint() {
        return Err(Error::Conflict(
            "bloom snapshot config fingerprint does not match current configuration".into(),
        ));
    }
    if hash_count != expected_config.hash_count() || bits_per_shard != expected_config.bits_per_shard() {
        return Err(Error::Conflict(
            "bloom snapshot layout does not match current configuration".into(),
        ));
    }

    let mut shards = Vec::with_capacity(shard_count);
    for _ in 0..shard_count {
        let word_count = read_u64(body, &mut cursor)? as usize;
        let mut words = Vec::with_capacity(word_count);
        for _ in 0..word_count {
            words.push(read_u64(body, &mut cursor)?);
        }
        shards.push(BloomShard::from_words(bits_per_shard, words));
    }

    Ok(BloomFilter::from_shards(name, expected_config, shards))
}

fn checksum_of(body: &[u8]) -> u64 {
    let mut hasher = twox_hash::XxHash64::with_seed(0);
    hasher.write(body);
    hasher.finish()
}

fn read_u64(body: &[u8], cursor: &mut usize) -> Result<u64> {
    let bytes = body
        .get(*cursor..*cursor + 8)
        .ok_or_else(|| Error::Corruption("bloom snapshot truncated".into()))?;
    *cursor += 8;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(body: &[u8], cursor: &mut usize) -> Result<u32> {
    let bytes = body
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| Error::Corruption("bloom snapshot truncated".into()))?;
    *cursor += 4;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Loads a named filter from `storage`, falling back to an empty filter
/// seeded with `seed_items` whenever the snapshot is missing, corrupted, or
/// stale relative to `config` (spec.md §4.7 "auto-reseed on load failure").
pub struct AutoSeeder<'a> {
    pub storage: &'a dyn BloomStorageProvider,
}

impl<'a> AutoSeeder<'a> {
    pub async fn load_or_seed<I>(
        &self,
        name: FilterName,
        config: BloomConfig,
        seed_items: I,
    ) -> Result<BloomFilter>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let loaded = match self.storage.load(&name).await {
            Ok(Some(bytes)) => decode(name.clone(), config, &bytes).ok(),
            Ok(None) => None,
            Err(_) => None,
        };
        if let Some(filter) = loaded {
            return Ok(filter);
        }
        tracing::warn!(filter = %name, "bloom filter snapshot missing or invalid, reseeding");
        let filter = BloomFilter::new(name, config);
        for item in seed_items {
            filter.insert(&item);
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let config = BloomConfig::new(1000, 0.01, 4).unwrap();
        let filter = BloomFilter::new(FilterName::new("round-trip").unwrap(), config);
        filter.insert(b"alpha");
        filter.insert(b"beta");

        let bytes = encode(&filter);
        let restored = decode(FilterName::new("round-trip").unwrap(), config, &bytes).unwrap();
        assert!(restored.contains(b"alpha"));
        assert!(restored.contains(b"beta"));
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let bytes = vec![0u8; 20];
        let config = BloomConfig::new(1000, 0.01, 4).unwrap();
        assert!(decode(FilterName::new("x").unwrap(), config, &bytes).is_err());
    }

    #[test]
    fn decode_rejects_fingerprint_mismatch() {
        let config_a = BloomConfig::new(1000, 0.01, 4).unwrap();
        let config_b = BloomConfig::new(5000, 0.01, 4).unwrap();
        let filter = BloomFilter::new(FilterName::new("y").unwrap(), config_a);
        let bytes = encode(&filter);
        assert!(decode(FilterName::new("y").unwrap(), config_b, &bytes).is_err());
    }

    #[tokio::test]
    async fn auto_seeder_reseeds_on_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemBloomStorage::new(dir.path());
        let seeder = AutoSeeder { storage: &storage };
        let config = BloomConfig::new(100, 0.01, 2).unwrap();
        let filter = seeder
            .load_or_seed(
                FilterName::new("fresh").unwrap(),
                config,
                vec![b"seed-1".to_vec(), b"seed-2".to_vec()],
            )
            .await
            .unwrap();
        assert!(filter.contains(b"seed-1"));
    }

    #[tokio::test]
    async fn auto_seeder_round_trips_through_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemBloomStorage::new(dir.path());
        let name = FilterName::new("persisted").unwrap();
        let config = BloomConfig::new(100, 0.01, 2).unwrap();

        let filter = BloomFilter::new(name.clone(), config);
        filter.insert(b"item");
        storage.save(&name, &encode(&filter)).await.unwrap();

        let seeder = AutoSeeder { storage: &storage };
        let reloaded = seeder.load_or_seed(name, config, std::iter::empty()).await.unwrap();
        assert!(reloaded.contains(b"item"));
    }
}
