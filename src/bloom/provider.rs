//! Process-wide named-filter registry (spec.md §4.7 "provider").

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::bloom::config::{BloomConfig, FilterName};
use crate::bloom::filter::BloomFilter;
use crate::bloom::persistence::{self, AutoSeeder, BloomStorageProvider};
use crate::error::Result;

static REGISTRY: Lazy<DashMap<FilterName, Arc<BloomFilter>>> = Lazy::new(DashMap::new);

/// Returns the process-wide filter for `name`, creating and registering it
/// (via `storage`'s `AutoSeeder`) on first access. Subsequent calls with the
/// same name return the same instance, mirroring the teacher's lazily
/// initialized `once_cell`-backed singletons elsewhere in the codebase.
pub async fn named_filter(
    name: FilterName,
    config: BloomConfig,
    storage: &dyn BloomStorageProvider,
) -> Result<Arc<BloomFilter>> {
    if let Some(existing) = REGISTRY.get(&name) {
        return Ok(existing.clone());
    }
    let seeder = AutoSeeder { storage };
    let filter = Arc::new(seeder.load_or_seed(name.clone(), config, std::iter::empty()).await?);
    Ok(REGISTRY.entry(name).or_insert(filter).clone())
}

/// Removes `name` from the process-wide registry, forcing the next
/// `named_filter` call to reload or reseed it. Mainly for tests.
pub fn forget(name: &FilterName) {
    REGISTRY.remove(name);
}

/// Persists `name`'s current bits through `storage` if any shard has writes
/// since its last save, clearing every shard's dirty flag on success
/// (spec.md §4.7 "Save flow"). A no-op if `name` isn't registered or nothing
/// is dirty.
pub async fn save_filter(name: &FilterName, storage: &dyn BloomStorageProvider) -> Result<()> {
    let Some(filter) = REGISTRY.get(name).map(|entry| entry.clone()) else {
        return Ok(());
    };
    if !filter.is_dirty() {
        return Ok(());
    }
    let bytes = persistence::encode(&filter);
    storage.save(name, &bytes).await?;
    filter.clear_all_dirty();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::persistence::FilesystemBloomStorage;

    #[tokio::test]
    async fn returns_same_instance_on_repeat_access() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemBloomStorage::new(dir.path());
        let name = FilterName::new("provider-test").unwrap();
        let config = BloomConfig::new(100, 0.01, 2).unwrap();

        let first = named_filter(name.clone(), config, &storage).await.unwrap();
        first.insert(b"marker");
        let second = named_filter(name.clone(), config, &storage).await.unwrap();
        assert!(second.contains(b"marker"));
        forget(&name);
    }

    #[tokio::test]
    async fn save_filter_persists_and_clears_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemBloomStorage::new(dir.path());
        let name = FilterName::new("save-test").unwrap();
        let config = BloomConfig::new(100, 0.01, 2).unwrap();

        let filter = named_filter(name.clone(), config, &storage).await.unwrap();
        filter.insert(b"marker");
        assert!(filter.is_dirty());

        save_filter(&name, &storage).await.unwrap();
        assert!(!filter.is_dirty());

        forget(&name);
        let reloaded = named_filter(name.clone(), config, &storage).await.unwrap();
        assert!(reloaded.contains(b"marker"));
        forget(&name);
    }

    #[tokio::test]
    async fn save_filter_is_a_no_op_for_unregistered_name() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemBloomStorage::new(dir.path());
        let name = FilterName::new("never-registered").unwrap();
        save_filter(&name, &storage).await.unwrap();
        assert!(storage.load(&name).await.unwrap().is_none());
    }
}
