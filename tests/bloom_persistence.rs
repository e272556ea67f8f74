//! Bloom filter shard persistence round-trip and reseed-on-corruption
//! behavior (spec.md §8).

use raftkit::bloom::{BloomConfig, BloomStorageProvider, FilesystemBloomStorage, FilterName};

#[tokio::test]
async fn filter_survives_a_reload_through_the_filesystem_provider() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FilesystemBloomStorage::new(dir.path());
    let name = FilterName::new("members").unwrap();
    let config = BloomConfig::new(10_000, 0.01, 8).unwrap();

    let filter = raftkit::bloom::named_filter(name.clone(), config, &storage).await.unwrap();
    filter.insert(b"user-1");
    filter.insert(b"user-2");
    assert!(filter.is_dirty());

    raftkit::bloom::save_filter(&name, &storage).await.unwrap();
    assert!(!filter.is_dirty(), "save_filter should clear the dirty flag on success");

    raftkit::bloom::forget(&name);
    let reloaded = raftkit::bloom::named_filter(name.clone(), config, &storage).await.unwrap();
    assert!(reloaded.contains(b"user-1"));
    assert!(reloaded.contains(b"user-2"));
    raftkit::bloom::forget(&name);
}

#[tokio::test]
async fn corrupted_snapshot_triggers_reseed_instead_of_failing() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FilesystemBloomStorage::new(dir.path());
    let name = FilterName::new("corrupt-test").unwrap();
    storage.save(&name, b"not a valid snapshot").await.unwrap();

    let config = BloomConfig::new(1000, 0.01, 4).unwrap();
    let filter = raftkit::bloom::named_filter(name, config, &storage).await.unwrap();
    // Reseeded empty rather than erroring out; absence is the expected signal.
    assert!(!filter.contains(b"anything"));
}
