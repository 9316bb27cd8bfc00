#![forbid(unsafe_code)]

use sift_core::model::{Analysis, AnalysisModuleType, ObservableHandle};
use sift_storage::SqliteStore;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("sift_cache_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn module(ttl_ms: i64) -> AnalysisModuleType {
    AnalysisModuleType::new("hasher", "1.0.0", vec!["file".to_string()]).with_cache_ttl_ms(ttl_ms)
}

fn result(module: &AnalysisModuleType, details: serde_json::Value) -> Analysis {
    Analysis::new(module.key(), details)
}

#[test]
fn put_and_get() {
    let mut store = SqliteStore::open(temp_dir("put_get")).expect("open store");

    let module = module(600_000);
    let handle = ObservableHandle::new("file", "sample.bin");
    let analysis = result(&module, serde_json::json!({"sha256": "abc123"}));

    let key = store
        .cache_put(&handle, &module, &analysis)
        .expect("put")
        .expect("cache key");
    assert_eq!(Some(key), module.cache_key(&handle));

    let cached = store
        .cache_get(&handle, &module)
        .expect("get")
        .expect("cached");
    assert_eq!(cached, analysis);
}

#[test]
fn miss_for_different_observable_or_module() {
    let mut store = SqliteStore::open(temp_dir("miss")).expect("open store");

    let module = module(600_000);
    let handle = ObservableHandle::new("file", "sample.bin");
    let analysis = result(&module, serde_json::json!({}));
    store
        .cache_put(&handle, &module, &analysis)
        .expect("put");

    let other_handle = ObservableHandle::new("file", "other.bin");
    assert!(store.cache_get(&other_handle, &module).expect("get").is_none());

    let other_version =
        AnalysisModuleType::new("hasher", "2.0.0", vec!["file".to_string()])
            .with_cache_ttl_ms(600_000);
    assert!(
        store
            .cache_get(&handle, &other_version)
            .expect("get")
            .is_none()
    );
}

#[test]
fn non_cacheable_modules_are_a_noop() {
    let mut store = SqliteStore::open(temp_dir("non_cacheable")).expect("open store");

    let module = AnalysisModuleType::new("hasher", "1.0.0", vec!["file".to_string()]);
    let handle = ObservableHandle::new("file", "sample.bin");
    let analysis = Analysis::new(module.key(), serde_json::json!({}));

    assert!(store.cache_put(&handle, &module, &analysis).expect("put").is_none());
    assert!(store.cache_get(&handle, &module).expect("get").is_none());
}

#[test]
fn zero_ttl_expires_immediately() {
    let mut store = SqliteStore::open(temp_dir("zero_ttl")).expect("open store");

    let module = module(0);
    let handle = ObservableHandle::new("file", "sample.bin");
    let analysis = result(&module, serde_json::json!({}));
    store.cache_put(&handle, &module, &analysis).expect("put");

    assert!(store.cache_get(&handle, &module).expect("get").is_none());
    // The expired row was dropped on read.
    assert!(store.cache_get(&handle, &module).expect("get again").is_none());
}

#[test]
fn expired_entry_is_dropped() {
    let mut store = SqliteStore::open(temp_dir("expiry")).expect("open store");

    let module = module(20);
    let handle = ObservableHandle::new("file", "sample.bin");
    let analysis = result(&module, serde_json::json!({}));
    store.cache_put(&handle, &module, &analysis).expect("put");

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(store.cache_get(&handle, &module).expect("get").is_none());
}

#[test]
fn overwriting_keeps_the_latest_result() {
    let mut store = SqliteStore::open(temp_dir("overwrite")).expect("open store");

    let module = module(600_000);
    let handle = ObservableHandle::new("file", "sample.bin");
    store
        .cache_put(&handle, &module, &result(&module, serde_json::json!({"n": 1})))
        .expect("put");
    store
        .cache_put(&handle, &module, &result(&module, serde_json::json!({"n": 2})))
        .expect("put again");

    let cached = store
        .cache_get(&handle, &module)
        .expect("get")
        .expect("cached");
    assert_eq!(cached.details, serde_json::json!({"n": 2}));
}

#[test]
fn additional_cache_keys_partition_the_cache() {
    let mut store = SqliteStore::open(temp_dir("partition")).expect("open store");

    let handle = ObservableHandle::new("file", "sample.bin");
    let plain = module(600_000);
    let with_rules = module(600_000)
        .with_additional_cache_keys(vec!["ruleset-2026-08".to_string()]);

    store
        .cache_put(&handle, &plain, &result(&plain, serde_json::json!({"n": 1})))
        .expect("put");
    assert!(store.cache_get(&handle, &with_rules).expect("get").is_none());
}
