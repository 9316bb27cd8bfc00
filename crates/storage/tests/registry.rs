#![forbid(unsafe_code)]

use sift_core::model::{AnalysisModuleType, RootAnalysis};
use sift_storage::{SqliteStore, StoreError};
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("sift_registry_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn register_and_get_module() {
    let mut store = SqliteStore::open(temp_dir("register_get")).expect("open store");

    let module = AnalysisModuleType::new("hasher", "1.0.0", vec!["file".to_string()])
        .with_description("hashes file content")
        .with_cache_ttl_ms(600_000);
    store.module_register(&module).expect("register");

    let fetched = store
        .module_get("hasher")
        .expect("get")
        .expect("registered");
    assert_eq!(fetched, module);
    assert!(store.module_get("other").expect("get").is_none());
}

#[test]
fn exact_duplicate_registration_fails() {
    let mut store = SqliteStore::open(temp_dir("duplicate")).expect("open store");

    let module = AnalysisModuleType::new("hasher", "1.0.0", vec!["file".to_string()]);
    store.module_register(&module).expect("register");
    match store.module_register(&module) {
        Err(StoreError::DuplicateModule { name, version }) => {
            assert_eq!(name, "hasher");
            assert_eq!(version, "1.0.0");
        }
        other => panic!("expected DuplicateModule, got {other:?}"),
    }
}

#[test]
fn new_version_replaces_the_registration() {
    let mut store = SqliteStore::open(temp_dir("upgrade")).expect("open store");

    let v1 = AnalysisModuleType::new("hasher", "1.0.0", vec!["file".to_string()]);
    let v2 = AnalysisModuleType::new("hasher", "2.0.0", vec!["file".to_string()]);
    store.module_register(&v1).expect("register v1");
    store.module_register(&v2).expect("register v2");

    let fetched = store
        .module_get("hasher")
        .expect("get")
        .expect("registered");
    assert_eq!(fetched.version, "2.0.0");
    assert_eq!(store.module_all().expect("all").len(), 1);
}

#[test]
fn all_modules_sorted_by_name() {
    let mut store = SqliteStore::open(temp_dir("all_sorted")).expect("open store");

    store
        .module_register(&AnalysisModuleType::new("yara", "1.0.0", vec!["file".into()]))
        .expect("register");
    store
        .module_register(&AnalysisModuleType::new("hasher", "1.0.0", vec!["file".into()]))
        .expect("register");

    let names: Vec<String> = store
        .module_all()
        .expect("all")
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["hasher".to_string(), "yara".to_string()]);
}

#[test]
fn root_save_and_load_round_trip() {
    let mut store = SqliteStore::open(temp_dir("root_round_trip")).expect("open store");

    let mut root = RootAnalysis::new();
    root.add_observable("file", "sample.bin");
    root.add_observable("ipv4", "203.0.113.7");
    store.root_save(&root).expect("save");

    let loaded = store.root_load(root.id).expect("load").expect("saved");
    assert_eq!(loaded, root);

    assert!(store.root_load(RootAnalysis::new().id).expect("load").is_none());
}

#[test]
fn root_save_is_an_upsert() {
    let mut store = SqliteStore::open(temp_dir("root_upsert")).expect("open store");

    let mut root = RootAnalysis::new();
    root.add_observable("file", "sample.bin");
    store.root_save(&root).expect("save");

    root.add_observable("file", "dropped.bin");
    store.root_save(&root).expect("save again");

    let loaded = store.root_load(root.id).expect("load").expect("saved");
    assert_eq!(loaded.observables.len(), 2);
}

#[test]
fn roots_are_visible_across_handles() {
    let dir = temp_dir("cross_handle");
    let mut writer = SqliteStore::open(&dir).expect("open writer");
    let mut reader = SqliteStore::open(&dir).expect("open reader");

    let mut root = RootAnalysis::new();
    root.add_observable("file", "sample.bin");
    writer.root_save(&root).expect("save");

    let loaded = reader.root_load(root.id).expect("load").expect("saved");
    assert_eq!(loaded, root);
}
