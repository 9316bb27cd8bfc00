#![forbid(unsafe_code)]

use sift_core::ids::WorkerId;
use sift_core::model::{Analysis, AnalysisModuleType, RootAnalysis};
use sift_core::system::SystemError;
use sift_engine::{EngineError, InboundProcessor};
use sift_storage::SqliteStore;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("sift_inbound_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn setup(test_name: &str) -> InboundProcessor<SqliteStore> {
    InboundProcessor::new(SqliteStore::open(temp_dir(test_name)).expect("open store"))
}

fn file_module(name: &str) -> AnalysisModuleType {
    AnalysisModuleType::new(name, "1.0.0", vec!["file".to_string()])
}

#[test]
fn registration_creates_the_module_work_queue() {
    let mut processor = setup("registration");
    processor
        .register_module(&file_module("hasher"))
        .expect("register");

    let store = processor.backend_mut();
    assert!(store.work_queue_exists("hasher").expect("exists"));
    assert_eq!(store.queue_size("hasher").expect("size"), 0);
}

#[test]
fn re_registering_the_same_version_fails() {
    let mut processor = setup("duplicate_registration");
    let module = file_module("hasher");
    processor.register_module(&module).expect("register");
    match processor.register_module(&module) {
        Err(EngineError::System(SystemError::DuplicateModule { name, .. })) => {
            assert_eq!(name, "hasher");
        }
        other => panic!("expected DuplicateModule, got {other:?}"),
    }
}

#[test]
fn submission_raises_one_request_per_accepting_module() {
    let mut processor = setup("fan_out_modules");
    processor
        .register_module(&file_module("hasher"))
        .expect("register");
    processor
        .register_module(&file_module("yara"))
        .expect("register");
    processor
        .register_module(&AnalysisModuleType::new(
            "geoip",
            "1.0.0",
            vec!["ipv4".to_string()],
        ))
        .expect("register");

    let mut root = RootAnalysis::new();
    let handle = root.add_observable("file", "sample.bin");
    let root_id = processor.submit_root(root).expect("submit");

    let store = processor.backend_mut();
    assert_eq!(store.queue_size("hasher").expect("size"), 1);
    assert_eq!(store.queue_size("yara").expect("size"), 1);
    assert_eq!(store.queue_size("geoip").expect("size"), 0);

    let saved = store.root_load(root_id).expect("load").expect("saved");
    let observable = saved.get_observable(&handle).expect("observable");
    assert_eq!(observable.request_tracking.len(), 2);
}

#[test]
fn root_lock_is_released_after_submission() {
    let mut processor = setup("lock_released");
    processor
        .register_module(&file_module("hasher"))
        .expect("register");

    let mut root = RootAnalysis::new();
    root.add_observable("file", "sample.bin");
    let root_id = processor.submit_root(root).expect("submit");

    assert!(
        !processor
            .backend_mut()
            .lock_is_locked(&root_id.to_string())
            .expect("is_locked")
    );
}

#[test]
fn a_request_is_claimed_by_exactly_one_worker() {
    let mut processor = setup("exclusive_claim");
    let module = file_module("hasher");
    processor.register_module(&module).expect("register");

    let mut root = RootAnalysis::new();
    root.add_observable("file", "sample.bin");
    processor.submit_root(root).expect("submit");

    let first = processor
        .next_request(&WorkerId::try_new("worker-a").expect("id"), &module, 0)
        .expect("claim");
    let second = processor
        .next_request(&WorkerId::try_new("worker-b").expect("id"), &module, 0)
        .expect("claim");
    assert!(first.is_some());
    assert!(second.is_none());
}

#[test]
fn claiming_with_an_outdated_module_version_fails() {
    let mut processor = setup("version_mismatch");
    processor
        .register_module(&file_module("hasher"))
        .expect("register");

    let outdated = AnalysisModuleType::new("hasher", "0.9.0", vec!["file".to_string()]);
    match processor.next_request(&WorkerId::random(), &outdated, 0) {
        Err(EngineError::ModuleVersionMismatch {
            name,
            registered,
            requested,
        }) => {
            assert_eq!(name, "hasher");
            assert_eq!(registered, "1.0.0");
            assert_eq!(requested, "0.9.0");
        }
        other => panic!("expected ModuleVersionMismatch, got {other:?}"),
    }
}

#[test]
fn a_result_with_changed_ownership_is_rejected() {
    let mut processor = setup("expired_ownership");
    let module = file_module("hasher");
    processor.register_module(&module).expect("register");

    let mut root = RootAnalysis::new();
    let handle = root.add_observable("file", "sample.bin");
    let root_id = processor.submit_root(root).expect("submit");

    let owner = WorkerId::try_new("worker-a").expect("id");
    let mut claimed = processor
        .next_request(&owner, &module, 0)
        .expect("claim")
        .expect("queued work");

    // Simulate the claim having been reassigned while this worker computed.
    claimed.owner = Some(WorkerId::try_new("worker-b").expect("id"));
    claimed.result = Some(Analysis::new(module.key(), serde_json::json!({"k": "v"})));
    let request_id = claimed.id;

    match processor.process_analysis_request(claimed) {
        Err(EngineError::ExpiredAnalysisRequest { id }) => assert_eq!(id, request_id),
        other => panic!("expected ExpiredAnalysisRequest, got {other:?}"),
    }

    // The stale result must not have touched the root.
    let store = processor.backend_mut();
    let saved = store.root_load(root_id).expect("load").expect("saved");
    let observable = saved.get_observable(&handle).expect("observable");
    assert!(observable.analyses.is_empty());
    // The tracker entry is removed on every outcome.
    assert!(store.request_get(request_id).expect("get").is_none());
    assert!(!store.lock_is_locked(&root_id.to_string()).expect("is_locked"));
}

#[test]
fn a_result_for_an_untracked_request_is_rejected() {
    let mut processor = setup("unknown_request");
    let module = file_module("hasher");
    processor.register_module(&module).expect("register");

    let mut root = RootAnalysis::new();
    root.add_observable("file", "sample.bin");
    processor.submit_root(root).expect("submit");

    let owner = WorkerId::try_new("worker-a").expect("id");
    let mut claimed = processor
        .next_request(&owner, &module, 0)
        .expect("claim")
        .expect("queued work");
    processor
        .backend_mut()
        .request_delete(claimed.id)
        .expect("delete");

    claimed.result = Some(Analysis::new(module.key(), serde_json::json!({})));
    let request_id = claimed.id;
    match processor.process_analysis_request(claimed) {
        Err(EngineError::UnknownAnalysisRequest { id }) => assert_eq!(id, request_id),
        other => panic!("expected UnknownAnalysisRequest, got {other:?}"),
    }
}

#[test]
fn cached_results_short_circuit_dispatch() {
    let mut processor = setup("cache_short_circuit");
    let module = file_module("hasher").with_cache_ttl_ms(600_000);
    processor.register_module(&module).expect("register");

    let mut first_root = RootAnalysis::new();
    let handle = first_root.add_observable("file", "sample.bin");
    processor.submit_root(first_root).expect("submit first");

    let owner = WorkerId::try_new("worker-a").expect("id");
    let mut claimed = processor
        .next_request(&owner, &module, 0)
        .expect("claim")
        .expect("queued work");
    claimed.result = Some(Analysis::new(
        module.key(),
        serde_json::json!({"sha256": "abc123"}),
    ));
    processor
        .process_analysis_request(claimed)
        .expect("process result");

    // A later root with the same observable is satisfied from the cache.
    let mut second_root = RootAnalysis::new();
    second_root.add_observable("file", "sample.bin");
    let second_id = processor.submit_root(second_root).expect("submit second");

    let store = processor.backend_mut();
    assert_eq!(store.queue_size("hasher").expect("size"), 0);
    let saved = store.root_load(second_id).expect("load").expect("saved");
    let observable = saved.get_observable(&handle).expect("observable");
    let analysis = observable.get_analysis(&module.key()).expect("analysis");
    assert_eq!(analysis.details, serde_json::json!({"sha256": "abc123"}));
}

#[test]
fn non_cacheable_modules_get_independent_requests() {
    let mut processor = setup("non_cacheable");
    let module = file_module("hasher");
    processor.register_module(&module).expect("register");

    let mut first_root = RootAnalysis::new();
    first_root.add_observable("file", "sample.bin");
    processor.submit_root(first_root).expect("submit first");

    let mut second_root = RootAnalysis::new();
    second_root.add_observable("file", "sample.bin");
    processor.submit_root(second_root).expect("submit second");

    assert_eq!(
        processor.backend_mut().queue_size("hasher").expect("size"),
        2
    );
}

#[test]
fn resubmitting_the_same_root_raises_nothing_new() {
    let mut processor = setup("idempotent_resubmit");
    let module = file_module("hasher");
    processor.register_module(&module).expect("register");

    let mut root = RootAnalysis::new();
    root.add_observable("file", "sample.bin");
    processor.submit_root(root.clone()).expect("submit");
    // Tracked requests survive in the saved root, so a resubmission of the
    // same content raises no duplicate work.
    let saved = processor
        .backend_mut()
        .root_load(root.id)
        .expect("load")
        .expect("saved");
    processor.submit_root(saved).expect("resubmit");

    assert_eq!(
        processor.backend_mut().queue_size("hasher").expect("size"),
        1
    );
}
