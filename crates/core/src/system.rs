#![forbid(unsafe_code)]

//! Service contracts the inbound processor is built on. The storage crate
//! ships a SQLite implementation of all of them; any backend that provides
//! the same semantics (expiring keyed locks, exclusive queue claims, safe
//! concurrent tracker/cache access) can stand in.

use crate::ids::{RequestId, RootId, WorkerId};
use crate::model::{Analysis, AnalysisModuleType, AnalysisRequest, ObservableHandle, RootAnalysis};

#[derive(Debug)]
pub enum SystemError {
    /// The lock is held by someone else and has not expired.
    LockBusy { key: String },
    /// A module with this exact name and version is already registered.
    DuplicateModule { name: String, version: String },
    /// No work queue was registered for this module name.
    UnknownWorkQueue { name: String },
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for SystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockBusy { key } => write!(f, "lock busy: {key}"),
            Self::DuplicateModule { name, version } => {
                write!(f, "module already registered: {name}@{version}")
            }
            Self::UnknownWorkQueue { name } => write!(f, "unknown work queue: {name}"),
            Self::Backend(err) => write!(f, "backend: {err}"),
        }
    }
}

impl std::error::Error for SystemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Distributed, keyed, expiring mutual exclusion. Locks are valid across
/// process and host boundaries; expiry is the liveness backstop against
/// crashed holders.
pub trait LockService {
    /// Acquire the lock for `key`, returning its lock id. Passing the live
    /// holder's lock id in `existing` re-acquires (and renews) it. An
    /// expired lock is acquirable by anyone. Fails with
    /// [`SystemError::LockBusy`] while someone else holds it.
    fn acquire(
        &mut self,
        key: &str,
        existing: Option<&str>,
        ttl_ms: i64,
    ) -> Result<String, SystemError>;

    /// Release the lock if `lock_id` still holds it. Returns false when the
    /// lock was not held by that id.
    fn release(&mut self, key: &str, lock_id: &str) -> Result<bool, SystemError>;

    fn is_locked(&mut self, key: &str) -> Result<bool, SystemError>;
}

/// Capability catalog: registered module types keyed by name.
pub trait ModuleRegistry {
    /// Register a module type. Re-registering the exact same name+version
    /// fails with [`SystemError::DuplicateModule`]; a different version for
    /// an existing name replaces the registration.
    fn register_module(&mut self, module: &AnalysisModuleType) -> Result<(), SystemError>;

    fn get_module(&mut self, name: &str) -> Result<Option<AnalysisModuleType>, SystemError>;

    fn all_modules(&mut self) -> Result<Vec<AnalysisModuleType>, SystemError>;
}

/// Durable, queryable store of in-flight analysis requests.
pub trait RequestTracker {
    /// Track (upsert by id) the given request.
    fn track_request(&mut self, request: &AnalysisRequest) -> Result<(), SystemError>;

    fn get_request(&mut self, id: RequestId) -> Result<Option<AnalysisRequest>, SystemError>;

    /// The currently tracked request for this exact (observable, module)
    /// pair, or None when there is none or the module is not cacheable
    /// (non-cacheable modules never participate in cross-root dedup).
    fn get_request_by_observable(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<Option<AnalysisRequest>, SystemError>;

    fn delete_request(&mut self, id: RequestId) -> Result<bool, SystemError>;
}

/// Maps (observable identity, module identity) to a previously computed
/// result, independent of any root.
pub trait ResultCache {
    /// Store a result, returning the cache key, or None for non-cacheable
    /// modules (the call is then a no-op).
    fn cache_analysis(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
        analysis: &Analysis,
    ) -> Result<Option<String>, SystemError>;

    /// A cached result that has not outlived the module's cache TTL.
    fn get_cached_analysis(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<Option<Analysis>, SystemError>;
}

/// Per-module-type dispatch: queued requests handed to workers with
/// exclusive ownership.
pub trait WorkQueue {
    fn add_work_queue(&mut self, name: &str) -> Result<(), SystemError>;

    /// Track the request and enqueue it into its module's queue: status
    /// becomes QUEUED, owner is cleared. Fails with
    /// [`SystemError::UnknownWorkQueue`] when the module has no queue.
    fn submit_request(&mut self, request: &mut AnalysisRequest) -> Result<(), SystemError>;

    /// Claim the earliest still-queued request for the module. The claim is
    /// exclusive: under concurrent callers a given request is handed to
    /// exactly one of them. Sets owner, status ANALYZING and the claim
    /// deadline; requests whose previous claim deadline lapsed are requeued
    /// first. Polls up to `timeout_ms` before returning None.
    fn next_request(
        &mut self,
        owner: &WorkerId,
        module: &AnalysisModuleType,
        timeout_ms: u64,
    ) -> Result<Option<AnalysisRequest>, SystemError>;

    fn queue_size(&mut self, name: &str) -> Result<usize, SystemError>;
}

/// Durable root-analysis state, keyed by root id.
pub trait RootStore {
    fn save_root(&mut self, root: &RootAnalysis) -> Result<(), SystemError>;

    fn load_root(&mut self, id: RootId) -> Result<Option<RootAnalysis>, SystemError>;
}

/// Everything the inbound processor needs, bundled. Implemented for any
/// type providing all six service contracts.
pub trait SystemBackend:
    LockService + ModuleRegistry + RequestTracker + ResultCache + WorkQueue + RootStore
{
}

impl<T> SystemBackend for T where
    T: LockService + ModuleRegistry + RequestTracker + ResultCache + WorkQueue + RootStore
{
}
