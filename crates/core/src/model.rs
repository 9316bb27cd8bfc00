#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::{ModuleKey, RequestId, RootId, WorkerId};

const DEFAULT_CLAIM_TTL_MS: i64 = 300_000; // 5 minutes

/// Content identity of an observable: type tag plus value. Two observables
/// with the same handle are the same piece of data regardless of which root
/// they were seen in.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservableHandle {
    pub observable_type: String,
    pub value: String,
}

impl ObservableHandle {
    pub fn new(observable_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            observable_type: observable_type.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ObservableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.observable_type, self.value)
    }
}

/// The result produced by one analysis module type for one observable.
/// Discovered observables are merged into the owning root when the result is
/// attached and go through the same dispatch pass as the originals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub module: ModuleKey,
    pub details: serde_json::Value,
    #[serde(default)]
    pub observables: Vec<ObservableHandle>,
}

impl Analysis {
    pub fn new(module: ModuleKey, details: serde_json::Value) -> Self {
        Self {
            module,
            details,
            observables: Vec::new(),
        }
    }

    pub fn with_observable(mut self, handle: ObservableHandle) -> Self {
        self.observables.push(handle);
        self
    }
}

/// An immutable capability descriptor. Identity is name plus version; a
/// module is cacheable exactly when it declares a cache TTL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisModuleType {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub observable_types: Vec<String>,
    #[serde(default)]
    pub cache_ttl_ms: Option<i64>,
    #[serde(default)]
    pub additional_cache_keys: Vec<String>,
    #[serde(default = "default_claim_ttl_ms")]
    pub claim_ttl_ms: i64,
}

fn default_claim_ttl_ms() -> i64 {
    DEFAULT_CLAIM_TTL_MS
}

impl AnalysisModuleType {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        observable_types: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            observable_types,
            cache_ttl_ms: None,
            additional_cache_keys: Vec::new(),
            claim_ttl_ms: DEFAULT_CLAIM_TTL_MS,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_cache_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.cache_ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_additional_cache_keys(mut self, keys: Vec<String>) -> Self {
        self.additional_cache_keys = keys;
        self
    }

    pub fn with_claim_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.claim_ttl_ms = ttl_ms;
        self
    }

    pub fn key(&self) -> ModuleKey {
        ModuleKey::new(self.name.clone(), self.version.clone())
    }

    pub fn cacheable(&self) -> bool {
        self.cache_ttl_ms.is_some()
    }

    /// Does this module analyze observables of the given type?
    pub fn accepts(&self, handle: &ObservableHandle) -> bool {
        self.observable_types
            .iter()
            .any(|t| t == &handle.observable_type)
    }

    pub fn version_matches(&self, other: &AnalysisModuleType) -> bool {
        self.name == other.name && self.version == other.version
    }

    /// Cache identity for analyzing the given observable with this module,
    /// or None when the module is not cacheable. The key covers the
    /// observable content, the module name and version, and any additional
    /// cache keys (order-insensitive), so a version bump or a rule-set
    /// change invalidates previous entries.
    pub fn cache_key(&self, handle: &ObservableHandle) -> Option<String> {
        self.cache_ttl_ms?;
        let mut extra = self.additional_cache_keys.clone();
        extra.sort();
        let mut hasher = Sha256::new();
        hasher.update(handle.observable_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(handle.value.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.version.as_bytes());
        for key in &extra {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(out, "{byte:02x}");
        }
        Some(out)
    }
}

/// An outstanding analysis request an observable is waiting on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedRequest {
    pub module: ModuleKey,
    pub request_id: RequestId,
}

/// A typed value under analysis within a root. Holds at most one attached
/// analysis and at most one outstanding request per module type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    pub observable_type: String,
    pub value: String,
    #[serde(default)]
    pub analyses: Vec<Analysis>,
    #[serde(default)]
    pub request_tracking: Vec<TrackedRequest>,
}

impl Observable {
    pub fn new(observable_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            observable_type: observable_type.into(),
            value: value.into(),
            analyses: Vec::new(),
            request_tracking: Vec::new(),
        }
    }

    pub fn handle(&self) -> ObservableHandle {
        ObservableHandle::new(self.observable_type.clone(), self.value.clone())
    }

    pub fn get_analysis(&self, module: &ModuleKey) -> Option<&Analysis> {
        self.analyses.iter().find(|a| &a.module == module)
    }

    /// Attach an analysis result, replacing any previous result for the
    /// same module type.
    pub fn add_analysis(&mut self, analysis: Analysis) {
        self.analyses.retain(|a| a.module != analysis.module);
        self.analyses.push(analysis);
    }

    pub fn analysis_tracked(&self, module: &ModuleKey) -> bool {
        self.request_tracking.iter().any(|t| &t.module == module)
    }

    pub fn tracked_request_id(&self, module: &ModuleKey) -> Option<RequestId> {
        self.request_tracking
            .iter()
            .find(|t| &t.module == module)
            .map(|t| t.request_id)
    }

    /// Record that this observable is waiting on the given request,
    /// replacing any previous entry for the same module type.
    pub fn track_request(&mut self, module: ModuleKey, request_id: RequestId) {
        self.request_tracking.retain(|t| t.module != module);
        self.request_tracking.push(TrackedRequest { module, request_id });
    }

    pub fn clear_tracked_request(&mut self, module: &ModuleKey) {
        self.request_tracking.retain(|t| &t.module != module);
    }
}

/// The top-level unit of investigation: a mutable aggregate of observables,
/// exclusively mutated under its root lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RootAnalysis {
    pub id: RootId,
    #[serde(default)]
    pub observables: Vec<Observable>,
}

impl RootAnalysis {
    pub fn new() -> Self {
        Self {
            id: RootId::new(),
            observables: Vec::new(),
        }
    }

    pub fn with_id(id: RootId) -> Self {
        Self {
            id,
            observables: Vec::new(),
        }
    }

    /// Add an observable, returning a handle to it. Adding an observable
    /// that is already present is a no-op.
    pub fn add_observable(
        &mut self,
        observable_type: impl Into<String>,
        value: impl Into<String>,
    ) -> ObservableHandle {
        self.merge_observable(ObservableHandle::new(observable_type, value))
    }

    /// Ensure an observable with the given handle exists on this root.
    pub fn merge_observable(&mut self, handle: ObservableHandle) -> ObservableHandle {
        if self.get_observable(&handle).is_none() {
            self.observables
                .push(Observable::new(handle.observable_type.clone(), handle.value.clone()));
        }
        handle
    }

    pub fn get_observable(&self, handle: &ObservableHandle) -> Option<&Observable> {
        self.observables
            .iter()
            .find(|o| o.observable_type == handle.observable_type && o.value == handle.value)
    }

    pub fn get_observable_mut(&mut self, handle: &ObservableHandle) -> Option<&mut Observable> {
        self.observables
            .iter_mut()
            .find(|o| o.observable_type == handle.observable_type && o.value == handle.value)
    }

    pub fn analysis_completed(&self, handle: &ObservableHandle, module: &ModuleKey) -> bool {
        self.get_observable(handle)
            .is_some_and(|o| o.get_analysis(module).is_some())
    }

    pub fn analysis_tracked(&self, handle: &ObservableHandle, module: &ModuleKey) -> bool {
        self.get_observable(handle)
            .is_some_and(|o| o.analysis_tracked(module))
    }

    /// Attach an analysis to the observable with the given handle. Returns
    /// false when no such observable exists on this root.
    pub fn set_analysis(&mut self, handle: &ObservableHandle, analysis: Analysis) -> bool {
        match self.get_observable_mut(handle) {
            Some(observable) => {
                let module = analysis.module.clone();
                observable.add_analysis(analysis);
                observable.clear_tracked_request(&module);
                true
            }
            None => false,
        }
    }
}

impl Default for RootAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    New,
    Queued,
    Analyzing,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Queued => "QUEUED",
            Self::Analyzing => "ANALYZING",
        }
    }
}

/// The (observable, module type) pair an analysis request targets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTarget {
    pub observable: ObservableHandle,
    pub module: AnalysisModuleType,
}

/// A transient work descriptor: either a fresh root submission (no target)
/// or a request to analyze one observable with one module type. Lives only
/// for the duration of its own processing call plus its time in the work
/// queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: RequestId,
    pub root_id: RootId,
    /// Inline root, carried only by fresh root submissions that have not
    /// been saved to the root store yet.
    #[serde(default)]
    pub root: Option<RootAnalysis>,
    #[serde(default)]
    pub target: Option<AnalysisTarget>,
    pub status: RequestStatus,
    #[serde(default)]
    pub owner: Option<WorkerId>,
    #[serde(default)]
    pub result: Option<Analysis>,
    /// Other roots whose identical (observable, module) work deduplicated
    /// onto this request; each receives the result via fan-out.
    #[serde(default)]
    pub additional_roots: Vec<RootId>,
}

impl AnalysisRequest {
    pub fn new_root_submission(root: RootAnalysis) -> Self {
        Self {
            id: RequestId::new(),
            root_id: root.id,
            root: Some(root),
            target: None,
            status: RequestStatus::New,
            owner: None,
            result: None,
            additional_roots: Vec::new(),
        }
    }

    pub fn new_observable_request(
        root_id: RootId,
        observable: ObservableHandle,
        module: AnalysisModuleType,
    ) -> Self {
        Self {
            id: RequestId::new(),
            root_id,
            root: None,
            target: Some(AnalysisTarget { observable, module }),
            status: RequestStatus::New,
            owner: None,
            result: None,
            additional_roots: Vec::new(),
        }
    }

    pub fn is_root_submission(&self) -> bool {
        self.target.is_none()
    }

    pub fn is_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn module(&self) -> Option<&AnalysisModuleType> {
        self.target.as_ref().map(|t| &t.module)
    }

    /// Cache identity of this request, or None for root submissions and
    /// non-cacheable module types.
    pub fn cache_key(&self) -> Option<String> {
        let target = self.target.as_ref()?;
        target.module.cache_key(&target.observable)
    }

    /// The observables this request asks to have dispatched: all of the
    /// root's observables for a root submission; for a completed result, the
    /// observables discovered by the analysis plus the original one (so
    /// follow-on work is raised for both).
    pub fn observables(&self, root: &RootAnalysis) -> Vec<ObservableHandle> {
        let mut out = Vec::new();
        match &self.target {
            None => {
                out.extend(root.observables.iter().map(Observable::handle));
            }
            Some(target) => {
                if let Some(result) = &self.result {
                    out.extend(result.observables.iter().cloned());
                }
                out.push(target.observable.clone());
            }
        }
        out.sort();
        out.dedup();
        out
    }

    /// Record that another root is waiting on this request's result.
    pub fn append_root(&mut self, root_id: RootId) {
        if root_id != self.root_id && !self.additional_roots.contains(&root_id) {
            self.additional_roots.push(root_id);
        }
    }

    /// Fan-out copy bound to another root: fresh id, same target and result,
    /// empty additional_roots.
    pub fn duplicate_for(&self, root: RootAnalysis) -> Self {
        Self {
            id: RequestId::new(),
            root_id: root.id,
            root: Some(root),
            target: self.target.clone(),
            status: self.status,
            owner: self.owner.clone(),
            result: self.result.clone(),
            additional_roots: Vec::new(),
        }
    }
}
