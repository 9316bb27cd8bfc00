#![forbid(unsafe_code)]

use sift_core::ids::{RequestId, RootId};
use sift_core::model::ObservableHandle;
use sift_core::system::SystemError;

#[derive(Debug)]
pub enum EngineError {
    /// The root lock could not be acquired within the configured wait.
    /// Safe to retry with backoff.
    LockTimeout { key: String },
    /// The request id is no longer tracked: it was already processed or
    /// invalidated. The submitted result is obsolete and should be dropped.
    UnknownAnalysisRequest { id: RequestId },
    /// Ownership of the request moved on (the claim expired and another
    /// worker was assigned the work). The stale result must not be applied.
    ExpiredAnalysisRequest { id: RequestId },
    /// The referenced root does not exist in the root store.
    UnknownRootAnalysis { root_id: RootId },
    /// The target observable is not part of the root.
    UnknownObservable { handle: ObservableHandle },
    /// The worker's module descriptor does not match the registered
    /// version for that name.
    ModuleVersionMismatch {
        name: String,
        registered: String,
        requested: String,
    },
    /// The request shape is internally inconsistent (e.g. a result without
    /// an observable target).
    MalformedRequest(&'static str),
    System(SystemError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockTimeout { key } => write!(f, "timed out waiting for lock: {key}"),
            Self::UnknownAnalysisRequest { id } => {
                write!(f, "unknown analysis request: {id}")
            }
            Self::ExpiredAnalysisRequest { id } => {
                write!(f, "expired analysis request: {id}")
            }
            Self::UnknownRootAnalysis { root_id } => {
                write!(f, "unknown root analysis: {root_id}")
            }
            Self::UnknownObservable { handle } => write!(f, "unknown observable: {handle}"),
            Self::ModuleVersionMismatch {
                name,
                registered,
                requested,
            } => write!(
                f,
                "module version mismatch for {name} (registered={registered}, requested={requested})"
            ),
            Self::MalformedRequest(message) => write!(f, "malformed request: {message}"),
            Self::System(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::System(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SystemError> for EngineError {
    fn from(value: SystemError) -> Self {
        Self::System(value)
    }
}
