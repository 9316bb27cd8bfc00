#![forbid(unsafe_code)]

//! Data model and service contracts for the sift analysis coordination engine.
//!
//! A [`model::RootAnalysis`] owns a set of typed observables; registered
//! [`model::AnalysisModuleType`]s declare which observable types they accept.
//! The engine crate drives the [`system`] contracts to dispatch, deduplicate
//! and collect analysis work across worker processes.

pub mod ids;
pub mod model;
pub mod system;

pub use ids::{ModuleKey, RequestId, RootId, WorkerId};
pub use model::{
    Analysis, AnalysisModuleType, AnalysisRequest, AnalysisTarget, Observable, ObservableHandle,
    RequestStatus, RootAnalysis,
};
pub use system::{
    LockService, ModuleRegistry, RequestTracker, ResultCache, RootStore, SystemBackend,
    SystemError, WorkQueue,
};
