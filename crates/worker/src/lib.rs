#![forbid(unsafe_code)]

//! The worker harness: claims queued analysis requests for one module type,
//! runs an [`Analyzer`] over each target observable and hands the completed
//! result back to the inbound processor. Stale results (claim expired,
//! request re-assigned) are dropped without touching the root.

use std::time::Duration;

use sift_core::ids::{RequestId, WorkerId};
use sift_core::model::{Analysis, AnalysisModuleType, AnalysisRequest, ObservableHandle};
use sift_core::system::{SystemBackend, SystemError};
use sift_engine::{EngineError, InboundProcessor};

const RESULT_SUBMIT_ATTEMPTS: u32 = 5;
const RESULT_SUBMIT_BACKOFF_MS: u64 = 100;

pub type AnalyzerError = Box<dyn std::error::Error + Send + Sync>;

/// What an analyzer produced for one observable: free-form details plus any
/// further observables it discovered.
#[derive(Clone, Debug)]
pub struct AnalyzerOutput {
    pub details: serde_json::Value,
    pub observables: Vec<ObservableHandle>,
}

impl AnalyzerOutput {
    pub fn new(details: serde_json::Value) -> Self {
        Self {
            details,
            observables: Vec::new(),
        }
    }

    pub fn with_observable(mut self, handle: ObservableHandle) -> Self {
        self.observables.push(handle);
        self
    }
}

/// The pluggable analysis logic a worker runs for its module type.
pub trait Analyzer {
    fn analyze(
        &mut self,
        observable: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<AnalyzerOutput, AnalyzerError>;
}

impl<F> Analyzer for F
where
    F: FnMut(&ObservableHandle, &AnalysisModuleType) -> Result<AnalyzerOutput, AnalyzerError>,
{
    fn analyze(
        &mut self,
        observable: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        self(observable, module)
    }
}

#[derive(Debug)]
pub enum WorkerError {
    Engine(EngineError),
    /// The analyzer itself failed. The claim is left to expire so the
    /// request is requeued for another attempt.
    Analyzer {
        request: RequestId,
        source: AnalyzerError,
    },
    /// A claimed request had no observable target.
    MalformedRequest(RequestId),
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(err) => write!(f, "{err}"),
            Self::Analyzer { request, source } => {
                write!(f, "analyzer failed for request {request}: {source}")
            }
            Self::MalformedRequest(id) => {
                write!(f, "claimed request without observable target: {id}")
            }
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(err) => Some(err),
            Self::Analyzer { source, .. } => Some(source.as_ref()),
            Self::MalformedRequest(_) => None,
        }
    }
}

impl From<EngineError> for WorkerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

/// What one polling cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkOutcome {
    /// No queued work within the timeout.
    Idle,
    /// A request was analyzed and its result applied.
    Completed(RequestId),
    /// A request was analyzed but the result was stale and discarded.
    Dropped(RequestId),
}

/// One worker process: a backend handle, a module descriptor and the
/// analyzer to run. Multiple workers for the same module share the queue;
/// the exclusive claim keeps them from analyzing the same request twice.
pub struct Worker<B: SystemBackend, A: Analyzer> {
    processor: InboundProcessor<B>,
    module: AnalysisModuleType,
    owner: WorkerId,
    analyzer: A,
}

impl<B: SystemBackend, A: Analyzer> Worker<B, A> {
    pub fn new(processor: InboundProcessor<B>, module: AnalysisModuleType, analyzer: A) -> Self {
        Self {
            processor,
            module,
            owner: WorkerId::random(),
            analyzer,
        }
    }

    pub fn with_owner(mut self, owner: WorkerId) -> Self {
        self.owner = owner;
        self
    }

    pub fn owner(&self) -> &WorkerId {
        &self.owner
    }

    pub fn processor_mut(&mut self) -> &mut InboundProcessor<B> {
        &mut self.processor
    }

    /// Register this worker's module type, creating its work queue. A
    /// restart re-registering the identical name and version is fine.
    pub fn register(&mut self) -> Result<(), WorkerError> {
        match self.processor.register_module(&self.module) {
            Ok(()) => Ok(()),
            Err(EngineError::System(SystemError::DuplicateModule { .. })) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// One polling cycle: claim, analyze, submit the result.
    pub fn run_once(&mut self, timeout_ms: u64) -> Result<WorkOutcome, WorkerError> {
        let Some(mut request) =
            self.processor
                .next_request(&self.owner, &self.module, timeout_ms)?
        else {
            return Ok(WorkOutcome::Idle);
        };
        let request_id = request.id;
        let Some(target) = request.target.clone() else {
            return Err(WorkerError::MalformedRequest(request_id));
        };

        let output = self
            .analyzer
            .analyze(&target.observable, &self.module)
            .map_err(|source| WorkerError::Analyzer {
                request: request_id,
                source,
            })?;

        let mut analysis = Analysis::new(self.module.key(), output.details);
        analysis.observables = output.observables;
        request.result = Some(analysis);

        self.submit_result(request_id, request)
    }

    /// Keep claiming and analyzing until `run_once` reports idle.
    pub fn drain(&mut self) -> Result<usize, WorkerError> {
        let mut completed = 0;
        loop {
            match self.run_once(0)? {
                WorkOutcome::Idle => return Ok(completed),
                WorkOutcome::Completed(_) | WorkOutcome::Dropped(_) => completed += 1,
            }
        }
    }

    fn submit_result(
        &mut self,
        request_id: RequestId,
        request: AnalysisRequest,
    ) -> Result<WorkOutcome, WorkerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.processor.process_analysis_request(request.clone()) {
                Ok(()) => return Ok(WorkOutcome::Completed(request_id)),
                Err(
                    EngineError::ExpiredAnalysisRequest { .. }
                    | EngineError::UnknownAnalysisRequest { .. },
                ) => return Ok(WorkOutcome::Dropped(request_id)),
                Err(EngineError::LockTimeout { .. }) if attempt < RESULT_SUBMIT_ATTEMPTS => {
                    std::thread::sleep(Duration::from_millis(
                        RESULT_SUBMIT_BACKOFF_MS * u64::from(attempt),
                    ));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
