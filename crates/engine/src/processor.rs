#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use sift_core::ids::{ModuleKey, RequestId, RootId, WorkerId};
use sift_core::model::{
    AnalysisModuleType, AnalysisRequest, ObservableHandle, RootAnalysis,
};
use sift_core::system::{SystemBackend, SystemError};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// The orchestrator: bundles a backend handle and lock tuning, and carries
/// the only business logic in the system. Each processor instance owns its
/// backend handle; independent instances (other processes, other tests)
/// coordinate through the backend itself.
pub struct InboundProcessor<B: SystemBackend> {
    backend: B,
    config: EngineConfig,
}

impl<B: SystemBackend> InboundProcessor<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: B, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Register an analysis module type, creating its work queue on first
    /// registration of the name.
    pub fn register_module(&mut self, module: &AnalysisModuleType) -> Result<(), EngineError> {
        if self.backend.get_module(&module.name)?.is_none() {
            self.backend.add_work_queue(&module.name)?;
        }
        self.backend.register_module(module)?;
        Ok(())
    }

    /// Submit a new root analysis for processing. Returns the root id once
    /// the root is tracked and its initial dispatch pass has run.
    pub fn submit_root(&mut self, root: RootAnalysis) -> Result<RootId, EngineError> {
        let root_id = root.id;
        let request = AnalysisRequest::new_root_submission(root);
        self.process_analysis_request(request)?;
        Ok(root_id)
    }

    /// Claim the next queued request for the module on behalf of `owner`.
    /// The caller's module descriptor must match the registered version.
    pub fn next_request(
        &mut self,
        owner: &WorkerId,
        module: &AnalysisModuleType,
        timeout_ms: u64,
    ) -> Result<Option<AnalysisRequest>, EngineError> {
        if let Some(registered) = self.backend.get_module(&module.name)? {
            if !registered.version_matches(module) {
                return Err(EngineError::ModuleVersionMismatch {
                    name: module.name.clone(),
                    registered: registered.version,
                    requested: module.version.clone(),
                });
            }
        }
        Ok(self.backend.next_request(owner, module, timeout_ms)?)
    }

    /// Ingest a request: a fresh root submission or a completed result
    /// being handed back by a worker. The whole reconciliation runs under
    /// the root's lock; the lock is released and the request untracked on
    /// every exit path. On success, the result is fanned out to every root
    /// that deduplicated onto this request.
    pub fn process_analysis_request(
        &mut self,
        request: AnalysisRequest,
    ) -> Result<(), EngineError> {
        let lock_key = request.root_id.to_string();
        let lock_id = self.acquire_root_lock(&lock_key)?;

        let outcome = self.process_locked(&request);

        let released = self.backend.release(&lock_key, &lock_id);
        let deleted = self.backend.delete_request(request.id);

        let fan_out = outcome?;
        released?;
        deleted?;

        for other_root_id in fan_out {
            let Some(other_root) = self.backend.load_root(other_root_id)? else {
                return Err(EngineError::UnknownRootAnalysis {
                    root_id: other_root_id,
                });
            };
            let duplicate = request.duplicate_for(other_root);
            self.backend.track_request(&duplicate)?;
            self.process_analysis_request(duplicate)?;
        }
        Ok(())
    }

    /// The critical section proper. Returns the fan-out list to process
    /// after the lock is dropped.
    fn process_locked(&mut self, request: &AnalysisRequest) -> Result<Vec<RootId>, EngineError> {
        let mut fan_out = Vec::new();

        let mut root = if let Some(result) = &request.result {
            // A completed analysis coming back from a worker.
            let Some(existing) = self.backend.get_request(request.id)? else {
                return Err(EngineError::UnknownAnalysisRequest { id: request.id });
            };
            if existing.owner != request.owner {
                return Err(EngineError::ExpiredAnalysisRequest { id: request.id });
            }
            // The tracked copy is authoritative for fan-out: other roots may
            // have attached themselves while this request was being analyzed.
            fan_out = existing.additional_roots.clone();

            let Some(target) = &request.target else {
                return Err(EngineError::MalformedRequest(
                    "result without observable target",
                ));
            };
            let Some(mut root) = self.backend.load_root(request.root_id)? else {
                return Err(EngineError::UnknownRootAnalysis {
                    root_id: request.root_id,
                });
            };

            if target.module.cacheable() {
                self.backend
                    .cache_analysis(&target.observable, &target.module, result)?;
            }

            let module_key = target.module.key();
            let Some(observable) = root.get_observable_mut(&target.observable) else {
                return Err(EngineError::UnknownObservable {
                    handle: target.observable.clone(),
                });
            };
            observable.add_analysis(result.clone());
            observable.clear_tracked_request(&module_key);
            for handle in &result.observables {
                root.merge_observable(handle.clone());
            }
            self.backend.save_root(&root)?;
            root
        } else if request.is_root_submission() {
            // A fresh root: save it so it becomes discoverable by id.
            let Some(root) = request.root.clone() else {
                return Err(EngineError::MalformedRequest(
                    "root submission without inline root",
                ));
            };
            self.backend.save_root(&root)?;
            root
        } else {
            let Some(root) = self.backend.load_root(request.root_id)? else {
                return Err(EngineError::UnknownRootAnalysis {
                    root_id: request.root_id,
                });
            };
            root
        };

        self.dispatch(request, &mut root)?;
        Ok(fan_out)
    }

    /// The dispatch pass: raise analysis work for every (observable, module
    /// type) pair that is accepted, not yet completed, and not yet tracked.
    fn dispatch(
        &mut self,
        request: &AnalysisRequest,
        root: &mut RootAnalysis,
    ) -> Result<(), EngineError> {
        let modules = self.backend.all_modules()?;
        for handle in request.observables(root) {
            for module in &modules {
                if !module.accepts(&handle) {
                    continue;
                }
                let module_key = module.key();
                if root.analysis_completed(&handle, &module_key) {
                    continue;
                }
                if root.analysis_tracked(&handle, &module_key) {
                    continue;
                }

                // Is another root already waiting on this exact computation?
                // (Only cacheable modules are visible to this lookup.)
                if let Some(tracked) = self.backend.get_request_by_observable(&handle, module)? {
                    if tracked.id != request.id
                        && self.try_adopt_tracked_request(
                            root,
                            &handle,
                            module_key.clone(),
                            tracked.id,
                            tracked.root_id,
                        )?
                    {
                        continue;
                    }
                }

                // A previously computed result may already satisfy the pair.
                if let Some(cached) = self.backend.get_cached_analysis(&handle, module)? {
                    if !root.set_analysis(&handle, cached) {
                        return Err(EngineError::UnknownObservable {
                            handle: handle.clone(),
                        });
                    }
                    self.backend.save_root(root)?;
                    continue;
                }

                let mut new_request = AnalysisRequest::new_observable_request(
                    root.id,
                    handle.clone(),
                    module.clone(),
                );
                let Some(observable) = root.get_observable_mut(&handle) else {
                    return Err(EngineError::UnknownObservable {
                        handle: handle.clone(),
                    });
                };
                observable.track_request(module_key, new_request.id);
                self.backend.save_root(root)?;
                self.backend.submit_request(&mut new_request)?;
            }
        }
        Ok(())
    }

    /// Attach this root to an analysis request raised by another root, so
    /// one computation satisfies both. The other root is locked with a
    /// zero-wait attempt first; if it cannot be locked, or its request
    /// completed in the interim, the caller falls through to the cache
    /// check instead.
    fn try_adopt_tracked_request(
        &mut self,
        root: &mut RootAnalysis,
        handle: &ObservableHandle,
        module_key: ModuleKey,
        tracked_id: RequestId,
        tracked_root_id: RootId,
    ) -> Result<bool, EngineError> {
        let other_key = tracked_root_id.to_string();
        let lock_id = match self
            .backend
            .acquire(&other_key, None, self.config.lock_ttl_ms)
        {
            Ok(lock_id) => lock_id,
            Err(SystemError::LockBusy { .. }) => return Ok(false),
            // Could not confirm the other request is still live; the cache
            // check is the fallback.
            Err(_) => return Ok(false),
        };

        let outcome = self.adopt_locked(root, handle, module_key, tracked_id);
        let _ = self.backend.release(&other_key, &lock_id);
        outcome
    }

    fn adopt_locked(
        &mut self,
        root: &mut RootAnalysis,
        handle: &ObservableHandle,
        module_key: ModuleKey,
        tracked_id: RequestId,
    ) -> Result<bool, EngineError> {
        // Re-fetch under the other root's lock: the request may have been
        // consumed between the tracker lookup and the lock.
        let Some(mut tracked) = self.backend.get_request(tracked_id)? else {
            return Ok(false);
        };
        tracked.append_root(root.id);
        self.backend.track_request(&tracked)?;

        let Some(observable) = root.get_observable_mut(handle) else {
            return Err(EngineError::UnknownObservable {
                handle: handle.clone(),
            });
        };
        observable.track_request(module_key, tracked.id);
        self.backend.save_root(root)?;
        Ok(true)
    }

    fn acquire_root_lock(&mut self, key: &str) -> Result<String, EngineError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.lock_wait_ms);
        loop {
            match self.backend.acquire(key, None, self.config.lock_ttl_ms) {
                Ok(lock_id) => return Ok(lock_id),
                Err(SystemError::LockBusy { .. }) => {
                    if Instant::now() >= deadline {
                        return Err(EngineError::LockTimeout {
                            key: key.to_string(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(self.config.lock_poll_ms));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
