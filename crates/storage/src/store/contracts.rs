#![forbid(unsafe_code)]

//! Bindings of the [`sift_core::system`] contracts onto [`SqliteStore`].

use super::{SqliteStore, StoreError};
use sift_core::ids::{RequestId, RootId, WorkerId};
use sift_core::model::{Analysis, AnalysisModuleType, AnalysisRequest, ObservableHandle, RootAnalysis};
use sift_core::system::{
    LockService, ModuleRegistry, RequestTracker, ResultCache, RootStore, SystemError, WorkQueue,
};

impl From<StoreError> for SystemError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::LockBusy { key } => SystemError::LockBusy { key },
            StoreError::DuplicateModule { name, version } => {
                SystemError::DuplicateModule { name, version }
            }
            StoreError::UnknownWorkQueue { name } => SystemError::UnknownWorkQueue { name },
            other => SystemError::Backend(Box::new(other)),
        }
    }
}

impl LockService for SqliteStore {
    fn acquire(
        &mut self,
        key: &str,
        existing: Option<&str>,
        ttl_ms: i64,
    ) -> Result<String, SystemError> {
        Ok(self.lock_acquire(key, existing, ttl_ms)?)
    }

    fn release(&mut self, key: &str, lock_id: &str) -> Result<bool, SystemError> {
        Ok(self.lock_release(key, lock_id)?)
    }

    fn is_locked(&mut self, key: &str) -> Result<bool, SystemError> {
        Ok(self.lock_is_locked(key)?)
    }
}

impl ModuleRegistry for SqliteStore {
    fn register_module(&mut self, module: &AnalysisModuleType) -> Result<(), SystemError> {
        Ok(self.module_register(module)?)
    }

    fn get_module(&mut self, name: &str) -> Result<Option<AnalysisModuleType>, SystemError> {
        Ok(self.module_get(name)?)
    }

    fn all_modules(&mut self) -> Result<Vec<AnalysisModuleType>, SystemError> {
        Ok(self.module_all()?)
    }
}

impl RequestTracker for SqliteStore {
    fn track_request(&mut self, request: &AnalysisRequest) -> Result<(), SystemError> {
        Ok(self.request_track(request)?)
    }

    fn get_request(&mut self, id: RequestId) -> Result<Option<AnalysisRequest>, SystemError> {
        Ok(self.request_get(id)?)
    }

    fn get_request_by_observable(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<Option<AnalysisRequest>, SystemError> {
        Ok(self.request_get_by_observable(handle, module)?)
    }

    fn delete_request(&mut self, id: RequestId) -> Result<bool, SystemError> {
        Ok(self.request_delete(id)?)
    }
}

impl ResultCache for SqliteStore {
    fn cache_analysis(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
        analysis: &Analysis,
    ) -> Result<Option<String>, SystemError> {
        Ok(self.cache_put(handle, module, analysis)?)
    }

    fn get_cached_analysis(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<Option<Analysis>, SystemError> {
        Ok(self.cache_get(handle, module)?)
    }
}

impl WorkQueue for SqliteStore {
    fn add_work_queue(&mut self, name: &str) -> Result<(), SystemError> {
        Ok(self.work_queue_add(name)?)
    }

    fn submit_request(&mut self, request: &mut AnalysisRequest) -> Result<(), SystemError> {
        Ok(self.queue_submit(request)?)
    }

    fn next_request(
        &mut self,
        owner: &WorkerId,
        module: &AnalysisModuleType,
        timeout_ms: u64,
    ) -> Result<Option<AnalysisRequest>, SystemError> {
        Ok(self.queue_next(owner, module, timeout_ms)?)
    }

    fn queue_size(&mut self, name: &str) -> Result<usize, SystemError> {
        Ok(SqliteStore::queue_size(self, name)?)
    }
}

impl RootStore for SqliteStore {
    fn save_root(&mut self, root: &RootAnalysis) -> Result<(), SystemError> {
        Ok(self.root_save(root)?)
    }

    fn load_root(&mut self, id: RootId) -> Result<Option<RootAnalysis>, SystemError> {
        Ok(self.root_load(id)?)
    }
}
