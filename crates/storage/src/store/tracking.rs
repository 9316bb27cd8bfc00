#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError, now_ms};
use rusqlite::{OptionalExtension, params};
use sift_core::ids::RequestId;
use sift_core::model::{AnalysisModuleType, AnalysisRequest, ObservableHandle};

impl SqliteStore {
    /// Track (upsert by id) the given request. The queue and cache-key
    /// columns are derived from the request's target so dedup lookups and
    /// queue claims can be served by index. Claim bookkeeping columns are
    /// left to the queue operations.
    pub fn request_track(&mut self, request: &AnalysisRequest) -> Result<(), StoreError> {
        let request_json = serde_json::to_string(request)?;
        let queue = request.module().map(|m| m.name.clone());
        let cache_key = request.cache_key();
        let now_ms = now_ms();

        self.conn.execute(
            r#"
            INSERT INTO requests(
              id, root_id, queue, cache_key, status, owner, claim_expires_at_ms,
              request_json, created_at_ms, updated_at_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?8, ?8)
            ON CONFLICT(id) DO UPDATE SET
              root_id=excluded.root_id,
              queue=excluded.queue,
              cache_key=excluded.cache_key,
              status=excluded.status,
              owner=excluded.owner,
              request_json=excluded.request_json,
              updated_at_ms=excluded.updated_at_ms
            "#,
            params![
                request.id.to_string(),
                request.root_id.to_string(),
                queue,
                cache_key,
                request.status.as_str(),
                request.owner.as_ref().map(|o| o.as_str().to_string()),
                request_json,
                now_ms,
            ],
        )?;
        Ok(())
    }

    pub fn request_get(&mut self, id: RequestId) -> Result<Option<AnalysisRequest>, StoreError> {
        let request_json: Option<String> = self
            .conn
            .query_row(
                "SELECT request_json FROM requests WHERE id=?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match request_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// The currently tracked request for this exact (observable, module)
    /// pair. Always None for non-cacheable modules: they never take part in
    /// cross-root dedup.
    pub fn request_get_by_observable(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<Option<AnalysisRequest>, StoreError> {
        let Some(cache_key) = module.cache_key(handle) else {
            return Ok(None);
        };
        let request_json: Option<String> = self
            .conn
            .query_row(
                "SELECT request_json FROM requests WHERE cache_key=?1 \
                 ORDER BY created_at_ms ASC, rowid ASC LIMIT 1",
                params![cache_key],
                |row| row.get(0),
            )
            .optional()?;
        match request_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn request_delete(&mut self, id: RequestId) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "DELETE FROM requests WHERE id=?1",
            params![id.to_string()],
        )?;
        Ok(changed == 1)
    }
}
