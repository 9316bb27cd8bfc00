#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError, now_ms};
use rusqlite::{OptionalExtension, params};
use sift_core::model::{Analysis, AnalysisModuleType, ObservableHandle};

impl SqliteStore {
    /// Store an analysis result under its (observable, module) cache key.
    /// Returns the key, or None (no-op) for non-cacheable modules.
    pub fn cache_put(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
        analysis: &Analysis,
    ) -> Result<Option<String>, StoreError> {
        let Some(cache_key) = module.cache_key(handle) else {
            return Ok(None);
        };
        let now_ms = now_ms();
        let expires_at_ms = module.cache_ttl_ms.map(|ttl| now_ms.saturating_add(ttl));
        self.conn.execute(
            r#"
            INSERT INTO cache(cache_key, analysis_json, expires_at_ms, cached_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(cache_key) DO UPDATE SET
              analysis_json=excluded.analysis_json,
              expires_at_ms=excluded.expires_at_ms,
              cached_at_ms=excluded.cached_at_ms
            "#,
            params![cache_key, serde_json::to_string(analysis)?, expires_at_ms, now_ms],
        )?;
        Ok(Some(cache_key))
    }

    /// A cached result that has not outlived the module's cache TTL.
    /// Expired entries are dropped on read.
    pub fn cache_get(
        &mut self,
        handle: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<Option<Analysis>, StoreError> {
        let Some(cache_key) = module.cache_key(handle) else {
            return Ok(None);
        };
        let row: Option<(String, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT analysis_json, expires_at_ms FROM cache WHERE cache_key=?1",
                params![cache_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((analysis_json, expires_at_ms)) = row else {
            return Ok(None);
        };
        if expires_at_ms.is_some_and(|expires| expires <= now_ms()) {
            self.conn.execute(
                "DELETE FROM cache WHERE cache_key=?1",
                params![cache_key],
            )?;
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&analysis_json)?))
    }
}
