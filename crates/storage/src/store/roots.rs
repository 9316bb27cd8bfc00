#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError, now_ms};
use rusqlite::{OptionalExtension, params};
use sift_core::ids::RootId;
use sift_core::model::RootAnalysis;

impl SqliteStore {
    pub fn root_save(&mut self, root: &RootAnalysis) -> Result<(), StoreError> {
        let root_json = serde_json::to_string(root)?;
        let now_ms = now_ms();
        self.conn.execute(
            r#"
            INSERT INTO roots(id, root_json, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(id) DO UPDATE SET
              root_json=excluded.root_json,
              updated_at_ms=excluded.updated_at_ms
            "#,
            params![root.id.to_string(), root_json, now_ms],
        )?;
        Ok(())
    }

    pub fn root_load(&mut self, id: RootId) -> Result<Option<RootAnalysis>, StoreError> {
        let root_json: Option<String> = self
            .conn
            .query_row(
                "SELECT root_json FROM roots WHERE id=?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match root_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
