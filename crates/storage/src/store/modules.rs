#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError, now_ms};
use rusqlite::{OptionalExtension, params};
use sift_core::model::AnalysisModuleType;

const MAX_MODULE_NAME_LEN: usize = 128;

fn normalize_module_name(raw: &str) -> Result<&str, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("module name must not be empty"));
    }
    if raw.len() > MAX_MODULE_NAME_LEN {
        return Err(StoreError::InvalidInput("module name too long"));
    }
    Ok(raw)
}

impl SqliteStore {
    /// Register a module type. The exact same name+version pair fails;
    /// a different version for an existing name replaces the registration.
    pub fn module_register(&mut self, module: &AnalysisModuleType) -> Result<(), StoreError> {
        let name = normalize_module_name(&module.name)?;
        if module.version.trim().is_empty() {
            return Err(StoreError::InvalidInput("module version must not be empty"));
        }
        let module_json = serde_json::to_string(module)?;
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        let existing_version: Option<String> = tx
            .query_row(
                "SELECT version FROM modules WHERE name=?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if existing_version.as_deref() == Some(module.version.as_str()) {
            return Err(StoreError::DuplicateModule {
                name: name.to_string(),
                version: module.version.clone(),
            });
        }

        tx.execute(
            r#"
            INSERT INTO modules(name, version, module_json, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(name) DO UPDATE SET
              version=excluded.version,
              module_json=excluded.module_json,
              updated_at_ms=excluded.updated_at_ms
            "#,
            params![name, module.version, module_json, now_ms],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn module_get(&mut self, name: &str) -> Result<Option<AnalysisModuleType>, StoreError> {
        let name = normalize_module_name(name)?;
        let module_json: Option<String> = self
            .conn
            .query_row(
                "SELECT module_json FROM modules WHERE name=?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match module_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn module_all(&mut self) -> Result<Vec<AnalysisModuleType>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT module_json FROM modules ORDER BY name ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            out.push(serde_json::from_str(&json)?);
        }
        Ok(out)
    }
}
