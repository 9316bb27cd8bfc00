#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError, now_ms};
use rusqlite::{OptionalExtension, params};

const MAX_LOCK_KEY_LEN: usize = 200;
const MIN_LOCK_TTL_MS: i64 = 10;
const MAX_LOCK_TTL_MS: i64 = 3_600_000; // 1 hour

fn normalize_lock_key(raw: &str) -> Result<&str, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("lock key must not be empty"));
    }
    if raw.len() > MAX_LOCK_KEY_LEN {
        return Err(StoreError::InvalidInput("lock key too long"));
    }
    Ok(raw)
}

impl SqliteStore {
    /// Acquire the lock for `key`. Passing the live holder's lock id in
    /// `existing` renews it (re-entrant acquisition). An expired lock is
    /// taken over regardless of who held it.
    pub fn lock_acquire(
        &mut self,
        key: &str,
        existing: Option<&str>,
        ttl_ms: i64,
    ) -> Result<String, StoreError> {
        let key = normalize_lock_key(key)?;
        let ttl_ms = ttl_ms.clamp(MIN_LOCK_TTL_MS, MAX_LOCK_TTL_MS);
        let now_ms = now_ms();
        let expires_at_ms = now_ms.saturating_add(ttl_ms);

        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let current: Option<(String, i64)> = tx
            .query_row(
                "SELECT lock_id, expires_at_ms FROM locks WHERE key=?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((holder, holder_expires_at_ms)) = current {
            if holder_expires_at_ms > now_ms {
                match existing {
                    Some(lock_id) if lock_id == holder => {
                        tx.execute(
                            "UPDATE locks SET expires_at_ms=?2 WHERE key=?1",
                            params![key, expires_at_ms],
                        )?;
                        tx.commit()?;
                        return Ok(holder);
                    }
                    _ => {
                        return Err(StoreError::LockBusy {
                            key: key.to_string(),
                        });
                    }
                }
            }
        }

        let lock_id = existing
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tx.execute(
            r#"
            INSERT INTO locks(key, lock_id, expires_at_ms, acquired_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
              lock_id=excluded.lock_id,
              expires_at_ms=excluded.expires_at_ms,
              acquired_at_ms=excluded.acquired_at_ms
            "#,
            params![key, lock_id, expires_at_ms, now_ms],
        )?;
        tx.commit()?;
        Ok(lock_id)
    }

    /// Release the lock if `lock_id` still holds it. Returns false when the
    /// key is not locked by that id.
    pub fn lock_release(&mut self, key: &str, lock_id: &str) -> Result<bool, StoreError> {
        let key = normalize_lock_key(key)?;
        let changed = self.conn.execute(
            "DELETE FROM locks WHERE key=?1 AND lock_id=?2",
            params![key, lock_id],
        )?;
        Ok(changed == 1)
    }

    pub fn lock_is_locked(&mut self, key: &str) -> Result<bool, StoreError> {
        let key = normalize_lock_key(key)?;
        let now_ms = now_ms();
        let expires_at_ms: Option<i64> = self
            .conn
            .query_row(
                "SELECT expires_at_ms FROM locks WHERE key=?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(expires_at_ms.is_some_and(|expires| expires > now_ms))
    }
}
