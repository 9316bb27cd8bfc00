#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError, now_ms};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use sift_core::ids::WorkerId;
use sift_core::model::{AnalysisModuleType, AnalysisRequest, RequestStatus};
use std::time::{Duration, Instant};

const QUEUE_POLL_MS: u64 = 25;
const MIN_CLAIM_TTL_MS: i64 = 1_000;
const MAX_CLAIM_TTL_MS: i64 = 3_600_000; // 1 hour

impl SqliteStore {
    pub fn work_queue_add(&mut self, name: &str) -> Result<(), StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("queue name must not be empty"));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO work_queues(name, created_at_ms) VALUES (?1, ?2)",
            params![name, now_ms()],
        )?;
        Ok(())
    }

    pub fn work_queue_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM work_queues WHERE name=?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn queue_size(&mut self, name: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE queue=?1 AND status='QUEUED'",
            params![name],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Track the request and enqueue it: status QUEUED, owner cleared.
    /// Fails when the target module has no registered queue.
    pub fn queue_submit(&mut self, request: &mut AnalysisRequest) -> Result<(), StoreError> {
        let Some(module) = request.module() else {
            return Err(StoreError::InvalidInput(
                "only observable requests can be queued",
            ));
        };
        let queue = module.name.clone();
        if !self.work_queue_exists(&queue)? {
            return Err(StoreError::UnknownWorkQueue { name: queue });
        }

        request.owner = None;
        request.status = RequestStatus::Queued;
        self.request_track(request)?;
        Ok(())
    }

    /// One claim attempt: requeue expired claims for this queue, then
    /// atomically hand the earliest QUEUED request to `owner`. The claim
    /// UPDATE is guarded by the QUEUED status, so of two racing claimants
    /// exactly one wins.
    pub fn queue_take(
        &mut self,
        owner: &WorkerId,
        module: &AnalysisModuleType,
    ) -> Result<Option<AnalysisRequest>, StoreError> {
        let queue = module.name.as_str();
        let now_ms = now_ms();
        let claim_ttl_ms = module.claim_ttl_ms.clamp(MIN_CLAIM_TTL_MS, MAX_CLAIM_TTL_MS);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if tx
            .query_row(
                "SELECT 1 FROM work_queues WHERE name=?1",
                params![queue],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_none()
        {
            return Err(StoreError::UnknownWorkQueue {
                name: queue.to_string(),
            });
        }

        // Requeue requests whose claim deadline lapsed: the worker that held
        // them never resubmitted, so the work goes back to the queue. Their
        // eventual late resubmission fails the ownership check upstream.
        let expired: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, request_json FROM requests \
                 WHERE queue=?1 AND status='ANALYZING' AND claim_expires_at_ms IS NOT NULL \
                   AND claim_expires_at_ms <= ?2",
            )?;
            let mut rows = stmt.query(params![queue, now_ms])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push((row.get(0)?, row.get(1)?));
            }
            out
        };
        for (id, request_json) in expired {
            let mut request: AnalysisRequest = serde_json::from_str(&request_json)?;
            request.owner = None;
            request.status = RequestStatus::Queued;
            tx.execute(
                "UPDATE requests SET status='QUEUED', owner=NULL, claim_expires_at_ms=NULL, \
                 request_json=?2, updated_at_ms=?3 WHERE id=?1 AND status='ANALYZING'",
                params![id, serde_json::to_string(&request)?, now_ms],
            )?;
        }

        let candidate: Option<(String, String)> = tx
            .query_row(
                "SELECT id, request_json FROM requests \
                 WHERE queue=?1 AND status='QUEUED' \
                 ORDER BY created_at_ms ASC, rowid ASC LIMIT 1",
                params![queue],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((id, request_json)) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        let mut request: AnalysisRequest = serde_json::from_str(&request_json)?;
        request.owner = Some(owner.clone());
        request.status = RequestStatus::Analyzing;
        let claim_expires_at_ms = now_ms.saturating_add(claim_ttl_ms);

        let changed = tx.execute(
            "UPDATE requests SET status='ANALYZING', owner=?2, claim_expires_at_ms=?3, \
             request_json=?4, updated_at_ms=?5 WHERE id=?1 AND status='QUEUED'",
            params![
                id,
                owner.as_str(),
                claim_expires_at_ms,
                serde_json::to_string(&request)?,
                now_ms
            ],
        )?;
        tx.commit()?;

        if changed == 1 { Ok(Some(request)) } else { Ok(None) }
    }

    /// Claim the next request for the module, polling up to `timeout_ms`.
    pub fn queue_next(
        &mut self,
        owner: &WorkerId,
        module: &AnalysisModuleType,
        timeout_ms: u64,
    ) -> Result<Option<AnalysisRequest>, StoreError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(request) = self.queue_take(owner, module)? {
                return Ok(Some(request));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(QUEUE_POLL_MS));
        }
    }
}
