//! Reclassification job store.
//!
//! The job table is a finite-state machine (`pending → processing →
//! completed | failed | cancelled`) driven entirely by atomic conditional
//! updates, so any number of worker replicas can poll it safely: claiming
//! uses `FOR UPDATE SKIP LOCKED`, and every subsequent write is
//! conditional on the claiming worker still owning the row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use persona_core::{
    new_v7, ChangeEntry, ChangeRecord, CreateJobRequest, Error, JobCounters, JobRepository,
    JobStatus, ReclassificationJob, Result,
};

const JOB_COLUMNS: &str = "id, status, filter, dry_run, scanned, changed, skipped_locked, \
     errors, attempts, max_attempts, error_message, worker_id, last_heartbeat, \
     created_at, updated_at, started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgReclassificationJobRepository {
    pool: Pool<Postgres>,
}

impl PgReclassificationJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert JobStatus to string for database.
    fn job_status_to_str(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Convert string from database to JobStatus.
    fn str_to_job_status(s: &str) -> JobStatus {
        match s {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Pending, // fallback
        }
    }

    /// Parse a job row into a ReclassificationJob struct.
    ///
    /// Fallible because the filter descriptor is stored as JSONB; a row
    /// with an undecodable filter must surface as a serialization error
    /// rather than silently widening into an all-contacts scan.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<ReclassificationJob> {
        let status: String = row.get("status");
        let filter: JsonValue = row.get("filter");
        Ok(ReclassificationJob {
            id: row.get("id"),
            status: Self::str_to_job_status(&status),
            filter: serde_json::from_value(filter)?,
            dry_run: row.get("dry_run"),
            counters: JobCounters {
                scanned: row.get("scanned"),
                changed: row.get("changed"),
                skipped_locked: row.get("skipped_locked"),
                errors: row.get("errors"),
            },
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            error_message: row.get("error_message"),
            worker_id: row.get("worker_id"),
            last_heartbeat: row.get("last_heartbeat"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    fn parse_change_row(row: sqlx::postgres::PgRow) -> ChangeRecord {
        ChangeRecord {
            id: row.get("id"),
            job_id: row.get("job_id"),
            contact_id: row.get("contact_id"),
            persona_before: row.get("persona_before"),
            persona_after: row.get("persona_after"),
            applied: row.get("applied"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl JobRepository for PgReclassificationJobRepository {
    async fn create(&self, req: CreateJobRequest) -> Result<Uuid> {
        let job_id = new_v7();
        let now = Utc::now();
        let filter = serde_json::to_value(&req.filter)?;

        sqlx::query(
            "INSERT INTO reclassification_job
                 (id, status, filter, dry_run, max_attempts, created_at, updated_at)
             VALUES ($1, 'pending', $2, $3, $4, $5, $5)",
        )
        .bind(job_id)
        .bind(&filter)
        .bind(req.dry_run)
        .bind(persona_core::defaults::MAX_ATTEMPTS)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        orphan_timeout: Duration,
    ) -> Result<Option<ReclassificationJob>> {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(orphan_timeout)
                .map_err(|e| Error::Job(format!("invalid orphan timeout: {e}")))?;

        // FOR UPDATE SKIP LOCKED makes the claim race-free across
        // replicas: the losing worker's subquery skips the locked row
        // and claims the next candidate (or none), never erroring.
        // The second arm of the predicate is the crash-recovery path:
        // a worker that died mid-batch leaves the job `processing` with
        // a stale heartbeat, and a healthy worker adopts it here.
        let row = sqlx::query(&format!(
            "UPDATE reclassification_job
             SET status = 'processing', worker_id = $1, last_heartbeat = $2,
                 started_at = COALESCE(started_at, $2), updated_at = $2
             WHERE id = (
                 SELECT id FROM reclassification_job
                 WHERE status = 'pending'
                    OR (status = 'processing' AND last_heartbeat < $3)
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker_id)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn checkpoint(
        &self,
        job_id: Uuid,
        worker_id: &str,
        counters: &JobCounters,
    ) -> Result<Option<JobStatus>> {
        // One round trip: persist counters + heartbeat and read back the
        // status, so the worker sees a cooperative cancellation here.
        // 'cancelled' stays updatable so final counters for changes that
        // were already committed are not discarded.
        let status: Option<String> = sqlx::query_scalar(
            "UPDATE reclassification_job
             SET scanned = $3, changed = $4, skipped_locked = $5, errors = $6,
                 last_heartbeat = $7, updated_at = $7
             WHERE id = $1 AND worker_id = $2
               AND status IN ('processing', 'cancelled')
             RETURNING status",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(counters.scanned)
        .bind(counters.changed)
        .bind(counters.skipped_locked)
        .bind(counters.errors)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(status.map(|s| Self::str_to_job_status(&s)))
    }

    async fn record_changes(&self, job_id: Uuid, entries: &[ChangeEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO reclassification_change
                     (id, job_id, contact_id, persona_before, persona_after, applied, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(new_v7())
            .bind(job_id)
            .bind(entry.contact_id)
            .bind(entry.persona_before)
            .bind(entry.persona_after)
            .bind(entry.applied)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        counters: &JobCounters,
    ) -> Result<()> {
        // Conditional on ownership and a live `processing` status; a job
        // cancelled or adopted after the final batch stays as it is.
        sqlx::query(
            "UPDATE reclassification_job
             SET status = 'completed', scanned = $3, changed = $4, skipped_locked = $5,
                 errors = $6, completed_at = $7, updated_at = $7, last_heartbeat = $7
             WHERE id = $1 AND worker_id = $2 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(counters.scanned)
        .bind(counters.changed)
        .bind(counters.skipped_locked)
        .bind(counters.errors)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<()> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Get current attempt counters; bail silently if this worker no
        // longer owns the job.
        let row = sqlx::query(
            "SELECT attempts, max_attempts FROM reclassification_job
             WHERE id = $1 AND worker_id = $2 AND status = 'processing'
             FOR UPDATE",
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(());
        };

        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");
        let new_attempts = attempts + 1;

        if new_attempts < max_attempts {
            // Retry: reset to pending for any worker to pick up at its
            // next poll (no tight-loop retry).
            sqlx::query(
                "UPDATE reclassification_job
                 SET status = 'pending', attempts = $2, error_message = $3,
                     worker_id = NULL, last_heartbeat = NULL, updated_at = $4
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(new_attempts)
            .bind(error)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        } else {
            // Attempts exhausted: terminal failure.
            sqlx::query(
                "UPDATE reclassification_job
                 SET status = 'failed', attempts = $2, error_message = $3,
                     completed_at = $4, updated_at = $4
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(new_attempts)
            .bind(error)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reclassification_job
             SET status = 'cancelled', completed_at = $2, updated_at = $2
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn retry(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reclassification_job
             SET status = 'pending', attempts = 0, error_message = NULL,
                 worker_id = NULL, last_heartbeat = NULL, started_at = NULL,
                 completed_at = NULL, scanned = 0, changed = 0,
                 skipped_locked = 0, errors = 0, updated_at = $2
             WHERE id = $1 AND status IN ('failed', 'cancelled')",
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ReclassificationJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM reclassification_job WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn changes(&self, job_id: Uuid, limit: i64) -> Result<Vec<ChangeRecord>> {
        let rows = sqlx::query(
            "SELECT id, job_id, contact_id, persona_before, persona_after, applied, created_at
             FROM reclassification_change
             WHERE job_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_change_row).collect())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<ReclassificationJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM reclassification_job
             ORDER BY created_at DESC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
