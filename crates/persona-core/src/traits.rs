//! Core traits for persona-engine abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability. The
//! Postgres implementations live in `persona-db`; the worker and
//! classifier tests run against in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// CATALOG
// =============================================================================

/// Read access to the persona/keyword catalog (owned by the admin CRUD
/// layer, read-only here).
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Load personas and keywords in one consistent read. Personas are
    /// returned in ascending priority order.
    async fn load_catalog(&self) -> Result<Catalog>;

    /// Look up a single keyword by id (filter resolution).
    async fn get_keyword(&self, id: Uuid) -> Result<Option<JobKeyword>>;

    /// Look up a single persona by id.
    async fn get_persona(&self, id: Uuid) -> Result<Option<BuyerPersona>>;
}

// =============================================================================
// CONTACTS
// =============================================================================

/// Access to the contact fields this service owns.
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Fetch the next batch of contacts matching `query`, in stable `id`
    /// order, starting strictly after `cursor`. Stable ordering is what
    /// makes progress counters monotonic and re-scans idempotent.
    async fn fetch_batch(
        &self,
        query: &ContactQuery,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Contact>>;

    /// Apply a persona assignment and refresh the cached normalized
    /// title. Returns false when nothing was written — the contact is
    /// gone or became locked since it was read; the lock is re-checked
    /// in the WHERE clause of the update itself.
    async fn apply_assignment(
        &self,
        contact_id: Uuid,
        persona_id: Uuid,
        normalized_title: &str,
    ) -> Result<bool>;

    /// Set or clear manual-override protection. Returns false when the
    /// contact does not exist.
    async fn set_lock(&self, contact_id: Uuid, locked: bool) -> Result<bool>;

    /// Fetch a single contact.
    async fn get(&self, id: Uuid) -> Result<Option<Contact>>;
}

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable store for reclassification jobs. Status transitions are owned
/// exclusively by the claiming worker; coordination between replicas
/// happens through the atomic conditional updates below.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a job with status `pending` and zero counters.
    async fn create(&self, req: CreateJobRequest) -> Result<Uuid>;

    /// Atomically claim the oldest `pending` job, or any `processing`
    /// job whose heartbeat is older than `orphan_timeout` (crash
    /// recovery). Returns `None` when there is nothing to do or another
    /// worker won the race — never an error for the loser.
    async fn claim_next(
        &self,
        worker_id: &str,
        orphan_timeout: Duration,
    ) -> Result<Option<ReclassificationJob>>;

    /// Persist counters and heartbeat, conditional on `worker_id` still
    /// owning the row, and report the current status in the same round
    /// trip so the worker observes cancellation between batches.
    ///
    /// Returns `None` when ownership was lost (the job was adopted by
    /// another worker after a stale heartbeat); the caller must stop
    /// silently.
    async fn checkpoint(
        &self,
        job_id: Uuid,
        worker_id: &str,
        counters: &JobCounters,
    ) -> Result<Option<JobStatus>>;

    /// Append audit-trail entries.
    async fn record_changes(&self, job_id: Uuid, entries: &[ChangeEntry]) -> Result<()>;

    /// Mark a job completed with its final counters (conditional on
    /// ownership).
    async fn complete(&self, job_id: Uuid, worker_id: &str, counters: &JobCounters) -> Result<()>;

    /// Record a failed attempt: back to `pending` while attempts remain,
    /// `failed` with the error message once they are exhausted.
    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<()>;

    /// Cancel a `pending` or `processing` job. Returns false when the
    /// job was already terminal.
    async fn cancel(&self, job_id: Uuid) -> Result<bool>;

    /// Reset a `failed` or `cancelled` job to `pending` with attempts
    /// cleared. Returns false for non-terminal jobs.
    async fn retry(&self, job_id: Uuid) -> Result<bool>;

    /// Fetch a job by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<ReclassificationJob>>;

    /// Latest audit-trail entries for a job.
    async fn changes(&self, job_id: Uuid, limit: i64) -> Result<Vec<ChangeRecord>>;

    /// Most recently created jobs.
    async fn list_recent(&self, limit: i64) -> Result<Vec<ReclassificationJob>>;
}

// =============================================================================
// METRICS
// =============================================================================

/// Read-only aggregation over the contact and keyword collections.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn collect(&self) -> Result<MetricsRollup>;
}

/// Durable store for metrics snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert one immutable snapshot row.
    async fn insert(&self, snapshot: &MetricsSnapshot) -> Result<()>;

    /// The most recent snapshot, if any.
    async fn latest(&self) -> Result<Option<MetricsSnapshot>>;

    /// Snapshots taken within the last `days`, newest first.
    async fn history(&self, days: i64) -> Result<Vec<MetricsSnapshot>>;

    /// Delete snapshots older than the retention window. Returns the
    /// number of rows removed.
    async fn prune(&self, retention_days: i64) -> Result<i64>;
}
