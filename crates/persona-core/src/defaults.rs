//! Centralized default constants for persona-engine.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// RECLASSIFICATION WORKER
// =============================================================================

/// Polling interval for the reclassification worker when the queue is empty.
pub const POLL_INTERVAL_MS: u64 = 30_000;

/// Contacts processed per batch before a heartbeat/progress checkpoint.
pub const BATCH_SIZE: i64 = 500;

/// A `processing` job whose heartbeat is older than this is considered
/// orphaned and becomes claimable by any worker.
pub const ORPHAN_TIMEOUT_SECS: u64 = 300;

/// Maximum execution attempts before a job is marked `failed`.
pub const MAX_ATTEMPTS: i32 = 3;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// METRICS SNAPSHOTTER
// =============================================================================

/// Interval between metrics snapshots (6 hours).
pub const SNAPSHOT_INTERVAL_SECS: u64 = 21_600;

/// Snapshots older than this many days are pruned.
pub const SNAPSHOT_RETENTION_DAYS: i64 = 90;

/// Number of keywords reported in the top-usage list.
pub const TOP_KEYWORDS: usize = 10;

// =============================================================================
// API
// =============================================================================

/// Change-log entries returned in a job status response.
pub const CHANGE_LOG_EXCERPT: i64 = 50;

/// Default page size for job listings.
pub const JOB_LIST_LIMIT: i64 = 50;

/// Default HTTP bind address.
pub const BIND_ADDR: &str = "0.0.0.0:8700";
