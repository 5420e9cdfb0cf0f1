//! Structured logging schema and field name constants for persona-engine.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (per-contact decisions) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → job → sub-calls.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "classify", "db", "jobs", "metrics"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "cache", "worker", "snapshotter", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "classify", "claim_next", "checkpoint", "snapshot"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Reclassification job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Contact UUID being operated on.
pub const CONTACT_ID: &str = "contact_id";

/// Buyer persona UUID.
pub const PERSONA_ID: &str = "persona_id";

/// Worker identifier owning a claimed job.
pub const WORKER_ID: &str = "worker_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Contacts examined so far in a job.
pub const SCANNED: &str = "scanned";

/// Contacts whose persona changed (or would change in dry-run).
pub const CHANGED: &str = "changed";

/// Contacts skipped because of a manual-override lock.
pub const SKIPPED_LOCKED: &str = "skipped_locked";

/// Catalog cache generation in effect.
pub const CACHE_GENERATION: &str = "cache_generation";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
