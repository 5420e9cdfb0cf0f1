//! # persona-jobs
//!
//! Background loops for persona-engine: the reclassification worker
//! (claims jobs from the durable store and drives batched
//! reclassification) and the metrics snapshotter (periodic read-only
//! coverage aggregation).
//!
//! Both are interval-based poll loops, safe to run as multiple replicas:
//! job mutual exclusion lives entirely in the job store's atomic
//! conditional updates, and snapshotting is purely additive.

pub mod metrics;
pub mod worker;

/// Default polling interval in milliseconds when the queue is empty.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = persona_core::defaults::POLL_INTERVAL_MS;

pub use metrics::{build_snapshot, MetricsSnapshotter, SnapshotterConfig, SnapshotterHandle};
pub use worker::{ReclassificationWorker, WorkerConfig, WorkerEvent, WorkerHandle};
