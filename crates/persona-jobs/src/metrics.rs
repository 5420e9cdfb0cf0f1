//! Metrics snapshotter: periodic read-only coverage aggregation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, instrument};

use persona_core::{
    defaults, new_v7, MetricsRollup, MetricsSnapshot, MetricsSource, Result, SnapshotDeltas,
    SnapshotRepository,
};

/// Configuration for the metrics snapshotter.
#[derive(Debug, Clone)]
pub struct SnapshotterConfig {
    /// Interval between snapshots in seconds.
    pub interval_secs: u64,
    /// Snapshots older than this many days are pruned after each run.
    pub retention_days: i64,
    /// Number of keywords in the top-usage list.
    pub top_keywords: usize,
    /// Whether to enable snapshotting.
    pub enabled: bool,
}

impl Default for SnapshotterConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::SNAPSHOT_INTERVAL_SECS,
            retention_days: defaults::SNAPSHOT_RETENTION_DAYS,
            top_keywords: defaults::TOP_KEYWORDS,
            enabled: true,
        }
    }
}

impl SnapshotterConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `METRICS_SNAPSHOT_ENABLED` | `true` | Enable/disable snapshotting |
    /// | `METRICS_SNAPSHOT_INTERVAL_SECS` | `21600` | Interval between snapshots |
    /// | `METRICS_RETENTION_DAYS` | `90` | Snapshot retention window |
    pub fn from_env() -> Self {
        let enabled = std::env::var("METRICS_SNAPSHOT_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let interval_secs = std::env::var("METRICS_SNAPSHOT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::SNAPSHOT_INTERVAL_SECS);

        let retention_days = std::env::var("METRICS_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::SNAPSHOT_RETENTION_DAYS);

        Self {
            interval_secs,
            retention_days,
            top_keywords: defaults::TOP_KEYWORDS,
            enabled,
        }
    }

    /// Set the snapshot interval.
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Set the retention window.
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    /// Enable or disable snapshotting.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Handle for controlling a running snapshotter.
pub struct SnapshotterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SnapshotterHandle {
    /// Signal the snapshotter to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| persona_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }
}

/// Periodic metrics snapshotter.
///
/// Runs on its own timer, independent of the reclassification worker;
/// both read the contact collection but neither writes the other's data.
pub struct MetricsSnapshotter {
    source: Arc<dyn MetricsSource>,
    snapshots: Arc<dyn SnapshotRepository>,
    config: SnapshotterConfig,
}

impl MetricsSnapshotter {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        snapshots: Arc<dyn SnapshotRepository>,
        config: SnapshotterConfig,
    ) -> Self {
        Self {
            source,
            snapshots,
            config,
        }
    }

    /// Start the snapshotter and return a handle for control.
    pub fn start(self) -> SnapshotterHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        SnapshotterHandle { shutdown_tx }
    }

    /// Run the snapshot loop: one snapshot immediately, then one per
    /// interval. A failed tick is logged and retried at the next
    /// interval, never in a tight loop.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Metrics snapshotter is disabled, not starting");
            return;
        }

        info!(
            interval_secs = self.config.interval_secs,
            retention_days = self.config.retention_days,
            "Metrics snapshotter started"
        );

        let interval = Duration::from_secs(self.config.interval_secs);

        loop {
            if let Err(e) = self.tick().await {
                error!(error = ?e, "Metrics snapshot failed");
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Metrics snapshotter received shutdown signal");
                    break;
                }
                _ = sleep(interval) => {}
            }
        }

        info!("Metrics snapshotter stopped");
    }

    /// Take one snapshot: collect, diff against the previous snapshot,
    /// persist, prune.
    pub async fn tick(&self) -> Result<MetricsSnapshot> {
        let start = Instant::now();

        let rollup = self.source.collect().await?;
        let previous = self.snapshots.latest().await?;
        let snapshot = build_snapshot(
            rollup,
            previous.as_ref(),
            self.config.top_keywords,
            Utc::now(),
        );
        self.snapshots.insert(&snapshot).await?;

        let pruned = self.snapshots.prune(self.config.retention_days).await?;

        info!(
            subsystem = "metrics",
            component = "snapshotter",
            op = "snapshot",
            total_contacts = snapshot.total_contacts,
            classification_coverage_pct = snapshot.classification_coverage_pct,
            pruned,
            duration_ms = start.elapsed().as_millis() as u64,
            "Metrics snapshot taken"
        );

        Ok(snapshot)
    }
}

fn pct(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Build one snapshot from a rollup and the previous snapshot.
///
/// Pure function: all the delta/top-N/coverage arithmetic lives here so
/// it can be exercised without storage.
pub fn build_snapshot(
    rollup: MetricsRollup,
    previous: Option<&MetricsSnapshot>,
    top_n: usize,
    taken_at: DateTime<Utc>,
) -> MetricsSnapshot {
    let classification_coverage_pct = pct(rollup.classified_contacts, rollup.total_contacts);
    let normalization_coverage_pct = pct(rollup.with_normalized_title, rollup.with_title);

    let mut usage = rollup.keyword_usage;
    usage.sort_by(|a, b| b.contacts.cmp(&a.contacts).then(a.keyword.cmp(&b.keyword)));

    let top_keywords = usage
        .iter()
        .filter(|k| k.contacts > 0)
        .take(top_n)
        .cloned()
        .collect();
    let unused_keywords = usage
        .iter()
        .filter(|k| k.contacts == 0)
        .map(|k| k.keyword.clone())
        .collect();

    let deltas = previous.map(|prev| SnapshotDeltas {
        total_contacts: rollup.total_contacts - prev.total_contacts,
        classified_contacts: rollup.classified_contacts - prev.classified_contacts,
        locked_contacts: rollup.locked_contacts - prev.locked_contacts,
        manually_assigned_contacts: rollup.manually_assigned_contacts
            - prev.manually_assigned_contacts,
        classification_coverage_pct: classification_coverage_pct
            - prev.classification_coverage_pct,
    });

    MetricsSnapshot {
        id: new_v7(),
        taken_at,
        total_contacts: rollup.total_contacts,
        classified_contacts: rollup.classified_contacts,
        locked_contacts: rollup.locked_contacts,
        manually_assigned_contacts: rollup.manually_assigned_contacts,
        with_title: rollup.with_title,
        with_normalized_title: rollup.with_normalized_title,
        classification_coverage_pct,
        normalization_coverage_pct,
        persona_counts: rollup.persona_counts,
        keyword_usage: usage,
        top_keywords,
        unused_keywords,
        deltas,
    }
}
