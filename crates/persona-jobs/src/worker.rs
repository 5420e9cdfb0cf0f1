//! Reclassification worker: claims jobs and drives batched
//! reclassification without blocking request-serving code.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use persona_classify::Classifier;
use persona_core::{
    defaults, new_v7, normalize, CatalogRepository, ChangeEntry, ContactQuery, ContactRepository,
    Error, JobCounters, JobFilter, JobRepository, JobStatus, ReclassificationJob, Result,
};

/// Configuration for the reclassification worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Contacts processed per batch before a checkpoint.
    pub batch_size: i64,
    /// Heartbeat age after which a `processing` job counts as orphaned.
    pub orphan_timeout_secs: u64,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Stable worker identifier; generated when not set.
    pub worker_id: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            batch_size: defaults::BATCH_SIZE,
            orphan_timeout_secs: defaults::ORPHAN_TIMEOUT_SECS,
            enabled: true,
            worker_id: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RECLASSIFY_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `RECLASSIFY_POLL_INTERVAL_MS` | `30000` | Polling interval when queue is empty |
    /// | `RECLASSIFY_BATCH_SIZE` | `500` | Contacts per batch |
    /// | `RECLASSIFY_ORPHAN_TIMEOUT_SECS` | `300` | Stale-heartbeat adoption threshold |
    /// | `RECLASSIFY_WORKER_ID` | generated | Stable worker identifier |
    pub fn from_env() -> Self {
        let enabled = std::env::var("RECLASSIFY_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var("RECLASSIFY_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::POLL_INTERVAL_MS);

        let batch_size = std::env::var("RECLASSIFY_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::BATCH_SIZE)
            .max(1);

        let orphan_timeout_secs = std::env::var("RECLASSIFY_ORPHAN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::ORPHAN_TIMEOUT_SECS);

        let worker_id = std::env::var("RECLASSIFY_WORKER_ID")
            .ok()
            .filter(|v| !v.is_empty());

        Self {
            poll_interval_ms,
            batch_size,
            orphan_timeout_secs,
            enabled,
            worker_id,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the orphan timeout.
    pub fn with_orphan_timeout(mut self, secs: u64) -> Self {
        self.orphan_timeout_secs = secs;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set a stable worker identifier.
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }
}

/// Event emitted by the reclassification worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was claimed and started.
    JobStarted { job_id: Uuid },
    /// A batch checkpoint landed.
    JobProgress { job_id: Uuid, counters: JobCounters },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, counters: JobCounters },
    /// A job observed its cancellation and stopped.
    JobCancelled { job_id: Uuid, counters: JobCounters },
    /// A job attempt failed.
    JobFailed { job_id: Uuid, error: String },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// How one job execution ended.
enum JobOutcome {
    Completed(JobCounters),
    Cancelled(JobCounters),
    /// Another worker adopted the job after our heartbeat went stale;
    /// stop without touching its status.
    Adopted,
}

/// Reclassification worker that processes jobs from the durable store.
pub struct ReclassificationWorker {
    jobs: Arc<dyn JobRepository>,
    contacts: Arc<dyn ContactRepository>,
    catalog: Arc<dyn CatalogRepository>,
    classifier: Arc<Classifier>,
    config: WorkerConfig,
    worker_id: String,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl ReclassificationWorker {
    /// Create a new worker.
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        contacts: Arc<dyn ContactRepository>,
        catalog: Arc<dyn CatalogRepository>,
        classifier: Arc<Classifier>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| new_v7().to_string());
        Self {
            jobs,
            contacts,
            catalog,
            classifier,
            config,
            worker_id,
            event_tx,
        }
    }

    /// This worker's identifier, as written into claimed job rows.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop.
    ///
    /// Jobs run one at a time per worker process: a reclassification job
    /// is itself a long batched scan, and cross-replica parallelism
    /// comes from running more workers, not more tasks. Sleeps only when
    /// the queue is empty.
    #[instrument(skip(self, shutdown_rx), fields(worker_id = %self.worker_id))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Reclassification worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            orphan_timeout_secs = self.config.orphan_timeout_secs,
            "Reclassification worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            // Check for shutdown before claiming a job
            if shutdown_rx.try_recv().is_ok() {
                info!("Reclassification worker received shutdown signal");
                break;
            }

            match self.claim_job().await {
                Some(job) => {
                    self.execute_job(job).await;
                    // No sleep — immediately try to claim the next job
                }
                None => {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Reclassification worker received shutdown signal");
                            break;
                        }
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Reclassification worker stopped");
    }

    /// Claim and execute jobs until the queue is empty. Returns the
    /// number of executions (retries of the same job count separately).
    pub async fn run_pending_once(&self) -> Result<usize> {
        let mut executed = 0;
        while let Some(job) = self
            .jobs
            .claim_next(&self.worker_id, self.orphan_timeout())
            .await?
        {
            self.execute_job(job).await;
            executed += 1;
        }
        Ok(executed)
    }

    fn orphan_timeout(&self) -> Duration {
        Duration::from_secs(self.config.orphan_timeout_secs)
    }

    /// Claim the next available job without processing it.
    async fn claim_job(&self) -> Option<ReclassificationJob> {
        match self
            .jobs
            .claim_next(&self.worker_id, self.orphan_timeout())
            .await
        {
            Ok(Some(job)) => Some(job),
            Ok(None) => None,
            Err(e) => {
                // Retried at the next scheduled poll, not in a tight loop.
                error!(error = ?e, "Failed to claim job");
                None
            }
        }
    }

    /// Execute a single claimed job and record its outcome.
    async fn execute_job(&self, job: ReclassificationJob) {
        let start = Instant::now();
        let job_id = job.id;

        info!(
            %job_id,
            filter = ?job.filter,
            dry_run = job.dry_run,
            attempts = job.attempts,
            "Processing reclassification job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id });

        match self.process(&job).await {
            Ok(JobOutcome::Completed(counters)) => {
                if let Err(e) = self.jobs.complete(job_id, &self.worker_id, &counters).await {
                    error!(error = ?e, %job_id, "Failed to mark job as completed");
                } else {
                    info!(
                        %job_id,
                        scanned = counters.scanned,
                        changed = counters.changed,
                        skipped_locked = counters.skipped_locked,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job completed"
                    );
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::JobCompleted { job_id, counters });
                }
            }
            Ok(JobOutcome::Cancelled(counters)) => {
                // Status and counters already persisted by the checkpoint
                // that observed the cancellation; changes committed before
                // it stay counted.
                info!(
                    %job_id,
                    scanned = counters.scanned,
                    changed = counters.changed,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job cancelled, stopping between batches"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCancelled { job_id, counters });
            }
            Ok(JobOutcome::Adopted) => {
                warn!(
                    %job_id,
                    "Job was adopted by another worker after a stale heartbeat; abandoning"
                );
            }
            Err(e) => {
                let error = e.to_string();
                if let Err(e) = self.jobs.fail(job_id, &self.worker_id, &error).await {
                    error!(error = ?e, %job_id, "Failed to record job failure");
                } else {
                    warn!(
                        %job_id,
                        %error,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job attempt failed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobFailed { job_id, error });
                }
            }
        }
    }

    /// Drive one job execution: resolve the filter, scan in stable
    /// batches, classify, and apply or record changes.
    ///
    /// Batch-scoped storage failures (fetch, audit insert, checkpoint)
    /// propagate and consume an attempt; a single contact whose update
    /// fails is counted in `errors` and skipped, since re-applying a
    /// correct classification is idempotent and a later run will repair
    /// it.
    async fn process(&self, job: &ReclassificationJob) -> Result<JobOutcome> {
        // Each job was most likely created because the catalog changed;
        // refresh the process-local cache before scanning.
        self.classifier.invalidate().await;

        let query = self.resolve_filter(&job.filter).await?;
        let mut counters = JobCounters::default();
        let mut cursor: Option<Uuid> = None;

        loop {
            let batch = self
                .contacts
                .fetch_batch(&query, cursor, self.config.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len() as i64;
            cursor = batch.last().map(|c| c.id);

            let mut entries: Vec<ChangeEntry> = Vec::new();
            for contact in &batch {
                counters.scanned += 1;

                if contact.buyer_persona_locked {
                    counters.skipped_locked += 1;
                    continue;
                }

                let title = contact.job_title.as_deref().unwrap_or("");
                let classification = self.classifier.classify(title).await?;

                if contact.buyer_persona == Some(classification.persona_id) {
                    continue;
                }

                let applied = if job.dry_run {
                    false
                } else {
                    match self
                        .contacts
                        .apply_assignment(
                            contact.id,
                            classification.persona_id,
                            &classification.normalized_title,
                        )
                        .await
                    {
                        Ok(true) => true,
                        Ok(false) => {
                            // Locked (or deleted) between scan and write.
                            counters.skipped_locked += 1;
                            continue;
                        }
                        Err(e) => {
                            counters.errors += 1;
                            warn!(
                                job_id = %job.id,
                                contact_id = %contact.id,
                                error = %e,
                                "Contact update failed, skipping"
                            );
                            continue;
                        }
                    }
                };

                entries.push(ChangeEntry {
                    contact_id: contact.id,
                    persona_before: contact.buyer_persona,
                    persona_after: classification.persona_id,
                    applied,
                });
                counters.changed += 1;
            }

            self.jobs.record_changes(job.id, &entries).await?;

            match self
                .jobs
                .checkpoint(job.id, &self.worker_id, &counters)
                .await?
            {
                None => return Ok(JobOutcome::Adopted),
                Some(JobStatus::Cancelled) => return Ok(JobOutcome::Cancelled(counters)),
                Some(_) => {}
            }

            debug!(
                job_id = %job.id,
                scanned = counters.scanned,
                changed = counters.changed,
                "Batch checkpoint"
            );
            let _ = self.event_tx.send(WorkerEvent::JobProgress {
                job_id: job.id,
                counters,
            });

            if batch_len < self.config.batch_size {
                break;
            }
        }

        Ok(JobOutcome::Completed(counters))
    }

    /// Resolve a job's filter descriptor into a concrete contact query.
    async fn resolve_filter(&self, filter: &JobFilter) -> Result<ContactQuery> {
        match filter {
            JobFilter::All => Ok(ContactQuery::All),
            JobFilter::ByKeyword { keyword_id } => {
                let keyword = self
                    .catalog
                    .get_keyword(*keyword_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("keyword {keyword_id}")))?;
                Ok(ContactQuery::NormalizedTitleIn(vec![
                    keyword.keyword_normalized,
                ]))
            }
            JobFilter::ByPersona { buyer_persona_id } => {
                Ok(ContactQuery::AssignedTo(*buyer_persona_id))
            }
            JobFilter::AffectedKeywords { keywords } => {
                let normalized: Vec<String> = keywords
                    .iter()
                    .map(|k| normalize(k))
                    .filter(|k| !k.is_empty())
                    .collect();
                if normalized.is_empty() {
                    return Err(Error::InvalidInput(
                        "affected-keywords filter resolved to an empty list".into(),
                    ));
                }
                Ok(ContactQuery::NormalizedTitleIn(normalized))
            }
        }
    }
}
