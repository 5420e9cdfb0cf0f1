//! Job store integration tests against a real PostgreSQL instance.
//!
//! These tests require a dedicated test database: they reset the job
//! queue between scenarios. They skip (pass vacuously) when
//! `DATABASE_URL` is not set so the suite stays green on machines
//! without PostgreSQL.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use persona_core::{
    new_v7, ContactQuery, ContactRepository, CreateJobRequest, JobCounters, JobFilter,
    JobRepository, JobStatus,
};
use persona_db::Database;

const ORPHAN_TIMEOUT: Duration = Duration::from_secs(300);

async fn test_db() -> Option<Database> {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").ok()?;
    let db = Database::connect(&url).await.ok()?;
    sqlx::migrate!("../../migrations").run(&db.pool).await.ok()?;
    Some(db)
}

/// Job-queue tests share mutable global state (the claimable set), so
/// they run serialized.
async fn queue_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().await
}

async fn reset_queue(db: &Database) {
    sqlx::query("DELETE FROM reclassification_job WHERE status IN ('pending', 'processing')")
        .execute(&db.pool)
        .await
        .expect("reset job queue");
}

async fn insert_contact(db: &Database, title: Option<&str>, locked: bool) -> Uuid {
    let id = new_v7();
    sqlx::query(
        "INSERT INTO contact (id, job_title, buyer_persona_locked, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $4)",
    )
    .bind(id)
    .bind(title)
    .bind(locked)
    .bind(Utc::now())
    .execute(&db.pool)
    .await
    .expect("insert contact");
    id
}

async fn insert_persona(db: &Database, name: &str, priority: i32) -> Uuid {
    let id = new_v7();
    sqlx::query(
        "INSERT INTO buyer_persona (id, name, priority, is_default, created_at, updated_at)
         VALUES ($1, $2, $3, FALSE, $4, $4)",
    )
    .bind(id)
    .bind(name)
    .bind(priority)
    .bind(Utc::now())
    .execute(&db.pool)
    .await
    .expect("insert persona");
    id
}

#[tokio::test]
async fn test_create_and_get_round_trips_filter() {
    let Some(db) = test_db().await else { return };
    let _guard = queue_lock().await;
    reset_queue(&db).await;

    let filter = JobFilter::AffectedKeywords {
        keywords: vec!["ceo".to_string(), "director de marketing".to_string()],
    };
    let job_id = db
        .jobs
        .create(CreateJobRequest {
            filter: filter.clone(),
            dry_run: true,
        })
        .await
        .unwrap();

    let job = db.jobs.get(job_id).await.unwrap().expect("job exists");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.filter, filter);
    assert!(job.dry_run);
    assert_eq!(job.counters, JobCounters::default());
    assert_eq!(job.attempts, 0);
    assert!(job.worker_id.is_none());
}

#[tokio::test]
async fn test_claim_is_exclusive_until_heartbeat_goes_stale() {
    let Some(db) = test_db().await else { return };
    let _guard = queue_lock().await;
    reset_queue(&db).await;

    let job_id = db
        .jobs
        .create(CreateJobRequest {
            filter: JobFilter::All,
            dry_run: true,
        })
        .await
        .unwrap();

    let claimed = db.jobs.claim_next("worker-a", ORPHAN_TIMEOUT).await.unwrap();
    assert_eq!(claimed.expect("claimed").id, job_id);

    // Fresh heartbeat: a second worker finds nothing to claim.
    let second = db.jobs.claim_next("worker-b", ORPHAN_TIMEOUT).await.unwrap();
    assert!(second.is_none());

    // Backdate the heartbeat past the orphan timeout; now worker-b adopts.
    sqlx::query(
        "UPDATE reclassification_job SET last_heartbeat = $2 WHERE id = $1",
    )
    .bind(job_id)
    .bind(Utc::now() - chrono::Duration::seconds(600))
    .execute(&db.pool)
    .await
    .unwrap();

    let adopted = db.jobs.claim_next("worker-b", ORPHAN_TIMEOUT).await.unwrap();
    let adopted = adopted.expect("adopted orphan");
    assert_eq!(adopted.id, job_id);
    assert_eq!(adopted.worker_id.as_deref(), Some("worker-b"));

    // The original worker's checkpoint now fails: ownership was lost.
    let lost = db
        .jobs
        .checkpoint(job_id, "worker-a", &JobCounters::default())
        .await
        .unwrap();
    assert!(lost.is_none());
}

#[tokio::test]
async fn test_checkpoint_persists_counters_and_observes_cancellation() {
    let Some(db) = test_db().await else { return };
    let _guard = queue_lock().await;
    reset_queue(&db).await;

    let job_id = db
        .jobs
        .create(CreateJobRequest {
            filter: JobFilter::All,
            dry_run: false,
        })
        .await
        .unwrap();
    db.jobs.claim_next("worker-a", ORPHAN_TIMEOUT).await.unwrap();

    let counters = JobCounters {
        scanned: 500,
        changed: 12,
        skipped_locked: 3,
        errors: 0,
    };
    let status = db
        .jobs
        .checkpoint(job_id, "worker-a", &counters)
        .await
        .unwrap();
    assert_eq!(status, Some(JobStatus::Processing));

    assert!(db.jobs.cancel(job_id).await.unwrap());

    // The next checkpoint still lands (final counters are not discarded)
    // and reports the cancellation.
    let counters = JobCounters {
        scanned: 700,
        ..counters
    };
    let status = db
        .jobs
        .checkpoint(job_id, "worker-a", &counters)
        .await
        .unwrap();
    assert_eq!(status, Some(JobStatus::Cancelled));

    let job = db.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.counters.scanned, 700);
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_fail_retries_until_attempts_exhausted() {
    let Some(db) = test_db().await else { return };
    let _guard = queue_lock().await;
    reset_queue(&db).await;

    let job_id = db
        .jobs
        .create(CreateJobRequest {
            filter: JobFilter::All,
            dry_run: true,
        })
        .await
        .unwrap();

    for attempt in 1..=3 {
        let claimed = db
            .jobs
            .claim_next("worker-a", ORPHAN_TIMEOUT)
            .await
            .unwrap()
            .expect("claimable");
        assert_eq!(claimed.id, job_id);
        db.jobs.fail(job_id, "worker-a", "storage error").await.unwrap();

        let job = db.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.attempts, attempt);
        if attempt < 3 {
            assert_eq!(job.status, JobStatus::Pending, "attempt {attempt}");
        } else {
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.error_message.as_deref(), Some("storage error"));
        }
    }

    // Terminal: nothing left to claim.
    let nothing = db.jobs.claim_next("worker-a", ORPHAN_TIMEOUT).await.unwrap();
    assert!(nothing.is_none());

    // Explicit retry reopens it with attempts reset.
    assert!(db.jobs.retry(job_id).await.unwrap());
    let job = db.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn test_change_log_append_and_excerpt() {
    let Some(db) = test_db().await else { return };
    let _guard = queue_lock().await;
    reset_queue(&db).await;

    let job_id = db
        .jobs
        .create(CreateJobRequest {
            filter: JobFilter::All,
            dry_run: true,
        })
        .await
        .unwrap();

    let persona = new_v7();
    let entries: Vec<_> = (0..5)
        .map(|_| persona_core::ChangeEntry {
            contact_id: new_v7(),
            persona_before: None,
            persona_after: persona,
            applied: false,
        })
        .collect();
    db.jobs.record_changes(job_id, &entries).await.unwrap();

    let excerpt = db.jobs.changes(job_id, 3).await.unwrap();
    assert_eq!(excerpt.len(), 3);
    let all = db.jobs.changes(job_id, 100).await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.iter().all(|c| c.job_id == job_id && !c.applied));
}

#[tokio::test]
async fn test_apply_assignment_respects_lock() {
    let Some(db) = test_db().await else { return };

    let persona_id = insert_persona(&db, "Test Locked Persona", 500).await;
    let unlocked = insert_contact(&db, Some("Director de Marketing"), false).await;
    let locked = insert_contact(&db, Some("Director de Marketing"), true).await;

    assert!(db
        .contacts
        .apply_assignment(unlocked, persona_id, "director de marketing")
        .await
        .unwrap());
    assert!(!db
        .contacts
        .apply_assignment(locked, persona_id, "director de marketing")
        .await
        .unwrap());

    let updated = db.contacts.get(unlocked).await.unwrap().unwrap();
    assert_eq!(updated.buyer_persona, Some(persona_id));
    assert_eq!(
        updated.job_title_normalized.as_deref(),
        Some("director de marketing")
    );
    assert!(!updated.buyer_persona_assigned_manually);

    let untouched = db.contacts.get(locked).await.unwrap().unwrap();
    assert_eq!(untouched.buyer_persona, None);
}

#[tokio::test]
async fn test_fetch_batch_pages_in_stable_id_order() {
    let Some(db) = test_db().await else { return };

    let marker = format!("paging marker {}", new_v7());
    let mut ids = Vec::new();
    for _ in 0..5 {
        let id = new_v7();
        sqlx::query(
            "INSERT INTO contact (id, job_title, job_title_normalized, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(id)
        .bind(&marker)
        .bind(&marker)
        .bind(Utc::now())
        .execute(&db.pool)
        .await
        .unwrap();
        ids.push(id);
    }

    let query = ContactQuery::NormalizedTitleIn(vec![marker]);
    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let batch = db.contacts.fetch_batch(&query, cursor, 2).await.unwrap();
        if batch.is_empty() {
            break;
        }
        cursor = batch.last().map(|c| c.id);
        seen.extend(batch.into_iter().map(|c| c.id));
    }

    ids.sort();
    assert_eq!(seen, ids);
}
