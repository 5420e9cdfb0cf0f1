//! persona-api - HTTP API server for persona-engine

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use persona_classify::{Classifier, ClassifierCache};
use persona_core::{
    defaults, CatalogRepository, ChangeRecord, ContactRepository, CreateJobRequest, JobFilter,
    JobRepository, ReclassificationJob, SnapshotRepository,
};
use persona_db::Database;
use persona_jobs::{MetricsSnapshotter, ReclassificationWorker, SnapshotterConfig, WorkerConfig};

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful
/// for log correlation across request → job → batch boundaries.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// APP STATE
// =============================================================================

#[derive(Clone)]
struct AppState {
    db: Database,
    classifier: Arc<Classifier>,
}

// =============================================================================
// ERROR MAPPING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(persona_core::Error),
}

impl From<persona_core::Error> for ApiError {
    fn from(err: persona_core::Error) -> Self {
        match &err {
            persona_core::Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            persona_core::Error::JobNotFound(id) => ApiError::NotFound(format!("Job {id}")),
            persona_core::Error::ContactNotFound(id) => {
                ApiError::NotFound(format!("Contact {id}"))
            }
            persona_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, format!("Not found: {msg}")),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

// =============================================================================
// RECLASSIFICATION HANDLERS
// =============================================================================

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ReclassifyAllBody {
    /// Defaults to true for safety: a destructive rewrite of tens of
    /// thousands of contacts must be opted into.
    #[serde(default = "default_dry_run")]
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
struct ReclassifyByKeywordBody {
    keyword_id: Uuid,
    #[serde(default = "default_dry_run")]
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
struct ReclassifyByPersonaBody {
    buyer_persona_id: Uuid,
    #[serde(default = "default_dry_run")]
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
struct ReclassifyAffectedBody {
    keywords: Vec<String>,
    #[serde(default = "default_dry_run")]
    dry_run: bool,
}

async fn create_job(state: &AppState, filter: JobFilter, dry_run: bool) -> Result<Uuid, ApiError> {
    let job_id = state
        .db
        .jobs
        .create(CreateJobRequest { filter, dry_run })
        .await?;
    info!(job_id = %job_id, dry_run, "Reclassification job created");
    Ok(job_id)
}

async fn reclassify_all(
    State(state): State<AppState>,
    Json(body): Json<ReclassifyAllBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = create_job(&state, JobFilter::All, body.dry_run).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": job_id })),
    ))
}

async fn reclassify_by_keyword(
    State(state): State<AppState>,
    Json(body): Json<ReclassifyByKeywordBody>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .catalog
        .get_keyword(body.keyword_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Keyword {}", body.keyword_id)))?;

    let job_id = create_job(
        &state,
        JobFilter::ByKeyword {
            keyword_id: body.keyword_id,
        },
        body.dry_run,
    )
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": job_id })),
    ))
}

async fn reclassify_by_persona(
    State(state): State<AppState>,
    Json(body): Json<ReclassifyByPersonaBody>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .catalog
        .get_persona(body.buyer_persona_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Buyer persona {}", body.buyer_persona_id)))?;

    let job_id = create_job(
        &state,
        JobFilter::ByPersona {
            buyer_persona_id: body.buyer_persona_id,
        },
        body.dry_run,
    )
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": job_id })),
    ))
}

/// Keyword-edit hook: several keywords changed at once. Creates a scoped
/// job and invalidates this process's classifier cache — the signal that
/// makes subsequent classifications see the edited catalog.
async fn reclassify_affected(
    State(state): State<AppState>,
    Json(body): Json<ReclassifyAffectedBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(ApiError::BadRequest(
            "keywords must contain at least one non-blank entry".to_string(),
        ));
    }

    state.classifier.invalidate().await;

    let job_id = create_job(
        &state,
        JobFilter::AffectedKeywords {
            keywords: body.keywords,
        },
        body.dry_run,
    )
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": job_id })),
    ))
}

// =============================================================================
// JOB STATUS HANDLERS
// =============================================================================

#[derive(Debug, Serialize)]
struct JobDetailResponse {
    #[serde(flatten)]
    job: ReclassificationJob,
    /// Latest change-log entries (excerpt).
    changes: Vec<ChangeRecord>,
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .db
        .jobs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {id}")))?;
    let changes = state
        .db
        .jobs
        .changes(id, defaults::CHANGE_LOG_EXCERPT)
        .await?;
    Ok(Json(JobDetailResponse { job, changes }))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    limit: Option<i64>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(defaults::JOB_LIST_LIMIT).clamp(1, 500);
    let jobs = state.db.jobs.list_recent(limit).await?;
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.jobs.cancel(id).await? {
        return Ok(Json(serde_json::json!({ "cancelled": true })));
    }
    match state.db.jobs.get(id).await? {
        None => Err(ApiError::NotFound(format!("Job {id}"))),
        Some(job) => Err(ApiError::Conflict(format!(
            "Job {id} is already {:?} and cannot be cancelled",
            job.status
        ))),
    }
}

async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.jobs.retry(id).await? {
        return Ok(Json(serde_json::json!({ "retried": true })));
    }
    match state.db.jobs.get(id).await? {
        None => Err(ApiError::NotFound(format!("Job {id}"))),
        Some(job) => Err(ApiError::Conflict(format!(
            "Job {id} is {:?}; only failed or cancelled jobs can be retried",
            job.status
        ))),
    }
}

// =============================================================================
// DIAGNOSE & CONTACT HANDLERS
// =============================================================================

#[derive(Debug, Deserialize)]
struct DiagnoseBody {
    job_title: String,
}

/// Full classifier explanation for one title, for debugging keyword
/// coverage. Read-only: nothing is written to any contact.
async fn diagnose(
    State(state): State<AppState>,
    Json(body): Json<DiagnoseBody>,
) -> Result<impl IntoResponse, ApiError> {
    let classification = state.classifier.classify(&body.job_title).await?;
    Ok(Json(classification))
}

#[derive(Debug, Deserialize)]
struct LockBody {
    locked: bool,
}

async fn lock_contact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<LockBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.contacts.set_lock(id, body.locked).await? {
        return Err(ApiError::NotFound(format!("Contact {id}")));
    }
    let contact = state
        .db
        .contacts
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Contact {id}")))?;
    Ok(Json(contact))
}

// =============================================================================
// METRICS HANDLERS
// =============================================================================

async fn latest_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .db
        .snapshots
        .latest()
        .await?
        .ok_or_else(|| ApiError::NotFound("No metrics snapshot taken yet".to_string()))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    days: Option<i64>,
}

async fn metrics_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let days = query
        .days
        .unwrap_or(30)
        .clamp(1, defaults::SNAPSHOT_RETENTION_DAYS);
    let snapshots = state.db.snapshots.history(days).await?;
    Ok(Json(serde_json::json!({
        "days": days,
        "snapshots": snapshots,
    })))
}

// =============================================================================
// HEALTH
// =============================================================================

async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .map_err(persona_core::Error::Database)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// =============================================================================
// ROUTER & STARTUP
// =============================================================================

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reclassify/all", post(reclassify_all))
        .route("/reclassify/by-keyword", post(reclassify_by_keyword))
        .route("/reclassify/by-persona", post(reclassify_by_persona))
        .route("/reclassify/affected", post(reclassify_affected))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/jobs/:id/retry", post(retry_job))
        .route("/diagnose", post(diagnose))
        .route("/contacts/:id/lock", post(lock_contact))
        .route("/metrics/latest", get(latest_metrics))
        .route("/metrics/history", get(metrics_history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    //
    // Environment variables:
    //   LOG_FORMAT - "json" or "text" (default: "text")
    //   RUST_LOG   - standard env filter (default: "persona_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "persona_api=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/persona".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8700".to_string())
        .parse()
        .unwrap_or(8700);

    // Connect and migrate
    let db = Database::connect_with_config(&database_url, persona_db::PoolConfig::from_env()).await?;
    db.migrate().await?;

    // Classifier cache shared between the API (diagnose, affected-hook
    // invalidation) and the worker.
    let catalog: Arc<dyn CatalogRepository> = Arc::new(db.catalog.clone());
    let cache = Arc::new(ClassifierCache::new(catalog.clone()));
    let classifier = Arc::new(Classifier::new(cache));

    // Background loops
    let worker = ReclassificationWorker::new(
        Arc::new(db.jobs.clone()),
        Arc::new(db.contacts.clone()),
        catalog,
        classifier.clone(),
        WorkerConfig::from_env(),
    );
    let worker_handle = worker.start();

    let snapshotter = MetricsSnapshotter::new(
        Arc::new(db.metrics.clone()),
        Arc::new(db.snapshots.clone()),
        SnapshotterConfig::from_env(),
    );
    let snapshotter_handle = snapshotter.start();

    let state = AppState {
        db,
        classifier,
    };

    // Start server
    let addr = format!("{host}:{port}");
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Stop background loops before exit
    let _ = worker_handle.shutdown().await;
    let _ = snapshotter_handle.shutdown().await;

    Ok(())
}
