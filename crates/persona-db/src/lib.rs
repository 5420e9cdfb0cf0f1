//! # persona-db
//!
//! PostgreSQL storage layer for persona-engine.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for the catalog, contacts, the
//!   reclassification job store, and metrics snapshots
//!
//! ## Example
//!
//! ```rust,ignore
//! use persona_db::Database;
//! use persona_core::{CreateJobRequest, JobFilter, JobRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/persona").await?;
//!
//!     let job_id = db.jobs.create(CreateJobRequest {
//!         filter: JobFilter::All,
//!         dry_run: true,
//!     }).await?;
//!
//!     println!("Created job: {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod contacts;
pub mod jobs;
pub mod metrics;
pub mod pool;

// Re-export core types
pub use persona_core::*;

// Re-export repository implementations
pub use catalog::PgCatalogRepository;
pub use contacts::PgContactRepository;
pub use jobs::PgReclassificationJobRepository;
pub use metrics::{PgMetricsSource, PgSnapshotRepository};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Persona/keyword catalog (read-only here).
    pub catalog: PgCatalogRepository,
    /// Contact repository for the persona-owned field subset.
    pub contacts: PgContactRepository,
    /// Reclassification job store.
    pub jobs: PgReclassificationJobRepository,
    /// Metrics aggregation source.
    pub metrics: PgMetricsSource,
    /// Metrics snapshot store.
    pub snapshots: PgSnapshotRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            catalog: PgCatalogRepository::new(pool.clone()),
            contacts: PgContactRepository::new(pool.clone()),
            jobs: PgReclassificationJobRepository::new(pool.clone()),
            metrics: PgMetricsSource::new(pool.clone()),
            snapshots: PgSnapshotRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
