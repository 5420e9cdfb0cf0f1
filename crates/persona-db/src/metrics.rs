//! Read-only metrics aggregation and the snapshot store.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};

use persona_core::{
    Error, KeywordUsage, MetricsRollup, MetricsSnapshot, MetricsSource, PersonaCount, Result,
    SnapshotRepository,
};

/// PostgreSQL implementation of MetricsSource.
///
/// Purely additive/read-only over the contact and keyword collections;
/// safe to run while the reclassification worker writes contact rows.
#[derive(Clone)]
pub struct PgMetricsSource {
    pool: Pool<Postgres>,
}

impl PgMetricsSource {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsSource for PgMetricsSource {
    async fn collect(&self) -> Result<MetricsRollup> {
        let totals = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE buyer_persona IS NOT NULL) AS classified,
                COUNT(*) FILTER (WHERE buyer_persona_locked) AS locked,
                COUNT(*) FILTER (WHERE buyer_persona_assigned_manually) AS manual,
                COUNT(*) FILTER (WHERE job_title IS NOT NULL AND job_title <> '') AS with_title,
                COUNT(*) FILTER (WHERE job_title_normalized IS NOT NULL
                                   AND job_title_normalized <> '') AS with_normalized
             FROM contact",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let persona_rows = sqlx::query(
            "SELECT p.id, p.name, COUNT(c.id) AS contacts
             FROM buyer_persona p
             LEFT JOIN contact c ON c.buyer_persona = p.id
             GROUP BY p.id, p.name, p.priority
             ORDER BY p.priority ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let keyword_rows = sqlx::query(
            "SELECT k.keyword, k.buyer_persona_id, COUNT(c.id) AS contacts
             FROM job_keyword k
             LEFT JOIN contact c ON c.job_title_normalized = k.keyword_normalized
             GROUP BY k.id, k.keyword, k.buyer_persona_id
             ORDER BY contacts DESC, k.keyword ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(MetricsRollup {
            total_contacts: totals.get("total"),
            classified_contacts: totals.get("classified"),
            locked_contacts: totals.get("locked"),
            manually_assigned_contacts: totals.get("manual"),
            with_title: totals.get("with_title"),
            with_normalized_title: totals.get("with_normalized"),
            persona_counts: persona_rows
                .into_iter()
                .map(|row| PersonaCount {
                    persona_id: row.get("id"),
                    name: row.get("name"),
                    contacts: row.get("contacts"),
                })
                .collect(),
            keyword_usage: keyword_rows
                .into_iter()
                .map(|row| KeywordUsage {
                    keyword: row.get("keyword"),
                    buyer_persona_id: row.get("buyer_persona_id"),
                    contacts: row.get("contacts"),
                })
                .collect(),
        })
    }
}

/// PostgreSQL implementation of SnapshotRepository.
#[derive(Clone)]
pub struct PgSnapshotRepository {
    pool: Pool<Postgres>,
}

impl PgSnapshotRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_snapshot_row(row: sqlx::postgres::PgRow) -> Result<MetricsSnapshot> {
        let persona_counts: JsonValue = row.get("persona_counts");
        let keyword_usage: JsonValue = row.get("keyword_usage");
        let top_keywords: JsonValue = row.get("top_keywords");
        let unused_keywords: JsonValue = row.get("unused_keywords");
        let deltas: Option<JsonValue> = row.get("deltas");

        Ok(MetricsSnapshot {
            id: row.get("id"),
            taken_at: row.get("taken_at"),
            total_contacts: row.get("total_contacts"),
            classified_contacts: row.get("classified_contacts"),
            locked_contacts: row.get("locked_contacts"),
            manually_assigned_contacts: row.get("manually_assigned_contacts"),
            with_title: row.get("with_title"),
            with_normalized_title: row.get("with_normalized_title"),
            classification_coverage_pct: row.get("classification_coverage_pct"),
            normalization_coverage_pct: row.get("normalization_coverage_pct"),
            persona_counts: serde_json::from_value(persona_counts)?,
            keyword_usage: serde_json::from_value(keyword_usage)?,
            top_keywords: serde_json::from_value(top_keywords)?,
            unused_keywords: serde_json::from_value(unused_keywords)?,
            deltas: deltas.map(serde_json::from_value).transpose()?,
        })
    }
}

#[async_trait]
impl SnapshotRepository for PgSnapshotRepository {
    async fn insert(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO metrics_snapshot
                 (id, taken_at, total_contacts, classified_contacts, locked_contacts,
                  manually_assigned_contacts, with_title, with_normalized_title,
                  classification_coverage_pct, normalization_coverage_pct,
                  persona_counts, keyword_usage, top_keywords, unused_keywords, deltas)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(snapshot.id)
        .bind(snapshot.taken_at)
        .bind(snapshot.total_contacts)
        .bind(snapshot.classified_contacts)
        .bind(snapshot.locked_contacts)
        .bind(snapshot.manually_assigned_contacts)
        .bind(snapshot.with_title)
        .bind(snapshot.with_normalized_title)
        .bind(snapshot.classification_coverage_pct)
        .bind(snapshot.normalization_coverage_pct)
        .bind(serde_json::to_value(&snapshot.persona_counts)?)
        .bind(serde_json::to_value(&snapshot.keyword_usage)?)
        .bind(serde_json::to_value(&snapshot.top_keywords)?)
        .bind(serde_json::to_value(&snapshot.unused_keywords)?)
        .bind(
            snapshot
                .deltas
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn latest(&self) -> Result<Option<MetricsSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM metrics_snapshot
             ORDER BY taken_at DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_snapshot_row).transpose()
    }

    async fn history(&self, days: i64) -> Result<Vec<MetricsSnapshot>> {
        let cutoff = Utc::now() - chrono::Duration::days(days.max(0));
        let rows = sqlx::query(
            "SELECT * FROM metrics_snapshot
             WHERE taken_at >= $1
             ORDER BY taken_at DESC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_snapshot_row).collect()
    }

    async fn prune(&self, retention_days: i64) -> Result<i64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days.max(0));
        let result = sqlx::query("DELETE FROM metrics_snapshot WHERE taken_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}
