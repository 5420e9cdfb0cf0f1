//! Catalog repository implementation (personas + keywords, read-only).

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use persona_core::{
    BuyerPersona, Catalog, CatalogRepository, Error, JobKeyword, Result,
};

/// PostgreSQL implementation of CatalogRepository.
#[derive(Clone)]
pub struct PgCatalogRepository {
    pool: Pool<Postgres>,
}

impl PgCatalogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_persona_row(row: sqlx::postgres::PgRow) -> BuyerPersona {
        BuyerPersona {
            id: row.get("id"),
            name: row.get("name"),
            priority: row.get("priority"),
            is_default: row.get("is_default"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn parse_keyword_row(row: sqlx::postgres::PgRow) -> JobKeyword {
        JobKeyword {
            id: row.get("id"),
            keyword: row.get("keyword"),
            keyword_normalized: row.get("keyword_normalized"),
            buyer_persona_id: row.get("buyer_persona_id"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn load_catalog(&self) -> Result<Catalog> {
        // One transaction so personas and keywords come from a single
        // consistent view; the cache swaps in the result wholesale.
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let persona_rows = sqlx::query(
            "SELECT id, name, priority, is_default, created_at, updated_at
             FROM buyer_persona
             ORDER BY priority ASC, name ASC",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let keyword_rows = sqlx::query(
            "SELECT id, keyword, keyword_normalized, buyer_persona_id, created_at
             FROM job_keyword",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        Ok(Catalog {
            personas: persona_rows
                .into_iter()
                .map(Self::parse_persona_row)
                .collect(),
            keywords: keyword_rows
                .into_iter()
                .map(Self::parse_keyword_row)
                .collect(),
        })
    }

    async fn get_keyword(&self, id: Uuid) -> Result<Option<JobKeyword>> {
        let row = sqlx::query(
            "SELECT id, keyword, keyword_normalized, buyer_persona_id, created_at
             FROM job_keyword WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_keyword_row))
    }

    async fn get_persona(&self, id: Uuid) -> Result<Option<BuyerPersona>> {
        let row = sqlx::query(
            "SELECT id, name, priority, is_default, created_at, updated_at
             FROM buyer_persona WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_persona_row))
    }
}
