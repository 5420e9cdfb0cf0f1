//! Contact repository implementation (the persona-owned field subset).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use persona_core::{Contact, ContactQuery, ContactRepository, Error, Result};

const CONTACT_COLUMNS: &str = "id, job_title, job_title_normalized, buyer_persona, \
     buyer_persona_locked, buyer_persona_assigned_manually, created_at, updated_at";

/// PostgreSQL implementation of ContactRepository.
#[derive(Clone)]
pub struct PgContactRepository {
    pool: Pool<Postgres>,
}

impl PgContactRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_contact_row(row: sqlx::postgres::PgRow) -> Contact {
        Contact {
            id: row.get("id"),
            job_title: row.get("job_title"),
            job_title_normalized: row.get("job_title_normalized"),
            buyer_persona: row.get("buyer_persona"),
            buyer_persona_locked: row.get("buyer_persona_locked"),
            buyer_persona_assigned_manually: row.get("buyer_persona_assigned_manually"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl ContactRepository for PgContactRepository {
    async fn fetch_batch(
        &self,
        query: &ContactQuery,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Contact>> {
        // Keyset pagination on the primary key keeps the scan order
        // stable across batches without OFFSET's re-scan cost.
        let rows = match query {
            ContactQuery::All => {
                sqlx::query(&format!(
                    "SELECT {CONTACT_COLUMNS} FROM contact
                     WHERE ($1::uuid IS NULL OR id > $1)
                     ORDER BY id ASC
                     LIMIT $2"
                ))
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            ContactQuery::NormalizedTitleIn(titles) => {
                sqlx::query(&format!(
                    "SELECT {CONTACT_COLUMNS} FROM contact
                     WHERE job_title_normalized = ANY($3)
                       AND ($1::uuid IS NULL OR id > $1)
                     ORDER BY id ASC
                     LIMIT $2"
                ))
                .bind(cursor)
                .bind(limit)
                .bind(titles)
                .fetch_all(&self.pool)
                .await
            }
            ContactQuery::AssignedTo(persona_id) => {
                sqlx::query(&format!(
                    "SELECT {CONTACT_COLUMNS} FROM contact
                     WHERE buyer_persona = $3
                       AND ($1::uuid IS NULL OR id > $1)
                     ORDER BY id ASC
                     LIMIT $2"
                ))
                .bind(cursor)
                .bind(limit)
                .bind(persona_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_contact_row).collect())
    }

    async fn apply_assignment(
        &self,
        contact_id: Uuid,
        persona_id: Uuid,
        normalized_title: &str,
    ) -> Result<bool> {
        // The lock is re-checked in the WHERE clause: a contact locked
        // between scan and write is left untouched.
        let result = sqlx::query(
            "UPDATE contact
             SET buyer_persona = $2,
                 job_title_normalized = $3,
                 buyer_persona_assigned_manually = FALSE,
                 updated_at = $4
             WHERE id = $1 AND buyer_persona_locked = FALSE",
        )
        .bind(contact_id)
        .bind(persona_id)
        .bind(normalized_title)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_lock(&self, contact_id: Uuid, locked: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE contact
             SET buyer_persona_locked = $2, updated_at = $3
             WHERE id = $1",
        )
        .bind(contact_id)
        .bind(locked)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Contact>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contact WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_contact_row))
    }
}
