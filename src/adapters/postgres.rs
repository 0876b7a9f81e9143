use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::domain::StatusId;
use crate::error::{PersistenceError, Result};
use crate::persistence::CursorStore;

/// PostgreSQL cursor storage
#[derive(Clone)]
pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    /// Connect and make sure the cursor table exists
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Reuse an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS status_cursors (
                account TEXT PRIMARY KEY,
                last_processed_id TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("status_cursors table ready");
        Ok(())
    }

    /// Cursor row with its last update time
    pub async fn get_cursor(&self, account: &str) -> Result<Option<(StatusId, DateTime<Utc>)>> {
        let row = sqlx::query(
            r#"
            SELECT last_processed_id, updated_at
            FROM status_cursors WHERE account = $1
            "#,
        )
        .bind(account)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| {
            let raw: String = r.get("last_processed_id");
            let updated_at: DateTime<Utc> = r.get("updated_at");
            StatusId::new(raw).map(|id| (id, updated_at))
        }))
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    async fn load(&self, account: &str) -> std::result::Result<Option<StatusId>, PersistenceError> {
        self.get_cursor(account)
            .await
            .map(|found| found.map(|(id, _)| id))
            .map_err(|e| PersistenceError::new(account, e.to_string()))
    }

    #[instrument(skip(self, id), fields(status_id = %id))]
    async fn store(&self, account: &str, id: &StatusId) -> std::result::Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO status_cursors (account, last_processed_id, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (account) DO UPDATE SET
                last_processed_id = EXCLUDED.last_processed_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::new(account, e.to_string()))?;

        Ok(())
    }
}
