use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};

use crate::error::{FlowError, Result};
use crate::storage::{AtomDetail, FlowDetail, StorageBackend};

pub struct SqliteStorage {
    pub pool: Pool<Sqlite>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// A private database living as long as this storage; every connection
    /// to `sqlite::memory:` is its own database, so the pool holds one.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                flow_id TEXT PRIMARY KEY,
                detail TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS atoms (
                flow_id TEXT NOT NULL,
                name TEXT NOT NULL,
                state TEXT NOT NULL,
                detail TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (flow_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flow_claims (
                flow_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                claimed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_flow(&self, flow_id: &str, owner: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO flow_claims (flow_id, owner)
            VALUES (?, ?)
            "#,
        )
        .bind(flow_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT owner FROM flow_claims WHERE flow_id = ?")
            .bind(flow_id)
            .fetch_one(&self.pool)
            .await?;
        let current: String = row.get(0);
        if current != owner {
            return Err(FlowError::AlreadyClaimed {
                flow_id: flow_id.to_string(),
                owner: current,
            });
        }
        Ok(())
    }

    async fn release_flow(&self, flow_id: &str, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM flow_claims WHERE flow_id = ? AND owner = ?")
            .bind(flow_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_flow(&self, flow_id: &str) -> Result<Option<FlowDetail>> {
        let row = sqlx::query("SELECT detail FROM flows WHERE flow_id = ?")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let detail: String = row.get(0);
                Ok(Some(serde_json::from_str(&detail)?))
            }
            None => Ok(None),
        }
    }

    async fn save_flow(&self, detail: &FlowDetail) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flows (flow_id, detail) VALUES (?, ?)
            ON CONFLICT(flow_id) DO UPDATE
            SET detail = excluded.detail, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&detail.flow_id)
        .bind(serde_json::to_string(detail)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_atoms(&self, flow_id: &str) -> Result<Vec<AtomDetail>> {
        let rows = sqlx::query(
            r#"
          SELECT detail
          FROM atoms
          WHERE flow_id = ?
          "#,
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let detail: String = row.get(0);
                Ok(serde_json::from_str(&detail)?)
            })
            .collect()
    }

    async fn save_atom(&self, flow_id: &str, detail: &AtomDetail) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO atoms (flow_id, name, state, detail) VALUES (?, ?, ?, ?)
            ON CONFLICT(flow_id, name) DO UPDATE
            SET state = excluded.state, detail = excluded.detail,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(flow_id)
        .bind(&detail.name)
        .bind(detail.state.as_str())
        .bind(serde_json::to_string(detail)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
