use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::connector::models::{Connector, ConnectorStatus};
use crate::connector::repositories::ConnectorRepository;
use quarry_common::error::{QuarryError, QuarryResult};

const CONNECTOR_COLUMNS: &str = "id, owner_id, name, kind, config, state, status, status_message, \
     refresh_freq_secs, last_sync_at, docs_analyzed, created_at, updated_at";

#[derive(Clone)]
pub struct PgConnectorRepository {
    pool: PgPool,
}

impl PgConnectorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> QuarryResult<Connector> {
        let status_raw: String = row.get("status");
        let status = ConnectorStatus::from_str(&status_raw).map_err(QuarryError::Internal)?;

        Ok(Connector {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            name: row.get("name"),
            kind: row.get("kind"),
            config: row.get("config"),
            state: row.get("state"),
            status,
            status_message: row.get("status_message"),
            refresh_freq_secs: row.get("refresh_freq_secs"),
            last_sync_at: row.get("last_sync_at"),
            docs_analyzed: row.get("docs_analyzed"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ConnectorRepository for PgConnectorRepository {
    async fn get(&self, id: Uuid) -> QuarryResult<Option<Connector>> {
        let row = sqlx::query(&format!(
            "select {CONNECTOR_COLUMNS} from connectors where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QuarryError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: ConnectorStatus,
        message: Option<&str>,
    ) -> QuarryResult<()> {
        sqlx::query(
            "update connectors
             set status = $1, status_message = $2, updated_at = $3
             where id = $4",
        )
        .bind(status.as_str())
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| QuarryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn save_state(&self, id: Uuid, state: &serde_json::Value) -> QuarryResult<()> {
        sqlx::query(
            "update connectors
             set state = $1, updated_at = $2
             where id = $3",
        )
        .bind(state)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| QuarryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn finish_sync(&self, id: Uuid, processed: i64) -> QuarryResult<()> {
        sqlx::query(
            "update connectors
             set docs_analyzed = docs_analyzed + $1, last_sync_at = $2, updated_at = $2
             where id = $3",
        )
        .bind(processed)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| QuarryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn list_due(&self, limit: i64) -> QuarryResult<Vec<Connector>> {
        let rows = sqlx::query(&format!(
            "select {CONNECTOR_COLUMNS} from connectors
             where status not in ('pending', 'syncing', 'disabled')
               and (last_sync_at is null
                    or last_sync_at < now() - refresh_freq_secs * interval '1 second')
             order by last_sync_at asc nulls first
             limit $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QuarryError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn mark_pending(&self, id: Uuid) -> QuarryResult<()> {
        self.set_status(id, ConnectorStatus::Pending, None).await
    }
}
