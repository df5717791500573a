use async_trait::async_trait;
use uuid::Uuid;

use crate::connector::models::{Connector, ConnectorStatus};
use quarry_common::error::QuarryResult;

/// Access to the connector table, scoped to what the sync engine needs.
///
/// A connector row has exactly one in-flight sync at a time (queue-group
/// delivery guarantees it), so none of these methods take locks.
#[async_trait]
pub trait ConnectorRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> QuarryResult<Option<Connector>>;

    async fn set_status(
        &self,
        id: Uuid,
        status: ConnectorStatus,
        message: Option<&str>,
    ) -> QuarryResult<()>;

    /// Persist the serialized checkpoint into the connector's state blob.
    async fn save_state(&self, id: Uuid, state: &serde_json::Value) -> QuarryResult<()>;

    /// Record a successful pass: bump docs_analyzed and stamp last_sync_at.
    async fn finish_sync(&self, id: Uuid, processed: i64) -> QuarryResult<()>;

    /// Connectors whose refresh interval has elapsed and that are not
    /// disabled or already queued/running.
    async fn list_due(&self, limit: i64) -> QuarryResult<Vec<Connector>>;

    async fn mark_pending(&self, id: Uuid) -> QuarryResult<()>;
}
