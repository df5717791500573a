use async_trait::async_trait;
use uuid::Uuid;

use crate::document::models::{Document, NewDocument};
use quarry_common::error::QuarryResult;

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get_by_source(
        &self,
        connector_id: Uuid,
        source_id: &str,
    ) -> QuarryResult<Option<Document>>;

    /// Insert or update by `(connector_id, source_id)`. Never duplicates.
    async fn upsert(&self, doc: NewDocument) -> QuarryResult<Document>;

    /// Soft-delete: mark the row deleted, keep it. Returns whether a row
    /// matched.
    async fn mark_deleted(&self, connector_id: Uuid, source_id: &str) -> QuarryResult<bool>;
}
