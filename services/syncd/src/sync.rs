use thiserror::Error;
use uuid::Uuid;

use quarry_bus::subjects::DOCUMENT_READY;
use quarry_bus::{BusError, MessageBus};
use quarry_common::error::QuarryError;
use quarry_common::types::DocumentReady;
use quarry_connectors::{registry, Change, Checkpoint, Provider, ProviderError};
use quarry_db::connector::models::ConnectorStatus;
use quarry_db::connector::repositories::ConnectorRepository;
use quarry_db::document::models::NewDocument;
use quarry_db::document::repositories::DocumentRepository;
use quarry_storage::{blob_key, BlobStore};

/// Checkpoint persistence interval, in processed items. Bounds reprocessing
/// after a crash without paying a database write per item.
pub const CHECKPOINT_EVERY: usize = 10;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connector not found: {0}")]
    ConnectorNotFound(Uuid),

    #[error("no provider registered for kind: {0}")]
    ProviderNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Internal(#[from] QuarryError),

    #[error("publish failed: {0}")]
    Bus(#[from] BusError),
}

impl SyncError {
    /// Whether redelivering the triggering message could ever succeed.
    pub fn is_terminal(&self) -> bool {
        match self {
            SyncError::ConnectorNotFound(_) | SyncError::ProviderNotFound(_) => true,
            SyncError::Provider(e) => e.is_terminal(),
            SyncError::Internal(_) | SyncError::Bus(_) => false,
        }
    }
}

/// Result of one bounded sync pass.
#[derive(Debug, Clone, Copy)]
pub struct SyncOutcome {
    pub processed: usize,
    /// The pass hit its item cap with work remaining; the checkpoint
    /// carries the resume cursor.
    pub has_more: bool,
}

/// Sync orchestrator: drives one connector through one bounded pass of
/// change detection, fetch, blob upload and document upsert.
///
/// Nothing here is transactional. Partial progress is safe because the
/// document upsert is idempotent and the checkpoint only moves forward.
pub struct ConnectorService<C, D, B, M> {
    connectors: C,
    documents: D,
    blobs: B,
    bus: M,
    bucket: String,
}

impl<C, D, B, M> ConnectorService<C, D, B, M>
where
    C: ConnectorRepository,
    D: DocumentRepository,
    B: BlobStore,
    M: MessageBus,
{
    pub fn new(connectors: C, documents: D, blobs: B, bus: M, bucket: String) -> Self {
        Self {
            connectors,
            documents,
            blobs,
            bus,
            bucket,
        }
    }

    pub fn connectors(&self) -> &C {
        &self.connectors
    }

    pub fn bus(&self) -> &M {
        &self.bus
    }

    pub async fn sync_connector(&self, connector_id: Uuid) -> Result<SyncOutcome, SyncError> {
        let connector = self
            .connectors
            .get(connector_id)
            .await?
            .ok_or(SyncError::ConnectorNotFound(connector_id))?;

        self.connectors
            .set_status(connector_id, ConnectorStatus::Syncing, None)
            .await?;

        let mut provider = registry::create(&connector.kind)
            .ok_or_else(|| SyncError::ProviderNotFound(connector.kind.clone()))?;
        let mut checkpoint = Checkpoint::from_state(provider.kind(), &connector.state);

        let mut processed = 0usize;
        let result = self
            .run_pass(
                connector_id,
                &connector.config,
                provider.as_mut(),
                &mut checkpoint,
                &mut processed,
            )
            .await;

        // Persist whatever progress the pass made, on both exits.
        if let Err(e) = self
            .connectors
            .save_state(connector_id, &checkpoint.to_state())
            .await
        {
            tracing::error!(%connector_id, error = %e, "failed to persist checkpoint");
        }
        provider.close();

        match result {
            Ok(()) => {
                self.connectors
                    .finish_sync(connector_id, processed as i64)
                    .await?;
                tracing::info!(
                    %connector_id,
                    processed,
                    has_more = checkpoint.has_more(),
                    "sync pass completed"
                );
                Ok(SyncOutcome {
                    processed,
                    has_more: checkpoint.has_more(),
                })
            }
            Err(e) => {
                tracing::error!(%connector_id, processed, error = %e, "sync pass failed");
                if let Err(status_err) = self
                    .connectors
                    .set_status(connector_id, ConnectorStatus::Error, Some(&e.to_string()))
                    .await
                {
                    tracing::error!(%connector_id, error = %status_err, "failed to record error status");
                }
                Err(e)
            }
        }
    }

    async fn run_pass(
        &self,
        connector_id: Uuid,
        config: &serde_json::Value,
        provider: &mut dyn Provider,
        checkpoint: &mut Checkpoint,
        processed: &mut usize,
    ) -> Result<(), SyncError> {
        provider.authenticate(config).await?;

        let changes = provider.detect_changes(checkpoint).await?;
        for change in changes {
            match change {
                Change::Delete { source_id } => {
                    let matched = self.documents.mark_deleted(connector_id, &source_id).await?;
                    if !matched {
                        tracing::debug!(%connector_id, source_id, "delete for unseen source item");
                    }
                }
                Change::Update {
                    source_id,
                    metadata,
                } => {
                    let item = match provider.fetch_item(&metadata).await {
                        Ok(item) => item,
                        Err(ProviderError::FileTooLarge { size, limit }) => {
                            // Skip the item, not the pass.
                            tracing::warn!(
                                %connector_id,
                                source_id,
                                size,
                                limit,
                                "skipping oversize item"
                            );
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };

                    let key = blob_key(&connector_id.to_string(), &item.content_hash);
                    let unchanged = self
                        .documents
                        .get_by_source(connector_id, &source_id)
                        .await?
                        .is_some_and(|d| d.content_hash == item.content_hash);

                    if !unchanged {
                        self.blobs.upload(&self.bucket, &key, &item.content).await?;
                    }

                    // Upsert even when unchanged to refresh the row timestamp.
                    let document = self
                        .documents
                        .upsert(NewDocument {
                            connector_id,
                            source_id: source_id.clone(),
                            title: item.title,
                            blob_key: key.clone(),
                            content_hash: item.content_hash,
                            mime_type: item.mime_type.clone(),
                            original_url: item.original_url,
                        })
                        .await?;

                    if !unchanged {
                        let event = DocumentReady {
                            connector_id,
                            document_id: document.id,
                            source_id,
                            blob_key: key,
                            mime_type: item.mime_type,
                        };
                        self.bus
                            .publish(DOCUMENT_READY, serde_json::to_vec(&event).map_err(BusError::Encode)?)
                            .await?;
                    }
                }
            }

            *processed += 1;
            if *processed % CHECKPOINT_EVERY == 0 {
                self.connectors
                    .save_state(connector_id, &checkpoint.to_state())
                    .await?;
            }
        }
        Ok(())
    }
}
