use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use quarry_bus::{BusResult, MessageBus, MessageHandler};
use quarry_common::error::QuarryResult;
use quarry_db::connector::models::{Connector, ConnectorStatus};
use quarry_db::connector::repositories::ConnectorRepository;
use quarry_db::document::models::{Document, DocumentStatus, NewDocument};
use quarry_db::document::repositories::DocumentRepository;

pub fn calendar_connector(base_url: &str) -> Connector {
    Connector {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        name: "work calendar".to_string(),
        kind: "google_calendar".to_string(),
        config: serde_json::json!({
            "access_token": "tok",
            "base_url": base_url,
            "max_retries": 1,
            "timeout_secs": 5,
        }),
        state: serde_json::json!({}),
        status: ConnectorStatus::Pending,
        status_message: None,
        refresh_freq_secs: 3600,
        last_sync_at: None,
        docs_analyzed: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct MockConnectorRepository {
    rows: Mutex<HashMap<Uuid, Connector>>,
}

impl MockConnectorRepository {
    pub fn insert(&self, connector: Connector) {
        self.rows
            .lock()
            .expect("connector rows poisoned")
            .insert(connector.id, connector);
    }
}

#[async_trait]
impl ConnectorRepository for MockConnectorRepository {
    async fn get(&self, id: Uuid) -> QuarryResult<Option<Connector>> {
        Ok(self
            .rows
            .lock()
            .expect("connector rows poisoned")
            .get(&id)
            .cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: ConnectorStatus,
        message: Option<&str>,
    ) -> QuarryResult<()> {
        if let Some(row) = self
            .rows
            .lock()
            .expect("connector rows poisoned")
            .get_mut(&id)
        {
            row.status = status;
            row.status_message = message.map(str::to_string);
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn save_state(&self, id: Uuid, state: &serde_json::Value) -> QuarryResult<()> {
        if let Some(row) = self
            .rows
            .lock()
            .expect("connector rows poisoned")
            .get_mut(&id)
        {
            row.state = state.clone();
        }
        Ok(())
    }

    async fn finish_sync(&self, id: Uuid, processed: i64) -> QuarryResult<()> {
        if let Some(row) = self
            .rows
            .lock()
            .expect("connector rows poisoned")
            .get_mut(&id)
        {
            row.docs_analyzed += processed;
            row.last_sync_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_due(&self, limit: i64) -> QuarryResult<Vec<Connector>> {
        let rows = self.rows.lock().expect("connector rows poisoned");
        let now = Utc::now();
        Ok(rows
            .values()
            .filter(|c| {
                !matches!(
                    c.status,
                    ConnectorStatus::Pending | ConnectorStatus::Syncing | ConnectorStatus::Disabled
                ) && c
                    .last_sync_at
                    .map_or(true, |last| (now - last).num_seconds() >= c.refresh_freq_secs)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_pending(&self, id: Uuid) -> QuarryResult<()> {
        self.set_status(id, ConnectorStatus::Pending, None).await
    }
}

#[derive(Default)]
pub struct MockDocumentRepository {
    rows: Mutex<HashMap<(Uuid, String), Document>>,
}

impl MockDocumentRepository {
    pub fn seed(&self, connector_id: Uuid, source_id: &str, content_hash: &str) {
        let doc = Document {
            id: Uuid::new_v4(),
            connector_id,
            source_id: source_id.to_string(),
            title: source_id.to_string(),
            blob_key: format!("{connector_id}/xx/{content_hash}"),
            content_hash: content_hash.to_string(),
            mime_type: "text/plain".to_string(),
            status: DocumentStatus::Completed,
            original_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.rows
            .lock()
            .expect("document rows poisoned")
            .insert((connector_id, source_id.to_string()), doc);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().expect("document rows poisoned").len()
    }

    pub fn is_deleted(&self, connector_id: Uuid, source_id: &str) -> bool {
        self.rows
            .lock()
            .expect("document rows poisoned")
            .get(&(connector_id, source_id.to_string()))
            .is_some_and(|d| d.status == DocumentStatus::Deleted)
    }
}

#[async_trait]
impl DocumentRepository for MockDocumentRepository {
    async fn get_by_source(
        &self,
        connector_id: Uuid,
        source_id: &str,
    ) -> QuarryResult<Option<Document>> {
        Ok(self
            .rows
            .lock()
            .expect("document rows poisoned")
            .get(&(connector_id, source_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, doc: NewDocument) -> QuarryResult<Document> {
        let mut rows = self.rows.lock().expect("document rows poisoned");
        let key = (doc.connector_id, doc.source_id.clone());
        let row = rows
            .entry(key)
            .and_modify(|existing| {
                existing.title = doc.title.clone();
                existing.blob_key = doc.blob_key.clone();
                existing.content_hash = doc.content_hash.clone();
                existing.mime_type = doc.mime_type.clone();
                existing.original_url = doc.original_url.clone();
                existing.status = DocumentStatus::Pending;
                existing.updated_at = Utc::now();
            })
            .or_insert_with(|| Document {
                id: Uuid::new_v4(),
                connector_id: doc.connector_id,
                source_id: doc.source_id.clone(),
                title: doc.title.clone(),
                blob_key: doc.blob_key.clone(),
                content_hash: doc.content_hash.clone(),
                mime_type: doc.mime_type.clone(),
                status: DocumentStatus::Pending,
                original_url: doc.original_url.clone(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
        Ok(row.clone())
    }

    async fn mark_deleted(&self, connector_id: Uuid, source_id: &str) -> QuarryResult<bool> {
        let mut rows = self.rows.lock().expect("document rows poisoned");
        match rows.get_mut(&(connector_id, source_id.to_string())) {
            Some(row) => {
                row.status = DocumentStatus::Deleted;
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Bus double that records published payloads per subject.
#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl RecordingBus {
    pub fn published(&self, subject: &str) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .expect("messages poisoned")
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .messages
            .lock()
            .expect("messages poisoned")
            .keys()
            .cloned()
            .collect();
        subjects.sort();
        subjects
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.messages
            .lock()
            .expect("messages poisoned")
            .entry(subject.to_string())
            .or_default()
            .push(payload);
        Ok(())
    }

    async fn queue_subscribe(
        &self,
        _subject: &str,
        _queue: &str,
        _handler: std::sync::Arc<dyn MessageHandler>,
    ) -> BusResult<()> {
        Ok(())
    }
}
