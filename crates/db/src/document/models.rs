use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Error => "error",
            DocumentStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "error" => Ok(DocumentStatus::Error),
            "deleted" => Ok(DocumentStatus::Deleted),
            other => Err(format!("unknown document status: {other}")),
        }
    }
}

/// One distinct item seen from a connector, unique on
/// `(connector_id, source_id)`. Rows are updated in place on later
/// sightings and marked deleted rather than removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub connector_id: Uuid,
    pub source_id: String,
    pub title: String,
    pub blob_key: String,
    pub content_hash: String,
    pub mime_type: String,
    pub status: DocumentStatus,
    pub original_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert/update payload for the idempotent upsert.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub connector_id: Uuid,
    pub source_id: String,
    pub title: String,
    pub blob_key: String,
    pub content_hash: String,
    pub mime_type: String,
    pub original_url: Option<String>,
}
