use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External source a connector pulls documents from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    GoogleDrive,
    GoogleCalendar,
    GoogleContacts,
    Gmail,
    Onedrive,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GoogleDrive => "google_drive",
            ProviderKind::GoogleCalendar => "google_calendar",
            ProviderKind::GoogleContacts => "google_contacts",
            ProviderKind::Gmail => "gmail",
            ProviderKind::Onedrive => "onedrive",
        }
    }

    pub fn all() -> [ProviderKind; 5] {
        [
            ProviderKind::GoogleDrive,
            ProviderKind::GoogleCalendar,
            ProviderKind::GoogleContacts,
            ProviderKind::Gmail,
            ProviderKind::Onedrive,
        ]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_drive" => Ok(ProviderKind::GoogleDrive),
            "google_calendar" => Ok(ProviderKind::GoogleCalendar),
            "google_contacts" => Ok(ProviderKind::GoogleContacts),
            "gmail" => Ok(ProviderKind::Gmail),
            "onedrive" => Ok(ProviderKind::Onedrive),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// Requested breadth of a sync pass. Carried for downstream correlation;
/// the engine always derives full-vs-incremental from the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncScope {
    Full,
    Incremental,
}

/// One "sync this connector" trigger, published per due connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTrigger {
    pub connector_id: Uuid,
    pub owner_id: Uuid,
    pub session_id: Uuid,
    pub kind: ProviderKind,
    pub scope: SyncScope,
    pub scope_id: Option<String>,
}

/// Emitted once per upserted document, consumed by the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReady {
    pub connector_id: Uuid,
    pub document_id: Uuid,
    pub source_id: String,
    pub blob_key: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    MaxDeliveries,
    Terminated,
}

impl AdvisoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvisoryKind::MaxDeliveries => "max_deliveries",
            AdvisoryKind::Terminated => "terminated",
        }
    }
}

/// Dead-letter advisory: a message exhausted its redelivery budget or was
/// explicitly terminated by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterAdvisory {
    pub stream: String,
    pub subject: String,
    pub kind: AdvisoryKind,
    pub deliveries: u32,
}
