use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a connector, driven by the scheduler and the sync
/// orchestrator. The CRUD layer only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    Pending,
    Syncing,
    Active,
    Error,
    Disabled,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Pending => "pending",
            ConnectorStatus::Syncing => "syncing",
            ConnectorStatus::Active => "active",
            ConnectorStatus::Error => "error",
            ConnectorStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConnectorStatus::Pending),
            "syncing" => Ok(ConnectorStatus::Syncing),
            "active" => Ok(ConnectorStatus::Active),
            "error" => Ok(ConnectorStatus::Error),
            "disabled" => Ok(ConnectorStatus::Disabled),
            other => Err(format!("unknown connector status: {other}")),
        }
    }
}

/// One configured external source.
///
/// `config` and `state` are opaque JSON blobs: `config` holds provider
/// credentials and scope filters, `state` the serialized checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub kind: String,
    pub config: serde_json::Value,
    pub state: serde_json::Value,
    pub status: ConnectorStatus,
    pub status_message: Option<String>,
    pub refresh_freq_secs: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub docs_analyzed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
