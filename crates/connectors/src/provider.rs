use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::checkpoint::Checkpoint;
use crate::error::ProviderError;
use quarry_common::types::ProviderKind;

/// Per-invocation batch cap for `detect_changes`. Adapters stop paging once
/// this many changes are emitted (the page in flight is finished first) and
/// leave the rest behind the checkpoint's has-more flag.
pub const MAX_ITEMS_PER_PASS: usize = 100;

/// Items larger than this are skipped with `FileTooLarge`.
pub const MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// One normalized change event from a provider's feed.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Update {
        source_id: String,
        metadata: serde_json::Value,
    },
    Delete {
        source_id: String,
    },
}

impl Change {
    pub fn source_id(&self) -> &str {
        match self {
            Change::Update { source_id, .. } => source_id,
            Change::Delete { source_id } => source_id,
        }
    }
}

/// Principals entitled to see an item, reported to the permission layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ExternalAccess {
    Public,
    Restricted {
        users: Vec<String>,
        groups: Vec<String>,
    },
}

/// One materialized source item.
#[derive(Debug, Clone)]
pub struct Item {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub content_hash: String,
    pub title: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub access: ExternalAccess,
    pub original_url: Option<String>,
}

/// Content fingerprint used for the Document hash column and blob keys.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stateless adapter over one external source.
///
/// `authenticate` validates and stores the connector's credentials; the
/// remaining calls use the stored, validated config. `detect_changes`
/// produces a bounded batch per invocation and records resume state on the
/// checkpoint, including whether more work remains.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn authenticate(&mut self, config: &serde_json::Value) -> Result<(), ProviderError>;

    /// Lightweight liveness probe. Never errors; false on any failure.
    async fn check_connection(&self) -> bool;

    async fn detect_changes(
        &self,
        checkpoint: &mut Checkpoint,
    ) -> Result<Vec<Change>, ProviderError>;

    async fn fetch_item(&self, metadata: &serde_json::Value) -> Result<Item, ProviderError>;

    async fn access_for(
        &self,
        metadata: &serde_json::Value,
    ) -> Result<ExternalAccess, ProviderError>;

    fn new_checkpoint(&self) -> Checkpoint {
        Checkpoint::zero(self.kind())
    }

    /// Release adapter-owned network resources. HTTP clients drop their
    /// pools on drop, so the default is a no-op.
    fn close(&mut self) {}
}
