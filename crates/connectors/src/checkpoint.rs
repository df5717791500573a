use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use quarry_common::types::ProviderKind;

/// Resumable cursor for incremental change detection, one shape per
/// provider type.
///
/// A checkpoint is only a cursor, never an inventory: losing one degrades
/// to a full rescan, not to data loss. It is serialized into the
/// connector's opaque state blob and never queried directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Checkpoint {
    GoogleDrive {
        #[serde(default)]
        start_page_token: Option<String>,
        #[serde(default)]
        page_token: Option<String>,
        #[serde(default)]
        has_more: bool,
    },
    GoogleCalendar {
        /// One resume token per calendar; a 410 resets only its own entry.
        #[serde(default)]
        sync_tokens: BTreeMap<String, String>,
        #[serde(default)]
        calendar_ids: Vec<String>,
        #[serde(default)]
        current_calendar_idx: usize,
        #[serde(default)]
        page_token: Option<String>,
        #[serde(default)]
        has_more: bool,
    },
    GoogleContacts {
        #[serde(default)]
        sync_token: Option<String>,
        #[serde(default)]
        page_token: Option<String>,
        #[serde(default)]
        has_more: bool,
    },
    Gmail {
        /// Single global watermark over the whole mailbox history feed.
        #[serde(default)]
        history_id: Option<String>,
        #[serde(default)]
        page_token: Option<String>,
        #[serde(default)]
        has_more: bool,
    },
    Onedrive {
        #[serde(default)]
        delta_link: Option<String>,
        #[serde(default)]
        next_link: Option<String>,
        #[serde(default)]
        has_more: bool,
    },
}

impl Checkpoint {
    /// Fresh zero-state checkpoint: next pass is a full listing.
    pub fn zero(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::GoogleDrive => Checkpoint::GoogleDrive {
                start_page_token: None,
                page_token: None,
                has_more: false,
            },
            ProviderKind::GoogleCalendar => Checkpoint::GoogleCalendar {
                sync_tokens: BTreeMap::new(),
                calendar_ids: Vec::new(),
                current_calendar_idx: 0,
                page_token: None,
                has_more: false,
            },
            ProviderKind::GoogleContacts => Checkpoint::GoogleContacts {
                sync_token: None,
                page_token: None,
                has_more: false,
            },
            ProviderKind::Gmail => Checkpoint::Gmail {
                history_id: None,
                page_token: None,
                has_more: false,
            },
            ProviderKind::Onedrive => Checkpoint::Onedrive {
                delta_link: None,
                next_link: None,
                has_more: false,
            },
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Checkpoint::GoogleDrive { .. } => ProviderKind::GoogleDrive,
            Checkpoint::GoogleCalendar { .. } => ProviderKind::GoogleCalendar,
            Checkpoint::GoogleContacts { .. } => ProviderKind::GoogleContacts,
            Checkpoint::Gmail { .. } => ProviderKind::Gmail,
            Checkpoint::Onedrive { .. } => ProviderKind::Onedrive,
        }
    }

    /// Deserialize from the connector's state blob.
    ///
    /// Corrupt state, a foreign shape, or a shape from a different provider
    /// kind all fall back to the zero checkpoint: the next pass is a full
    /// resync, which the idempotent document upsert makes safe.
    pub fn from_state(kind: ProviderKind, state: &serde_json::Value) -> Self {
        if state.is_null() || state.as_object().is_some_and(|o| o.is_empty()) {
            return Self::zero(kind);
        }

        match serde_json::from_value::<Checkpoint>(state.clone()) {
            Ok(checkpoint) if checkpoint.kind() == kind => checkpoint,
            Ok(checkpoint) => {
                tracing::warn!(
                    expected = %kind,
                    found = %checkpoint.kind(),
                    "checkpoint shape from different provider kind, starting fresh"
                );
                Self::zero(kind)
            }
            Err(e) => {
                tracing::warn!(error = %e, "corrupt checkpoint state, starting fresh");
                Self::zero(kind)
            }
        }
    }

    pub fn to_state(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Whether the last `detect_changes` paused with work remaining.
    pub fn has_more(&self) -> bool {
        match self {
            Checkpoint::GoogleDrive { has_more, .. }
            | Checkpoint::GoogleCalendar { has_more, .. }
            | Checkpoint::GoogleContacts { has_more, .. }
            | Checkpoint::Gmail { has_more, .. }
            | Checkpoint::Onedrive { has_more, .. } => *has_more,
        }
    }
}
