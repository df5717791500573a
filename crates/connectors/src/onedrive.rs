use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::checkpoint::Checkpoint;
use crate::error::ProviderError;
use crate::http::{default_max_retries, default_timeout_secs, ApiClient};
use crate::provider::{
    content_hash, Change, ExternalAccess, Item, Provider, MAX_FILE_SIZE_BYTES, MAX_ITEMS_PER_PASS,
};
use quarry_common::types::ProviderKind;

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnedriveConfig {
    pub access_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct DeltaPage {
    #[serde(default)]
    value: Vec<serde_json::Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

/// OneDrive adapter over the Graph drive delta feed.
///
/// The delta link doubles as full and incremental cursor: absent, the feed
/// replays the whole drive; present, it yields only changes since the last
/// pass. A 410 on the stored link clears it for a full replay.
#[derive(Default)]
pub struct OnedriveProvider {
    config: Option<OnedriveConfig>,
    api: Option<ApiClient>,
}

impl OnedriveProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn api(&self) -> Result<(&ApiClient, &OnedriveConfig), ProviderError> {
        match (&self.api, &self.config) {
            (Some(api), Some(config)) => Ok((api, config)),
            _ => Err(ProviderError::Authentication(
                "provider not authenticated".to_string(),
            )),
        }
    }

    fn translate(item: serde_json::Value) -> Option<Change> {
        let item_id = item["id"].as_str()?.to_string();
        if item["deleted"].is_object() {
            return Some(Change::Delete { source_id: item_id });
        }
        // Folders are containment, not content.
        if item["folder"].is_object() {
            return None;
        }
        Some(Change::Update {
            source_id: item_id.clone(),
            metadata: serde_json::json!({ "item_id": item_id, "item": item }),
        })
    }
}

#[async_trait]
impl Provider for OnedriveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Onedrive
    }

    async fn authenticate(&mut self, config: &serde_json::Value) -> Result<(), ProviderError> {
        let parsed: OnedriveConfig = serde_json::from_value(config.clone())
            .map_err(|e| ProviderError::Authentication(format!("invalid config: {e}")))?;
        if parsed.access_token.is_empty() {
            return Err(ProviderError::Authentication(
                "access_token is empty".to_string(),
            ));
        }
        self.api = Some(ApiClient::new(
            &parsed.access_token,
            parsed.timeout_secs,
            parsed.max_retries,
        )?);
        self.config = Some(parsed);
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        let Ok((api, config)) = self.api() else {
            return false;
        };
        let url = format!("{}/me/drive", config.base_url);
        api.get_json(&url, &[]).await.is_ok()
    }

    async fn detect_changes(
        &self,
        checkpoint: &mut Checkpoint,
    ) -> Result<Vec<Change>, ProviderError> {
        if !matches!(checkpoint, Checkpoint::Onedrive { .. }) {
            *checkpoint = self.new_checkpoint();
        }
        let Checkpoint::Onedrive {
            delta_link,
            next_link,
            has_more,
        } = checkpoint
        else {
            unreachable!("checkpoint normalized above");
        };

        let (api, config) = self.api()?;
        let mut changes = Vec::new();

        loop {
            // Graph hands back absolute continuation URLs.
            let url = next_link
                .clone()
                .or_else(|| delta_link.clone())
                .unwrap_or_else(|| format!("{}/me/drive/root/delta", config.base_url));

            let page: DeltaPage = match api.get_json(&url, &[]).await {
                Ok(body) => serde_json::from_value(body)
                    .map_err(|e| ProviderError::Decode(e.to_string()))?,
                Err(ProviderError::Gone) => {
                    // One replay per pass: a 410 on the bare delta URL
                    // itself propagates instead of looping.
                    if delta_link.is_none() && next_link.is_none() {
                        return Err(ProviderError::Gone);
                    }
                    tracing::info!("onedrive delta link expired, full replay");
                    *delta_link = None;
                    *next_link = None;
                    continue;
                }
                Err(e) => return Err(e),
            };

            for item in page.value {
                if let Some(change) = Self::translate(item) {
                    changes.push(change);
                }
            }

            if let Some(link) = page.delta_link {
                *delta_link = Some(link);
                *next_link = None;
                break;
            }
            *next_link = page.next_link;
            if next_link.is_none() || changes.len() >= MAX_ITEMS_PER_PASS {
                break;
            }
        }

        *has_more = next_link.is_some();
        Ok(changes)
    }

    async fn fetch_item(&self, metadata: &serde_json::Value) -> Result<Item, ProviderError> {
        let (api, config) = self.api()?;
        let item_id = metadata["item_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode("metadata missing item_id".to_string()))?;

        let meta_url = format!("{}/me/drive/items/{}", config.base_url, item_id);
        let item = api.get_json(&meta_url, &[]).await?;

        if let Some(size) = item["size"].as_u64() {
            if size > MAX_FILE_SIZE_BYTES {
                return Err(ProviderError::FileTooLarge {
                    size,
                    limit: MAX_FILE_SIZE_BYTES,
                });
            }
        }

        let content_url = format!("{meta_url}/content");
        let (content, mime) = api.get_bytes(&content_url, &[]).await?;
        if content.len() as u64 > MAX_FILE_SIZE_BYTES {
            return Err(ProviderError::FileTooLarge {
                size: content.len() as u64,
                limit: MAX_FILE_SIZE_BYTES,
            });
        }

        let access = self.access_for(metadata).await?;
        let mime_type = mime
            .or_else(|| item["file"]["mimeType"].as_str().map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let modified_at = item["lastModifiedDateTime"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Item {
            content_hash: content_hash(&content),
            content,
            mime_type,
            title: item["name"].as_str().unwrap_or(item_id).to_string(),
            modified_at,
            access,
            original_url: item["webUrl"].as_str().map(str::to_string),
        })
    }

    async fn access_for(
        &self,
        metadata: &serde_json::Value,
    ) -> Result<ExternalAccess, ProviderError> {
        let (api, config) = self.api()?;
        let item_id = metadata["item_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode("metadata missing item_id".to_string()))?;

        let url = format!("{}/me/drive/items/{}/permissions", config.base_url, item_id);
        let body = api.get_json(&url, &[]).await?;

        let mut users = Vec::new();
        let groups = Vec::new();
        for permission in body["value"].as_array().into_iter().flatten() {
            if permission["link"]["scope"].as_str() == Some("anonymous") {
                return Ok(ExternalAccess::Public);
            }
            let grantees = permission["grantedToIdentitiesV2"]
                .as_array()
                .cloned()
                .unwrap_or_else(|| {
                    permission["grantedToV2"]
                        .as_object()
                        .map(|g| vec![serde_json::Value::Object(g.clone())])
                        .unwrap_or_default()
                });
            for grantee in grantees {
                if let Some(email) = grantee["user"]["email"].as_str() {
                    users.push(email.to_string());
                }
            }
        }
        Ok(ExternalAccess::Restricted { users, groups })
    }
}
