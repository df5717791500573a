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

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,trashed,webViewLink";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleDriveConfig {
    pub access_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct FilesPage {
    #[serde(default)]
    files: Vec<serde_json::Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangesPage {
    #[serde(default)]
    changes: Vec<serde_json::Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "newStartPageToken")]
    new_start_page_token: Option<String>,
}

/// Google Drive adapter.
///
/// First pass lists the whole drive, then snapshots a changes cursor;
/// subsequent passes page the changes feed from that cursor. Removed or
/// trashed files translate to deletes.
#[derive(Default)]
pub struct GoogleDriveProvider {
    config: Option<GoogleDriveConfig>,
    api: Option<ApiClient>,
}

impl GoogleDriveProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn api(&self) -> Result<(&ApiClient, &GoogleDriveConfig), ProviderError> {
        match (&self.api, &self.config) {
            (Some(api), Some(config)) => Ok((api, config)),
            _ => Err(ProviderError::Authentication(
                "provider not authenticated".to_string(),
            )),
        }
    }

    fn translate_file(file: serde_json::Value) -> Option<Change> {
        let file_id = file["id"].as_str()?.to_string();
        if file["trashed"].as_bool() == Some(true) {
            return Some(Change::Delete { source_id: file_id });
        }
        Some(Change::Update {
            source_id: file_id.clone(),
            metadata: serde_json::json!({ "file_id": file_id, "file": file }),
        })
    }

    fn translate_change(change: serde_json::Value) -> Option<Change> {
        let file_id = change["fileId"].as_str()?.to_string();
        if change["removed"].as_bool() == Some(true) {
            return Some(Change::Delete { source_id: file_id });
        }
        Self::translate_file(change["file"].clone())
    }

    /// Export MIME for Google-native files, which have no raw bytes.
    fn export_mime(mime_type: &str) -> Option<&'static str> {
        match mime_type {
            "application/vnd.google-apps.document" => Some("text/plain"),
            "application/vnd.google-apps.spreadsheet" => Some("text/csv"),
            "application/vnd.google-apps.presentation" => Some("text/plain"),
            _ => None,
        }
    }
}

#[async_trait]
impl Provider for GoogleDriveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleDrive
    }

    async fn authenticate(&mut self, config: &serde_json::Value) -> Result<(), ProviderError> {
        let parsed: GoogleDriveConfig = serde_json::from_value(config.clone())
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
        let url = format!("{}/about", config.base_url);
        api.get_json(&url, &[("fields", "user".to_string())])
            .await
            .is_ok()
    }

    async fn detect_changes(
        &self,
        checkpoint: &mut Checkpoint,
    ) -> Result<Vec<Change>, ProviderError> {
        if !matches!(checkpoint, Checkpoint::GoogleDrive { .. }) {
            *checkpoint = self.new_checkpoint();
        }
        let Checkpoint::GoogleDrive {
            start_page_token,
            page_token,
            has_more,
        } = checkpoint
        else {
            unreachable!("checkpoint normalized above");
        };

        let (api, config) = self.api()?;
        let mut changes = Vec::new();

        // Incremental: page the changes feed from the stored cursor. An
        // expired cursor (410) drops through to the full-listing path; a
        // second 410 on the listing itself propagates.
        if start_page_token.is_some() {
            let url = format!("{}/changes", config.base_url);
            loop {
                let cursor = page_token
                    .clone()
                    .or_else(|| start_page_token.clone())
                    .unwrap_or_default();
                let query = vec![
                    ("pageToken", cursor),
                    ("pageSize", "100".to_string()),
                    (
                        "fields",
                        format!(
                            "nextPageToken,newStartPageToken,changes(fileId,removed,file({FILE_FIELDS}))"
                        ),
                    ),
                ];
                let page: ChangesPage = match api.get_json(&url, &query).await {
                    Ok(body) => serde_json::from_value(body)
                        .map_err(|e| ProviderError::Decode(e.to_string()))?,
                    Err(ProviderError::Gone) => {
                        tracing::info!("changes cursor expired, full relisting");
                        *start_page_token = None;
                        *page_token = None;
                        changes.clear();
                        break;
                    }
                    Err(e) => return Err(e),
                };

                for change in page.changes {
                    if let Some(change) = Self::translate_change(change) {
                        changes.push(change);
                    }
                }

                if let Some(new_token) = page.new_start_page_token {
                    *start_page_token = Some(new_token);
                    *page_token = None;
                    break;
                }
                *page_token = page.next_page_token;
                if page_token.is_none() || changes.len() >= MAX_ITEMS_PER_PASS {
                    break;
                }
            }
            if start_page_token.is_some() {
                *has_more = page_token.is_some();
                return Ok(changes);
            }
        }

        // Initial full listing, also the fallback after cursor expiry. The
        // changes cursor is snapshotted once the listing completes; edits
        // made during the listing window surface on their next modification.
        let url = format!("{}/files", config.base_url);
        loop {
            let mut query = vec![
                ("pageSize", "100".to_string()),
                ("fields", format!("nextPageToken,files({FILE_FIELDS})")),
                ("q", "trashed = false".to_string()),
            ];
            if let Some(token) = &*page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: FilesPage = serde_json::from_value(api.get_json(&url, &query).await?)
                .map_err(|e| ProviderError::Decode(e.to_string()))?;

            for file in page.files {
                if let Some(change) = Self::translate_file(file) {
                    changes.push(change);
                }
            }
            *page_token = page.next_page_token;

            if page_token.is_none() {
                let token_url = format!("{}/changes/startPageToken", config.base_url);
                let body = api.get_json(&token_url, &[]).await?;
                *start_page_token = body["startPageToken"].as_str().map(str::to_string);
                break;
            }
            if changes.len() >= MAX_ITEMS_PER_PASS {
                break;
            }
        }
        *has_more = page_token.is_some();
        Ok(changes)
    }

    async fn fetch_item(&self, metadata: &serde_json::Value) -> Result<Item, ProviderError> {
        let (api, config) = self.api()?;
        let file_id = metadata["file_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode("metadata missing file_id".to_string()))?;

        let meta_url = format!("{}/files/{}", config.base_url, file_id);
        let file = api
            .get_json(&meta_url, &[("fields", FILE_FIELDS.to_string())])
            .await?;

        let source_mime = file["mimeType"].as_str().unwrap_or("application/octet-stream");
        if let Some(size) = file["size"].as_str().and_then(|s| s.parse::<u64>().ok()) {
            if size > MAX_FILE_SIZE_BYTES {
                return Err(ProviderError::FileTooLarge {
                    size,
                    limit: MAX_FILE_SIZE_BYTES,
                });
            }
        }

        let (content, mime_type) = if let Some(export_mime) = Self::export_mime(source_mime) {
            let url = format!("{}/files/{}/export", config.base_url, file_id);
            let (bytes, _) = api
                .get_bytes(&url, &[("mimeType", export_mime.to_string())])
                .await?;
            (bytes, export_mime.to_string())
        } else {
            let (bytes, mime) = api
                .get_bytes(&meta_url, &[("alt", "media".to_string())])
                .await?;
            (bytes, mime.unwrap_or_else(|| source_mime.to_string()))
        };

        if content.len() as u64 > MAX_FILE_SIZE_BYTES {
            return Err(ProviderError::FileTooLarge {
                size: content.len() as u64,
                limit: MAX_FILE_SIZE_BYTES,
            });
        }

        let access = self.access_for(metadata).await?;
        let modified_at = file["modifiedTime"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Item {
            content_hash: content_hash(&content),
            content,
            mime_type,
            title: file["name"].as_str().unwrap_or(file_id).to_string(),
            modified_at,
            access,
            original_url: file["webViewLink"].as_str().map(str::to_string),
        })
    }

    async fn access_for(
        &self,
        metadata: &serde_json::Value,
    ) -> Result<ExternalAccess, ProviderError> {
        let (api, config) = self.api()?;
        let file_id = metadata["file_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode("metadata missing file_id".to_string()))?;

        let url = format!("{}/files/{}/permissions", config.base_url, file_id);
        let body = api
            .get_json(
                &url,
                &[(
                    "fields",
                    "permissions(type,emailAddress,domain)".to_string(),
                )],
            )
            .await?;

        let mut users = Vec::new();
        let mut groups = Vec::new();
        for permission in body["permissions"].as_array().into_iter().flatten() {
            match permission["type"].as_str() {
                Some("anyone") => return Ok(ExternalAccess::Public),
                Some("user") => {
                    if let Some(email) = permission["emailAddress"].as_str() {
                        users.push(email.to_string());
                    }
                }
                Some("group") => {
                    if let Some(email) = permission["emailAddress"].as_str() {
                        groups.push(email.to_string());
                    }
                }
                Some("domain") => {
                    if let Some(domain) = permission["domain"].as_str() {
                        groups.push(domain.to_string());
                    }
                }
                _ => {}
            }
        }
        Ok(ExternalAccess::Restricted { users, groups })
    }
}
