use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::checkpoint::Checkpoint;
use crate::error::ProviderError;
use crate::http::{default_max_retries, default_timeout_secs, ApiClient};
use crate::provider::{content_hash, Change, ExternalAccess, Item, Provider, MAX_ITEMS_PER_PASS};
use quarry_common::types::ProviderKind;

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailConfig {
    pub access_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ThreadsPage {
    #[serde(default)]
    threads: Vec<serde_json::Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    history: Vec<serde_json::Value>,
    #[serde(rename = "historyId")]
    history_id: Option<String>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Gmail adapter. Source items are mail threads; incremental passes walk
/// the mailbox history feed from a single global history id watermark.
///
/// Gmail rejects a stale start history id with 404 rather than 410, so
/// that status doubles as the full-resync signal here.
#[derive(Default)]
pub struct GmailProvider {
    config: Option<GmailConfig>,
    api: Option<ApiClient>,
}

impl GmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn api(&self) -> Result<(&ApiClient, &GmailConfig), ProviderError> {
        match (&self.api, &self.config) {
            (Some(api), Some(config)) => Ok((api, config)),
            _ => Err(ProviderError::Authentication(
                "provider not authenticated".to_string(),
            )),
        }
    }

    async fn profile_history_id(&self) -> Result<Option<String>, ProviderError> {
        let (api, config) = self.api()?;
        let url = format!("{}/users/me/profile", config.base_url);
        let profile = api.get_json(&url, &[]).await?;
        Ok(profile["historyId"].as_str().map(str::to_string))
    }

    fn thread_update(thread_id: &str) -> Change {
        Change::Update {
            source_id: thread_id.to_string(),
            metadata: serde_json::json!({ "thread_id": thread_id }),
        }
    }

    fn header<'a>(message: &'a serde_json::Value, name: &str) -> Option<&'a str> {
        message["payload"]["headers"]
            .as_array()?
            .iter()
            .find(|h| h["name"].as_str().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .and_then(|h| h["value"].as_str())
    }

    fn render_thread(thread: &serde_json::Value) -> (String, String) {
        let messages = thread["messages"].as_array();
        let first = messages.and_then(|m| m.first());
        let subject = first
            .and_then(|m| Self::header(m, "Subject"))
            .unwrap_or("(no subject)");

        let mut body = format!("# {subject}\n");
        for message in messages.into_iter().flatten() {
            body.push('\n');
            if let Some(from) = Self::header(message, "From") {
                body.push_str(&format!("**From:** {from}\n"));
            }
            if let Some(date) = Self::header(message, "Date") {
                body.push_str(&format!("**Date:** {date}\n"));
            }
            if let Some(snippet) = message["snippet"].as_str() {
                body.push_str(&format!("\n{snippet}\n"));
            }
        }
        (subject.to_string(), body)
    }
}

#[async_trait]
impl Provider for GmailProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    async fn authenticate(&mut self, config: &serde_json::Value) -> Result<(), ProviderError> {
        let parsed: GmailConfig = serde_json::from_value(config.clone())
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
        self.profile_history_id().await.is_ok()
    }

    async fn detect_changes(
        &self,
        checkpoint: &mut Checkpoint,
    ) -> Result<Vec<Change>, ProviderError> {
        if !matches!(checkpoint, Checkpoint::Gmail { .. }) {
            *checkpoint = self.new_checkpoint();
        }
        let Checkpoint::Gmail {
            history_id,
            page_token,
            has_more,
        } = checkpoint
        else {
            unreachable!("checkpoint normalized above");
        };

        let (api, config) = self.api()?;
        let mut changes = Vec::new();

        if history_id.is_none() {
            // Initial full listing of all threads; the watermark is taken
            // from the profile once the listing completes.
            let url = format!("{}/users/me/threads", config.base_url);
            loop {
                let mut query = vec![("maxResults", "100".to_string())];
                if let Some(token) = &*page_token {
                    query.push(("pageToken", token.clone()));
                }
                let page: ThreadsPage = serde_json::from_value(api.get_json(&url, &query).await?)
                    .map_err(|e| ProviderError::Decode(e.to_string()))?;

                for thread in page.threads {
                    if let Some(id) = thread["id"].as_str() {
                        changes.push(Self::thread_update(id));
                    }
                }
                *page_token = page.next_page_token;

                if page_token.is_none() {
                    *history_id = self.profile_history_id().await?;
                    break;
                }
                if changes.len() >= MAX_ITEMS_PER_PASS {
                    break;
                }
            }
            *has_more = page_token.is_some();
            return Ok(changes);
        }

        // Incremental: walk the history feed from the watermark.
        let url = format!("{}/users/me/history", config.base_url);
        let mut latest_history_id = None;
        loop {
            let mut query = vec![
                (
                    "startHistoryId",
                    history_id.clone().unwrap_or_default(),
                ),
                ("maxResults", "100".to_string()),
            ];
            if let Some(token) = &*page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: HistoryPage = match api.get_json(&url, &query).await {
                Ok(body) => serde_json::from_value(body)
                    .map_err(|e| ProviderError::Decode(e.to_string()))?,
                // Stale watermark: Gmail answers 404 instead of 410.
                Err(ProviderError::Gone)
                | Err(ProviderError::Download { status: 404, .. }) => {
                    tracing::info!("gmail history id expired, full relisting");
                    *history_id = None;
                    *page_token = None;
                    *has_more = true;
                    return Ok(changes);
                }
                Err(e) => return Err(e),
            };

            for entry in page.history {
                for removed in entry["messagesDeleted"].as_array().into_iter().flatten() {
                    if let Some(thread_id) = removed["message"]["threadId"].as_str() {
                        changes.push(Change::Delete {
                            source_id: thread_id.to_string(),
                        });
                    }
                }
                for added in entry["messagesAdded"].as_array().into_iter().flatten() {
                    if let Some(thread_id) = added["message"]["threadId"].as_str() {
                        changes.push(Self::thread_update(thread_id));
                    }
                }
            }
            if page.history_id.is_some() {
                latest_history_id = page.history_id;
            }

            *page_token = page.next_page_token;
            if page_token.is_none() {
                if latest_history_id.is_some() {
                    *history_id = latest_history_id;
                }
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
        let thread_id = metadata["thread_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode("metadata missing thread_id".to_string()))?;

        let url = format!("{}/users/me/threads/{}", config.base_url, thread_id);
        let thread = api
            .get_json(&url, &[("format", "metadata".to_string())])
            .await?;

        let (title, body) = Self::render_thread(&thread);
        let content = body.into_bytes();

        let modified_at = thread["messages"]
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m["internalDate"].as_str())
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(Item {
            content_hash: content_hash(&content),
            content,
            mime_type: "text/markdown".to_string(),
            title,
            modified_at,
            access: ExternalAccess::Restricted {
                users: Vec::new(),
                groups: Vec::new(),
            },
            original_url: Some(format!("https://mail.google.com/mail/u/0/#all/{thread_id}")),
        })
    }

    async fn access_for(
        &self,
        _metadata: &serde_json::Value,
    ) -> Result<ExternalAccess, ProviderError> {
        // Mail is private to the connected mailbox.
        Ok(ExternalAccess::Restricted {
            users: Vec::new(),
            groups: Vec::new(),
        })
    }
}
