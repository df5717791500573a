use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::checkpoint::Checkpoint;
use crate::error::ProviderError;
use crate::http::{default_max_retries, default_timeout_secs, ApiClient};
use crate::provider::{content_hash, Change, ExternalAccess, Item, Provider, MAX_ITEMS_PER_PASS};
use quarry_common::types::ProviderKind;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleCalendarConfig {
    pub access_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "nextSyncToken")]
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Google Calendar adapter.
///
/// Calendars are enumerated every pass (discovery is not cached) and
/// iterated in a stable order with one sync token per calendar, so an
/// expired token on one calendar never resets the others.
#[derive(Default)]
pub struct GoogleCalendarProvider {
    config: Option<GoogleCalendarConfig>,
    api: Option<ApiClient>,
}

impl GoogleCalendarProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn api(&self) -> Result<(&ApiClient, &GoogleCalendarConfig), ProviderError> {
        match (&self.api, &self.config) {
            (Some(api), Some(config)) => Ok((api, config)),
            _ => Err(ProviderError::Authentication(
                "provider not authenticated".to_string(),
            )),
        }
    }

    async fn list_calendar_ids(&self) -> Result<Vec<String>, ProviderError> {
        let (api, config) = self.api()?;
        let url = format!("{}/users/me/calendarList", config.base_url);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        // Bounded pagination; calendar lists are small in practice.
        for _ in 0..10 {
            let mut query = vec![("maxResults", "100".to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: CalendarListPage = serde_json::from_value(api.get_json(&url, &query).await?)
                .map_err(|e| ProviderError::Decode(e.to_string()))?;

            for entry in page.items {
                if let Some(id) = entry["id"].as_str() {
                    ids.push(id.to_string());
                }
            }
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        // Stable iteration order across passes.
        ids.sort();
        Ok(ids)
    }

    async fn list_events_page(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventsPage, ProviderError> {
        let (api, config) = self.api()?;
        let url = format!("{}/calendars/{}/events", config.base_url, calendar_id);

        let mut query = vec![("maxResults", "100".to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        } else if let Some(token) = sync_token {
            query.push(("syncToken", token.to_string()));
        }

        serde_json::from_value(api.get_json(&url, &query).await?)
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn translate(calendar_id: &str, event: serde_json::Value) -> Option<Change> {
        let event_id = event["id"].as_str()?.to_string();
        let source_id = format!("gcal_{calendar_id}_{event_id}");

        if event["status"].as_str() == Some("cancelled") {
            return Some(Change::Delete { source_id });
        }

        Some(Change::Update {
            source_id,
            metadata: serde_json::json!({
                "calendar_id": calendar_id,
                "event_id": event_id,
                "event": event,
            }),
        })
    }

    fn event_coords(metadata: &serde_json::Value) -> Result<(&str, &str), ProviderError> {
        let calendar_id = metadata["calendar_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode("metadata missing calendar_id".to_string()))?;
        let event_id = metadata["event_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode("metadata missing event_id".to_string()))?;
        Ok((calendar_id, event_id))
    }

    fn render_event(event: &serde_json::Value) -> (String, String) {
        let summary = event["summary"].as_str().unwrap_or("(untitled event)");
        let mut body = format!("# {summary}\n");
        if let Some(start) = event["start"]["dateTime"]
            .as_str()
            .or_else(|| event["start"]["date"].as_str())
        {
            body.push_str(&format!("\n- Start: {start}"));
        }
        if let Some(end) = event["end"]["dateTime"]
            .as_str()
            .or_else(|| event["end"]["date"].as_str())
        {
            body.push_str(&format!("\n- End: {end}"));
        }
        if let Some(location) = event["location"].as_str() {
            body.push_str(&format!("\n- Location: {location}"));
        }
        if let Some(description) = event["description"].as_str() {
            body.push_str(&format!("\n\n{description}"));
        }
        body.push('\n');
        (summary.to_string(), body)
    }

    fn event_access(event: &serde_json::Value) -> ExternalAccess {
        if event["visibility"].as_str() == Some("public") {
            return ExternalAccess::Public;
        }
        let users = event["attendees"]
            .as_array()
            .map(|attendees| {
                attendees
                    .iter()
                    .filter_map(|a| a["email"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        ExternalAccess::Restricted {
            users,
            groups: Vec::new(),
        }
    }
}

#[async_trait]
impl Provider for GoogleCalendarProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleCalendar
    }

    async fn authenticate(&mut self, config: &serde_json::Value) -> Result<(), ProviderError> {
        let parsed: GoogleCalendarConfig = serde_json::from_value(config.clone())
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
        let url = format!("{}/users/me/calendarList", config.base_url);
        api.get_json(&url, &[("maxResults", "1".to_string())])
            .await
            .is_ok()
    }

    async fn detect_changes(
        &self,
        checkpoint: &mut Checkpoint,
    ) -> Result<Vec<Change>, ProviderError> {
        if !matches!(checkpoint, Checkpoint::GoogleCalendar { .. }) {
            *checkpoint = self.new_checkpoint();
        }
        let Checkpoint::GoogleCalendar {
            sync_tokens,
            calendar_ids,
            current_calendar_idx,
            page_token,
            has_more,
        } = checkpoint
        else {
            unreachable!("checkpoint normalized above");
        };

        // Fresh pass: re-enumerate calendars (discovery is never cached).
        if !*has_more {
            *calendar_ids = self.list_calendar_ids().await?;
            *current_calendar_idx = 0;
            *page_token = None;
            *has_more = true;
        }

        let mut changes = Vec::new();

        while *current_calendar_idx < calendar_ids.len() && changes.len() < MAX_ITEMS_PER_PASS {
            let calendar_id = calendar_ids[*current_calendar_idx].clone();
            let sync_token = sync_tokens.get(&calendar_id).cloned();

            let page = match self
                .list_events_page(&calendar_id, sync_token.as_deref(), page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(ProviderError::Gone) => {
                    // Token expired for this calendar only: relist it in
                    // full, leave the other calendars' tokens untouched. A
                    // 410 on the tokenless relisting itself propagates
                    // instead of looping.
                    if sync_tokens.remove(&calendar_id).is_none() {
                        return Err(ProviderError::Gone);
                    }
                    tracing::info!(calendar_id, "sync token expired, full relisting");
                    *page_token = None;
                    continue;
                }
                Err(e) => return Err(e),
            };

            for event in page.items {
                if let Some(change) = Self::translate(&calendar_id, event) {
                    changes.push(change);
                }
            }

            if let Some(next) = page.next_page_token {
                *page_token = Some(next);
            } else {
                if let Some(token) = page.next_sync_token {
                    sync_tokens.insert(calendar_id, token);
                }
                *page_token = None;
                *current_calendar_idx += 1;
            }
        }

        *has_more = *current_calendar_idx < calendar_ids.len();
        Ok(changes)
    }

    async fn fetch_item(&self, metadata: &serde_json::Value) -> Result<Item, ProviderError> {
        let (api, config) = self.api()?;
        let (calendar_id, event_id) = Self::event_coords(metadata)?;

        let url = format!(
            "{}/calendars/{}/events/{}",
            config.base_url, calendar_id, event_id
        );
        let event = api.get_json(&url, &[]).await?;

        let (title, body) = Self::render_event(&event);
        let content = body.into_bytes();
        let modified_at = event["updated"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Item {
            content_hash: content_hash(&content),
            content,
            mime_type: "text/markdown".to_string(),
            title,
            modified_at,
            access: Self::event_access(&event),
            original_url: event["htmlLink"].as_str().map(str::to_string),
        })
    }

    async fn access_for(
        &self,
        metadata: &serde_json::Value,
    ) -> Result<ExternalAccess, ProviderError> {
        let (api, config) = self.api()?;
        let (calendar_id, event_id) = Self::event_coords(metadata)?;

        let url = format!(
            "{}/calendars/{}/events/{}",
            config.base_url, calendar_id, event_id
        );
        let event = api.get_json(&url, &[]).await?;
        Ok(Self::event_access(&event))
    }
}
