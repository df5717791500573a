use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::checkpoint::Checkpoint;
use crate::error::ProviderError;
use crate::http::{default_max_retries, default_timeout_secs, ApiClient};
use crate::provider::{content_hash, Change, ExternalAccess, Item, Provider, MAX_ITEMS_PER_PASS};
use quarry_common::types::ProviderKind;

const DEFAULT_BASE_URL: &str = "https://people.googleapis.com/v1";

const PERSON_FIELDS: &str = "names,emailAddresses,phoneNumbers,organizations,metadata";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleContactsConfig {
    pub access_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ConnectionsPage {
    #[serde(default)]
    connections: Vec<serde_json::Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "nextSyncToken")]
    next_sync_token: Option<String>,
}

/// Google Contacts adapter over the People connections API.
///
/// One sync token covers the whole contact list; deleted contacts arrive in
/// the incremental feed flagged `metadata.deleted`.
#[derive(Default)]
pub struct GoogleContactsProvider {
    config: Option<GoogleContactsConfig>,
    api: Option<ApiClient>,
}

impl GoogleContactsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn api(&self) -> Result<(&ApiClient, &GoogleContactsConfig), ProviderError> {
        match (&self.api, &self.config) {
            (Some(api), Some(config)) => Ok((api, config)),
            _ => Err(ProviderError::Authentication(
                "provider not authenticated".to_string(),
            )),
        }
    }

    async fn list_page(
        &self,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ConnectionsPage, ProviderError> {
        let (api, config) = self.api()?;
        let url = format!("{}/people/me/connections", config.base_url);

        let mut query = vec![
            ("personFields", PERSON_FIELDS.to_string()),
            ("requestSyncToken", "true".to_string()),
            ("pageSize", "100".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        if let Some(token) = sync_token {
            query.push(("syncToken", token.to_string()));
        }

        serde_json::from_value(api.get_json(&url, &query).await?)
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn translate(person: serde_json::Value) -> Option<Change> {
        let resource_name = person["resourceName"].as_str()?.to_string();
        if person["metadata"]["deleted"].as_bool() == Some(true) {
            return Some(Change::Delete {
                source_id: resource_name,
            });
        }
        Some(Change::Update {
            source_id: resource_name.clone(),
            metadata: serde_json::json!({ "resource_name": resource_name }),
        })
    }

    fn render_person(person: &serde_json::Value) -> (String, String) {
        let name = person["names"][0]["displayName"]
            .as_str()
            .unwrap_or("(unnamed contact)");
        let mut body = format!("# {name}\n");
        for email in person["emailAddresses"].as_array().into_iter().flatten() {
            if let Some(value) = email["value"].as_str() {
                body.push_str(&format!("\n- Email: {value}"));
            }
        }
        for phone in person["phoneNumbers"].as_array().into_iter().flatten() {
            if let Some(value) = phone["value"].as_str() {
                body.push_str(&format!("\n- Phone: {value}"));
            }
        }
        for org in person["organizations"].as_array().into_iter().flatten() {
            if let Some(value) = org["name"].as_str() {
                body.push_str(&format!("\n- Organization: {value}"));
            }
        }
        body.push('\n');
        (name.to_string(), body)
    }
}

#[async_trait]
impl Provider for GoogleContactsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleContacts
    }

    async fn authenticate(&mut self, config: &serde_json::Value) -> Result<(), ProviderError> {
        let parsed: GoogleContactsConfig = serde_json::from_value(config.clone())
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
        let url = format!("{}/people/me/connections", config.base_url);
        api.get_json(
            &url,
            &[
                ("personFields", "names".to_string()),
                ("pageSize", "1".to_string()),
            ],
        )
        .await
        .is_ok()
    }

    async fn detect_changes(
        &self,
        checkpoint: &mut Checkpoint,
    ) -> Result<Vec<Change>, ProviderError> {
        if !matches!(checkpoint, Checkpoint::GoogleContacts { .. }) {
            *checkpoint = self.new_checkpoint();
        }
        let Checkpoint::GoogleContacts {
            sync_token,
            page_token,
            has_more,
        } = checkpoint
        else {
            unreachable!("checkpoint normalized above");
        };

        let mut changes = Vec::new();

        loop {
            let page = match self
                .list_page(sync_token.as_deref(), page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(ProviderError::Gone) => {
                    // One relist per pass: a 410 on the tokenless listing
                    // itself propagates instead of looping.
                    if sync_token.take().is_none() {
                        return Err(ProviderError::Gone);
                    }
                    tracing::info!("contacts sync token expired, full relisting");
                    *page_token = None;
                    continue;
                }
                Err(e) => return Err(e),
            };

            for person in page.connections {
                if let Some(change) = Self::translate(person) {
                    changes.push(change);
                }
            }

            if let Some(next) = page.next_page_token {
                *page_token = Some(next);
            } else {
                if let Some(token) = page.next_sync_token {
                    *sync_token = Some(token);
                }
                *page_token = None;
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
        let resource_name = metadata["resource_name"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode("metadata missing resource_name".to_string()))?;

        let url = format!("{}/{}", config.base_url, resource_name);
        let person = api
            .get_json(&url, &[("personFields", PERSON_FIELDS.to_string())])
            .await?;

        let (title, body) = Self::render_person(&person);
        let content = body.into_bytes();
        let modified_at = person["metadata"]["sources"][0]["updateTime"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

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
            original_url: None,
        })
    }

    async fn access_for(
        &self,
        _metadata: &serde_json::Value,
    ) -> Result<ExternalAccess, ProviderError> {
        // Contacts are private to the connected account.
        Ok(ExternalAccess::Restricted {
            users: Vec::new(),
            groups: Vec::new(),
        })
    }
}
