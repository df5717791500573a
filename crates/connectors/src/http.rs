use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::error::ProviderError;

pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

pub(crate) fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

pub(crate) fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Bearer-authenticated GET client shared by all provider adapters.
///
/// Retries transient failures with exponential backoff, honors Retry-After
/// on 429, and fails fast on permanent client errors. 401/403 map to
/// `Authentication`, 410 to `Gone` so adapters can trigger a full resync.
#[derive(Clone)]
pub(crate) struct ApiClient {
    client: Client,
    token: String,
    max_retries: u32,
}

impl ApiClient {
    pub fn new(token: &str, timeout_secs: u64, max_retries: u32) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(ProviderError::Request)?;
        Ok(Self {
            client,
            token: token.to_string(),
            max_retries,
        })
    }

    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, ProviderError> {
        let response = self.get_with_retry(url, query).await?;
        response.json().await.map_err(ProviderError::Request)
    }

    /// GET raw bytes plus the response content type, if any.
    pub async fn get_bytes(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<(Vec<u8>, Option<String>), ProviderError> {
        let response = self.get_with_retry(url, query).await?;
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string());
        let bytes = response.bytes().await.map_err(ProviderError::Request)?;
        Ok((bytes.to_vec(), mime))
    }

    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Response, ProviderError> {
        let mut last_error = String::new();
        let mut rate_limited = false;
        let mut waited_retry_after = false;

        for attempt in 0..=self.max_retries {
            // A Retry-After already honored replaces this attempt's backoff.
            if attempt > 0 && !waited_retry_after {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, url, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }
            waited_retry_after = false;

            let response = match self
                .client
                .get(url)
                .query(query)
                .bearer_auth(&self.token)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(ProviderError::Request(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::Authentication(format!("{status}: {body}")));
                }
                StatusCode::GONE => return Err(ProviderError::Gone),
                StatusCode::TOO_MANY_REQUESTS => {
                    rate_limited = true;
                    if let Some(retry_after) = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                    {
                        let wait = std::cmp::min(retry_after, 60);
                        tracing::warn!(wait, "rate-limited, waiting Retry-After");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        waited_retry_after = true;
                    }
                    last_error = "429 Too Many Requests".to_string();
                    continue;
                }
                s if s.is_server_error() => {
                    rate_limited = false;
                    let body = response.text().await.unwrap_or_default();
                    last_error = format!("{status}: {body}");
                    continue;
                }
                _ => {
                    // Permanent client error
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::Download {
                        status: status.as_u16(),
                        body,
                    });
                }
            }
        }

        if rate_limited {
            Err(ProviderError::RateLimited {
                attempts: self.max_retries + 1,
            })
        } else {
            Err(ProviderError::Download {
                status: 0,
                body: format!(
                    "max retries exceeded after {} attempts: {last_error}",
                    self.max_retries + 1
                ),
            })
        }
    }
}
