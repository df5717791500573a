use async_trait::async_trait;

use quarry_common::types::DeadLetterAdvisory;

/// Delivery channel for dead-letter alerts. Notification failures are the
/// channel's problem to log; they never propagate.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, advisory: &DeadLetterAdvisory);
}

/// Structured-log channel, always configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, advisory: &DeadLetterAdvisory) {
        tracing::error!(
            stream = advisory.stream,
            subject = advisory.subject,
            kind = advisory.kind.as_str(),
            deliveries = advisory.deliveries,
            "dead-lettered message"
        );
    }
}

/// Posts advisories as JSON to a configured webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, advisory: &DeadLetterAdvisory) {
        let result = self.client.post(&self.url).json(advisory).send().await;
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), "alert webhook rejected advisory");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "alert webhook unreachable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::types::AdvisoryKind;
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn advisory() -> DeadLetterAdvisory {
        DeadLetterAdvisory {
            stream: "connector".to_string(),
            subject: "connector.sync.gmail".to_string(),
            kind: AdvisoryKind::MaxDeliveries,
            deliveries: 5,
        }
    }

    #[tokio::test]
    async fn webhook_posts_advisory_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(body_json_string(
                serde_json::to_string(&advisory()).unwrap(),
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/alerts", server.uri()));
        notifier.notify(&advisory()).await;
    }

    #[tokio::test]
    async fn webhook_failure_does_not_panic() {
        let notifier = WebhookNotifier::new("http://localhost:1/alerts".to_string());
        notifier.notify(&advisory()).await;
    }
}
