use std::sync::Arc;

use async_trait::async_trait;

use crate::sync::ConnectorService;
use quarry_bus::{Delivery, Disposition, MessageBus, MessageHandler};
use quarry_common::types::SyncTrigger;
use quarry_db::connector::models::ConnectorStatus;
use quarry_db::connector::repositories::ConnectorRepository;
use quarry_db::document::repositories::DocumentRepository;
use quarry_storage::BlobStore;

/// Queue-group worker for `connector.sync.*` trigger messages.
///
/// Maps the orchestrator outcome onto the substrate's dispositions:
/// success acks, transient failure naks for redelivery, known-permanent
/// failure terminates so no redelivery budget is burned.
pub struct SyncHandler<C, D, B, M> {
    service: Arc<ConnectorService<C, D, B, M>>,
}

impl<C, D, B, M> SyncHandler<C, D, B, M>
where
    C: ConnectorRepository,
    D: DocumentRepository,
    B: BlobStore,
    M: MessageBus,
{
    pub fn new(service: Arc<ConnectorService<C, D, B, M>>) -> Self {
        Self { service }
    }

    /// A paused pass left work behind its checkpoint: requeue the same
    /// trigger so the next batch runs promptly instead of waiting out the
    /// refresh interval.
    async fn requeue(&self, subject: &str, trigger: &SyncTrigger) -> Disposition {
        if let Err(e) = self
            .service
            .connectors()
            .mark_pending(trigger.connector_id)
            .await
        {
            tracing::error!(connector_id = %trigger.connector_id, error = %e, "failed to re-mark pending");
            return Disposition::Nak;
        }
        let payload = match serde_json::to_vec(trigger) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode continuation trigger");
                return Disposition::Nak;
            }
        };
        match self.service.bus().publish(subject, payload).await {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                tracing::error!(connector_id = %trigger.connector_id, error = %e, "failed to publish continuation");
                Disposition::Nak
            }
        }
    }
}

#[async_trait]
impl<C, D, B, M> MessageHandler for SyncHandler<C, D, B, M>
where
    C: ConnectorRepository,
    D: DocumentRepository,
    B: BlobStore,
    M: MessageBus,
{
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let trigger: SyncTrigger = match serde_json::from_slice(&delivery.payload) {
            Ok(trigger) => trigger,
            Err(e) => {
                // Redelivery cannot fix a malformed payload.
                tracing::warn!(subject = delivery.subject, error = %e, "undecodable trigger, terminating");
                return Disposition::Term;
            }
        };

        tracing::info!(
            connector_id = %trigger.connector_id,
            session_id = %trigger.session_id,
            kind = %trigger.kind,
            attempt = delivery.attempt,
            "sync trigger received"
        );

        match self.service.sync_connector(trigger.connector_id).await {
            Ok(outcome) if outcome.has_more => self.requeue(&delivery.subject, &trigger).await,
            Ok(_) => {
                if let Err(e) = self
                    .service
                    .connectors()
                    .set_status(trigger.connector_id, ConnectorStatus::Active, None)
                    .await
                {
                    tracing::error!(connector_id = %trigger.connector_id, error = %e, "failed to finalize status");
                    return Disposition::Nak;
                }
                Disposition::Ack
            }
            Err(e) if e.is_terminal() => {
                tracing::error!(connector_id = %trigger.connector_id, error = %e, "permanent sync failure");
                Disposition::Term
            }
            Err(e) => {
                tracing::warn!(
                    connector_id = %trigger.connector_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "transient sync failure, requesting redelivery"
                );
                Disposition::Nak
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        calendar_connector, MockConnectorRepository, MockDocumentRepository, RecordingBus,
    };
    use quarry_bus::subjects::{advisory_subject, sync_subject};
    use quarry_bus::{BusConfig, InProcessBus};
    use quarry_common::types::{
        AdvisoryKind, DeadLetterAdvisory, ProviderKind, SyncScope,
    };
    use quarry_storage::MemoryBlobStore;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn trigger_for(connector_id: Uuid) -> SyncTrigger {
        SyncTrigger {
            connector_id,
            owner_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            kind: ProviderKind::GoogleCalendar,
            scope: SyncScope::Incremental,
            scope_id: None,
        }
    }

    fn delivery(trigger: &SyncTrigger) -> Delivery {
        Delivery {
            subject: sync_subject(trigger.kind),
            payload: serde_json::to_vec(trigger).unwrap(),
            attempt: 1,
        }
    }

    fn handler_with(
        connectors: MockConnectorRepository,
    ) -> SyncHandler<MockConnectorRepository, MockDocumentRepository, MemoryBlobStore, RecordingBus>
    {
        SyncHandler::new(Arc::new(ConnectorService::new(
            connectors,
            MockDocumentRepository::default(),
            MemoryBlobStore::new(),
            RecordingBus::default(),
            "documents".to_string(),
        )))
    }

    #[tokio::test]
    async fn undecodable_trigger_terminates() {
        let handler = handler_with(MockConnectorRepository::default());
        let delivery = Delivery {
            subject: "connector.sync.google_calendar".to_string(),
            payload: b"not json".to_vec(),
            attempt: 1,
        };
        assert_eq!(handler.handle(&delivery).await, Disposition::Term);
    }

    #[tokio::test]
    async fn successful_pass_acks_and_activates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "primary"}],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [],
                "nextSyncToken": "tok1",
            })))
            .mount(&server)
            .await;

        let connectors = MockConnectorRepository::default();
        let connector = calendar_connector(&server.uri());
        let connector_id = connector.id;
        connectors.insert(connector);

        let handler = handler_with(connectors);
        let trigger = trigger_for(connector_id);

        assert_eq!(handler.handle(&delivery(&trigger)).await, Disposition::Ack);

        let saved = handler
            .service
            .connectors()
            .get(connector_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, ConnectorStatus::Active);
    }

    #[tokio::test]
    async fn auth_failure_terminates_without_redelivery() {
        let connectors = MockConnectorRepository::default();
        let mut connector = calendar_connector("http://localhost:1");
        connector.config = serde_json::json!({"access_token": ""});
        let connector_id = connector.id;
        connectors.insert(connector);

        let handler = handler_with(connectors);
        let trigger = trigger_for(connector_id);

        assert_eq!(handler.handle(&delivery(&trigger)).await, Disposition::Term);
    }

    #[tokio::test]
    async fn transient_failure_naks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let connectors = MockConnectorRepository::default();
        let mut connector = calendar_connector(&server.uri());
        // No client-side retries so the test does not sit in backoff.
        connector.config["max_retries"] = serde_json::json!(0);
        let connector_id = connector.id;
        connectors.insert(connector);

        let handler = handler_with(connectors);
        let trigger = trigger_for(connector_id);

        assert_eq!(handler.handle(&delivery(&trigger)).await, Disposition::Nak);
    }

    #[tokio::test]
    async fn paused_pass_republishes_continuation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "primary"}],
            })))
            .mount(&server)
            .await;
        // A full page plus a continuation token leaves has_more set.
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": (0..100)
                    .map(|i| serde_json::json!({"id": format!("e{i}"), "status": "cancelled"}))
                    .collect::<Vec<_>>(),
                "nextPageToken": "page2",
            })))
            .mount(&server)
            .await;

        let connectors = MockConnectorRepository::default();
        let connector = calendar_connector(&server.uri());
        let connector_id = connector.id;
        connectors.insert(connector);

        let handler = handler_with(connectors);
        let trigger = trigger_for(connector_id);

        assert_eq!(handler.handle(&delivery(&trigger)).await, Disposition::Ack);

        let saved = handler
            .service
            .connectors()
            .get(connector_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, ConnectorStatus::Pending);

        let continuations = handler
            .service
            .bus()
            .published(&sync_subject(ProviderKind::GoogleCalendar));
        assert_eq!(continuations.len(), 1);
        let continuation: SyncTrigger = serde_json::from_slice(&continuations[0]).unwrap();
        assert_eq!(continuation.session_id, trigger.session_id);
    }

    /// Records advisories delivered to it.
    struct AdvisorySink {
        seen: Mutex<Vec<DeadLetterAdvisory>>,
    }

    #[async_trait]
    impl MessageHandler for AdvisorySink {
        async fn handle(&self, delivery: &Delivery) -> Disposition {
            if let Ok(advisory) = serde_json::from_slice(&delivery.payload) {
                self.seen.lock().expect("seen poisoned").push(advisory);
            }
            Disposition::Ack
        }
    }

    #[tokio::test]
    async fn terminal_failure_dead_letters_on_first_delivery() {
        let bus = InProcessBus::new(BusConfig {
            max_deliver: 3,
            redeliver_delay: Duration::from_millis(5),
        });

        let connectors = MockConnectorRepository::default();
        let mut connector = calendar_connector("http://localhost:1");
        connector.config = serde_json::json!({"access_token": ""});
        let connector_id = connector.id;
        connectors.insert(connector);

        let handler = Arc::new(SyncHandler::new(Arc::new(ConnectorService::new(
            connectors,
            MockDocumentRepository::default(),
            MemoryBlobStore::new(),
            bus.clone(),
            "documents".to_string(),
        ))));
        let sink = Arc::new(AdvisorySink {
            seen: Mutex::new(Vec::new()),
        });

        let subject = sync_subject(ProviderKind::GoogleCalendar);
        bus.queue_subscribe(&subject, "sync-workers", handler)
            .await
            .unwrap();
        bus.queue_subscribe(
            &advisory_subject("connector", AdvisoryKind::Terminated),
            "guardian",
            sink.clone(),
        )
        .await
        .unwrap();

        let trigger = trigger_for(connector_id);
        bus.publish(&subject, serde_json::to_vec(&trigger).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let seen = sink.seen.lock().expect("seen poisoned");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, AdvisoryKind::Terminated);
        // Terminated on the first delivery: no redelivery budget consumed.
        assert_eq!(seen[0].deliveries, 1);
    }

    #[tokio::test]
    async fn persistent_transient_failure_exhausts_redeliveries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let bus = InProcessBus::new(BusConfig {
            max_deliver: 3,
            redeliver_delay: Duration::from_millis(5),
        });

        let connectors = MockConnectorRepository::default();
        let mut connector = calendar_connector(&server.uri());
        connector.config["max_retries"] = serde_json::json!(0);
        let connector_id = connector.id;
        connectors.insert(connector);

        let handler = Arc::new(SyncHandler::new(Arc::new(ConnectorService::new(
            connectors,
            MockDocumentRepository::default(),
            MemoryBlobStore::new(),
            bus.clone(),
            "documents".to_string(),
        ))));
        let sink = Arc::new(AdvisorySink {
            seen: Mutex::new(Vec::new()),
        });

        let subject = sync_subject(ProviderKind::GoogleCalendar);
        bus.queue_subscribe(&subject, "sync-workers", handler)
            .await
            .unwrap();
        bus.queue_subscribe(
            &advisory_subject("connector", AdvisoryKind::MaxDeliveries),
            "guardian",
            sink.clone(),
        )
        .await
        .unwrap();

        let trigger = trigger_for(connector_id);
        bus.publish(&subject, serde_json::to_vec(&trigger).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let seen = sink.seen.lock().expect("seen poisoned");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, AdvisoryKind::MaxDeliveries);
        assert_eq!(seen[0].deliveries, 3);
    }
}
