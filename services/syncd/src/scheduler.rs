use std::time::Duration;

use uuid::Uuid;

use quarry_bus::subjects::sync_subject;
use quarry_bus::MessageBus;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{ProviderKind, SyncScope, SyncTrigger};
use quarry_db::connector::repositories::ConnectorRepository;

/// Due connectors picked up per scan.
const SCAN_LIMIT: i64 = 100;

/// Periodic trigger publisher: scans for connectors whose refresh interval
/// has elapsed, marks them pending and publishes one trigger each to the
/// provider-kind subject.
pub struct Scheduler<C, M> {
    connectors: C,
    bus: M,
}

impl<C, M> Scheduler<C, M>
where
    C: ConnectorRepository,
    M: MessageBus,
{
    pub fn new(connectors: C, bus: M) -> Self {
        Self { connectors, bus }
    }

    /// One scan. Returns how many triggers were published.
    pub async fn run_once(&self) -> QuarryResult<usize> {
        let due = self.connectors.list_due(SCAN_LIMIT).await?;
        let mut triggered = 0;

        for connector in due {
            let kind: ProviderKind = match connector.kind.parse() {
                Ok(kind) => kind,
                Err(e) => {
                    tracing::warn!(connector_id = %connector.id, error = %e, "skipping connector");
                    continue;
                }
            };

            // Pending before publish, so the next scan cannot double-trigger.
            self.connectors.mark_pending(connector.id).await?;

            let first_sync = connector.state.is_null()
                || connector.state.as_object().is_some_and(|o| o.is_empty());
            let trigger = SyncTrigger {
                connector_id: connector.id,
                owner_id: connector.owner_id,
                session_id: Uuid::new_v4(),
                kind,
                scope: if first_sync {
                    SyncScope::Full
                } else {
                    SyncScope::Incremental
                },
                scope_id: None,
            };

            let payload = serde_json::to_vec(&trigger)
                .map_err(|e| QuarryError::Internal(format!("encode trigger: {e}")))?;
            self.bus
                .publish(&sync_subject(kind), payload)
                .await
                .map_err(|e| QuarryError::Messaging(e.to_string()))?;

            tracing::info!(
                connector_id = %connector.id,
                session_id = %trigger.session_id,
                kind = %kind,
                "sync trigger published"
            );
            triggered += 1;
        }

        Ok(triggered)
    }

    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(0) => {}
                Ok(triggered) => tracing::debug!(triggered, "scheduler scan complete"),
                Err(e) => tracing::error!(error = %e, "scheduler scan failed"),
            }
        }
    }
}
