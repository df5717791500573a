mod guardian;
mod pipeline;
mod scheduler;
mod sync;
#[cfg(test)]
mod testutil;

use std::sync::Arc;
use std::time::Duration;

use quarry_bus::subjects::{advisory_subject, sync_subject};
use quarry_bus::{BusConfig, InProcessBus, MessageBus};
use quarry_common::types::{AdvisoryKind, ProviderKind};
use quarry_config::{init_tracing, AppConfig};
use quarry_db::connector::pg_repository::PgConnectorRepository;
use quarry_db::document::pg_repository::PgDocumentRepository;
use quarry_storage::FsBlobStore;

use crate::guardian::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::guardian::Guardian;
use crate::pipeline::SyncHandler;
use crate::scheduler::Scheduler;
use crate::sync::ConnectorService;

const SYNC_QUEUE: &str = "sync-workers";
const GUARDIAN_QUEUE: &str = "guardian";

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("configuration");
    init_tracing(&config.log_level);

    tracing::info!(service = "quarry-syncd", "starting");

    let pool = quarry_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");

    let bus = InProcessBus::new(BusConfig {
        max_deliver: config.max_deliver,
        redeliver_delay: Duration::from_secs(5),
    });

    let service = Arc::new(ConnectorService::new(
        PgConnectorRepository::new(pool.clone()),
        PgDocumentRepository::new(pool.clone()),
        FsBlobStore::new(&config.blob_root),
        bus.clone(),
        config.blob_bucket.clone(),
    ));

    let handler = Arc::new(SyncHandler::new(service));
    for kind in ProviderKind::all() {
        bus.queue_subscribe(&sync_subject(kind), SYNC_QUEUE, handler.clone())
            .await
            .expect("subscribe sync workers");
    }

    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let Some(url) = config.alert_webhook_url.clone() {
        tracing::info!(url, "alert webhook configured");
        notifiers.push(Arc::new(WebhookNotifier::new(url)));
    }
    let guardian = Arc::new(Guardian::new(notifiers));
    for kind in [AdvisoryKind::MaxDeliveries, AdvisoryKind::Terminated] {
        bus.queue_subscribe(
            &advisory_subject("connector", kind),
            GUARDIAN_QUEUE,
            guardian.clone(),
        )
        .await
        .expect("subscribe guardian");
    }

    let scheduler = Scheduler::new(PgConnectorRepository::new(pool.clone()), bus.clone());
    let interval = Duration::from_secs(config.schedule_interval_secs);
    tokio::spawn(async move {
        scheduler.run(interval).await;
    });

    tokio::signal::ctrl_c().await.expect("ctrl-c handler");
    tracing::info!("shutting down");
}
