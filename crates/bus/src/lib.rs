pub mod memory;
pub mod subjects;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{BusConfig, InProcessBus};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("subject closed: {0}")]
    Closed(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type BusResult<T> = Result<T, BusError>;

/// What a handler tells the substrate to do with a delivery.
///
/// `Ack` removes the message, `Nak` requests redelivery (bounded by the
/// substrate's redelivery budget), `Term` dead-letters immediately without
/// consuming further budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nak,
    Term,
}

/// One delivery attempt of a published message. `attempt` starts at 1.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
    pub attempt: u32,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Narrow publish/subscribe surface the engine consumes. The production
/// substrate provides durable, queue-grouped consumers behind this trait;
/// [`InProcessBus`] implements the same contract in-process.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe a handler to a subject as part of a queue group: each
    /// message is delivered to exactly one member of the group.
    async fn queue_subscribe(
        &self,
        subject: &str,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> BusResult<()>;
}
