pub mod notify;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use self::notify::Notifier;
use self::rate_limit::SlidingWindowLimiter;
use quarry_bus::{Delivery, Disposition, MessageHandler};
use quarry_common::types::DeadLetterAdvisory;

/// At most this many alerts per logical subject per window.
const ALERT_CAP: usize = 5;
const ALERT_WINDOW: Duration = Duration::from_secs(300);

/// Dead-letter monitor: consumes advisory events, rate-limits per logical
/// subject and fans surviving alerts out to the notification channels.
///
/// Advisories are always acked; an alerting failure must never create more
/// dead letters.
pub struct Guardian {
    limiter: SlidingWindowLimiter,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Guardian {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            limiter: SlidingWindowLimiter::new(ALERT_WINDOW, ALERT_CAP),
            notifiers,
        }
    }
}

#[async_trait]
impl MessageHandler for Guardian {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let advisory: DeadLetterAdvisory = match serde_json::from_slice(&delivery.payload) {
            Ok(advisory) => advisory,
            Err(e) => {
                tracing::warn!(subject = delivery.subject, error = %e, "undecodable advisory");
                return Disposition::Ack;
            }
        };

        if !self.limiter.allow(&advisory.subject) {
            tracing::debug!(
                subject = advisory.subject,
                "advisory suppressed by rate limit"
            );
            return Disposition::Ack;
        }

        for notifier in &self.notifiers {
            notifier.notify(&advisory).await;
        }
        Disposition::Ack
    }
}
