use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::subjects::{advisory_subject, stream_of, ADVISORY_PREFIX};
use crate::{BusError, BusResult, Delivery, Disposition, MessageBus, MessageHandler};
use quarry_common::types::{AdvisoryKind, DeadLetterAdvisory};

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Total delivery attempts before a nak'd message is dead-lettered.
    pub max_deliver: u32,
    /// Pause before a redelivery, standing in for the substrate's ack-wait.
    pub redeliver_delay: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_deliver: 5,
            redeliver_delay: Duration::from_millis(25),
        }
    }
}

#[derive(Clone)]
struct Channel {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
}

struct Inner {
    config: BusConfig,
    // Subject -> queue group -> channel. Workers in one group share a
    // channel; each group gets its own copy of every message.
    channels: Mutex<HashMap<String, HashMap<String, Channel>>>,
    // Messages published before any group subscribed on the subject.
    backlog: Mutex<HashMap<String, Vec<Delivery>>>,
}

/// In-process message bus with the same ack/nak/term contract as the
/// production substrate: one channel per (subject, queue group), delivery
/// to exactly one worker within a group, bounded redelivery, dead-letter
/// advisories.
#[derive(Clone)]
pub struct InProcessBus {
    inner: Arc<Inner>,
}

impl InProcessBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                channels: Mutex::new(HashMap::new()),
                backlog: Mutex::new(HashMap::new()),
            }),
        }
    }

    async fn group_channel(&self, subject: &str, queue: &str) -> Channel {
        let mut channels = self.inner.channels.lock().await;
        let groups = channels.entry(subject.to_string()).or_default();
        if let Some(channel) = groups.get(queue) {
            return channel.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Channel {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        };
        // Held messages go to the first group that shows up.
        let held = self.inner.backlog.lock().await.remove(subject);
        for delivery in held.unwrap_or_default() {
            let _ = channel.tx.send(delivery);
        }
        groups.insert(queue.to_string(), channel.clone());
        channel
    }

    async fn dead_letter(&self, delivery: &Delivery, kind: AdvisoryKind) {
        // Advisories never generate advisories.
        if delivery.subject.starts_with(ADVISORY_PREFIX) {
            return;
        }

        let advisory = DeadLetterAdvisory {
            stream: stream_of(&delivery.subject).to_string(),
            subject: delivery.subject.clone(),
            kind,
            deliveries: delivery.attempt,
        };
        let payload = match serde_json::to_vec(&advisory) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode dead-letter advisory");
                return;
            }
        };

        let subject = advisory_subject(&advisory.stream, kind);
        if let Err(e) = self.publish(&subject, payload).await {
            tracing::error!(error = %e, subject, "failed to publish dead-letter advisory");
        }
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        let delivery = Delivery {
            subject: subject.to_string(),
            payload,
            attempt: 1,
        };

        let channels = self.inner.channels.lock().await;
        match channels.get(subject) {
            Some(groups) if !groups.is_empty() => {
                for channel in groups.values() {
                    channel
                        .tx
                        .send(delivery.clone())
                        .map_err(|_| BusError::Closed(subject.to_string()))?;
                }
                Ok(())
            }
            _ => {
                self.inner
                    .backlog
                    .lock()
                    .await
                    .entry(subject.to_string())
                    .or_default()
                    .push(delivery);
                Ok(())
            }
        }
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> BusResult<()> {
        let channel = self.group_channel(subject, queue).await;
        let bus = self.clone();
        let subject = subject.to_string();
        let queue = queue.to_string();

        tokio::spawn(async move {
            loop {
                // Receiver is shared across the queue group, so each message
                // reaches exactly one worker.
                let delivery = {
                    let mut rx = channel.rx.lock().await;
                    rx.recv().await
                };
                let Some(delivery) = delivery else { break };

                match handler.handle(&delivery).await {
                    Disposition::Ack => {}
                    Disposition::Term => {
                        tracing::warn!(
                            subject = %delivery.subject,
                            queue,
                            attempt = delivery.attempt,
                            "message terminated"
                        );
                        bus.dead_letter(&delivery, AdvisoryKind::Terminated).await;
                    }
                    Disposition::Nak => {
                        if delivery.attempt >= bus.inner.config.max_deliver {
                            tracing::warn!(
                                subject = %delivery.subject,
                                queue,
                                attempts = delivery.attempt,
                                "redelivery budget exhausted"
                            );
                            bus.dead_letter(&delivery, AdvisoryKind::MaxDeliveries).await;
                        } else {
                            tokio::time::sleep(bus.inner.config.redeliver_delay).await;
                            let mut redelivery = delivery.clone();
                            redelivery.attempt += 1;
                            let _ = channel.tx.send(redelivery);
                        }
                    }
                }
            }
            tracing::debug!(subject, queue, "subscription closed");
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Script {
        seen: StdMutex<Vec<Delivery>>,
        outcome: Disposition,
    }

    impl Script {
        fn new(outcome: Disposition) -> Arc<Self> {
            Arc::new(Self {
                seen: StdMutex::new(Vec::new()),
                outcome,
            })
        }

        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageHandler for Script {
        async fn handle(&self, delivery: &Delivery) -> Disposition {
            self.seen.lock().unwrap().push(delivery.clone());
            self.outcome
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn quick_bus(max_deliver: u32) -> InProcessBus {
        InProcessBus::new(BusConfig {
            max_deliver,
            redeliver_delay: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn ack_consumes_each_message_once() {
        let bus = quick_bus(5);
        let handler = Script::new(Disposition::Ack);
        bus.queue_subscribe("orders.created", "workers", handler.clone())
            .await
            .unwrap();

        bus.publish("orders.created", b"one".to_vec()).await.unwrap();
        bus.publish("orders.created", b"two".to_vec()).await.unwrap();

        wait_for(|| handler.count() == 2).await;
        let seen = handler.seen.lock().unwrap();
        assert!(seen.iter().all(|d| d.attempt == 1));
    }

    #[tokio::test]
    async fn nak_redelivers_until_budget_then_dead_letters() {
        let bus = quick_bus(3);
        let handler = Script::new(Disposition::Nak);
        let advisories = Script::new(Disposition::Ack);

        bus.queue_subscribe("orders.created", "workers", handler.clone())
            .await
            .unwrap();
        bus.queue_subscribe("advisory.orders.max_deliveries", "guardian", advisories.clone())
            .await
            .unwrap();

        bus.publish("orders.created", b"poison".to_vec())
            .await
            .unwrap();

        wait_for(|| advisories.count() == 1).await;
        assert_eq!(handler.count(), 3);

        let attempts: Vec<u32> = handler.seen.lock().unwrap().iter().map(|d| d.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);

        let advisory: DeadLetterAdvisory =
            serde_json::from_slice(&advisories.seen.lock().unwrap()[0].payload).unwrap();
        assert_eq!(advisory.kind, AdvisoryKind::MaxDeliveries);
        assert_eq!(advisory.deliveries, 3);
        assert_eq!(advisory.subject, "orders.created");
    }

    #[tokio::test]
    async fn term_dead_letters_without_redelivery() {
        let bus = quick_bus(5);
        let handler = Script::new(Disposition::Term);
        let advisories = Script::new(Disposition::Ack);

        bus.queue_subscribe("orders.created", "workers", handler.clone())
            .await
            .unwrap();
        bus.queue_subscribe("advisory.orders.terminated", "guardian", advisories.clone())
            .await
            .unwrap();

        bus.publish("orders.created", b"bad".to_vec()).await.unwrap();

        wait_for(|| advisories.count() == 1).await;
        // Zero redeliveries consumed
        assert_eq!(handler.count(), 1);

        let advisory: DeadLetterAdvisory =
            serde_json::from_slice(&advisories.seen.lock().unwrap()[0].payload).unwrap();
        assert_eq!(advisory.kind, AdvisoryKind::Terminated);
        assert_eq!(advisory.deliveries, 1);
    }

    #[tokio::test]
    async fn queue_group_delivers_each_message_to_one_worker() {
        let bus = quick_bus(5);
        let a = Script::new(Disposition::Ack);
        let b = Script::new(Disposition::Ack);

        bus.queue_subscribe("orders.created", "workers", a.clone())
            .await
            .unwrap();
        bus.queue_subscribe("orders.created", "workers", b.clone())
            .await
            .unwrap();

        for i in 0..6 {
            bus.publish("orders.created", vec![i]).await.unwrap();
        }

        wait_for(|| a.count() + b.count() == 6).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.count() + b.count(), 6);
    }

    #[tokio::test]
    async fn distinct_queue_groups_each_receive_a_copy() {
        let bus = quick_bus(5);
        let workers = Script::new(Disposition::Ack);
        let auditors = Script::new(Disposition::Ack);

        bus.queue_subscribe("orders.created", "workers", workers.clone())
            .await
            .unwrap();
        bus.queue_subscribe("orders.created", "auditors", auditors.clone())
            .await
            .unwrap();

        bus.publish("orders.created", b"one".to_vec()).await.unwrap();
        bus.publish("orders.created", b"two".to_vec()).await.unwrap();

        wait_for(|| workers.count() == 2 && auditors.count() == 2).await;
    }

    #[tokio::test]
    async fn publish_before_subscribe_is_held_for_the_first_group() {
        let bus = quick_bus(5);
        bus.publish("orders.created", b"early".to_vec())
            .await
            .unwrap();

        let handler = Script::new(Disposition::Ack);
        bus.queue_subscribe("orders.created", "workers", handler.clone())
            .await
            .unwrap();

        wait_for(|| handler.count() == 1).await;
        assert_eq!(handler.seen.lock().unwrap()[0].payload, b"early");
    }

    #[tokio::test]
    async fn terminated_advisories_do_not_recurse() {
        let bus = quick_bus(5);
        let advisories = Script::new(Disposition::Term);
        bus.queue_subscribe("advisory.orders.terminated", "guardian", advisories.clone())
            .await
            .unwrap();

        let advisory = DeadLetterAdvisory {
            stream: "orders".to_string(),
            subject: "orders.created".to_string(),
            kind: AdvisoryKind::Terminated,
            deliveries: 1,
        };
        bus.publish(
            "advisory.orders.terminated",
            serde_json::to_vec(&advisory).unwrap(),
        )
        .await
        .unwrap();

        wait_for(|| advisories.count() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The Term on an advisory subject is swallowed, not re-advised.
        assert_eq!(advisories.count(), 1);
    }
}
