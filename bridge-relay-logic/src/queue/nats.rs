use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, AckKind};
use async_trait::async_trait;
use futures::StreamExt;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::message::CrossChainMessage;
use crate::queue::{Ack, Delivery, DurableQueue};

/// NATS JetStream-backed implementation of the durable queue contract.
///
/// One durable stream per deployment holds every message on a single
/// subject; each consumer group is a named durable JetStream consumer so
/// redelivery bookkeeping (ack/nak/terminate, `num_delivered`) comes from
/// the broker rather than being reimplemented here.
pub struct NatsQueue {
    context: jetstream::Context,
    cfg: QueueConfig,
}

impl NatsQueue {
    pub async fn connect(cfg: QueueConfig) -> Result<Self, QueueError> {
        let url = cfg.urls.join(",");
        let client = async_nats::connect(&url)
            .await
            .map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        let context = jetstream::new(client);

        context
            .get_or_create_stream(jetstream::stream::Config {
                name: cfg.stream_name.clone(),
                subjects: vec![cfg.subject.clone()],
                max_age: Duration::from_secs(7 * 24 * 3600),
                discard: jetstream::stream::DiscardPolicy::Old,
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;

        Ok(Self { context, cfg })
    }

    async fn consumer_for(&self, group: &str) -> Result<PullConsumer, QueueError> {
        let stream = self
            .context
            .get_stream(&self.cfg.stream_name)
            .await
            .map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        stream
            .get_or_create_consumer(
                group,
                jetstream::consumer::pull::Config {
                    durable_name: Some(group.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: self.cfg.ack_wait,
                    max_deliver: self.cfg.max_retries as i64,
                    filter_subject: self.cfg.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))
    }
}

/// Carries the broker-side ack handle alongside the decoded payload so
/// `ack`/`nak`/`terminate` can address the exact delivery they were handed.
pub struct NatsDeliveryHandle {
    message: async_nats::jetstream::Message,
}

#[async_trait]
impl DurableQueue for NatsQueue {
    async fn publish(&self, message: &CrossChainMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message).map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        let ack = self
            .context
            .publish(self.cfg.subject.clone(), payload.into())
            .await
            .map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        // Awaiting the ack future is what makes `publish` durable: it only
        // returns once JetStream has persisted the message.
        ack.await.map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn next(&self, group: &str) -> Result<Option<Delivery>, QueueError> {
        let consumer = self.consumer_for(group).await?;
        let mut batch = consumer
            .fetch()
            .max_messages(1)
            .messages()
            .await
            .map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        let Some(next) = batch.next().await else {
            return Ok(None);
        };
        let msg = next.map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        let delivery_count = msg
            .info()
            .map(|info| info.delivered)
            .unwrap_or(1)
            .max(1) as u64;
        let message: CrossChainMessage =
            serde_json::from_slice(&msg.payload).map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;

        // Stash the ack handle in thread-local-free fashion by returning it
        // packaged with the Delivery via a side channel is awkward across the
        // trait boundary, so store it keyed by message id in the handle map.
        HANDLES.insert(message.id.clone(), NatsDeliveryHandle { message: msg });

        Ok(Some(Delivery { message, delivery_count }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.finish(delivery, Ack::Ack).await
    }

    async fn nak(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        self.finish(delivery, Ack::Nak { delay }).await
    }

    async fn terminate(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.finish(delivery, Ack::Terminate).await
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut stream = self
            .context
            .get_stream(&self.cfg.stream_name)
            .await
            .map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        let info = stream
            .info()
            .await
            .map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))?;
        let depth = info.state.messages;
        crate::metrics::QUEUE_DEPTH.set(depth as f64);
        if depth > self.cfg.backlog_threshold {
            return Err(QueueError::Backlog {
                depth,
                threshold: self.cfg.backlog_threshold,
            });
        }
        Ok(depth)
    }
}

impl NatsQueue {
    async fn finish(&self, delivery: &Delivery, ack: Ack) -> Result<(), QueueError> {
        let Some((_, handle)) = HANDLES.remove(&delivery.message.id) else {
            return Ok(());
        };
        let result = match ack {
            Ack::Ack => handle.message.ack().await,
            Ack::Nak { delay } => handle.message.ack_with(AckKind::Nak(Some(delay))).await,
            Ack::Terminate => handle.message.ack_with(AckKind::Term).await,
        };
        result.map_err(|e| QueueError::QueueUnavailable(anyhow::anyhow!(e)))
    }
}

lazy_static::lazy_static! {
    static ref HANDLES: dashmap::DashMap<String, NatsDeliveryHandle> = dashmap::DashMap::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_config_joins_urls_for_connect() {
        let cfg = QueueConfig {
            urls: vec!["nats://a:4222".to_string(), "nats://b:4222".to_string()],
            stream_name: "s".to_string(),
            subject: "subj".to_string(),
            max_retries: 5,
            ack_wait: Duration::from_secs(30),
            backlog_threshold: 10_000,
        };
        assert_eq!(cfg.urls.join(","), "nats://a:4222,nats://b:4222");
    }
}
