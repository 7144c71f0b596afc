//! NATS JetStream event bus
//!
//! One stream holds every workflow topic. Publishing waits for the stream's
//! ack, so a record leaves the outbox only once the broker stored it.
//! Subscribing creates (or reattaches to) a durable pull consumer per service
//! with explicit acks; a message the service never acknowledged is
//! redelivered after `ack_wait`, and the handlers' processed-event log
//! absorbs the duplicate.
//!
//! Each subscription pumps into an unbounded channel, which never holds more
//! than `max_ack_pending` messages because the broker stops delivering once
//! that many are unacknowledged.

use async_nats::connection::State;
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, consumer::DeliverPolicy, message::Acker};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_workflow::Topic;
use workflow_engine::{Acknowledge, Delivery, EventBus, EventSource, Receipt};

use crate::config::NatsConfig;
use crate::error::BusError;

const PING_INTERVAL: Duration = Duration::from_secs(120);

/// Subject a message for `topic` and partition `key` is published on
pub fn subject(prefix: &str, topic: Topic, key: &str) -> String {
    format!("{}.{}.{}", prefix, topic.as_str(), key)
}

/// Filter matching every partition of `topic`
pub fn topic_filter(prefix: &str, topic: Topic) -> String {
    format!("{}.{}.>", prefix, topic.as_str())
}

/// Recovers the topic and partition key from a delivered subject
pub fn parse_subject<'a>(prefix: &str, subject: &'a str) -> Option<(Topic, &'a str)> {
    let rest = subject.strip_prefix(prefix)?.strip_prefix('.')?;
    let (topic, key) = rest.split_once('.')?;
    if key.is_empty() {
        return None;
    }
    Some((Topic::parse(topic)?, key))
}

/// Durable consumer names may not contain subject tokens
fn durable_name(consumer: &str) -> String {
    consumer
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// JetStream-backed [`EventBus`] and [`EventSource`]
#[derive(Clone)]
pub struct NatsEventBus {
    client: Client,
    jetstream: jetstream::Context,
    stream: jetstream::stream::Stream,
    config: NatsConfig,
}

impl NatsEventBus {
    /// Connects and makes sure the workflow stream exists
    pub async fn connect(config: &NatsConfig, name: &str) -> Result<Self, BusError> {
        info!(url = %config.url, stream = %config.stream, "Connecting to NATS");

        let client = ConnectOptions::new()
            .name(name)
            .ping_interval(PING_INTERVAL)
            .connection_timeout(config.connect_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| BusError::ConnectionFailed(format!("{}: {}", config.url, e)))?;

        let jetstream = jetstream::new(client.clone());
        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: vec![format!("{}.>", config.subject_prefix)],
                max_age: config.max_age(),
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::SetupFailed(format!("stream {}: {}", config.stream, e)))?;

        info!(
            stream = %config.stream,
            subjects = %format!("{}.>", config.subject_prefix),
            "Using JetStream stream"
        );

        Ok(Self {
            client,
            jetstream,
            stream,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    async fn publish_acked(&self, subject: String, payload: Bytes) -> Result<(), BusError> {
        let ack = self
            .jetstream
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| BusError::PublishFailed(format!("{}: {}", subject, e)))?;
        ack.await
            .map_err(|e| BusError::PublishFailed(format!("{}: {}", subject, e)))?;
        Ok(())
    }
}

impl DomainPort for NatsEventBus {}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, topic: Topic, key: &str, payload: &[u8]) -> Result<(), PortError> {
        let subject = subject(&self.config.subject_prefix, topic, key);
        self.publish_acked(subject, Bytes::copy_from_slice(payload)).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for NatsEventBus {
    async fn subscribe(
        &self,
        consumer: &str,
        topics: &[Topic],
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, PortError> {
        let name = durable_name(consumer);
        let prefix = self.config.subject_prefix.clone();

        let pull_consumer = self
            .stream
            .get_or_create_consumer(
                &name,
                pull::Config {
                    durable_name: Some(name.clone()),
                    filter_subjects: topics.iter().map(|topic| topic_filter(&prefix, *topic)).collect(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait(),
                    max_deliver: self.config.max_deliver,
                    max_ack_pending: self.config.max_ack_pending,
                    deliver_policy: DeliverPolicy::All,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SetupFailed(format!("consumer {}: {}", name, e)))?;

        let mut messages = pull_consumer
            .messages()
            .await
            .map_err(|e| BusError::SetupFailed(format!("consumer {}: {}", name, e)))?;

        info!(consumer = %name, topics = ?topics, "Subscribed to JetStream consumer");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(next) = messages.next().await {
                let message = match next {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(consumer = %name, error = %err, "Error receiving message");
                        continue;
                    }
                };

                let (message, acker) = message.split();
                let Some((topic, key)) = parse_subject(&prefix, message.subject.as_str()) else {
                    warn!(consumer = %name, subject = %message.subject, "Message outside the workflow subjects dropped");
                    if let Err(err) = acker.ack().await {
                        warn!(consumer = %name, error = %err, "Ack failed");
                    }
                    continue;
                };

                let delivery = Delivery::new(topic, key, message.payload.to_vec())
                    .with_receipt(Receipt::new(JetStreamReceipt(acker)));
                if tx.send(delivery).is_err() {
                    // unacknowledged messages are redelivered to the next subscriber
                    debug!(consumer = %name, "Feed closed");
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl HealthCheckable for NatsEventBus {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        if self.client.connection_state() != State::Connected {
            return HealthCheckResult::unhealthy("nats", "not connected");
        }
        match self.client.flush().await {
            Ok(()) => HealthCheckResult::healthy("nats", start.elapsed().as_millis() as u64),
            Err(err) => HealthCheckResult::unhealthy("nats", err.to_string()),
        }
    }
}

struct JetStreamReceipt(Acker);

#[async_trait]
impl Acknowledge for JetStreamReceipt {
    async fn ack(&self) -> Result<(), PortError> {
        self.0
            .ack()
            .await
            .map_err(|e| BusError::AckFailed(e.to_string()).into())
    }
}
