//! Partitioned consumer workers
//!
//! Each worker owns a bounded channel. Deliveries are routed by a stable hash
//! of the partition key, so every event of one application lands on the same
//! worker and is handled in arrival order, while different applications
//! proceed in parallel.
//!
//! Workers run until their channel closes. Stopping intake is the caller's
//! job; [`PartitionedConsumer::close`] then drains whatever is still queued.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use domain_workflow::{DomainEvent, Topic};

use crate::error::EngineError;
use crate::ports::{DeadLetter, DeadLetterSink, DeadLetterSource, Receipt};
use crate::retry::RetryPolicy;

/// Something that reacts to decoded events
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn handle_event(&self, event: DomainEvent) -> Result<(), EngineError>;
}

/// One raw message taken off the bus
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: Topic,
    pub key: String,
    pub payload: Vec<u8>,
    /// Acknowledged after the message was handled or dead-lettered
    pub receipt: Option<Receipt>,
}

impl Delivery {
    pub fn new(topic: Topic, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic,
            key: key.into(),
            payload,
            receipt: None,
        }
    }

    pub fn with_receipt(mut self, receipt: Receipt) -> Self {
        self.receipt = Some(receipt);
        self
    }

    /// Encodes an event the way the publisher puts it on the bus
    pub fn from_event(event: &DomainEvent) -> Result<Self, EngineError> {
        Ok(Self::new(event.topic(), event.partition_key(), event.encode()?))
    }
}

pub struct PartitionedConsumer {
    name: String,
    senders: Vec<mpsc::Sender<Delivery>>,
    handles: Vec<JoinHandle<()>>,
}

impl PartitionedConsumer {
    /// Spawns `workers` workers feeding `handler`
    pub fn spawn(
        handler: Arc<dyn EventHandler>,
        dead_letters: Arc<dyn DeadLetterSink>,
        retry: RetryPolicy,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let workers = workers.max(1);
        let name = handler.name().to_string();
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(
                index,
                rx,
                Arc::clone(&handler),
                Arc::clone(&dead_letters),
                retry.clone(),
            )));
        }

        tracing::info!(consumer = %name, workers, "Consumer workers started");

        Self {
            name,
            senders,
            handles,
        }
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Queues a delivery on the worker owning its partition key
    pub async fn dispatch(&self, delivery: Delivery) -> Result<(), EngineError> {
        let index = partition_for(&delivery.key, self.senders.len());
        self.senders[index]
            .send(delivery)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Stops accepting deliveries and waits until queued ones are handled
    pub async fn close(self) {
        drop(self.senders);
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(consumer = %self.name, error = %err, "Consumer worker panicked");
            }
        }
        tracing::info!(consumer = %self.name, "Consumer workers stopped");
    }
}

/// Stable partition index for a key (FNV-1a)
pub fn partition_for(key: &str, partitions: usize) -> usize {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = key
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME));
    (hash % partitions.max(1) as u64) as usize
}

async fn run_worker(
    index: usize,
    mut rx: mpsc::Receiver<Delivery>,
    handler: Arc<dyn EventHandler>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
) {
    tracing::debug!(consumer = handler.name(), worker = index, "Worker started");

    while let Some(mut delivery) = rx.recv().await {
        let receipt = delivery.receipt.take();
        let key = delivery.key.clone();
        process_delivery(index, delivery, handler.as_ref(), dead_letters.as_ref(), &retry).await;

        if let Some(receipt) = receipt {
            if let Err(err) = receipt.ack().await {
                // the broker redelivers it; the handler's dedup absorbs that
                tracing::warn!(consumer = handler.name(), worker = index, key = %key, error = %err, "Ack failed");
            }
        }
    }

    tracing::debug!(consumer = handler.name(), worker = index, "Worker stopped");
}

async fn process_delivery(
    index: usize,
    delivery: Delivery,
    handler: &dyn EventHandler,
    dead_letters: &dyn DeadLetterSink,
    retry: &RetryPolicy,
) {
    let event = match DomainEvent::decode(&delivery.payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!(
                alert = true,
                consumer = handler.name(),
                worker = index,
                topic = %delivery.topic,
                key = %delivery.key,
                error = %err,
                "Malformed message dead-lettered"
            );
            let letter = DeadLetter::new(DeadLetterSource::Consumer, err.to_string(), delivery.payload);
            send_dead_letter(dead_letters, letter).await;
            return;
        }
    };

    let result = retry
        .run("handle_event", || handler.handle_event(event.clone()))
        .await;

    if let Err(err) = result {
        tracing::error!(
            alert = true,
            consumer = handler.name(),
            worker = index,
            application_id = %event.application_id,
            event_id = %event.event_id,
            event_type = %event.event_type,
            error = %err,
            "Event handling failed, dead-lettered"
        );
        let letter = DeadLetter::new(DeadLetterSource::Consumer, err.to_string(), delivery.payload)
            .for_event(&event);
        send_dead_letter(dead_letters, letter).await;
    }
}

async fn send_dead_letter(sink: &dyn DeadLetterSink, letter: DeadLetter) {
    if let Err(err) = sink.dead_letter(letter).await {
        tracing::error!(alert = true, error = %err, "Failed to write dead letter");
    }
}
