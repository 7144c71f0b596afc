//! Engine Ports
//!
//! The orchestrator and its background tasks only ever talk to these traits.
//! The in-memory adapters live in [`crate::adapters::memory`]; storage is
//! backed by PostgreSQL in `infra_db` and the bus by NATS JetStream in
//! `infra_bus`.
//!
//! # Atomicity
//!
//! [`ProjectionStore::commit`] is the single concurrency boundary of the
//! engine. The projection write, the processed-event marks and the staged
//! outbox records of one [`UnitOfWork`] are persisted together or not at all.
//!
//! ```rust,ignore
//! let unit = UnitOfWork::new()
//!     .put_projection(next, Some(current.version))
//!     .mark_processed(event.event_id)
//!     .stage(event.clone());
//! store.commit(unit).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use core_kernel::{
    ActorId, ApplicationId, DomainPort, EventId, HealthCheckable, OutboxId, PortError,
};
use domain_workflow::{ApplicationProjection, DomainEvent, Status, Topic, WorkflowVariant};

use crate::consumer::Delivery;
use crate::notification::Notice;

/// Projection write inside a unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionWrite {
    pub projection: ApplicationProjection,
    /// `None` inserts a new projection; `Some(v)` updates only if the stored
    /// version is still `v`
    pub expected_version: Option<u64>,
}

/// Everything one decision persists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    pub projection: Option<ProjectionWrite>,
    pub processed: Vec<EventId>,
    pub staged: Vec<DomainEvent>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_projection(mut self, projection: ApplicationProjection, expected_version: Option<u64>) -> Self {
        self.projection = Some(ProjectionWrite {
            projection,
            expected_version,
        });
        self
    }

    pub fn mark_processed(mut self, event_id: EventId) -> Self {
        self.processed.push(event_id);
        self
    }

    pub fn stage(mut self, event: DomainEvent) -> Self {
        self.staged.push(event);
        self
    }

    pub fn stage_all(mut self, events: impl IntoIterator<Item = DomainEvent>) -> Self {
        self.staged.extend(events);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.projection.is_none() && self.processed.is_empty() && self.staged.is_empty()
    }
}

/// Projection and processed-event log of one service
#[async_trait]
pub trait ProjectionStore: DomainPort + HealthCheckable {
    async fn get(
        &self,
        application_id: ApplicationId,
        variant: WorkflowVariant,
    ) -> Result<Option<ApplicationProjection>, PortError>;

    /// True when `event_id` is already in the processed-event log
    async fn is_processed(&self, event_id: EventId) -> Result<bool, PortError>;

    /// Persists a unit of work atomically
    ///
    /// Fails with `PortError::Conflict` when an event id is already processed
    /// or the projection version moved, in which case nothing is written.
    async fn commit(&self, unit: UnitOfWork) -> Result<(), PortError>;

    /// Projections in `status` not updated since `updated_before`
    async fn stale(
        &self,
        status: Status,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ApplicationProjection>, PortError>;
}

/// Staged event awaiting publication
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub id: OutboxId,
    /// Staging order
    pub seq: i64,
    pub event: DomainEvent,
    pub topic: Topic,
    pub partition_key: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub staged_at: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn new(seq: i64, event: DomainEvent) -> Self {
        Self {
            id: OutboxId::new_v7(),
            seq,
            topic: event.topic(),
            partition_key: event.partition_key(),
            attempts: 0,
            last_error: None,
            staged_at: Utc::now(),
            event,
        }
    }
}

/// Publication side of the outbox
#[async_trait]
pub trait OutboxStore: DomainPort {
    /// Unpublished, non-dead records in staging order
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, PortError>;

    async fn mark_published(&self, id: OutboxId) -> Result<(), PortError>;

    /// Records a failed attempt and returns the attempt count so far
    async fn record_failure(&self, id: OutboxId, error: &str) -> Result<u32, PortError>;

    async fn mark_dead_letter(&self, id: OutboxId, error: &str) -> Result<(), PortError>;
}

/// Message bus
#[async_trait]
pub trait EventBus: DomainPort {
    /// Publishes an encoded envelope; the key selects the partition
    async fn publish(&self, topic: Topic, key: &str, payload: &[u8]) -> Result<(), PortError>;
}

/// Subscription side of the bus
///
/// Deliveries carrying a [`Receipt`] stay unacknowledged until the consumer
/// handled them; the broker redelivers anything left unacknowledged.
#[async_trait]
pub trait EventSource: DomainPort {
    /// Starts a feed of every message on `topics` for the named consumer
    async fn subscribe(
        &self,
        consumer: &str,
        topics: &[Topic],
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, PortError>;
}

/// Broker-side acknowledgement of one message
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), PortError>;
}

/// Handle acknowledging a delivery once it was handled
#[derive(Clone)]
pub struct Receipt(std::sync::Arc<dyn Acknowledge>);

impl Receipt {
    pub fn new(ack: impl Acknowledge + 'static) -> Self {
        Self(std::sync::Arc::new(ack))
    }

    pub async fn ack(&self) -> Result<(), PortError> {
        self.0.ack().await
    }
}

impl std::fmt::Debug for Receipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Receipt")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterSource {
    Outbox,
    Consumer,
    ReorderBuffer,
}

/// A message the engine gave up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub source: DeadLetterSource,
    pub event_id: Option<EventId>,
    pub application_id: Option<ApplicationId>,
    pub reason: String,
    pub payload: Vec<u8>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(source: DeadLetterSource, reason: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            source,
            event_id: None,
            application_id: None,
            reason: reason.into(),
            payload,
            dead_lettered_at: Utc::now(),
        }
    }

    /// Attaches the identity of a decodable event
    pub fn for_event(mut self, event: &DomainEvent) -> Self {
        self.event_id = Some(event.event_id);
        self.application_id = Some(event.application_id);
        self
    }
}

#[async_trait]
pub trait DeadLetterSink: DomainPort {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), PortError>;
}

/// External email/push delivery
#[async_trait]
pub trait NotificationDelivery: DomainPort {
    async fn deliver(&self, notice: &Notice) -> Result<(), PortError>;
}

/// Remembers which events already produced a notice
#[async_trait]
pub trait DeliveryLedger: DomainPort {
    /// Claims `event_id` for `recipient`; false when it was claimed before
    async fn claim(&self, event_id: EventId, recipient: ActorId) -> Result<bool, PortError>;

    /// Gives a claim back after a failed delivery
    async fn release(&self, event_id: EventId) -> Result<(), PortError>;
}
