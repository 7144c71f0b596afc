//! In-memory adapters
//!
//! Each adapter keeps its state behind a tokio lock. The workflow store
//! validates a whole [`UnitOfWork`] before touching anything, which gives the
//! same all-or-nothing behaviour as the database transaction.
//!
//! Built with `new()`, the store drops outbox records once published and the
//! bus keeps no log, so a long-running process stays bounded. The
//! `recording()` constructors keep that history for inspection in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

use core_kernel::{
    ActorId, ApplicationId, DomainPort, EventId, HealthCheckResult, HealthCheckable, OutboxId,
    PortError,
};
use domain_workflow::{ApplicationProjection, DomainEvent, Status, Topic, WorkflowVariant};

use crate::consumer::Delivery;
use crate::notification::Notice;
use crate::ports::{
    DeadLetter, DeadLetterSink, DeliveryLedger, EventBus, EventSource, NotificationDelivery,
    OutboxRecord, OutboxStore, ProjectionStore, UnitOfWork,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Pending,
    Published,
    Dead,
}

#[derive(Debug, Default)]
struct StoreState {
    projections: HashMap<(ApplicationId, WorkflowVariant), ApplicationProjection>,
    processed: HashSet<EventId>,
    outbox: BTreeMap<i64, (OutboxRecord, RecordState)>,
    index: HashMap<OutboxId, i64>,
    next_seq: i64,
    failing_commits: u32,
    failing_marks: u32,
}

impl StoreState {
    fn record_mut(&mut self, id: OutboxId) -> Result<&mut (OutboxRecord, RecordState), PortError> {
        let seq = *self
            .index
            .get(&id)
            .ok_or_else(|| PortError::not_found("OutboxRecord", id))?;
        self.outbox
            .get_mut(&seq)
            .ok_or_else(|| PortError::not_found("OutboxRecord", id))
    }
}

/// Projection store and outbox of one service, in memory
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    state: RwLock<StoreState>,
    keep_published: bool,
}

impl InMemoryWorkflowStore {
    /// Store forgetting outbox records once they are published
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping published records, so [`staged`](Self::staged) sees them
    pub fn recording() -> Self {
        Self {
            keep_published: true,
            ..Self::default()
        }
    }

    /// Makes the next `count` commits fail with a transient error
    pub async fn fail_next_commits(&self, count: u32) {
        self.state.write().await.failing_commits = count;
    }

    /// Makes the next `count` `mark_published` calls fail after the bus accepted
    /// the record, as if the process crashed in between
    pub async fn fail_next_marks(&self, count: u32) {
        self.state.write().await.failing_marks = count;
    }

    /// Staged events still held, in staging order
    ///
    /// Published ones are included only for a [`recording`](Self::recording) store.
    pub async fn staged(&self) -> Vec<DomainEvent> {
        self.state
            .read()
            .await
            .outbox
            .values()
            .map(|(record, _)| record.event.clone())
            .collect()
    }

    pub async fn unpublished(&self) -> usize {
        self.state
            .read()
            .await
            .outbox
            .values()
            .filter(|(_, state)| *state == RecordState::Pending)
            .count()
    }

    pub async fn dead_records(&self) -> Vec<OutboxRecord> {
        self.state
            .read()
            .await
            .outbox
            .values()
            .filter(|(_, state)| *state == RecordState::Dead)
            .map(|(record, _)| record.clone())
            .collect()
    }

    pub async fn processed_count(&self) -> usize {
        self.state.read().await.processed.len()
    }

    /// Seeds a projection directly, bypassing validation
    pub async fn insert_projection(&self, projection: ApplicationProjection) {
        self.state
            .write()
            .await
            .projections
            .insert(projection.key(), projection);
    }
}

impl DomainPort for InMemoryWorkflowStore {}

#[async_trait]
impl HealthCheckable for InMemoryWorkflowStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("memory-workflow-store", 0)
    }
}

#[async_trait]
impl ProjectionStore for InMemoryWorkflowStore {
    async fn get(
        &self,
        application_id: ApplicationId,
        variant: WorkflowVariant,
    ) -> Result<Option<ApplicationProjection>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .projections
            .get(&(application_id, variant))
            .cloned())
    }

    async fn is_processed(&self, event_id: EventId) -> Result<bool, PortError> {
        Ok(self.state.read().await.processed.contains(&event_id))
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<(), PortError> {
        let mut state = self.state.write().await;

        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(PortError::connection("injected commit failure"));
        }

        let mut seen = HashSet::new();
        for event_id in &unit.processed {
            if state.processed.contains(event_id) || !seen.insert(*event_id) {
                return Err(PortError::conflict(format!("event {event_id} already processed")));
            }
        }

        if let Some(write) = &unit.projection {
            let stored = state.projections.get(&write.projection.key());
            match (write.expected_version, stored) {
                (None, None) => {}
                (None, Some(existing)) => {
                    return Err(PortError::conflict(format!(
                        "projection {} already exists at version {}",
                        existing.application_id, existing.version
                    )));
                }
                (Some(expected), Some(existing)) if existing.version == expected => {}
                (Some(expected), stored) => {
                    return Err(PortError::conflict(format!(
                        "projection version moved: expected {expected}, found {:?}",
                        stored.map(|p| p.version)
                    )));
                }
            }
        }

        if let Some(write) = unit.projection {
            state
                .projections
                .insert(write.projection.key(), write.projection);
        }
        state.processed.extend(unit.processed);
        for event in unit.staged {
            state.next_seq += 1;
            let seq = state.next_seq;
            let record = OutboxRecord::new(seq, event);
            state.index.insert(record.id, seq);
            state.outbox.insert(seq, (record, RecordState::Pending));
        }
        Ok(())
    }

    async fn stale(
        &self,
        status: Status,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ApplicationProjection>, PortError> {
        let mut stale: Vec<ApplicationProjection> = self
            .state
            .read()
            .await
            .projections
            .values()
            .filter(|p| p.status == status && p.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.updated_at);
        Ok(stale)
    }
}

#[async_trait]
impl OutboxStore for InMemoryWorkflowStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .outbox
            .values()
            .filter(|(_, state)| *state == RecordState::Pending)
            .take(limit)
            .map(|(record, _)| record.clone())
            .collect())
    }

    async fn mark_published(&self, id: OutboxId) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        if state.failing_marks > 0 {
            state.failing_marks -= 1;
            return Err(PortError::connection("injected mark_published failure"));
        }
        if self.keep_published {
            state.record_mut(id)?.1 = RecordState::Published;
            return Ok(());
        }
        let seq = state
            .index
            .remove(&id)
            .ok_or_else(|| PortError::not_found("OutboxRecord", id))?;
        state.outbox.remove(&seq);
        Ok(())
    }

    async fn record_failure(&self, id: OutboxId, error: &str) -> Result<u32, PortError> {
        let mut state = self.state.write().await;
        let (record, _) = state.record_mut(id)?;
        record.attempts += 1;
        record.last_error = Some(error.to_string());
        Ok(record.attempts)
    }

    async fn mark_dead_letter(&self, id: OutboxId, error: &str) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        let entry = state.record_mut(id)?;
        entry.0.last_error = Some(error.to_string());
        entry.1 = RecordState::Dead;
        Ok(())
    }
}

/// Failure the in-memory bus can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFailure {
    /// Broker unavailable, worth retrying
    Transient,
    /// Message refused outright
    Permanent,
}

#[derive(Debug, Default)]
struct BusState {
    log: Vec<Delivery>,
    subscribers: Vec<(Vec<Topic>, mpsc::UnboundedSender<Delivery>)>,
    failures: VecDeque<BusFailure>,
}

/// Topic bus fanning published messages out to subscribers in this process
#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    state: Mutex<BusState>,
    record: bool,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus logging every accepted message for [`published`](Self::published)
    pub fn recording() -> Self {
        Self {
            record: true,
            ..Self::default()
        }
    }

    /// Queues failures returned by the next publishes, in order
    pub async fn fail_next(&self, count: usize, failure: BusFailure) {
        let mut state = self.state.lock().await;
        state.failures.extend(std::iter::repeat(failure).take(count));
    }

    /// Every accepted message in publish order; empty unless recording
    pub async fn published(&self) -> Vec<Delivery> {
        self.state.lock().await.log.clone()
    }

    pub async fn published_events(&self) -> Vec<DomainEvent> {
        self.published()
            .await
            .iter()
            .filter_map(|d| DomainEvent::decode(&d.payload).ok())
            .collect()
    }
}

impl DomainPort for InMemoryEventBus {}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: Topic, key: &str, payload: &[u8]) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        match state.failures.pop_front() {
            Some(BusFailure::Transient) => return Err(PortError::unavailable("event-bus")),
            Some(BusFailure::Permanent) => {
                return Err(PortError::validation("message rejected by event bus"))
            }
            None => {}
        }

        let delivery = Delivery::new(topic, key, payload.to_vec());
        state
            .subscribers
            .retain(|(topics, tx)| !topics.contains(&topic) || tx.send(delivery.clone()).is_ok());
        if self.record {
            state.log.push(delivery);
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for InMemoryEventBus {
    /// Receives every message later published on one of `topics`
    async fn subscribe(
        &self,
        _consumer: &str,
        topics: &[Topic],
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, PortError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.subscribers.push((topics.to_vec(), tx));
        Ok(rx)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }
}

impl DomainPort for InMemoryDeadLetters {}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), PortError> {
        self.letters.lock().await.push(letter);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeliveryLedger {
    claims: Mutex<HashMap<EventId, ActorId>>,
}

impl InMemoryDeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DomainPort for InMemoryDeliveryLedger {}

#[async_trait]
impl DeliveryLedger for InMemoryDeliveryLedger {
    async fn claim(&self, event_id: EventId, recipient: ActorId) -> Result<bool, PortError> {
        let mut claims = self.claims.lock().await;
        if claims.contains_key(&event_id) {
            return Ok(false);
        }
        claims.insert(event_id, recipient);
        Ok(true)
    }

    async fn release(&self, event_id: EventId) -> Result<(), PortError> {
        self.claims.lock().await.remove(&event_id);
        Ok(())
    }
}

/// Delivery collaborator that records notices instead of sending them
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
    failing: Mutex<u32>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes the next `count` deliveries fail
    pub async fn fail_next(&self, count: u32) {
        *self.failing.lock().await = count;
    }

    pub async fn notices(&self) -> Vec<Notice> {
        self.notices.lock().await.clone()
    }
}

impl DomainPort for RecordingNotifier {}

#[async_trait]
impl NotificationDelivery for RecordingNotifier {
    async fn deliver(&self, notice: &Notice) -> Result<(), PortError> {
        let mut failing = self.failing.lock().await;
        if *failing > 0 {
            *failing -= 1;
            return Err(PortError::unavailable("notification-delivery"));
        }
        drop(failing);

        tracing::debug!(recipient = %notice.recipient, subject = %notice.subject, "Recorded notice");
        self.notices.lock().await.push(notice.clone());
        Ok(())
    }
}
