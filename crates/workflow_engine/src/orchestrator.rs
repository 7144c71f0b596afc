//! Workflow Orchestrator
//!
//! Applies the transition validator to every consumed event and command,
//! then persists the outcome as one [`UnitOfWork`]:
//!
//! - duplicate event id: nothing happens
//! - predecessor missing: the event waits in the reorder buffer
//! - accepted: new projection, processed mark, consequence events
//! - refused: processed mark and a `TransitionRejected` event only
//!
//! All events of one application reach the orchestrator from the same
//! consumer worker, so per-application processing is sequential. The
//! store's optimistic version check catches anything that slips through.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use core_kernel::{ActorContext, ApplicationId};
use domain_workflow::{
    ApplicationProjection, ConsequencePayload, Decision, DomainEvent, EscalationPayload, EventType,
    RejectionPayload, Status, TransitionValidator, WorkflowVariant,
};

use crate::config::ReorderConfig;
use crate::consumer::EventHandler;
use crate::error::EngineError;
use crate::ports::{DeadLetter, DeadLetterSink, DeadLetterSource, ProjectionStore, UnitOfWork};
use crate::reorder::{HoldResult, ReorderBuffer};

/// Attempts of one decision when the store reports a version conflict
const MAX_DECISION_ATTEMPTS: usize = 3;

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorOutcome {
    Applied {
        variant: WorkflowVariant,
        from: Option<Status>,
        to: Status,
        version: u64,
        /// Consequence types staged with the transition
        staged: Vec<EventType>,
        /// Buffered successors processed right after this event
        released: usize,
    },
    /// Event id already processed
    NoOp,
    Rejected {
        reason: String,
    },
    Buffered {
        version: u64,
        waiting_for: Option<u64>,
    },
    /// Event type of another variant or foreign to this build
    Ignored,
    /// The event could not be held and was dead-lettered
    Escalated {
        reason: String,
    },
}

impl OrchestratorOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            OrchestratorOutcome::Applied { .. } => "applied",
            OrchestratorOutcome::NoOp => "noop",
            OrchestratorOutcome::Rejected { .. } => "rejected",
            OrchestratorOutcome::Buffered { .. } => "buffered",
            OrchestratorOutcome::Ignored => "ignored",
            OrchestratorOutcome::Escalated { .. } => "escalated",
        }
    }
}

/// An authenticated, validated command from the HTTP layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Command {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Whether the event came off the bus or is a local command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Bus,
    Command,
}

pub struct Orchestrator {
    service: String,
    validator: Arc<TransitionValidator>,
    variants: BTreeSet<WorkflowVariant>,
    store: Arc<dyn ProjectionStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    buffer: Mutex<ReorderBuffer>,
}

impl Orchestrator {
    /// Creates an orchestrator projecting `variants`
    ///
    /// Variants without a registry in `validator` are dropped with a warning.
    pub fn new(
        service: impl Into<String>,
        validator: Arc<TransitionValidator>,
        variants: impl IntoIterator<Item = WorkflowVariant>,
        store: Arc<dyn ProjectionStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        reorder: ReorderConfig,
    ) -> Self {
        let service = service.into();
        let variants = variants
            .into_iter()
            .filter(|v| {
                let loaded = validator.registry(*v).is_some();
                if !loaded {
                    tracing::warn!(service = %service, variant = %v, "No registry for projected variant");
                }
                loaded
            })
            .collect();

        Self {
            service,
            validator,
            variants,
            store,
            dead_letters,
            buffer: Mutex::new(ReorderBuffer::new(reorder)),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn validator(&self) -> &TransitionValidator {
        &self.validator
    }

    pub fn projects(&self, variant: WorkflowVariant) -> bool {
        self.variants.contains(&variant)
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Handles one event consumed from the bus
    pub async fn handle(&self, event: DomainEvent) -> Result<OrchestratorOutcome, EngineError> {
        let variant = match self.classify(&event) {
            Some(variant) => variant,
            None => return Ok(OrchestratorOutcome::Ignored),
        };

        let outcome = self.process(event.clone(), variant, Origin::Bus).await?;
        self.finish(event.application_id, variant, outcome).await
    }

    /// Entry point for commands from the HTTP layer
    ///
    /// The command becomes an event at the next version of the projection
    /// (version 1 for an entry command) and takes the same validation path as
    /// a consumed event. On success the command's own event is staged in the
    /// outbox ahead of its consequences.
    pub async fn submit(
        &self,
        ctx: &ActorContext,
        command: Command,
    ) -> Result<OrchestratorOutcome, EngineError> {
        let (_, registry) = self.validator.classify(&command.event_type)?;
        let variant = registry.variant();
        if !self.projects(variant) {
            return Err(EngineError::VariantNotProjected(variant));
        }

        let current = self.store.get(ctx.application_id, variant).await?;
        let version = match &current {
            Some(projection) => projection.next_version(),
            None if self.validator.is_entry(&command.event_type) => 1,
            None => {
                return Err(EngineError::ProjectionNotFound {
                    application_id: ctx.application_id,
                    variant,
                })
            }
        };

        let event = DomainEvent::new(ctx, command.event_type, version, command.payload);
        tracing::debug!(
            service = %self.service,
            application_id = %ctx.application_id,
            event_type = %event.event_type,
            version,
            role = %ctx.role,
            "Command received"
        );

        let outcome = self.process(event, variant, Origin::Command).await?;
        self.finish(ctx.application_id, variant, outcome).await
    }

    fn classify(&self, event: &DomainEvent) -> Option<WorkflowVariant> {
        match self.validator.classify(&event.event_type) {
            Ok((_, registry)) if self.projects(registry.variant()) => Some(registry.variant()),
            Ok((_, registry)) => {
                tracing::debug!(
                    service = %self.service,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    variant = %registry.variant(),
                    "Ignoring event for unprojected variant"
                );
                None
            }
            Err(err) => {
                tracing::debug!(
                    service = %self.service,
                    event_id = %event.event_id,
                    error = %err,
                    "Ignoring unknown event type"
                );
                None
            }
        }
    }

    // Releases buffered successors once the projection has moved
    async fn finish(
        &self,
        application_id: ApplicationId,
        variant: WorkflowVariant,
        mut outcome: OrchestratorOutcome,
    ) -> Result<OrchestratorOutcome, EngineError> {
        if matches!(
            outcome,
            OrchestratorOutcome::Buffered { .. } | OrchestratorOutcome::Escalated { .. }
        ) {
            return Ok(outcome);
        }

        let released = self.drain(application_id, variant).await?;
        if let OrchestratorOutcome::Applied { released: r, .. } = &mut outcome {
            *r = released;
        }
        Ok(outcome)
    }

    async fn drain(
        &self,
        application_id: ApplicationId,
        variant: WorkflowVariant,
    ) -> Result<usize, EngineError> {
        let key = (application_id, variant);
        let mut released = 0;

        loop {
            if !self.buffer.lock().await.contains_key(&key) {
                break;
            }
            let current = match self.store.get(application_id, variant).await? {
                Some(projection) => projection.version,
                None => break,
            };
            let next = self.buffer.lock().await.take_ready(&key, current);
            let Some(next) = next else { break };

            tracing::debug!(
                service = %self.service,
                application_id = %application_id,
                event_id = %next.event_id,
                version = next.version,
                "Releasing buffered event"
            );
            match self.process(next.clone(), variant, Origin::Bus).await {
                Ok(_) => released += 1,
                Err(err) => {
                    self.buffer.lock().await.restore(key, next, Utc::now());
                    return Err(err);
                }
            }
        }

        Ok(released)
    }

    async fn process(
        &self,
        event: DomainEvent,
        variant: WorkflowVariant,
        origin: Origin,
    ) -> Result<OrchestratorOutcome, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.decide_and_commit(&event, variant, origin).await {
                Err(EngineError::Port(err)) if err.is_conflict() => {
                    if self.store.is_processed(event.event_id).await? {
                        tracing::debug!(
                            service = %self.service,
                            event_id = %event.event_id,
                            "Concurrent commit already processed event"
                        );
                        return Ok(OrchestratorOutcome::NoOp);
                    }
                    if attempt >= MAX_DECISION_ATTEMPTS {
                        return Err(EngineError::Port(err));
                    }
                    tracing::warn!(
                        service = %self.service,
                        event_id = %event.event_id,
                        attempt,
                        error = %err,
                        "Projection moved during commit, deciding again"
                    );
                }
                other => return other,
            }
        }
    }

    async fn decide_and_commit(
        &self,
        event: &DomainEvent,
        variant: WorkflowVariant,
        origin: Origin,
    ) -> Result<OrchestratorOutcome, EngineError> {
        if self.store.is_processed(event.event_id).await? {
            tracing::debug!(
                service = %self.service,
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Duplicate event"
            );
            return Ok(OrchestratorOutcome::NoOp);
        }

        let current = self.store.get(event.application_id, variant).await?;

        match &current {
            None if !self.validator.is_entry(&event.event_type) => {
                return self.hold(event, variant, None).await;
            }
            Some(projection) if event.version <= projection.version => {
                let detail = format!(
                    "version {} already applied (current {})",
                    event.version, projection.version
                );
                return self
                    .reject(event, Some(projection.status), "version_conflict", detail)
                    .await;
            }
            Some(projection) if event.version > projection.next_version() => {
                return self.hold(event, variant, Some(projection.next_version())).await;
            }
            _ => {}
        }

        let status = current.as_ref().map(|p| p.status);
        let decision = match self.validator.decide(status, &event.event_type, event.actor_role) {
            Ok(decision) => decision,
            Err(err) => {
                return self.reject(event, status, err.reason(), err.to_string()).await;
            }
        };

        let next = match &current {
            Some(projection) => projection.advance(event, &decision)?,
            None => ApplicationProjection::open(event, &decision),
        };
        let consequences = self.consequences(event, &decision, &next)?;

        let mut unit = UnitOfWork::new()
            .put_projection(next.clone(), current.as_ref().map(|p| p.version))
            .mark_processed(event.event_id);
        if origin == Origin::Command {
            unit = unit.stage(event.clone());
        }
        let staged: Vec<EventType> = decision.emits.to_vec();
        unit = unit.stage_all(consequences);

        self.store.commit(unit).await?;

        tracing::info!(
            service = %self.service,
            application_id = %event.application_id,
            variant = %variant,
            event_id = %event.event_id,
            event_type = %event.event_type,
            from = ?decision.from,
            to = %decision.to,
            version = next.version,
            terminal = decision.terminal,
            "Applied transition"
        );

        Ok(OrchestratorOutcome::Applied {
            variant,
            from: decision.from,
            to: decision.to,
            version: next.version,
            staged,
            released: 0,
        })
    }

    fn consequences(
        &self,
        trigger: &DomainEvent,
        decision: &Decision,
        projection: &ApplicationProjection,
    ) -> Result<Vec<DomainEvent>, EngineError> {
        let payload = serde_json::to_value(ConsequencePayload {
            applicant_id: projection.applicant_id,
            variant: decision.variant,
            from_status: decision.from,
            to_status: decision.to,
            trigger_event_id: trigger.event_id,
        })?;

        Ok(decision
            .emits
            .iter()
            .map(|kind| DomainEvent::consequence(trigger, *kind, merge(&payload, &trigger.payload)))
            .collect())
    }

    async fn reject(
        &self,
        event: &DomainEvent,
        current: Option<Status>,
        reason: &str,
        detail: String,
    ) -> Result<OrchestratorOutcome, EngineError> {
        tracing::warn!(
            service = %self.service,
            application_id = %event.application_id,
            event_id = %event.event_id,
            event_type = %event.event_type,
            role = %event.actor_role,
            current = ?current,
            reason,
            detail = %detail,
            "Transition rejected"
        );

        let payload = serde_json::to_value(RejectionPayload {
            reason: reason.to_string(),
            detail,
            rejected_event_id: event.event_id,
            rejected_event_type: event.event_type.clone(),
            actor_id: event.actor_id,
            actor_role: event.actor_role,
            current_status: current,
        })?;
        let rejection = DomainEvent::consequence(event, EventType::TransitionRejected, payload);

        let unit = UnitOfWork::new()
            .mark_processed(event.event_id)
            .stage(rejection);
        self.store.commit(unit).await?;

        Ok(OrchestratorOutcome::Rejected {
            reason: reason.to_string(),
        })
    }

    async fn hold(
        &self,
        event: &DomainEvent,
        variant: WorkflowVariant,
        waiting_for: Option<u64>,
    ) -> Result<OrchestratorOutcome, EngineError> {
        let key = (event.application_id, variant);
        let result = self.buffer.lock().await.hold(key, event.clone(), Utc::now());

        match result {
            HoldResult::Held | HoldResult::Duplicate => {
                tracing::warn!(
                    service = %self.service,
                    application_id = %event.application_id,
                    event_id = %event.event_id,
                    version = event.version,
                    waiting_for = ?waiting_for,
                    "Out-of-order event buffered"
                );
                Ok(OrchestratorOutcome::Buffered {
                    version: event.version,
                    waiting_for,
                })
            }
            HoldResult::Conflict => {
                let detail = format!("version {} already held by another event", event.version);
                self.reject(event, None, "version_conflict", detail).await
            }
            HoldResult::Overflow => {
                self.escalate_held(event, variant, "reorder_overflow").await?;
                Ok(OrchestratorOutcome::Escalated {
                    reason: "reorder_overflow".to_string(),
                })
            }
        }
    }

    /// Expires events held longer than the buffer TTL
    ///
    /// Each expired event is escalated and dead-lettered. An event whose
    /// escalation fails goes back into the buffer with its original hold time,
    /// so the next sweep retries it; the first such error is returned once
    /// every expired event was tried. Returns how many were escalated.
    pub async fn expire_buffered(&self, now: chrono::DateTime<Utc>) -> Result<usize, EngineError> {
        let expired = self.buffer.lock().await.expire(now);
        let mut escalated = 0;
        let mut first_error = None;

        for (key, held) in expired {
            match self.escalate_held(&held.event, key.1, "reorder_timeout").await {
                Ok(()) => escalated += 1,
                Err(err) => {
                    tracing::warn!(
                        service = %self.service,
                        application_id = %held.event.application_id,
                        event_id = %held.event.event_id,
                        error = %err,
                        "Expired event kept in reorder buffer for the next sweep"
                    );
                    self.buffer.lock().await.restore(key, held.event, held.held_at);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(escalated),
        }
    }

    // Stages an escalation for a held event, then dead-letters it.
    // The escalation commit goes first: when it fails nothing is written and
    // the caller keeps the event. A dead-letter failure after the commit is
    // returned too, so a retry may raise a second escalation but never loses
    // the event.
    async fn escalate_held(
        &self,
        event: &DomainEvent,
        variant: WorkflowVariant,
        reason: &str,
    ) -> Result<(), EngineError> {
        let current = self.store.get(event.application_id, variant).await?;
        let payload = serde_json::to_value(EscalationPayload {
            reason: reason.to_string(),
            variant,
            status: current.as_ref().map(|p| p.status),
            stuck_since: current.as_ref().map(|p| p.updated_at),
            held_event_id: Some(event.event_id),
            detail: format!("event {} at version {} never became applicable", event.event_type, event.version),
        })?;
        let ctx = ActorContext::system(event.application_id, event.tenant_id);
        let version = current.map(|p| p.version).unwrap_or(0);
        let mut escalation = DomainEvent::new(&ctx, EventType::EscalationRaised.as_str(), version, payload);
        escalation.causation_id = Some(event.event_id);

        self.store.commit(UnitOfWork::new().stage(escalation)).await?;

        tracing::error!(
            alert = true,
            service = %self.service,
            application_id = %event.application_id,
            event_id = %event.event_id,
            version = event.version,
            reason,
            "Reorder buffer gave up on event"
        );

        let letter = DeadLetter::new(DeadLetterSource::ReorderBuffer, reason, event.encode()?)
            .for_event(event);
        self.dead_letters.dead_letter(letter).await?;
        Ok(())
    }
}

// Consequence payloads carry the trigger's own fields (policy number, remarks)
// underneath the workflow fields
fn merge(workflow: &serde_json::Value, trigger: &serde_json::Value) -> serde_json::Value {
    let mut merged = match trigger {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let serde_json::Value::Object(fields) = workflow {
        for (k, v) in fields {
            merged.insert(k.clone(), v.clone());
        }
    }
    serde_json::Value::Object(merged)
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("service", &self.service)
            .field("variants", &self.variants)
            .finish()
    }
}

#[async_trait::async_trait]
impl EventHandler for Orchestrator {
    fn name(&self) -> &str {
        &self.service
    }

    async fn handle_event(&self, event: DomainEvent) -> Result<(), EngineError> {
        let event_id = event.event_id;
        let outcome = self.handle(event).await?;
        tracing::debug!(
            service = %self.service,
            event_id = %event_id,
            outcome = outcome.label(),
            "Event handled"
        );
        Ok(())
    }
}
