//! Test Data Builders
//!
//! Builders for event envelopes with sensible defaults. Tests set only the
//! fields they care about.

use chrono::{DateTime, Utc};
use serde_json::Value;

use core_kernel::{ActorContext, ActorId, ApplicationId, EventId, Role, TenantId};
use domain_workflow::DomainEvent;

/// Builder for a single event envelope
pub struct EventBuilder {
    application_id: ApplicationId,
    actor_id: ActorId,
    role: Role,
    tenant_id: Option<TenantId>,
    event_type: String,
    version: u64,
    payload: Value,
    event_id: Option<EventId>,
    occurred_at: Option<DateTime<Utc>>,
}

impl EventBuilder {
    /// Starts an event of `event_type` on `application_id`, version 1, by a farmer
    pub fn new(application_id: ApplicationId, event_type: impl Into<String>) -> Self {
        Self {
            application_id,
            actor_id: ActorId::new(),
            role: Role::Farmer,
            tenant_id: None,
            event_type: event_type.into(),
            version: 1,
            payload: Value::Null,
            event_id: None,
            occurred_at: None,
        }
    }

    /// Sets the acting role
    pub fn by(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Sets the acting user
    pub fn actor(mut self, actor_id: ActorId) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Reuses an existing event id, e.g. to model a redelivery
    pub fn event_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn build(self) -> DomainEvent {
        let mut ctx = ActorContext::new(self.application_id, self.actor_id, self.role);
        if let Some(tenant) = self.tenant_id {
            ctx = ctx.with_tenant(tenant);
        }
        let mut event = DomainEvent::new(&ctx, self.event_type, self.version, self.payload);
        if let Some(id) = self.event_id {
            event.event_id = id;
        }
        if let Some(at) = self.occurred_at {
            event = event.with_occurred_at(at);
        }
        event
    }
}

/// Producer-side stream of one application's events with consecutive versions
pub struct EventSequence {
    application_id: ApplicationId,
    applicant: ActorId,
    version: u64,
}

impl EventSequence {
    pub fn new(application_id: ApplicationId) -> Self {
        Self {
            application_id,
            applicant: ActorId::new(),
            version: 0,
        }
    }

    /// Starts a sequence on a fresh application
    pub fn fresh() -> Self {
        Self::new(ApplicationId::new())
    }

    pub fn application_id(&self) -> ApplicationId {
        self.application_id
    }

    /// The farmer who submits, and receives the notices
    pub fn applicant(&self) -> ActorId {
        self.applicant
    }

    /// Continues the sequence after an event produced elsewhere
    pub fn resume_at(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Next event, by the applicant when `role` is Farmer
    pub fn next(&mut self, event_type: &str, role: Role) -> DomainEvent {
        self.next_with(event_type, role, Value::Null)
    }

    pub fn next_with(&mut self, event_type: &str, role: Role, payload: Value) -> DomainEvent {
        self.version += 1;
        let builder = EventBuilder::new(self.application_id, event_type)
            .by(role)
            .version(self.version)
            .payload(payload);
        if role == Role::Farmer {
            builder.actor(self.applicant).build()
        } else {
            builder.build()
        }
    }

    /// Submission through policy issuance via the PCIC route
    pub fn verification_path(&mut self) -> Vec<DomainEvent> {
        vec![
            self.next("APPLICATION_SUBMITTED", Role::Farmer),
            self.next("AEW_VERIFIED", Role::Aew),
            self.next("MA_VERIFIED", Role::Ma),
            self.next("PCIC_APPROVED", Role::Pcic),
            self.next_with(
                "POLICY_ISSUED",
                Role::Pcic,
                serde_json::json!({ "policy_number": crate::fixtures::StringFixtures::policy_number() }),
            ),
        ]
    }
}
