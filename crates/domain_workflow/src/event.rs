//! Event catalogue and the envelope carried on the bus
//!
//! Every message on every topic is a [`DomainEvent`]. The envelope keeps its
//! `event_type` as a plain string: services publish types that other
//! services do not know, and those must survive decoding so the validator can
//! classify them as foreign instead of the consumer failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use core_kernel::{ActorContext, ActorId, ApplicationId, EventId, Role, TenantId};
use crate::error::WorkflowError;
use crate::status::{Status, WorkflowVariant};

/// Envelope schema version written by this build
pub const SCHEMA_VERSION: u16 = 1;

/// Bus topic, one per bounded context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Applications,
    Verification,
    Pcic,
    Notifications,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Applications,
        Topic::Verification,
        Topic::Pcic,
        Topic::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Applications => "applications",
            Topic::Verification => "verification",
            Topic::Pcic => "pcic",
            Topic::Notifications => "notifications",
        }
    }

    pub fn parse(s: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|topic| topic.as_str() == s)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! event_types {
    ($( $(#[$doc:meta])* $name:ident => $wire:literal, $variant:expr, $topic:ident; )*) => {
        /// Every event type known to this build
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum EventType {
            $( $(#[$doc])* $name, )*
        }

        impl EventType {
            pub const ALL: &'static [EventType] = &[$(EventType::$name),*];

            /// Returns the wire name of the event type
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventType::$name => $wire,)*
                }
            }

            /// The variant whose table this event type drives, if any
            ///
            /// Consequence and operational events (approvals for notification,
            /// rejections, escalations) belong to no variant.
            pub fn variant(&self) -> Option<WorkflowVariant> {
                match self {
                    $(EventType::$name => $variant,)*
                }
            }

            /// Topic the event type is published on
            pub fn topic(&self) -> Topic {
                match self {
                    $(EventType::$name => Topic::$topic,)*
                }
            }
        }
    };
}

use WorkflowVariant::{Claims, Inspection, Registration, Verification};

event_types! {
    RegistrationSubmitted => "REGISTRATION_SUBMITTED", Some(Registration), Applications;
    RegistrationAewVerified => "REGISTRATION_AEW_VERIFIED", Some(Registration), Applications;
    RegistrationAewRejected => "REGISTRATION_AEW_REJECTED", Some(Registration), Applications;
    RegistrationMaVerified => "REGISTRATION_MA_VERIFIED", Some(Registration), Applications;
    RegistrationMaRejected => "REGISTRATION_MA_REJECTED", Some(Registration), Applications;
    RegistrationDaApproved => "REGISTRATION_DA_APPROVED", Some(Registration), Applications;
    RegistrationDaRejected => "REGISTRATION_DA_REJECTED", Some(Registration), Applications;
    RegistrationCancelledByUser => "REGISTRATION_CANCELLED_BY_USER", Some(Registration), Applications;

    ApplicationSubmitted => "APPLICATION_SUBMITTED", Some(Verification), Applications;
    ApplicationCancelledByUser => "APPLICATION_CANCELLED_BY_USER", Some(Verification), Applications;
    AewReviewStarted => "AEW_REVIEW_STARTED", Some(Verification), Verification;
    AewVerified => "AEW_VERIFIED", Some(Verification), Verification;
    AewRejected => "AEW_REJECTED", Some(Verification), Verification;
    AewCancelled => "AEW_CANCELLED", Some(Verification), Verification;
    MaReviewStarted => "MA_REVIEW_STARTED", Some(Verification), Verification;
    MaVerified => "MA_VERIFIED", Some(Verification), Verification;
    MaRejected => "MA_REJECTED", Some(Verification), Verification;
    MaCancelled => "MA_CANCELLED", Some(Verification), Verification;
    PcicReviewStarted => "PCIC_REVIEW_STARTED", Some(Verification), Pcic;
    PcicApproved => "PCIC_APPROVED", Some(Verification), Pcic;
    PcicRejected => "PCIC_REJECTED", Some(Verification), Pcic;
    DaApproved => "DA_APPROVED", Some(Verification), Pcic;
    DaRejected => "DA_REJECTED", Some(Verification), Pcic;
    PolicyIssued => "POLICY_ISSUED", Some(Verification), Pcic;

    InspectionScheduled => "INSPECTION_SCHEDULED", Some(Inspection), Pcic;
    InspectionCompleted => "INSPECTION_COMPLETED", Some(Inspection), Pcic;
    InspectionRejected => "INSPECTION_REJECTED", Some(Inspection), Pcic;
    InspectionCancelled => "INSPECTION_CANCELLED", Some(Inspection), Pcic;

    /// Staged when a policy is issued; opens the claims stage
    PolicyIssuedEvent => "PolicyIssuedEvent", Some(Claims), Pcic;
    ClaimFiled => "CLAIM_FILED", Some(Claims), Pcic;
    AdjusterReviewStarted => "ADJUSTER_REVIEW_STARTED", Some(Claims), Pcic;
    ClaimApproved => "CLAIM_APPROVED", Some(Claims), Pcic;
    ClaimRejected => "CLAIM_REJECTED", Some(Claims), Pcic;
    ClaimCancelledByUser => "CLAIM_CANCELLED_BY_USER", Some(Claims), Pcic;

    ReadyForMaReview => "ReadyForMAReview", None, Verification;
    ReadyForPcicReview => "ReadyForPCICReview", None, Pcic;
    ApplicationApproved => "ApplicationApproved", None, Notifications;
    ApplicationRejected => "ApplicationRejected", None, Notifications;
    RegistrationApproved => "RegistrationApproved", None, Notifications;
    ClaimApprovedEvent => "ClaimApprovedEvent", None, Notifications;
    InspectionCompletedEvent => "InspectionCompletedEvent", None, Notifications;
    /// Compensating event for a rejected transition
    TransitionRejected => "TransitionRejected", None, Notifications;
    /// Operational escalation (SLA breach, reorder overflow or timeout)
    EscalationRaised => "EscalationRaised", None, Notifications;
}

impl EventType {
    /// Parses a wire name; matching is exact
    pub fn parse(s: &str) -> Option<EventType> {
        EventType::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable envelope wrapping any domain event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Globally unique; re-emission with the same id is a duplicate
    pub event_id: EventId,
    pub event_type: String,
    pub schema_version: u16,
    pub occurred_at: DateTime<Utc>,
    pub application_id: ApplicationId,
    pub actor_id: ActorId,
    pub actor_role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// Per-application sequence number assigned by the producer
    pub version: u64,
    /// Event that caused this one, for consequence events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DomainEvent {
    /// Creates an event on behalf of the actor in `ctx`
    pub fn new(
        ctx: &ActorContext,
        event_type: impl Into<String>,
        version: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: EventId::new_v7(),
            event_type: event_type.into(),
            schema_version: SCHEMA_VERSION,
            occurred_at: Utc::now(),
            application_id: ctx.application_id,
            actor_id: ctx.actor_id,
            actor_role: ctx.role,
            tenant_id: ctx.tenant_id,
            version,
            causation_id: None,
            payload,
        }
    }

    /// Creates a consequence of `trigger`, emitted by the engine itself
    ///
    /// The consequence carries the trigger's version so downstream variants
    /// opened by it continue the same sequence.
    pub fn consequence(
        trigger: &DomainEvent,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Self {
        let ctx = ActorContext::system(trigger.application_id, trigger.tenant_id);
        let mut event = DomainEvent::new(&ctx, event_type.as_str(), trigger.version, payload);
        event.causation_id = Some(trigger.event_id);
        event
    }

    /// Sets the occurrence timestamp
    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// The known event type, or `None` for types foreign to this build
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    /// Bus partition key, the application id string
    pub fn partition_key(&self) -> String {
        self.application_id.partition_key()
    }

    /// Topic the event is published on; foreign types go to `applications`
    pub fn topic(&self) -> Topic {
        self.kind().map(|k| k.topic()).unwrap_or(Topic::Applications)
    }

    /// Serializes the envelope as self-describing JSON bytes
    pub fn encode(&self) -> Result<Vec<u8>, WorkflowError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes an envelope, rejecting malformed or newer-schema messages
    pub fn decode(bytes: &[u8]) -> Result<Self, WorkflowError> {
        let event: DomainEvent = serde_json::from_slice(bytes)?;
        if event.schema_version == 0 || event.schema_version > SCHEMA_VERSION {
            return Err(WorkflowError::UnsupportedSchema(event.schema_version));
        }
        if event.event_type.trim().is_empty() {
            return Err(WorkflowError::Malformed("empty event_type".to_string()));
        }
        Ok(event)
    }
}

/// Payload of every consequence event staged by a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsequencePayload {
    /// Actor of the entry event, the notification recipient
    pub applicant_id: ActorId,
    pub variant: WorkflowVariant,
    pub from_status: Option<Status>,
    pub to_status: Status,
    pub trigger_event_id: EventId,
}

/// Payload of a `TransitionRejected` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionPayload {
    /// Machine-readable reason (`illegal_transition`, `forbidden_actor`, `version_conflict`)
    pub reason: String,
    pub detail: String,
    pub rejected_event_id: EventId,
    pub rejected_event_type: String,
    pub actor_id: ActorId,
    pub actor_role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<Status>,
}

/// Payload of an `EscalationRaised` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPayload {
    /// `sla_breach`, `reorder_overflow` or `reorder_timeout`
    pub reason: String,
    pub variant: WorkflowVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stuck_since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_event_id: Option<EventId>,
    pub detail: String,
}
