//! Application projection
//!
//! A service's local view of one application in one workflow variant. It is
//! created by the variant's entry event, moved only by validated transitions,
//! and never deleted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{ActorId, ApplicationId, EventId, TenantId};
use crate::error::WorkflowError;
use crate::event::DomainEvent;
use crate::status::{Status, WorkflowVariant};
use crate::validator::Decision;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationProjection {
    pub application_id: ApplicationId,
    pub variant: WorkflowVariant,
    pub status: Status,
    /// Version of the last applied event; never decreases
    pub version: u64,
    pub last_event_id: EventId,
    /// Actor of the entry event
    pub applicant_id: ActorId,
    pub tenant_id: Option<TenantId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_escalated_at: Option<DateTime<Utc>>,
}

impl ApplicationProjection {
    /// Opens a projection from an entry event
    ///
    /// The projection starts at the event's version, which is not 1 for
    /// variants opened by another variant's consequence.
    pub fn open(event: &DomainEvent, decision: &Decision) -> Self {
        let applicant_id = if event.actor_role == core_kernel::Role::System {
            applicant_from_payload(event).unwrap_or(event.actor_id)
        } else {
            event.actor_id
        };

        Self {
            application_id: event.application_id,
            variant: decision.variant,
            status: decision.to,
            version: event.version,
            last_event_id: event.event_id,
            applicant_id,
            tenant_id: event.tenant_id,
            created_at: event.occurred_at,
            updated_at: event.occurred_at,
            last_escalated_at: None,
        }
    }

    /// Returns the projection after applying `event`
    ///
    /// The event must carry exactly the next version.
    pub fn advance(&self, event: &DomainEvent, decision: &Decision) -> Result<Self, WorkflowError> {
        if event.version != self.next_version() {
            return Err(WorkflowError::VersionGap {
                expected: self.next_version(),
                received: event.version,
            });
        }

        Ok(Self {
            status: decision.to,
            version: event.version,
            last_event_id: event.event_id,
            updated_at: event.occurred_at.max(self.updated_at),
            last_escalated_at: None,
            ..self.clone()
        })
    }

    pub fn next_version(&self) -> u64 {
        self.version + 1
    }

    pub fn key(&self) -> (ApplicationId, WorkflowVariant) {
        (self.application_id, self.variant)
    }

    /// How long the projection has been in its current status
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }

    /// True when no escalation was raised during the previous sweep tick
    ///
    /// Ticks are `interval` apart but fire with jitter, so the guard only asks
    /// for half an interval since the last escalation. Two checks inside one
    /// tick still escalate once; consecutive ticks always escalate.
    pub fn escalation_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_escalated_at {
            Some(at) => now - at >= interval / 2,
            None => true,
        }
    }
}

// A consequence opening a variant names the original applicant in its payload
fn applicant_from_payload(event: &DomainEvent) -> Option<ActorId> {
    event
        .payload
        .get("applicant_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ConsequencePayload, EventType};
    use crate::validator::TransitionValidator;
    use core_kernel::{ActorContext, Role};

    #[test]
    fn test_open_then_advance() {
        let validator = TransitionValidator::canonical().unwrap();
        let app = ApplicationId::new();
        let farmer = ActorContext::new(app, ActorId::new(), Role::Farmer);
        let aew = ActorContext::new(app, ActorId::new(), Role::Aew);

        let submitted = DomainEvent::new(&farmer, "APPLICATION_SUBMITTED", 1, serde_json::Value::Null);
        let open = validator.open(&submitted.event_type, submitted.actor_role).unwrap();
        let projection = ApplicationProjection::open(&submitted, &open);
        assert_eq!(projection.status, Status::Submitted);
        assert_eq!(projection.version, 1);
        assert_eq!(projection.applicant_id, farmer.actor_id);

        let verified = DomainEvent::new(&aew, "AEW_VERIFIED", 2, serde_json::Value::Null);
        let decision = validator
            .apply(projection.status, &verified.event_type, verified.actor_role)
            .unwrap();
        let next = projection.advance(&verified, &decision).unwrap();
        assert_eq!(next.status, Status::VerifiedByAew);
        assert_eq!(next.version, 2);
        assert_eq!(next.last_event_id, verified.event_id);
        assert_eq!(next.applicant_id, farmer.actor_id);
    }

    #[test]
    fn test_advance_rejects_gap() {
        let validator = TransitionValidator::canonical().unwrap();
        let app = ApplicationId::new();
        let farmer = ActorContext::new(app, ActorId::new(), Role::Farmer);
        let submitted = DomainEvent::new(&farmer, "APPLICATION_SUBMITTED", 1, serde_json::Value::Null);
        let projection = ApplicationProjection::open(
            &submitted,
            &validator.open("APPLICATION_SUBMITTED", Role::Farmer).unwrap(),
        );

        let aew = ActorContext::new(app, ActorId::new(), Role::Aew);
        let late = DomainEvent::new(&aew, "AEW_VERIFIED", 3, serde_json::Value::Null);
        let decision = validator.apply(Status::Submitted, "AEW_VERIFIED", Role::Aew).unwrap();

        assert!(matches!(
            projection.advance(&late, &decision),
            Err(WorkflowError::VersionGap { expected: 2, received: 3 })
        ));
    }

    #[test]
    fn test_claims_opened_by_consequence_keeps_applicant() {
        let validator = TransitionValidator::canonical().unwrap();
        let app = ApplicationId::new();
        let farmer_id = ActorId::new();
        let pcic = ActorContext::new(app, ActorId::new(), Role::Pcic);
        let issued = DomainEvent::new(&pcic, "POLICY_ISSUED", 7, serde_json::Value::Null);
        let payload = ConsequencePayload {
            applicant_id: farmer_id,
            variant: WorkflowVariant::Verification,
            from_status: Some(Status::ApprovedByPcic),
            to_status: Status::PolicyIssued,
            trigger_event_id: issued.event_id,
        };
        let consequence = DomainEvent::consequence(
            &issued,
            EventType::PolicyIssuedEvent,
            serde_json::to_value(&payload).unwrap(),
        );

        let decision = validator.open(&consequence.event_type, Role::System).unwrap();
        let projection = ApplicationProjection::open(&consequence, &decision);

        assert_eq!(projection.variant, WorkflowVariant::Claims);
        assert_eq!(projection.version, 7);
        assert_eq!(projection.applicant_id, farmer_id);
    }

    #[test]
    fn test_escalation_due() {
        let validator = TransitionValidator::canonical().unwrap();
        let ctx = ActorContext::new(ApplicationId::new(), ActorId::new(), Role::Pcic);
        let event = DomainEvent::new(&ctx, "INSPECTION_SCHEDULED", 1, serde_json::Value::Null);
        let mut projection = ApplicationProjection::open(
            &event,
            &validator.open("INSPECTION_SCHEDULED", Role::Pcic).unwrap(),
        );
        let now = Utc::now();
        assert!(projection.escalation_due(now, Duration::hours(1)));

        projection.last_escalated_at = Some(now);
        let hour = Duration::hours(1);
        assert!(!projection.escalation_due(now + Duration::minutes(20), hour));
        assert!(projection.escalation_due(now + hour, hour));
        // next tick fired a little earlier than the previous one
        assert!(projection.escalation_due(now + hour - Duration::milliseconds(4), hour));
    }
}
