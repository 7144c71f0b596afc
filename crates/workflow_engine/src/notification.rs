//! Notification fan-out
//!
//! Turns approval, rejection, policy and claim events into notices for the
//! applicant. Delivery content lives behind [`NotificationDelivery`]; this
//! module only decides who gets which notice, and makes sure one event id
//! produces at most one delivered notice.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use core_kernel::{ActorId, ApplicationId, EventId, Role};
use domain_workflow::{DomainEvent, EventType};

use crate::consumer::EventHandler;
use crate::error::EngineError;
use crate::ports::{DeliveryLedger, NotificationDelivery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    ApplicationApproved,
    ApplicationRejected,
    RegistrationApproved,
    PolicyIssued,
    ClaimApproved,
    InspectionCompleted,
}

impl NoticeKind {
    /// The notice an event type produces, if any
    pub fn from_event(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::ApplicationApproved => Some(NoticeKind::ApplicationApproved),
            EventType::ApplicationRejected => Some(NoticeKind::ApplicationRejected),
            EventType::RegistrationApproved => Some(NoticeKind::RegistrationApproved),
            EventType::PolicyIssuedEvent => Some(NoticeKind::PolicyIssued),
            EventType::ClaimApprovedEvent => Some(NoticeKind::ClaimApproved),
            EventType::InspectionCompletedEvent => Some(NoticeKind::InspectionCompleted),
            _ => None,
        }
    }

    pub fn template(&self) -> &'static str {
        match self {
            NoticeKind::ApplicationApproved => "email/verification-approved",
            NoticeKind::ApplicationRejected => "email/verification-rejected",
            NoticeKind::RegistrationApproved => "email/registration-approved",
            NoticeKind::PolicyIssued => "email/policy-issued",
            NoticeKind::ClaimApproved => "email/claim-approved",
            NoticeKind::InspectionCompleted => "email/inspection-completed",
        }
    }

    /// Subject line; policy notices include the policy number when known
    pub fn subject(&self, payload: &serde_json::Value) -> String {
        match self {
            NoticeKind::ApplicationApproved => "Verification Approved".to_string(),
            NoticeKind::ApplicationRejected => "Verification Rejected".to_string(),
            NoticeKind::RegistrationApproved => "Registration Approved".to_string(),
            NoticeKind::PolicyIssued => match payload.get("policy_number").and_then(|v| v.as_str()) {
                Some(number) => format!("Policy Issued: #{number}"),
                None => "Policy Issued".to_string(),
            },
            NoticeKind::ClaimApproved => "Claim Approved".to_string(),
            NoticeKind::InspectionCompleted => "Inspection Completed".to_string(),
        }
    }
}

/// A user-facing notice handed to the delivery collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub event_id: EventId,
    pub application_id: ApplicationId,
    pub recipient: ActorId,
    pub kind: NoticeKind,
    pub subject: String,
    pub template: &'static str,
    pub payload: serde_json::Value,
}

impl Notice {
    /// Builds the notice for `event`, or `None` when it is not of interest
    /// or names no recipient
    ///
    /// The recipient is the payload's `applicant_id`, else the event's actor
    /// unless that actor is the system.
    pub fn for_event(event: &DomainEvent) -> Option<Self> {
        let kind = NoticeKind::from_event(event.kind()?)?;
        let recipient = event
            .payload
            .get("applicant_id")
            .cloned()
            .and_then(|v| serde_json::from_value::<ActorId>(v).ok())
            .or_else(|| (event.actor_role != Role::System).then_some(event.actor_id))?;

        Some(Self {
            event_id: event.event_id,
            application_id: event.application_id,
            recipient,
            kind,
            subject: kind.subject(&event.payload),
            template: kind.template(),
            payload: event.payload.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutOutcome {
    Delivered,
    /// Already delivered for this event id
    Duplicate,
    /// Not a notice-worthy event
    Skipped,
}

pub struct NotificationFanout {
    delivery: Arc<dyn NotificationDelivery>,
    ledger: Arc<dyn DeliveryLedger>,
}

impl NotificationFanout {
    pub fn new(delivery: Arc<dyn NotificationDelivery>, ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self { delivery, ledger }
    }

    pub async fn on_workflow_event(&self, event: &DomainEvent) -> Result<FanoutOutcome, EngineError> {
        let Some(notice) = Notice::for_event(event) else {
            if event.kind().and_then(NoticeKind::from_event).is_some() {
                tracing::warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Notice-worthy system event carries no applicant, skipped"
                );
            }
            return Ok(FanoutOutcome::Skipped);
        };

        if !self.ledger.claim(notice.event_id, notice.recipient).await? {
            tracing::debug!(event_id = %notice.event_id, "Notice already delivered");
            return Ok(FanoutOutcome::Duplicate);
        }

        if let Err(err) = self.delivery.deliver(&notice).await {
            tracing::warn!(
                event_id = %notice.event_id,
                application_id = %notice.application_id,
                kind = ?notice.kind,
                error = %err,
                "Notice delivery failed, releasing claim"
            );
            self.ledger.release(notice.event_id).await?;
            return Err(err.into());
        }

        tracing::info!(
            event_id = %notice.event_id,
            application_id = %notice.application_id,
            recipient = %notice.recipient,
            kind = ?notice.kind,
            subject = %notice.subject,
            "Notice delivered"
        );
        Ok(FanoutOutcome::Delivered)
    }
}

#[async_trait]
impl EventHandler for NotificationFanout {
    fn name(&self) -> &str {
        "notification-fanout"
    }

    async fn handle_event(&self, event: DomainEvent) -> Result<(), EngineError> {
        self.on_workflow_event(&event).await.map(|_| ())
    }
}
