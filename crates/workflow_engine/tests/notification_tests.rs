//! Notification fan-out idempotency

use std::sync::Arc;

use serde_json::json;

use core_kernel::{ActorId, ApplicationId, Role};
use domain_workflow::{DomainEvent, EventType};
use test_utils::EventBuilder;
use workflow_engine::adapters::memory::{InMemoryDeliveryLedger, RecordingNotifier};
use workflow_engine::{FanoutOutcome, NoticeKind, NotificationFanout};

fn fanout() -> (NotificationFanout, Arc<RecordingNotifier>) {
    let notifier = RecordingNotifier::shared();
    let fanout = NotificationFanout::new(notifier.clone(), Arc::new(InMemoryDeliveryLedger::new()));
    (fanout, notifier)
}

fn consequence(kind: EventType, applicant: ActorId) -> DomainEvent {
    let trigger = EventBuilder::new(ApplicationId::new(), "PCIC_APPROVED")
        .by(Role::Pcic)
        .version(4)
        .build();
    DomainEvent::consequence(&trigger, kind, json!({ "applicant_id": applicant }))
}

#[tokio::test]
async fn test_same_event_notifies_once() {
    let (fanout, notifier) = fanout();
    let applicant = ActorId::new();
    let approved = consequence(EventType::ApplicationApproved, applicant);

    assert_eq!(fanout.on_workflow_event(&approved).await.unwrap(), FanoutOutcome::Delivered);
    assert_eq!(fanout.on_workflow_event(&approved).await.unwrap(), FanoutOutcome::Duplicate);

    let notices = notifier.notices().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::ApplicationApproved);
    assert_eq!(notices[0].recipient, applicant);
    assert_eq!(notices[0].subject, "Verification Approved");
}

#[tokio::test]
async fn test_failed_delivery_can_be_retried() {
    let (fanout, notifier) = fanout();
    let rejected = consequence(EventType::ApplicationRejected, ActorId::new());
    notifier.fail_next(1).await;

    let err = fanout.on_workflow_event(&rejected).await.unwrap_err();
    assert!(err.is_transient());
    assert!(notifier.notices().await.is_empty());

    assert_eq!(fanout.on_workflow_event(&rejected).await.unwrap(), FanoutOutcome::Delivered);
    assert_eq!(notifier.notices().await.len(), 1);
}

#[tokio::test]
async fn test_workflow_steps_are_skipped() {
    let (fanout, notifier) = fanout();
    let step = EventBuilder::new(ApplicationId::new(), "AEW_VERIFIED").by(Role::Aew).build();
    let escalation = consequence(EventType::EscalationRaised, ActorId::new());

    assert_eq!(fanout.on_workflow_event(&step).await.unwrap(), FanoutOutcome::Skipped);
    assert_eq!(fanout.on_workflow_event(&escalation).await.unwrap(), FanoutOutcome::Skipped);
    assert!(notifier.notices().await.is_empty());
}

#[tokio::test]
async fn test_each_notice_kind_has_its_template() {
    let (fanout, notifier) = fanout();
    let kinds = [
        EventType::RegistrationApproved,
        EventType::ClaimApprovedEvent,
        EventType::InspectionCompletedEvent,
    ];
    for kind in kinds {
        fanout
            .on_workflow_event(&consequence(kind, ActorId::new()))
            .await
            .unwrap();
    }

    let templates: Vec<&str> = notifier.notices().await.iter().map(|n| n.template).collect();
    assert_eq!(
        templates,
        vec!["email/registration-approved", "email/claim-approved", "email/inspection-completed"]
    );
}
