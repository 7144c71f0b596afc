//! SLA sweeper

mod common;

use chrono::Duration;

use core_kernel::Role;
use domain_workflow::{EscalationPayload, EventType, Status, WorkflowVariant};
use test_utils::{EventBuilder, EventSequence, TemporalFixtures};
use workflow_engine::{SlaConfig, SlaSweeper, SlaWindow, SweepReport};

use common::Harness;

fn sla(windows: Vec<SlaWindow>) -> SlaConfig {
    SlaConfig {
        sweep_interval_secs: 3600,
        windows,
    }
}

/// Application submitted and moved to PROCESSING_BY_MA at the reference time
async fn stuck_in_ma_review(h: &Harness) -> EventSequence {
    let seq = EventSequence::fresh();
    let app = seq.application_id();
    let at = TemporalFixtures::base_time();
    let steps = [
        ("APPLICATION_SUBMITTED", Role::Farmer),
        ("AEW_VERIFIED", Role::Aew),
        ("MA_REVIEW_STARTED", Role::Ma),
    ];
    for (version, (event_type, role)) in steps.into_iter().enumerate() {
        let mut builder = EventBuilder::new(app, event_type)
            .by(role)
            .version(version as u64 + 1)
            .at(at);
        if role == Role::Farmer {
            builder = builder.actor(seq.applicant());
        }
        h.feed(&[builder.build()]).await;
    }
    seq
}

fn escalations(staged: &[domain_workflow::DomainEvent]) -> Vec<EscalationPayload> {
    staged
        .iter()
        .filter(|e| e.event_type == EventType::EscalationRaised.as_str())
        .map(|e| serde_json::from_value(e.payload.clone()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_one_escalation_per_interval() {
    let h = Harness::new();
    let seq = stuck_in_ma_review(&h).await;
    let sweeper = SlaSweeper::new(
        h.store.clone(),
        h.orchestrator.clone(),
        sla(vec![SlaWindow::new(Status::ProcessingByMa, Duration::hours(72))]),
    );

    let before_window = sweeper.sweep(TemporalFixtures::hours_later(71)).await.unwrap();
    assert_eq!(before_window, SweepReport::default());

    let first = TemporalFixtures::hours_later(73);
    assert_eq!(sweeper.sweep(first).await.unwrap().escalated, 1);
    let again = sweeper.sweep(first + Duration::minutes(10)).await.unwrap();
    assert_eq!((again.escalated, again.skipped), (0, 1));
    let next_interval = sweeper.sweep(first + Duration::minutes(61)).await.unwrap();
    assert_eq!(next_interval.escalated, 1);

    let raised = escalations(&h.staged().await);
    assert_eq!(raised.len(), 2);
    assert_eq!(raised[0].reason, "sla_breach");
    assert_eq!(raised[0].status, Some(Status::ProcessingByMa));
    assert_eq!(raised[0].stuck_since, Some(TemporalFixtures::base_time()));

    let projection = h.projection(seq.application_id(), WorkflowVariant::Verification).await;
    assert_eq!(projection.version, 3);
    assert_eq!(projection.last_escalated_at, Some(first + Duration::minutes(61)));
}

#[tokio::test]
async fn test_tick_jitter_does_not_skip_an_interval() {
    let h = Harness::new();
    stuck_in_ma_review(&h).await;
    let sweeper = SlaSweeper::new(
        h.store.clone(),
        h.orchestrator.clone(),
        sla(vec![SlaWindow::new(Status::ProcessingByMa, Duration::hours(72))]),
    );

    let tick = TemporalFixtures::hours_later(73);
    let sweeps = [
        tick + Duration::milliseconds(5),
        tick + Duration::hours(1) + Duration::milliseconds(1),
        tick + Duration::hours(2) + Duration::milliseconds(3),
    ];
    for at in sweeps {
        let report = sweeper.sweep(at).await.unwrap();
        assert_eq!((report.escalated, report.skipped), (1, 0), "sweep at {at}");
    }

    assert_eq!(escalations(&h.staged().await).len(), 3);
}

#[tokio::test]
async fn test_progress_resets_the_escalation_guard() {
    let h = Harness::new();
    let seq = stuck_in_ma_review(&h).await;
    let sweeper = SlaSweeper::new(
        h.store.clone(),
        h.orchestrator.clone(),
        sla(vec![SlaWindow::new(Status::ProcessingByMa, Duration::hours(72))]),
    );
    assert_eq!(sweeper.sweep(TemporalFixtures::hours_later(73)).await.unwrap().escalated, 1);

    let verified = EventBuilder::new(seq.application_id(), "MA_VERIFIED")
        .by(Role::Ma)
        .version(4)
        .at(TemporalFixtures::hours_later(74))
        .build();
    h.feed(&[verified]).await;

    let projection = h.projection(seq.application_id(), WorkflowVariant::Verification).await;
    assert_eq!(projection.status, Status::VerifiedByMa);
    assert_eq!(projection.last_escalated_at, None);
    assert_eq!(sweeper.sweep(TemporalFixtures::hours_later(75)).await.unwrap().escalated, 0);
}

#[tokio::test]
async fn test_terminal_statuses_are_never_escalated() {
    let h = Harness::new();
    let seq = EventSequence::fresh();
    let at = TemporalFixtures::base_time();
    let submitted = EventBuilder::new(seq.application_id(), "APPLICATION_SUBMITTED")
        .actor(seq.applicant())
        .at(at)
        .build();
    let rejected = EventBuilder::new(seq.application_id(), "AEW_REJECTED")
        .by(Role::Aew)
        .version(2)
        .at(at)
        .build();
    h.feed(&[submitted, rejected]).await;

    let sweeper = SlaSweeper::new(
        h.store.clone(),
        h.orchestrator.clone(),
        sla(vec![SlaWindow::new(Status::RejectedByAew, Duration::hours(1))]),
    );
    let report = sweeper.sweep(TemporalFixtures::hours_later(500)).await.unwrap();

    assert_eq!(report.escalated, 0);
    assert!(escalations(&h.staged().await).is_empty());
}

#[tokio::test]
async fn test_sweep_expires_reorder_buffer() {
    let h = Harness::new();
    let mut seq = EventSequence::fresh();
    h.feed(&[seq.next("APPLICATION_SUBMITTED", Role::Farmer)]).await;
    let _gap = seq.next("AEW_VERIFIED", Role::Aew);
    h.feed(&[seq.next("MA_VERIFIED", Role::Ma)]).await;

    let sweeper = SlaSweeper::new(h.store.clone(), h.orchestrator.clone(), SlaConfig::default());
    let report = sweeper
        .sweep(chrono::Utc::now() + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(report.expired, 1);
    let raised = escalations(&h.staged().await);
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].reason, "reorder_timeout");
}
