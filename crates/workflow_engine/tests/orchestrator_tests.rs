//! Orchestrator behaviour over the in-memory store

mod common;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use serde_json::json;

use core_kernel::{ApplicationId, Role};
use domain_workflow::{ConsequencePayload, EscalationPayload, EventType, Status, WorkflowVariant};
use test_utils::{
    assert_event_types, assert_none_of_type, assert_projection, assert_rejection,
    assert_single_of_type, permutation_strategy, ActorFixtures, EventBuilder, EventSequence,
};
use workflow_engine::{
    Command, DeadLetterSource, EngineError, OrchestratorOutcome, ProjectionStore, ReorderConfig,
};

use common::Harness;

// ============================================================================
// Transitions and consequences
// ============================================================================

mod transitions {
    use super::*;

    #[tokio::test]
    async fn test_aew_verification_stages_one_ready_for_ma_review() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        let submitted = seq.next("APPLICATION_SUBMITTED", Role::Farmer);
        let verified = seq.next("AEW_VERIFIED", Role::Aew);

        h.feed(&[submitted]).await;
        let outcome = h.orchestrator.handle(verified.clone()).await.unwrap();

        assert_eq!(
            outcome,
            OrchestratorOutcome::Applied {
                variant: WorkflowVariant::Verification,
                from: Some(Status::Submitted),
                to: Status::VerifiedByAew,
                version: 2,
                staged: vec![EventType::ReadyForMaReview],
                released: 0,
            }
        );
        let app = seq.application_id();
        assert_projection(&h.projection(app, WorkflowVariant::Verification).await, Status::VerifiedByAew, 2);

        let staged = h.staged().await;
        let ready = assert_single_of_type(&staged, EventType::ReadyForMaReview);
        assert_eq!(ready.causation_id, Some(verified.event_id));
        assert_eq!(ready.version, 2);
        assert_eq!(ready.actor_role, Role::System);

        let payload: ConsequencePayload = serde_json::from_value(ready.payload.clone()).unwrap();
        assert_eq!(payload.applicant_id, seq.applicant());
        assert_eq!(payload.from_status, Some(Status::Submitted));
        assert_eq!(payload.to_status, Status::VerifiedByAew);
    }

    #[tokio::test]
    async fn test_redelivered_event_is_a_noop() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        let submitted = seq.next("APPLICATION_SUBMITTED", Role::Farmer);
        let verified = seq.next("AEW_VERIFIED", Role::Aew);
        h.feed(&[submitted, verified.clone()]).await;
        let staged_before = h.staged().await.len();

        let outcome = h.orchestrator.handle(verified).await.unwrap();

        assert_eq!(outcome, OrchestratorOutcome::NoOp);
        assert_eq!(h.staged().await.len(), staged_before);
        assert_projection(
            &h.projection(seq.application_id(), WorkflowVariant::Verification).await,
            Status::VerifiedByAew,
            2,
        );
    }

    #[tokio::test]
    async fn test_event_after_pcic_rejection_is_illegal() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        h.feed(&[
            seq.next("APPLICATION_SUBMITTED", Role::Farmer),
            seq.next("AEW_VERIFIED", Role::Aew),
            seq.next("MA_VERIFIED", Role::Ma),
            seq.next("PCIC_REJECTED", Role::Pcic),
        ])
        .await;
        let app = seq.application_id();
        assert_projection(&h.projection(app, WorkflowVariant::Verification).await, Status::RejectedByPcic, 4);

        let late = seq.next("AEW_VERIFIED", Role::Aew);
        let outcome = h.orchestrator.handle(late.clone()).await.unwrap();

        assert_eq!(
            outcome,
            OrchestratorOutcome::Rejected {
                reason: "illegal_transition".to_string()
            }
        );
        assert_projection(&h.projection(app, WorkflowVariant::Verification).await, Status::RejectedByPcic, 4);

        let staged = h.staged().await;
        let rejection = assert_rejection(
            assert_single_of_type(&staged, EventType::TransitionRejected),
            "illegal_transition",
        );
        assert_eq!(rejection.rejected_event_id, late.event_id);
        assert_eq!(rejection.current_status, Some(Status::RejectedByPcic));
        assert!(h.store.is_processed(late.event_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancellation_after_terminal_is_rejected() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        h.feed(&seq.verification_path()).await;

        let cancel = seq.next("APPLICATION_CANCELLED_BY_USER", Role::Farmer);
        let outcome = h.orchestrator.handle(cancel).await.unwrap();

        assert_eq!(outcome.label(), "rejected");
        assert_projection(
            &h.projection(seq.application_id(), WorkflowVariant::Verification).await,
            Status::PolicyIssued,
            5,
        );
    }

    #[tokio::test]
    async fn test_forbidden_actor_does_not_consume_the_version() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        h.feed(&[seq.next("APPLICATION_SUBMITTED", Role::Farmer)]).await;
        let app = seq.application_id();

        let by_farmer = EventBuilder::new(app, "AEW_VERIFIED").by(Role::Farmer).version(2).build();
        let outcome = h.orchestrator.handle(by_farmer).await.unwrap();
        assert_eq!(
            outcome,
            OrchestratorOutcome::Rejected {
                reason: "forbidden_actor".to_string()
            }
        );

        let by_aew = EventBuilder::new(app, "AEW_VERIFIED").by(Role::Aew).version(2).build();
        let outcome = h.orchestrator.handle(by_aew).await.unwrap();
        assert_eq!(outcome.label(), "applied");
        assert_projection(&h.projection(app, WorkflowVariant::Verification).await, Status::VerifiedByAew, 2);
    }

    #[tokio::test]
    async fn test_competing_event_at_same_version_is_a_conflict() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        h.feed(&[seq.next("APPLICATION_SUBMITTED", Role::Farmer)]).await;
        let app = seq.application_id();

        let verified = EventBuilder::new(app, "AEW_VERIFIED").by(Role::Aew).version(2).build();
        let cancelled = EventBuilder::new(app, "APPLICATION_CANCELLED_BY_USER")
            .actor(seq.applicant())
            .version(2)
            .build();

        h.feed(&[verified]).await;
        let outcome = h.orchestrator.handle(cancelled).await.unwrap();

        assert_eq!(
            outcome,
            OrchestratorOutcome::Rejected {
                reason: "version_conflict".to_string()
            }
        );
        assert_projection(&h.projection(app, WorkflowVariant::Verification).await, Status::VerifiedByAew, 2);
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_ignored() {
        let h = Harness::new();
        let event = EventBuilder::new(ApplicationId::new(), "SOIL_SAMPLE_TAKEN").build();

        let outcome = h.orchestrator.handle(event.clone()).await.unwrap();

        assert_eq!(outcome, OrchestratorOutcome::Ignored);
        assert!(h.staged().await.is_empty());
        assert!(!h.store.is_processed(event.event_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unprojected_variant_is_ignored() {
        let h = Harness::with([WorkflowVariant::Registration], ReorderConfig::default());
        let mut seq = EventSequence::fresh();

        let outcome = h
            .orchestrator
            .handle(seq.next("APPLICATION_SUBMITTED", Role::Farmer))
            .await
            .unwrap();

        assert_eq!(outcome, OrchestratorOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_nothing_behind() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        let submitted = seq.next("APPLICATION_SUBMITTED", Role::Farmer);
        h.store.fail_next_commits(1).await;

        let err = h.orchestrator.handle(submitted.clone()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(h.staged().await.is_empty());
        assert!(!h.store.is_processed(submitted.event_id).await.unwrap());

        let outcome = h.orchestrator.handle(submitted).await.unwrap();
        assert_eq!(outcome.label(), "applied");
    }
}

// ============================================================================
// Stage hand-over
// ============================================================================

mod stages {
    use super::*;

    #[tokio::test]
    async fn test_policy_issued_opens_claims_at_trigger_version() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        h.feed(&seq.verification_path()).await;
        let app = seq.application_id();

        let staged = h.staged().await;
        let issued = assert_single_of_type(&staged, EventType::PolicyIssuedEvent).clone();
        assert_eq!(issued.payload["policy_number"], json!("PCIC-2024-000123"));

        let outcome = h.orchestrator.handle(issued).await.unwrap();
        assert_eq!(outcome.label(), "applied");

        let claims = h.projection(app, WorkflowVariant::Claims).await;
        assert_projection(&claims, Status::PolicyIssued, 5);
        assert_eq!(claims.applicant_id, seq.applicant());

        let mut farmer = ActorFixtures::farmer(app);
        farmer.actor_id = seq.applicant();
        let filed = h
            .orchestrator
            .submit(&farmer, Command::new("CLAIM_FILED", json!({ "damage": "typhoon" })))
            .await
            .unwrap();
        assert_eq!(filed.label(), "applied");
        assert_projection(&h.projection(app, WorkflowVariant::Claims).await, Status::ClaimFiled, 6);
    }

    #[tokio::test]
    async fn test_claim_approval_stages_notice_event() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        h.feed(&seq.verification_path()).await;
        let issued = assert_single_of_type(&h.staged().await, EventType::PolicyIssuedEvent).clone();
        h.feed(&[issued]).await;

        let mut claims = EventSequence::new(seq.application_id()).resume_at(5);
        h.feed(&[
            claims.next("CLAIM_FILED", Role::Farmer),
            claims.next("ADJUSTER_REVIEW_STARTED", Role::Pcic),
            claims.next("CLAIM_APPROVED", Role::Pcic),
        ])
        .await;

        let projection = h.projection(seq.application_id(), WorkflowVariant::Claims).await;
        assert_projection(&projection, Status::ClaimApproved, 8);
        assert_single_of_type(&h.staged().await, EventType::ClaimApprovedEvent);
    }
}

// ============================================================================
// Commands
// ============================================================================

mod commands {
    use super::*;

    #[tokio::test]
    async fn test_entry_command_stages_own_event_first() {
        let h = Harness::new();
        let app = ApplicationId::new();
        let farmer = ActorFixtures::farmer(app);

        let outcome = h
            .orchestrator
            .submit(&farmer, Command::new("REGISTRATION_SUBMITTED", json!({ "rsbsa": "01-23" })))
            .await
            .unwrap();
        assert_eq!(outcome.label(), "applied");

        let aew = ActorFixtures::aew(app);
        h.orchestrator
            .submit(&aew, Command::new("REGISTRATION_AEW_VERIFIED", json!({})))
            .await
            .unwrap();

        assert_event_types(
            &h.staged().await,
            &["REGISTRATION_SUBMITTED", "REGISTRATION_AEW_VERIFIED"],
        );
        let projection = h.projection(app, WorkflowVariant::Registration).await;
        assert_projection(&projection, Status::VerifiedByAew, 2);
        assert_eq!(projection.applicant_id, farmer.actor_id);
    }

    #[tokio::test]
    async fn test_command_with_consequence_stages_both_in_order() {
        let h = Harness::new();
        let app = ApplicationId::new();
        h.orchestrator
            .submit(&ActorFixtures::farmer(app), Command::new("APPLICATION_SUBMITTED", json!({})))
            .await
            .unwrap();
        h.orchestrator
            .submit(&ActorFixtures::aew(app), Command::new("AEW_VERIFIED", json!({})))
            .await
            .unwrap();

        assert_event_types(
            &h.staged().await,
            &["APPLICATION_SUBMITTED", "AEW_VERIFIED", "ReadyForMAReview"],
        );
    }

    #[tokio::test]
    async fn test_non_entry_command_without_projection_is_not_found() {
        let h = Harness::new();
        let err = h
            .orchestrator
            .submit(&ActorFixtures::aew(ApplicationId::new()), Command::new("AEW_VERIFIED", json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ProjectionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_command_for_unprojected_variant_fails() {
        let h = Harness::with([WorkflowVariant::Verification], ReorderConfig::default());
        let err = h
            .orchestrator
            .submit(
                &ActorFixtures::farmer(ApplicationId::new()),
                Command::new("REGISTRATION_SUBMITTED", json!({})),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::VariantNotProjected(WorkflowVariant::Registration)));
    }

    #[tokio::test]
    async fn test_refused_command_stages_only_rejection() {
        let h = Harness::new();
        let app = ApplicationId::new();
        h.orchestrator
            .submit(&ActorFixtures::farmer(app), Command::new("APPLICATION_SUBMITTED", json!({})))
            .await
            .unwrap();

        let outcome = h
            .orchestrator
            .submit(&ActorFixtures::ma(app), Command::new("PCIC_APPROVED", json!({})))
            .await
            .unwrap();

        assert_eq!(outcome.label(), "rejected");
        assert_event_types(&h.staged().await, &["APPLICATION_SUBMITTED", "TransitionRejected"]);
    }
}

// ============================================================================
// Reordering
// ============================================================================

mod reordering {
    use super::*;

    #[tokio::test]
    async fn test_successor_waits_for_predecessor() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        let e1 = seq.next("APPLICATION_SUBMITTED", Role::Farmer);
        let e2 = seq.next("AEW_VERIFIED", Role::Aew);

        let outcome = h.orchestrator.handle(e2).await.unwrap();
        assert_eq!(
            outcome,
            OrchestratorOutcome::Buffered {
                version: 2,
                waiting_for: None
            }
        );
        assert_eq!(h.orchestrator.buffered().await, 1);

        let outcome = h.orchestrator.handle(e1).await.unwrap();
        match outcome {
            OrchestratorOutcome::Applied { released, .. } => assert_eq!(released, 1),
            other => panic!("expected applied, got {other:?}"),
        }
        assert_eq!(h.orchestrator.buffered().await, 0);
        assert_projection(
            &h.projection(seq.application_id(), WorkflowVariant::Verification).await,
            Status::VerifiedByAew,
            2,
        );
    }

    #[tokio::test]
    async fn test_overflow_dead_letters_and_escalates() {
        let reorder = ReorderConfig {
            max_per_application: 1,
            max_total: 10,
            ttl_secs: 60,
        };
        let h = Harness::with(WorkflowVariant::ALL, reorder);
        let mut seq = EventSequence::fresh();
        h.feed(&[seq.next("APPLICATION_SUBMITTED", Role::Farmer)]).await;
        let _missing = seq.next("AEW_VERIFIED", Role::Aew);
        let e3 = seq.next("MA_REVIEW_STARTED", Role::Ma);
        let e4 = seq.next("MA_VERIFIED", Role::Ma);

        assert_eq!(h.orchestrator.handle(e3).await.unwrap().label(), "buffered");
        let outcome = h.orchestrator.handle(e4.clone()).await.unwrap();

        assert_eq!(
            outcome,
            OrchestratorOutcome::Escalated {
                reason: "reorder_overflow".to_string()
            }
        );
        let letters = h.dead_letters.letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].source, DeadLetterSource::ReorderBuffer);
        assert_eq!(letters[0].event_id, Some(e4.event_id));

        let staged = h.staged().await;
        let escalation = assert_single_of_type(&staged, EventType::EscalationRaised);
        let payload: EscalationPayload = serde_json::from_value(escalation.payload.clone()).unwrap();
        assert_eq!(payload.reason, "reorder_overflow");
        assert_eq!(payload.status, Some(Status::Submitted));
        assert!(!h.store.is_processed(e4.event_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entries_escalate() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        h.feed(&[seq.next("APPLICATION_SUBMITTED", Role::Farmer)]).await;
        let _missing = seq.next("AEW_VERIFIED", Role::Aew);
        h.feed(&[seq.next("MA_VERIFIED", Role::Ma)]).await;

        assert_eq!(h.orchestrator.expire_buffered(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + Duration::seconds(ReorderConfig::default().ttl_secs as i64 + 1);
        assert_eq!(h.orchestrator.expire_buffered(later).await.unwrap(), 1);

        let staged = h.staged().await;
        let escalation = assert_single_of_type(&staged, EventType::EscalationRaised);
        let payload: EscalationPayload = serde_json::from_value(escalation.payload.clone()).unwrap();
        assert_eq!(payload.reason, "reorder_timeout");
        assert_eq!(h.orchestrator.buffered().await, 0);
    }

    #[tokio::test]
    async fn test_failed_expiry_keeps_event_for_next_sweep() {
        let h = Harness::new();
        for _ in 0..2 {
            let mut seq = EventSequence::fresh();
            h.feed(&[seq.next("APPLICATION_SUBMITTED", Role::Farmer)]).await;
            let _missing = seq.next("AEW_VERIFIED", Role::Aew);
            h.feed(&[seq.next("MA_VERIFIED", Role::Ma)]).await;
        }
        assert_eq!(h.orchestrator.buffered().await, 2);

        let later = Utc::now() + Duration::seconds(ReorderConfig::default().ttl_secs as i64 + 1);
        h.store.fail_next_commits(1).await;
        let err = h.orchestrator.expire_buffered(later).await.unwrap_err();
        assert!(err.is_transient());

        // one escalated, the other went back into the buffer untouched
        assert_eq!(h.orchestrator.buffered().await, 1);
        assert_eq!(h.dead_letters.letters().await.len(), 1);
        let escalations = h
            .staged()
            .await
            .into_iter()
            .filter(|e| e.event_type == EventType::EscalationRaised.as_str())
            .count();
        assert_eq!(escalations, 1);

        assert_eq!(h.orchestrator.expire_buffered(later).await.unwrap(), 1);
        assert_eq!(h.orchestrator.buffered().await, 0);
        assert_eq!(h.dead_letters.letters().await.len(), 2);
    }

    #[tokio::test]
    async fn test_overflow_escalation_commit_failure_writes_no_dead_letter() {
        let reorder = ReorderConfig {
            max_per_application: 1,
            max_total: 10,
            ttl_secs: 60,
        };
        let h = Harness::with(WorkflowVariant::ALL, reorder);
        let mut seq = EventSequence::fresh();
        h.feed(&[seq.next("APPLICATION_SUBMITTED", Role::Farmer)]).await;
        let _missing = seq.next("AEW_VERIFIED", Role::Aew);
        h.feed(&[seq.next("MA_REVIEW_STARTED", Role::Ma)]).await;
        let overflowing = seq.next("MA_VERIFIED", Role::Ma);

        h.store.fail_next_commits(1).await;
        assert!(h.orchestrator.handle(overflowing.clone()).await.is_err());
        assert!(h.dead_letters.letters().await.is_empty());
        assert_none_of_type(&h.staged().await, EventType::EscalationRaised);

        // redelivery escalates and dead-letters together
        assert_eq!(h.orchestrator.handle(overflowing).await.unwrap().label(), "escalated");
        assert_eq!(h.dead_letters.letters().await.len(), 1);
        assert_single_of_type(&h.staged().await, EventType::EscalationRaised);
    }

    #[tokio::test]
    async fn test_conflicting_held_event_is_rejected() {
        let h = Harness::new();
        let mut seq = EventSequence::fresh();
        h.feed(&[seq.next("APPLICATION_SUBMITTED", Role::Farmer)]).await;
        let app = seq.application_id();

        let first = EventBuilder::new(app, "MA_VERIFIED").by(Role::Ma).version(3).build();
        let second = EventBuilder::new(app, "MA_REJECTED").by(Role::Ma).version(3).build();
        h.feed(&[first]).await;
        let outcome = h.orchestrator.handle(second).await.unwrap();

        assert_eq!(
            outcome,
            OrchestratorOutcome::Rejected {
                reason: "version_conflict".to_string()
            }
        );
        assert_none_of_type(&h.staged().await, EventType::EscalationRaised);
    }
}

// ============================================================================
// Properties
// ============================================================================

mod properties {
    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any arrival order of one application's events ends in the in-order state
        #[test]
        fn prop_arrival_order_does_not_matter(perm in permutation_strategy(5)) {
            runtime().block_on(async {
                let mut seq = EventSequence::fresh();
                let events = seq.verification_path();

                let in_order = Harness::new();
                in_order.feed(&events).await;

                let shuffled = Harness::new();
                let permuted: Vec<_> = perm.iter().map(|i| events[*i].clone()).collect();
                shuffled.feed(&permuted).await;

                let app = seq.application_id();
                let expected = in_order.projection(app, WorkflowVariant::Verification).await;
                let actual = shuffled.projection(app, WorkflowVariant::Verification).await;
                assert_eq!((actual.status, actual.version), (expected.status, expected.version));
                assert_eq!(
                    test_utils::event_types(&shuffled.staged().await),
                    test_utils::event_types(&in_order.staged().await)
                );
                assert_eq!(shuffled.orchestrator.buffered().await, 0);
            });
        }

        /// Redelivering any subset of events changes nothing
        #[test]
        fn prop_redelivery_is_idempotent(redeliver in proptest::collection::vec(0usize..5, 1..10)) {
            runtime().block_on(async {
                let mut seq = EventSequence::fresh();
                let events = seq.verification_path();
                let h = Harness::new();
                h.feed(&events).await;
                let staged = h.staged().await.len();
                let processed = h.store.processed_count().await;

                for i in redeliver {
                    let outcome = h.orchestrator.handle(events[i].clone()).await.unwrap();
                    assert_eq!(outcome, OrchestratorOutcome::NoOp);
                }

                assert_eq!(h.staged().await.len(), staged);
                assert_eq!(h.store.processed_count().await, processed);
                assert_projection(
                    &h.projection(seq.application_id(), WorkflowVariant::Verification).await,
                    Status::PolicyIssued,
                    5,
                );
            });
        }
    }
}
