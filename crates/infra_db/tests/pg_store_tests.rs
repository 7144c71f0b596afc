//! PostgreSQL adapter tests
//!
//! Each test starts its own container, so they need Docker:
//! `cargo test -p infra_db -- --ignored`

use std::sync::Arc;

use chrono::Duration;
use core_kernel::{ActorId, EventId, Role};
use domain_workflow::{Status, WorkflowVariant};
use infra_db::{PgDeadLetterSink, PgDeliveryLedger, PgWorkflowStore};
use test_utils::{assert_projection, canonical_validator, EventSequence, TestDatabase};
use workflow_engine::{
    DeadLetter, DeadLetterSink, DeadLetterSource, DeliveryLedger, Orchestrator, OutboxStore,
    ProjectionStore, ReorderConfig, UnitOfWork,
};

struct PgHarness {
    _db: TestDatabase,
    store: Arc<PgWorkflowStore>,
    dead_letters: Arc<PgDeadLetterSink>,
    orchestrator: Orchestrator,
}

async fn harness() -> PgHarness {
    let db = TestDatabase::new().await.expect("test database");
    let store = Arc::new(PgWorkflowStore::new(db.pool().clone()));
    let dead_letters = Arc::new(PgDeadLetterSink::new(db.pool().clone()));
    let orchestrator = Orchestrator::new(
        "pg-test",
        canonical_validator(),
        WorkflowVariant::ALL,
        store.clone(),
        dead_letters.clone(),
        ReorderConfig::default(),
    );
    PgHarness {
        _db: db,
        store,
        dead_letters,
        orchestrator,
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_verification_path_persists_projection_and_outbox() {
    let h = harness().await;
    let mut seq = EventSequence::fresh();
    for event in seq.verification_path() {
        h.orchestrator.handle(event).await.unwrap();
    }

    let projection = h
        .store
        .get(seq.application_id(), WorkflowVariant::Verification)
        .await
        .unwrap()
        .expect("projection stored");
    assert_projection(&projection, Status::PolicyIssued, 5);
    assert_eq!(projection.applicant_id, seq.applicant());

    let pending = h.store.pending(100).await.unwrap();
    let types: Vec<&str> = pending.iter().map(|r| r.event.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec!["ReadyForMAReview", "ReadyForPCICReview", "ApplicationApproved", "PolicyIssuedEvent"]
    );
    assert!(pending.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redelivered_event_is_absorbed() {
    let h = harness().await;
    let mut seq = EventSequence::fresh();
    let submitted = seq.next("APPLICATION_SUBMITTED", Role::Farmer);

    h.orchestrator.handle(submitted.clone()).await.unwrap();
    h.orchestrator.handle(submitted.clone()).await.unwrap();

    assert!(h.store.is_processed(submitted.event_id).await.unwrap());
    let projection = h
        .store
        .get(seq.application_id(), WorkflowVariant::Verification)
        .await
        .unwrap()
        .unwrap();
    assert_projection(&projection, Status::Submitted, 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_conflicting_commit_writes_nothing() {
    let h = harness().await;
    let mut seq = EventSequence::fresh();
    let submitted = seq.next("APPLICATION_SUBMITTED", Role::Farmer);
    h.orchestrator.handle(submitted.clone()).await.unwrap();

    let current = h
        .store
        .get(seq.application_id(), WorkflowVariant::Verification)
        .await
        .unwrap()
        .unwrap();
    let mut stale = current.clone();
    stale.status = Status::ProcessingByAew;
    stale.version = 2;

    let fresh_id = EventId::new_v7();
    let err = h
        .store
        .commit(
            UnitOfWork::new()
                .put_projection(stale, Some(current.version + 7))
                .mark_processed(fresh_id)
                .stage(submitted.clone()),
        )
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(!h.store.is_processed(fresh_id).await.unwrap());
    assert!(h.store.pending(10).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_outbox_failure_bookkeeping() {
    let h = harness().await;
    let mut seq = EventSequence::fresh();
    for event in &seq.verification_path()[..2] {
        h.orchestrator.handle(event.clone()).await.unwrap();
    }

    let record = h.store.pending(10).await.unwrap().remove(0);
    assert_eq!(h.store.record_failure(record.id, "broker down").await.unwrap(), 1);
    assert_eq!(h.store.record_failure(record.id, "broker down").await.unwrap(), 2);

    h.store.mark_dead_letter(record.id, "gave up").await.unwrap();
    assert!(h.store.pending(10).await.unwrap().is_empty());
    assert!(h.store.mark_published(record.id).await.is_ok());
    assert!(h.store.mark_published(record.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stale_lists_oldest_first() {
    let h = harness().await;
    let mut older = EventSequence::fresh();
    let mut newer = EventSequence::fresh();
    let base = test_utils::TemporalFixtures::base_time();

    h.orchestrator
        .handle(older.next("APPLICATION_SUBMITTED", Role::Farmer).with_occurred_at(base))
        .await
        .unwrap();
    h.orchestrator
        .handle(
            newer
                .next("APPLICATION_SUBMITTED", Role::Farmer)
                .with_occurred_at(base + Duration::hours(1)),
        )
        .await
        .unwrap();

    let stale = h
        .store
        .stale(Status::Submitted, base + Duration::hours(2))
        .await
        .unwrap();
    let apps: Vec<_> = stale.iter().map(|p| p.application_id).collect();
    assert_eq!(apps, vec![older.application_id(), newer.application_id()]);

    let none = h.store.stale(Status::Submitted, base).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_dead_letters_and_ledger() {
    let h = harness().await;
    h.dead_letters
        .dead_letter(DeadLetter::new(DeadLetterSource::Consumer, "malformed", b"{".to_vec()))
        .await
        .unwrap();
    assert_eq!(h.dead_letters.count(DeadLetterSource::Consumer).await.unwrap(), 1);
    assert_eq!(h.dead_letters.count(DeadLetterSource::Outbox).await.unwrap(), 0);

    let ledger = PgDeliveryLedger::new(h.store.pool().clone());
    let event_id = EventId::new_v7();
    let farmer = ActorId::new();
    assert!(ledger.claim(event_id, farmer).await.unwrap());
    assert!(!ledger.claim(event_id, farmer).await.unwrap());
    ledger.release(event_id).await.unwrap();
    assert!(ledger.claim(event_id, farmer).await.unwrap());
}
