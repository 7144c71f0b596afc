//! Custom Test Assertions
//!
//! Assertion helpers for projections and staged events that give more
//! meaningful failure messages than bare `assert_eq!`.

use domain_workflow::{ApplicationProjection, DomainEvent, EventType, RejectionPayload, Status};

/// Asserts a projection's status and version
pub fn assert_projection(projection: &ApplicationProjection, status: Status, version: u64) {
    assert_eq!(
        (projection.status, projection.version),
        (status, version),
        "Projection of {} is {}@{}, expected {}@{}",
        projection.application_id,
        projection.status,
        projection.version,
        status,
        version
    );
}

/// Wire names of `events`, in order
pub fn event_types(events: &[DomainEvent]) -> Vec<&str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}

/// Asserts `events` have exactly these types, in order
pub fn assert_event_types(events: &[DomainEvent], expected: &[&str]) {
    assert_eq!(
        event_types(events),
        expected,
        "Unexpected event types"
    );
}

/// Returns the only event of type `kind`, panicking on none or several
pub fn assert_single_of_type(events: &[DomainEvent], kind: EventType) -> &DomainEvent {
    let matching: Vec<&DomainEvent> = events
        .iter()
        .filter(|e| e.event_type == kind.as_str())
        .collect();
    assert_eq!(
        matching.len(),
        1,
        "Expected exactly one {kind}, found {} in {:?}",
        matching.len(),
        event_types(events)
    );
    matching[0]
}

/// Asserts no event of type `kind` is present
pub fn assert_none_of_type(events: &[DomainEvent], kind: EventType) {
    assert!(
        events.iter().all(|e| e.event_type != kind.as_str()),
        "Unexpected {kind} in {:?}",
        event_types(events)
    );
}

/// Asserts `event` is a `TransitionRejected` with `reason`, returning its payload
pub fn assert_rejection(event: &DomainEvent, reason: &str) -> RejectionPayload {
    assert_eq!(event.event_type, EventType::TransitionRejected.as_str());
    let payload: RejectionPayload = serde_json::from_value(event.payload.clone())
        .unwrap_or_else(|e| panic!("Rejection payload does not decode: {e}"));
    assert_eq!(payload.reason, reason, "Unexpected rejection reason: {}", payload.detail);
    payload
}
