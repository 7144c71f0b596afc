//! Property-Based Test Generators
//!
//! Provides proptest strategies for roles, statuses, wire event types and
//! legal walks through the canonical tables.

use core_kernel::{ApplicationId, Role};
use domain_workflow::{EventType, Status, WorkflowVariant};
use proptest::prelude::*;

use crate::fixtures::canonical_validator;

/// One step of a legal walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkStep {
    pub event: EventType,
    pub role: Role,
    /// Status after the step
    pub to: Status,
}

/// Strategy for generating any Role
pub fn role_strategy() -> impl Strategy<Value = Role> {
    proptest::sample::select(Role::ALL.to_vec())
}

/// Strategy for generating any Status
pub fn status_strategy() -> impl Strategy<Value = Status> {
    proptest::sample::select(Status::ALL.to_vec())
}

pub fn variant_strategy() -> impl Strategy<Value = WorkflowVariant> {
    proptest::sample::select(WorkflowVariant::ALL.to_vec())
}

/// Strategy for generating any known event type
pub fn event_type_strategy() -> impl Strategy<Value = EventType> {
    proptest::sample::select(EventType::ALL.to_vec())
}

/// Wire event names, including names no table knows
pub fn wire_event_type_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => event_type_strategy().prop_map(|e| e.as_str().to_string()),
        1 => "[A-Z_]{3,20}",
    ]
}

/// Strategy for generating ApplicationId
pub fn application_id_strategy() -> impl Strategy<Value = ApplicationId> {
    any::<[u8; 16]>().prop_map(|bytes| ApplicationId::from_uuid(uuid::Uuid::from_bytes(bytes)))
}

/// A legal walk through `variant`'s table: an entry event followed by up to
/// `max_steps` transitions, each by a role the row allows
pub fn legal_walk_strategy(
    variant: WorkflowVariant,
    max_steps: usize,
) -> impl Strategy<Value = Vec<WalkStep>> {
    proptest::collection::vec(any::<(u8, u8)>(), 1..=max_steps + 1).prop_map(move |choices| {
        let validator = canonical_validator();
        let registry = validator
            .registry(variant)
            .expect("canonical registry for every variant");

        let entries = registry.entries();
        let (pick, role_pick) = choices[0];
        let entry = entries[pick as usize % entries.len()];
        let mut status = entry.status;
        let mut walk = vec![WalkStep {
            event: entry.event,
            role: entry.roles[role_pick as usize % entry.roles.len()],
            to: status,
        }];

        for (pick, role_pick) in choices.into_iter().skip(1) {
            let outgoing = registry.outgoing(status);
            if outgoing.is_empty() {
                break;
            }
            let (event, edge) = outgoing[pick as usize % outgoing.len()];
            status = edge.to;
            walk.push(WalkStep {
                event,
                role: edge.roles[role_pick as usize % edge.roles.len()],
                to: status,
            });
        }
        walk
    })
}

/// A permutation of `0..len`
pub fn permutation_strategy(len: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..len).collect::<Vec<usize>>()).prop_shuffle()
}
