//! Workflow domain errors

use thiserror::Error;

use core_kernel::Role;
use crate::status::{Status, WorkflowVariant};

/// Outcome of a transition the validator refuses
///
/// None of these are fatal: the first two become a `TransitionRejected`
/// event, the third means the event belongs to another variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Illegal transition: {event_type} from {}", from_label(.from))]
    IllegalTransition {
        from: Option<Status>,
        event_type: String,
    },

    #[error("Forbidden actor: {role} may not emit {event_type} from {}", from_label(.from))]
    ForbiddenActor {
        from: Option<Status>,
        event_type: String,
        role: Role,
    },

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

fn from_label(from: &Option<Status>) -> &'static str {
    from.map(|s| s.as_str()).unwrap_or("<none>")
}

impl TransitionError {
    /// Machine-readable reason carried by the compensating event
    pub fn reason(&self) -> &'static str {
        match self {
            TransitionError::IllegalTransition { .. } => "illegal_transition",
            TransitionError::ForbiddenActor { .. } => "forbidden_actor",
            TransitionError::UnknownEventType(_) => "unknown_event_type",
        }
    }

    /// True when the event should be ignored rather than rejected
    pub fn is_foreign(&self) -> bool {
        matches!(self, TransitionError::UnknownEventType(_))
    }
}

/// A transition table that cannot be loaded
///
/// Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{variant}: table has no entry row")]
    MissingEntry { variant: WorkflowVariant },

    #[error("{variant}: terminal status {status} has outgoing transition {event_type}")]
    TerminalHasOutgoing {
        variant: WorkflowVariant,
        status: Status,
        event_type: String,
    },

    #[error("{variant}: status {status} has no outgoing transition and is not terminal")]
    OrphanStatus {
        variant: WorkflowVariant,
        status: Status,
    },

    #[error("{variant}: status {status} is not reachable from any entry")]
    Unreachable {
        variant: WorkflowVariant,
        status: Status,
    },

    #[error("{variant}: duplicate transition ({status}, {event_type})")]
    DuplicateTransition {
        variant: WorkflowVariant,
        status: Status,
        event_type: String,
    },

    #[error("{variant}: event {event_type} belongs to another variant")]
    ForeignEvent {
        variant: WorkflowVariant,
        event_type: String,
    },

    #[error("{variant}: row for {event_type} permits no role")]
    NoRoles {
        variant: WorkflowVariant,
        event_type: String,
    },

    #[error("{variant}: registered twice")]
    DuplicateVariant { variant: WorkflowVariant },
}

/// General workflow domain errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Unknown workflow variant: {0}")]
    UnknownVariant(String),

    #[error("Version gap: expected {expected}, received {received}")]
    VersionGap { expected: u64, received: u64 },

    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Unsupported schema version: {0}")]
    UnsupportedSchema(u16),
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Malformed(err.to_string())
    }
}
