//! Application Workflow Domain
//!
//! This crate holds the pure part of the workflow engine: the closed set of
//! statuses, the per-variant transition tables, the validator deciding every
//! transition, the event envelope exchanged on the bus, and the projection
//! each service keeps of an application.
//!
//! # Verification lifecycle
//!
//! ```text
//! SUBMITTED -> VERIFIED_BY_AEW -> VERIFIED_BY_MA -> APPROVED_BY_PCIC|APPROVED_BY_DA -> POLICY_ISSUED
//!     \______________\_______________\______________ rejected / cancelled (terminal)
//! ```
//!
//! Nothing here performs I/O.

pub mod status;
pub mod event;
pub mod tables;
pub mod registry;
pub mod validator;
pub mod projection;
pub mod error;

pub use status::{Status, WorkflowVariant};
pub use event::{
    ConsequencePayload, DomainEvent, EscalationPayload, EventType, RejectionPayload, Topic,
    SCHEMA_VERSION,
};
pub use tables::{Entry, Source, Transition, WorkflowTable};
pub use registry::{Edge, StatusRegistry};
pub use validator::{Decision, TransitionValidator};
pub use projection::ApplicationProjection;
pub use error::{RegistryError, TransitionError, WorkflowError};
