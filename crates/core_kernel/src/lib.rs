//! Core Kernel - Foundational types shared by every workflow service
//!
//! This crate provides the building blocks used across the workflow crates:
//! - Strongly-typed identifiers for applications, events, actors and tenants
//! - Organizational roles and the explicit actor context passed into every call
//! - Port infrastructure (errors, health checks) for hexagonal adapters

pub mod identifiers;
pub mod context;
pub mod ports;
pub mod error;

pub use identifiers::{ApplicationId, EventId, ActorId, TenantId, OutboxId};
pub use context::{ActorContext, Role};
pub use ports::{PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth};
pub use error::CoreError;
