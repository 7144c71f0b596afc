//! Actor roles and explicit call context
//!
//! Every orchestrator call receives an [`ActorContext`] instead of reading a
//! request-scoped security context. This keeps transition handling
//! deterministic and testable without any web framework in the loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::identifiers::{ActorId, ApplicationId, TenantId};

/// Organizational role of the actor behind an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Applicant farmer
    Farmer,
    /// Agricultural Extension Worker
    Aew,
    /// Municipal Agriculturist
    Ma,
    /// Philippine Crop Insurance Corporation officer (underwriter, adjuster)
    Pcic,
    /// Department of Agriculture officer
    Da,
    /// The workflow engine itself, advancing the workflow after a decision
    System,
}

impl Role {
    /// All roles, in declaration order
    pub const ALL: [Role; 6] = [
        Role::Farmer,
        Role::Aew,
        Role::Ma,
        Role::Pcic,
        Role::Da,
        Role::System,
    ];

    /// Returns the wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Farmer => "FARMER",
            Role::Aew => "AEW",
            Role::Ma => "MA",
            Role::Pcic => "PCIC",
            Role::Da => "DA",
            Role::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownRole(s.to_string()))
    }
}

/// Who is acting, on which application, for which tenant
///
/// Built by the (external) HTTP layer after authentication, or by the engine
/// itself for system-originated events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub application_id: ApplicationId,
    pub actor_id: ActorId,
    pub role: Role,
    pub tenant_id: Option<TenantId>,
}

impl ActorContext {
    /// Creates a context without tenant information
    pub fn new(application_id: ApplicationId, actor_id: ActorId, role: Role) -> Self {
        Self {
            application_id,
            actor_id,
            role,
            tenant_id: None,
        }
    }

    /// Attaches a tenant
    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Context for events the engine emits on its own behalf
    pub fn system(application_id: ApplicationId, tenant_id: Option<TenantId>) -> Self {
        Self {
            application_id,
            actor_id: ActorId::from_uuid(uuid::Uuid::nil()),
            role: Role::System,
            tenant_id,
        }
    }
}
