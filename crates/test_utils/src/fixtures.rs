//! Pre-built Test Fixtures
//!
//! Ready-to-use actors, timestamps and the canonical validator. The
//! validator is loaded once per test binary.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use std::sync::Arc;

use core_kernel::{ActorContext, ActorId, ApplicationId, Role, TenantId};
use domain_workflow::TransitionValidator;

static CANONICAL_VALIDATOR: Lazy<Arc<TransitionValidator>> = Lazy::new(|| {
    Arc::new(TransitionValidator::canonical().expect("canonical tables must load"))
});

/// The validator over all four canonical tables
pub fn canonical_validator() -> Arc<TransitionValidator> {
    Arc::clone(&CANONICAL_VALIDATOR)
}

/// Fixture for actor contexts on one application
pub struct ActorFixtures;

impl ActorFixtures {
    pub fn farmer(app: ApplicationId) -> ActorContext {
        ActorContext::new(app, ActorId::new(), Role::Farmer)
    }

    pub fn aew(app: ApplicationId) -> ActorContext {
        ActorContext::new(app, ActorId::new(), Role::Aew)
    }

    pub fn ma(app: ApplicationId) -> ActorContext {
        ActorContext::new(app, ActorId::new(), Role::Ma)
    }

    pub fn pcic(app: ApplicationId) -> ActorContext {
        ActorContext::new(app, ActorId::new(), Role::Pcic)
    }

    pub fn da(app: ApplicationId) -> ActorContext {
        ActorContext::new(app, ActorId::new(), Role::Da)
    }

    /// A context for `role` with a fresh actor id
    pub fn with_role(app: ApplicationId, role: Role) -> ActorContext {
        ActorContext::new(app, ActorId::new(), role)
    }

    /// Farmer context scoped to a tenant
    pub fn tenant_farmer(app: ApplicationId, tenant: TenantId) -> ActorContext {
        Self::farmer(app).with_tenant(tenant)
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// Fixed reference instant (Jun 1, 2024 08:00 UTC)
    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    /// `hours` after the reference instant
    pub fn hours_later(hours: i64) -> DateTime<Utc> {
        Self::base_time() + chrono::Duration::hours(hours)
    }
}

/// Fixture for string test data
pub struct StringFixtures;

impl StringFixtures {
    pub fn policy_number() -> &'static str {
        "PCIC-2024-000123"
    }

    pub fn remarks() -> &'static str {
        "Farm boundaries confirmed on site"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_workflow::WorkflowVariant;

    #[test]
    fn test_canonical_validator_loads_every_variant() {
        let validator = canonical_validator();
        for variant in WorkflowVariant::ALL {
            assert!(validator.registry(variant).is_some(), "{variant} missing");
        }
    }

    #[test]
    fn test_hours_later() {
        assert_eq!(
            TemporalFixtures::hours_later(72) - TemporalFixtures::base_time(),
            chrono::Duration::hours(72)
        );
    }
}
