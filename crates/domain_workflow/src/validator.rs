//! Transition Validator
//!
//! A pure decision function over the loaded registries. Given the current
//! status (or none, for an event that opens a projection), an event type and
//! the actor's role, it either returns the next status or says why not.

use std::collections::HashMap;

use core_kernel::Role;
use crate::error::{RegistryError, TransitionError};
use crate::event::EventType;
use crate::registry::StatusRegistry;
use crate::status::{Status, WorkflowVariant};

/// An accepted transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub variant: WorkflowVariant,
    pub event_type: EventType,
    /// `None` when the event opened the projection
    pub from: Option<Status>,
    pub to: Status,
    /// Consequence events to stage with the new status
    pub emits: &'static [EventType],
    /// True when `to` freezes the workflow
    pub terminal: bool,
}

#[derive(Debug, Clone)]
pub struct TransitionValidator {
    registries: HashMap<WorkflowVariant, StatusRegistry>,
}

impl TransitionValidator {
    /// Loads the canonical table of every variant
    pub fn canonical() -> Result<Self, RegistryError> {
        let registries = WorkflowVariant::ALL
            .into_iter()
            .map(StatusRegistry::canonical)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(registries)
    }

    /// Builds a validator over the given registries, one per variant
    pub fn new(registries: impl IntoIterator<Item = StatusRegistry>) -> Result<Self, RegistryError> {
        let mut by_variant = HashMap::new();
        for registry in registries {
            let variant = registry.variant();
            if by_variant.insert(variant, registry).is_some() {
                return Err(RegistryError::DuplicateVariant { variant });
            }
        }
        Ok(Self {
            registries: by_variant,
        })
    }

    pub fn registry(&self, variant: WorkflowVariant) -> Option<&StatusRegistry> {
        self.registries.get(&variant)
    }

    pub fn variants(&self) -> impl Iterator<Item = WorkflowVariant> + '_ {
        self.registries.keys().copied()
    }

    /// Resolves an event type to its variant's registry
    ///
    /// Unknown wire names, consequence types and variants without a loaded
    /// registry are all `UnknownEventType`.
    pub fn classify(&self, event_type: &str) -> Result<(EventType, &StatusRegistry), TransitionError> {
        let unknown = || TransitionError::UnknownEventType(event_type.to_string());
        let kind = EventType::parse(event_type).ok_or_else(unknown)?;
        let variant = kind.variant().ok_or_else(unknown)?;
        let registry = self.registries.get(&variant).ok_or_else(unknown)?;
        Ok((kind, registry))
    }

    /// True when `event_type` opens a projection of its variant
    pub fn is_entry(&self, event_type: &str) -> bool {
        self.classify(event_type)
            .map(|(kind, registry)| registry.entry(kind).is_some())
            .unwrap_or(false)
    }

    /// Decides a transition from `current`
    pub fn apply(
        &self,
        current: Status,
        event_type: &str,
        role: Role,
    ) -> Result<Decision, TransitionError> {
        let (kind, registry) = self.classify(event_type)?;

        let edge = registry
            .edge(current, kind)
            .ok_or_else(|| TransitionError::IllegalTransition {
                from: Some(current),
                event_type: event_type.to_string(),
            })?;

        if !edge.roles.contains(&role) {
            return Err(TransitionError::ForbiddenActor {
                from: Some(current),
                event_type: event_type.to_string(),
                role,
            });
        }

        Ok(Decision {
            variant: registry.variant(),
            event_type: kind,
            from: Some(current),
            to: edge.to,
            emits: edge.emits,
            terminal: registry.is_terminal(edge.to),
        })
    }

    /// Decides an event arriving for an application with no projection yet
    pub fn open(&self, event_type: &str, role: Role) -> Result<Decision, TransitionError> {
        let (kind, registry) = self.classify(event_type)?;

        let entry = registry
            .entry(kind)
            .ok_or_else(|| TransitionError::IllegalTransition {
                from: None,
                event_type: event_type.to_string(),
            })?;

        if !entry.roles.contains(&role) {
            return Err(TransitionError::ForbiddenActor {
                from: None,
                event_type: event_type.to_string(),
                role,
            });
        }

        Ok(Decision {
            variant: registry.variant(),
            event_type: kind,
            from: None,
            to: entry.status,
            emits: &[],
            terminal: registry.is_terminal(entry.status),
        })
    }

    /// `open` when there is no current status, `apply` otherwise
    pub fn decide(
        &self,
        current: Option<Status>,
        event_type: &str,
        role: Role,
    ) -> Result<Decision, TransitionError> {
        match current {
            Some(status) => self.apply(status, event_type, role),
            None => self.open(event_type, role),
        }
    }
}
