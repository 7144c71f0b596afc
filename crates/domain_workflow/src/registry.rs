//! Status Registry
//!
//! Loads one [`WorkflowTable`] into a lookup keyed by `(status, event)` and
//! checks it is well formed. A table that fails the checks is a
//! configuration error and must stop the service at startup.

use std::collections::{BTreeSet, HashMap, VecDeque};

use core_kernel::Role;
use crate::error::RegistryError;
use crate::event::EventType;
use crate::status::{Status, WorkflowVariant};
use crate::tables::{Entry, Source, WorkflowTable};

/// Resolved outgoing edge of a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub to: Status,
    pub roles: &'static [Role],
    pub emits: &'static [EventType],
}

/// Legal statuses and transition graph of one workflow variant
#[derive(Debug, Clone)]
pub struct StatusRegistry {
    variant: WorkflowVariant,
    entries: HashMap<EventType, Entry>,
    edges: HashMap<(Status, EventType), Edge>,
    statuses: BTreeSet<Status>,
    terminal: BTreeSet<Status>,
}

impl StatusRegistry {
    /// Loads the canonical table of `variant`
    pub fn canonical(variant: WorkflowVariant) -> Result<Self, RegistryError> {
        Self::new(WorkflowTable::canonical(variant))
    }

    /// Loads and checks a table
    pub fn new(table: &WorkflowTable) -> Result<Self, RegistryError> {
        let variant = table.variant;

        if table.entries.is_empty() {
            return Err(RegistryError::MissingEntry { variant });
        }

        let terminal: BTreeSet<Status> = table.terminal.iter().copied().collect();
        let mut statuses: BTreeSet<Status> = terminal.clone();
        let mut entries = HashMap::new();

        for entry in table.entries {
            check_row(variant, entry.event, entry.roles)?;
            statuses.insert(entry.status);
            entries.insert(entry.event, *entry);
        }
        for transition in table.transitions {
            check_row(variant, transition.event, transition.roles)?;
            statuses.insert(transition.to);
            if let Source::Exact(from) = transition.from {
                statuses.extend(from.iter().copied());
            }
        }

        let mut edges: HashMap<(Status, EventType), Edge> = HashMap::new();
        for transition in table.transitions {
            let sources: Vec<Status> = match transition.from {
                Source::Exact(from) => from.to_vec(),
                Source::AnyNonTerminal => statuses
                    .iter()
                    .copied()
                    .filter(|s| !terminal.contains(s))
                    .collect(),
            };

            for from in sources {
                if terminal.contains(&from) {
                    return Err(RegistryError::TerminalHasOutgoing {
                        variant,
                        status: from,
                        event_type: transition.event.as_str().to_string(),
                    });
                }
                let edge = Edge {
                    to: transition.to,
                    roles: transition.roles,
                    emits: transition.emits,
                };
                if edges.insert((from, transition.event), edge).is_some() {
                    return Err(RegistryError::DuplicateTransition {
                        variant,
                        status: from,
                        event_type: transition.event.as_str().to_string(),
                    });
                }
            }
        }

        for status in &statuses {
            let has_outgoing = edges.keys().any(|(from, _)| from == status);
            if !has_outgoing && !terminal.contains(status) {
                return Err(RegistryError::OrphanStatus {
                    variant,
                    status: *status,
                });
            }
        }

        let registry = Self {
            variant,
            entries,
            edges,
            statuses,
            terminal,
        };
        registry.check_reachable()?;

        tracing::debug!(
            variant = %variant,
            statuses = registry.statuses.len(),
            edges = registry.edges.len(),
            "Loaded status registry"
        );

        Ok(registry)
    }

    fn check_reachable(&self) -> Result<(), RegistryError> {
        let mut seen: BTreeSet<Status> = BTreeSet::new();
        let mut queue: VecDeque<Status> = self.entries.values().map(|e| e.status).collect();

        while let Some(status) = queue.pop_front() {
            if seen.insert(status) {
                queue.extend(self.legal_next_statuses(status));
            }
        }

        match self.statuses.iter().find(|s| !seen.contains(s)) {
            Some(status) => Err(RegistryError::Unreachable {
                variant: self.variant,
                status: *status,
            }),
            None => Ok(()),
        }
    }

    pub fn variant(&self) -> WorkflowVariant {
        self.variant
    }

    /// Statuses reachable in one step from `status`
    pub fn legal_next_statuses(&self, status: Status) -> BTreeSet<Status> {
        self.edges
            .iter()
            .filter(|((from, _), _)| *from == status)
            .map(|(_, edge)| edge.to)
            .collect()
    }

    /// True when `status` freezes the workflow of this variant
    pub fn is_terminal(&self, status: Status) -> bool {
        self.terminal.contains(&status)
    }

    /// True when `status` belongs to this variant
    pub fn contains(&self, status: Status) -> bool {
        self.statuses.contains(&status)
    }

    pub fn statuses(&self) -> impl Iterator<Item = Status> + '_ {
        self.statuses.iter().copied()
    }

    /// Entry row opened by `event`, if it is an entry event
    pub fn entry(&self, event: EventType) -> Option<&Entry> {
        self.entries.get(&event)
    }

    /// Outgoing edge for `(status, event)`
    pub fn edge(&self, status: Status, event: EventType) -> Option<&Edge> {
        self.edges.get(&(status, event))
    }

    /// Every outgoing `(event, edge)` of `status`, ordered by event type
    pub fn outgoing(&self, status: Status) -> Vec<(EventType, Edge)> {
        let mut out: Vec<(EventType, Edge)> = self
            .edges
            .iter()
            .filter(|((from, _), _)| *from == status)
            .map(|((_, event), edge)| (*event, *edge))
            .collect();
        out.sort_by_key(|(event, _)| event.as_str());
        out
    }

    /// Entry rows, ordered by event type
    pub fn entries(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self.entries.values().copied().collect();
        entries.sort_by_key(|e| e.event.as_str());
        entries
    }
}

fn check_row(
    variant: WorkflowVariant,
    event: EventType,
    roles: &[Role],
) -> Result<(), RegistryError> {
    if event.variant() != Some(variant) {
        return Err(RegistryError::ForeignEvent {
            variant,
            event_type: event.as_str().to_string(),
        });
    }
    if roles.is_empty() {
        return Err(RegistryError::NoRoles {
            variant,
            event_type: event.as_str().to_string(),
        });
    }
    Ok(())
}
