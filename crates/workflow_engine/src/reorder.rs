//! Reorder buffer
//!
//! Holds events whose predecessor has not been applied yet, per application
//! and variant, ordered by version. Both the per-application and the total
//! number of held events are bounded; the orchestrator escalates on overflow.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use core_kernel::ApplicationId;
use domain_workflow::{DomainEvent, WorkflowVariant};

use crate::config::ReorderConfig;

pub type Key = (ApplicationId, WorkflowVariant);

/// Result of offering an event to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldResult {
    Held,
    /// Same event id already held
    Duplicate,
    /// Another event already holds this version
    Conflict,
    /// A bound is reached; the event was not held
    Overflow,
}

#[derive(Debug, Clone)]
pub struct HeldEvent {
    pub event: DomainEvent,
    pub held_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReorderBuffer {
    config: ReorderConfig,
    entries: HashMap<Key, BTreeMap<u64, HeldEvent>>,
    total: usize,
}

impl ReorderBuffer {
    pub fn new(config: ReorderConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            total: 0,
        }
    }

    pub fn hold(&mut self, key: Key, event: DomainEvent, now: DateTime<Utc>) -> HoldResult {
        if let Some(existing) = self.entries.get(&key).and_then(|m| m.get(&event.version)) {
            return if existing.event.event_id == event.event_id {
                HoldResult::Duplicate
            } else {
                HoldResult::Conflict
            };
        }

        let held_for_key = self.entries.get(&key).map_or(0, |m| m.len());
        if held_for_key >= self.config.max_per_application || self.total >= self.config.max_total {
            return HoldResult::Overflow;
        }

        self.insert(key, event, now);
        HoldResult::Held
    }

    /// Puts back a taken or expired event, ignoring bounds
    pub fn restore(&mut self, key: Key, event: DomainEvent, held_at: DateTime<Utc>) {
        self.insert(key, event, held_at);
    }

    fn insert(&mut self, key: Key, event: DomainEvent, held_at: DateTime<Utc>) {
        let slot = self.entries.entry(key).or_default();
        if slot.insert(event.version, HeldEvent { event, held_at }).is_none() {
            self.total += 1;
        }
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes the lowest held event if it is applicable after `current`
    ///
    /// Anything at or below `current + 1` is returned: the successor itself,
    /// or stale entries the caller resolves as duplicates or conflicts.
    pub fn take_ready(&mut self, key: &Key, current: u64) -> Option<DomainEvent> {
        let slot = self.entries.get_mut(key)?;
        let (&version, _) = slot.iter().next()?;
        if version > current + 1 {
            return None;
        }
        let held = slot.remove(&version)?;
        if slot.is_empty() {
            self.entries.remove(key);
        }
        self.total -= 1;
        Some(held.event)
    }

    /// Removes and returns events held longer than the TTL
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<(Key, HeldEvent)> {
        let ttl = self.config.ttl();
        let mut expired = Vec::new();

        for (key, slot) in self.entries.iter_mut() {
            let stale: Vec<u64> = slot
                .iter()
                .filter(|(_, held)| now - held.held_at >= ttl)
                .map(|(version, _)| *version)
                .collect();
            for version in stale {
                if let Some(held) = slot.remove(&version) {
                    expired.push((*key, held));
                }
            }
        }

        self.entries.retain(|_, slot| !slot.is_empty());
        self.total -= expired.len();
        expired
    }

    /// Lowest held version for `key`
    pub fn lowest(&self, key: &Key) -> Option<u64> {
        self.entries.get(key)?.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}
