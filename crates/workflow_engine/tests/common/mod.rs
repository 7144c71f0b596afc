//! Wiring shared by the engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use core_kernel::ApplicationId;
use domain_workflow::{ApplicationProjection, DomainEvent, WorkflowVariant};
use test_utils::canonical_validator;
use workflow_engine::adapters::memory::{InMemoryDeadLetters, InMemoryWorkflowStore};
use workflow_engine::{Orchestrator, ReorderConfig, RetryPolicy};

pub struct Harness {
    pub store: Arc<InMemoryWorkflowStore>,
    pub dead_letters: Arc<InMemoryDeadLetters>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    /// Orchestrator projecting every variant
    pub fn new() -> Self {
        Self::with(WorkflowVariant::ALL, ReorderConfig::default())
    }

    pub fn with(
        variants: impl IntoIterator<Item = WorkflowVariant>,
        reorder: ReorderConfig,
    ) -> Self {
        let store = Arc::new(InMemoryWorkflowStore::recording());
        let dead_letters = Arc::new(InMemoryDeadLetters::new());
        let orchestrator = Arc::new(Orchestrator::new(
            "test-service",
            canonical_validator(),
            variants,
            store.clone(),
            dead_letters.clone(),
            reorder,
        ));
        Self {
            store,
            dead_letters,
            orchestrator,
        }
    }

    pub async fn projection(
        &self,
        app: ApplicationId,
        variant: WorkflowVariant,
    ) -> ApplicationProjection {
        use workflow_engine::ProjectionStore;
        self.store
            .get(app, variant)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no {variant} projection for {app}"))
    }

    pub async fn staged(&self) -> Vec<DomainEvent> {
        self.store.staged().await
    }

    /// Feeds events in order, panicking on engine errors
    pub async fn feed(&self, events: &[DomainEvent]) {
        for event in events {
            self.orchestrator.handle(event.clone()).await.unwrap();
        }
    }
}

/// Retry policy with millisecond backoff
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay_ms: 1,
        max_delay_ms: 2,
    }
}
