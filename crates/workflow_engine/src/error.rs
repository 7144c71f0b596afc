//! Engine errors

use thiserror::Error;

use core_kernel::{ApplicationId, CoreError, PortError};
use domain_workflow::{RegistryError, TransitionError, WorkflowError, WorkflowVariant};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("No {variant} projection for application {application_id}")]
    ProjectionNotFound {
        application_id: ApplicationId,
        variant: WorkflowVariant,
    },

    #[error("Variant {0} is not projected by this service")]
    VariantNotProjected(WorkflowVariant),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker channel closed")]
    ChannelClosed,
}

impl EngineError {
    /// True when retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Port(e) => e.is_transient(),
            _ => false,
        }
    }
}
