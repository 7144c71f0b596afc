//! Command intake
//!
//! The gateway in front of the service authenticates the caller and forwards
//! the actor identity in headers; this handler turns the request into an
//! [`ActorContext`] and hands it to the orchestrator.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use core_kernel::{ActorContext, ActorId, ApplicationId, Role, TenantId};
use domain_workflow::Status;
use workflow_engine::{Command, OrchestratorOutcome};

use crate::error::ServiceError;
use crate::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Caller identity set by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub actor_id: ActorId,
    pub role: Role,
    pub tenant_id: Option<TenantId>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

        let actor_id = header(ACTOR_ID_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized(format!("missing {ACTOR_ID_HEADER}")))?
            .parse::<ActorId>()
            .map_err(|e| ServiceError::Unauthorized(format!("invalid {ACTOR_ID_HEADER}: {e}")))?;
        let role = header(ACTOR_ROLE_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized(format!("missing {ACTOR_ROLE_HEADER}")))?
            .parse::<Role>()
            .map_err(|e| ServiceError::Unauthorized(e.to_string()))?;
        // System events are produced by the engine, never by callers
        if role == Role::System {
            return Err(ServiceError::Unauthorized("SYSTEM may not submit commands".into()));
        }
        let tenant_id = header(TENANT_ID_HEADER)
            .map(|t| t.parse::<TenantId>())
            .transpose()
            .map_err(|e| ServiceError::BadRequest(format!("invalid {TENANT_ID_HEADER}: {e}")))?;

        Ok(Actor {
            actor_id,
            role,
            tenant_id,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub staged: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&OrchestratorOutcome> for CommandResponse {
    fn from(outcome: &OrchestratorOutcome) -> Self {
        let mut response = CommandResponse {
            outcome: outcome.label().to_string(),
            status: None,
            version: None,
            staged: Vec::new(),
            reason: None,
        };
        match outcome {
            OrchestratorOutcome::Applied {
                to,
                version,
                staged,
                ..
            } => {
                response.status = Some(*to);
                response.version = Some(*version);
                response.staged = staged.iter().map(|e| e.as_str().to_string()).collect();
            }
            OrchestratorOutcome::Rejected { reason } | OrchestratorOutcome::Escalated { reason } => {
                response.reason = Some(reason.clone());
            }
            OrchestratorOutcome::Buffered { version, .. } => response.version = Some(*version),
            OrchestratorOutcome::NoOp | OrchestratorOutcome::Ignored => {}
        }
        response
    }
}

fn status_code(outcome: &OrchestratorOutcome) -> StatusCode {
    match outcome {
        OrchestratorOutcome::Applied { .. } | OrchestratorOutcome::NoOp => StatusCode::OK,
        OrchestratorOutcome::Buffered { .. } => StatusCode::ACCEPTED,
        OrchestratorOutcome::Rejected { .. } | OrchestratorOutcome::Ignored => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OrchestratorOutcome::Escalated { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Submits one command for an application
pub async fn submit_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    actor: Actor,
    Json(request): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ServiceError> {
    let application_id = id
        .parse::<ApplicationId>()
        .map_err(|e| ServiceError::BadRequest(format!("invalid application id: {e}")))?;

    let ctx = ActorContext {
        application_id,
        actor_id: actor.actor_id,
        role: actor.role,
        tenant_id: actor.tenant_id,
    };
    let outcome = state
        .orchestrator
        .submit(&ctx, Command::new(request.event_type, request.payload))
        .await?;

    Ok((status_code(&outcome), Json(CommandResponse::from(&outcome))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_workflow::{EventType, WorkflowVariant};

    #[test]
    fn test_applied_outcome_response() {
        let outcome = OrchestratorOutcome::Applied {
            variant: WorkflowVariant::Verification,
            from: Some(Status::Submitted),
            to: Status::VerifiedByAew,
            version: 2,
            staged: vec![EventType::ReadyForMaReview],
            released: 0,
        };
        let response = CommandResponse::from(&outcome);
        assert_eq!(response.outcome, "applied");
        assert_eq!(response.status, Some(Status::VerifiedByAew));
        assert_eq!(response.staged, vec!["ReadyForMAReview"]);
        assert_eq!(status_code(&outcome), StatusCode::OK);
    }

    #[test]
    fn test_rejection_is_unprocessable() {
        let outcome = OrchestratorOutcome::Rejected {
            reason: "forbidden_actor".to_string(),
        };
        assert_eq!(status_code(&outcome), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            CommandResponse::from(&outcome).reason.as_deref(),
            Some("forbidden_actor")
        );
    }
}
