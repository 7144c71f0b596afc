//! Service error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use core_kernel::CoreError;
use domain_workflow::RegistryError;
use infra_bus::BusError;
use infra_db::DatabaseError;
use workflow_engine::EngineError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Transition tables failed to load: {0}")]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Tracing initialisation failed: {0}")]
    Telemetry(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not ready: {0}")]
    NotReady(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ServiceError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServiceError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ServiceError::NotReady(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            ServiceError::Engine(e) => engine_status(e),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

fn engine_status(error: &EngineError) -> (StatusCode, &'static str) {
    match error {
        EngineError::ProjectionNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::Transition(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_command"),
        EngineError::VariantNotProjected(_) => (StatusCode::UNPROCESSABLE_ENTITY, "variant_not_projected"),
        EngineError::Port(e) if e.is_conflict() => (StatusCode::CONFLICT, "conflict"),
        e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}
