//! Health check handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use core_kernel::{AdapterHealth, HealthCheckResult, HealthCheckable};

use crate::error::ServiceError;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub store: HealthCheckResult,
    /// Events waiting in the reorder buffer for a missing predecessor
    pub buffered_events: usize,
}

/// Liveness
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.service_name.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness (includes the projection store)
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, ServiceError> {
    let store = state.store.health_check().await;
    if store.status != AdapterHealth::Healthy {
        return Err(ServiceError::NotReady(
            store
                .message
                .unwrap_or_else(|| format!("{} is {:?}", store.adapter_id, store.status)),
        ));
    }

    Ok(Json(ReadinessResponse {
        status: "ready".to_string(),
        service: state.service_name.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store,
        buffered_events: state.orchestrator.buffered().await,
    }))
}
