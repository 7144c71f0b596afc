//! Workflow Service
//!
//! Runs one workflow service: the orchestrator behind partitioned consumer
//! workers, the outbox publisher, the SLA sweeper and the notification
//! fan-out, plus a small HTTP surface.
//!
//! # Routes
//!
//! - `GET /health`: liveness
//! - `GET /health/ready`: store health and reorder buffer depth
//! - `POST /api/v1/applications/:id/commands`: authenticated command intake
//!
//! # Example
//!
//! ```rust,ignore
//! let service = Service::new(&config, validator, Ports::from_config(&config).await?, notifier);
//! let running = service.start(shutdown_rx).await?;
//! axum::serve(listener, create_router(service.state())).await?;
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notifier;
pub mod service;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use workflow_engine::{Orchestrator, ProjectionStore};

use crate::handlers::{commands, health};
use crate::middleware::audit_middleware;

pub use crate::config::{LogFormat, ServiceConfig};
pub use crate::error::ServiceError;
pub use crate::notifier::LogNotifier;
pub use crate::service::{Ports, Running, Service};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service_name: Arc<str>,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn ProjectionStore>,
}

/// Creates the service router
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let api_routes = Router::new()
        .route("/applications/:id/commands", post(commands::submit_command))
        .layer(axum_middleware::from_fn(audit_middleware));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
