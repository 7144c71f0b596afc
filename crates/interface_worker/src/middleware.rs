//! Request middleware

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::info;

use crate::handlers::commands::ACTOR_ID_HEADER;

/// Audit logging middleware
///
/// Logs every command request with the acting user and outcome status.
pub async fn audit_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let actor = request
        .headers()
        .get(ACTOR_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let start = std::time::Instant::now();
    let response = next.run(request).await;

    info!(
        method = %method,
        uri = %uri,
        actor = %actor,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Command request"
    );

    response
}
