//! Health check endpoints.

use axum::{Router, http::StatusCode, response::Response, routing::get};
use serde::Serialize;
use tally_core::refund::RefundStore;

use crate::{AppState, error::respond};

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Health check handler.
async fn health_check() -> Response {
    respond(
        StatusCode::OK,
        HealthResponse {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

/// Creates health check routes.
pub fn routes<S: RefundStore + 'static>() -> Router<AppState<S>> {
    Router::new().route("/health", get(health_check))
}
