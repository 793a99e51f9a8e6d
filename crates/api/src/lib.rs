//! HTTP API layer with Axum routes and middleware.
//!
//! This crate provides:
//! - REST routes for refunds and their payment entries
//! - The `X-Operator-Id` extractor
//! - The `{data}` / `{error}` response envelope

pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;

use axum::{Router, extract::DefaultBodyLimit};
use tally_core::refund::{RefundService, RefundStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
pub struct AppState<S: RefundStore> {
    /// Refund reconciliation service.
    pub refunds: RefundService<S>,
}

impl<S: RefundStore> AppState<S> {
    /// Creates the state around a refund service.
    #[must_use]
    pub const fn new(refunds: RefundService<S>) -> Self {
        Self { refunds }
    }
}

impl<S: RefundStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            refunds: self.refunds.clone(),
        }
    }
}

/// Creates the main application router.
///
/// `max_body_bytes` bounds request bodies; proof images travel inline.
pub fn create_router<S: RefundStore + 'static>(
    state: AppState<S>,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .fallback(routes::not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
