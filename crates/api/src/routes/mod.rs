//! API route definitions.

use axum::{Router, http::Uri};
use tally_core::refund::RefundStore;
use tally_shared::AppError;

use crate::{AppState, error::ApiError};

pub mod health;
pub mod refunds;

/// Creates the API router with all routes.
pub fn api_routes<S: RefundStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        .merge(health::routes())
        .merge(refunds::routes())
}

/// Fallback for unknown paths, rendered in the error envelope.
pub async fn not_found(uri: Uri) -> ApiError {
    AppError::NotFound(format!("no route for {uri}")).into()
}
