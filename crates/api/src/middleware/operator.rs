//! Operator identity for mutating routes.
//!
//! Authentication happens upstream; the session layer forwards the acting
//! staff member as a UUID in the `X-Operator-Id` header.

use axum::{extract::FromRequestParts, http::request::Parts};
use tally_shared::{AppError, types::OperatorId};

use crate::error::ApiError;

/// Header carrying the operator's ID.
pub const OPERATOR_HEADER: &str = "x-operator-id";

/// Extractor for the operator performing the request.
///
/// ```ignore
/// async fn handler(operator: Operator) -> impl IntoResponse {
///     let recorded_by = operator.id();
///     // ...
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Operator(pub OperatorId);

impl Operator {
    /// Returns the operator ID.
    #[must_use]
    pub const fn id(&self) -> OperatorId {
        self.0
    }
}

fn parse_operator(value: Option<&str>) -> Result<OperatorId, AppError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Err(AppError::MissingOperator(
            "X-Operator-Id header is required".to_string(),
        ));
    };
    value
        .parse()
        .map_err(|_| AppError::MissingOperator("X-Operator-Id must be a UUID".to_string()))
}

impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(OPERATOR_HEADER)
            .and_then(|h| h.to_str().ok());
        Ok(Self(parse_operator(header)?))
    }
}
