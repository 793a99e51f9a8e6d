//! Response envelope and error rendering.
//!
//! Every route answers with `{"data": ...}` on success and
//! `{"error": {"code", "message", ...}}` on failure.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{error, warn};

use tally_core::refund::{PaymentRequirement, RefundError};
use tally_shared::AppError;

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    /// Refund ledger rejected the operation.
    Refund(RefundError),
    /// Transport-level failure.
    App(AppError),
    /// Completion needs refund-level evidence. Not a domain error, but it
    /// travels through the error envelope.
    RequiresPayment(PaymentRequirement),
}

impl From<RefundError> for ApiError {
    fn from(err: RefundError) -> Self {
        Self::Refund(err)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::App(AppError::PayloadTooLarge(rejection.body_text()))
        } else {
            Self::App(AppError::BadRequest(rejection.body_text()))
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::App(AppError::BadRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::App(AppError::BadRequest(rejection.body_text()))
    }
}

#[derive(Serialize)]
struct Envelope<T> {
    data: T,
}

/// Wraps a payload in the success envelope.
pub fn respond<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(Envelope { data })).into_response()
}

fn status_from(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_body(code: &str, message: String, extra: Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert("code".to_string(), Value::String(code.to_string()));
    body.insert("message".to_string(), Value::String(message));
    body.extend(extra);
    json!({ "error": body })
}

fn refund_error_fields(err: &RefundError) -> Map<String, Value> {
    let fields = match err {
        RefundError::InvalidAmount { reason } => json!({ "reason": reason }),
        RefundError::UnsupportedProofFormat { mime_types } => json!({ "mimeTypes": mime_types }),
        RefundError::ValidationFailed { violations } => json!({
            "fields": err.field_names(),
            "violations": violations,
        }),
        RefundError::ExceedsRemaining { remaining_amount }
        | RefundError::InsufficientPayment { remaining_amount } => {
            json!({ "remainingAmount": remaining_amount })
        }
        RefundError::DuplicateRefund {
            return_request_id,
            existing_refund_id,
        } => json!({
            "returnRequestId": return_request_id,
            "existingRefundId": existing_refund_id,
        }),
        RefundError::RefundClosed { refund_id, status } => json!({
            "refundId": refund_id,
            "status": status,
        }),
        RefundError::ReturnRequestNotApproved {
            return_request_id,
            status,
        } => json!({
            "returnRequestId": return_request_id,
            "status": status,
        }),
        RefundError::RefundNotFound(_)
        | RefundError::PaymentNotFound(_)
        | RefundError::ReturnRequestNotFound(_)
        | RefundError::InvariantViolation(_)
        | RefundError::Storage(_) => Value::Null,
    };
    match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Refund(err) => {
                let status = status_from(err.http_status_code());
                let message = if err.is_internal() {
                    error!(error = %err, code = err.error_code(), "Refund operation failed");
                    "An internal error occurred".to_string()
                } else {
                    warn!(error = %err, code = err.error_code(), "Refund operation rejected");
                    err.to_string()
                };
                let extra = refund_error_fields(&err);
                (status, error_body(err.error_code(), message, extra))
            }
            Self::App(err) => {
                let status = status_from(err.status_code());
                let message = if status.is_server_error() {
                    error!(error = %err, "Request failed");
                    "An internal error occurred".to_string()
                } else {
                    err.to_string()
                };
                (status, error_body(err.error_code(), message, Map::new()))
            }
            Self::RequiresPayment(requirement) => {
                let extra = json!({
                    "refundId": requirement.refund_id,
                    "refundMethod": requirement.refund_method,
                    "requiredFields": requirement.required_fields,
                });
                let extra = match extra {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                (
                    StatusCode::PAYMENT_REQUIRED,
                    error_body("REQUIRES_PAYMENT", requirement.message, extra),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use rust_decimal_macros::dec;
    use tally_core::refund::{FieldViolation, RefundMethod, RefundStatus};
    use tally_shared::types::{Amount, RefundId};

    async fn render(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_exceeds_remaining_carries_amount() {
        let err = RefundError::ExceedsRemaining {
            remaining_amount: Amount::new(dec!(500)).unwrap(),
        };
        let (status, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "EXCEEDS_REMAINING");
        assert_eq!(body["error"]["remainingAmount"], "500");
    }

    #[tokio::test]
    async fn test_validation_failed_lists_fields() {
        let err = RefundError::ValidationFailed {
            violations: vec![FieldViolation::required("upiId", "UPI ID is required")],
        };
        let (status, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["fields"], json!(["upiId"]));
        assert_eq!(body["error"]["violations"][0]["reason"], "required");
    }

    #[tokio::test]
    async fn test_refund_closed_carries_status() {
        let err = RefundError::RefundClosed {
            refund_id: RefundId::new(),
            status: RefundStatus::Completed,
        };
        let (status, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["status"], "completed");
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let (status, body) = render(RefundError::Storage("connection reset".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "STORAGE_ERROR");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn test_requires_payment_is_402() {
        let requirement = PaymentRequirement {
            refund_id: RefundId::new(),
            refund_method: RefundMethod::Upi,
            message: "UPI refunds need a UPI ID".into(),
            required_fields: vec![],
        };
        let (status, body) = render(ApiError::RequiresPayment(requirement)).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"]["code"], "REQUIRES_PAYMENT");
        assert_eq!(body["error"]["refundMethod"], "upi");
    }

    #[tokio::test]
    async fn test_app_error_envelope() {
        let (status, body) =
            render(AppError::MissingOperator("X-Operator-Id header is required".into()).into())
                .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "MISSING_OPERATOR");
    }
}
