//! Refund ledger error types.
//!
//! Every variant carries the structured data a client needs to correct the
//! request without parsing the message.

use serde::Serialize;
use tally_shared::types::{Amount, PaymentEntryId, RefundId, ReturnRequestId};
use thiserror::Error;

use crate::refund::types::{RefundStatus, ReturnRequestStatus};

/// Why a field was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationReason {
    /// The method requires this field and it is absent or blank.
    Required,
    /// The method does not allow this field.
    Forbidden,
    /// The value is present but malformed or out of range.
    Invalid,
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Wire name of the field, e.g. `upiId` or `paymentProofs[0].mimeType`.
    pub field: String,
    /// Rejection category.
    pub reason: ViolationReason,
    /// Operator-facing message.
    pub message: String,
}

impl FieldViolation {
    /// Field is required but missing.
    #[must_use]
    pub fn required(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: ViolationReason::Required,
            message: message.into(),
        }
    }

    /// Field is present but not allowed.
    #[must_use]
    pub fn forbidden(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: ViolationReason::Forbidden,
            message: message.into(),
        }
    }

    /// Field is present but invalid.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: ViolationReason::Invalid,
            message: message.into(),
        }
    }
}

/// Errors that can occur while reconciling refunds.
#[derive(Debug, Error)]
pub enum RefundError {
    /// Refund amount is not a positive amount within the approved total.
    #[error("Invalid refund amount: {reason}")]
    InvalidAmount {
        /// Why the amount was rejected.
        reason: String,
    },

    /// Proof images were otherwise valid but of a MIME type that is not accepted.
    #[error("Unsupported proof format: {}", mime_types.join(", "))]
    UnsupportedProofFormat {
        /// The offending MIME types.
        mime_types: Vec<String>,
    },

    /// One or more fields violate the rules for the payment method.
    #[error("Validation failed for: {}", field_list(violations))]
    ValidationFailed {
        /// Every violation found, not just the first.
        violations: Vec<FieldViolation>,
    },

    /// The payment would overshoot the refund amount.
    #[error("Payment exceeds remaining amount {remaining_amount}")]
    ExceedsRemaining {
        /// What can still be paid.
        remaining_amount: Amount,
    },

    /// Completion attempted while money is still owed.
    #[error("Refund is not fully paid, remaining amount {remaining_amount}")]
    InsufficientPayment {
        /// What is still owed.
        remaining_amount: Amount,
    },

    /// A live refund already exists for the return request.
    #[error("Return request {return_request_id} already has refund {existing_refund_id}")]
    DuplicateRefund {
        /// The return request.
        return_request_id: ReturnRequestId,
        /// The refund that already settles it.
        existing_refund_id: RefundId,
    },

    /// The refund is completed or failed and can no longer change.
    #[error("Refund {refund_id} is {status} and cannot be modified")]
    RefundClosed {
        /// The refund.
        refund_id: RefundId,
        /// Its terminal status.
        status: RefundStatus,
    },

    /// Refund not found.
    #[error("Refund not found: {0}")]
    RefundNotFound(RefundId),

    /// Payment entry not found on the refund.
    #[error("Payment entry not found: {0}")]
    PaymentNotFound(PaymentEntryId),

    /// Return request not found.
    #[error("Return request not found: {0}")]
    ReturnRequestNotFound(ReturnRequestId),

    /// Return request exists but is not approved.
    #[error("Return request {return_request_id} is {status}, not approved")]
    ReturnRequestNotApproved {
        /// The return request.
        return_request_id: ReturnRequestId,
        /// Its current status.
        status: ReturnRequestStatus,
    },

    /// A persisted or computed ledger broke `0 <= paid <= amount`.
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

fn field_list(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RefundError {
    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::UnsupportedProofFormat { .. } => "UNSUPPORTED_PROOF_FORMAT",
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::ExceedsRemaining { .. } => "EXCEEDS_REMAINING",
            Self::InsufficientPayment { .. } => "INSUFFICIENT_PAYMENT",
            Self::DuplicateRefund { .. } => "DUPLICATE_REFUND",
            Self::RefundClosed { .. } => "REFUND_CLOSED",
            Self::RefundNotFound(_) => "REFUND_NOT_FOUND",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::ReturnRequestNotFound(_) => "RETURN_REQUEST_NOT_FOUND",
            Self::ReturnRequestNotApproved { .. } => "RETURN_REQUEST_NOT_APPROVED",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidAmount { .. }
            | Self::UnsupportedProofFormat { .. }
            | Self::ValidationFailed { .. } => 400,
            Self::RefundNotFound(_)
            | Self::PaymentNotFound(_)
            | Self::ReturnRequestNotFound(_) => 404,
            Self::DuplicateRefund { .. }
            | Self::RefundClosed { .. }
            | Self::ReturnRequestNotApproved { .. } => 409,
            Self::ExceedsRemaining { .. } | Self::InsufficientPayment { .. } => 422,
            Self::InvariantViolation(_) | Self::Storage(_) => 500,
        }
    }

    /// Returns true for faults the caller cannot fix by changing the request.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_) | Self::Storage(_))
    }

    /// Field names of a `ValidationFailed`, empty for every other variant.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            Self::ValidationFailed { violations } => {
                violations.iter().map(|v| v.field.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}
