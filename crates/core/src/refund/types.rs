//! Refund ledger domain types.
//!
//! A [`Refund`] is the financial obligation to repay a customer for an
//! approved return. Money moves against it as [`PaymentEntry`] rows. The
//! refund's paid and remaining totals are never stored: they are derived
//! from the live entries every time through [`RefundTotals`].

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tally_shared::types::{Amount, OperatorId, PaymentEntryId, RefundId, ReturnRequestId};

/// How money is sent back to the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundMethod {
    /// Cash handed over at the counter.
    Cash,
    /// UPI transfer.
    Upi,
    /// Bank transfer (NEFT/IMPS/RTGS).
    BankTransfer,
    /// Cheque.
    Cheque,
}

impl RefundMethod {
    /// All methods, in display order.
    pub const ALL: [Self; 4] = [Self::Cash, Self::Upi, Self::BankTransfer, Self::Cheque];

    /// Returns the string representation of the method.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Upi => "upi",
            Self::BankTransfer => "bank_transfer",
            Self::Cheque => "cheque",
        }
    }

    /// Parses a method from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Some(Self::Cash),
            "upi" => Some(Self::Upi),
            "bank_transfer" => Some(Self::BankTransfer),
            "cheque" => Some(Self::Cheque),
            _ => None,
        }
    }

    /// Human-readable label used in operator-facing messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Cash => "Cash",
            Self::Upi => "UPI",
            Self::BankTransfer => "Bank transfer",
            Self::Cheque => "Cheque",
        }
    }
}

impl fmt::Display for RefundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a refund.
///
/// - Pending: no live payment entries
/// - Processing: at least one live payment entry
/// - Completed: finalized by an operator (terminal)
/// - Failed: abandoned by an operator (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    /// Created, nothing paid yet.
    Pending,
    /// Partially or fully paid, not finalized.
    Processing,
    /// Marked failed; no further mutation.
    Failed,
    /// Finalized; no further mutation.
    Completed,
}

impl RefundStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// Parses a status from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Returns true once the refund can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Completed)
    }

    /// Status implied by the number of live payment entries on an open refund.
    #[must_use]
    pub const fn for_payment_count(count: usize) -> Self {
        if count == 0 {
            Self::Pending
        } else {
            Self::Processing
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much of the refund amount has been paid, independent of finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Settlement {
    /// Nothing paid.
    Unpaid,
    /// Something paid, something remaining.
    Partial,
    /// Paid in full.
    Settled,
}

/// Approval state of the upstream return request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnRequestStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved; a refund may be opened.
    Approved,
    /// Rejected.
    Rejected,
}

impl ReturnRequestStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReturnRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The slice of a return request the refund ledger reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    /// Return request ID.
    pub id: ReturnRequestId,
    /// Approved value of the returned goods.
    pub total_return_amount: Amount,
    /// Approval state.
    pub status: ReturnRequestStatus,
}

/// A decoded proof image as submitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofImageInput {
    /// Original file name.
    pub file_name: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// Declared size of the decoded payload.
    pub byte_size: u64,
    /// Base64 payload, optionally as a `data:` URL.
    pub data: String,
}

/// A validated proof image.
#[derive(Clone, PartialEq, Eq)]
pub struct ProofImage {
    /// Original file name.
    pub file_name: String,
    /// MIME type, lowercased.
    pub mime_type: String,
    /// Decoded bytes.
    pub data: Vec<u8>,
}

impl ProofImage {
    /// Size of the decoded payload.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for ProofImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofImage")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("byte_size", &self.data.len())
            .finish()
    }
}

/// A single payment recorded against a refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEntry {
    /// Payment entry ID.
    pub id: PaymentEntryId,
    /// Owning refund.
    pub refund_id: RefundId,
    /// Date the money moved.
    pub transaction_date: NaiveDate,
    /// Method used for this payment.
    pub payment_method: RefundMethod,
    /// Amount paid, strictly positive.
    pub paid_amount: Amount,
    /// Bank reference for UPI and bank transfers.
    pub utr_number: Option<String>,
    /// UPI ID the money was sent to.
    pub upi_id: Option<String>,
    /// IMPS reference for bank transfers.
    pub impc_number: Option<String>,
    /// Cheque number (cheque DTPF).
    pub check_dtpf: Option<String>,
    /// Supporting proof images.
    pub payment_proofs: Vec<ProofImage>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Operator who recorded the payment.
    pub recorded_by: OperatorId,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

/// Raw payment fields, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentInput {
    /// Date the money moved.
    pub transaction_date: NaiveDate,
    /// Method used; defaults to the refund's method.
    pub payment_method: Option<RefundMethod>,
    /// Amount paid.
    pub paid_amount: Decimal,
    /// Bank reference.
    pub utr_number: Option<String>,
    /// UPI ID.
    pub upi_id: Option<String>,
    /// IMPS reference.
    pub impc_number: Option<String>,
    /// Cheque number.
    pub check_dtpf: Option<String>,
    /// Proof images.
    pub payment_proofs: Vec<ProofImageInput>,
    /// Notes.
    pub notes: Option<String>,
}

/// Payment fields that passed validation for the method in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPayment {
    /// Date the money moved.
    pub transaction_date: NaiveDate,
    /// Resolved method.
    pub payment_method: RefundMethod,
    /// Amount paid, strictly positive.
    pub paid_amount: Amount,
    /// Bank reference.
    pub utr_number: Option<String>,
    /// UPI ID.
    pub upi_id: Option<String>,
    /// IMPS reference.
    pub impc_number: Option<String>,
    /// Cheque number.
    pub check_dtpf: Option<String>,
    /// Decoded proof images.
    pub payment_proofs: Vec<ProofImage>,
    /// Notes.
    pub notes: Option<String>,
}

/// Raw completion evidence, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionEvidenceInput {
    /// Consolidated bank reference.
    pub utr_number: Option<String>,
    /// UPI ID.
    pub upi_id: Option<String>,
    /// Proof images.
    pub payment_proofs: Vec<ProofImageInput>,
    /// Notes.
    pub notes: Option<String>,
}

/// Refund-level evidence captured when a refund is finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionEvidence {
    /// Consolidated bank reference.
    pub utr_number: Option<String>,
    /// UPI ID.
    pub upi_id: Option<String>,
    /// Proof images.
    pub payment_proofs: Vec<ProofImage>,
    /// Notes.
    pub notes: Option<String>,
}

/// Audit record of a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    /// Operator who finalized the refund.
    pub completed_by: OperatorId,
    /// When it was finalized.
    pub completed_at: DateTime<Utc>,
    /// Evidence supplied at completion.
    pub evidence: CompletionEvidence,
}

/// Audit record of a failure override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Operator who marked the refund failed.
    pub failed_by: OperatorId,
    /// When it was marked failed.
    pub failed_at: DateTime<Utc>,
    /// Why.
    pub reason: String,
}

/// The refund header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refund {
    /// Refund ID.
    pub id: RefundId,
    /// Return request this refund settles.
    pub return_request_id: ReturnRequestId,
    /// Total amount owed to the customer.
    pub refund_amount: Amount,
    /// Method the customer is repaid with.
    pub refund_method: RefundMethod,
    /// Lifecycle status.
    pub status: RefundStatus,
    /// Optional external reference.
    pub payment_reference: Option<String>,
    /// Set once completed.
    pub completion: Option<CompletionRecord>,
    /// Set once failed.
    pub failure: Option<FailureRecord>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Input for opening a refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRefundInput {
    /// Approved return request to settle.
    pub return_request_id: ReturnRequestId,
    /// Method the customer is repaid with.
    pub refund_method: RefundMethod,
    /// Amount owed; defaults to the return request total.
    pub refund_amount: Option<Decimal>,
    /// Optional external reference.
    pub payment_reference: Option<String>,
}

/// Paid/remaining figures derived from the live payment entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundTotals {
    /// Amount owed.
    pub refund_amount: Amount,
    /// Sum of live payment entries.
    pub total_paid: Amount,
    /// `refund_amount - total_paid`, never negative.
    pub remaining_amount: Amount,
    /// Settlement bucket.
    pub settlement: Settlement,
}

/// A refund with its live payment entries, as seen under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundLedger {
    /// The refund header.
    pub refund: Refund,
    /// Live payment entries in recording order.
    pub payments: Vec<PaymentEntry>,
}

/// Listing row: the refund header with derived totals, without proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundSummary {
    /// Refund ID.
    pub id: RefundId,
    /// Return request.
    pub return_request_id: ReturnRequestId,
    /// Method.
    pub refund_method: RefundMethod,
    /// Status.
    pub status: RefundStatus,
    /// External reference.
    pub payment_reference: Option<String>,
    /// Derived totals.
    pub totals: RefundTotals,
    /// Number of live payment entries.
    pub payment_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefundFilter {
    /// Only refunds in this status.
    pub status: Option<RefundStatus>,
    /// Only refunds with this method.
    pub refund_method: Option<RefundMethod>,
    /// Only refunds for this return request.
    pub return_request_id: Option<ReturnRequestId>,
    /// Case-insensitive substring of the payment reference.
    pub search: Option<String>,
}

impl RefundFilter {
    /// Returns true if the refund matches every set criterion.
    #[must_use]
    pub fn matches(&self, refund: &Refund) -> bool {
        if self.status.is_some_and(|s| s != refund.status) {
            return false;
        }
        if self.refund_method.is_some_and(|m| m != refund.refund_method) {
            return false;
        }
        if self
            .return_request_id
            .is_some_and(|id| id != refund.return_request_id)
        {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => refund
                .payment_reference
                .as_deref()
                .is_some_and(|r| r.to_lowercase().contains(&needle.to_lowercase())),
            _ => true,
        }
    }
}

/// Outcome of a completion attempt that did not hit an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    /// The refund is now completed.
    Completed(RefundLedger),
    /// Balance is settled but refund-level evidence is missing.
    RequiresPayment(PaymentRequirement),
}

/// One missing evidence field, described for the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequiredField {
    /// Wire name of the field.
    pub field: &'static str,
    /// Short label.
    pub label: &'static str,
    /// What to supply.
    pub description: &'static str,
}

/// What must be supplied before a settled refund can be completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequirement {
    /// Refund the requirement is for.
    pub refund_id: RefundId,
    /// Method whose evidence rules apply.
    pub refund_method: RefundMethod,
    /// Operator-facing explanation.
    pub message: String,
    /// Only the fields that are still missing.
    pub required_fields: Vec<RequiredField>,
}

/// Trims a free-text field, treating blank as absent.
#[must_use]
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
