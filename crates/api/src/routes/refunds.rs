//! Refund reconciliation routes.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{delete, get, post, put},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tally_core::refund::{
    CompletionEvidence, CompletionEvidenceInput, CompletionResult, CreateRefundInput,
    PaymentEntry, PaymentInput, ProofImage, ProofImageInput, RefundError, RefundFilter,
    RefundLedger, RefundMethod, RefundStatus, RefundStore, RefundSummary, Settlement,
};
use tally_shared::{
    AppError,
    types::{
        Amount, OperatorId, PageRequest, PaymentEntryId, RefundId, ReturnRequestId,
    },
};

use crate::{
    AppState,
    error::{ApiError, ApiResult, respond},
    extractors::{ApiJson, ApiPath, ApiQuery},
    middleware::Operator,
};

/// Creates the refund routes.
pub fn routes<S: RefundStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        .route("/refunds", get(list_refunds::<S>))
        .route("/refunds/{id}", post(create_refund::<S>))
        .route(
            "/refunds/{id}/payments",
            get(get_payments::<S>).post(add_payment::<S>),
        )
        .route(
            "/refunds/{id}/payments/{payment_id}",
            delete(retract_payment::<S>),
        )
        .route("/refunds/{id}/complete", put(complete_refund::<S>))
        .route("/refunds/{id}/fail", put(fail_refund::<S>))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for opening a refund.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRefundRequest {
    /// Method the customer is repaid with.
    pub refund_method: RefundMethod,
    /// Amount owed; defaults to the return request total.
    pub refund_amount: Option<Decimal>,
    /// External reference.
    pub payment_reference: Option<String>,
}

/// A proof image as submitted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofImageRequest {
    /// Original file name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Size of the decoded payload.
    pub byte_size: u64,
    /// Base64 payload or data URL.
    pub data: String,
}

impl From<ProofImageRequest> for ProofImageInput {
    fn from(req: ProofImageRequest) -> Self {
        Self {
            file_name: req.file_name,
            mime_type: req.mime_type,
            byte_size: req.byte_size,
            data: req.data,
        }
    }
}

/// Request body for recording a payment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPaymentRequest {
    /// Date the money moved.
    pub transaction_date: NaiveDate,
    /// Method; defaults to the refund's method.
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
    #[serde(rename = "checkDTPF")]
    pub check_dtpf: Option<String>,
    /// Proof images.
    #[serde(default)]
    pub payment_proofs: Vec<ProofImageRequest>,
    /// Notes.
    pub notes: Option<String>,
}

impl From<AddPaymentRequest> for PaymentInput {
    fn from(req: AddPaymentRequest) -> Self {
        Self {
            transaction_date: req.transaction_date,
            payment_method: req.payment_method,
            paid_amount: req.paid_amount,
            utr_number: req.utr_number,
            upi_id: req.upi_id,
            impc_number: req.impc_number,
            check_dtpf: req.check_dtpf,
            payment_proofs: req.payment_proofs.into_iter().map(Into::into).collect(),
            notes: req.notes,
        }
    }
}

/// Refund-level evidence supplied at completion.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetailsRequest {
    /// Consolidated bank reference.
    pub utr_number: Option<String>,
    /// UPI ID.
    pub upi_id: Option<String>,
    /// Proof images.
    #[serde(default)]
    pub payment_proofs: Vec<ProofImageRequest>,
    /// Notes.
    pub notes: Option<String>,
}

impl From<PaymentDetailsRequest> for CompletionEvidenceInput {
    fn from(req: PaymentDetailsRequest) -> Self {
        Self {
            utr_number: req.utr_number,
            upi_id: req.upi_id,
            payment_proofs: req.payment_proofs.into_iter().map(Into::into).collect(),
            notes: req.notes,
        }
    }
}

/// Request body for completing a refund. The body itself is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRefundRequest {
    /// Evidence, when the method requires it.
    pub payment_details: Option<PaymentDetailsRequest>,
}

/// Request body for marking a refund failed.
#[derive(Debug, Deserialize)]
pub struct FailRefundRequest {
    /// Why the refund failed.
    pub reason: String,
}

/// Query parameters for the refund listing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRefundsQuery {
    /// Status filter.
    pub status: Option<String>,
    /// Method filter.
    pub refund_method: Option<String>,
    /// Return request filter.
    pub return_request_id: Option<Uuid>,
    /// Case-insensitive search over the payment reference.
    pub search: Option<String>,
    /// Page number (1-based).
    pub page: Option<u32>,
    /// Page size. `per_page` is the pagination wire name elsewhere.
    #[serde(alias = "per_page")]
    pub per_page: Option<u32>,
}

/// A stored proof image.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofImageResponse {
    /// File name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Decoded size.
    pub byte_size: u64,
    /// Base64 payload.
    pub data: String,
}

impl From<&ProofImage> for ProofImageResponse {
    fn from(image: &ProofImage) -> Self {
        Self {
            file_name: image.file_name.clone(),
            mime_type: image.mime_type.clone(),
            byte_size: image.byte_size(),
            data: STANDARD.encode(&image.data),
        }
    }
}

/// A recorded payment entry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEntryResponse {
    /// Entry ID.
    pub id: PaymentEntryId,
    /// Owning refund.
    pub refund_id: RefundId,
    /// Date the money moved.
    pub transaction_date: NaiveDate,
    /// Method used.
    pub payment_method: RefundMethod,
    /// Amount paid.
    pub paid_amount: Amount,
    /// Bank reference.
    pub utr_number: Option<String>,
    /// UPI ID.
    pub upi_id: Option<String>,
    /// IMPS reference.
    pub impc_number: Option<String>,
    /// Cheque number.
    #[serde(rename = "checkDTPF")]
    pub check_dtpf: Option<String>,
    /// Proof images.
    pub payment_proofs: Vec<ProofImageResponse>,
    /// Notes.
    pub notes: Option<String>,
    /// Operator who recorded it.
    pub recorded_by: OperatorId,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

impl From<&PaymentEntry> for PaymentEntryResponse {
    fn from(entry: &PaymentEntry) -> Self {
        Self {
            id: entry.id,
            refund_id: entry.refund_id,
            transaction_date: entry.transaction_date,
            payment_method: entry.payment_method,
            paid_amount: entry.paid_amount,
            utr_number: entry.utr_number.clone(),
            upi_id: entry.upi_id.clone(),
            impc_number: entry.impc_number.clone(),
            check_dtpf: entry.check_dtpf.clone(),
            payment_proofs: entry.payment_proofs.iter().map(Into::into).collect(),
            notes: entry.notes.clone(),
            recorded_by: entry.recorded_by,
            created_at: entry.created_at,
        }
    }
}

/// Evidence captured at completion.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionDetailsResponse {
    /// Consolidated bank reference.
    pub utr_number: Option<String>,
    /// UPI ID.
    pub upi_id: Option<String>,
    /// Proof images.
    pub payment_proofs: Vec<ProofImageResponse>,
    /// Notes.
    pub notes: Option<String>,
}

impl From<&CompletionEvidence> for CompletionDetailsResponse {
    fn from(evidence: &CompletionEvidence) -> Self {
        Self {
            utr_number: evidence.utr_number.clone(),
            upi_id: evidence.upi_id.clone(),
            payment_proofs: evidence.payment_proofs.iter().map(Into::into).collect(),
            notes: evidence.notes.clone(),
        }
    }
}

/// A refund header with derived totals.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    /// Refund ID.
    pub id: RefundId,
    /// Return request settled by this refund.
    pub return_request_id: ReturnRequestId,
    /// Amount owed.
    pub refund_amount: Amount,
    /// Method.
    pub refund_method: RefundMethod,
    /// Lifecycle status.
    pub status: RefundStatus,
    /// External reference.
    pub payment_reference: Option<String>,
    /// Sum of live payment entries.
    pub total_paid_amount: Amount,
    /// Amount still owed.
    pub remaining_amount: Amount,
    /// Settlement bucket.
    pub settlement: Settlement,
    /// Completing operator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<OperatorId>,
    /// Completion time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Evidence captured at completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_details: Option<CompletionDetailsResponse>,
    /// Operator who marked the refund failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_by: Option<OperatorId>,
    /// Failure time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl RefundResponse {
    fn from_ledger(ledger: &RefundLedger) -> Result<Self, RefundError> {
        let totals = ledger.totals()?;
        let refund = &ledger.refund;
        let completion = refund.completion.as_ref();
        let failure = refund.failure.as_ref();
        Ok(Self {
            id: refund.id,
            return_request_id: refund.return_request_id,
            refund_amount: refund.refund_amount,
            refund_method: refund.refund_method,
            status: refund.status,
            payment_reference: refund.payment_reference.clone(),
            total_paid_amount: totals.total_paid,
            remaining_amount: totals.remaining_amount,
            settlement: totals.settlement,
            completed_by: completion.map(|c| c.completed_by),
            completed_at: completion.map(|c| c.completed_at),
            payment_details: completion.map(|c| (&c.evidence).into()),
            failed_by: failure.map(|f| f.failed_by),
            failed_at: failure.map(|f| f.failed_at),
            failure_reason: failure.map(|f| f.reason.clone()),
            created_at: refund.created_at,
            updated_at: refund.updated_at,
        })
    }
}

/// A refund with its live payment entries.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    /// Refund header with totals.
    pub refund: RefundResponse,
    /// Live payment entries, oldest first.
    pub payments: Vec<PaymentEntryResponse>,
}

impl LedgerResponse {
    fn from_ledger(ledger: &RefundLedger) -> Result<Self, RefundError> {
        Ok(Self {
            refund: RefundResponse::from_ledger(ledger)?,
            payments: ledger.payments.iter().map(Into::into).collect(),
        })
    }
}

/// Response for a recorded payment.
#[derive(Debug, Serialize)]
pub struct AddPaymentResponse {
    /// The new entry.
    pub payment: PaymentEntryResponse,
    /// The refund after recording it.
    pub refund: RefundResponse,
}

/// Listing row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSummaryResponse {
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
    /// Amount owed.
    pub refund_amount: Amount,
    /// Sum of live payment entries.
    pub total_paid_amount: Amount,
    /// Amount still owed.
    pub remaining_amount: Amount,
    /// Settlement bucket.
    pub settlement: Settlement,
    /// Live payment entries.
    pub payment_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl From<RefundSummary> for RefundSummaryResponse {
    fn from(summary: RefundSummary) -> Self {
        Self {
            id: summary.id,
            return_request_id: summary.return_request_id,
            refund_method: summary.refund_method,
            status: summary.status,
            payment_reference: summary.payment_reference,
            refund_amount: summary.totals.refund_amount,
            total_paid_amount: summary.totals.total_paid,
            remaining_amount: summary.totals.remaining_amount,
            settlement: summary.totals.settlement,
            payment_count: summary.payment_count,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_filter(query: &ListRefundsQuery) -> Result<RefundFilter, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            RefundStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown refund status: {s}")))
        })
        .transpose()?;
    let refund_method = query
        .refund_method
        .as_deref()
        .map(|m| {
            RefundMethod::parse(m)
                .ok_or_else(|| AppError::BadRequest(format!("unknown refund method: {m}")))
        })
        .transpose()?;
    Ok(RefundFilter {
        status,
        refund_method,
        return_request_id: query.return_request_id.map(ReturnRequestId::from_uuid),
        search: query.search.clone(),
    })
}

fn page_request(query: &ListRefundsQuery) -> PageRequest {
    let defaults = PageRequest::default();
    PageRequest {
        page: query.page.unwrap_or(defaults.page),
        per_page: query.per_page.unwrap_or(defaults.per_page),
    }
}

fn parse_complete_body(body: &[u8]) -> Result<CompleteRefundRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CompleteRefundRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(e.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /refunds/{returnRequestId}
async fn create_refund<S: RefundStore + 'static>(
    State(state): State<AppState<S>>,
    operator: Operator,
    ApiPath(return_request_id): ApiPath<ReturnRequestId>,
    ApiJson(req): ApiJson<CreateRefundRequest>,
) -> ApiResult<Response> {
    let ledger = state
        .refunds
        .create_refund(CreateRefundInput {
            return_request_id,
            refund_method: req.refund_method,
            refund_amount: req.refund_amount,
            payment_reference: req.payment_reference,
        })
        .await?;

    info!(
        refund_id = %ledger.refund.id,
        return_request_id = %return_request_id,
        operator_id = %operator.id(),
        "Refund opened"
    );
    Ok(respond(
        StatusCode::CREATED,
        LedgerResponse::from_ledger(&ledger)?,
    ))
}

/// GET /refunds/{refundId}/payments
async fn get_payments<S: RefundStore + 'static>(
    State(state): State<AppState<S>>,
    ApiPath(refund_id): ApiPath<RefundId>,
) -> ApiResult<Response> {
    let ledger = state.refunds.get_refund(refund_id).await?;
    Ok(respond(StatusCode::OK, LedgerResponse::from_ledger(&ledger)?))
}

/// POST /refunds/{refundId}/payments
async fn add_payment<S: RefundStore + 'static>(
    State(state): State<AppState<S>>,
    operator: Operator,
    ApiPath(refund_id): ApiPath<RefundId>,
    ApiJson(req): ApiJson<AddPaymentRequest>,
) -> ApiResult<Response> {
    let (entry, ledger) = state
        .refunds
        .add_payment(refund_id, req.into(), operator.id())
        .await?;

    info!(
        refund_id = %refund_id,
        payment_id = %entry.id,
        paid_amount = %entry.paid_amount,
        "Payment recorded"
    );
    Ok(respond(
        StatusCode::CREATED,
        AddPaymentResponse {
            payment: (&entry).into(),
            refund: RefundResponse::from_ledger(&ledger)?,
        },
    ))
}

/// DELETE /refunds/{refundId}/payments/{paymentEntryId}
async fn retract_payment<S: RefundStore + 'static>(
    State(state): State<AppState<S>>,
    operator: Operator,
    ApiPath((refund_id, payment_id)): ApiPath<(RefundId, PaymentEntryId)>,
) -> ApiResult<Response> {
    let ledger = state.refunds.retract_payment(refund_id, payment_id).await?;

    info!(
        refund_id = %refund_id,
        payment_id = %payment_id,
        operator_id = %operator.id(),
        "Payment retracted"
    );
    Ok(respond(StatusCode::OK, LedgerResponse::from_ledger(&ledger)?))
}

/// PUT /refunds/{refundId}/complete
async fn complete_refund<S: RefundStore + 'static>(
    State(state): State<AppState<S>>,
    operator: Operator,
    ApiPath(refund_id): ApiPath<RefundId>,
    body: Bytes,
) -> ApiResult<Response> {
    let req = parse_complete_body(&body)?;
    let evidence = req.payment_details.map(Into::into);

    match state
        .refunds
        .attempt_complete(refund_id, evidence, operator.id())
        .await?
    {
        CompletionResult::Completed(ledger) => {
            info!(refund_id = %refund_id, operator_id = %operator.id(), "Refund completed");
            Ok(respond(StatusCode::OK, LedgerResponse::from_ledger(&ledger)?))
        }
        CompletionResult::RequiresPayment(requirement) => {
            info!(
                refund_id = %refund_id,
                missing = requirement.required_fields.len(),
                "Refund completion needs evidence"
            );
            Err(ApiError::RequiresPayment(requirement))
        }
    }
}

/// PUT /refunds/{refundId}/fail
async fn fail_refund<S: RefundStore + 'static>(
    State(state): State<AppState<S>>,
    operator: Operator,
    ApiPath(refund_id): ApiPath<RefundId>,
    ApiJson(req): ApiJson<FailRefundRequest>,
) -> ApiResult<Response> {
    let ledger = state
        .refunds
        .mark_failed(refund_id, &req.reason, operator.id())
        .await?;

    info!(refund_id = %refund_id, operator_id = %operator.id(), "Refund marked failed");
    Ok(respond(StatusCode::OK, LedgerResponse::from_ledger(&ledger)?))
}

/// GET /refunds
async fn list_refunds<S: RefundStore + 'static>(
    State(state): State<AppState<S>>,
    ApiQuery(query): ApiQuery<ListRefundsQuery>,
) -> ApiResult<Response> {
    let filter = parse_filter(&query)?;
    let page = state
        .refunds
        .list_refunds(&filter, page_request(&query))
        .await?
        .map(RefundSummaryResponse::from);
    Ok(respond(StatusCode::OK, page))
}
