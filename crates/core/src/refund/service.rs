//! Refund reconciliation service.
//!
//! Orchestrates validation, the completion gate and the store. Every mutation
//! runs its decision inside [`RefundStore::update`], so the decision always
//! sees the live payment set of a locked refund.

use std::sync::Arc;

use chrono::Utc;
use tally_shared::types::{
    Amount, OperatorId, PageRequest, PageResponse, PaymentEntryId, RefundId,
};

use crate::refund::completion::{CompletionGate, GateDecision};
use crate::refund::error::RefundError;
use crate::refund::ledger::LedgerChange;
use crate::refund::store::{Decision, RefundStore};
use crate::refund::types::{
    CompletionEvidenceInput, CompletionResult, CreateRefundInput, PaymentEntry, PaymentInput,
    Refund, RefundFilter, RefundLedger, RefundStatus, RefundSummary, ReturnRequestStatus,
    non_blank,
};
use crate::refund::validation::PaymentValidator;

/// Refund service for reconciling payments against refunds.
pub struct RefundService<S: RefundStore> {
    store: Arc<S>,
    validator: PaymentValidator,
}

impl<S: RefundStore> Clone for RefundService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            validator: self.validator.clone(),
        }
    }
}

impl<S: RefundStore> RefundService<S> {
    /// Creates a new refund service.
    #[must_use]
    pub const fn new(store: Arc<S>, validator: PaymentValidator) -> Self {
        Self { store, validator }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens a refund for an approved return request.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The return request does not exist or is not approved
    /// - The amount is not positive, too precise, or above the return total
    /// - A live refund already exists for the return request
    pub async fn create_refund(&self, input: CreateRefundInput) -> Result<RefundLedger, RefundError> {
        let return_request = self
            .store
            .find_return_request(input.return_request_id)
            .await?
            .ok_or(RefundError::ReturnRequestNotFound(input.return_request_id))?;

        if return_request.status != ReturnRequestStatus::Approved {
            return Err(RefundError::ReturnRequestNotApproved {
                return_request_id: return_request.id,
                status: return_request.status,
            });
        }

        let refund_amount = match input.refund_amount {
            Some(value) => Amount::new(value).map_err(|e| RefundError::InvalidAmount {
                reason: e.to_string(),
            })?,
            None => return_request.total_return_amount,
        };
        if !refund_amount.is_positive() {
            return Err(RefundError::InvalidAmount {
                reason: "refund amount must be greater than zero".to_string(),
            });
        }
        if refund_amount > return_request.total_return_amount {
            return Err(RefundError::InvalidAmount {
                reason: format!(
                    "refund amount {refund_amount} exceeds the approved return total {}",
                    return_request.total_return_amount
                ),
            });
        }

        let now = Utc::now();
        self.store
            .insert_refund(Refund {
                id: RefundId::new(),
                return_request_id: return_request.id,
                refund_amount,
                refund_method: input.refund_method,
                status: RefundStatus::Pending,
                payment_reference: non_blank(input.payment_reference),
                completion: None,
                failure: None,
                created_at: now,
                updated_at: now,
            })
            .await
    }

    /// Reads a refund with its live entries. Pure read, no side effects.
    ///
    /// # Errors
    ///
    /// Returns `RefundNotFound`, or `InvariantViolation` if the stored entries
    /// overpay the refund.
    pub async fn get_refund(&self, refund_id: RefundId) -> Result<RefundLedger, RefundError> {
        let ledger = self
            .store
            .load(refund_id)
            .await?
            .ok_or(RefundError::RefundNotFound(refund_id))?;
        ledger.totals()?;
        Ok(ledger)
    }

    /// Validates and records a payment.
    ///
    /// Returns the new entry and the ledger after it was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The refund does not exist or is completed/failed
    /// - The payment fails validation for its method
    /// - The payment exceeds the remaining amount
    pub async fn add_payment(
        &self,
        refund_id: RefundId,
        input: PaymentInput,
        recorded_by: OperatorId,
    ) -> Result<(PaymentEntry, RefundLedger), RefundError> {
        let validator = &self.validator;
        let now = Utc::now();

        self.store
            .update(refund_id, move |ledger| {
                ledger.ensure_open()?;
                let payment = validator.validate_payment(
                    input,
                    ledger.refund.refund_method,
                    now.date_naive(),
                )?;
                let change = ledger.plan_payment(payment, recorded_by, now)?;
                let LedgerChange::AppendPayment { entry, .. } = &change else {
                    return Err(RefundError::InvariantViolation(
                        "payment planned as a different change".to_string(),
                    ));
                };
                let entry = entry.clone();
                Ok(Decision::apply(change, entry))
            })
            .await
    }

    /// Hard-deletes a payment entry.
    ///
    /// # Errors
    ///
    /// Returns `RefundNotFound`, `RefundClosed` or `PaymentNotFound`.
    pub async fn retract_payment(
        &self,
        refund_id: RefundId,
        payment_id: PaymentEntryId,
    ) -> Result<RefundLedger, RefundError> {
        let now = Utc::now();
        let ((), ledger) = self
            .store
            .update(refund_id, move |ledger| {
                let change = ledger.plan_retraction(payment_id, now)?;
                Ok(Decision::apply(change, ()))
            })
            .await?;
        Ok(ledger)
    }

    /// Attempts to complete a refund.
    ///
    /// A fully paid refund with missing refund-level evidence is not an
    /// error: the result is [`CompletionResult::RequiresPayment`] and nothing
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns `RefundNotFound`, `RefundClosed`, `InsufficientPayment`, or a
    /// validation error for malformed evidence images.
    pub async fn attempt_complete(
        &self,
        refund_id: RefundId,
        evidence: Option<CompletionEvidenceInput>,
        completed_by: OperatorId,
    ) -> Result<CompletionResult, RefundError> {
        let validator = &self.validator;
        let now = Utc::now();

        let (requirement, ledger) = self
            .store
            .update(refund_id, move |ledger| {
                match CompletionGate::evaluate(ledger, evidence, validator, completed_by, now)? {
                    GateDecision::Complete(change) => Ok(Decision::apply(change, None)),
                    GateDecision::RequiresPayment(requirement) => {
                        Ok(Decision::keep(Some(requirement)))
                    }
                }
            })
            .await?;

        Ok(match requirement {
            Some(requirement) => CompletionResult::RequiresPayment(requirement),
            None => CompletionResult::Completed(ledger),
        })
    }

    /// Marks a refund failed. External override, not part of reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` for a blank reason, `RefundNotFound` or
    /// `RefundClosed`.
    pub async fn mark_failed(
        &self,
        refund_id: RefundId,
        reason: &str,
        failed_by: OperatorId,
    ) -> Result<RefundLedger, RefundError> {
        let reason = PaymentValidator::validate_reason(reason)?;
        let now = Utc::now();
        let ((), ledger) = self
            .store
            .update(refund_id, move |ledger| {
                let change = ledger.plan_failure(reason, failed_by, now)?;
                Ok(Decision::apply(change, ()))
            })
            .await?;
        Ok(ledger)
    }

    /// Lists refunds, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub async fn list_refunds(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> Result<PageResponse<RefundSummary>, RefundError> {
        self.store.list(filter, page.clamped()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refund::memory::MemoryRefundStore;
    use crate::refund::types::{
        PaymentInput, ProofImageInput, RefundMethod, ReturnRequest, Settlement,
    };
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tally_shared::types::ReturnRequestId;

    fn proof() -> ProofImageInput {
        let bytes = b"RIFF\0\0\0\0WEBPVP8 ";
        ProofImageInput {
            file_name: "receipt.webp".into(),
            mime_type: "image/webp".into(),
            byte_size: bytes.len() as u64,
            data: STANDARD.encode(bytes),
        }
    }

    fn payment(method: RefundMethod, paid: Decimal) -> PaymentInput {
        PaymentInput {
            transaction_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            payment_method: Some(method),
            paid_amount: paid,
            utr_number: None,
            upi_id: None,
            impc_number: None,
            check_dtpf: None,
            payment_proofs: vec![proof()],
            notes: None,
        }
    }

    fn bank_payment(paid: Decimal) -> PaymentInput {
        PaymentInput {
            impc_number: Some("IMP1".into()),
            check_dtpf: Some("DTPF1".into()),
            ..payment(RefundMethod::BankTransfer, paid)
        }
    }

    fn service_with(
        total: Decimal,
        status: ReturnRequestStatus,
    ) -> (RefundService<MemoryRefundStore>, ReturnRequestId) {
        let store = MemoryRefundStore::new();
        let id = ReturnRequestId::new();
        store.insert_return_request(ReturnRequest {
            id,
            total_return_amount: Amount::new(total).unwrap(),
            status,
        });
        (
            RefundService::new(Arc::new(store), PaymentValidator::default()),
            id,
        )
    }

    async fn open_refund(
        service: &RefundService<MemoryRefundStore>,
        return_request_id: ReturnRequestId,
        method: RefundMethod,
        amount: Option<Decimal>,
    ) -> RefundLedger {
        service
            .create_refund(CreateRefundInput {
                return_request_id,
                refund_method: method,
                refund_amount: amount,
                payment_reference: None,
            })
            .await
            .unwrap()
    }

    fn remaining(ledger: &RefundLedger) -> Decimal {
        ledger.totals().unwrap().remaining_amount.value()
    }

    #[tokio::test]
    async fn test_create_defaults_to_return_total() {
        let (service, rr) = service_with(dec!(2499.50), ReturnRequestStatus::Approved);
        let ledger = open_refund(&service, rr, RefundMethod::Cash, None).await;
        assert_eq!(ledger.refund.refund_amount.value(), dec!(2499.50));
        assert_eq!(ledger.refund.status, RefundStatus::Pending);
        assert_eq!(ledger.totals().unwrap().settlement, Settlement::Unpaid);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_amounts() {
        let (service, rr) = service_with(dec!(1000), ReturnRequestStatus::Approved);
        for amount in [dec!(0), dec!(-1), dec!(1000.01), dec!(10.001)] {
            let result = service
                .create_refund(CreateRefundInput {
                    return_request_id: rr,
                    refund_method: RefundMethod::Cash,
                    refund_amount: Some(amount),
                    payment_reference: None,
                })
                .await;
            assert!(
                matches!(result, Err(RefundError::InvalidAmount { .. })),
                "{amount} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_create_requires_approved_return_request() {
        let (service, rr) = service_with(dec!(1000), ReturnRequestStatus::Pending);
        let result = service
            .create_refund(CreateRefundInput {
                return_request_id: rr,
                refund_method: RefundMethod::Cash,
                refund_amount: None,
                payment_reference: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(RefundError::ReturnRequestNotApproved {
                status: ReturnRequestStatus::Pending,
                ..
            })
        ));

        let missing = ReturnRequestId::new();
        let result = service
            .create_refund(CreateRefundInput {
                return_request_id: missing,
                refund_method: RefundMethod::Cash,
                refund_amount: None,
                payment_reference: None,
            })
            .await;
        assert!(matches!(result, Err(RefundError::ReturnRequestNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_duplicate_refund_rejected() {
        let (service, rr) = service_with(dec!(1000), ReturnRequestStatus::Approved);
        let first = open_refund(&service, rr, RefundMethod::Cash, None).await;
        let result = service
            .create_refund(CreateRefundInput {
                return_request_id: rr,
                refund_method: RefundMethod::Upi,
                refund_amount: None,
                payment_reference: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(RefundError::DuplicateRefund { existing_refund_id, .. })
                if existing_refund_id == first.refund.id
        ));
    }

    #[tokio::test]
    async fn test_bank_transfer_reconciliation_flow() {
        let (service, rr) = service_with(dec!(10000), ReturnRequestStatus::Approved);
        let operator = OperatorId::new();
        let refund = open_refund(&service, rr, RefundMethod::BankTransfer, None).await;
        let id = refund.refund.id;

        let (entry, ledger) = service
            .add_payment(id, bank_payment(dec!(6000)), operator)
            .await
            .unwrap();
        assert_eq!(entry.recorded_by, operator);
        assert_eq!(remaining(&ledger), dec!(4000));
        assert_eq!(ledger.refund.status, RefundStatus::Processing);

        let err = service.attempt_complete(id, None, operator).await.unwrap_err();
        assert!(matches!(
            err,
            RefundError::InsufficientPayment { remaining_amount }
                if remaining_amount.value() == dec!(4000)
        ));

        let (_, ledger) = service
            .add_payment(id, bank_payment(dec!(4000)), operator)
            .await
            .unwrap();
        assert_eq!(remaining(&ledger), dec!(0));
        assert_eq!(ledger.totals().unwrap().settlement, Settlement::Settled);

        let CompletionResult::RequiresPayment(requirement) =
            service.attempt_complete(id, None, operator).await.unwrap()
        else {
            panic!("expected a payment requirement");
        };
        assert_eq!(requirement.refund_method, RefundMethod::BankTransfer);
        assert!(!requirement.required_fields.is_empty());
        assert_eq!(
            service.get_refund(id).await.unwrap().refund.status,
            RefundStatus::Processing
        );

        let evidence = CompletionEvidenceInput {
            utr_number: Some("UTR-778812".into()),
            payment_proofs: vec![proof()],
            ..CompletionEvidenceInput::default()
        };
        let CompletionResult::Completed(ledger) = service
            .attempt_complete(id, Some(evidence), operator)
            .await
            .unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(ledger.refund.status, RefundStatus::Completed);
        let completion = ledger.refund.completion.unwrap();
        assert_eq!(completion.completed_by, operator);
        assert_eq!(completion.evidence.utr_number.as_deref(), Some("UTR-778812"));
    }

    #[tokio::test]
    async fn test_overshoot_leaves_totals_untouched() {
        let (service, rr) = service_with(dec!(500), ReturnRequestStatus::Approved);
        let refund = open_refund(&service, rr, RefundMethod::Cash, None).await;

        let err = service
            .add_payment(
                refund.refund.id,
                payment(RefundMethod::Cash, dec!(600)),
                OperatorId::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RefundError::ExceedsRemaining { remaining_amount }
                if remaining_amount.value() == dec!(500)
        ));
        let ledger = service.get_refund(refund.refund.id).await.unwrap();
        assert_eq!(ledger.totals().unwrap().total_paid, Amount::ZERO);
        assert!(ledger.payments.is_empty());
    }

    #[tokio::test]
    async fn test_upi_payment_without_upi_id() {
        let (service, rr) = service_with(dec!(800), ReturnRequestStatus::Approved);
        let refund = open_refund(&service, rr, RefundMethod::Upi, None).await;
        let err = service
            .add_payment(
                refund.refund.id,
                payment(RefundMethod::Upi, dec!(100)),
                OperatorId::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.field_names(), vec!["upiId"]);
    }

    #[tokio::test]
    async fn test_payment_without_proofs() {
        let (service, rr) = service_with(dec!(800), ReturnRequestStatus::Approved);
        let refund = open_refund(&service, rr, RefundMethod::Cash, None).await;
        let mut input = payment(RefundMethod::Cash, dec!(100));
        input.payment_proofs.clear();
        let err = service
            .add_payment(refund.refund.id, input, OperatorId::new())
            .await
            .unwrap_err();
        assert_eq!(err.field_names(), vec!["paymentProofs"]);
    }

    #[tokio::test]
    async fn test_completed_refund_is_immutable() {
        let (service, rr) = service_with(dec!(300), ReturnRequestStatus::Approved);
        let operator = OperatorId::new();
        let refund = open_refund(&service, rr, RefundMethod::Cash, None).await;
        let id = refund.refund.id;
        let (entry, _) = service
            .add_payment(id, payment(RefundMethod::Cash, dec!(300)), operator)
            .await
            .unwrap();
        let CompletionResult::Completed(completed) =
            service.attempt_complete(id, None, operator).await.unwrap()
        else {
            panic!("expected completion");
        };

        let closed = |err: RefundError| {
            matches!(
                err,
                RefundError::RefundClosed {
                    status: RefundStatus::Completed,
                    ..
                }
            )
        };
        assert!(closed(
            service
                .add_payment(id, payment(RefundMethod::Cash, dec!(1)), operator)
                .await
                .unwrap_err()
        ));
        assert!(closed(service.retract_payment(id, entry.id).await.unwrap_err()));
        assert!(closed(
            service.attempt_complete(id, None, operator).await.unwrap_err()
        ));
        assert!(closed(
            service.mark_failed(id, "too late", operator).await.unwrap_err()
        ));
        assert_eq!(service.get_refund(id).await.unwrap(), completed);
    }

    #[tokio::test]
    async fn test_retraction_restores_previous_totals() {
        let (service, rr) = service_with(dec!(1000), ReturnRequestStatus::Approved);
        let operator = OperatorId::new();
        let refund = open_refund(&service, rr, RefundMethod::Cash, None).await;
        let id = refund.refund.id;
        let (_, before) = service
            .add_payment(id, payment(RefundMethod::Cash, dec!(250)), operator)
            .await
            .unwrap();

        let (entry, _) = service
            .add_payment(id, payment(RefundMethod::Cash, dec!(125.75)), operator)
            .await
            .unwrap();
        let after = service.retract_payment(id, entry.id).await.unwrap();
        assert_eq!(after.totals().unwrap(), before.totals().unwrap());
        assert_eq!(after.refund.status, RefundStatus::Processing);

        let err = service.retract_payment(id, entry.id).await.unwrap_err();
        assert!(matches!(err, RefundError::PaymentNotFound(missing) if missing == entry.id));
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let (service, rr) = service_with(dec!(1000), ReturnRequestStatus::Approved);
        let refund = open_refund(&service, rr, RefundMethod::Cash, None).await;
        service
            .add_payment(
                refund.refund.id,
                payment(RefundMethod::Cash, dec!(333.33)),
                OperatorId::new(),
            )
            .await
            .unwrap();
        let first = service.get_refund(refund.refund.id).await.unwrap();
        let second = service.get_refund(refund.refund.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.totals().unwrap(), second.totals().unwrap());
    }

    #[tokio::test]
    async fn test_mark_failed_then_reopen() {
        let (service, rr) = service_with(dec!(1000), ReturnRequestStatus::Approved);
        let operator = OperatorId::new();
        let refund = open_refund(&service, rr, RefundMethod::Cheque, None).await;

        let err = service
            .mark_failed(refund.refund.id, " ", operator)
            .await
            .unwrap_err();
        assert_eq!(err.field_names(), vec!["reason"]);

        let failed = service
            .mark_failed(refund.refund.id, "cheque bounced", operator)
            .await
            .unwrap();
        assert_eq!(failed.refund.status, RefundStatus::Failed);
        assert_eq!(
            failed.refund.failure.unwrap().reason,
            "cheque bounced".to_string()
        );

        let replacement = open_refund(&service, rr, RefundMethod::BankTransfer, None).await;
        assert_ne!(replacement.refund.id, refund.refund.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_payments_never_overshoot() {
        let (service, rr) = service_with(dec!(1000), ReturnRequestStatus::Approved);
        let refund = open_refund(&service, rr, RefundMethod::Cash, None).await;
        let id = refund.refund.id;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..25 {
            let service = service.clone();
            tasks.spawn(async move {
                service
                    .add_payment(id, payment(RefundMethod::Cash, dec!(100)), OperatorId::new())
                    .await
            });
        }

        let mut accepted = 0;
        let mut rejected = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(_) => accepted += 1,
                Err(RefundError::ExceedsRemaining { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }

        assert_eq!(accepted, 10);
        assert_eq!(rejected, 15);
        let ledger = service.get_refund(id).await.unwrap();
        let totals = ledger.totals().unwrap();
        assert_eq!(totals.total_paid.value(), dec!(1000));
        assert!(totals.remaining_amount.is_zero());
    }

    #[tokio::test]
    async fn test_list_refunds() {
        let (service, rr) = service_with(dec!(1000), ReturnRequestStatus::Approved);
        let refund = open_refund(&service, rr, RefundMethod::Upi, None).await;
        let filter = RefundFilter {
            refund_method: Some(RefundMethod::Upi),
            ..RefundFilter::default()
        };
        let page = service
            .list_refunds(&filter, PageRequest { page: 0, per_page: 500 })
            .await
            .unwrap();
        assert_eq!(page.meta.page, 1);
        assert_eq!(page.meta.per_page, PageRequest::MAX_PER_PAGE);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, refund.refund.id);
    }
}
