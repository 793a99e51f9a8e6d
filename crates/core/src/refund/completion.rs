//! Completion gate.
//!
//! A refund may only be completed once it is fully paid. Methods that move
//! money electronically additionally need refund-level evidence; when that is
//! missing the gate answers with a [`PaymentRequirement`] naming exactly what
//! to supply instead of failing.

use chrono::{DateTime, Utc};
use tally_shared::types::OperatorId;

use crate::refund::error::RefundError;
use crate::refund::ledger::LedgerChange;
use crate::refund::types::{
    CompletionEvidence, CompletionEvidenceInput, CompletionRecord, PaymentRequirement,
    RefundLedger, RefundMethod, RequiredField,
};
use crate::refund::validation::PaymentValidator;

const UPI_ID: RequiredField = RequiredField {
    field: "upiId",
    label: "UPI ID",
    description: "UPI ID the refund was sent to",
};

const UTR_NUMBER: RequiredField = RequiredField {
    field: "utrNumber",
    label: "UTR number",
    description: "Consolidated UTR or IMPS reference for the refund transfer",
};

const PAYMENT_PROOFS: RequiredField = RequiredField {
    field: "paymentProofs",
    label: "Payment proof",
    description: "At least one screenshot or photo of the transfer confirmation",
};

/// What the gate decided for a fully paid, open refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Evidence is sufficient; apply this change.
    Complete(LedgerChange),
    /// Evidence is missing; nothing changes.
    RequiresPayment(PaymentRequirement),
}

/// Decides whether a refund may transition to `completed`.
pub struct CompletionGate;

impl CompletionGate {
    /// Refund-level evidence a method needs before completion.
    #[must_use]
    pub const fn requirements(method: RefundMethod) -> &'static [RequiredField] {
        match method {
            RefundMethod::Cash | RefundMethod::Cheque => &[],
            RefundMethod::Upi => &[UPI_ID, PAYMENT_PROOFS],
            RefundMethod::BankTransfer => &[UTR_NUMBER, PAYMENT_PROOFS],
        }
    }

    /// The subset of [`Self::requirements`] not covered by `evidence`.
    #[must_use]
    pub fn missing(method: RefundMethod, evidence: &CompletionEvidence) -> Vec<RequiredField> {
        Self::requirements(method)
            .iter()
            .filter(|required| match required.field {
                "upiId" => evidence.upi_id.is_none(),
                "utrNumber" => evidence.utr_number.is_none(),
                "paymentProofs" => evidence.payment_proofs.is_empty(),
                _ => false,
            })
            .copied()
            .collect()
    }

    /// Runs the gate: open, then fully paid, then evidence.
    ///
    /// # Errors
    ///
    /// Returns `RefundClosed` on a terminal refund, `InsufficientPayment`
    /// while money is owed, and `ValidationFailed`/`UnsupportedProofFormat`
    /// when supplied proof images are malformed.
    pub fn evaluate(
        ledger: &RefundLedger,
        evidence: Option<CompletionEvidenceInput>,
        validator: &PaymentValidator,
        completed_by: OperatorId,
        now: DateTime<Utc>,
    ) -> Result<GateDecision, RefundError> {
        ledger.ensure_open()?;

        let totals = ledger.totals()?;
        if !totals.remaining_amount.is_zero() {
            return Err(RefundError::InsufficientPayment {
                remaining_amount: totals.remaining_amount,
            });
        }

        let evidence = match evidence {
            Some(input) => validator.validate_evidence(input)?,
            None => CompletionEvidence::default(),
        };

        let method = ledger.refund.refund_method;
        let missing = Self::missing(method, &evidence);
        if !missing.is_empty() {
            let labels: Vec<&str> = missing.iter().map(|f| f.label).collect();
            return Ok(GateDecision::RequiresPayment(PaymentRequirement {
                refund_id: ledger.refund.id,
                refund_method: method,
                message: format!(
                    "{} refunds need {} before they can be completed",
                    method.label(),
                    labels.join(" and ")
                ),
                required_fields: missing,
            }));
        }

        Ok(GateDecision::Complete(LedgerChange::Complete(
            CompletionRecord {
                completed_by,
                completed_at: now,
                evidence,
            },
        )))
    }
}
