//! Ledger arithmetic and mutation planning.
//!
//! Every mutation is split in two: a pure decision that inspects the current
//! [`RefundLedger`] and produces a [`LedgerChange`], and
//! [`RefundLedger::applied`], which replays the change and re-checks
//! `0 <= total_paid <= refund_amount` before anything is persisted.

use chrono::{DateTime, Utc};
use tally_shared::types::{Amount, OperatorId, PaymentEntryId};

use crate::refund::error::RefundError;
use crate::refund::types::{
    CompletionRecord, FailureRecord, PaymentEntry, RefundLedger, RefundStatus, RefundTotals,
    Settlement, ValidatedPayment,
};

/// A single state change to a refund ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerChange {
    /// Record a new payment entry.
    AppendPayment {
        /// The entry to insert.
        entry: PaymentEntry,
        /// Status after the append.
        status: RefundStatus,
    },
    /// Hard-delete a payment entry.
    RetractPayment {
        /// The entry to delete.
        payment_id: PaymentEntryId,
        /// Status after the delete.
        status: RefundStatus,
        /// When the retraction happened.
        at: DateTime<Utc>,
    },
    /// Finalize the refund.
    Complete(CompletionRecord),
    /// Abandon the refund.
    Fail(FailureRecord),
}

impl LedgerChange {
    /// When the change happened; becomes the refund's `updated_at`.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::AppendPayment { entry, .. } => entry.created_at,
            Self::RetractPayment { at, .. } => *at,
            Self::Complete(record) => record.completed_at,
            Self::Fail(record) => record.failed_at,
        }
    }

    /// Status the refund will have after the change.
    #[must_use]
    pub const fn resulting_status(&self) -> RefundStatus {
        match self {
            Self::AppendPayment { status, .. } | Self::RetractPayment { status, .. } => *status,
            Self::Complete(_) => RefundStatus::Completed,
            Self::Fail(_) => RefundStatus::Failed,
        }
    }
}

impl RefundTotals {
    /// Derives totals from a refund amount and the live paid amounts.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the paid total is negative or exceeds
    /// the refund amount, or on decimal overflow.
    pub fn compute(
        refund_amount: Amount,
        paid: impl IntoIterator<Item = Amount>,
    ) -> Result<Self, RefundError> {
        let mut total_paid = Amount::ZERO;
        for amount in paid {
            total_paid = total_paid.checked_add(amount).ok_or_else(|| {
                RefundError::InvariantViolation("paid total overflowed".to_string())
            })?;
        }

        let remaining_amount = refund_amount.checked_sub(total_paid).ok_or_else(|| {
            RefundError::InvariantViolation("remaining amount overflowed".to_string())
        })?;

        if total_paid.is_negative() || remaining_amount.is_negative() {
            return Err(RefundError::InvariantViolation(format!(
                "paid {total_paid} is outside 0..={refund_amount}"
            )));
        }

        let settlement = if total_paid.is_zero() {
            Settlement::Unpaid
        } else if remaining_amount.is_zero() {
            Settlement::Settled
        } else {
            Settlement::Partial
        };

        Ok(Self {
            refund_amount,
            total_paid,
            remaining_amount,
            settlement,
        })
    }
}

impl RefundLedger {
    /// Derives totals from the live payment entries.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the entries overpay the refund.
    pub fn totals(&self) -> Result<RefundTotals, RefundError> {
        RefundTotals::compute(
            self.refund.refund_amount,
            self.payments.iter().map(|p| p.paid_amount),
        )
    }

    /// Finds a live payment entry.
    #[must_use]
    pub fn payment(&self, payment_id: PaymentEntryId) -> Option<&PaymentEntry> {
        self.payments.iter().find(|p| p.id == payment_id)
    }

    /// Rejects any mutation of a completed or failed refund.
    ///
    /// # Errors
    ///
    /// Returns `RefundClosed` for terminal refunds.
    pub fn ensure_open(&self) -> Result<(), RefundError> {
        if self.refund.status.is_terminal() {
            return Err(RefundError::RefundClosed {
                refund_id: self.refund.id,
                status: self.refund.status,
            });
        }
        Ok(())
    }

    /// Plans recording a validated payment.
    ///
    /// # Errors
    ///
    /// Returns `RefundClosed` on a terminal refund and `ExceedsRemaining` if
    /// the payment would overshoot the refund amount.
    pub fn plan_payment(
        &self,
        payment: ValidatedPayment,
        recorded_by: OperatorId,
        now: DateTime<Utc>,
    ) -> Result<LedgerChange, RefundError> {
        self.ensure_open()?;
        let totals = self.totals()?;
        if payment.paid_amount > totals.remaining_amount {
            return Err(RefundError::ExceedsRemaining {
                remaining_amount: totals.remaining_amount,
            });
        }

        let entry = PaymentEntry {
            id: PaymentEntryId::new(),
            refund_id: self.refund.id,
            transaction_date: payment.transaction_date,
            payment_method: payment.payment_method,
            paid_amount: payment.paid_amount,
            utr_number: payment.utr_number,
            upi_id: payment.upi_id,
            impc_number: payment.impc_number,
            check_dtpf: payment.check_dtpf,
            payment_proofs: payment.payment_proofs,
            notes: payment.notes,
            recorded_by,
            created_at: now,
        };

        Ok(LedgerChange::AppendPayment {
            entry,
            status: RefundStatus::Processing,
        })
    }

    /// Plans retracting a live payment entry.
    ///
    /// # Errors
    ///
    /// Returns `RefundClosed` on a terminal refund and `PaymentNotFound` if
    /// the entry is not live on this refund.
    pub fn plan_retraction(
        &self,
        payment_id: PaymentEntryId,
        now: DateTime<Utc>,
    ) -> Result<LedgerChange, RefundError> {
        self.ensure_open()?;
        if self.payment(payment_id).is_none() {
            return Err(RefundError::PaymentNotFound(payment_id));
        }

        Ok(LedgerChange::RetractPayment {
            payment_id,
            status: RefundStatus::for_payment_count(self.payments.len() - 1),
            at: now,
        })
    }

    /// Plans the failure override.
    ///
    /// # Errors
    ///
    /// Returns `RefundClosed` on a terminal refund.
    pub fn plan_failure(
        &self,
        reason: String,
        failed_by: OperatorId,
        now: DateTime<Utc>,
    ) -> Result<LedgerChange, RefundError> {
        self.ensure_open()?;
        Ok(LedgerChange::Fail(FailureRecord {
            failed_by,
            failed_at: now,
            reason,
        }))
    }

    /// Returns the ledger as it will be after `change`, with invariants
    /// re-checked.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the change targets a terminal refund,
    /// references a missing entry, or leaves the ledger overpaid.
    pub fn applied(&self, change: &LedgerChange) -> Result<Self, RefundError> {
        if self.refund.status.is_terminal() {
            return Err(RefundError::InvariantViolation(format!(
                "change planned against {} refund {}",
                self.refund.status, self.refund.id
            )));
        }

        let mut next = self.clone();
        match change {
            LedgerChange::AppendPayment { entry, .. } => {
                next.payments.push(entry.clone());
            }
            LedgerChange::RetractPayment { payment_id, .. } => {
                let before = next.payments.len();
                next.payments.retain(|p| p.id != *payment_id);
                if next.payments.len() == before {
                    return Err(RefundError::InvariantViolation(format!(
                        "retracted payment {payment_id} is not live"
                    )));
                }
            }
            LedgerChange::Complete(record) => {
                next.refund.completion = Some(record.clone());
            }
            LedgerChange::Fail(record) => {
                next.refund.failure = Some(record.clone());
            }
        }
        next.refund.status = change.resulting_status();
        next.refund.updated_at = change.occurred_at();

        let totals = next.totals()?;
        if next.refund.status == RefundStatus::Completed && !totals.remaining_amount.is_zero() {
            return Err(RefundError::InvariantViolation(format!(
                "refund {} completed with {} remaining",
                next.refund.id, totals.remaining_amount
            )));
        }

        Ok(next)
    }
}
