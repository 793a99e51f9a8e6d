//! Persistence seam for the refund ledger.
//!
//! Implemented by `tally_db` on Postgres and by [`MemoryRefundStore`] in
//! process.
//!
//! [`MemoryRefundStore`]: crate::refund::MemoryRefundStore

use tally_shared::types::{PageRequest, PageResponse, RefundId, ReturnRequestId};

use crate::refund::error::RefundError;
use crate::refund::ledger::LedgerChange;
use crate::refund::types::{Refund, RefundFilter, RefundLedger, RefundSummary, ReturnRequest};

/// What a locked update decided: an optional change plus a value to hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision<T> {
    /// Change to persist, if any.
    pub change: Option<LedgerChange>,
    /// Returned to the caller alongside the resulting ledger.
    pub outcome: T,
}

impl<T> Decision<T> {
    /// Persist `change` and return `outcome`.
    #[must_use]
    pub const fn apply(change: LedgerChange, outcome: T) -> Self {
        Self {
            change: Some(change),
            outcome,
        }
    }

    /// Leave the ledger untouched and return `outcome`.
    #[must_use]
    pub const fn keep(outcome: T) -> Self {
        Self {
            change: None,
            outcome,
        }
    }
}

/// Repository trait for refund persistence.
///
/// Implementations must run [`RefundStore::update`] under an exclusive lock
/// on the refund, so that concurrent mutations of one refund serialize and
/// every decision sees the live payment set.
pub trait RefundStore: Send + Sync {
    /// Looks up the upstream return request.
    fn find_return_request(
        &self,
        id: ReturnRequestId,
    ) -> impl std::future::Future<Output = Result<Option<ReturnRequest>, RefundError>> + Send;

    /// Inserts a new refund.
    ///
    /// Fails with `DuplicateRefund` if a refund that is not `failed` already
    /// exists for the same return request; the check and insert are atomic.
    fn insert_refund(
        &self,
        refund: Refund,
    ) -> impl std::future::Future<Output = Result<RefundLedger, RefundError>> + Send;

    /// Loads a refund with its live payment entries.
    fn load(
        &self,
        id: RefundId,
    ) -> impl std::future::Future<Output = Result<Option<RefundLedger>, RefundError>> + Send;

    /// Locks the refund, lets `decide` inspect it, and persists the change it
    /// returns after re-checking the ledger invariants.
    ///
    /// Returns the decision's outcome and the ledger as it stands afterwards.
    /// Nothing is persisted when `decide` or the invariant check fails.
    fn update<T, F>(
        &self,
        id: RefundId,
        decide: F,
    ) -> impl std::future::Future<Output = Result<(T, RefundLedger), RefundError>> + Send
    where
        T: Send,
        F: FnOnce(&RefundLedger) -> Result<Decision<T>, RefundError> + Send;

    /// Lists refund summaries, newest first.
    fn list(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> impl std::future::Future<Output = Result<PageResponse<RefundSummary>, RefundError>> + Send;
}

impl RefundSummary {
    /// Builds a listing row from a loaded ledger.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the ledger is overpaid.
    pub fn from_ledger(ledger: &RefundLedger) -> Result<Self, RefundError> {
        let refund = &ledger.refund;
        Ok(Self {
            id: refund.id,
            return_request_id: refund.return_request_id,
            refund_method: refund.refund_method,
            status: refund.status,
            payment_reference: refund.payment_reference.clone(),
            totals: ledger.totals()?,
            payment_count: ledger.payments.len(),
            created_at: refund.created_at,
            updated_at: refund.updated_at,
        })
    }
}
