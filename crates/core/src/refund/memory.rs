//! In-process refund store.
//!
//! Each refund sits behind its own `tokio::sync::Mutex`, so mutations of one
//! refund serialize while different refunds proceed in parallel. Creation
//! takes a store-wide mutex to make the duplicate check and insert atomic.

use std::sync::Arc;

use dashmap::DashMap;
use tally_shared::types::{PageRequest, PageResponse, RefundId, ReturnRequestId};
use tokio::sync::Mutex;

use crate::refund::error::RefundError;
use crate::refund::store::{Decision, RefundStore};
use crate::refund::types::{
    Refund, RefundFilter, RefundLedger, RefundStatus, RefundSummary, ReturnRequest,
};

type Slot = Arc<Mutex<RefundLedger>>;

/// Refund store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRefundStore {
    return_requests: DashMap<ReturnRequestId, ReturnRequest>,
    refunds: DashMap<RefundId, Slot>,
    by_return_request: DashMap<ReturnRequestId, Vec<RefundId>>,
    creation: Mutex<()>,
}

impl MemoryRefundStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces an upstream return request.
    pub fn insert_return_request(&self, return_request: ReturnRequest) {
        self.return_requests
            .insert(return_request.id, return_request);
    }

    fn slot(&self, id: RefundId) -> Option<Slot> {
        self.refunds.get(&id).map(|slot| Arc::clone(slot.value()))
    }

    fn siblings(&self, return_request_id: ReturnRequestId) -> Vec<Slot> {
        let ids = self
            .by_return_request
            .get(&return_request_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.slot(id)).collect()
    }
}

impl RefundStore for MemoryRefundStore {
    async fn find_return_request(
        &self,
        id: ReturnRequestId,
    ) -> Result<Option<ReturnRequest>, RefundError> {
        Ok(self.return_requests.get(&id).map(|r| r.value().clone()))
    }

    async fn insert_refund(&self, refund: Refund) -> Result<RefundLedger, RefundError> {
        let _creation = self.creation.lock().await;

        for sibling in self.siblings(refund.return_request_id) {
            let existing = sibling.lock().await;
            if existing.refund.status != RefundStatus::Failed {
                return Err(RefundError::DuplicateRefund {
                    return_request_id: refund.return_request_id,
                    existing_refund_id: existing.refund.id,
                });
            }
        }

        let ledger = RefundLedger {
            refund,
            payments: Vec::new(),
        };
        ledger.totals()?;

        let id = ledger.refund.id;
        let return_request_id = ledger.refund.return_request_id;
        self.refunds
            .insert(id, Arc::new(Mutex::new(ledger.clone())));
        self.by_return_request
            .entry(return_request_id)
            .or_default()
            .push(id);
        Ok(ledger)
    }

    async fn load(&self, id: RefundId) -> Result<Option<RefundLedger>, RefundError> {
        match self.slot(id) {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn update<T, F>(&self, id: RefundId, decide: F) -> Result<(T, RefundLedger), RefundError>
    where
        T: Send,
        F: FnOnce(&RefundLedger) -> Result<Decision<T>, RefundError> + Send,
    {
        let slot = self.slot(id).ok_or(RefundError::RefundNotFound(id))?;
        let mut ledger = slot.lock().await;

        let Decision { change, outcome } = decide(&ledger)?;
        if let Some(change) = change {
            *ledger = ledger.applied(&change)?;
        }
        Ok((outcome, ledger.clone()))
    }

    async fn list(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> Result<PageResponse<RefundSummary>, RefundError> {
        let slots: Vec<Slot> = self
            .refunds
            .iter()
            .map(|slot| Arc::clone(slot.value()))
            .collect();

        let mut rows = Vec::new();
        for slot in slots {
            let ledger = slot.lock().await;
            if filter.matches(&ledger.refund) {
                rows.push(RefundSummary::from_ledger(&ledger)?);
            }
        }
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let page = page.clamped();
        let total = rows.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
        let items = rows.into_iter().skip(offset).take(limit).collect();
        Ok(PageResponse::new(items, page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refund::ledger::LedgerChange;
    use crate::refund::ledger::tests::{amount, cash};
    use crate::refund::types::{RefundMethod, ReturnRequestStatus};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use tally_shared::types::OperatorId;

    fn refund_for(return_request_id: ReturnRequestId, reference: Option<&str>) -> Refund {
        let now = Utc::now();
        Refund {
            id: RefundId::new(),
            return_request_id,
            refund_amount: amount(dec!(1000)),
            refund_method: RefundMethod::Cash,
            status: RefundStatus::Pending,
            payment_reference: reference.map(String::from),
            completion: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_return_requests_round_trip() {
        let store = MemoryRefundStore::new();
        let return_request = ReturnRequest {
            id: ReturnRequestId::new(),
            total_return_amount: amount(dec!(1000)),
            status: ReturnRequestStatus::Approved,
        };
        store.insert_return_request(return_request.clone());
        assert_eq!(
            store.find_return_request(return_request.id).await.unwrap(),
            Some(return_request)
        );
        assert_eq!(
            store.find_return_request(ReturnRequestId::new()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_second_live_refund_is_duplicate() {
        let store = MemoryRefundStore::new();
        let return_request_id = ReturnRequestId::new();
        let first = store
            .insert_refund(refund_for(return_request_id, None))
            .await
            .unwrap();

        let err = store
            .insert_refund(refund_for(return_request_id, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RefundError::DuplicateRefund { existing_refund_id, .. }
                if existing_refund_id == first.refund.id
        ));
    }

    #[tokio::test]
    async fn test_failed_refund_frees_return_request() {
        let store = MemoryRefundStore::new();
        let return_request_id = ReturnRequestId::new();
        let first = store
            .insert_refund(refund_for(return_request_id, None))
            .await
            .unwrap();

        store
            .update(first.refund.id, |ledger| {
                let change = ledger.plan_failure("wrong account".into(), OperatorId::new(), Utc::now())?;
                Ok(Decision::apply(change, ()))
            })
            .await
            .unwrap();

        assert!(
            store
                .insert_refund(refund_for(return_request_id, None))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_update_unknown_refund() {
        let store = MemoryRefundStore::new();
        let id = RefundId::new();
        let result = store.update(id, |_| Ok(Decision::keep(()))).await;
        assert!(matches!(result, Err(RefundError::RefundNotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_rejected_change_is_not_persisted() {
        let store = MemoryRefundStore::new();
        let ledger = store
            .insert_refund(refund_for(ReturnRequestId::new(), None))
            .await
            .unwrap();
        let id = ledger.refund.id;

        let bogus = LedgerChange::RetractPayment {
            payment_id: tally_shared::types::PaymentEntryId::new(),
            status: RefundStatus::Pending,
            at: Utc::now(),
        };
        let result = store
            .update(id, move |_| Ok(Decision::apply(bogus, ())))
            .await;
        assert!(matches!(result, Err(RefundError::InvariantViolation(_))));
        assert_eq!(store.load(id).await.unwrap(), Some(ledger));
    }

    #[tokio::test]
    async fn test_update_returns_outcome_and_ledger() {
        let store = MemoryRefundStore::new();
        let ledger = store
            .insert_refund(refund_for(ReturnRequestId::new(), None))
            .await
            .unwrap();

        let (label, after) = store
            .update(ledger.refund.id, |ledger| {
                let change = ledger.plan_payment(cash(dec!(400)), OperatorId::new(), Utc::now())?;
                Ok(Decision::apply(change, "paid"))
            })
            .await
            .unwrap();
        assert_eq!(label, "paid");
        assert_eq!(after.payments.len(), 1);
        assert_eq!(
            store.load(ledger.refund.id).await.unwrap().unwrap(),
            after
        );
    }

    #[tokio::test]
    async fn test_list_filters_orders_and_pages() {
        let store = MemoryRefundStore::new();
        let base = Utc::now();
        for (offset, reference) in [(0, "NEFT-001"), (1, "neft-002"), (2, "CASH-003")] {
            let mut refund = refund_for(ReturnRequestId::new(), Some(reference));
            refund.created_at = base + Duration::minutes(offset);
            store.insert_refund(refund).await.unwrap();
        }

        let all = store
            .list(&RefundFilter::default(), PageRequest::default())
            .await
            .unwrap();
        let references: Vec<_> = all
            .items
            .iter()
            .map(|r| r.payment_reference.clone().unwrap())
            .collect();
        assert_eq!(references, vec!["CASH-003", "neft-002", "NEFT-001"]);

        let search = RefundFilter {
            search: Some("neft".into()),
            ..RefundFilter::default()
        };
        let page = store
            .list(&search, PageRequest { page: 2, per_page: 1 })
            .await
            .unwrap();
        assert_eq!(page.meta.total, 2);
        assert_eq!(page.meta.total_pages, 2);
        assert_eq!(page.items[0].payment_reference.as_deref(), Some("NEFT-001"));

        let processing = RefundFilter {
            status: Some(RefundStatus::Processing),
            ..RefundFilter::default()
        };
        assert_eq!(
            store
                .list(&processing, PageRequest::default())
                .await
                .unwrap()
                .meta
                .total,
            0
        );
    }
}
