//! Postgres-backed refund store.
//!
//! Every mutation runs in one database transaction that starts by taking
//! `SELECT ... FOR UPDATE` on the refund row, reloads the live payment set,
//! lets the core decide, writes the change and commits. Totals are never
//! stored; they are recomputed from `refund_payments` on every read.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    AccessMode, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, IsolationLevel, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{error, instrument};
use uuid::Uuid;

use tally_core::refund::{
    CompletionEvidence, CompletionRecord, Decision, FailureRecord, LedgerChange, PaymentEntry,
    ProofImage, Refund, RefundError, RefundFilter, RefundLedger, RefundMethod, RefundStatus,
    RefundStore, RefundSummary, RefundTotals, ReturnRequest, ReturnRequestStatus,
};
use tally_shared::types::{
    Amount, OperatorId, PageRequest, PageResponse, PaymentEntryId, RefundId, ReturnRequestId,
};

use crate::entities::{
    proof_images, refund_payments, refunds, return_requests,
    sea_orm_active_enums::{
        RefundMethod as DbRefundMethod, RefundStatus as DbRefundStatus,
        ReturnRequestStatus as DbReturnRequestStatus,
    },
};

/// Refund store on Postgres.
#[derive(Debug, Clone)]
pub struct PgRefundStore {
    db: DatabaseConnection,
}

impl PgRefundStore {
    /// Creates a new refund store.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Read-only repeatable-read transaction so multi-query reads see one snapshot.
    async fn snapshot(&self) -> Result<DatabaseTransaction, RefundError> {
        self.db
            .begin_with_config(
                Some(IsolationLevel::RepeatableRead),
                Some(AccessMode::ReadOnly),
            )
            .await
            .map_err(storage)
    }

    /// Inserts or updates a return request mirror row.
    ///
    /// Used by the seeder and tests; the refund ledger itself never writes
    /// return requests.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub async fn upsert_return_request(
        &self,
        return_request: &ReturnRequest,
    ) -> Result<(), RefundError> {
        let now = Utc::now().into();
        let existing = return_requests::Entity::find_by_id(return_request.id.into_inner())
            .one(&self.db)
            .await
            .map_err(storage)?;

        let mut active = return_requests::ActiveModel {
            id: Set(return_request.id.into_inner()),
            total_return_amount: Set(return_request.total_return_amount.value()),
            status: Set(core_return_status_to_db(return_request.status)),
            updated_at: Set(now),
            ..Default::default()
        };

        if existing.is_some() {
            active.update(&self.db).await.map_err(storage)?;
        } else {
            active.created_at = Set(now);
            active.insert(&self.db).await.map_err(storage)?;
        }
        Ok(())
    }
}

impl RefundStore for PgRefundStore {
    async fn find_return_request(
        &self,
        id: ReturnRequestId,
    ) -> Result<Option<ReturnRequest>, RefundError> {
        return_requests::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(storage)?
            .map(return_request_from_model)
            .transpose()
    }

    #[instrument(skip(self, refund), fields(refund_id = %refund.id, return_request_id = %refund.return_request_id))]
    async fn insert_refund(&self, refund: Refund) -> Result<RefundLedger, RefundError> {
        let txn = self.db.begin().await.map_err(storage)?;

        // Serializes creation per return request
        return_requests::Entity::find_by_id(refund.return_request_id.into_inner())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(storage)?
            .ok_or(RefundError::ReturnRequestNotFound(refund.return_request_id))?;

        let live = refunds::Entity::find()
            .filter(refunds::Column::ReturnRequestId.eq(refund.return_request_id.into_inner()))
            .filter(refunds::Column::Status.ne(DbRefundStatus::Failed))
            .one(&txn)
            .await
            .map_err(storage)?;
        if let Some(existing) = live {
            return Err(RefundError::DuplicateRefund {
                return_request_id: refund.return_request_id,
                existing_refund_id: RefundId::from_uuid(existing.id),
            });
        }

        refunds::ActiveModel {
            id: Set(refund.id.into_inner()),
            return_request_id: Set(refund.return_request_id.into_inner()),
            refund_amount: Set(refund.refund_amount.value()),
            refund_method: Set(core_method_to_db(refund.refund_method)),
            status: Set(core_status_to_db(refund.status)),
            payment_reference: Set(refund.payment_reference.clone()),
            completion_utr_number: Set(None),
            completion_upi_id: Set(None),
            completion_notes: Set(None),
            completed_by: Set(None),
            completed_at: Set(None),
            failed_by: Set(None),
            failed_at: Set(None),
            failure_reason: Set(None),
            created_at: Set(refund.created_at.into()),
            updated_at: Set(refund.updated_at.into()),
        }
        .insert(&txn)
        .await
        .map_err(storage)?;

        txn.commit().await.map_err(storage)?;

        Ok(RefundLedger {
            refund,
            payments: Vec::new(),
        })
    }

    async fn load(&self, id: RefundId) -> Result<Option<RefundLedger>, RefundError> {
        let txn = self.snapshot().await?;
        let ledger = load_ledger(&txn, id, false).await?;
        txn.commit().await.map_err(storage)?;
        Ok(ledger)
    }

    #[instrument(skip(self, decide), fields(refund_id = %id))]
    async fn update<T, F>(&self, id: RefundId, decide: F) -> Result<(T, RefundLedger), RefundError>
    where
        T: Send,
        F: FnOnce(&RefundLedger) -> Result<Decision<T>, RefundError> + Send,
    {
        let txn = self.db.begin().await.map_err(storage)?;

        let ledger = load_ledger(&txn, id, true)
            .await?
            .ok_or(RefundError::RefundNotFound(id))?;

        let Decision { change, outcome } = decide(&ledger)?;
        let Some(change) = change else {
            txn.commit().await.map_err(storage)?;
            return Ok((outcome, ledger));
        };

        let next = ledger.applied(&change)?;
        persist_change(&txn, &next, &change).await?;
        txn.commit().await.map_err(storage)?;

        Ok((outcome, next))
    }

    async fn list(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> Result<PageResponse<RefundSummary>, RefundError> {
        let page = page.clamped();
        let mut query = refunds::Entity::find();

        if let Some(status) = filter.status {
            query = query.filter(refunds::Column::Status.eq(core_status_to_db(status)));
        }
        if let Some(method) = filter.refund_method {
            query = query.filter(refunds::Column::RefundMethod.eq(core_method_to_db(method)));
        }
        if let Some(return_request_id) = filter.return_request_id {
            query = query
                .filter(refunds::Column::ReturnRequestId.eq(return_request_id.into_inner()));
        }
        if let Some(needle) = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
            query = query.filter(
                Expr::expr(Func::lower(Expr::col(refunds::Column::PaymentReference)))
                    .like(pattern),
            );
        }

        let txn = self.snapshot().await?;
        let total = query.clone().count(&txn).await.map_err(storage)?;

        let rows = query
            .order_by_desc(refunds::Column::CreatedAt)
            .order_by_desc(refunds::Column::Id)
            .offset(page.offset())
            .limit(page.limit())
            .all(&txn)
            .await
            .map_err(storage)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let paid: Vec<(Uuid, Decimal)> = if ids.is_empty() {
            Vec::new()
        } else {
            refund_payments::Entity::find()
                .filter(refund_payments::Column::RefundId.is_in(ids))
                .select_only()
                .column(refund_payments::Column::RefundId)
                .column(refund_payments::Column::PaidAmount)
                .into_tuple()
                .all(&txn)
                .await
                .map_err(storage)?
        };
        txn.commit().await.map_err(storage)?;

        let mut paid_by_refund: HashMap<Uuid, Vec<Amount>> = HashMap::new();
        for (refund_id, amount) in paid {
            paid_by_refund
                .entry(refund_id)
                .or_default()
                .push(stored_amount(amount)?);
        }

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let amounts = paid_by_refund.remove(&row.id).unwrap_or_default();
            let payment_count = amounts.len();
            let totals = RefundTotals::compute(stored_amount(row.refund_amount)?, amounts)?;
            items.push(RefundSummary {
                id: RefundId::from_uuid(row.id),
                return_request_id: ReturnRequestId::from_uuid(row.return_request_id),
                refund_method: db_method_to_core(row.refund_method),
                status: db_status_to_core(row.status),
                payment_reference: row.payment_reference,
                totals,
                payment_count,
                created_at: row.created_at.with_timezone(&Utc),
                updated_at: row.updated_at.with_timezone(&Utc),
            });
        }

        Ok(PageResponse::new(items, page, total))
    }
}

// ============================================================================
// Loading
// ============================================================================

async fn load_ledger<C: ConnectionTrait>(
    conn: &C,
    id: RefundId,
    lock: bool,
) -> Result<Option<RefundLedger>, RefundError> {
    let mut query = refunds::Entity::find_by_id(id.into_inner());
    if lock {
        query = query.lock_exclusive();
    }
    let Some(refund) = query.one(conn).await.map_err(storage)? else {
        return Ok(None);
    };

    let payments = refund_payments::Entity::find()
        .filter(refund_payments::Column::RefundId.eq(refund.id))
        .order_by_asc(refund_payments::Column::CreatedAt)
        .order_by_asc(refund_payments::Column::Id)
        .all(conn)
        .await
        .map_err(storage)?;

    let proofs = proof_images::Entity::find()
        .filter(proof_images::Column::RefundId.eq(refund.id))
        .order_by_asc(proof_images::Column::Position)
        .all(conn)
        .await
        .map_err(storage)?;

    let mut proofs_by_owner: HashMap<Option<Uuid>, Vec<ProofImage>> = HashMap::new();
    for proof in proofs {
        proofs_by_owner
            .entry(proof.payment_entry_id)
            .or_default()
            .push(ProofImage {
                file_name: proof.file_name,
                mime_type: proof.mime_type,
                data: proof.data,
            });
    }

    let completion_proofs = proofs_by_owner.remove(&None).unwrap_or_default();
    let payments = payments
        .into_iter()
        .map(|payment| {
            let proofs = proofs_by_owner
                .remove(&Some(payment.id))
                .unwrap_or_default();
            payment_from_model(payment, proofs)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ledger = RefundLedger {
        refund: refund_from_model(refund, completion_proofs)?,
        payments,
    };
    if let Err(err) = ledger.totals() {
        error!(refund_id = %id, error = %err, "stored refund violates ledger invariants");
        return Err(err);
    }
    Ok(Some(ledger))
}

// ============================================================================
// Writing
// ============================================================================

async fn persist_change<C: ConnectionTrait>(
    conn: &C,
    next: &RefundLedger,
    change: &LedgerChange,
) -> Result<(), RefundError> {
    let refund_id = next.refund.id.into_inner();
    let mut header = refunds::ActiveModel {
        id: Set(refund_id),
        status: Set(core_status_to_db(next.refund.status)),
        updated_at: Set(next.refund.updated_at.into()),
        ..Default::default()
    };

    match change {
        LedgerChange::AppendPayment { entry, .. } => {
            refund_payments::ActiveModel {
                id: Set(entry.id.into_inner()),
                refund_id: Set(refund_id),
                transaction_date: Set(entry.transaction_date),
                payment_method: Set(core_method_to_db(entry.payment_method)),
                paid_amount: Set(entry.paid_amount.value()),
                utr_number: Set(entry.utr_number.clone()),
                upi_id: Set(entry.upi_id.clone()),
                impc_number: Set(entry.impc_number.clone()),
                check_dtpf: Set(entry.check_dtpf.clone()),
                notes: Set(entry.notes.clone()),
                recorded_by: Set(entry.recorded_by.into_inner()),
                created_at: Set(entry.created_at.into()),
            }
            .insert(conn)
            .await
            .map_err(storage)?;

            insert_proofs(conn, refund_id, Some(entry.id), &entry.payment_proofs).await?;
        }
        LedgerChange::RetractPayment { payment_id, .. } => {
            let deleted = refund_payments::Entity::delete_many()
                .filter(refund_payments::Column::Id.eq(payment_id.into_inner()))
                .filter(refund_payments::Column::RefundId.eq(refund_id))
                .exec(conn)
                .await
                .map_err(storage)?;
            if deleted.rows_affected != 1 {
                return Err(RefundError::InvariantViolation(format!(
                    "retraction of {payment_id} deleted {} rows",
                    deleted.rows_affected
                )));
            }
        }
        LedgerChange::Complete(record) => {
            header.completion_utr_number = Set(record.evidence.utr_number.clone());
            header.completion_upi_id = Set(record.evidence.upi_id.clone());
            header.completion_notes = Set(record.evidence.notes.clone());
            header.completed_by = Set(Some(record.completed_by.into_inner()));
            header.completed_at = Set(Some(record.completed_at.into()));

            insert_proofs(conn, refund_id, None, &record.evidence.payment_proofs).await?;
        }
        LedgerChange::Fail(record) => {
            header.failed_by = Set(Some(record.failed_by.into_inner()));
            header.failed_at = Set(Some(record.failed_at.into()));
            header.failure_reason = Set(Some(record.reason.clone()));
        }
    }

    header.update(conn).await.map_err(storage)?;
    Ok(())
}

async fn insert_proofs<C: ConnectionTrait>(
    conn: &C,
    refund_id: Uuid,
    payment_entry_id: Option<PaymentEntryId>,
    proofs: &[ProofImage],
) -> Result<(), RefundError> {
    if proofs.is_empty() {
        return Ok(());
    }

    let now = Utc::now().into();
    let mut models = Vec::with_capacity(proofs.len());
    for (position, proof) in proofs.iter().enumerate() {
        models.push(proof_images::ActiveModel {
            id: Set(Uuid::now_v7()),
            refund_id: Set(refund_id),
            payment_entry_id: Set(payment_entry_id.map(PaymentEntryId::into_inner)),
            position: Set(i32::try_from(position).map_err(|_| {
                RefundError::InvariantViolation("too many proof images".to_string())
            })?),
            file_name: Set(proof.file_name.clone()),
            mime_type: Set(proof.mime_type.clone()),
            byte_size: Set(i64::try_from(proof.data.len()).map_err(|_| {
                RefundError::InvariantViolation("proof image too large".to_string())
            })?),
            data: Set(proof.data.clone()),
            created_at: Set(now),
        });
    }

    proof_images::Entity::insert_many(models)
        .exec(conn)
        .await
        .map_err(storage)?;
    Ok(())
}

// ============================================================================
// Conversion helpers
// ============================================================================

fn storage(err: DbErr) -> RefundError {
    error!(error = %err, "refund store query failed");
    RefundError::Storage(err.to_string())
}

fn stored_amount(value: Decimal) -> Result<Amount, RefundError> {
    Amount::new(value)
        .map_err(|e| RefundError::InvariantViolation(format!("stored amount {value}: {e}")))
}

/// Escapes `%`, `_` and `\` for a `LIKE` pattern.
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn return_request_from_model(model: return_requests::Model) -> Result<ReturnRequest, RefundError> {
    Ok(ReturnRequest {
        id: ReturnRequestId::from_uuid(model.id),
        total_return_amount: stored_amount(model.total_return_amount)?,
        status: match model.status {
            DbReturnRequestStatus::Pending => ReturnRequestStatus::Pending,
            DbReturnRequestStatus::Approved => ReturnRequestStatus::Approved,
            DbReturnRequestStatus::Rejected => ReturnRequestStatus::Rejected,
        },
    })
}

fn refund_from_model(
    model: refunds::Model,
    completion_proofs: Vec<ProofImage>,
) -> Result<Refund, RefundError> {
    let completion = match (model.completed_by, model.completed_at) {
        (Some(completed_by), Some(completed_at)) => Some(CompletionRecord {
            completed_by: OperatorId::from_uuid(completed_by),
            completed_at: completed_at.with_timezone(&Utc),
            evidence: CompletionEvidence {
                utr_number: model.completion_utr_number,
                upi_id: model.completion_upi_id,
                payment_proofs: completion_proofs,
                notes: model.completion_notes,
            },
        }),
        _ => None,
    };

    let failure = match (model.failed_by, model.failed_at, model.failure_reason) {
        (Some(failed_by), Some(failed_at), Some(reason)) => Some(FailureRecord {
            failed_by: OperatorId::from_uuid(failed_by),
            failed_at: failed_at.with_timezone(&Utc),
            reason,
        }),
        _ => None,
    };

    Ok(Refund {
        id: RefundId::from_uuid(model.id),
        return_request_id: ReturnRequestId::from_uuid(model.return_request_id),
        refund_amount: stored_amount(model.refund_amount)?,
        refund_method: db_method_to_core(model.refund_method),
        status: db_status_to_core(model.status),
        payment_reference: model.payment_reference,
        completion,
        failure,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn payment_from_model(
    model: refund_payments::Model,
    payment_proofs: Vec<ProofImage>,
) -> Result<PaymentEntry, RefundError> {
    Ok(PaymentEntry {
        id: PaymentEntryId::from_uuid(model.id),
        refund_id: RefundId::from_uuid(model.refund_id),
        transaction_date: model.transaction_date,
        payment_method: db_method_to_core(model.payment_method),
        paid_amount: stored_amount(model.paid_amount)?,
        utr_number: model.utr_number,
        upi_id: model.upi_id,
        impc_number: model.impc_number,
        check_dtpf: model.check_dtpf,
        payment_proofs,
        notes: model.notes,
        recorded_by: OperatorId::from_uuid(model.recorded_by),
        created_at: model.created_at.with_timezone(&Utc),
    })
}

/// Converts database RefundMethod to core RefundMethod.
const fn db_method_to_core(method: DbRefundMethod) -> RefundMethod {
    match method {
        DbRefundMethod::Cash => RefundMethod::Cash,
        DbRefundMethod::Upi => RefundMethod::Upi,
        DbRefundMethod::BankTransfer => RefundMethod::BankTransfer,
        DbRefundMethod::Cheque => RefundMethod::Cheque,
    }
}

/// Converts core RefundMethod to database RefundMethod.
const fn core_method_to_db(method: RefundMethod) -> DbRefundMethod {
    match method {
        RefundMethod::Cash => DbRefundMethod::Cash,
        RefundMethod::Upi => DbRefundMethod::Upi,
        RefundMethod::BankTransfer => DbRefundMethod::BankTransfer,
        RefundMethod::Cheque => DbRefundMethod::Cheque,
    }
}

/// Converts database RefundStatus to core RefundStatus.
const fn db_status_to_core(status: DbRefundStatus) -> RefundStatus {
    match status {
        DbRefundStatus::Pending => RefundStatus::Pending,
        DbRefundStatus::Processing => RefundStatus::Processing,
        DbRefundStatus::Failed => RefundStatus::Failed,
        DbRefundStatus::Completed => RefundStatus::Completed,
    }
}

/// Converts core RefundStatus to database RefundStatus.
const fn core_status_to_db(status: RefundStatus) -> DbRefundStatus {
    match status {
        RefundStatus::Pending => DbRefundStatus::Pending,
        RefundStatus::Processing => DbRefundStatus::Processing,
        RefundStatus::Failed => DbRefundStatus::Failed,
        RefundStatus::Completed => DbRefundStatus::Completed,
    }
}

/// Converts core ReturnRequestStatus to database ReturnRequestStatus.
const fn core_return_status_to_db(status: ReturnRequestStatus) -> DbReturnRequestStatus {
    match status {
        ReturnRequestStatus::Pending => DbReturnRequestStatus::Pending,
        ReturnRequestStatus::Approved => DbReturnRequestStatus::Approved,
        ReturnRequestStatus::Rejected => DbReturnRequestStatus::Rejected,
    }
}
