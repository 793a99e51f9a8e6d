//! Refund payment reconciliation.
//!
//! A refund for a fixed amount is settled through any number of partial
//! payments, each on its own instrument with its own evidence rules. The
//! refund may only be completed once payments reconcile exactly.
//!
//! # Modules
//!
//! - `types` - Refund, payment entry and totals types
//! - `error` - Reconciliation error taxonomy
//! - `validation` - Per-method payment entry validator
//! - `ledger` - Totals derivation and mutation planning
//! - `completion` - Completion gate and evidence requirements
//! - `store` - Persistence seam
//! - `memory` - In-process store
//! - `service` - Orchestration

pub mod completion;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod service;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
mod ledger_props;
#[cfg(test)]
mod validation_props;

pub use completion::{CompletionGate, GateDecision};
pub use error::{FieldViolation, RefundError, ViolationReason};
pub use ledger::LedgerChange;
pub use memory::MemoryRefundStore;
pub use service::RefundService;
pub use store::{Decision, RefundStore};
pub use types::{
    CompletionEvidence, CompletionEvidenceInput, CompletionRecord, CompletionResult,
    CreateRefundInput, FailureRecord, PaymentEntry, PaymentInput, PaymentRequirement, ProofImage,
    ProofImageInput, Refund, RefundFilter, RefundLedger, RefundMethod, RefundStatus,
    RefundSummary, RefundTotals, RequiredField, ReturnRequest, ReturnRequestStatus, Settlement,
    ValidatedPayment,
};
pub use validation::{EvidenceField, EvidenceRule, PaymentValidator};
