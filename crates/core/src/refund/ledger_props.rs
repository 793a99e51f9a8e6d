//! Property-based tests for ledger arithmetic.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::types::OperatorId;

use crate::refund::error::RefundError;
use crate::refund::ledger::tests::{cash, open_ledger};
use crate::refund::types::{RefundLedger, RefundMethod, RefundStatus};

#[derive(Debug, Clone)]
enum Op {
    Pay(Decimal),
    Retract(usize),
}

/// Amounts in minor units between 0.01 and 5000.00.
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=500_000).prop_map(|minor| Decimal::new(minor, 2))
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_amount().prop_map(Op::Pay),
        1 => any::<usize>().prop_map(Op::Retract),
    ]
}

fn step(ledger: &RefundLedger, op: &Op) -> Result<RefundLedger, RefundError> {
    let change = match op {
        Op::Pay(amount) => ledger.plan_payment(cash(*amount), OperatorId::new(), Utc::now())?,
        Op::Retract(index) => {
            if ledger.payments.is_empty() {
                return Ok(ledger.clone());
            }
            let id = ledger.payments[index % ledger.payments.len()].id;
            ledger.plan_retraction(id, Utc::now())?
        }
    };
    ledger.applied(&change)
}

proptest! {
    #![proptest_config(ProptestConfig { max_global_rejects: 10_000, ..ProptestConfig::with_cases(200) })]

    /// paid + remaining == amount and 0 <= remaining after every operation.
    #[test]
    fn prop_totals_always_reconcile(
        refund_amount in arb_amount(),
        ops in prop::collection::vec(arb_op(), 0..40),
    ) {
        let mut ledger = open_ledger(refund_amount, RefundMethod::Cash);
        for op in &ops {
            match step(&ledger, op) {
                Ok(next) => ledger = next,
                Err(RefundError::ExceedsRemaining { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
            let totals = ledger.totals().unwrap();
            prop_assert_eq!(
                totals.total_paid.value() + totals.remaining_amount.value(),
                refund_amount
            );
            prop_assert!(!totals.remaining_amount.is_negative());
            prop_assert_eq!(
                ledger.refund.status,
                RefundStatus::for_payment_count(ledger.payments.len())
            );
        }
    }

    /// A rejected payment leaves the ledger exactly as it was.
    #[test]
    fn prop_overshoot_rejected_without_change(
        refund_amount in arb_amount(),
        paid in arb_amount(),
        extra in arb_amount(),
    ) {
        prop_assume!(paid <= refund_amount);
        let ledger = open_ledger(refund_amount, RefundMethod::Cash);
        let ledger = step(&ledger, &Op::Pay(paid)).unwrap();
        let remaining = ledger.totals().unwrap().remaining_amount;

        let overshoot = remaining.value() + extra;
        match ledger.plan_payment(cash(overshoot), OperatorId::new(), Utc::now()) {
            Err(RefundError::ExceedsRemaining { remaining_amount }) => {
                prop_assert_eq!(remaining_amount, remaining);
            }
            other => prop_assert!(false, "expected ExceedsRemaining, got {:?}", other),
        }
    }

    /// Adding then retracting a payment restores the totals exactly.
    #[test]
    fn prop_add_then_retract_restores_totals(
        refund_amount in arb_amount(),
        first in arb_amount(),
        second in arb_amount(),
    ) {
        prop_assume!(first + second <= refund_amount);
        let ledger = open_ledger(refund_amount, RefundMethod::Cash);
        let ledger = step(&ledger, &Op::Pay(first)).unwrap();
        let before = ledger.totals().unwrap();

        let paid = step(&ledger, &Op::Pay(second)).unwrap();
        let last = paid.payments.len() - 1;
        let restored = step(&paid, &Op::Retract(last)).unwrap();
        prop_assert_eq!(restored.totals().unwrap(), before);
    }
}
