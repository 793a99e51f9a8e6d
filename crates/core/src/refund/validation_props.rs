//! Property-based tests for the payment validator.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;

use crate::refund::types::{PaymentInput, ProofImageInput, RefundMethod};
use crate::refund::validation::{EvidenceField, EvidenceRule, PaymentValidator};

fn arb_method() -> impl Strategy<Value = RefundMethod> {
    prop::sample::select(RefundMethod::ALL.to_vec())
}

/// Present, blank or absent.
fn arb_field() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("   ".to_string())),
        "[A-Z0-9]{4,12}".prop_map(Some),
    ]
}

fn proof() -> ProofImageInput {
    ProofImageInput {
        file_name: "proof.jpg".into(),
        mime_type: "image/jpeg".into(),
        byte_size: 3,
        data: STANDARD.encode([1u8, 2, 3]),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The reported fields are exactly the rule table applied to what is present.
    #[test]
    fn prop_violations_follow_rule_table(
        method in arb_method(),
        utr in arb_field(),
        upi in arb_field(),
        impc in arb_field(),
        dtpf in arb_field(),
    ) {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        let rule = EvidenceRule::for_method(method);
        let expected: BTreeSet<&str> = [
            (EvidenceField::UtrNumber, present(&utr)),
            (EvidenceField::UpiId, present(&upi)),
            (EvidenceField::ImpcNumber, present(&impc)),
            (EvidenceField::CheckDtpf, present(&dtpf)),
        ]
        .into_iter()
        .filter(|(field, is_present)| {
            (*is_present && rule.forbidden.contains(field))
                || (!*is_present && rule.required.contains(field))
        })
        .map(|(field, _)| field.wire_name())
        .collect();

        let input = PaymentInput {
            transaction_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            payment_method: Some(method),
            paid_amount: Decimal::new(10_000, 2),
            utr_number: utr,
            upi_id: upi,
            impc_number: impc,
            check_dtpf: dtpf,
            payment_proofs: vec![proof()],
            notes: None,
        };
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let result = PaymentValidator::default().validate_payment(input, method, today);

        match result {
            Ok(_) => prop_assert!(expected.is_empty()),
            Err(err) => {
                let actual: BTreeSet<&str> = err.field_names().into_iter().collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
