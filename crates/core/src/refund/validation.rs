//! Payment entry validation.
//!
//! Each payment method requires some instrument fields and forbids others.
//! The validator reports every violation at once so a form can highlight all
//! of them in a single round trip.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tally_shared::LedgerConfig;
use tally_shared::types::Amount;

use crate::refund::error::{FieldViolation, RefundError};
use crate::refund::types::{
    CompletionEvidence, CompletionEvidenceInput, PaymentInput, ProofImage, ProofImageInput,
    RefundMethod, ValidatedPayment, non_blank,
};

/// Instrument-specific evidence fields on a payment entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvidenceField {
    /// Bank reference.
    UtrNumber,
    /// UPI ID.
    UpiId,
    /// IMPS reference.
    ImpcNumber,
    /// Cheque number.
    CheckDtpf,
}

impl EvidenceField {
    /// All evidence fields.
    pub const ALL: [Self; 4] = [Self::UtrNumber, Self::UpiId, Self::ImpcNumber, Self::CheckDtpf];

    /// Wire name of the field.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::UtrNumber => "utrNumber",
            Self::UpiId => "upiId",
            Self::ImpcNumber => "impcNumber",
            Self::CheckDtpf => "checkDTPF",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::UtrNumber => "UTR number",
            Self::UpiId => "UPI ID",
            Self::ImpcNumber => "IMPS number",
            Self::CheckDtpf => "Cheque DTPF",
        }
    }
}

/// Required and forbidden evidence for one payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvidenceRule {
    /// Must be present and non-blank.
    pub required: &'static [EvidenceField],
    /// Must be absent or blank.
    pub forbidden: &'static [EvidenceField],
}

impl EvidenceRule {
    /// Returns the rule for a payment method.
    #[must_use]
    pub const fn for_method(method: RefundMethod) -> Self {
        use EvidenceField::{CheckDtpf, ImpcNumber, UpiId, UtrNumber};
        match method {
            RefundMethod::Cash | RefundMethod::Cheque => Self {
                required: &[],
                forbidden: &[UtrNumber, UpiId, ImpcNumber, CheckDtpf],
            },
            RefundMethod::Upi => Self {
                required: &[UpiId],
                forbidden: &[ImpcNumber, CheckDtpf],
            },
            RefundMethod::BankTransfer => Self {
                required: &[ImpcNumber, CheckDtpf],
                forbidden: &[UpiId],
            },
        }
    }
}

/// Validates payment entries and completion evidence against the configured
/// proof image limits.
#[derive(Debug, Clone)]
pub struct PaymentValidator {
    allowed_mime_types: Vec<String>,
    max_proof_bytes: u64,
    max_proofs: usize,
}

impl Default for PaymentValidator {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

/// Collected violations. Unsupported MIME types are kept apart so they can be
/// reported as `UnsupportedProofFormat` when nothing else is wrong.
#[derive(Debug, Default)]
struct Report {
    violations: Vec<FieldViolation>,
    unsupported: Vec<(String, String)>,
}

impl Report {
    fn push(&mut self, violation: FieldViolation) {
        self.violations.push(violation);
    }

    fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.unsupported.is_empty()
    }

    fn into_error(self) -> RefundError {
        if self.violations.is_empty() && !self.unsupported.is_empty() {
            let mut mime_types: Vec<String> = Vec::new();
            for (_, mime) in self.unsupported {
                if !mime_types.contains(&mime) {
                    mime_types.push(mime);
                }
            }
            return RefundError::UnsupportedProofFormat { mime_types };
        }

        let mut violations = self.violations;
        violations.extend(self.unsupported.into_iter().map(|(field, mime)| {
            FieldViolation::invalid(field, format!("unsupported image type {mime}"))
        }));
        RefundError::ValidationFailed { violations }
    }
}

impl PaymentValidator {
    /// Creates a validator with explicit limits.
    #[must_use]
    pub fn new(allowed_mime_types: Vec<String>, max_proof_bytes: u64, max_proofs: usize) -> Self {
        Self {
            allowed_mime_types: allowed_mime_types
                .into_iter()
                .map(|m| m.trim().to_lowercase())
                .collect(),
            max_proof_bytes,
            max_proofs,
        }
    }

    /// Creates a validator from the `ledger` configuration section.
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(
            config.allowed_proof_mime_types.clone(),
            config.max_proof_bytes,
            config.max_proofs_per_payment,
        )
    }

    /// Validates a payment entry.
    ///
    /// `default_method` is the refund's method, used when the entry leaves its
    /// own method unset. `today` bounds the transaction date.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` listing every violation, or
    /// `UnsupportedProofFormat` when unlisted image types are the only problem.
    pub fn validate_payment(
        &self,
        input: PaymentInput,
        default_method: RefundMethod,
        today: NaiveDate,
    ) -> Result<ValidatedPayment, RefundError> {
        let mut report = Report::default();
        let payment_method = input.payment_method.unwrap_or(default_method);

        let paid_amount = match check_paid_amount(input.paid_amount) {
            Ok(amount) => Some(amount),
            Err(violation) => {
                report.push(violation);
                None
            }
        };

        if input.transaction_date > today {
            report.push(FieldViolation::invalid(
                "transactionDate",
                "Transaction date cannot be in the future",
            ));
        }

        let utr_number = non_blank(input.utr_number);
        let upi_id = non_blank(input.upi_id);
        let impc_number = non_blank(input.impc_number);
        let check_dtpf = non_blank(input.check_dtpf);

        let rule = EvidenceRule::for_method(payment_method);
        for (field, present) in [
            (EvidenceField::UtrNumber, utr_number.is_some()),
            (EvidenceField::UpiId, upi_id.is_some()),
            (EvidenceField::ImpcNumber, impc_number.is_some()),
            (EvidenceField::CheckDtpf, check_dtpf.is_some()),
        ] {
            if !present && rule.required.contains(&field) {
                report.push(FieldViolation::required(
                    field.wire_name(),
                    format!(
                        "{} is required for {} payments",
                        field.label(),
                        payment_method.label()
                    ),
                ));
            }
            if present && rule.forbidden.contains(&field) {
                report.push(FieldViolation::forbidden(
                    field.wire_name(),
                    format!(
                        "{} is not allowed for {} payments",
                        field.label(),
                        payment_method.label()
                    ),
                ));
            }
        }

        let payment_proofs = self.validate_proofs(input.payment_proofs, true, &mut report);

        match paid_amount {
            Some(paid_amount) if report.is_clean() => Ok(ValidatedPayment {
                transaction_date: input.transaction_date,
                payment_method,
                paid_amount,
                utr_number,
                upi_id,
                impc_number,
                check_dtpf,
                payment_proofs,
                notes: non_blank(input.notes),
            }),
            _ => Err(report.into_error()),
        }
    }

    /// Validates refund-level completion evidence.
    ///
    /// Only the shape of what was supplied is checked here; whether it is
    /// sufficient for the refund's method is the completion gate's call.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` or `UnsupportedProofFormat` for bad images.
    pub fn validate_evidence(
        &self,
        input: CompletionEvidenceInput,
    ) -> Result<CompletionEvidence, RefundError> {
        let mut report = Report::default();
        let payment_proofs = self.validate_proofs(input.payment_proofs, false, &mut report);
        if !report.is_clean() {
            return Err(report.into_error());
        }

        Ok(CompletionEvidence {
            utr_number: non_blank(input.utr_number),
            upi_id: non_blank(input.upi_id),
            payment_proofs,
            notes: non_blank(input.notes),
        })
    }

    /// Validates the reason given for a failure override.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` on a blank reason.
    pub fn validate_reason(reason: &str) -> Result<String, RefundError> {
        non_blank(Some(reason.to_string())).ok_or_else(|| RefundError::ValidationFailed {
            violations: vec![FieldViolation::required(
                "reason",
                "A reason is required to mark a refund failed",
            )],
        })
    }

    fn validate_proofs(
        &self,
        proofs: Vec<ProofImageInput>,
        required: bool,
        report: &mut Report,
    ) -> Vec<ProofImage> {
        if required && proofs.is_empty() {
            report.push(FieldViolation::required(
                "paymentProofs",
                "At least one payment proof image is required",
            ));
        }
        if proofs.len() > self.max_proofs {
            report.push(FieldViolation::invalid(
                "paymentProofs",
                format!("At most {} proof images are allowed", self.max_proofs),
            ));
        }

        let mut accepted = Vec::with_capacity(proofs.len());
        for (index, proof) in proofs.into_iter().enumerate() {
            if let Some(image) = self.validate_proof(index, proof, report) {
                accepted.push(image);
            }
        }
        accepted
    }

    fn validate_proof(
        &self,
        index: usize,
        proof: ProofImageInput,
        report: &mut Report,
    ) -> Option<ProofImage> {
        let field = |name: &str| format!("paymentProofs[{index}].{name}");
        let mut ok = true;

        let file_name = proof.file_name.trim().to_string();
        if file_name.is_empty() {
            report.push(FieldViolation::required(
                field("fileName"),
                "File name is required",
            ));
            ok = false;
        }

        let mime_type = proof.mime_type.trim().to_lowercase();
        if !self.allowed_mime_types.contains(&mime_type) {
            report.unsupported.push((field("mimeType"), mime_type.clone()));
            ok = false;
        }

        if proof.byte_size == 0 {
            report.push(FieldViolation::invalid(
                field("byteSize"),
                "Image must not be empty",
            ));
            return None;
        }
        if proof.byte_size > self.max_proof_bytes {
            report.push(FieldViolation::invalid(
                field("byteSize"),
                format!("Image exceeds the {} byte limit", self.max_proof_bytes),
            ));
            return None;
        }

        let data = match STANDARD.decode(strip_data_url(&proof.data)) {
            Ok(data) => data,
            Err(_) => {
                report.push(FieldViolation::invalid(
                    field("data"),
                    "Image data is not valid base64",
                ));
                return None;
            }
        };
        if data.len() as u64 != proof.byte_size {
            report.push(FieldViolation::invalid(
                field("byteSize"),
                format!(
                    "Declared {} bytes but the image has {}",
                    proof.byte_size,
                    data.len()
                ),
            ));
            return None;
        }

        ok.then_some(ProofImage {
            file_name,
            mime_type,
            data,
        })
    }
}

fn check_paid_amount(value: Decimal) -> Result<Amount, FieldViolation> {
    let amount = Amount::new(value)
        .map_err(|e| FieldViolation::invalid("paidAmount", e.to_string()))?;
    if !amount.is_positive() {
        return Err(FieldViolation::invalid(
            "paidAmount",
            "Paid amount must be greater than zero",
        ));
    }
    Ok(amount)
}

/// Accepts both bare base64 and `data:<mime>;base64,<payload>` URLs.
fn strip_data_url(data: &str) -> &str {
    let data = data.trim();
    if data.starts_with("data:") {
        data.split_once(',').map_or(data, |(_, payload)| payload)
    } else {
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    fn png(name: &str) -> ProofImageInput {
        let bytes = b"\x89PNG\r\n\x1a\nproof".to_vec();
        ProofImageInput {
            file_name: name.to_string(),
            mime_type: "image/png".to_string(),
            byte_size: bytes.len() as u64,
            data: STANDARD.encode(&bytes),
        }
    }

    fn payment(method: RefundMethod) -> PaymentInput {
        PaymentInput {
            transaction_date: today(),
            payment_method: Some(method),
            paid_amount: dec!(6000),
            utr_number: None,
            upi_id: None,
            impc_number: None,
            check_dtpf: None,
            payment_proofs: vec![png("slip.png")],
            notes: None,
        }
    }

    fn fields(err: &RefundError) -> Vec<String> {
        err.field_names().into_iter().map(String::from).collect()
    }

    #[test]
    fn test_cash_payment_passes() {
        let validated = PaymentValidator::default()
            .validate_payment(payment(RefundMethod::Cash), RefundMethod::Cash, today())
            .unwrap();
        assert_eq!(validated.paid_amount.value(), dec!(6000));
        assert_eq!(validated.payment_proofs.len(), 1);
        assert_eq!(validated.payment_proofs[0].byte_size(), 13);
    }

    #[test]
    fn test_upi_without_upi_id_names_only_upi_id() {
        let err = PaymentValidator::default()
            .validate_payment(payment(RefundMethod::Upi), RefundMethod::Upi, today())
            .unwrap_err();
        assert_eq!(fields(&err), vec!["upiId"]);
    }

    #[test]
    fn test_zero_proofs_names_payment_proofs() {
        let mut input = payment(RefundMethod::Cash);
        input.payment_proofs.clear();
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Cash, today())
            .unwrap_err();
        assert_eq!(fields(&err), vec!["paymentProofs"]);
    }

    #[rstest]
    #[case(RefundMethod::Cash, Some("UTR1"), None, None, None, vec!["utrNumber"])]
    #[case(RefundMethod::Cheque, None, Some("shop@upi"), None, Some("DTPF1"), vec!["upiId", "checkDTPF"])]
    #[case(RefundMethod::Upi, Some("UTR1"), Some("shop@upi"), Some("IMP1"), None, vec!["impcNumber"])]
    #[case(RefundMethod::BankTransfer, None, None, None, None, vec!["impcNumber", "checkDTPF"])]
    #[case(RefundMethod::BankTransfer, None, Some("shop@upi"), Some("IMP1"), Some("DTPF1"), vec!["upiId"])]
    fn test_method_rules(
        #[case] method: RefundMethod,
        #[case] utr: Option<&str>,
        #[case] upi: Option<&str>,
        #[case] impc: Option<&str>,
        #[case] dtpf: Option<&str>,
        #[case] expected: Vec<&str>,
    ) {
        let mut input = payment(method);
        input.utr_number = utr.map(String::from);
        input.upi_id = upi.map(String::from);
        input.impc_number = impc.map(String::from);
        input.check_dtpf = dtpf.map(String::from);
        let err = PaymentValidator::default()
            .validate_payment(input, method, today())
            .unwrap_err();
        assert_eq!(fields(&err), expected);
    }

    #[test]
    fn test_bank_transfer_with_references_passes() {
        let mut input = payment(RefundMethod::BankTransfer);
        input.impc_number = Some("IMP1".into());
        input.check_dtpf = Some("DTPF1".into());
        input.utr_number = Some("UTR1".into());
        let validated = PaymentValidator::default()
            .validate_payment(input, RefundMethod::BankTransfer, today())
            .unwrap();
        assert_eq!(validated.impc_number.as_deref(), Some("IMP1"));
        assert_eq!(validated.utr_number.as_deref(), Some("UTR1"));
    }

    #[test]
    fn test_blank_strings_count_as_absent() {
        let mut input = payment(RefundMethod::Upi);
        input.upi_id = Some("   ".into());
        input.check_dtpf = Some("".into());
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Upi, today())
            .unwrap_err();
        assert_eq!(fields(&err), vec!["upiId"]);
    }

    #[test]
    fn test_method_defaults_to_refund_method() {
        let mut input = payment(RefundMethod::Cash);
        input.payment_method = None;
        input.upi_id = Some("shop@upi".into());
        let validated = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Upi, today())
            .unwrap();
        assert_eq!(validated.payment_method, RefundMethod::Upi);
    }

    #[rstest]
    #[case(dec!(0))]
    #[case(dec!(-10))]
    #[case(dec!(10.005))]
    fn test_paid_amount_rejected(#[case] amount: Decimal) {
        let mut input = payment(RefundMethod::Cash);
        input.paid_amount = amount;
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Cash, today())
            .unwrap_err();
        assert_eq!(fields(&err), vec!["paidAmount"]);
    }

    #[test]
    fn test_future_transaction_date_rejected() {
        let mut input = payment(RefundMethod::Cash);
        input.transaction_date = today().succ_opt().unwrap();
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Cash, today())
            .unwrap_err();
        assert_eq!(fields(&err), vec!["transactionDate"]);
    }

    #[test]
    fn test_violations_are_aggregated() {
        let mut input = payment(RefundMethod::Upi);
        input.paid_amount = dec!(0);
        input.payment_proofs.clear();
        input.impc_number = Some("IMP1".into());
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Upi, today())
            .unwrap_err();
        assert_eq!(
            fields(&err),
            vec!["paidAmount", "upiId", "impcNumber", "paymentProofs"]
        );
    }

    #[test]
    fn test_unsupported_mime_alone_is_its_own_error() {
        let mut input = payment(RefundMethod::Cash);
        input.payment_proofs[0].mime_type = "image/gif".into();
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Cash, today())
            .unwrap_err();
        match err {
            RefundError::UnsupportedProofFormat { mime_types } => {
                assert_eq!(mime_types, vec!["image/gif".to_string()]);
            }
            other => panic!("expected UnsupportedProofFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_mime_types_listed_once_in_first_seen_order() {
        let mut input = payment(RefundMethod::Cash);
        let template = input.payment_proofs[0].clone();
        input.payment_proofs = ["image/gif", "image/bmp", "image/gif"]
            .into_iter()
            .map(|mime| ProofImageInput {
                mime_type: mime.into(),
                ..template.clone()
            })
            .collect();
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Cash, today())
            .unwrap_err();
        match err {
            RefundError::UnsupportedProofFormat { mime_types } => {
                assert_eq!(mime_types, vec!["image/gif", "image/bmp"]);
            }
            other => panic!("expected UnsupportedProofFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_mime_folds_into_other_violations() {
        let mut input = payment(RefundMethod::Upi);
        input.payment_proofs[0].mime_type = "application/pdf".into();
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Upi, today())
            .unwrap_err();
        assert_eq!(fields(&err), vec!["upiId", "paymentProofs[0].mimeType"]);
    }

    #[test]
    fn test_proof_payload_checks() {
        let mut input = payment(RefundMethod::Cash);
        let mut bad_base64 = png("a.png");
        bad_base64.data = "***".into();
        let mut wrong_size = png("b.png");
        wrong_size.byte_size += 1;
        let mut unnamed = png(" ");
        unnamed.byte_size = 0;
        input.payment_proofs = vec![bad_base64, wrong_size, unnamed];
        let err = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Cash, today())
            .unwrap_err();
        assert_eq!(
            fields(&err),
            vec![
                "paymentProofs[0].data",
                "paymentProofs[1].byteSize",
                "paymentProofs[2].fileName",
                "paymentProofs[2].byteSize",
            ]
        );
    }

    #[test]
    fn test_proof_limits() {
        let validator = PaymentValidator::new(vec!["image/png".into()], 8, 1);
        let mut input = payment(RefundMethod::Cash);
        input.payment_proofs.push(png("second.png"));
        let err = validator
            .validate_payment(input, RefundMethod::Cash, today())
            .unwrap_err();
        assert_eq!(
            fields(&err),
            vec![
                "paymentProofs",
                "paymentProofs[0].byteSize",
                "paymentProofs[1].byteSize",
            ]
        );
    }

    #[test]
    fn test_data_url_payload_accepted() {
        let mut input = payment(RefundMethod::Cash);
        let proof = &mut input.payment_proofs[0];
        proof.data = format!("data:image/png;base64,{}", proof.data);
        proof.mime_type = " IMAGE/PNG ".into();
        let validated = PaymentValidator::default()
            .validate_payment(input, RefundMethod::Cash, today())
            .unwrap();
        assert_eq!(validated.payment_proofs[0].mime_type, "image/png");
    }

    #[test]
    fn test_evidence_proofs_optional_but_checked() {
        let validator = PaymentValidator::default();
        let evidence = validator
            .validate_evidence(CompletionEvidenceInput {
                utr_number: Some(" UTR9 ".into()),
                ..CompletionEvidenceInput::default()
            })
            .unwrap();
        assert_eq!(evidence.utr_number.as_deref(), Some("UTR9"));
        assert!(evidence.payment_proofs.is_empty());

        let mut bad = png("x.png");
        bad.data = "!!".into();
        let err = validator
            .validate_evidence(CompletionEvidenceInput {
                payment_proofs: vec![bad],
                ..CompletionEvidenceInput::default()
            })
            .unwrap_err();
        assert_eq!(fields(&err), vec!["paymentProofs[0].data"]);
    }

    #[test]
    fn test_validate_reason() {
        assert_eq!(
            PaymentValidator::validate_reason("  customer unreachable ").unwrap(),
            "customer unreachable"
        );
        let err = PaymentValidator::validate_reason("   ").unwrap_err();
        assert_eq!(fields(&err), vec!["reason"]);
    }
}
