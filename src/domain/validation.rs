//! Pure, side-effect free checks on a payment request.

use super::account::BankAccount;
use super::payment::PaymentRequest;
use crate::error::RailError;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapses the report into the first blocking error.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, RailError> {
        match self.errors.into_iter().next() {
            None => Ok(self.warnings),
            Some(issue) if issue.field == "amount" => Err(RailError::PaymentRejected(issue.message)),
            Some(issue) => Err(RailError::InvalidAccount(format!(
                "{}: {}",
                issue.field, issue.message
            ))),
        }
    }

    fn error(&mut self, code: &'static str, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            code,
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, code: &'static str, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            code,
            message: message.into(),
        });
    }
}

/// Checks amount and both accounts. Every rule runs, so the report lists
/// all problems at once.
pub fn validate_payment(request: &PaymentRequest) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !request.amount.is_positive() {
        report.error("INVALID_AMOUNT", "amount", "Amount must be positive");
    }
    if request.amount.currency().is_crypto() {
        report.warn(
            "CRYPTO_SETTLEMENT",
            format!("{} settles outside fiat rails", request.amount.currency()),
        );
    }

    validate_account(&mut report, "debtor", &request.debtor);
    validate_account(&mut report, "creditor", &request.creditor);

    if request.debtor == request.creditor {
        report.warn("SAME_ACCOUNT", "Debtor and creditor are the same account");
    }

    report
}

fn validate_account(report: &mut ValidationReport, field: &str, account: &BankAccount) {
    if account.account_holder_name.trim().is_empty() {
        report.error(
            "MISSING_HOLDER",
            &format!("{field}.account_holder_name"),
            "Account holder name is required",
        );
    }

    if let Some(iban) = account.iban() {
        if !is_valid_iban(iban) {
            report.error(
                "INVALID_IBAN",
                &format!("{field}.iban"),
                format!("Invalid IBAN: {}", iban),
            );
        }
        match account.swift_code() {
            Some(bic) if !is_valid_bic(bic) => report.error(
                "INVALID_BIC",
                &format!("{field}.swift_code"),
                format!("Invalid BIC: {}", bic),
            ),
            Some(_) => {}
            None => report.warn("MISSING_BIC", format!("{field} has an IBAN but no BIC")),
        }
    } else if let Some(number) = account.account_number() {
        if number.len() < 5 {
            report.error(
                "ACCOUNT_NUMBER_TOO_SHORT",
                &format!("{field}.account_number"),
                "Account number too short",
            );
        }
        match account.routing_number() {
            Some(routing) if !is_valid_us_routing_number(routing) => report.error(
                "INVALID_ROUTING_NUMBER",
                &format!("{field}.routing_number"),
                format!("Invalid routing number: {}", routing),
            ),
            Some(_) => {}
            None => report.warn(
                "MISSING_ROUTING_NUMBER",
                format!("{field} has an account number but no routing number"),
            ),
        }
    } else {
        report.error(
            "MISSING_ACCOUNT_IDENTIFIER",
            field,
            "Either IBAN or account number must be provided",
        );
    }
}

/// Structure, per-country length, and the ISO 13616 mod-97 checksum.
pub fn is_valid_iban(iban: &str) -> bool {
    let normalized: String = iban
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let bytes = normalized.as_bytes();

    if bytes.len() < 5
        || !bytes[..2].iter().all(u8::is_ascii_uppercase)
        || !bytes[2..4].iter().all(u8::is_ascii_digit)
        || !bytes[4..].iter().all(u8::is_ascii_alphanumeric)
    {
        return false;
    }

    if let Some(expected) = expected_iban_length(&normalized[..2])
        && normalized.len() != expected
    {
        return false;
    }

    // Rearranged as BBAN + country + check digits, letters expanded to 10..35,
    // reduced digit by digit so no bignum is needed.
    let rearranged = normalized[4..].bytes().chain(normalized[..4].bytes());
    let mut remainder: u32 = 0;
    for b in rearranged {
        if b.is_ascii_digit() {
            remainder = (remainder * 10 + u32::from(b - b'0')) % 97;
        } else {
            let value = u32::from(b - b'A') + 10;
            remainder = (remainder * 100 + value) % 97;
        }
    }
    remainder == 1
}

fn expected_iban_length(country: &str) -> Option<usize> {
    let len = match country {
        "AD" => 24,
        "AT" | "BA" | "EE" | "LT" | "XK" | "KZ" => 20,
        "AZ" | "BR" | "PS" | "QA" | "VA" | "EG" | "GE" | "LC" | "UA" => 29,
        "BE" | "GL" => 16,
        "BG" | "GB" | "IE" | "JO" | "MC" | "TN" | "DE" | "LU" | "ME" | "MK" | "RS" | "SA" => 22,
        "CH" | "CR" | "LI" | "LV" | "MZ" => 21,
        "CY" | "KW" | "MD" | "PK" | "SV" | "TL" | "DO" | "GT" | "HU" | "PL" => 28,
        "CZ" | "ES" | "NO" | "SE" | "SK" | "RO" => 24,
        "DK" | "FI" | "FO" | "NL" => 18,
        "FR" | "GI" | "GR" | "IT" | "PT" | "SM" => 27,
        "HR" | "SI" => 19,
        "IL" => 23,
        "IS" | "TR" => 26,
        "MT" => 31,
        "MU" => 30,
        _ => return None,
    };
    Some(len)
}

/// 6 letters (bank + country) followed by 2 alphanumerics and an optional
/// 3 character branch code.
pub fn is_valid_bic(bic: &str) -> bool {
    let bic = bic.trim().to_ascii_uppercase();
    let bytes = bic.as_bytes();
    (bytes.len() == 8 || bytes.len() == 11)
        && bytes[..6].iter().all(u8::is_ascii_uppercase)
        && bytes[6..].iter().all(u8::is_ascii_alphanumeric)
}

/// Nine digits with the ABA 3-7-1 weighted checksum.
pub fn is_valid_us_routing_number(routing: &str) -> bool {
    let bytes = routing.as_bytes();
    if bytes.len() != 9 || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }
    const WEIGHTS: [u32; 9] = [3, 7, 1, 3, 7, 1, 3, 7, 1];
    let sum: u32 = bytes
        .iter()
        .zip(WEIGHTS)
        .map(|(b, w)| u32::from(b - b'0') * w)
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Currency, Money};
    use rust_decimal_macros::dec;

    fn iban_account(name: &str, iban: &str) -> BankAccount {
        BankAccount::from_iban(name, iban, Some("DEUTDEFF".into())).unwrap()
    }

    #[test]
    fn test_iban_checksum() {
        assert!(is_valid_iban("DE89370400440532013000"));
        assert!(is_valid_iban("GB82 WEST 1234 5698 7654 32"));
        assert!(is_valid_iban("gb82west12345698765432"));
        // Wrong check digits
        assert!(!is_valid_iban("DE88370400440532013000"));
        // Wrong length for DE
        assert!(!is_valid_iban("DE8937040044053201300"));
        assert!(!is_valid_iban(""));
    }

    #[test]
    fn test_bic_format() {
        assert!(is_valid_bic("DEUTDEFF"));
        assert!(is_valid_bic("DEUTDEFF500"));
        assert!(!is_valid_bic("DEUT"));
        assert!(!is_valid_bic("1EUTDEFF"));
    }

    #[test]
    fn test_routing_checksum() {
        assert!(is_valid_us_routing_number("021000021"));
        assert!(is_valid_us_routing_number("011000015"));
        assert!(!is_valid_us_routing_number("021000022"));
        assert!(!is_valid_us_routing_number("02100002"));
    }

    #[test]
    fn test_valid_request_has_no_errors() {
        let request = PaymentRequest::new(
            Money::new(dec!(100.00), Currency::Eur).unwrap(),
            iban_account("Alice", "DE89370400440532013000"),
            iban_account("Bob", "GB82WEST12345698765432"),
        );
        let report = validate_payment(&request);
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_report_lists_every_problem() {
        let request = PaymentRequest::new(
            Money::new(dec!(0), Currency::Usd).unwrap(),
            iban_account("Alice", "DE00370400440532013000"),
            BankAccount::from_account_number("Bob", "123", Some("021000022".into())).unwrap(),
        );
        let report = validate_payment(&request);
        let codes: Vec<_> = report.errors.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                "INVALID_AMOUNT",
                "INVALID_IBAN",
                "ACCOUNT_NUMBER_TOO_SHORT",
                "INVALID_ROUTING_NUMBER"
            ]
        );
        assert!(matches!(
            report.into_result(),
            Err(RailError::PaymentRejected(_))
        ));
    }

    #[test]
    fn test_missing_identifier_is_invalid_account() {
        let request = PaymentRequest::new(
            Money::new(dec!(5), Currency::Usd).unwrap(),
            iban_account("Alice", "DE89370400440532013000"),
            BankAccount::from_iban("Bob", "", None).unwrap(),
        );
        assert!(matches!(
            validate_payment(&request).into_result(),
            Err(RailError::InvalidAccount(_))
        ));
    }

    #[test]
    fn test_warnings_do_not_block() {
        let ach = BankAccount::from_account_number("Carol", "12345678", None).unwrap();
        let request = PaymentRequest::new(
            Money::new(dec!(5), Currency::Usd).unwrap(),
            ach.clone(),
            ach,
        );
        let warnings = validate_payment(&request).into_result().unwrap();
        let codes: Vec<_> = warnings.iter().map(|w| w.code).collect();
        assert!(codes.contains(&"MISSING_ROUTING_NUMBER"));
        assert!(codes.contains(&"SAME_ACCOUNT"));
    }
}
