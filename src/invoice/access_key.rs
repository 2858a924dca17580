//! Access key generation and verification.
//!
//! The access key is the 49-digit identifier the SRI uses to track a
//! document: 48 digits of payload plus a weighted modulus-11 check digit.
//! The weighting and reduction steps must match the SRI verifier exactly, so
//! they are treated as protocol constants rather than a general checksum.
use super::{InvoiceData, InvoiceError, InvoiceField, ValidationError, ValidationIssue, ValidationKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source of the 8-digit numeric code segment.
///
/// Injected so tests can pin the code and assert exact keys; production uses
/// [`RandomCode`].
pub trait CodeSource: Send {
    /// Next numeric code, in `0..=99_999_999`.
    fn next_code(&mut self) -> u32;
}

/// Thread-local RNG backed code source.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCode;

impl CodeSource for RandomCode {
    fn next_code(&mut self) -> u32 {
        rand::thread_rng().gen_range(0..=99_999_999)
    }
}

/// Fixed code source for deterministic keys.
#[derive(Debug, Clone, Copy)]
pub struct FixedCode(pub u32);

impl CodeSource for FixedCode {
    fn next_code(&mut self) -> u32 {
        self.0
    }
}

/// A validated 49-digit access key.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::AccessKey;
///
/// // Too short, and a bad check digit would also be rejected.
/// assert!(AccessKey::parse("123").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey(String);

impl AccessKey {
    /// Parse an existing key, checking length, digits, and the check digit.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if the key is not 49 digits or its check
    /// digit does not satisfy the modulus-11 relation.
    pub fn parse<S: Into<String>>(s: S) -> Result<Self, InvoiceError> {
        let s = s.into();
        if s.len() != 49 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::new(vec![ValidationIssue {
                field: InvoiceField::Sequential,
                kind: ValidationKind::InvalidFormat,
                line_item_index: None,
            }])
            .into());
        }
        let key = AccessKey(s);
        if !key.verify() {
            return Err(ValidationError::new(vec![ValidationIssue {
                field: InvoiceField::Sequential,
                kind: ValidationKind::Mismatch,
                line_item_index: None,
            }])
            .into());
        }
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the trailing digit satisfies the modulus-11 relation against
    /// the preceding 48 digits.
    pub fn verify(&self) -> bool {
        let (payload, check) = self.0.split_at(48);
        check_digit(payload) == check.as_bytes()[0] - b'0'
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Builds access keys for invoices.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::{AccessKeyGenerator, FixedCode};
///
/// let mut generator = AccessKeyGenerator::with_source(Box::new(FixedCode(12345678)));
/// # let _ = generator;
/// ```
pub struct AccessKeyGenerator {
    source: Box<dyn CodeSource>,
}

impl AccessKeyGenerator {
    pub fn new() -> Self {
        Self {
            source: Box::new(RandomCode),
        }
    }

    pub fn with_source(source: Box<dyn CodeSource>) -> Self {
        Self { source }
    }

    /// Compose the 49-digit key for an invoice.
    ///
    /// Field widths are re-checked here so a malformed code never reaches the
    /// checksum; the builder performs the same validation earlier.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] naming each malformed field.
    pub fn generate(&mut self, data: &InvoiceData) -> Result<AccessKey, InvoiceError> {
        let mut issues = Vec::new();
        if !is_digits_of_len(data.establishment().code(), 3) {
            issues.push(ValidationIssue {
                field: InvoiceField::EstablishmentCode,
                kind: ValidationKind::InvalidFormat,
                line_item_index: None,
            });
        }
        if !is_digits_of_len(data.establishment().emission_point(), 3) {
            issues.push(ValidationIssue {
                field: InvoiceField::EmissionPointCode,
                kind: ValidationKind::InvalidFormat,
                line_item_index: None,
            });
        }
        if !is_digits_of_len(data.sequential(), 9) {
            issues.push(ValidationIssue {
                field: InvoiceField::Sequential,
                kind: ValidationKind::InvalidFormat,
                line_item_index: None,
            });
        }
        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }

        let numeric_code = self.source.next_code() % 100_000_000;
        let payload = format!(
            "{date}{doc_type}{ruc}{env}{estab}{point}{sequential}{code:08}{emission}",
            date = data.issue_date().format("%Y%m%d"),
            doc_type = super::DOCUMENT_TYPE_CODE,
            ruc = data.emitter().tax_id().padded(),
            env = data.environment().code(),
            estab = data.establishment().code(),
            point = data.establishment().emission_point(),
            sequential = data.sequential(),
            code = numeric_code,
            emission = EMISSION_TYPE_NORMAL,
        );
        debug_assert_eq!(payload.len(), 48);

        let check = check_digit(&payload);
        Ok(AccessKey(format!("{payload}{check}")))
    }
}

impl Default for AccessKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) const EMISSION_TYPE_NORMAL: &str = "1";

fn is_digits_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

/// Weighted modulus-11 check digit over a digit string.
///
/// Multipliers alternate 2,1 from the first digit; products of two digits are
/// reduced by summing their digits; remainders below 2 are used as-is,
/// otherwise the digit is 11 minus the remainder. This is the SRI's exact
/// rule, not textbook Luhn.
pub(crate) fn check_digit(digits: &str) -> u8 {
    let mut sum: u32 = 0;
    for (i, b) in digits.bytes().enumerate() {
        let digit = u32::from(b - b'0');
        let multiplier = if i % 2 == 0 { 2 } else { 1 };
        let mut product = digit * multiplier;
        if product >= 10 {
            product = product / 10 + product % 10;
        }
        sum += product;
    }
    let remainder = (sum % 11) as u8;
    if remainder < 2 {
        remainder
    } else {
        11 - remainder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentType;
    use crate::invoice::{
        Customer, Emitter, Establishment, InvoiceBuilder, LineItem, LineItemFields,
        RequiredInvoiceFields,
    };
    use chrono::NaiveDate;

    fn sample_invoice() -> crate::invoice::FinalizedInvoice {
        let emitter = Emitter::new(
            "Taller Reparalo S.A.",
            "Reparalo",
            "1790012345001",
            "Av. Amazonas N24-03",
        )
        .expect("emitter");
        InvoiceBuilder::new(RequiredInvoiceFields {
            environment: EnvironmentType::Test,
            sequential: "1".into(),
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            emitter,
            establishment: Establishment::new("001", "001", None),
            line_items: vec![LineItem::new(LineItemFields {
                reference_code: "REP-001".into(),
                description: "Screen replacement".into(),
                quantity: 1.0,
                unit_price: 100.0,
            })],
        })
        .customer(Customer::final_consumer())
        .build()
        .expect("build invoice")
    }

    #[test]
    fn generates_49_digit_key_with_fixed_code() {
        let invoice = sample_invoice();
        let mut generator = AccessKeyGenerator::with_source(Box::new(FixedCode(12345678)));
        let key = generator.generate(invoice.data()).expect("key");

        assert_eq!(key.as_str().len(), 49);
        assert!(key.as_str().bytes().all(|b| b.is_ascii_digit()));
        assert!(key.as_str().starts_with("20240115"));
        assert!(key.as_str()[..48].ends_with("123456781"));
        assert!(key.verify());
    }

    #[test]
    fn fixed_code_makes_generation_deterministic() {
        let invoice = sample_invoice();
        let mut a = AccessKeyGenerator::with_source(Box::new(FixedCode(42)));
        let mut b = AccessKeyGenerator::with_source(Box::new(FixedCode(42)));
        assert_eq!(
            a.generate(invoice.data()).unwrap(),
            b.generate(invoice.data()).unwrap()
        );
    }

    #[test]
    fn different_codes_produce_different_keys() {
        let invoice = sample_invoice();
        let mut a = AccessKeyGenerator::with_source(Box::new(FixedCode(1)));
        let mut b = AccessKeyGenerator::with_source(Box::new(FixedCode(2)));
        assert_ne!(
            a.generate(invoice.data()).unwrap(),
            b.generate(invoice.data()).unwrap()
        );
    }

    #[test]
    fn check_digit_matches_reference_computation() {
        let invoice = sample_invoice();
        let mut generator = AccessKeyGenerator::with_source(Box::new(FixedCode(87654321)));
        let key = generator.generate(invoice.data()).expect("key");
        let payload = &key.as_str()[..48];

        // Independent computation with the explicit multiplier table the SRI
        // documentation lists.
        let multipliers: Vec<u32> = (0..48).map(|i| if i % 2 == 0 { 2 } else { 1 }).collect();
        let mut sum = 0u32;
        for (b, m) in payload.bytes().zip(multipliers) {
            let mut product = u32::from(b - b'0') * m;
            if product >= 10 {
                product = product / 10 + product % 10;
            }
            sum += product;
        }
        let remainder = sum % 11;
        let expected = if remainder < 2 { remainder } else { 11 - remainder } as u8;
        assert_eq!(check_digit(payload), expected);
    }

    #[test]
    fn check_digit_low_remainder_edge_cases() {
        // All zeros: sum 0, remainder 0, digit 0.
        let zeros = "0".repeat(48);
        assert_eq!(check_digit(&zeros), 0);

        // Single trailing 1 with multiplier 1: sum 1, remainder 1, digit 1.
        let mut one = "0".repeat(47);
        one.push('1');
        assert_eq!(check_digit(&one), 1);
    }

    #[test]
    fn parse_rejects_corrupted_keys() {
        let invoice = sample_invoice();
        let mut generator = AccessKeyGenerator::with_source(Box::new(FixedCode(5)));
        let key = generator.generate(invoice.data()).unwrap();

        assert!(AccessKey::parse(key.as_str()).is_ok());

        // Flip one payload digit; the check digit no longer matches.
        let mut corrupted: Vec<u8> = key.as_str().bytes().collect();
        corrupted[10] = if corrupted[10] == b'9' { b'0' } else { corrupted[10] + 1 };
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert!(AccessKey::parse(corrupted).is_err());

        assert!(AccessKey::parse("123").is_err());
    }
}
