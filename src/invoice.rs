//! Invoice domain types and builders.
mod access_key;
mod builder;
pub mod sign;
pub mod xml;

pub use access_key::{AccessKey, AccessKeyGenerator, CodeSource, FixedCode, RandomCode};
pub use builder::{FinalizedInvoice, InvoiceBuilder, RequiredInvoiceFields, SignedDocument};

use crate::config::EnvironmentType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

type Result<T> = std::result::Result<T, InvoiceError>;

/// Fixed VAT rate applied to every line (15%, SRI tax code 2, percentage code 3).
pub const TAX_RATE: f64 = 0.15;
pub(crate) const TAX_CODE: &str = "2";
pub(crate) const TAX_PERCENTAGE_CODE: &str = "3";

/// Document type code for invoices ("factura").
pub(crate) const DOCUMENT_TYPE_CODE: &str = "01";

/// Maximum length the SRI accepts for a line reference code.
pub(crate) const MAX_REFERENCE_CODE_LEN: usize = 25;

/// Invoice-related errors.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid seller tax id format")]
    InvalidTaxIdFormat,
}

/// Structured validation error with field-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invoice validation failed")]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    pub line_item_index: Option<usize>,
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceField {
    SellerTaxId,
    EstablishmentCode,
    EmissionPointCode,
    Sequential,
    LineItems,
    LineItemQuantity,
    LineItemUnitPrice,
    LineItemSubtotal,
    LineItemTaxValue,
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    Empty,
    InvalidFormat,
    OutOfRange,
    Mismatch,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Seller tax identifier (RUC), padded to 13 digits where the SRI requires it.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::TaxId;
///
/// let ruc = TaxId::parse("1790012345001")?;
/// assert_eq!(ruc.padded(), "1790012345001");
/// # Ok::<(), factura_core::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxId(String);

impl TaxId {
    /// # Errors
    /// Returns [`InvoiceError::InvalidTaxIdFormat`] if the input is empty,
    /// non-numeric, or longer than 13 digits.
    pub fn parse<S: Into<String>>(s: S) -> Result<Self> {
        let s = s.into().trim().to_string();
        if s.is_empty() || s.len() > 13 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvoiceError::InvalidTaxIdFormat);
        }
        Ok(TaxId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Zero-padded to the 13 digits the access key expects.
    pub fn padded(&self) -> String {
        format!("{:0>13}", self.0)
    }
}

impl AsRef<str> for TaxId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for TaxId {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<Self> {
        TaxId::parse(s)
    }
}

/// Buyer identification type, mapped to the SRI numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentificationType {
    Ruc,
    Cedula,
    Passport,
    FinalConsumer,
}

impl IdentificationType {
    pub fn code(&self) -> &'static str {
        match self {
            IdentificationType::Ruc => "04",
            IdentificationType::Cedula => "05",
            IdentificationType::Passport => "06",
            IdentificationType::FinalConsumer => "07",
        }
    }
}

/// Seller identity as stamped into the tax-info block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emitter {
    legal_name: String,
    trade_name: String,
    tax_id: TaxId,
    address: String,
    accounting_obligation: bool,
}

impl Emitter {
    /// # Errors
    /// Returns an error if the tax id is invalid.
    pub fn new(
        legal_name: impl Into<String>,
        trade_name: impl Into<String>,
        tax_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            legal_name: legal_name.into(),
            trade_name: trade_name.into(),
            tax_id: TaxId::parse(tax_id.into())?,
            address: address.into(),
            accounting_obligation: false,
        })
    }

    pub fn with_accounting_obligation(mut self, obliged: bool) -> Self {
        self.accounting_obligation = obliged;
        self
    }

    pub fn legal_name(&self) -> &str {
        &self.legal_name
    }

    pub fn trade_name(&self) -> &str {
        &self.trade_name
    }

    pub fn tax_id(&self) -> &TaxId {
        &self.tax_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn accounting_obligation(&self) -> bool {
        self.accounting_obligation
    }
}

/// Issuing branch: establishment and emission-point codes plus its address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Establishment {
    code: String,
    emission_point: String,
    address: Option<String>,
}

impl Establishment {
    pub fn new(
        code: impl Into<String>,
        emission_point: impl Into<String>,
        address: Option<String>,
    ) -> Self {
        Self {
            code: code.into(),
            emission_point: emission_point.into(),
            address,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn emission_point(&self) -> &str {
        &self.emission_point
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
}

/// Buyer identity.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::Customer;
///
/// let walk_in = Customer::final_consumer();
/// assert_eq!(walk_in.name(), "CONSUMIDOR FINAL");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    identification_type: IdentificationType,
    identification_number: String,
    name: String,
    address: Option<String>,
}

impl Customer {
    pub fn new(
        identification_type: IdentificationType,
        identification_number: impl Into<String>,
        name: impl Into<String>,
        address: Option<String>,
    ) -> Self {
        Self {
            identification_type,
            identification_number: identification_number.into(),
            name: name.into(),
            address,
        }
    }

    /// The generic buyer used when the customer lacks full identification.
    pub fn final_consumer() -> Self {
        Self {
            identification_type: IdentificationType::FinalConsumer,
            identification_number: "9999999999999".into(),
            name: "CONSUMIDOR FINAL".into(),
            address: None,
        }
    }

    pub fn identification_type(&self) -> IdentificationType {
        self.identification_type
    }

    pub fn identification_number(&self) -> &str {
        &self.identification_number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
}

/// Single invoice line.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::{LineItem, LineItemFields};
///
/// let item = LineItem::new(LineItemFields {
///     reference_code: "SCREEN-REP".into(),
///     description: "Screen replacement".into(),
///     quantity: 2.0,
///     unit_price: 50.0,
/// });
/// assert_eq!(item.subtotal(), 100.0);
/// assert_eq!(item.tax_value(), 15.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    reference_code: String,
    description: String,
    quantity: f64,
    unit_price: f64,
    discount: f64,
    subtotal: f64,
    tax_value: f64,
}

/// Fields for creating a line item with computed totals.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemFields {
    pub reference_code: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
}

/// Fields for creating a line item from fully specified amounts.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemPartsFields {
    pub reference_code: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub subtotal: f64,
    pub tax_value: f64,
}

impl LineItem {
    pub fn new(fields: LineItemFields) -> Self {
        let subtotal = Self::calculate_subtotal(fields.quantity, fields.unit_price);
        let tax_value = Self::calculate_tax_value(subtotal);
        Self {
            reference_code: truncate_reference_code(fields.reference_code),
            description: fields.description,
            quantity: fields.quantity,
            unit_price: fields.unit_price,
            discount: 0.0,
            subtotal,
            tax_value,
        }
    }

    /// Create a line item from fully specified amounts.
    ///
    /// # Errors
    /// Returns [`ValidationError`] if the provided totals do not match the
    /// computed values (to 2 decimals).
    pub fn try_from_parts(
        fields: LineItemPartsFields,
    ) -> std::result::Result<Self, ValidationError> {
        const EPSILON: f64 = 0.005;
        let expected_subtotal = Self::calculate_subtotal(fields.quantity, fields.unit_price);
        let expected_tax = Self::calculate_tax_value(fields.subtotal);

        let mut issues = Vec::new();
        if (expected_subtotal - fields.subtotal).abs() > EPSILON {
            issues.push(ValidationIssue {
                field: InvoiceField::LineItemSubtotal,
                kind: ValidationKind::Mismatch,
                line_item_index: None,
            });
        }
        if (expected_tax - fields.tax_value).abs() > EPSILON {
            issues.push(ValidationIssue {
                field: InvoiceField::LineItemTaxValue,
                kind: ValidationKind::Mismatch,
                line_item_index: None,
            });
        }
        if !issues.is_empty() {
            return Err(ValidationError::new(issues));
        }

        Ok(Self {
            reference_code: truncate_reference_code(fields.reference_code),
            description: fields.description,
            quantity: fields.quantity,
            unit_price: fields.unit_price,
            discount: 0.0,
            subtotal: fields.subtotal,
            tax_value: fields.tax_value,
        })
    }

    pub fn reference_code(&self) -> &str {
        &self.reference_code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn subtotal(&self) -> f64 {
        self.subtotal
    }

    pub fn tax_value(&self) -> f64 {
        self.tax_value
    }

    fn calculate_subtotal(quantity: f64, unit_price: f64) -> f64 {
        round2(quantity * unit_price)
    }

    fn calculate_tax_value(subtotal: f64) -> f64 {
        round2(subtotal * TAX_RATE)
    }
}

// Truncation, not rejection: the SRI caps reference codes at 25 characters.
fn truncate_reference_code(code: String) -> String {
    if code.chars().count() <= MAX_REFERENCE_CODE_LEN {
        return code;
    }
    code.chars().take(MAX_REFERENCE_CODE_LEN).collect()
}

/// Collection of line items.
pub type LineItems = Vec<LineItem>;

/// Core invoice data model. Instances are produced by [`InvoiceBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    environment: EnvironmentType,
    sequential: String,
    issue_date: NaiveDate,
    emitter: Emitter,
    establishment: Establishment,
    customer: Customer,
    line_items: LineItems,
    currency: String,
}

impl InvoiceData {
    pub fn environment(&self) -> EnvironmentType {
        self.environment
    }

    /// Zero-padded 9-digit sequential number.
    pub fn sequential(&self) -> &str {
        &self.sequential
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn establishment(&self) -> &Establishment {
        &self.establishment
    }

    pub fn customer(&self) -> &Customer {
        &self.customer
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub(crate) fn new_unchecked(
        environment: EnvironmentType,
        sequential: String,
        issue_date: NaiveDate,
        emitter: Emitter,
        establishment: Establishment,
        customer: Customer,
        line_items: LineItems,
        currency: String,
    ) -> Self {
        Self {
            environment,
            sequential,
            issue_date,
            emitter,
            establishment,
            customer,
            line_items,
            currency,
        }
    }

    pub(crate) fn format_amount(amount: f64) -> String {
        format!("{:.2}", amount)
    }
}

/// Computed invoice totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTotalsData {
    subtotal: f64,
    tax_amount: f64,
    discount_total: f64,
}

impl InvoiceTotalsData {
    pub(crate) fn from_data(data: &InvoiceData) -> Self {
        let subtotal = round2(data.line_items.iter().map(|li| li.subtotal()).sum());
        let tax_amount = round2(subtotal * TAX_RATE);
        let discount_total = round2(data.line_items.iter().map(|li| li.discount()).sum());

        Self {
            subtotal,
            tax_amount,
            discount_total,
        }
    }

    pub fn subtotal(&self) -> f64 {
        self.subtotal
    }

    pub fn tax_amount(&self) -> f64 {
        self.tax_amount
    }

    pub fn discount_total(&self) -> f64 {
        self.discount_total
    }

    pub fn total(&self) -> f64 {
        round2(self.subtotal - self.discount_total + self.tax_amount)
    }
}

/// Lifecycle state recorded on the invoice.
///
/// Transitions are one-directional; `Rejected` and `Authorized` are terminal
/// for a given sequential number. `Signed` is the internal checkpoint reached
/// after the access key and signature have been persisted, before any network
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
    Draft,
    Signed,
    Received,
    Authorized,
    Rejected,
}

impl DocumentState {
    pub fn can_transition(&self, to: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, to),
            (Draft, Signed) | (Signed, Received) | (Signed, Rejected) | (Received, Authorized) | (Received, Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentState::Authorized | DocumentState::Rejected)
    }
}
