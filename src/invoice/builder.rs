use super::{
    AccessKey, Customer, Emitter, Establishment, InvoiceData, InvoiceError, InvoiceField,
    InvoiceTotalsData, LineItems, ValidationError, ValidationIssue, ValidationKind,
};
use crate::config::EnvironmentType;
use crate::invoice::xml::{DocumentXml, DocumentXmlError, ToXml};
use chrono::NaiveDate;

/// Fields every invoice must carry before it can be finalized.
#[derive(Debug, Clone)]
pub struct RequiredInvoiceFields {
    pub environment: EnvironmentType,
    /// Raw sequential as allocated by the external sequence counter; padded
    /// to 9 digits during build.
    pub sequential: String,
    pub issue_date: NaiveDate,
    pub emitter: Emitter,
    pub establishment: Establishment,
    pub line_items: LineItems,
}

/// Builder validating invoice data into a [`FinalizedInvoice`].
///
/// # Examples
/// ```rust
/// use chrono::NaiveDate;
/// use factura_core::config::EnvironmentType;
/// use factura_core::invoice::{
///     Emitter, Establishment, InvoiceBuilder, LineItem, LineItemFields, RequiredInvoiceFields,
/// };
///
/// let emitter = Emitter::new("Acme S.A.", "Acme", "1790012345001", "Av. Amazonas")?;
/// let invoice = InvoiceBuilder::new(RequiredInvoiceFields {
///     environment: EnvironmentType::Test,
///     sequential: "1".into(),
///     issue_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
///     emitter,
///     establishment: Establishment::new("001", "001", None),
///     line_items: vec![LineItem::new(LineItemFields {
///         reference_code: "REP-001".into(),
///         description: "Screen replacement".into(),
///         quantity: 1.0,
///         unit_price: 100.0,
///     })],
/// })
/// .build()?;
/// assert_eq!(invoice.data().sequential(), "000000001");
/// # Ok::<(), factura_core::invoice::InvoiceError>(())
/// ```
pub struct InvoiceBuilder {
    fields: RequiredInvoiceFields,
    customer: Option<Customer>,
    currency: String,
}

impl InvoiceBuilder {
    pub fn new(fields: RequiredInvoiceFields) -> Self {
        Self {
            fields,
            customer: None,
            currency: "USD".into(),
        }
    }

    pub fn customer(mut self, customer: Customer) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Validate and freeze the invoice.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] listing every malformed or missing field.
    pub fn build(self) -> Result<FinalizedInvoice, InvoiceError> {
        let mut issues = Vec::new();

        let sequential = self.fields.sequential.trim();
        let sequential = if sequential.is_empty()
            || sequential.len() > 9
            || !sequential.bytes().all(|b| b.is_ascii_digit())
        {
            issues.push(ValidationIssue {
                field: InvoiceField::Sequential,
                kind: ValidationKind::InvalidFormat,
                line_item_index: None,
            });
            String::new()
        } else {
            format!("{sequential:0>9}")
        };

        for (field, code) in [
            (
                InvoiceField::EstablishmentCode,
                self.fields.establishment.code(),
            ),
            (
                InvoiceField::EmissionPointCode,
                self.fields.establishment.emission_point(),
            ),
        ] {
            if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
                issues.push(ValidationIssue {
                    field,
                    kind: ValidationKind::InvalidFormat,
                    line_item_index: None,
                });
            }
        }

        if self.fields.line_items.is_empty() {
            issues.push(ValidationIssue {
                field: InvoiceField::LineItems,
                kind: ValidationKind::Empty,
                line_item_index: None,
            });
        }
        for (index, item) in self.fields.line_items.iter().enumerate() {
            if item.quantity() < 0.0 {
                issues.push(ValidationIssue {
                    field: InvoiceField::LineItemQuantity,
                    kind: ValidationKind::OutOfRange,
                    line_item_index: Some(index),
                });
            }
            if item.unit_price() < 0.0 {
                issues.push(ValidationIssue {
                    field: InvoiceField::LineItemUnitPrice,
                    kind: ValidationKind::OutOfRange,
                    line_item_index: Some(index),
                });
            }
        }

        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }

        let data = InvoiceData::new_unchecked(
            self.fields.environment,
            sequential,
            self.fields.issue_date,
            self.fields.emitter,
            self.fields.establishment,
            self.customer.unwrap_or_else(Customer::final_consumer),
            self.fields.line_items,
            self.currency,
        );

        Ok(FinalizedInvoice {
            totals: InvoiceTotalsData::from_data(&data),
            data,
        })
    }
}

/// A validated invoice with computed totals, ready for key generation,
/// composition, and signing.
#[derive(Debug, Clone)]
pub struct FinalizedInvoice {
    data: InvoiceData,
    totals: InvoiceTotalsData,
}

impl FinalizedInvoice {
    pub fn data(&self) -> &InvoiceData {
        &self.data
    }

    pub fn totals(&self) -> &InvoiceTotalsData {
        &self.totals
    }

    /// Canonical unsigned XML with the access key already stamped.
    ///
    /// # Errors
    /// Returns [`DocumentXmlError`] if serialization fails.
    pub fn to_xml(&self, access_key: &AccessKey) -> Result<String, DocumentXmlError> {
        DocumentXml::new(self, access_key).to_xml()
    }

    /// Promote to a signed document once the signature engine has produced
    /// the signed bytes.
    pub fn into_signed(self, access_key: AccessKey, signed_xml: String) -> SignedDocument {
        SignedDocument {
            data: self.data,
            totals: self.totals,
            access_key,
            signed_xml,
        }
    }
}

/// An invoice whose XML has been signed; immutable after creation.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    data: InvoiceData,
    totals: InvoiceTotalsData,
    access_key: AccessKey,
    signed_xml: String,
}

impl SignedDocument {
    pub fn data(&self) -> &InvoiceData {
        &self.data
    }

    pub fn totals(&self) -> &InvoiceTotalsData {
        &self.totals
    }

    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    pub fn xml(&self) -> &str {
        &self.signed_xml
    }

    /// Base64 of the signed XML, as the reception service expects it.
    pub fn to_xml_base64(&self) -> String {
        use base64ct::{Base64, Encoding};
        Base64::encode_string(self.signed_xml.as_bytes())
    }
}
