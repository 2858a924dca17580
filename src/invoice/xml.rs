//! XML serialization for invoices.
//!
//! Produces the `<factura>` document (version 1.1.0) the reception service
//! expects, with the access key already stamped into `claveAcceso`.
use super::{
    AccessKey, Customer, Emitter, Establishment, FinalizedInvoice, InvoiceData, InvoiceTotalsData,
    LineItem, SignedDocument, TAX_CODE, TAX_PERCENTAGE_CODE, TAX_RATE,
};

use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// XML serialization error.
#[derive(Debug, Error)]
pub enum DocumentXmlError {
    #[error("failed to serialize invoice to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

mod helpers {
    use serde::ser::{Serialize, Serializer};
    use std::fmt::{self, Display, Formatter};

    pub(super) struct FixedPrecision {
        value: f64,
        precision: usize,
    }

    impl FixedPrecision {
        pub(super) fn new(value: f64, precision: usize) -> Self {
            Self { value, precision }
        }
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{:.*}", self.precision, self.value)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    /// Two-decimal amount, the precision every monetary field uses.
    pub(super) fn amount(value: f64) -> FixedPrecision {
        FixedPrecision::new(value, 2)
    }
}

use helpers::amount;

/// Wrapper binding a finalized invoice to its access key for serialization.
pub struct DocumentXml<'a> {
    invoice: &'a FinalizedInvoice,
    access_key: &'a AccessKey,
}

impl<'a> DocumentXml<'a> {
    pub fn new(invoice: &'a FinalizedInvoice, access_key: &'a AccessKey) -> Self {
        Self {
            invoice,
            access_key,
        }
    }
}

impl Serialize for DocumentXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.invoice.data();
        let totals = self.invoice.totals();

        let mut root = serializer.serialize_struct("factura", 0)?;
        root.serialize_field("@id", "comprobante")?;
        root.serialize_field("@version", "1.1.0")?;
        root.serialize_field(
            "infoTributaria",
            &TaxInfoXml {
                data,
                access_key: self.access_key,
            },
        )?;
        root.serialize_field("infoFactura", &InvoiceInfoXml { data, totals })?;
        root.serialize_field(
            "detalles",
            &DetailsXml {
                line_items: data.line_items(),
            },
        )?;
        root.end()
    }
}

struct TaxInfoXml<'a> {
    data: &'a InvoiceData,
    access_key: &'a AccessKey,
}

impl Serialize for TaxInfoXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let emitter: &Emitter = self.data.emitter();
        let establishment: &Establishment = self.data.establishment();

        let mut block = serializer.serialize_struct("infoTributaria", 0)?;
        block.serialize_field("ambiente", self.data.environment().code())?;
        block.serialize_field("tipoEmision", super::access_key::EMISSION_TYPE_NORMAL)?;
        block.serialize_field("razonSocial", emitter.legal_name())?;
        block.serialize_field("nombreComercial", emitter.trade_name())?;
        block.serialize_field("ruc", emitter.tax_id().as_str())?;
        block.serialize_field("claveAcceso", self.access_key.as_str())?;
        block.serialize_field("codDoc", super::DOCUMENT_TYPE_CODE)?;
        block.serialize_field("estab", establishment.code())?;
        block.serialize_field("ptoEmi", establishment.emission_point())?;
        block.serialize_field("secuencial", self.data.sequential())?;
        block.serialize_field("dirMatriz", emitter.address())?;
        block.end()
    }
}

struct InvoiceInfoXml<'a> {
    data: &'a InvoiceData,
    totals: &'a InvoiceTotalsData,
}

impl Serialize for InvoiceInfoXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let customer: &Customer = self.data.customer();
        let branch_address = self
            .data
            .establishment()
            .address()
            .unwrap_or_else(|| self.data.emitter().address());

        let mut block = serializer.serialize_struct("infoFactura", 0)?;
        block.serialize_field(
            "fechaEmision",
            &self.data.issue_date().format("%d/%m/%Y").to_string(),
        )?;
        block.serialize_field("dirEstablecimiento", branch_address)?;
        block.serialize_field(
            "obligadoContabilidad",
            if self.data.emitter().accounting_obligation() {
                "SI"
            } else {
                "NO"
            },
        )?;
        block.serialize_field(
            "tipoIdentificacionComprador",
            customer.identification_type().code(),
        )?;
        block.serialize_field("razonSocialComprador", customer.name())?;
        block.serialize_field("identificacionComprador", customer.identification_number())?;
        // Present even when empty; receivers expect the element.
        block.serialize_field("direccionComprador", customer.address().unwrap_or(""))?;
        block.serialize_field("totalSinImpuestos", &amount(self.totals.subtotal()))?;
        block.serialize_field("totalDescuento", &amount(self.totals.discount_total()))?;
        block.serialize_field("totalImpuesto", &amount(self.totals.tax_amount()))?;
        block.serialize_field("importeTotal", &amount(self.totals.total()))?;
        block.serialize_field("moneda", self.data.currency())?;
        block.serialize_field("totalConImpuestos", &TaxTotalsXml { totals: self.totals })?;
        block.end()
    }
}

struct TaxTotalsXml<'a> {
    totals: &'a InvoiceTotalsData,
}

impl Serialize for TaxTotalsXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut block = serializer.serialize_struct("totalConImpuestos", 0)?;
        block.serialize_field("totalImpuesto", &TaxTotalXml { totals: self.totals })?;
        block.end()
    }
}

struct TaxTotalXml<'a> {
    totals: &'a InvoiceTotalsData,
}

impl Serialize for TaxTotalXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut block = serializer.serialize_struct("totalImpuesto", 0)?;
        block.serialize_field("codigo", TAX_CODE)?;
        block.serialize_field("codigoPorcentaje", TAX_PERCENTAGE_CODE)?;
        block.serialize_field("baseImponible", &amount(self.totals.subtotal()))?;
        block.serialize_field("valor", &amount(self.totals.tax_amount()))?;
        block.end()
    }
}

struct DetailsXml<'a> {
    line_items: &'a [LineItem],
}

impl Serialize for DetailsXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut block = serializer.serialize_struct("detalles", 0)?;
        for item in self.line_items {
            block.serialize_field("detalle", &DetailXml { item })?;
        }
        block.end()
    }
}

struct DetailXml<'a> {
    item: &'a LineItem,
}

impl Serialize for DetailXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.item;
        let mut block = serializer.serialize_struct("detalle", 0)?;
        block.serialize_field("codigoPrincipal", item.reference_code())?;
        block.serialize_field("descripcion", item.description())?;
        block.serialize_field("cantidad", &amount(item.quantity()))?;
        block.serialize_field("precioUnitario", &amount(item.unit_price()))?;
        block.serialize_field("descuento", &amount(item.discount()))?;
        block.serialize_field("precioTotalSinImpuesto", &amount(item.subtotal()))?;
        block.serialize_field("impuestos", &LineTaxesXml { item })?;
        block.end()
    }
}

struct LineTaxesXml<'a> {
    item: &'a LineItem,
}

impl Serialize for LineTaxesXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut block = serializer.serialize_struct("impuestos", 0)?;
        block.serialize_field("impuesto", &LineTaxXml { item: self.item })?;
        block.end()
    }
}

struct LineTaxXml<'a> {
    item: &'a LineItem,
}

impl Serialize for LineTaxXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut block = serializer.serialize_struct("impuesto", 0)?;
        block.serialize_field("codigo", TAX_CODE)?;
        block.serialize_field("codigoPorcentaje", TAX_PERCENTAGE_CODE)?;
        block.serialize_field("tarifa", &amount(TAX_RATE * 100.0))?;
        block.serialize_field("baseImponible", &amount(self.item.subtotal()))?;
        block.serialize_field("valor", &amount(self.item.tax_value()))?;
        block.end()
    }
}

/// Serialize a document into its XML string.
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentXmlError>;

    fn to_xml(&self) -> Result<String, DocumentXmlError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, DocumentXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for DocumentXml<'_> {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentXmlError> {
        let mut buffer = String::with_capacity(4096);
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        buffer.push('\n');

        {
            let mut serializer = QuickXmlSerializer::new(&mut buffer);
            if let XmlFormat::Pretty {
                indent_char,
                indent_size,
            } = format
            {
                serializer.indent(indent_char, indent_size);
            }
            self.serialize(serializer)?;
        }

        Ok(buffer)
    }
}

impl ToXml for SignedDocument {
    fn to_xml_with_format(&self, _format: XmlFormat) -> Result<String, DocumentXmlError> {
        Ok(self.xml().to_string())
    }
}
