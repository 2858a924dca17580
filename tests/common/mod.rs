use chrono::NaiveDate;
use factura_core::api::{Authorization, SriMessage};
use factura_core::config::EnvironmentType;
use factura_core::invoice::{
    Customer, DocumentState, Emitter, Establishment, FinalizedInvoice, InvoiceBuilder, LineItem,
    LineItemFields, RequiredInvoiceFields,
};
use factura_core::pipeline::{InvoiceStore, SignedRecord, StoreError};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

pub const TEST_PASSPHRASE: &str = "secret";

#[allow(dead_code)]
pub fn sample_invoice() -> FinalizedInvoice {
    invoice_with_sequential("42")
}

#[allow(dead_code)]
pub fn invoice_with_sequential(sequential: &str) -> FinalizedInvoice {
    let emitter = Emitter::new(
        "Taller Electronico S.A.",
        "Taller Quito",
        "1790012345001",
        "Av. Amazonas N24-03",
    )
    .expect("emitter");

    InvoiceBuilder::new(RequiredInvoiceFields {
        environment: EnvironmentType::Test,
        sequential: sequential.into(),
        issue_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        emitter,
        establishment: Establishment::new("001", "001", None),
        line_items: vec![LineItem::new(LineItemFields {
            reference_code: "SCREEN-REP".into(),
            description: "Screen replacement".into(),
            quantity: 1.0,
            unit_price: 100.0,
        })],
    })
    .customer(Customer::final_consumer())
    .build()
    .expect("invoice")
}

/// Writes a fresh self-signed RSA-2048 PKCS#12 bundle to a temp file and
/// returns its path. Passphrase is [`TEST_PASSPHRASE`].
#[allow(dead_code)]
pub fn write_test_pkcs12() -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let rsa = Rsa::generate(2048).expect("rsa key");
    let pkey = PKey::from_rsa(rsa).expect("pkey");

    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("CN", "Taller Test")
        .expect("common name");
    name.append_entry_by_text("O", "Taller Electronico S.A.")
        .expect("organization");
    let name = name.build();

    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(1)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("serial number");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&pkey).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
        .expect("not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(30).expect("not after"))
        .expect("not after");
    builder
        .sign(&pkey, MessageDigest::sha256())
        .expect("self-sign");
    let cert = builder.build();

    let p12 = Pkcs12::builder()
        .name("test")
        .pkey(&pkey)
        .cert(&cert)
        .build2(TEST_PASSPHRASE)
        .expect("pkcs12");
    let der = p12.to_der().expect("pkcs12 der");

    let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!(
        "factura-core-test-{}-{unique}.p12",
        std::process::id()
    ));
    std::fs::write(&path, der).expect("write pkcs12");
    path
}

/// In-memory [`InvoiceStore`] for pipeline assertions.
#[derive(Default)]
pub struct MemoryStore {
    records: HashMap<String, SignedRecord>,
    pub rejections: Vec<SriMessage>,
    pub authorization: Option<Authorization>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn state_of(&self, sequential: &str) -> Option<DocumentState> {
        self.records.get(sequential).map(|r| r.state)
    }

    pub fn record_of(&self, sequential: &str) -> Option<&SignedRecord> {
        self.records.get(sequential)
    }
}

impl InvoiceStore for MemoryStore {
    fn signed_record(&self, sequential: &str) -> Result<Option<SignedRecord>, StoreError> {
        Ok(self.records.get(sequential).cloned())
    }

    fn save_signed(&mut self, sequential: &str, record: &SignedRecord) -> Result<(), StoreError> {
        self.records.insert(sequential.to_string(), record.clone());
        Ok(())
    }

    fn set_state(&mut self, sequential: &str, state: DocumentState) -> Result<(), StoreError> {
        let record = self
            .records
            .get_mut(sequential)
            .ok_or_else(|| StoreError(format!("no record for {sequential}")))?;
        record.state = state;
        Ok(())
    }

    fn save_authorization(
        &mut self,
        _sequential: &str,
        authorization: &Authorization,
    ) -> Result<(), StoreError> {
        self.authorization = Some(authorization.clone());
        Ok(())
    }

    fn save_rejection(
        &mut self,
        _sequential: &str,
        messages: &[SriMessage],
    ) -> Result<(), StoreError> {
        self.rejections.extend_from_slice(messages);
        Ok(())
    }
}
