mod common;

use base64ct::{Base64, Encoding};
use factura_core::invoice::sign::{CertificateBundle, DocumentSigner, SigningError};
use factura_core::invoice::{AccessKeyGenerator, FixedCode};
use libxml::parser::Parser;
use libxml::xpath;

const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

#[test]
fn sign_appends_single_enveloped_signature() {
    let cert_path = common::write_test_pkcs12();
    let signer = DocumentSigner::new(CertificateBundle::with_plain_passphrase(
        &cert_path,
        common::TEST_PASSPHRASE,
    ));

    let invoice = common::sample_invoice();
    let access_key = AccessKeyGenerator::with_source(Box::new(FixedCode(12345678)))
        .generate(invoice.data())
        .expect("access key");
    let signed = signer
        .sign(invoice, access_key.clone())
        .expect("sign invoice");

    assert_eq!(signed.access_key(), &access_key);

    let doc = Parser::default()
        .parse_string(signed.xml())
        .expect("parse signed xml");
    let ctx = xpath::Context::new(&doc).expect("xpath context");
    ctx.register_namespace("ds", DS_NS).expect("ds ns");

    // Exactly one signature, directly under the document root.
    let signatures = ctx
        .evaluate("/*[local-name()='factura']/ds:Signature")
        .expect("signature xpath")
        .get_nodes_as_vec();
    assert_eq!(signatures.len(), 1);

    let references = ctx
        .evaluate("//ds:Reference[@URI='#comprobante']")
        .expect("reference xpath")
        .get_nodes_as_vec();
    assert_eq!(references.len(), 1);

    let digest = ctx
        .evaluate("//ds:DigestValue")
        .expect("digest xpath")
        .get_nodes_as_vec();
    assert!(!digest.is_empty());
    assert!(Base64::decode_vec(digest[0].get_content().trim()).is_ok());

    let signature_value = ctx
        .evaluate("//ds:SignatureValue")
        .expect("signature value xpath")
        .get_nodes_as_vec();
    let signature_bytes =
        Base64::decode_vec(signature_value[0].get_content().trim()).expect("signature base64");
    // RSA-2048 signatures are 256 bytes.
    assert_eq!(signature_bytes.len(), 256);

    let cert = ctx
        .evaluate("//ds:X509Certificate")
        .expect("certificate xpath")
        .get_nodes_as_vec();
    assert!(Base64::decode_vec(cert[0].get_content().trim()).is_ok());

    let _ = std::fs::remove_file(cert_path);
}

#[test]
fn signing_preserves_document_content() {
    let cert_path = common::write_test_pkcs12();
    let signer = DocumentSigner::new(CertificateBundle::with_plain_passphrase(
        &cert_path,
        common::TEST_PASSPHRASE,
    ));

    let invoice = common::sample_invoice();
    let access_key = AccessKeyGenerator::with_source(Box::new(FixedCode(7)))
        .generate(invoice.data())
        .expect("access key");
    let signed = signer.sign(invoice, access_key.clone()).expect("sign");

    let xml = signed.xml();
    assert!(xml.contains(&format!("<claveAcceso>{access_key}</claveAcceso>")));
    assert!(xml.contains("<totalSinImpuestos>100.00</totalSinImpuestos>"));
    assert!(xml.contains("<razonSocialComprador>CONSUMIDOR FINAL</razonSocialComprador>"));

    let _ = std::fs::remove_file(cert_path);
}

#[test]
fn certificate_is_read_fresh_on_every_attempt() {
    let cert_path = common::write_test_pkcs12();
    let signer = DocumentSigner::new(CertificateBundle::with_plain_passphrase(
        &cert_path,
        common::TEST_PASSPHRASE,
    ));
    let unsigned = r#"<factura id="comprobante" version="1.1.0"><secuencial>1</secuencial></factura>"#;

    signer.sign_xml(unsigned).expect("first attempt");

    std::fs::remove_file(&cert_path).expect("remove pkcs12");
    let err = signer.sign_xml(unsigned).unwrap_err();
    assert!(matches!(err, SigningError::CertificateNotFound(_)));
}

#[test]
fn wrong_passphrase_is_unreadable_not_missing() {
    let cert_path = common::write_test_pkcs12();
    let signer = DocumentSigner::new(CertificateBundle::with_plain_passphrase(
        &cert_path,
        "definitely-wrong",
    ));

    let err = signer
        .sign_xml(r#"<factura id="comprobante" version="1.1.0"></factura>"#)
        .unwrap_err();
    assert!(matches!(err, SigningError::CertificateUnreadable { .. }));

    let _ = std::fs::remove_file(cert_path);
}
