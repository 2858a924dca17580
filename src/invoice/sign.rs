//! Enveloped XMLDSig signing for invoice documents.
//!
//! The signature references the `#comprobante` root, uses exclusive
//! canonicalization with SHA-256 digests, and signs with RSA-SHA256 from a
//! PKCS#12 bundle. Key material is read from disk on every attempt and never
//! cached.
use crate::invoice::xml::{DocumentXml, ToXml};
use crate::invoice::{AccessKey, FinalizedInvoice, SignedDocument};
use base64ct::{Base64, Encoding};
use libxml::{
    parser::Parser,
    tree::{c14n, Document, Node},
};
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

const EXC_C14N_ALGORITHM: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const RSA_SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const ENVELOPED_SIGNATURE_ALGORITHM: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("certificate not found at {0}")]
    CertificateNotFound(PathBuf),
    #[error("certificate at {path} could not be read: {reason}")]
    CertificateUnreadable { path: PathBuf, reason: String },
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Provides the PKCS#12 passphrase at the moment of signing.
///
/// Implementations backed by an encrypted secret store decrypt on each call,
/// so plaintext never outlives a signing attempt.
pub trait PassphraseSource: Send + Sync {
    fn reveal(&self) -> Result<String, SigningError>;
}

impl<F> PassphraseSource for F
where
    F: Fn() -> String + Send + Sync,
{
    fn reveal(&self) -> Result<String, SigningError> {
        Ok(self())
    }
}

/// Location of the signing certificate plus its passphrase source.
pub struct CertificateBundle {
    path: PathBuf,
    passphrase: Box<dyn PassphraseSource>,
}

impl CertificateBundle {
    pub fn new(path: impl Into<PathBuf>, passphrase: Box<dyn PassphraseSource>) -> Self {
        Self {
            path: path.into(),
            passphrase,
        }
    }

    /// Bundle with a passphrase already held in memory.
    pub fn with_plain_passphrase(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        let passphrase = passphrase.into();
        Self::new(path, Box::new(move || passphrase.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<(PKey<Private>, X509), SigningError> {
        if !self.path.exists() {
            return Err(SigningError::CertificateNotFound(self.path.clone()));
        }
        let der = std::fs::read(&self.path).map_err(|e| SigningError::CertificateUnreadable {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let passphrase = self.passphrase.reveal()?;
        let parsed = Pkcs12::from_der(&der)
            .and_then(|p12| p12.parse2(&passphrase))
            .map_err(|e| SigningError::CertificateUnreadable {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        let pkey = parsed.pkey.ok_or_else(|| SigningError::CertificateUnreadable {
            path: self.path.clone(),
            reason: "bundle has no private key".into(),
        })?;
        let cert = parsed.cert.ok_or_else(|| SigningError::CertificateUnreadable {
            path: self.path.clone(),
            reason: "bundle has no certificate".into(),
        })?;
        Ok((pkey, cert))
    }
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Signs invoice documents with the configured certificate bundle.
pub struct DocumentSigner {
    bundle: CertificateBundle,
}

impl DocumentSigner {
    pub fn new(bundle: CertificateBundle) -> Self {
        Self { bundle }
    }

    /// Render and sign a finalized invoice under its access key.
    ///
    /// # Errors
    /// Fails if the certificate bundle cannot be loaded or the signature
    /// cannot be produced. The invoice itself is returned unchanged on error
    /// paths only through the absence of a [`SignedDocument`].
    pub fn sign(
        &self,
        invoice: FinalizedInvoice,
        access_key: AccessKey,
    ) -> Result<SignedDocument, SigningError> {
        let unsigned_xml = DocumentXml::new(&invoice, &access_key)
            .to_xml()
            .map_err(|e| SigningError::SigningFailed(e.to_string()))?;
        let signed_xml = self.sign_xml(&unsigned_xml)?;
        Ok(invoice.into_signed(access_key, signed_xml))
    }

    /// Sign an already-rendered document, appending one `ds:Signature`
    /// element to its root.
    pub fn sign_xml(&self, xml: &str) -> Result<String, SigningError> {
        let (pkey, cert) = self.bundle.load()?;

        let mut doc = Parser::default()
            .parse_string(xml)
            .map_err(|e| SigningError::SigningFailed(format!("XML parse error: {e:?}")))?;

        let digest_b64 = document_digest_base64(&doc)?;
        let signed_info = signed_info_xml(&digest_b64);
        let signed_info_canonical = canonicalize_fragment(&signed_info)?;
        let signature_b64 = rsa_sha256_base64(&pkey, signed_info_canonical.as_bytes())?;
        let cert_b64 = certificate_base64(&cert)?;

        let signature_fragment = signature_xml(&signed_info, &signature_b64, &cert_b64);
        append_fragment_to_root(&mut doc, &signature_fragment)?;

        Ok(doc.to_string())
    }
}

/// SHA-256 of the exclusive canonical form of the whole document,
/// base64-encoded.
fn document_digest_base64(doc: &Document) -> Result<String, SigningError> {
    let canonical = canonicalize_document(doc)?;
    let hash = Sha256::digest(canonical.as_bytes());
    Ok(Base64::encode_string(&hash))
}

fn canonicalize_document(doc: &Document) -> Result<String, SigningError> {
    let copy = doc
        .dup()
        .map_err(|e| SigningError::SigningFailed(format!("failed to duplicate xml: {e:?}")))?;
    let canon_opts = c14n::CanonicalizationOptions {
        mode: c14n::CanonicalizationMode::ExclusiveCanonical1_0,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    };
    copy.canonicalize(canon_opts, None)
        .map_err(|e| SigningError::SigningFailed(format!("failed to canonicalize xml: {e:?}")))
}

fn canonicalize_fragment(xml: &str) -> Result<String, SigningError> {
    let doc = Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::SigningFailed(format!("XML parse error: {e:?}")))?;
    canonicalize_document(&doc)
}

fn rsa_sha256_base64(pkey: &PKey<Private>, data: &[u8]) -> Result<String, SigningError> {
    let signature = Signer::new(MessageDigest::sha256(), pkey)
        .and_then(|mut signer| {
            signer.update(data)?;
            signer.sign_to_vec()
        })
        .map_err(|e| SigningError::SigningFailed(format!("RSA signature error: {e}")))?;
    Ok(Base64::encode_string(&signature))
}

fn certificate_base64(cert: &X509) -> Result<String, SigningError> {
    let der = cert
        .to_der()
        .map_err(|e| SigningError::SigningFailed(format!("certificate DER error: {e}")))?;
    Ok(Base64::encode_string(&der))
}

fn signed_info_xml(digest_b64: &str) -> String {
    format!(
        concat!(
            r#"<ds:SignedInfo xmlns:ds="{ds}">"#,
            r#"<ds:CanonicalizationMethod Algorithm="{c14n}"/>"#,
            r#"<ds:SignatureMethod Algorithm="{rsa}"/>"#,
            r##"<ds:Reference URI="#comprobante">"##,
            r#"<ds:Transforms>"#,
            r#"<ds:Transform Algorithm="{env}"/>"#,
            r#"<ds:Transform Algorithm="{c14n}"/>"#,
            r#"</ds:Transforms>"#,
            r#"<ds:DigestMethod Algorithm="{sha}"/>"#,
            r#"<ds:DigestValue>{digest}</ds:DigestValue>"#,
            r#"</ds:Reference>"#,
            r#"</ds:SignedInfo>"#,
        ),
        ds = DS_NS,
        c14n = EXC_C14N_ALGORITHM,
        rsa = RSA_SHA256_ALGORITHM,
        env = ENVELOPED_SIGNATURE_ALGORITHM,
        sha = SHA256_ALGORITHM,
        digest = digest_b64,
    )
}

fn signature_xml(signed_info: &str, signature_b64: &str, cert_b64: &str) -> String {
    format!(
        concat!(
            r#"<ds:Signature xmlns:ds="{ds}">"#,
            "{signed_info}",
            r#"<ds:SignatureValue>{signature}</ds:SignatureValue>"#,
            r#"<ds:KeyInfo>"#,
            r#"<ds:X509Data>"#,
            r#"<ds:X509Certificate>{cert}</ds:X509Certificate>"#,
            r#"</ds:X509Data>"#,
            r#"</ds:KeyInfo>"#,
            r#"</ds:Signature>"#,
        ),
        ds = DS_NS,
        signed_info = signed_info,
        signature = signature_b64,
        cert = cert_b64,
    )
}

fn append_fragment_to_root(doc: &mut Document, xml: &str) -> Result<(), SigningError> {
    let mut node = import_fragment(doc, xml)?;
    let mut root = doc
        .get_root_element()
        .ok_or_else(|| SigningError::SigningFailed("missing document root".into()))?;
    root.add_child(&mut node)
        .map_err(|e| SigningError::SigningFailed(e.to_string()))?;
    Ok(())
}

fn import_fragment(doc: &mut Document, xml: &str) -> Result<Node, SigningError> {
    let fragment = Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::SigningFailed(format!("XML parse error: {e:?}")))?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| SigningError::SigningFailed("missing fragment root".into()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| SigningError::SigningFailed("failed to import fragment".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_info_embeds_digest_and_algorithms() {
        let xml = signed_info_xml("abc123=");
        assert!(xml.contains(r##"<ds:Reference URI="#comprobante">"##));
        assert!(xml.contains("<ds:DigestValue>abc123=</ds:DigestValue>"));
        assert!(xml.contains(RSA_SHA256_ALGORITHM));
        assert!(xml.contains(ENVELOPED_SIGNATURE_ALGORITHM));
        assert_eq!(xml.matches(EXC_C14N_ALGORITHM).count(), 2);
    }

    #[test]
    fn missing_certificate_reports_path() {
        let bundle =
            CertificateBundle::with_plain_passphrase("/nonexistent/cert.p12", "secret");
        let signer = DocumentSigner::new(bundle);
        let err = signer
            .sign_xml(r#"<factura id="comprobante" version="1.1.0"></factura>"#)
            .unwrap_err();
        match err {
            SigningError::CertificateNotFound(path) => {
                assert_eq!(path, PathBuf::from("/nonexistent/cert.p12"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn canonical_form_strips_xml_declaration() {
        let canonical = canonicalize_fragment(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<a><b>1</b></a>",
        )
        .expect("canonicalize");
        assert!(!canonical.contains("<?xml"));
        assert!(canonical.contains("<b>1</b>"));
    }
}
