//! SRI web-service client for document reception and authorization.
//!
//! Both operations are SOAP 1.1 calls. Transport problems surface as
//! [`SriError`]; a reachable service that rejects the document is a business
//! outcome and comes back as [`ReceptionOutcome`] or [`AuthorizationOutcome`].
use base64ct::{Base64, Encoding};
use chrono::{DateTime, NaiveDateTime, Utc};
use libxml::{parser::Parser, tree::Node, xpath};
use reqwest::Client;
use thiserror::Error;

use crate::config::Config;
use crate::invoice::AccessKey;

const RECEPTION_NS: &str = "http://ec.gob.sri.ws.recepcion";
const AUTHORIZATION_NS: &str = "http://ec.gob.sri.ws.autorizacion";
const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Errors returned by the SRI client. These are transport and protocol
/// failures only; a rejected document is not an error.
#[derive(Error, Debug)]
pub enum SriError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response from SRI: {0}")]
    InvalidResponse(String),
    #[error("SRI returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Message attached to a reception or authorization response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SriMessage {
    identifier: String,
    message: String,
    additional_info: Option<String>,
    severity: Severity,
}

impl SriMessage {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn additional_info(&self) -> Option<&str> {
        self.additional_info.as_deref()
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Result of the reception phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceptionOutcome {
    /// Estado RECIBIDA; warnings may still be attached.
    Received { warnings: Vec<SriMessage> },
    /// Estado DEVUELTA; the document was rejected with the given messages.
    Returned { messages: Vec<SriMessage> },
}

impl ReceptionOutcome {
    pub fn is_received(&self) -> bool {
        matches!(self, ReceptionOutcome::Received { .. })
    }
}

/// Authorization granted by the SRI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    number: String,
    timestamp: DateTime<Utc>,
    authorized_xml: Option<String>,
}

impl Authorization {
    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The document as returned by the SRI, when present.
    pub fn authorized_xml(&self) -> Option<&str> {
        self.authorized_xml.as_deref()
    }
}

/// Result of the authorization phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Authorized(Authorization),
    /// Any estado other than AUTORIZADO. The raw state is kept so callers
    /// can distinguish NO AUTORIZADO from EN PROCESO.
    Denied {
        state: String,
        messages: Vec<SriMessage>,
    },
}

impl AuthorizationOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationOutcome::Authorized(_))
    }
}

/// SOAP client for the SRI reception and authorization services.
///
/// # Examples
/// ```rust,no_run
/// use factura_core::api::SriClient;
/// use factura_core::config::Config;
///
/// let client = SriClient::new(Config::default())?;
/// # let _ = client;
/// # Ok::<(), factura_core::api::SriError>(())
/// ```
#[derive(Debug)]
pub struct SriClient {
    config: Config,
    client: Client,
}

impl SriClient {
    /// Create a new client using the provided configuration.
    ///
    /// # Errors
    /// Returns [`SriError::Http`] if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, SriError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(SriError::Http)?;
        Ok(Self { config, client })
    }

    /// Submit a signed document to the reception service
    /// (`validarComprobante`).
    ///
    /// # Errors
    /// Returns [`SriError`] for transport failures or unparseable responses.
    pub async fn submit_reception(&self, signed_xml: &str) -> Result<ReceptionOutcome, SriError> {
        let envelope = reception_envelope(&Base64::encode_string(signed_xml.as_bytes()));
        let body = self
            .post_soap(self.config.reception_url(), &envelope)
            .await?;
        parse_reception_response(&body)
    }

    /// Ask the authorization service for the verdict on an access key
    /// (`autorizacionComprobante`).
    ///
    /// # Errors
    /// Returns [`SriError`] for transport failures or unparseable responses.
    pub async fn request_authorization(
        &self,
        access_key: &AccessKey,
    ) -> Result<AuthorizationOutcome, SriError> {
        let envelope = authorization_envelope(access_key.as_str());
        let body = self
            .post_soap(self.config.authorization_url(), &envelope)
            .await?;
        parse_authorization_response(&body)
    }

    async fn post_soap(&self, url: &str, envelope: &str) -> Result<String, SriError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(envelope.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SriError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn reception_envelope(xml_base64: &str) -> String {
    format!(
        concat!(
            r#"<soapenv:Envelope xmlns:soapenv="{soap}" xmlns:ec="{ns}">"#,
            "<soapenv:Header/>",
            "<soapenv:Body>",
            "<ec:validarComprobante>",
            "<xml>{payload}</xml>",
            "</ec:validarComprobante>",
            "</soapenv:Body>",
            "</soapenv:Envelope>",
        ),
        soap = SOAP_ENVELOPE_NS,
        ns = RECEPTION_NS,
        payload = xml_base64,
    )
}

fn authorization_envelope(access_key: &str) -> String {
    format!(
        concat!(
            r#"<soapenv:Envelope xmlns:soapenv="{soap}" xmlns:ec="{ns}">"#,
            "<soapenv:Header/>",
            "<soapenv:Body>",
            "<ec:autorizacionComprobante>",
            "<claveAccesoComprobante>{key}</claveAccesoComprobante>",
            "</ec:autorizacionComprobante>",
            "</soapenv:Body>",
            "</soapenv:Envelope>",
        ),
        soap = SOAP_ENVELOPE_NS,
        ns = AUTHORIZATION_NS,
        key = access_key,
    )
}

fn parse_reception_response(body: &str) -> Result<ReceptionOutcome, SriError> {
    let doc = Parser::default()
        .parse_string(body)
        .map_err(|e| SriError::InvalidResponse(format!("XML parse error: {e:?}")))?;
    let ctx = xpath_context(&doc)?;

    let estado = xpath_text(
        &ctx,
        "//*[local-name()='RespuestaRecepcionComprobante']/*[local-name()='estado']",
    )
    .ok_or_else(|| SriError::InvalidResponse("missing estado in reception response".into()))?;

    let messages = collect_messages(&ctx, "//*[local-name()='mensajes']/*[local-name()='mensaje']")?;

    // An ERROR message is a rejection even under estado RECIBIDA.
    let has_error = messages.iter().any(|m| m.severity == Severity::Error);
    if estado == "RECIBIDA" && !has_error {
        Ok(ReceptionOutcome::Received { warnings: messages })
    } else {
        Ok(ReceptionOutcome::Returned { messages })
    }
}

fn parse_authorization_response(body: &str) -> Result<AuthorizationOutcome, SriError> {
    let doc = Parser::default()
        .parse_string(body)
        .map_err(|e| SriError::InvalidResponse(format!("XML parse error: {e:?}")))?;
    let ctx = xpath_context(&doc)?;

    let estado = xpath_text(
        &ctx,
        "//*[local-name()='autorizacion']/*[local-name()='estado']",
    )
    .ok_or_else(|| {
        SriError::InvalidResponse("missing estado in authorization response".into())
    })?;

    if estado == "AUTORIZADO" {
        let number = xpath_text(
            &ctx,
            "//*[local-name()='autorizacion']/*[local-name()='numeroAutorizacion']",
        )
        .ok_or_else(|| SriError::InvalidResponse("missing numeroAutorizacion".into()))?;
        let timestamp = xpath_text(
            &ctx,
            "//*[local-name()='autorizacion']/*[local-name()='fechaAutorizacion']",
        )
        .map(|raw| parse_authorization_timestamp(&raw))
        .transpose()?
        .unwrap_or_else(Utc::now);
        let authorized_xml = xpath_text(
            &ctx,
            "//*[local-name()='autorizacion']/*[local-name()='comprobante']",
        )
        .map(|payload| decode_comprobante(&payload));

        return Ok(AuthorizationOutcome::Authorized(Authorization {
            number,
            timestamp,
            authorized_xml,
        }));
    }

    let messages = collect_messages(
        &ctx,
        "//*[local-name()='autorizacion']//*[local-name()='mensajes']/*[local-name()='mensaje']",
    )?;
    Ok(AuthorizationOutcome::Denied {
        state: estado,
        messages,
    })
}

// The service sometimes base64-encodes the embedded document.
fn decode_comprobante(payload: &str) -> String {
    match Base64::decode_vec(payload.trim()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| payload.to_string()),
        Err(_) => payload.to_string(),
    }
}

fn parse_authorization_timestamp(raw: &str) -> Result<DateTime<Utc>, SriError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|e| SriError::InvalidResponse(format!("invalid fechaAutorizacion '{raw}': {e}")))
}

fn xpath_context(doc: &libxml::tree::Document) -> Result<xpath::Context, SriError> {
    xpath::Context::new(doc)
        .map_err(|e| SriError::InvalidResponse(format!("XPath context error: {e:?}")))
}

fn xpath_text(ctx: &xpath::Context, expr: &str) -> Option<String> {
    let nodes = ctx.evaluate(expr).ok()?.get_nodes_as_vec();
    let node = nodes.first()?;
    let value = node.get_content().trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn collect_messages(ctx: &xpath::Context, expr: &str) -> Result<Vec<SriMessage>, SriError> {
    let nodes = ctx
        .evaluate(expr)
        .map_err(|e| SriError::InvalidResponse(format!("XPath error: {e:?}")))?
        .get_nodes_as_vec();

    let mut messages = Vec::with_capacity(nodes.len());
    for node in nodes {
        let severity = match child_text(&node, "tipo").as_deref() {
            Some("ADVERTENCIA") => Severity::Warning,
            _ => Severity::Error,
        };
        messages.push(SriMessage {
            identifier: child_text(&node, "identificador").unwrap_or_default(),
            message: child_text(&node, "mensaje").unwrap_or_default(),
            additional_info: child_text(&node, "informacionAdicional"),
            severity,
        });
    }
    Ok(messages)
}

fn child_text(node: &Node, name: &str) -> Option<String> {
    for child in node.get_child_nodes() {
        if child.is_element_node() && child.get_name() == name {
            let value = child.get_content().trim().to_string();
            if value.is_empty() {
                return None;
            }
            return Some(value);
        }
    }
    None
}
