//! Rust core for Ecuadorian SRI electronic invoicing (access keys, invoice XML,
//! enveloped XMLDSig signing, and the reception/authorization web services).
//!
//! # Examples
//! ```rust
//! use factura_core::config::{Config, EnvironmentType};
//!
//! let config = Config::new(EnvironmentType::Test);
//! # let _ = config;
//! ```
pub mod api;
pub mod config;
pub mod invoice;
pub mod pipeline;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Xml(#[from] invoice::xml::DocumentXmlError),
    #[error(transparent)]
    Sri(#[from] api::SriError),
    #[error(transparent)]
    Store(#[from] pipeline::StoreError),
}
