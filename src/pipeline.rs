//! Document lifecycle orchestration: sign once, submit, track the verdict.
//!
//! The coordinator drives one invoice through
//! `Draft -> Signed -> Received -> Authorized | Rejected`. The signed
//! checkpoint is persisted before any network call so a transport failure
//! can be retried without re-signing; a second signature would embed a new
//! random access-key component and orphan the submitted key.
use thiserror::Error as ThisError;
use tracing::{debug, warn};

use crate::api::{Authorization, AuthorizationOutcome, ReceptionOutcome, SriClient, SriMessage};
use crate::invoice::{AccessKey, AccessKeyGenerator, DocumentState, FinalizedInvoice};
use crate::invoice::sign::DocumentSigner;
use crate::Error;

/// Error reported by an [`InvoiceStore`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("invoice store error: {0}")]
pub struct StoreError(pub String);

/// Persisted signing checkpoint for one invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRecord {
    pub access_key: AccessKey,
    pub signed_xml: String,
    pub state: DocumentState,
}

/// Persistence port. Implementations typically map to the invoice row of
/// the host application's database.
pub trait InvoiceStore {
    /// The signing checkpoint for a sequential, if one was ever persisted.
    fn signed_record(&self, sequential: &str) -> Result<Option<SignedRecord>, StoreError>;

    fn save_signed(&mut self, sequential: &str, record: &SignedRecord) -> Result<(), StoreError>;

    fn set_state(&mut self, sequential: &str, state: DocumentState) -> Result<(), StoreError>;

    fn save_authorization(
        &mut self,
        sequential: &str,
        authorization: &Authorization,
    ) -> Result<(), StoreError>;

    fn save_rejection(
        &mut self,
        sequential: &str,
        messages: &[SriMessage],
    ) -> Result<(), StoreError>;
}

/// Phase at which the pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStep {
    Reception,
    Authorization,
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Authorized(Authorization),
    /// Reception succeeded and authorization was not requested.
    Received,
    /// Received, but the authorization service has not settled on a verdict.
    Pending { state: String },
    Rejected {
        step: ProcessStep,
        messages: Vec<SriMessage>,
    },
    /// The invoice already reached a terminal state in an earlier run.
    AlreadyFinal { state: DocumentState },
}

/// Drives invoices through signing and the two submission phases.
pub struct Coordinator<S: InvoiceStore> {
    generator: AccessKeyGenerator,
    signer: DocumentSigner,
    client: SriClient,
    store: S,
}

impl<S: InvoiceStore> Coordinator<S> {
    pub fn new(
        generator: AccessKeyGenerator,
        signer: DocumentSigner,
        client: SriClient,
        store: S,
    ) -> Self {
        Self {
            generator,
            signer,
            client,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the pipeline for one finalized invoice.
    ///
    /// With `auto_authorize` false the pipeline stops after a successful
    /// reception and returns [`ProcessOutcome::Received`]; the authorization
    /// verdict can be fetched in a later invocation with the flag set.
    ///
    /// A persisted signed record is resumed rather than re-signed. Errors
    /// (signing failure, store failure, transport fault) leave the persisted
    /// state untouched beyond the last completed phase.
    ///
    /// # Errors
    /// Returns [`Error`] for signing, store, and transport failures. A
    /// document the SRI rejects is a [`ProcessOutcome::Rejected`], not an
    /// error.
    pub async fn process(
        &mut self,
        invoice: FinalizedInvoice,
        auto_authorize: bool,
    ) -> Result<ProcessOutcome, Error> {
        let sequential = invoice.data().sequential().to_string();

        let record = match self.store.signed_record(&sequential)? {
            Some(record) if record.state.is_terminal() => {
                debug!(%sequential, state = ?record.state, "invoice already settled");
                return Ok(ProcessOutcome::AlreadyFinal {
                    state: record.state,
                });
            }
            Some(record) => {
                debug!(%sequential, access_key = %record.access_key, "resuming from signed record");
                record
            }
            None => {
                let access_key = self.generator.generate(invoice.data())?;
                let signed = self.signer.sign(invoice, access_key)?;
                let record = SignedRecord {
                    access_key: signed.access_key().clone(),
                    signed_xml: signed.xml().to_string(),
                    state: DocumentState::Signed,
                };
                self.store.save_signed(&sequential, &record)?;
                record
            }
        };

        match record.state {
            DocumentState::Signed => {
                let outcome = self.client.submit_reception(&record.signed_xml).await.map_err(|e| {
                    warn!(%sequential, error = %e, "reception transport failure");
                    e
                })?;
                match outcome {
                    ReceptionOutcome::Received { warnings } => {
                        for warning in &warnings {
                            warn!(%sequential, code = warning.identifier(), message = warning.message(), "reception warning");
                        }
                        self.store.set_state(&sequential, DocumentState::Received)?;
                    }
                    ReceptionOutcome::Returned { messages } => {
                        warn!(%sequential, count = messages.len(), "document returned by reception");
                        self.store.save_rejection(&sequential, &messages)?;
                        self.store.set_state(&sequential, DocumentState::Rejected)?;
                        return Ok(ProcessOutcome::Rejected {
                            step: ProcessStep::Reception,
                            messages,
                        });
                    }
                }
            }
            DocumentState::Received => {}
            other => {
                return Err(StoreError(format!(
                    "invoice {sequential} resumed in unexpected state {other:?}"
                ))
                .into());
            }
        }

        if !auto_authorize {
            debug!(%sequential, "stopping after reception; authorization not requested");
            return Ok(ProcessOutcome::Received);
        }

        let outcome = self
            .client
            .request_authorization(&record.access_key)
            .await
            .map_err(|e| {
                warn!(%sequential, error = %e, "authorization transport failure");
                e
            })?;

        match outcome {
            AuthorizationOutcome::Authorized(authorization) => {
                self.store.save_authorization(&sequential, &authorization)?;
                self.store.set_state(&sequential, DocumentState::Authorized)?;
                Ok(ProcessOutcome::Authorized(authorization))
            }
            AuthorizationOutcome::Denied { state, messages: _ } if is_pending_state(&state) => {
                debug!(%sequential, %state, "authorization still pending");
                Ok(ProcessOutcome::Pending { state })
            }
            AuthorizationOutcome::Denied { state, messages } => {
                warn!(%sequential, %state, count = messages.len(), "authorization denied");
                self.store.save_rejection(&sequential, &messages)?;
                self.store.set_state(&sequential, DocumentState::Rejected)?;
                Ok(ProcessOutcome::Rejected {
                    step: ProcessStep::Authorization,
                    messages,
                })
            }
        }
    }
}

// EN PROCESO and PPR both mean "ask again later".
fn is_pending_state(state: &str) -> bool {
    matches!(state, "EN PROCESO" | "EN PROCESAMIENTO" | "PPR")
}
