//! Signing a single document.

use std::sync::Arc;

use crate::commons::DocsignResult;
use crate::commons::api::{document_code, DocumentId, DocumentType, SignatureId};
use crate::commons::clock::Clock;
use crate::commons::error::Error;
use crate::constants::HASH_ALGORITHM;
use crate::ledger::{SignatureLedger, SignatureRecord, SignatureStatus};
use crate::session::{Session, SessionManager};
use crate::signing::artifact::{artifact_ref, ArtifactStore};
use crate::signing::render::RendererRegistry;
use crate::token::gateway::SigningInput;
use crate::token::registry::TokenRegistry;


//------------ SigningOrchestrator -------------------------------------------

/// Renders, signs, stores and records a document.
///
/// A signature is only recorded if the document has no active signature.
/// This is checked before rendering to avoid useless work and enforced by
/// the ledger when the signature is recorded. If another signature won in
/// between, the freshly stored artifact is removed again.
pub struct SigningOrchestrator {
    sessions: Arc<SessionManager>,
    ledger: Arc<SignatureLedger>,
    renderers: Arc<RendererRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<dyn TokenRegistry>,
    clock: Arc<dyn Clock>,
}

impl SigningOrchestrator {
    pub fn new(
        sessions: Arc<SessionManager>,
        ledger: Arc<SignatureLedger>,
        renderers: Arc<RendererRegistry>,
        artifacts: Arc<dyn ArtifactStore>,
        registry: Arc<dyn TokenRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SigningOrchestrator { sessions, ledger, renderers, artifacts, registry, clock }
    }

    /// Signs a document and, on success, extends the session and marks the
    /// token as used.
    pub async fn sign(
        &self,
        session: &Arc<Session>,
        document_id: &DocumentId,
        document_type: &DocumentType,
        reason: &str,
        location: &str,
    ) -> DocsignResult<SignatureRecord> {
        let record = self
            .sign_document(session, document_id, document_type, reason, location)
            .await?;
        self.mark_session_used(session);
        Ok(record)
    }

    /// Extends the session and updates the token's last-used time.
    pub(crate) fn mark_session_used(&self, session: &Session) {
        self.sessions.refresh_session(session.operator());
        if let Err(e) = self.registry.touch(&session.token().serial, self.clock.now()) {
            warn!(
                "Could not update last use of token '{}': {}",
                session.token().serial,
                e
            );
        }
    }

    /// Signs a document without touching the session expiry.
    pub(crate) async fn sign_document(
        &self,
        session: &Arc<Session>,
        document_id: &DocumentId,
        document_type: &DocumentType,
        reason: &str,
        location: &str,
    ) -> DocsignResult<SignatureRecord> {
        if !session.is_live_at(self.clock.now()) {
            return Err(Error::NoActiveSession(session.operator().clone()));
        }

        if self.ledger.has_active_signature(document_id, document_type)? {
            return Err(Error::DocumentAlreadySigned(
                document_type.clone(),
                document_id.clone(),
            ));
        }

        let content = {
            let renderers = self.renderers.clone();
            let (id, ty) = (document_id.clone(), document_type.clone());
            tokio::task::spawn_blocking(move || renderers.render(&id, &ty))
                .await
                .map_err(|e| Error::RenderFailed(format!("rendering did not complete: {}", e)))??
        };

        let input = SigningInput {
            content,
            reason: reason.to_string(),
            location: location.to_string(),
            signing_time: self.clock.now(),
        };
        let signed_at = input.signing_time;
        let signed = self
            .sessions
            .with_exclusive_access(session, move |handle| handle.sign(&input))
            .await?;

        let record = SignatureRecord {
            id: SignatureId::random(),
            document_id: document_id.clone(),
            document_type: document_type.clone(),
            document_code: document_code(document_type, document_id),
            signer: session.operator().clone(),
            signed_at,
            certificate: session.certificate().clone(),
            ca_provider: session.token().provider.clone(),
            token_serial: session.token().serial.clone(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            reason: reason.to_string(),
            location: location.to_string(),
            artifact: artifact_ref(document_type, document_id, signed_at),
            tsa_timestamp: signed.timestamp,
            ocsp_status: signed.revocation_status,
            status: SignatureStatus::Active,
            revocation: None,
        };

        let ledger = self.ledger.clone();
        let artifacts = self.artifacts.clone();
        let content = signed.content;
        tokio::task::spawn_blocking(move || {
            store_and_record(&ledger, artifacts.as_ref(), record, &content)
        })
        .await
        .map_err(|e| Error::StorageError(format!("storing signature did not complete: {}", e)))?
    }
}

/// Stores the signed document and records the signature. The stored
/// document is removed again if the signature cannot be recorded.
fn store_and_record(
    ledger: &SignatureLedger,
    artifacts: &dyn ArtifactStore,
    record: SignatureRecord,
    content: &[u8],
) -> DocsignResult<SignatureRecord> {
    let artifact = record.artifact.clone();
    let (document_type, document_id) = (record.document_type.clone(), record.document_id.clone());
    let signer = record.signer.clone();

    if let Err(e) = artifacts.store(&artifact, content) {
        error!(
            "Signed {} '{}' for '{}' but could not store it: {}",
            document_type, document_id, signer, e
        );
        return Err(e.into());
    }

    match ledger.record_signature(record) {
        Ok(record) => Ok(record),
        Err(err) => {
            match &err {
                Error::DocumentAlreadySigned(..) => {
                    info!(
                        "{} '{}' was signed concurrently, discarding signature by '{}'",
                        document_type, document_id, signer
                    );
                }
                _ => {
                    error!(
                        "Signed {} '{}' for '{}' but could not record it: {}",
                        document_type, document_id, signer, err
                    );
                }
            }
            if let Err(e) = artifacts.remove(&artifact) {
                warn!("Could not remove orphaned signed document '{}': {}", artifact, e);
            }
            Err(err)
        }
    }
}
