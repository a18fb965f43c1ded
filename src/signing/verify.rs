//! Checking a recorded signature against its stored signed document.

use crate::commons::DocsignResult;
use crate::commons::api::{SignatureId, SignatureVerification};
use crate::ledger::SignatureLedger;
use crate::signing::artifact::ArtifactStore;
use crate::token::envelope::SignedEnvelope;

/// Verifies the signed document of a recorded signature.
///
/// The content digest is recomputed and the signature is checked against
/// the certificate embedded in the document. A revoked signature can still
/// verify cryptographically, the result reports both. Problems with the
/// stored document itself are reported in the result rather than as an
/// error, unknown signatures are an error.
pub fn verify_signature(
    ledger: &SignatureLedger,
    artifacts: &dyn ArtifactStore,
    id: SignatureId,
) -> DocsignResult<SignatureVerification> {
    let record = ledger.get(id)?;

    let problem = match artifacts.load(&record.artifact) {
        Err(e) => Some(e.to_string()),
        Ok(bytes) => match SignedEnvelope::from_slice(&bytes).and_then(|envelope| {
            envelope.verify()?;
            Ok(envelope)
        }) {
            Err(e) => Some(e.to_string()),
            Ok(envelope) if envelope.attributes.signing_time != record.signed_at => {
                Some("signing time does not match the recorded signature".to_string())
            }
            Ok(_) => None,
        },
    };

    if let Some(problem) = &problem {
        warn!("Signature '{}' does not verify: {}", id, problem);
    } else {
        debug!("Signature '{}' verifies", id);
    }

    Ok(SignatureVerification {
        signature_id: id,
        valid: problem.is_none(),
        revoked: !record.is_active(),
        signer: record.certificate,
        signed_at: record.signed_at,
        reason: record.reason,
        location: record.location,
        problem,
    })
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use bytes::Bytes;

    use super::*;
    use crate::commons::actor::Actor;
    use crate::commons::api::{DocumentId, DocumentType, OperatorId};
    use crate::commons::clock::ManualClock;
    use crate::commons::error::Error;
    use crate::ledger::memory::MemorySignatureStore;
    use crate::session::SessionManager;
    use crate::session::store::MemorySessionStore;
    use crate::signing::artifact::MemoryArtifactStore;
    use crate::signing::orchestrator::SigningOrchestrator;
    use crate::signing::render::{RenderError, RendererRegistry};
    use crate::token::mock::{MockTokenConfig, MockTokenGateway};
    use crate::token::registry::MemoryTokenRegistry;

    struct Setup {
        ledger: Arc<SignatureLedger>,
        artifacts: Arc<MemoryArtifactStore>,
        orchestrator: SigningOrchestrator,
        sessions: Arc<SessionManager>,
    }

    fn setup() -> Setup {
        let _ = stderrlog::new().verbosity(99).init();
        let gateway = MockTokenGateway::new(MockTokenConfig::new("T1", "1234")).unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let registry = Arc::new(MemoryTokenRegistry::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::new(gateway),
            Arc::new(MemorySessionStore::new()),
            registry.clone(),
            clock.clone(),
            chrono::Duration::minutes(15),
        ));
        let ledger = Arc::new(SignatureLedger::new(Arc::new(MemorySignatureStore::new())));
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let renderers = RendererRegistry::new().with_fallback(
            |id: &DocumentId, _: &DocumentType| -> Result<Bytes, RenderError> {
                Ok(Bytes::from(format!("content of {}", id)))
            },
        );
        let orchestrator = SigningOrchestrator::new(
            sessions.clone(),
            ledger.clone(),
            Arc::new(renderers),
            artifacts.clone(),
            registry,
            clock,
        );
        Setup { ledger, artifacts, orchestrator, sessions }
    }

    async fn sign(s: &Setup, doc: &str) -> SignatureId {
        let session = s
            .sessions
            .open_session(&OperatorId::from("alice"), &"1234".into())
            .await
            .unwrap();
        s.orchestrator
            .sign(
                &session,
                &DocumentId::new(doc).unwrap(),
                &DocumentType::new("EMR").unwrap(),
                "Approve",
                "Ha Noi",
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn recorded_signature_verifies() {
        let s = setup();
        let id = sign(&s, "D1").await;

        let verification = verify_signature(&s.ledger, s.artifacts.as_ref(), id).unwrap();
        assert!(verification.valid, "{:?}", verification.problem);
        assert!(!verification.revoked);
        assert_eq!(verification.reason, "Approve");
        assert_eq!(verification.location, "Ha Noi");
        assert_eq!(verification.signer.common_name(), "Mock Signer");

        let alice = Actor::operator(OperatorId::from("alice"));
        s.ledger.revoke(id, &alice, "typo", chrono::Utc::now()).unwrap();
        let verification = verify_signature(&s.ledger, s.artifacts.as_ref(), id).unwrap();
        assert!(verification.valid);
        assert!(verification.revoked);
    }

    #[tokio::test]
    async fn tampered_content_does_not_verify() {
        let s = setup();
        let id = sign(&s, "D1").await;
        let record = s.ledger.get(id).unwrap();

        let bytes = s.artifacts.load(&record.artifact).unwrap();
        let mut envelope = SignedEnvelope::from_slice(&bytes).unwrap();
        envelope.content = BASE64.encode(b"something else");
        s.artifacts
            .store(&record.artifact, &serde_json::to_vec(&envelope).unwrap())
            .unwrap();

        let verification = verify_signature(&s.ledger, s.artifacts.as_ref(), id).unwrap();
        assert!(!verification.valid);
        assert!(verification.problem.is_some());
    }

    #[tokio::test]
    async fn missing_document_or_signature() {
        let s = setup();
        let id = sign(&s, "D1").await;
        let record = s.ledger.get(id).unwrap();
        s.artifacts.remove(&record.artifact).unwrap();

        let verification = verify_signature(&s.ledger, s.artifacts.as_ref(), id).unwrap();
        assert!(!verification.valid);

        let err = verify_signature(&s.ledger, s.artifacts.as_ref(), SignatureId::random())
            .unwrap_err();
        assert!(matches!(err, Error::SignatureNotFound(_)));
    }
}
