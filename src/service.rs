//! The signature service: what callers of docsign talk to.
use std::sync::Arc;

use tokio::runtime;

use crate::commons::actor::Actor;
use crate::commons::api::{
    BatchSignRequest, BatchSignResponse, DocumentId, OperatorId, SessionInfo,
    SessionStatus, SignDocumentRequest, SignDocumentResponse, SignatureId,
    SignatureVerification, TokenInfo,
};
use crate::commons::clock::{Clock, SystemClock};
use crate::commons::error::Error;
use crate::commons::{DocsignEmptyResult, DocsignResult};
use crate::config::Config;
use crate::ledger::{SignatureLedger, SignatureRecord};
use crate::session::store::MemorySessionStore;
use crate::session::{Session, SessionManager};
use crate::signing::artifact::ArtifactStore;
use crate::signing::batch::BatchCoordinator;
use crate::signing::orchestrator::SigningOrchestrator;
use crate::signing::progress::ProgressChannel;
use crate::signing::render::RendererRegistry;
use crate::signing::verify;
use crate::storage::Stores;
use crate::token::gateway::{Credential, TokenGateway};
use crate::token::registry::{TokenMapping, TokenRegistry};


//------------ SignatureService ----------------------------------------------

/// Ties sessions, signing and the ledger together.
///
/// Operators are identified by the caller. Signing without a live session
/// requires the token credential, with it a session is opened on the fly.
pub struct SignatureService {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,

    sessions: Arc<SessionManager>,
    ledger: Arc<SignatureLedger>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<dyn TokenRegistry>,

    orchestrator: Arc<SigningOrchestrator>,
    batch: BatchCoordinator,
}

impl SignatureService {
    /// Builds the service using the storage configured in `config`.
    pub fn build(
        config: Arc<Config>,
        gateway: Arc<dyn TokenGateway>,
        renderers: RendererRegistry,
        progress: Arc<dyn ProgressChannel>,
    ) -> DocsignResult<Self> {
        let stores = Stores::create(&config.storage_uri)?;
        Ok(Self::with_stores(
            config,
            stores,
            gateway,
            renderers,
            progress,
            Arc::new(SystemClock),
        ))
    }

    pub fn with_stores(
        config: Arc<Config>,
        stores: Stores,
        gateway: Arc<dyn TokenGateway>,
        renderers: RendererRegistry,
        progress: Arc<dyn ProgressChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            gateway,
            Arc::new(MemorySessionStore::new()),
            stores.registry.clone(),
            clock.clone(),
            config.session_ttl(),
        ));
        let ledger = Arc::new(SignatureLedger::new(stores.signatures));

        let orchestrator = Arc::new(SigningOrchestrator::new(
            sessions.clone(),
            ledger.clone(),
            Arc::new(renderers),
            stores.artifacts.clone(),
            stores.registry.clone(),
            clock.clone(),
        ));
        let batch = BatchCoordinator::new(
            orchestrator.clone(),
            ledger.clone(),
            progress,
            config.max_batch_size,
            config.default_location.clone(),
        );

        SignatureService {
            config,
            clock,
            sessions,
            ledger,
            artifacts: stores.artifacts,
            registry: stores.registry,
            orchestrator,
            batch,
        }
    }

    /// Starts closing expired sessions in the background, every
    /// `session_sweep_seconds`.
    pub fn spawn_session_sweep(&self, runtime: &runtime::Handle) {
        self.sessions
            .spawn_sweep(runtime, self.config.session_sweep_interval());
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// # Sessions
impl SignatureService {
    pub async fn open_session(
        &self,
        operator: &OperatorId,
        credential: &Credential,
    ) -> DocsignResult<SessionInfo> {
        let session = self.sessions.open_session(operator, credential).await?;
        Ok(session.info())
    }

    pub fn session_status(&self, operator: &OperatorId) -> SessionStatus {
        self.sessions
            .status(operator, self.config.certificate_expiry_warning_days)
    }

    pub async fn close_session(&self, operator: &OperatorId) {
        self.sessions.invalidate_session(operator).await
    }

    /// The operator's live session, opened with the credential if needed.
    async fn session_for(
        &self,
        operator: &OperatorId,
        credential: Option<&Credential>,
    ) -> DocsignResult<Arc<Session>> {
        if let Some(session) = self.sessions.get_active_session(operator) {
            return Ok(session);
        }
        match credential {
            Some(credential) => self.sessions.open_session(operator, credential).await,
            None => Err(Error::NoActiveSession(operator.clone())),
        }
    }
}

/// # Signing
impl SignatureService {
    pub async fn sign(
        &self,
        operator: &OperatorId,
        request: SignDocumentRequest,
    ) -> DocsignResult<SignDocumentResponse> {
        let session = self
            .session_for(operator, request.credential.as_ref())
            .await?;
        let location = request
            .location
            .as_deref()
            .unwrap_or(&self.config.default_location);

        let record = self
            .orchestrator
            .sign(
                &session,
                &request.document_id,
                &request.document_type,
                &request.reason,
                location,
            )
            .await?;
        Ok(sign_response(&record))
    }

    pub async fn sign_batch(
        &self,
        operator: &OperatorId,
        request: BatchSignRequest,
    ) -> DocsignResult<BatchSignResponse> {
        self.batch.check_batch_size(request.document_ids.len())?;

        let session = self
            .session_for(operator, request.credential.as_ref())
            .await?;
        self.batch
            .sign_batch(
                &session,
                &request.document_ids,
                &request.document_type,
                &request.reason,
            )
            .await
    }
}

/// # Signatures
impl SignatureService {
    /// The active signatures of a document, newest first.
    pub fn list_signatures(
        &self,
        document_id: &DocumentId,
    ) -> DocsignResult<Vec<SignatureRecord>> {
        self.ledger.list_active_signatures(document_id)
    }

    /// All signatures of a document including revoked ones, newest first.
    pub fn signature_history(
        &self,
        document_id: &DocumentId,
    ) -> DocsignResult<Vec<SignatureRecord>> {
        self.ledger.list_signature_history(document_id)
    }

    pub fn signature(&self, id: SignatureId) -> DocsignResult<SignatureRecord> {
        self.ledger.get(id)
    }

    pub fn revoke(
        &self,
        id: SignatureId,
        requested_by: &Actor,
        reason: &str,
    ) -> DocsignEmptyResult {
        self.ledger
            .revoke(id, requested_by, reason, self.clock.now())
            .map(|_| ())
    }

    pub fn verify_signature(
        &self,
        id: SignatureId,
    ) -> DocsignResult<SignatureVerification> {
        verify::verify_signature(&self.ledger, self.artifacts.as_ref(), id)
    }
}

/// # Tokens
impl SignatureService {
    pub async fn list_tokens(&self) -> DocsignResult<Vec<TokenInfo>> {
        self.sessions.list_tokens().await
    }

    /// Assigns a token to an operator without opening a session.
    ///
    /// Label and provider are taken from the token if it is plugged in.
    pub async fn register_token(
        &self,
        operator: &OperatorId,
        token_serial: &str,
    ) -> DocsignResult<TokenMapping> {
        let serial = token_serial.trim();
        if serial.is_empty() {
            return Err(Error::InvalidInput("token serial is empty".to_string()));
        }

        let present = match self.list_tokens().await {
            Ok(tokens) => tokens.into_iter().find(|token| token.serial == serial),
            Err(e) => {
                warn!("Cannot list tokens while registering '{}': {}", serial, e);
                None
            }
        };
        let token = present.unwrap_or_else(|| TokenInfo {
            serial: serial.to_string(),
            label: String::new(),
            provider: String::new(),
        });

        let mapping = self.registry.upsert(operator, &token, self.clock.now())?;
        info!("Registered token '{}' for '{}'", serial, operator);
        Ok(mapping)
    }

    pub fn operator_tokens(
        &self,
        operator: &OperatorId,
    ) -> DocsignResult<Vec<TokenMapping>> {
        self.registry.tokens_for(operator).map_err(Error::from)
    }
}

fn sign_response(record: &SignatureRecord) -> SignDocumentResponse {
    SignDocumentResponse {
        signature_id: record.id,
        document_code: record.document_code.clone(),
        signer_name: record.certificate.common_name().to_string(),
        signed_at: record.signed_at,
        certificate_serial: record.certificate.serial.clone(),
        ca_provider: record.ca_provider.clone(),
        signed_document_ref: record.artifact.clone(),
        tsa_timestamp: record.tsa_timestamp.clone(),
        ocsp_status: record.ocsp_status.clone(),
    }
}


//------------ Hardware gateway ----------------------------------------------

/// The gateway for the PKCS#11 providers in the configuration.
#[cfg(feature = "hsm")]
pub fn hardware_gateway(config: &Config) -> DocsignResult<Arc<dyn TokenGateway>> {
    use crate::token::pkcs11::Pkcs11Gateway;

    if config.ca_providers.is_empty() {
        warn!("No CA providers configured, no tokens will be found");
    }
    Ok(Arc::new(Pkcs11Gateway::new(&config.ca_providers)))
}

#[cfg(not(feature = "hsm"))]
pub fn hardware_gateway(_config: &Config) -> DocsignResult<Arc<dyn TokenGateway>> {
    Err(Error::TokenUnavailable(
        "docsign was built without the 'hsm' feature".to_string(),
    ))
}
