#![allow(dead_code)] // Different tests use different parts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tempfile::TempDir;
use url::Url;

use docsign::commons::api::{
    BatchSignRequest, DocumentId, DocumentType, OperatorId, SignDocumentRequest,
    SignatureId,
};
use docsign::commons::clock::ManualClock;
use docsign::config::Config;
use docsign::ledger::store::{LedgerStoreError, SignatureStore};
use docsign::ledger::{Revocation, SignatureRecord};
use docsign::service::SignatureService;
use docsign::signing::progress::BroadcastProgressChannel;
use docsign::signing::render::{RenderError, RendererRegistry};
use docsign::storage::Stores;
use docsign::token::gateway::Credential;
use docsign::token::mock::{MockTokenConfig, MockTokenGateway};


pub const PIN: &str = "1234";


//------------ TestConfig ----------------------------------------------------

/// A test setup builder.
pub struct TestConfig {
    data_dir: Option<TempDir>,
    token: MockTokenConfig,
    max_batch_size: Option<usize>,
    failing_inserts: usize,
}

impl TestConfig {
    pub fn mem_storage() -> Self {
        TestConfig {
            data_dir: None,
            token: MockTokenConfig::new("T1", PIN),
            max_batch_size: None,
            failing_inserts: 0,
        }
    }

    pub fn file_storage() -> Self {
        TestConfig {
            data_dir: Some(TempDir::new().unwrap()),
            ..Self::mem_storage()
        }
    }

    pub fn token(mut self, token: MockTokenConfig) -> Self {
        self.token = token;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Makes the first `count` attempts to record a signature fail.
    pub fn failing_inserts(mut self, count: usize) -> Self {
        self.failing_inserts = count;
        self
    }

    pub fn start(self) -> TestService {
        let _ = stderrlog::new().verbosity(99).init();

        let mut config = Config::test_config(self.data_dir.as_ref().map(TempDir::path));
        if let Some(size) = self.max_batch_size {
            config.max_batch_size = size;
        }
        let config = Arc::new(config);

        let mut stores = Stores::create(&config.storage_uri).unwrap();
        let failing = Arc::new(FailingSignatureStore::new(
            stores.signatures.clone(),
            self.failing_inserts,
        ));
        stores.signatures = failing.clone() as Arc<dyn SignatureStore>;

        let gateway = MockTokenGateway::new(self.token).unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let progress = Arc::new(BroadcastProgressChannel::new());

        let service = SignatureService::with_stores(
            config,
            stores.clone(),
            Arc::new(gateway.clone()),
            renderers(),
            progress.clone(),
            clock.clone(),
        );

        TestService {
            service,
            gateway,
            clock,
            progress,
            stores,
            failing,
            _data_dir: self.data_dir,
        }
    }
}


//------------ TestService ---------------------------------------------------

pub struct TestService {
    pub service: SignatureService,
    pub gateway: MockTokenGateway,
    pub clock: Arc<ManualClock>,
    pub progress: Arc<BroadcastProgressChannel>,
    pub stores: Stores,
    pub failing: Arc<FailingSignatureStore>,
    _data_dir: Option<TempDir>,
}

impl TestService {
    pub async fn open(&self, operator: &str) {
        self.service
            .open_session(&op(operator), &Credential::new(PIN))
            .await
            .unwrap();
    }

    pub async fn sign(
        &self,
        operator: &str,
        document: &str,
        ty: &str,
    ) -> docsign::commons::DocsignResult<SignatureId> {
        self.service
            .sign(&op(operator), sign_request(document, ty, None))
            .await
            .map(|res| res.signature_id)
    }

    /// The signed documents of a type stored on disk, empty for memory
    /// storage.
    pub fn signed_documents(&self, ty: &str) -> Vec<String> {
        let Some(dir) = &self._data_dir else {
            return vec![];
        };
        let dir = dir.path().join("artifacts/signed").join(ty);
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => vec![],
        }
    }
}


//------------ Renderers -----------------------------------------------------

/// Renders every document as a small HTML page. Documents whose id starts
/// with "missing" do not exist.
pub fn renderers() -> RendererRegistry {
    RendererRegistry::new().with_fallback(
        |id: &DocumentId, ty: &DocumentType| -> Result<Bytes, RenderError> {
            if id.as_str().starts_with("missing") {
                Err(RenderError::NotFound(id.clone()))
            } else {
                Ok(Bytes::from(format!("<html><h1>{}</h1><p>{}</p></html>", ty, id)))
            }
        },
    )
}


//------------ FailingSignatureStore -----------------------------------------

/// Wraps a store and fails the first few inserts with a storage error.
pub struct FailingSignatureStore {
    inner: Arc<dyn SignatureStore>,
    remaining_failures: AtomicUsize,
}

impl FailingSignatureStore {
    pub fn new(inner: Arc<dyn SignatureStore>, failures: usize) -> Self {
        FailingSignatureStore { inner, remaining_failures: AtomicUsize::new(failures) }
    }

    pub fn remaining_failures(&self) -> usize {
        self.remaining_failures.load(Ordering::SeqCst)
    }
}

impl SignatureStore for FailingSignatureStore {
    fn has_active(
        &self,
        document_id: &DocumentId,
        document_type: &DocumentType,
    ) -> Result<bool, LedgerStoreError> {
        self.inner.has_active(document_id, document_type)
    }

    fn insert_active(&self, record: &SignatureRecord) -> Result<(), LedgerStoreError> {
        let fail = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            Err(LedgerStoreError::Corrupt("disk full".to_string()))
        } else {
            self.inner.insert_active(record)
        }
    }

    fn get(&self, id: SignatureId) -> Result<Option<SignatureRecord>, LedgerStoreError> {
        self.inner.get(id)
    }

    fn mark_revoked(
        &self,
        id: SignatureId,
        revocation: Revocation,
    ) -> Result<SignatureRecord, LedgerStoreError> {
        self.inner.mark_revoked(id, revocation)
    }

    fn list_for_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<SignatureRecord>, LedgerStoreError> {
        self.inner.list_for_document(document_id)
    }
}


//------------ Helpers -------------------------------------------------------

pub fn op(s: &str) -> OperatorId {
    OperatorId::from(s)
}

pub fn doc(s: &str) -> DocumentId {
    DocumentId::new(s).unwrap()
}

pub fn doc_type(s: &str) -> DocumentType {
    DocumentType::new(s).unwrap()
}

pub fn sign_request(document: &str, ty: &str, pin: Option<&str>) -> SignDocumentRequest {
    SignDocumentRequest {
        document_id: doc(document),
        document_type: doc_type(ty),
        reason: "Approve".to_string(),
        location: None,
        credential: pin.map(Credential::new),
    }
}

pub fn batch_request(documents: &[&str], ty: &str, pin: Option<&str>) -> BatchSignRequest {
    BatchSignRequest {
        document_ids: documents.iter().map(|d| doc(d)).collect(),
        document_type: doc_type(ty),
        reason: "Approve".to_string(),
        credential: pin.map(Credential::new),
    }
}

pub fn storage_uri(dir: &TempDir) -> Url {
    Url::parse(&format!("local://{}/", dir.path().display())).unwrap()
}
