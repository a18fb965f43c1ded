//! The signature ledger: every signature ever made, and which one is the
//! active signature of a document.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::commons::DocsignResult;
use crate::commons::actor::Actor;
use crate::commons::api::{DocumentId, DocumentType, OperatorId, SignatureId};
use crate::commons::clock::Time;
use crate::commons::error::Error;
use crate::token::cert::CertificateInfo;

pub mod disk;
pub mod memory;
pub mod store;

use self::store::{LedgerStoreError, SignatureStore};


//------------ SignatureStatus -----------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Active,
    Revoked,
}


//------------ Revocation ----------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Revocation {
    pub reason: String,
    pub revoked_at: Time,
    pub revoked_by: OperatorId,
}


//------------ SignatureRecord -----------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignatureRecord {
    pub id: SignatureId,
    pub document_id: DocumentId,
    pub document_type: DocumentType,
    pub document_code: String,
    pub signer: OperatorId,
    pub signed_at: Time,
    pub certificate: CertificateInfo,
    pub ca_provider: String,
    pub token_serial: String,
    pub hash_algorithm: String,
    pub reason: String,
    pub location: String,

    /// Where the signed document was stored.
    pub artifact: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsa_timestamp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocsp_status: Option<String>,

    pub status: SignatureStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation: Option<Revocation>,
}

impl SignatureRecord {
    pub fn is_active(&self) -> bool {
        self.status == SignatureStatus::Active
    }
}


//------------ SignatureLedger -----------------------------------------------

pub struct SignatureLedger {
    store: Arc<dyn SignatureStore>,
}

impl SignatureLedger {
    pub fn new(store: Arc<dyn SignatureStore>) -> Self {
        SignatureLedger { store }
    }

    pub fn has_active_signature(
        &self,
        document_id: &DocumentId,
        document_type: &DocumentType,
    ) -> DocsignResult<bool> {
        self.store
            .has_active(document_id, document_type)
            .map_err(Error::from)
    }

    /// Stores a new active signature.
    ///
    /// Fails with [`Error::DocumentAlreadySigned`] if the document already
    /// has an active signature. Of any number of concurrent calls for the
    /// same document, exactly one succeeds.
    pub fn record_signature(&self, record: SignatureRecord) -> DocsignResult<SignatureRecord> {
        if !record.is_active() || record.revocation.is_some() {
            return Err(Error::InvalidInput(
                "only active signatures can be recorded".to_string(),
            ));
        }

        match self.store.insert_active(&record) {
            Ok(()) => {
                info!(
                    "Recorded signature '{}' for {} '{}' by '{}'",
                    record.id, record.document_type, record.document_id, record.signer
                );
                Ok(record)
            }
            Err(LedgerStoreError::Conflict { existing, .. }) => {
                debug!(
                    "{} '{}' already has active signature {:?}",
                    record.document_type, record.document_id, existing
                );
                Err(Error::DocumentAlreadySigned(
                    record.document_type,
                    record.document_id,
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, id: SignatureId) -> DocsignResult<SignatureRecord> {
        self.store.get(id)?.ok_or(Error::SignatureNotFound(id))
    }

    /// Revokes an active signature.
    ///
    /// Only the operator who made the signature, or an administrator, may
    /// revoke it. Once revoked the document can be signed again.
    pub fn revoke(
        &self,
        id: SignatureId,
        requested_by: &Actor,
        reason: &str,
        now: Time,
    ) -> DocsignResult<SignatureRecord> {
        let record = self.get(id)?;
        if !record.is_active() {
            return Err(Error::AlreadyRevoked(id));
        }
        if &record.signer != requested_by.id() && !requested_by.is_admin() {
            return Err(Error::Forbidden(format!(
                "'{}' cannot revoke a signature made by '{}'",
                requested_by.id(),
                record.signer
            )));
        }

        let revoked = self.store.mark_revoked(
            id,
            Revocation {
                reason: reason.to_string(),
                revoked_at: now,
                revoked_by: requested_by.id().clone(),
            },
        )?;
        info!(
            "Signature '{}' for {} '{}' revoked by {}: {}",
            id, revoked.document_type, revoked.document_id, requested_by, reason
        );
        Ok(revoked)
    }

    /// The active signatures of a document across all types, newest first.
    pub fn list_active_signatures(
        &self,
        document_id: &DocumentId,
    ) -> DocsignResult<Vec<SignatureRecord>> {
        let mut records = self.list_signature_history(document_id)?;
        records.retain(SignatureRecord::is_active);
        Ok(records)
    }

    /// All signatures of a document, including revoked ones, newest first.
    pub fn list_signature_history(
        &self,
        document_id: &DocumentId,
    ) -> DocsignResult<Vec<SignatureRecord>> {
        let mut records = self.store.list_for_document(document_id)?;
        records.sort_by(|a, b| b.signed_at.cmp(&a.signed_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }
}


//============ Tests =========================================================
