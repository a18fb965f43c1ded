//! Storage for signature records.

use std::fmt;

use crate::commons::api::{DocumentId, DocumentType, SignatureId};
use crate::commons::file::FileError;
use crate::ledger::{Revocation, SignatureRecord};


//------------ SignatureStore ------------------------------------------------

/// Persists signature records.
///
/// Implementations guarantee that there is at most one active record per
/// document id and type: [`insert_active`][Self::insert_active] and
/// [`mark_revoked`][Self::mark_revoked] check and change that state in a
/// single atomic step.
pub trait SignatureStore: Send + Sync {
    fn has_active(
        &self,
        document_id: &DocumentId,
        document_type: &DocumentType,
    ) -> Result<bool, LedgerStoreError>;

    /// Inserts an active record, or fails with `Conflict` when the document
    /// already has one.
    fn insert_active(&self, record: &SignatureRecord) -> Result<(), LedgerStoreError>;

    fn get(&self, id: SignatureId) -> Result<Option<SignatureRecord>, LedgerStoreError>;

    /// Marks an active record revoked, or fails with `NotFound` or
    /// `NotActive`.
    fn mark_revoked(
        &self,
        id: SignatureId,
        revocation: Revocation,
    ) -> Result<SignatureRecord, LedgerStoreError>;

    /// All records for a document, in no particular order.
    fn list_for_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<SignatureRecord>, LedgerStoreError>;
}


//------------ LedgerStoreError ----------------------------------------------

#[derive(Debug)]
pub enum LedgerStoreError {
    Conflict {
        document_type: DocumentType,
        document_id: DocumentId,
        existing: Option<SignatureId>,
    },
    NotFound(SignatureId),
    NotActive(SignatureId),
    Corrupt(String),
    File(FileError),
}

impl LedgerStoreError {
    pub fn conflict(record: &SignatureRecord, existing: Option<SignatureId>) -> Self {
        LedgerStoreError::Conflict {
            document_type: record.document_type.clone(),
            document_id: record.document_id.clone(),
            existing,
        }
    }
}

impl fmt::Display for LedgerStoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerStoreError::Conflict { document_type, document_id, existing } => {
                write!(f, "{} '{}' already has an active signature", document_type, document_id)?;
                if let Some(existing) = existing {
                    write!(f, " ({})", existing)?;
                }
                Ok(())
            }
            LedgerStoreError::NotFound(id) => write!(f, "no signature '{}'", id),
            LedgerStoreError::NotActive(id) => write!(f, "signature '{}' is not active", id),
            LedgerStoreError::Corrupt(msg) => write!(f, "signature ledger is corrupt: {}", msg),
            LedgerStoreError::File(e) => write!(f, "signature ledger: {}", e),
        }
    }
}

impl std::error::Error for LedgerStoreError {}

impl From<FileError> for LedgerStoreError {
    fn from(e: FileError) -> Self {
        LedgerStoreError::File(e)
    }
}
