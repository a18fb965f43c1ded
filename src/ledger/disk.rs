//! A signature store on disk.
//!
//! Layout below the store root:
//!
//! ```text
//! records/<signature id>.json       the signature records
//! documents/<document id>/<sig id>  index of records per document
//! active/<type>/<document id>       claims the active slot, holds the id
//! ```
//!
//! Changes are made under a file lock on the root. The active marker is
//! moved into place complete and without replacing an existing one, so
//! only one record can claim a document and lock-free readers never see a
//! half written marker. A record file is written last and is the commit
//! point: markers and index entries whose record is missing or no longer
//! active are stale and are ignored or reclaimed. So are markers that
//! cannot be parsed.

use std::path::PathBuf;

use crate::commons::api::{DocumentId, DocumentType, SignatureId};
use crate::commons::file::{self, FileLock};
use crate::ledger::store::{LedgerStoreError, SignatureStore};
use crate::ledger::{Revocation, SignatureRecord, SignatureStatus};

const RECORDS_DIR: &str = "records";
const DOCUMENTS_DIR: &str = "documents";
const ACTIVE_DIR: &str = "active";

#[derive(Debug)]
pub struct DiskSignatureStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl DiskSignatureStore {
    pub fn open(root: PathBuf) -> Result<Self, LedgerStoreError> {
        let tmp = file::tmp_dir(&root);
        file::create_dirs(&tmp)?;
        Ok(DiskSignatureStore { root, tmp })
    }

    fn record_path(&self, id: SignatureId) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{}.json", id))
    }

    fn index_path(&self, document_id: &DocumentId, id: SignatureId) -> PathBuf {
        self.root
            .join(DOCUMENTS_DIR)
            .join(document_id.as_str())
            .join(id.to_string())
    }

    fn active_path(&self, document_type: &DocumentType, document_id: &DocumentId) -> PathBuf {
        self.root
            .join(ACTIVE_DIR)
            .join(document_type.as_str())
            .join(document_id.as_str())
    }

    fn lock(&self) -> Result<FileLock, LedgerStoreError> {
        FileLock::create(&self.root).map_err(LedgerStoreError::from)
    }

    fn load_record(&self, id: SignatureId) -> Result<Option<SignatureRecord>, LedgerStoreError> {
        file::load_json(&self.record_path(id)).map_err(LedgerStoreError::from)
    }

    fn save_record(&self, record: &SignatureRecord) -> Result<(), LedgerStoreError> {
        file::save_json(&self.tmp, &self.record_path(record.id), record)
            .map_err(LedgerStoreError::from)
    }

    /// The id of the record claiming the active slot, if the claim is not
    /// stale.
    fn active_claim(
        &self,
        document_type: &DocumentType,
        document_id: &DocumentId,
    ) -> Result<Option<SignatureId>, LedgerStoreError> {
        let marker = self.active_path(document_type, document_id);
        let Some(bytes) = file::read_optional(&marker)? else {
            return Ok(None);
        };

        let Ok(id) = String::from_utf8_lossy(&bytes).trim().parse::<SignatureId>() else {
            debug!("Ignoring unreadable active marker '{}'", marker.display());
            return Ok(None);
        };

        match self.load_record(id)? {
            Some(record) if record.status == SignatureStatus::Active => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    fn claim_active(&self, record: &SignatureRecord) -> Result<(), LedgerStoreError> {
        let marker = self.active_path(&record.document_type, &record.document_id);
        let id = record.id.to_string();

        if file::save_new(&self.tmp, &marker, id.as_bytes())? {
            return Ok(());
        }

        if let Some(existing) =
            self.active_claim(&record.document_type, &record.document_id)?
        {
            return Err(LedgerStoreError::conflict(record, Some(existing)));
        }

        // Left behind by a revocation or insert that did not complete. We
        // hold the write lock, so nobody else is claiming it right now.
        debug!("Reclaiming stale active marker '{}'", marker.display());
        file::save_atomic(&self.tmp, &marker, id.as_bytes())?;
        Ok(())
    }
}

impl SignatureStore for DiskSignatureStore {
    fn has_active(
        &self,
        document_id: &DocumentId,
        document_type: &DocumentType,
    ) -> Result<bool, LedgerStoreError> {
        Ok(self.active_claim(document_type, document_id)?.is_some())
    }

    fn insert_active(&self, record: &SignatureRecord) -> Result<(), LedgerStoreError> {
        let mut lock = self.lock()?;
        let _write_lock = lock.write()?;

        self.claim_active(record)?;

        let index = self.index_path(&record.document_id, record.id);
        let res = file::save_atomic(&self.tmp, &index, &[])
            .map_err(LedgerStoreError::from)
            .and_then(|_| self.save_record(record));

        if let Err(err) = res {
            let marker = self.active_path(&record.document_type, &record.document_id);
            let _ = file::remove_file(&marker);
            let _ = file::remove_file(&index);
            return Err(err);
        }
        Ok(())
    }

    fn get(&self, id: SignatureId) -> Result<Option<SignatureRecord>, LedgerStoreError> {
        self.load_record(id)
    }

    fn mark_revoked(
        &self,
        id: SignatureId,
        revocation: Revocation,
    ) -> Result<SignatureRecord, LedgerStoreError> {
        let mut lock = self.lock()?;
        let _write_lock = lock.write()?;

        let mut record = self.load_record(id)?.ok_or(LedgerStoreError::NotFound(id))?;
        if record.status != SignatureStatus::Active {
            return Err(LedgerStoreError::NotActive(id));
        }
        record.status = SignatureStatus::Revoked;
        record.revocation = Some(revocation);
        self.save_record(&record)?;

        let marker = self.active_path(&record.document_type, &record.document_id);
        if let Err(err) = file::remove_file(&marker) {
            // The marker now points to a revoked record and counts as stale.
            warn!("Could not remove active marker after revoking '{}': {}", id, err);
        }

        Ok(record)
    }

    fn list_for_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<SignatureRecord>, LedgerStoreError> {
        let dir = self.root.join(DOCUMENTS_DIR).join(document_id.as_str());
        let mut res = vec![];
        for name in file::dir_entry_names(&dir)? {
            let Ok(id) = name.parse::<SignatureId>() else {
                continue;
            };
            if let Some(record) = self.load_record(id)? {
                res.push(record);
            }
        }
        Ok(res)
    }
}
