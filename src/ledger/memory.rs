//! A signature store in memory.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::commons::api::{DocumentId, DocumentType, SignatureId};
use crate::ledger::store::{LedgerStoreError, SignatureStore};
use crate::ledger::{Revocation, SignatureRecord, SignatureStatus};

#[derive(Debug, Default)]
pub struct MemorySignatureStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<SignatureId, SignatureRecord>,
    active: HashMap<(DocumentType, DocumentId), SignatureId>,
}

impl MemorySignatureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignatureStore for MemorySignatureStore {
    fn has_active(
        &self,
        document_id: &DocumentId,
        document_type: &DocumentType,
    ) -> Result<bool, LedgerStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.active.contains_key(&(document_type.clone(), document_id.clone())))
    }

    fn insert_active(&self, record: &SignatureRecord) -> Result<(), LedgerStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (record.document_type.clone(), record.document_id.clone());
        if let Some(existing) = inner.active.get(&key) {
            return Err(LedgerStoreError::conflict(record, Some(*existing)));
        }
        inner.active.insert(key, record.id);
        inner.records.insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: SignatureId) -> Result<Option<SignatureRecord>, LedgerStoreError> {
        Ok(self.inner.lock().unwrap().records.get(&id).cloned())
    }

    fn mark_revoked(
        &self,
        id: SignatureId,
        revocation: Revocation,
    ) -> Result<SignatureRecord, LedgerStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.records.get_mut(&id).ok_or(LedgerStoreError::NotFound(id))?;
        if record.status != SignatureStatus::Active {
            return Err(LedgerStoreError::NotActive(id));
        }
        record.status = SignatureStatus::Revoked;
        record.revocation = Some(revocation);
        let record = record.clone();

        inner
            .active
            .remove(&(record.document_type.clone(), record.document_id.clone()));
        Ok(record)
    }

    fn list_for_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<SignatureRecord>, LedgerStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .records
            .values()
            .filter(|r| &r.document_id == document_id)
            .cloned()
            .collect())
    }
}
