//! Storage for signed documents.
//!
//! Signed documents are stored under `signed/<type>/<id>_<time>_<nonce>.json`.
//! The nonce keeps two signatures of the same document in the same second
//! apart, so an artifact is never overwritten.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use uuid::Uuid;

use crate::commons::api::{DocumentId, DocumentType};
use crate::commons::clock::Time;
use crate::commons::file::{self, FileError};
use crate::constants::SIGNED_ARTIFACT_PREFIX;


/// The reference under which a signed document is stored.
pub fn artifact_ref(
    document_type: &DocumentType,
    document_id: &DocumentId,
    signed_at: Time,
) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}/{}_{}_{}.json",
        SIGNED_ARTIFACT_PREFIX,
        document_type,
        document_id,
        signed_at.format("%Y%m%d%H%M%S"),
        &nonce[..8]
    )
}


//------------ ArtifactStore -------------------------------------------------

pub trait ArtifactStore: Send + Sync {
    fn store(&self, reference: &str, content: &[u8]) -> Result<(), ArtifactError>;

    fn load(&self, reference: &str) -> Result<Bytes, ArtifactError>;

    /// Removes an artifact, unknown references are ignored.
    fn remove(&self, reference: &str) -> Result<(), ArtifactError>;
}


//------------ MemoryArtifactStore -------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<String, Bytes>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn store(&self, reference: &str, content: &[u8]) -> Result<(), ArtifactError> {
        self.artifacts
            .lock()
            .unwrap()
            .insert(reference.to_string(), Bytes::copy_from_slice(content));
        Ok(())
    }

    fn load(&self, reference: &str) -> Result<Bytes, ArtifactError> {
        self.artifacts
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))
    }

    fn remove(&self, reference: &str) -> Result<(), ArtifactError> {
        self.artifacts.lock().unwrap().remove(reference);
        Ok(())
    }
}


//------------ DiskArtifactStore ---------------------------------------------

#[derive(Debug)]
pub struct DiskArtifactStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl DiskArtifactStore {
    pub fn open(root: PathBuf) -> Result<Self, ArtifactError> {
        let tmp = file::tmp_dir(&root);
        file::create_dirs(&tmp)?;
        Ok(DiskArtifactStore { root, tmp })
    }

    /// Resolves a reference below the root, rejecting anything that could
    /// point outside of it.
    fn path(&self, reference: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(reference);
        let safe = !reference.is_empty()
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if safe {
            Ok(self.root.join(relative))
        } else {
            Err(ArtifactError::BadReference(reference.to_string()))
        }
    }
}

impl ArtifactStore for DiskArtifactStore {
    fn store(&self, reference: &str, content: &[u8]) -> Result<(), ArtifactError> {
        let path = self.path(reference)?;
        file::save_atomic(&self.tmp, &path, content)?;
        Ok(())
    }

    fn load(&self, reference: &str) -> Result<Bytes, ArtifactError> {
        let path = self.path(reference)?;
        file::read_optional(&path)?
            .map(Bytes::from)
            .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))
    }

    fn remove(&self, reference: &str) -> Result<(), ArtifactError> {
        let path = self.path(reference)?;
        file::remove_file(&path)?;
        Ok(())
    }
}


//------------ ArtifactError -------------------------------------------------

#[derive(Debug)]
pub enum ArtifactError {
    NotFound(String),
    BadReference(String),
    File(FileError),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArtifactError::NotFound(r) => write!(f, "no signed document at '{}'", r),
            ArtifactError::BadReference(r) => {
                write!(f, "invalid signed document reference '{}'", r)
            }
            ArtifactError::File(e) => write!(f, "signed document storage: {}", e),
        }
    }
}

impl std::error::Error for ArtifactError {}

impl From<FileError> for ArtifactError {
    fn from(e: FileError) -> Self {
        ArtifactError::File(e)
    }
}


//============ Tests =========================================================
