//! Picks the stores for signatures, signed documents and the token registry
//! from a storage URI.
//!
//! `memory:` keeps everything in memory and is lost on exit. `local://path`
//! and `file://path` keep everything below a directory:
//!
//! ```text
//! <path>/signatures/         the signature ledger
//! <path>/artifacts/signed/   the signed documents
//! <path>/tokens/registry.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::commons::DocsignResult;
use crate::commons::error::Error;
use crate::constants::{ARTIFACTS_DIR, SIGNATURES_DIR, TOKENS_DIR, TOKEN_REGISTRY_FILE};
use crate::ledger::disk::DiskSignatureStore;
use crate::ledger::memory::MemorySignatureStore;
use crate::ledger::store::SignatureStore;
use crate::signing::artifact::{ArtifactStore, DiskArtifactStore, MemoryArtifactStore};
use crate::token::registry::{DiskTokenRegistry, MemoryTokenRegistry, TokenRegistry};


//------------ Stores --------------------------------------------------------

#[derive(Clone)]
pub struct Stores {
    pub signatures: Arc<dyn SignatureStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub registry: Arc<dyn TokenRegistry>,
}

impl Stores {
    pub fn memory() -> Self {
        Stores {
            signatures: Arc::new(MemorySignatureStore::new()),
            artifacts: Arc::new(MemoryArtifactStore::new()),
            registry: Arc::new(MemoryTokenRegistry::new()),
        }
    }

    pub fn disk(data_dir: &Path) -> DocsignResult<Self> {
        debug!("Using storage under '{}'", data_dir.display());
        Ok(Stores {
            signatures: Arc::new(DiskSignatureStore::open(data_dir.join(SIGNATURES_DIR))?),
            artifacts: Arc::new(DiskArtifactStore::open(data_dir.join(ARTIFACTS_DIR))?),
            registry: Arc::new(DiskTokenRegistry::open(
                data_dir.join(TOKENS_DIR),
                TOKEN_REGISTRY_FILE,
            )?),
        })
    }

    pub fn create(storage_uri: &Url) -> DocsignResult<Self> {
        match storage_uri.scheme() {
            "memory" => Ok(Self::memory()),
            "local" | "file" => {
                let data_dir = data_dir_from_storage_uri(storage_uri).ok_or_else(|| {
                    Error::InvalidInput(format!("no directory in storage uri '{}'", storage_uri))
                })?;
                Self::disk(&data_dir)
            }
            scheme => Err(Error::InvalidInput(format!(
                "unsupported storage uri scheme '{}', use 'memory' or 'local'",
                scheme
            ))),
        }
    }
}

/// The directory of a `local` or `file` storage URI.
pub fn data_dir_from_storage_uri(storage_uri: &Url) -> Option<PathBuf> {
    match storage_uri.scheme() {
        "local" | "file" => {
            let path = format!("{}{}", storage_uri.host_str().unwrap_or(""), storage_uri.path());
            (!path.is_empty()).then(|| PathBuf::from(path))
        }
        _ => None,
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::commons::api::{OperatorId, TokenInfo};

    #[test]
    fn data_dir_conversion() {
        assert_eq!(
            data_dir_from_storage_uri(&Url::parse("local:///var/lib/docsign/").unwrap()),
            Some(PathBuf::from("/var/lib/docsign/"))
        );
        assert_eq!(
            data_dir_from_storage_uri(&Url::parse("local://./data").unwrap()),
            Some(PathBuf::from("./data"))
        );
        assert_eq!(
            data_dir_from_storage_uri(&Url::parse("file:///tmp/docsign").unwrap()),
            Some(PathBuf::from("/tmp/docsign"))
        );
        assert_eq!(data_dir_from_storage_uri(&Url::parse("memory:").unwrap()), None);
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = Stores::create(&Url::parse("s3://bucket/path").unwrap()).err().unwrap();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn disk_stores_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Url::parse(&format!("local://{}/", dir.path().display())).unwrap();
        let stores = Stores::create(&uri).unwrap();

        let token = TokenInfo {
            serial: "S1".to_string(),
            label: "key".to_string(),
            provider: "mock".to_string(),
        };
        stores.registry.upsert(&OperatorId::from("alice"), &token, Utc::now()).unwrap();
        stores.artifacts.store("signed/EMR/D1_x.json", b"{}").unwrap();

        assert!(dir.path().join(TOKENS_DIR).join(TOKEN_REGISTRY_FILE).is_file());
        assert!(dir.path().join(ARTIFACTS_DIR).join("signed/EMR/D1_x.json").is_file());
        assert!(dir.path().join(SIGNATURES_DIR).is_dir());
    }
}
