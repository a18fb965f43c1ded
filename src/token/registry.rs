//! Remembers which operator uses which token.
//!
//! Mappings are keyed by token serial. Opening a session registers or
//! refreshes the mapping for the token that was used, each successful
//! signature updates its last-used time.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::commons::api::{OperatorId, TokenInfo};
use crate::commons::clock::Time;
use crate::commons::file::{self, FileError};


//------------ TokenMapping --------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenMapping {
    pub token_serial: String,
    pub token_label: String,
    pub ca_provider: String,
    pub operator: OperatorId,
    pub registered_at: Time,
    pub last_used_at: Option<Time>,
    pub active: bool,
}


//------------ TokenRegistry -------------------------------------------------

pub trait TokenRegistry: Send + Sync {
    /// Creates or updates the mapping for the token's serial. An existing
    /// mapping is reassigned to `operator`, reactivated and marked as used.
    fn upsert(
        &self,
        operator: &OperatorId,
        token: &TokenInfo,
        now: Time,
    ) -> Result<TokenMapping, RegistryError>;

    /// Sets the last-used time, ignored for unknown serials.
    fn touch(&self, token_serial: &str, now: Time) -> Result<(), RegistryError>;

    fn get(&self, token_serial: &str) -> Result<Option<TokenMapping>, RegistryError>;

    /// The active mappings of an operator.
    fn tokens_for(&self, operator: &OperatorId) -> Result<Vec<TokenMapping>, RegistryError>;
}


//------------ Mappings ------------------------------------------------------

/// The registry content, shared by the stores.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct Mappings(BTreeMap<String, TokenMapping>);

impl Mappings {
    fn upsert(&mut self, operator: &OperatorId, token: &TokenInfo, now: Time) -> TokenMapping {
        let mapping = self
            .0
            .entry(token.serial.clone())
            .and_modify(|existing| {
                existing.operator = operator.clone();
                existing.active = true;
                existing.last_used_at = Some(now);
                if !token.label.is_empty() {
                    existing.token_label = token.label.clone();
                }
                if !token.provider.is_empty() {
                    existing.ca_provider = token.provider.clone();
                }
            })
            .or_insert_with(|| TokenMapping {
                token_serial: token.serial.clone(),
                token_label: token.label.clone(),
                ca_provider: token.provider.clone(),
                operator: operator.clone(),
                registered_at: now,
                last_used_at: None,
                active: true,
            });
        mapping.clone()
    }

    fn touch(&mut self, token_serial: &str, now: Time) -> bool {
        match self.0.get_mut(token_serial) {
            Some(mapping) => {
                mapping.last_used_at = Some(now);
                true
            }
            None => false,
        }
    }

    fn tokens_for(&self, operator: &OperatorId) -> Vec<TokenMapping> {
        self.0
            .values()
            .filter(|m| m.active && &m.operator == operator)
            .cloned()
            .collect()
    }
}


//------------ MemoryTokenRegistry -------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryTokenRegistry {
    mappings: Mutex<Mappings>,
}

impl MemoryTokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenRegistry for MemoryTokenRegistry {
    fn upsert(
        &self,
        operator: &OperatorId,
        token: &TokenInfo,
        now: Time,
    ) -> Result<TokenMapping, RegistryError> {
        Ok(self.mappings.lock().unwrap().upsert(operator, token, now))
    }

    fn touch(&self, token_serial: &str, now: Time) -> Result<(), RegistryError> {
        self.mappings.lock().unwrap().touch(token_serial, now);
        Ok(())
    }

    fn get(&self, token_serial: &str) -> Result<Option<TokenMapping>, RegistryError> {
        Ok(self.mappings.lock().unwrap().0.get(token_serial).cloned())
    }

    fn tokens_for(&self, operator: &OperatorId) -> Result<Vec<TokenMapping>, RegistryError> {
        Ok(self.mappings.lock().unwrap().tokens_for(operator))
    }
}


//------------ DiskTokenRegistry ---------------------------------------------

/// Keeps all mappings in a single JSON file.
///
/// The file is read once when the registry is opened and rewritten after
/// every change. Only one process should use a registry file.
#[derive(Debug)]
pub struct DiskTokenRegistry {
    path: PathBuf,
    tmp: PathBuf,
    mappings: Mutex<Mappings>,
}

impl DiskTokenRegistry {
    pub fn open(dir: PathBuf, file_name: &str) -> Result<Self, RegistryError> {
        let tmp = file::tmp_dir(&dir);
        file::create_dirs(&tmp)?;
        let path = dir.join(file_name);
        let mappings = file::load_json(&path)?.unwrap_or_default();
        Ok(DiskTokenRegistry { path, tmp, mappings: Mutex::new(mappings) })
    }

    fn save(&self, mappings: &Mappings) -> Result<(), RegistryError> {
        file::save_json(&self.tmp, &self.path, mappings).map_err(RegistryError::from)
    }
}

impl TokenRegistry for DiskTokenRegistry {
    fn upsert(
        &self,
        operator: &OperatorId,
        token: &TokenInfo,
        now: Time,
    ) -> Result<TokenMapping, RegistryError> {
        let mut mappings = self.mappings.lock().unwrap();
        let mut updated = mappings.clone();
        let mapping = updated.upsert(operator, token, now);
        self.save(&updated)?;
        *mappings = updated;
        Ok(mapping)
    }

    fn touch(&self, token_serial: &str, now: Time) -> Result<(), RegistryError> {
        let mut mappings = self.mappings.lock().unwrap();
        let mut updated = mappings.clone();
        if updated.touch(token_serial, now) {
            self.save(&updated)?;
            *mappings = updated;
        }
        Ok(())
    }

    fn get(&self, token_serial: &str) -> Result<Option<TokenMapping>, RegistryError> {
        Ok(self.mappings.lock().unwrap().0.get(token_serial).cloned())
    }

    fn tokens_for(&self, operator: &OperatorId) -> Result<Vec<TokenMapping>, RegistryError> {
        Ok(self.mappings.lock().unwrap().tokens_for(operator))
    }
}


//------------ RegistryError -------------------------------------------------

#[derive(Debug)]
pub struct RegistryError(FileError);

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "token registry: {}", self.0)
    }
}

impl std::error::Error for RegistryError {}

impl From<FileError> for RegistryError {
    fn from(e: FileError) -> Self {
        RegistryError(e)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn token(serial: &str, label: &str) -> TokenInfo {
        TokenInfo {
            serial: serial.to_string(),
            label: label.to_string(),
            provider: "viettel".to_string(),
        }
    }

    fn check_registry(registry: &dyn TokenRegistry) {
        let alice = OperatorId::from("alice");
        let bob = OperatorId::from("bob");
        let t0 = Utc::now();

        let mapping = registry.upsert(&alice, &token("S1", "Alice key"), t0).unwrap();
        assert_eq!(mapping.operator, alice);
        assert!(mapping.last_used_at.is_none());

        registry.touch("S1", t0).unwrap();
        registry.touch("unknown", t0).unwrap();
        assert_eq!(registry.get("S1").unwrap().unwrap().last_used_at, Some(t0));

        // Re-registering keeps the label when none is given and moves the
        // token to the new operator.
        let t1 = t0 + chrono::Duration::minutes(5);
        let moved = registry.upsert(&bob, &token("S1", ""), t1).unwrap();
        assert_eq!(moved.token_label, "Alice key");
        assert_eq!(moved.registered_at, t0);
        assert_eq!(moved.last_used_at, Some(t1));
        assert!(registry.tokens_for(&alice).unwrap().is_empty());
        assert_eq!(registry.tokens_for(&bob).unwrap().len(), 1);
    }

    #[test]
    fn memory_registry() {
        check_registry(&MemoryTokenRegistry::new());
    }

    #[test]
    fn disk_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = DiskTokenRegistry::open(dir.path().to_path_buf(), "registry.json").unwrap();
            check_registry(&registry);
        }

        let registry = DiskTokenRegistry::open(dir.path().to_path_buf(), "registry.json").unwrap();
        let mapping = registry.get("S1").unwrap().unwrap();
        assert_eq!(mapping.operator, OperatorId::from("bob"));
    }
}
