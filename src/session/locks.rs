//! Per-operator locks so that session changes for one operator are applied
//! one at a time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::commons::api::OperatorId;

#[derive(Debug, Default)]
pub struct OperatorLocks {
    locks: RwLock<HashMap<OperatorId, Arc<Mutex<()>>>>,
}

impl OperatorLocks {
    /// Returns the lock for the operator, creating it if needed.
    ///
    /// Locks are never dropped: a lock that was handed out must stay the
    /// only lock for that operator.
    pub fn for_operator(&self, operator: &OperatorId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().unwrap().get(operator) {
            return lock.clone();
        }

        self.locks
            .write()
            .unwrap()
            .entry(operator.clone())
            .or_default()
            .clone()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_operator_same_lock() {
        let locks = OperatorLocks::default();
        let alice = OperatorId::from("alice");
        let a1 = locks.for_operator(&alice);
        let a2 = locks.for_operator(&alice);
        let b = locks.for_operator(&OperatorId::from("bob"));

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
