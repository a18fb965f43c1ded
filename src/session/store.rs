//! Where live sessions are kept.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::commons::api::OperatorId;
use crate::session::Session;

/// Holds at most one session per operator.
///
/// Sessions hold open token handles, so a store only ever lives in the
/// memory of the process that opened them.
pub trait SessionStore: Send + Sync {
    fn get(&self, operator: &OperatorId) -> Option<Arc<Session>>;

    /// Stores a session, returning the one it replaced.
    fn insert(&self, session: Arc<Session>) -> Option<Arc<Session>>;

    fn remove(&self, operator: &OperatorId) -> Option<Arc<Session>>;

    fn all(&self) -> Vec<Arc<Session>>;
}


//------------ MemorySessionStore --------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<OperatorId, Arc<Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, operator: &OperatorId) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(operator).cloned()
    }

    fn insert(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .unwrap()
            .insert(session.operator().clone(), session)
    }

    fn remove(&self, operator: &OperatorId) -> Option<Arc<Session>> {
        self.sessions.write().unwrap().remove(operator)
    }

    fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }
}
