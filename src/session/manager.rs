//! Opening, reusing, expiring and closing signing sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime;

use crate::commons::DocsignResult;
use crate::commons::api::{OperatorId, SessionStatus, TokenInfo};
use crate::commons::clock::Clock;
use crate::commons::error::Error;
use crate::session::Session;
use crate::session::locks::OperatorLocks;
use crate::session::store::SessionStore;
use crate::token::gateway::{Credential, TokenError, TokenGateway, TokenHandle};
use crate::token::registry::TokenRegistry;


//------------ SessionManager ------------------------------------------------

/// Keeps at most one live session per operator.
///
/// Expiry is checked lazily on every lookup. A background sweep, started
/// with [`spawn_sweep`][Self::spawn_sweep], closes sessions that expired
/// without being looked up again.
pub struct SessionManager {
    gateway: Arc<dyn TokenGateway>,
    store: Arc<dyn SessionStore>,
    registry: Arc<dyn TokenRegistry>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    locks: OperatorLocks,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<dyn TokenGateway>,
        store: Arc<dyn SessionStore>,
        registry: Arc<dyn TokenRegistry>,
        clock: Arc<dyn Clock>,
        ttl: chrono::Duration,
    ) -> Self {
        SessionManager {
            gateway,
            store,
            registry,
            clock,
            ttl,
            locks: OperatorLocks::default(),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Returns the operator's live session, extending it, or opens a new
    /// one with the credential.
    ///
    /// A live session is reused without checking the credential again.
    pub async fn open_session(
        &self,
        operator: &OperatorId,
        credential: &Credential,
    ) -> DocsignResult<Arc<Session>> {
        let lock = self.locks.for_operator(operator);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.get(operator) {
            let now = self.clock.now();
            if existing.is_live_at(now) {
                existing.extend(now + self.ttl);
                debug!(
                    "Reusing session for '{}', now expires at {}",
                    operator,
                    existing.expires_at()
                );
                return Ok(existing);
            }
        }

        let gateway = self.gateway.clone();
        let credential = credential.clone();
        let opened = tokio::task::spawn_blocking(move || {
            gateway.open_session(&credential)
        })
        .await
        .map_err(|e| Error::DriverError(format!("opening token session did not complete: {}", e)))?;

        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Could not open signing session for '{}': {}", operator, e);
                return Err(e.into());
            }
        };

        let now = self.clock.now();
        let session = Arc::new(Session::new(
            operator.clone(),
            opened.token,
            opened.certificate,
            opened.handle,
            now,
            now + self.ttl,
        ));

        if let Some(replaced) = self.store.insert(session.clone()) {
            debug!("Closing expired session for '{}'", operator);
            replaced.close().await;
        }

        info!(
            "Opened signing session for '{}' on token '{}' ({}), expires at {}",
            operator,
            session.token().serial,
            session.token().provider,
            session.expires_at()
        );

        if let Err(e) = self.registry.upsert(operator, session.token(), now) {
            warn!(
                "Could not register token '{}' for '{}': {}",
                session.token().serial,
                operator,
                e
            );
        }

        Ok(session)
    }

    /// The operator's session if it has not expired.
    pub fn get_active_session(&self, operator: &OperatorId) -> Option<Arc<Session>> {
        self.store
            .get(operator)
            .filter(|session| session.is_live_at(self.clock.now()))
    }

    /// Extends the expiry of a live session. Expired sessions stay expired.
    pub fn refresh_session(&self, operator: &OperatorId) -> bool {
        match self.get_active_session(operator) {
            Some(session) => {
                session.extend(self.clock.now() + self.ttl);
                trace!("Session for '{}' now expires at {}", operator, session.expires_at());
                true
            }
            None => false,
        }
    }

    /// Removes and closes the operator's session, if any.
    pub async fn invalidate_session(&self, operator: &OperatorId) {
        let lock = self.locks.for_operator(operator);
        let _guard = lock.lock().await;

        if let Some(session) = self.store.remove(operator) {
            session.close().await;
            info!("Closed signing session for '{}'", operator);
        }
    }

    /// Invalidates the session only if it is still the stored one.
    async fn invalidate_if_current(&self, session: &Arc<Session>) {
        let operator = session.operator();
        let lock = self.locks.for_operator(operator);
        let _guard = lock.lock().await;

        match self.store.get(operator) {
            Some(current) if Arc::ptr_eq(&current, session) => {
                self.store.remove(operator);
            }
            _ => {}
        }
        session.close().await;
        warn!("Closed signing session for '{}' after a token failure", operator);
    }

    /// Runs an operation against the session's token handle, at most one
    /// at a time per session.
    ///
    /// If the token reports that the session can no longer be used, the
    /// session is invalidated once the operation has finished.
    pub async fn with_exclusive_access<T, F>(
        &self,
        session: &Arc<Session>,
        op: F,
    ) -> Result<T, TokenError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TokenHandle) -> Result<T, TokenError> + Send + 'static,
    {
        let res = session.exclusive(op).await;
        if let Err(err) = &res {
            if err.is_unrecoverable() {
                self.invalidate_if_current(session).await;
            }
        }
        res
    }

    /// Closes all expired sessions, returning how many were closed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<OperatorId> = self
            .store
            .all()
            .into_iter()
            .filter(|session| !session.is_live_at(now))
            .map(|session| session.operator().clone())
            .collect();

        let mut closed = 0;
        for operator in expired {
            let lock = self.locks.for_operator(&operator);
            let _guard = lock.lock().await;

            // It may have been reopened while we waited for the lock.
            let Some(session) = self.store.get(&operator) else {
                continue;
            };
            if session.is_live_at(self.clock.now()) {
                continue;
            }
            self.store.remove(&operator);
            session.close().await;
            debug!("Swept expired session for '{}'", operator);
            closed += 1;
        }
        closed
    }

    /// Spawns a task that sweeps expired sessions every `interval`.
    ///
    /// The task ends once the manager has been dropped.
    pub fn spawn_sweep(self: &Arc<Self>, runtime: &runtime::Handle, interval: Duration) {
        let manager_weak = Arc::downgrade(self);
        runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let Some(manager) = manager_weak.upgrade() else {
                    break;
                };

                let closed = manager.sweep_expired().await;
                if closed > 0 {
                    info!("Session sweep closed {} expired session(s)", closed);
                }
            }
        });
    }

    /// Lists tokens across all providers.
    pub async fn list_tokens(&self) -> DocsignResult<Vec<TokenInfo>> {
        let gateway = self.gateway.clone();
        tokio::task::spawn_blocking(move || gateway.list_tokens())
            .await
            .map_err(|e| Error::DriverError(format!("listing tokens did not complete: {}", e)))?
            .map_err(Error::from)
    }

    /// The operator's session status, with the days until the certificate
    /// expires when that is within `warning_days`.
    pub fn status(&self, operator: &OperatorId, warning_days: i64) -> SessionStatus {
        let Some(session) = self.get_active_session(operator) else {
            return SessionStatus::inactive();
        };

        let days_left = session.certificate().days_until_expiry(self.clock.now());
        SessionStatus {
            active: true,
            expires_at: Some(session.expires_at()),
            token_serial: Some(session.token().serial.clone()),
            ca_provider: Some(session.token().provider.clone()),
            certificate_subject: Some(session.certificate().subject.clone()),
            certificate_expires_in_days: (days_left <= warning_days).then_some(days_left),
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::commons::clock::ManualClock;
    use crate::session::store::MemorySessionStore;
    use crate::token::mock::{FnIdx, MockTokenConfig, MockTokenGateway};
    use crate::token::registry::MemoryTokenRegistry;

    struct Setup {
        gateway: MockTokenGateway,
        clock: Arc<ManualClock>,
        registry: Arc<MemoryTokenRegistry>,
        manager: Arc<SessionManager>,
    }

    fn setup(config: MockTokenConfig) -> Setup {
        let _ = stderrlog::new().verbosity(99).init();
        let gateway = MockTokenGateway::new(config).unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let registry = Arc::new(MemoryTokenRegistry::new());
        let manager = Arc::new(SessionManager::new(
            Arc::new(gateway.clone()),
            Arc::new(MemorySessionStore::new()),
            registry.clone(),
            clock.clone(),
            chrono::Duration::minutes(15),
        ));
        Setup { gateway, clock, registry, manager }
    }

    fn alice() -> OperatorId {
        OperatorId::from("alice")
    }

    #[tokio::test]
    async fn open_registers_token_and_reuses_live_session() {
        let s = setup(MockTokenConfig::new("T1", "1234"));

        let first = s.manager.open_session(&alice(), &"1234".into()).await.unwrap();
        assert_eq!(first.token().serial, "T1");
        let mapping = s.registry.get("T1").unwrap().unwrap();
        assert_eq!(mapping.operator, alice());

        s.clock.advance(chrono::Duration::minutes(10));
        let second = s.manager.open_session(&alice(), &"1234".into()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.expires_at(), s.clock.now() + chrono::Duration::minutes(15));
        assert_eq!(s.gateway.call_counts().get(FnIdx::OpenSession), 1);
    }

    #[tokio::test]
    async fn wrong_pin_creates_no_session() {
        let s = setup(MockTokenConfig::new("T1", "1234"));

        let err = s.manager.open_session(&alice(), &"9999".into()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential));
        assert!(s.manager.get_active_session(&alice()).is_none());
        assert!(s.registry.get("T1").unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_expire_lazily_and_refresh_does_not_revive() {
        let s = setup(MockTokenConfig::new("T1", "1234"));
        s.manager.open_session(&alice(), &"1234".into()).await.unwrap();

        s.clock.advance(chrono::Duration::minutes(14));
        assert!(s.manager.refresh_session(&alice()));

        s.clock.advance(chrono::Duration::minutes(14));
        assert!(s.manager.get_active_session(&alice()).is_some());

        s.clock.advance(chrono::Duration::minutes(2));
        assert!(s.manager.get_active_session(&alice()).is_none());
        assert!(!s.manager.refresh_session(&alice()));
        assert!(!s.manager.status(&alice(), 30).active);
    }

    #[tokio::test]
    async fn expired_session_is_replaced_and_closed() {
        let s = setup(MockTokenConfig::new("T1", "1234"));
        let old = s.manager.open_session(&alice(), &"1234".into()).await.unwrap();

        s.clock.advance(chrono::Duration::minutes(16));
        let new = s.manager.open_session(&alice(), &"1234".into()).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_closed().await);
        assert!(!new.is_closed().await);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let s = setup(MockTokenConfig::new("T1", "1234"));
        let session = s.manager.open_session(&alice(), &"1234".into()).await.unwrap();

        s.manager.invalidate_session(&alice()).await;
        s.manager.invalidate_session(&alice()).await;
        assert!(session.is_closed().await);
        assert!(s.manager.get_active_session(&alice()).is_none());
        assert_eq!(s.gateway.call_counts().get(FnIdx::Close), 1);

        let res = s
            .manager
            .with_exclusive_access(&session, |_handle| Ok(()))
            .await;
        assert_eq!(res, Err(TokenError::SessionClosed));
    }

    #[tokio::test]
    async fn unrecoverable_token_error_invalidates_session() {
        let s = setup(MockTokenConfig::new("T1", "1234"));
        let session = s.manager.open_session(&alice(), &"1234".into()).await.unwrap();

        let res: Result<(), _> = s
            .manager
            .with_exclusive_access(&session, |_handle| {
                Err(TokenError::unavailable("device removed"))
            })
            .await;
        assert!(res.is_err());
        assert!(s.manager.get_active_session(&alice()).is_none());
        assert!(session.is_closed().await);
    }

    #[tokio::test]
    async fn sweep_closes_only_expired_sessions() {
        let s = setup(MockTokenConfig::new("T1", "1234"));
        let expired = s.manager.open_session(&alice(), &"1234".into()).await.unwrap();
        s.clock.advance(chrono::Duration::minutes(16));
        let bob = OperatorId::from("bob");
        let live = s.manager.open_session(&bob, &"1234".into()).await.unwrap();

        assert_eq!(s.manager.sweep_expired().await, 1);
        assert!(expired.is_closed().await);
        assert!(!live.is_closed().await);
        assert_eq!(s.manager.sweep_expired().await, 0);
    }

    #[tokio::test]
    async fn spawned_sweep_runs_until_manager_is_dropped() {
        let s = setup(MockTokenConfig::new("T1", "1234"));
        let session = s.manager.open_session(&alice(), &"1234".into()).await.unwrap();
        s.manager.spawn_sweep(&runtime::Handle::current(), StdDuration::from_millis(10));

        s.clock.advance(chrono::Duration::minutes(16));
        for _ in 0..100 {
            if session.is_closed().await {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert!(session.is_closed().await);
    }

    #[tokio::test]
    async fn status_warns_about_expiring_certificate() {
        let mut config = MockTokenConfig::new("T1", "1234");
        config.not_after_days = 10;
        let s = setup(config);
        s.manager.open_session(&alice(), &"1234".into()).await.unwrap();

        let status = s.manager.status(&alice(), 30);
        assert!(status.active);
        let days = status.certificate_expires_in_days.unwrap();
        assert!(days == 9 || days == 10);

        let status = s.manager.status(&alice(), 5);
        assert!(status.certificate_expires_in_days.is_none());
    }
}
