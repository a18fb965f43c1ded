//! Authenticated signing sessions, one per operator.
//!
//! A [`Session`] owns the open handle on the operator's token. The handle
//! sits behind an async mutex, the session's gate, so that at most one
//! token operation runs per session at any time. The gate is `None` once
//! the session has been closed.

use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::commons::api::{OperatorId, SessionInfo, TokenInfo};
use crate::commons::clock::Time;
use crate::token::cert::CertificateInfo;
use crate::token::gateway::{TokenError, TokenHandle};

mod locks;
pub mod manager;
pub mod store;

pub use self::manager::SessionManager;


//------------ Session -------------------------------------------------------

pub struct Session {
    operator: OperatorId,
    token: TokenInfo,
    certificate: CertificateInfo,
    created_at: Time,
    expires_at: RwLock<Time>,
    gate: Arc<Mutex<Option<Box<dyn TokenHandle>>>>,
}

impl Session {
    pub(crate) fn new(
        operator: OperatorId,
        token: TokenInfo,
        certificate: CertificateInfo,
        handle: Box<dyn TokenHandle>,
        created_at: Time,
        expires_at: Time,
    ) -> Self {
        Session {
            operator,
            token,
            certificate,
            created_at,
            expires_at: RwLock::new(expires_at.max(created_at)),
            gate: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn operator(&self) -> &OperatorId {
        &self.operator
    }

    pub fn token(&self) -> &TokenInfo {
        &self.token
    }

    pub fn certificate(&self) -> &CertificateInfo {
        &self.certificate
    }

    pub fn created_at(&self) -> Time {
        self.created_at
    }

    pub fn expires_at(&self) -> Time {
        *self.expires_at.read().unwrap()
    }

    pub fn is_live_at(&self, now: Time) -> bool {
        now < self.expires_at()
    }

    /// Moves the expiry to `until`, never before creation.
    pub(crate) fn extend(&self, until: Time) {
        *self.expires_at.write().unwrap() = until.max(self.created_at);
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            token_serial: self.token.serial.clone(),
            token_label: self.token.label.clone(),
            ca_provider: self.token.provider.clone(),
            certificate_subject: self.certificate.subject.clone(),
            certificate_valid_to: self.certificate.valid_to,
            expires_at: self.expires_at(),
        }
    }

    /// Runs `op` against the token handle while holding the gate.
    ///
    /// The operation runs on a blocking thread and owns the gate guard, so
    /// the gate is released whenever the operation finishes, including when
    /// the caller has gone away in the meantime.
    pub(crate) async fn exclusive<T, F>(&self, op: F) -> Result<T, TokenError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TokenHandle) -> Result<T, TokenError> + Send + 'static,
    {
        let mut guard = self.gate.clone().lock_owned().await;
        let res = tokio::task::spawn_blocking(move || match &mut *guard {
            Some(handle) => op(&mut **handle),
            None => Err(TokenError::SessionClosed),
        })
        .await;

        match res {
            Ok(res) => res,
            Err(err) => Err(TokenError::driver(format!(
                "token operation did not complete: {}",
                err
            ))),
        }
    }

    /// Closes the token handle once any running operation has finished.
    pub(crate) async fn close(&self) {
        let mut guard = self.gate.clone().lock_owned().await;
        let res = tokio::task::spawn_blocking(move || {
            if let Some(mut handle) = guard.take() {
                handle.close();
            }
        })
        .await;
        if let Err(err) = res {
            error!("Closing token session for '{}' failed: {}", self.operator, err);
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.gate.lock().await.is_none()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("operator", &self.operator)
            .field("token", &self.token)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}
