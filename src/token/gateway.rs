//! The seam between docsign and the hardware token drivers.
//!
//! A [`TokenGateway`] finds tokens and opens authenticated sessions on them.
//! An open session is represented by a [`TokenHandle`] which can sign
//! documents until it is closed. Both traits are synchronous: driver calls
//! block, so callers run them on a blocking thread.

use std::fmt;

use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::commons::api::TokenInfo;
use crate::commons::clock::Time;
use crate::token::cert::CertificateInfo;


//------------ Credential ----------------------------------------------------

/// The secret that unlocks a token, i.e. the user PIN.
///
/// Its `Debug` output is redacted and it is never written to any store.
#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(pin: impl Into<String>) -> Self {
        Credential(SecretString::new(pin.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<&str> for Credential {
    fn from(pin: &str) -> Self {
        Credential::new(pin)
    }
}


//------------ SigningInput --------------------------------------------------

/// What a token is asked to sign.
#[derive(Clone, Debug)]
pub struct SigningInput {
    pub content: Bytes,
    pub reason: String,
    pub location: String,
    pub signing_time: Time,
}


//------------ SignedArtifact ------------------------------------------------

/// The output of a token signing operation.
#[derive(Clone, Debug)]
pub struct SignedArtifact {
    /// The signed document envelope, ready to be stored.
    pub content: Bytes,

    /// Timestamp token from a time-stamping authority, if one was used.
    pub timestamp: Option<String>,

    /// The revocation status of the signing certificate, if it was checked.
    pub revocation_status: Option<String>,
}


//------------ OpenedToken ---------------------------------------------------

/// A token with an authenticated session and a usable certificate.
pub struct OpenedToken {
    pub token: TokenInfo,
    pub certificate: CertificateInfo,
    pub handle: Box<dyn TokenHandle>,
}

impl fmt::Debug for OpenedToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OpenedToken")
            .field("token", &self.token)
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}


//------------ TokenHandle ---------------------------------------------------

/// An open, logged in session on a token.
///
/// A handle is not safe for concurrent use. Callers must make sure only one
/// operation runs against a handle at any one time.
pub trait TokenHandle: Send {
    fn sign(&mut self, input: &SigningInput) -> Result<SignedArtifact, TokenError>;

    /// Logs out and releases the driver session. Calling this more than
    /// once is harmless.
    fn close(&mut self);
}


//------------ TokenGateway --------------------------------------------------

pub trait TokenGateway: Send + Sync {
    /// Lists the tokens currently present on all configured providers.
    fn list_tokens(&self) -> Result<Vec<TokenInfo>, TokenError>;

    /// Opens a session on the first token that accepts the credential and
    /// carries a certificate that is valid now.
    fn open_session(&self, credential: &Credential) -> Result<OpenedToken, TokenError>;
}


//------------ TokenError ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenError {
    /// The token rejected the PIN.
    InvalidCredential,

    /// No token is present, or none carries a usable certificate, or the
    /// token went away while in use.
    TokenUnavailable(String),

    /// Too many wrong PINs, the token needs to be unblocked.
    PinLocked,

    /// The handle was closed before the operation could run.
    SessionClosed,

    Driver(String),
}

impl TokenError {
    pub fn unavailable(msg: impl fmt::Display) -> Self {
        TokenError::TokenUnavailable(msg.to_string())
    }

    pub fn driver(msg: impl fmt::Display) -> Self {
        TokenError::Driver(msg.to_string())
    }

    /// Whether the session this error came from can no longer be used.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            TokenError::TokenUnavailable(_)
                | TokenError::PinLocked
                | TokenError::SessionClosed
        )
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenError::InvalidCredential => write!(f, "invalid PIN"),
            TokenError::TokenUnavailable(msg) => {
                write!(f, "token unavailable: {}", msg)
            }
            TokenError::PinLocked => write!(f, "token PIN is locked"),
            TokenError::SessionClosed => write!(f, "token session is closed"),
            TokenError::Driver(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TokenError {}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_is_redacted_in_debug_output() {
        let credential = Credential::new("123456");
        assert_eq!(credential.expose(), "123456");
        assert!(!format!("{:?}", credential).contains("123456"));
    }

    #[test]
    fn unrecoverable_errors() {
        assert!(TokenError::unavailable("removed").is_unrecoverable());
        assert!(TokenError::PinLocked.is_unrecoverable());
        assert!(TokenError::SessionClosed.is_unrecoverable());
        assert!(!TokenError::InvalidCredential.is_unrecoverable());
        assert!(!TokenError::driver("CKR_FUNCTION_FAILED").is_unrecoverable());
    }
}
