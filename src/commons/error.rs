//! Defines all docsign errors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commons::api::{
    DocumentId, DocumentType, InvalidIdentifier, OperatorId, SignatureId,
};
use crate::ledger::store::LedgerStoreError;
use crate::signing::artifact::ArtifactError;
use crate::signing::render::RenderError;
use crate::token::gateway::TokenError;
use crate::token::registry::RegistryError;


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // System Issues (1000-1099)
    //-----------------------------------------------------------------

    // 1000
    StorageError(String),

    // 1001
    DriverError(String),

    // 1002
    RenderFailed(String),

    // 1003
    Custom(String),

    //-----------------------------------------------------------------
    // Token and Session Issues (2000-2099)
    //-----------------------------------------------------------------

    // 2000
    InvalidCredential,

    // 2001
    TokenUnavailable(String),

    // 2002
    NoActiveSession(OperatorId),

    // 2003
    SessionClosed,

    //-----------------------------------------------------------------
    // Signature Issues (2100-2199)
    //-----------------------------------------------------------------

    // 2100
    DocumentAlreadySigned(DocumentType, DocumentId),

    // 2101
    SignatureNotFound(SignatureId),

    // 2102
    AlreadyRevoked(SignatureId),

    // 2103
    Forbidden(String),

    //-----------------------------------------------------------------
    // Request Issues (2200-2299)
    //-----------------------------------------------------------------

    // 2200
    BatchTooLarge { size: usize, max: usize },

    // 2201
    InvalidInput(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::StorageError(e) => write!(f, "Storage error: {}", e),
            Error::DriverError(e) => write!(f, "Token driver error: {}", e),
            Error::RenderFailed(e) => {
                write!(f, "Could not render document: {}", e)
            }
            Error::Custom(s) => s.fmt(f),
            Error::InvalidCredential => {
                write!(f, "The token PIN was rejected")
            }
            Error::TokenUnavailable(e) => {
                write!(f, "No usable signing token: {}", e)
            }
            Error::NoActiveSession(operator) => write!(
                f,
                "No active signing session for '{}', provide the token PIN",
                operator
            ),
            Error::SessionClosed => write!(
                f,
                "The signing session was closed, provide the token PIN"
            ),
            Error::DocumentAlreadySigned(ty, id) => {
                write!(f, "Document {} '{}' is already signed", ty, id)
            }
            Error::SignatureNotFound(id) => {
                write!(f, "Unknown signature '{}'", id)
            }
            Error::AlreadyRevoked(id) => {
                write!(f, "Signature '{}' is already revoked", id)
            }
            Error::Forbidden(e) => write!(f, "Not allowed: {}", e),
            Error::BatchTooLarge { size, max } => write!(
                f,
                "Batch of {} documents exceeds the maximum of {}",
                size, max
            ),
            Error::InvalidInput(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Whether the caller can fix this by changing the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::StorageError(_)
                | Error::DriverError(_)
                | Error::RenderFailed(_)
                | Error::Custom(_)
        )
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let (code, label) = match self {
            Error::StorageError(_) => (1000, "sys-storage"),
            Error::DriverError(_) => (1001, "sys-driver"),
            Error::RenderFailed(_) => (1002, "sys-render"),
            Error::Custom(_) => (1003, "sys-other"),

            Error::InvalidCredential => (2000, "token-invalid-credential"),
            Error::TokenUnavailable(_) => (2001, "token-unavailable"),
            Error::NoActiveSession(_) => (2002, "session-none"),
            Error::SessionClosed => (2003, "session-closed"),

            Error::DocumentAlreadySigned(..) => (2100, "sig-already-signed"),
            Error::SignatureNotFound(_) => (2101, "sig-unknown"),
            Error::AlreadyRevoked(_) => (2102, "sig-already-revoked"),
            Error::Forbidden(_) => (2103, "sig-forbidden"),

            Error::BatchTooLarge { .. } => (2200, "req-batch-too-large"),
            Error::InvalidInput(_) => (2201, "req-invalid-input"),
        };
        ErrorResponse::new(code, label, self)
    }
}

impl From<TokenError> for Error {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::InvalidCredential => Error::InvalidCredential,
            TokenError::TokenUnavailable(msg) => Error::TokenUnavailable(msg),
            TokenError::SessionClosed => Error::SessionClosed,
            TokenError::PinLocked | TokenError::Driver(_) => {
                Error::DriverError(e.to_string())
            }
        }
    }
}

impl From<LedgerStoreError> for Error {
    fn from(e: LedgerStoreError) -> Self {
        match e {
            LedgerStoreError::NotFound(id) => Error::SignatureNotFound(id),
            LedgerStoreError::NotActive(id) => Error::AlreadyRevoked(id),
            LedgerStoreError::Conflict { document_type, document_id, .. } => {
                Error::DocumentAlreadySigned(document_type, document_id)
            }
            other => Error::StorageError(other.to_string()),
        }
    }
}

impl From<ArtifactError> for Error {
    fn from(e: ArtifactError) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl From<RenderError> for Error {
    fn from(e: RenderError) -> Self {
        Error::RenderFailed(e.to_string())
    }
}

impl From<InvalidIdentifier> for Error {
    fn from(e: InvalidIdentifier) -> Self {
        Error::InvalidInput(e.to_string())
    }
}


//------------ ErrorResponse -------------------------------------------------

/// The serializable form of an [`Error`] handed back to callers.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub label: String,
    pub msg: String,
}

impl ErrorResponse {
    pub fn new(code: u16, label: &str, msg: impl fmt::Display) -> Self {
        ErrorResponse { code, label: label.to_string(), msg: msg.to_string() }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}): {}", self.label, self.code, self.msg)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_map_to_caller_errors() {
        assert!(matches!(
            Error::from(TokenError::InvalidCredential),
            Error::InvalidCredential
        ));
        assert!(matches!(
            Error::from(TokenError::TokenUnavailable("removed".into())),
            Error::TokenUnavailable(_)
        ));
        assert!(matches!(
            Error::from(TokenError::PinLocked),
            Error::DriverError(_)
        ));
        assert!(matches!(
            Error::from(TokenError::SessionClosed),
            Error::SessionClosed
        ));
    }

    #[test]
    fn error_responses_carry_codes() {
        let id = SignatureId::random();
        let res = Error::AlreadyRevoked(id).to_error_response();
        assert_eq!(res.code, 2102);
        assert_eq!(res.label, "sig-already-revoked");
        assert!(res.msg.contains(&id.to_string()));

        let res =
            Error::BatchTooLarge { size: 51, max: 50 }.to_error_response();
        assert_eq!(res.code, 2200);
    }

    #[test]
    fn credential_problems_are_client_errors() {
        assert!(Error::InvalidCredential.is_client_error());
        assert!(!Error::StorageError("disk full".into()).is_client_error());
    }
}
