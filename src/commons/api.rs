//! Data structures exchanged with callers of docsign.
//!
//! The identifiers here end up as path components in the disk stores, so
//! [`DocumentId`] and [`DocumentType`] are restricted to a safe character
//! set when they are created.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commons::clock::Time;
use crate::constants::DOCUMENT_CODE_ID_CHARS;
use crate::token::cert::CertificateInfo;
use crate::token::gateway::Credential;


//------------ InvalidIdentifier ---------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidIdentifier {
    kind: &'static str,
    value: String,
}

impl fmt::Display for InvalidIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "invalid {} '{}': use 1-255 characters from a-z, A-Z, 0-9, \
             '-', '_' or '.', not starting with '.'",
            self.kind, self.value
        )
    }
}

impl std::error::Error for InvalidIdentifier {}

fn check_identifier(
    kind: &'static str,
    value: &str,
) -> Result<(), InvalidIdentifier> {
    let ok = !value.is_empty()
        && value.len() <= 255
        && !value.starts_with('.')
        && value.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.'
        });
    if ok {
        Ok(())
    } else {
        Err(InvalidIdentifier { kind, value: value.to_string() })
    }
}


//------------ OperatorId ----------------------------------------------------

/// The identifier of an operator, resolved by the caller's authentication.
///
/// This is opaque to docsign. It is never used as a path component.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct OperatorId(Arc<str>);

impl OperatorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperatorId {
    fn from(s: &str) -> Self {
        OperatorId(s.into())
    }
}

impl From<String> for OperatorId {
    fn from(s: String) -> Self {
        OperatorId(s.into())
    }
}

impl AsRef<str> for OperatorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//------------ DocumentId / DocumentType -------------------------------------

macro_rules! path_safe_identifier {
    ($name:ident, $kind:expr) => {
        #[derive(
            Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
            Serialize
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(value: &str) -> Result<Self, InvalidIdentifier> {
                check_identifier($kind, value)?;
                Ok($name(value.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = InvalidIdentifier;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidIdentifier;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(&s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

path_safe_identifier!(DocumentId, "document id");
path_safe_identifier!(DocumentType, "document type");

/// The human readable code of a document: `<type>-<first 8 chars of id>`.
pub fn document_code(
    document_type: &DocumentType,
    document_id: &DocumentId,
) -> String {
    let short: String =
        document_id.as_str().chars().take(DOCUMENT_CODE_ID_CHARS).collect();
    format!("{}-{}", document_type, short)
}


//------------ SignatureId ---------------------------------------------------

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct SignatureId(Uuid);

impl SignatureId {
    pub fn random() -> Self {
        SignatureId(Uuid::new_v4())
    }
}

impl From<Uuid> for SignatureId {
    fn from(id: Uuid) -> Self {
        SignatureId(id)
    }
}

impl FromStr for SignatureId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SignatureId)
    }
}

impl fmt::Display for SignatureId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//------------ TokenInfo -----------------------------------------------------

/// A hardware token as seen through a PKCS#11 provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenInfo {
    pub serial: String,
    pub label: String,
    pub provider: String,
}


//------------ SessionInfo ---------------------------------------------------

/// Returned when a signing session is opened or reused.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionInfo {
    pub token_serial: String,
    pub token_label: String,
    pub ca_provider: String,
    pub certificate_subject: String,
    pub certificate_valid_to: Time,
    pub expires_at: Time,
}


//------------ SessionStatus -------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionStatus {
    pub active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Time>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_serial: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_subject: Option<String>,

    /// Days until the signing certificate expires, only set when this is
    /// within the configured warning window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_expires_in_days: Option<i64>,
}

impl SessionStatus {
    pub fn inactive() -> Self {
        SessionStatus {
            active: false,
            expires_at: None,
            token_serial: None,
            ca_provider: None,
            certificate_subject: None,
            certificate_expires_in_days: None,
        }
    }
}


//------------ Sign requests -------------------------------------------------

/// A request to sign a single document.
///
/// When `credential` is given and the operator has no live session, a
/// session is opened first.
#[derive(Clone, Debug, Deserialize)]
pub struct SignDocumentRequest {
    pub document_id: DocumentId,
    pub document_type: DocumentType,
    pub reason: String,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub credential: Option<Credential>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignDocumentResponse {
    pub signature_id: SignatureId,
    pub document_code: String,
    pub signer_name: String,
    pub signed_at: Time,
    pub certificate_serial: String,
    pub ca_provider: String,
    pub signed_document_ref: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsa_timestamp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocsp_status: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BatchSignRequest {
    pub document_ids: Vec<DocumentId>,
    pub document_type: DocumentType,
    pub reason: String,

    #[serde(default)]
    pub credential: Option<Credential>,
}


//------------ BatchItemOutcome ----------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Signed,
    AlreadySigned,
    Failed,
}

impl BatchItemOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, BatchItemOutcome::Signed)
    }
}


//------------ BatchItemResult -----------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchItemResult {
    pub document_id: DocumentId,
    pub success: bool,
    pub outcome: BatchItemOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_id: Option<SignatureId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    pub fn signed(document_id: DocumentId, signature_id: SignatureId) -> Self {
        BatchItemResult {
            document_id,
            success: true,
            outcome: BatchItemOutcome::Signed,
            signature_id: Some(signature_id),
            error: None,
        }
    }

    pub fn already_signed(document_id: DocumentId) -> Self {
        BatchItemResult {
            document_id,
            success: false,
            outcome: BatchItemOutcome::AlreadySigned,
            signature_id: None,
            error: Some("document is already signed".to_string()),
        }
    }

    pub fn failed(document_id: DocumentId, error: impl fmt::Display) -> Self {
        BatchItemResult {
            document_id,
            success: false,
            outcome: BatchItemOutcome::Failed,
            signature_id: None,
            error: Some(error.to_string()),
        }
    }
}


//------------ BatchSignResponse ---------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchSignResponse {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchSignResponse {
    pub fn from_results(total: usize, results: Vec<BatchItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        BatchSignResponse {
            total,
            succeeded,
            failed: total - succeeded,
            results,
        }
    }
}


//------------ SignatureVerification -----------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignatureVerification {
    pub signature_id: SignatureId,
    pub valid: bool,
    pub revoked: bool,
    pub signer: CertificateInfo,
    pub signed_at: Time,
    pub reason: String,
    pub location: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}


//============ Tests =========================================================
