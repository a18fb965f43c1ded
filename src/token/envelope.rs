//! The signed document format.
//!
//! A signed document is a JSON envelope holding the original content, the
//! signed attributes, the signer certificate and an RSA PKCS#1 v1.5
//! signature with SHA-256 over the canonical JSON of the signed attributes.
//! The attributes bind the content through its SHA-256 digest.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Verifier;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};

use crate::commons::clock::Time;
use crate::constants::{HASH_ALGORITHM, SIGNATURE_ALGORITHM};
use crate::token::cert::CertificateInfo;
use crate::token::gateway::{SigningInput, TokenError};


//------------ SignedAttributes ----------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignedAttributes {
    pub digest_algorithm: String,
    pub content_digest: String,
    pub reason: String,
    pub location: String,
    pub signing_time: Time,
    pub signer: String,
}

impl SignedAttributes {
    pub fn new(input: &SigningInput, signer: &str) -> Self {
        SignedAttributes {
            digest_algorithm: HASH_ALGORITHM.to_string(),
            content_digest: hex::encode(openssl::sha::sha256(&input.content)),
            reason: input.reason.clone(),
            location: input.location.clone(),
            signing_time: input.signing_time,
            signer: signer.to_string(),
        }
    }

    /// The exact bytes the token signs.
    pub fn to_be_signed(&self) -> Result<Vec<u8>, TokenError> {
        serde_json::to_vec(self).map_err(|e| {
            TokenError::driver(format!("cannot encode signed attributes: {}", e))
        })
    }
}


//------------ SignedEnvelope ------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignedEnvelope {
    pub content: String,
    pub attributes: SignedAttributes,
    pub signature_algorithm: String,
    pub certificate: String,
    pub signature: String,
}

impl SignedEnvelope {
    pub fn new(
        input: &SigningInput,
        attributes: SignedAttributes,
        certificate_der: &[u8],
        signature: &[u8],
    ) -> Self {
        SignedEnvelope {
            content: BASE64.encode(&input.content),
            attributes,
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
            certificate: BASE64.encode(certificate_der),
            signature: BASE64.encode(signature),
        }
    }

    /// Builds a complete envelope given a function that signs bytes with
    /// the token's private key.
    pub fn sign_with<F>(
        input: &SigningInput,
        certificate_der: &[u8],
        signer: &str,
        sign: F,
    ) -> Result<Self, TokenError>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>, TokenError>,
    {
        let attributes = SignedAttributes::new(input, signer);
        let signature = sign(&attributes.to_be_signed()?)?;
        Ok(Self::new(input, attributes, certificate_der, &signature))
    }

    pub fn to_bytes(&self) -> Result<Bytes, TokenError> {
        serde_json::to_vec_pretty(self).map(Bytes::from).map_err(|e| {
            TokenError::driver(format!("cannot encode signed document: {}", e))
        })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| {
            EnvelopeError::Malformed(format!("not a signed document: {}", e))
        })
    }

    pub fn content(&self) -> Result<Vec<u8>, EnvelopeError> {
        BASE64
            .decode(&self.content)
            .map_err(|e| EnvelopeError::Malformed(format!("content: {}", e)))
    }

    pub fn certificate_info(&self) -> Result<CertificateInfo, EnvelopeError> {
        let der = BASE64
            .decode(&self.certificate)
            .map_err(|e| EnvelopeError::Malformed(format!("certificate: {}", e)))?;
        CertificateInfo::from_der(&der)
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Checks that the content matches the signed digest and that the
    /// signature verifies against the embedded certificate.
    pub fn verify(&self) -> Result<(), EnvelopeError> {
        if self.signature_algorithm != SIGNATURE_ALGORITHM {
            return Err(EnvelopeError::Malformed(format!(
                "unsupported signature algorithm '{}'",
                self.signature_algorithm
            )));
        }

        let content = self.content()?;
        let digest = hex::encode(openssl::sha::sha256(&content));
        if digest != self.attributes.content_digest {
            return Err(EnvelopeError::DigestMismatch);
        }

        let der = BASE64
            .decode(&self.certificate)
            .map_err(|e| EnvelopeError::Malformed(format!("certificate: {}", e)))?;
        let signature = BASE64
            .decode(&self.signature)
            .map_err(|e| EnvelopeError::Malformed(format!("signature: {}", e)))?;
        let to_be_signed = serde_json::to_vec(&self.attributes)
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        let valid = (|| -> Result<bool, openssl::error::ErrorStack> {
            let cert = X509::from_der(&der)?;
            let key: PKey<_> = cert.public_key()?;
            let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
            verifier.update(&to_be_signed)?;
            verifier.verify(&signature)
        })()
        .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if valid {
            Ok(())
        } else {
            Err(EnvelopeError::BadSignature)
        }
    }
}


//------------ EnvelopeError -------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EnvelopeError {
    Malformed(String),
    DigestMismatch,
    BadSignature,
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EnvelopeError::Malformed(e) => write!(f, "malformed signed document: {}", e),
            EnvelopeError::DigestMismatch => {
                write!(f, "document content does not match the signed digest")
            }
            EnvelopeError::BadSignature => {
                write!(f, "signature does not verify against the signer certificate")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}
