//! A software token for tests and local development.
//!
//! The mock generates an RSA key and a self-signed certificate in memory and
//! behaves like a single PKCS#11 token: it checks the PIN, can be "removed",
//! counts calls and can be told to fail through error callbacks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509, X509Builder, X509NameBuilder};

use crate::commons::api::TokenInfo;
use crate::token::cert::CertificateInfo;
use crate::token::envelope::SignedEnvelope;
use crate::token::gateway::{
    Credential, OpenedToken, SignedArtifact, SigningInput, TokenError,
    TokenGateway, TokenHandle,
};


//------------ Call counts ---------------------------------------------------

pub enum FnIdx {
    ListTokens,
    OpenSession,
    Sign,
    Close,
    Count,
}

#[derive(Debug)]
pub struct MockTokenCallCounts {
    call_counts: RwLock<Vec<u32>>,
}

impl MockTokenCallCounts {
    pub fn new() -> Self {
        let mut call_counts = Vec::with_capacity(FnIdx::Count as usize);
        call_counts.resize(FnIdx::Count as usize, 0);

        Self { call_counts: RwLock::new(call_counts) }
    }

    pub fn get(&self, fn_idx: FnIdx) -> u32 {
        self.call_counts.read().unwrap()[fn_idx as usize]
    }

    pub fn inc(&self, fn_idx: FnIdx) {
        self.call_counts.write().unwrap()[fn_idx as usize] += 1;
    }
}

impl Default for MockTokenCallCounts {
    fn default() -> Self {
        Self::new()
    }
}

pub type OpenSessionErrorCb = fn(&MockTokenCallCounts) -> Result<(), TokenError>;
pub type SignErrorCb = fn(&MockTokenCallCounts) -> Result<(), TokenError>;


//------------ MockTokenConfig -----------------------------------------------

#[derive(Clone, Debug)]
pub struct MockTokenConfig {
    pub serial: String,
    pub label: String,
    pub provider: String,
    pub pin: String,
    pub subject_cn: String,
    pub organization: String,
    pub certificate_serial: String,

    /// Certificate validity relative to now, in days.
    pub not_before_days: i64,
    pub not_after_days: i64,

    /// How long each signature takes, to make overlaps observable.
    pub sign_delay: Duration,

    pub open_session_error_cb: Option<OpenSessionErrorCb>,
    pub sign_error_cb: Option<SignErrorCb>,
}

impl MockTokenConfig {
    pub fn new(serial: &str, pin: &str) -> Self {
        MockTokenConfig {
            serial: serial.to_string(),
            label: format!("Mock token {}", serial),
            provider: "mock".to_string(),
            pin: pin.to_string(),
            subject_cn: "Mock Signer".to_string(),
            organization: "Docsign Test".to_string(),
            certificate_serial: "1001".to_string(),
            not_before_days: -1,
            not_after_days: 365,
            sign_delay: Duration::ZERO,
            open_session_error_cb: None,
            sign_error_cb: None,
        }
    }
}


//------------ MockTokenGateway ----------------------------------------------

#[derive(Clone)]
pub struct MockTokenGateway {
    token: Arc<MockToken>,
}

struct MockToken {
    info: TokenInfo,
    pin: String,
    key: PKey<Private>,
    cert_der: Vec<u8>,
    certificate: CertificateInfo,
    sign_delay: Duration,
    present: AtomicBool,
    fn_call_counts: Arc<MockTokenCallCounts>,
    open_session_error_cb: Option<OpenSessionErrorCb>,
    sign_error_cb: Option<SignErrorCb>,
    signing: AtomicUsize,
    max_signing: AtomicUsize,
}

impl std::fmt::Debug for MockTokenGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTokenGateway")
            .field("token", &self.token.info)
            .finish()
    }
}

impl MockTokenGateway {
    pub fn new(config: MockTokenConfig) -> Result<Self, TokenError> {
        let (key, cert) = Self::build_key_and_cert(&config)
            .map_err(|e| TokenError::driver(format!("mock key setup: {}", e)))?;
        let cert_der = cert
            .to_der()
            .map_err(|e| TokenError::driver(format!("mock certificate: {}", e)))?;
        let certificate = CertificateInfo::from_x509(&cert)
            .map_err(|e| TokenError::driver(e.to_string()))?;

        Ok(MockTokenGateway {
            token: Arc::new(MockToken {
                info: TokenInfo {
                    serial: config.serial,
                    label: config.label,
                    provider: config.provider,
                },
                pin: config.pin,
                key,
                cert_der,
                certificate,
                sign_delay: config.sign_delay,
                present: AtomicBool::new(true),
                fn_call_counts: Arc::new(MockTokenCallCounts::new()),
                open_session_error_cb: config.open_session_error_cb,
                sign_error_cb: config.sign_error_cb,
                signing: AtomicUsize::new(0),
                max_signing: AtomicUsize::new(0),
            }),
        })
    }

    fn build_key_and_cert(
        config: &MockTokenConfig,
    ) -> Result<(PKey<Private>, X509), ErrorStack> {
        let key = PKey::from_rsa(Rsa::generate(2048)?)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("C", "VN")?;
        name.append_entry_by_text("O", &config.organization)?;
        name.append_entry_by_text("CN", &config.subject_cn)?;
        let name = name.build();

        let now = Utc::now().timestamp();
        let not_before = Asn1Time::from_unix((now + config.not_before_days * 86_400) as _)?;
        let not_after = Asn1Time::from_unix((now + config.not_after_days * 86_400) as _)?;

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        let serial =
            BigNum::from_hex_str(&config.certificate_serial)?.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.sign(&key, MessageDigest::sha256())?;

        Ok((key, builder.build()))
    }

    pub fn call_counts(&self) -> Arc<MockTokenCallCounts> {
        self.token.fn_call_counts.clone()
    }

    pub fn certificate(&self) -> &CertificateInfo {
        &self.token.certificate
    }

    pub fn token_info(&self) -> &TokenInfo {
        &self.token.info
    }

    /// Simulates plugging the token in or pulling it out.
    pub fn set_present(&self, present: bool) {
        self.token.present.store(present, Ordering::SeqCst);
    }

    /// The highest number of signing operations that ever ran at once.
    pub fn max_concurrent_signs(&self) -> usize {
        self.token.max_signing.load(Ordering::SeqCst)
    }

    fn is_present(&self) -> bool {
        self.token.present.load(Ordering::SeqCst)
    }
}

impl TokenGateway for MockTokenGateway {
    fn list_tokens(&self) -> Result<Vec<TokenInfo>, TokenError> {
        self.token.fn_call_counts.inc(FnIdx::ListTokens);
        if self.is_present() {
            Ok(vec![self.token.info.clone()])
        } else {
            Ok(vec![])
        }
    }

    fn open_session(&self, credential: &Credential) -> Result<OpenedToken, TokenError> {
        self.token.fn_call_counts.inc(FnIdx::OpenSession);
        if let Some(err_cb) = &self.token.open_session_error_cb {
            (err_cb)(&self.token.fn_call_counts)?;
        }

        if !self.is_present() {
            return Err(TokenError::unavailable("no token found"));
        }
        if credential.expose() != self.token.pin {
            return Err(TokenError::InvalidCredential);
        }
        if !self.token.certificate.is_valid_at(Utc::now()) {
            return Err(TokenError::unavailable(
                "no certificate on the token is currently valid",
            ));
        }

        Ok(OpenedToken {
            token: self.token.info.clone(),
            certificate: self.token.certificate.clone(),
            handle: Box::new(MockHandle { token: self.token.clone(), open: true }),
        })
    }
}


//------------ MockHandle ----------------------------------------------------

struct MockHandle {
    token: Arc<MockToken>,
    open: bool,
}

/// Tracks how many signatures are in progress at once.
struct SigningGuard<'a>(&'a MockToken);

impl<'a> SigningGuard<'a> {
    fn enter(token: &'a MockToken) -> Self {
        let now = token.signing.fetch_add(1, Ordering::SeqCst) + 1;
        token.max_signing.fetch_max(now, Ordering::SeqCst);
        SigningGuard(token)
    }
}

impl Drop for SigningGuard<'_> {
    fn drop(&mut self) {
        self.0.signing.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TokenHandle for MockHandle {
    fn sign(&mut self, input: &SigningInput) -> Result<SignedArtifact, TokenError> {
        let token = &self.token;
        token.fn_call_counts.inc(FnIdx::Sign);

        if !self.open {
            return Err(TokenError::SessionClosed);
        }
        if !token.present.load(Ordering::SeqCst) {
            return Err(TokenError::unavailable("token was removed"));
        }

        let _busy = SigningGuard::enter(token);
        if let Some(err_cb) = &token.sign_error_cb {
            (err_cb)(&token.fn_call_counts)?;
        }
        if !token.sign_delay.is_zero() {
            std::thread::sleep(token.sign_delay);
        }

        let envelope = SignedEnvelope::sign_with(
            input,
            &token.cert_der,
            &token.certificate.subject,
            |data| {
                let mut signer = Signer::new(MessageDigest::sha256(), &token.key)
                    .map_err(TokenError::driver)?;
                signer.update(data).map_err(TokenError::driver)?;
                signer.sign_to_vec().map_err(TokenError::driver)
            },
        )?;

        Ok(SignedArtifact {
            content: envelope.to_bytes()?,
            timestamp: None,
            revocation_status: None,
        })
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.token.fn_call_counts.inc(FnIdx::Close);
        }
    }
}


//============ Tests =========================================================
