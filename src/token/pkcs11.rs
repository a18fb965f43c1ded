//! Signing tokens accessed through PKCS#11 provider libraries.
//!
//! Each configured CA provider ships its own PKCS#11 library. To open a
//! session the gateway walks the providers in order, and within a provider
//! every slot with a token present, logs in with the given PIN and looks
//! for a certificate that is valid now and has a matching private key. The
//! first match wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CkError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;

use crate::commons::api::TokenInfo;
use crate::config::CaProviderConfig;
use crate::token::cert::CertificateInfo;
use crate::token::envelope::SignedEnvelope;
use crate::token::gateway::{
    Credential, OpenedToken, SignedArtifact, SigningInput, TokenError,
    TokenGateway, TokenHandle,
};


//------------ Pkcs11Gateway -------------------------------------------------

pub struct Pkcs11Gateway {
    providers: Vec<Provider>,

    /// Loaded and initialized libraries by file name.
    ///
    /// A library must only be initialized once per process, and two paths
    /// to the same file name are treated as the same library.
    contexts: Mutex<HashMap<String, Pkcs11>>,
}

#[derive(Clone, Debug)]
struct Provider {
    name: String,
    library_path: PathBuf,
    token_label: Option<String>,
}

impl Pkcs11Gateway {
    pub fn new<'a>(
        providers: impl IntoIterator<Item = (&'a String, &'a CaProviderConfig)>,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|(name, config)| Provider {
                name: name.clone(),
                library_path: config.library_path.clone(),
                token_label: config.label.clone(),
            })
            .collect();

        Pkcs11Gateway { providers, contexts: Mutex::new(HashMap::new()) }
    }

    fn context(&self, provider: &Provider) -> Result<Pkcs11, TokenError> {
        let lib_file_name = lib_file_name(&provider.library_path)?;

        let mut contexts = self.contexts.lock().unwrap();
        if let Some(ctx) = contexts.get(&lib_file_name) {
            return Ok(ctx.clone());
        }

        let mut ctx = Pkcs11::new(&provider.library_path).map_err(|e| {
            TokenError::driver(format!(
                "cannot load PKCS#11 library '{}': {}",
                provider.library_path.display(),
                e
            ))
        })?;
        ctx.initialize(CInitializeArgs::OsThreads).map_err(|e| {
            TokenError::driver(format!(
                "cannot initialize PKCS#11 library '{}': {}",
                lib_file_name, e
            ))
        })?;
        info!(
            "Loaded PKCS#11 library '{}' for provider '{}'",
            lib_file_name, provider.name
        );

        contexts.insert(lib_file_name, ctx.clone());
        Ok(ctx)
    }

    /// The providers whose library is actually installed.
    fn installed_providers(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter().filter(|provider| {
            let installed = provider.library_path.is_file();
            if !installed {
                debug!(
                    "Skipping provider '{}', library '{}' not found",
                    provider.name,
                    provider.library_path.display()
                );
            }
            installed
        })
    }

    fn tokens_for(
        ctx: &Pkcs11,
        provider: &Provider,
    ) -> Result<Vec<(cryptoki::slot::Slot, TokenInfo)>, TokenError> {
        let mut res = vec![];
        for slot in ctx
            .get_slots_with_token()
            .map_err(|e| token_error("C_GetSlotList", e))?
        {
            let info = ctx
                .get_token_info(slot)
                .map_err(|e| token_error("C_GetTokenInfo", e))?;
            let token = TokenInfo {
                serial: info.serial_number().trim().to_string(),
                label: info.label().trim().to_string(),
                provider: provider.name.clone(),
            };
            if let Some(wanted) = &provider.token_label {
                if &token.label != wanted {
                    trace!(
                        "Skipping token '{}' in slot {}, label does not match '{}'",
                        token.label,
                        slot.id(),
                        wanted
                    );
                    continue;
                }
            }
            res.push((slot, token));
        }
        Ok(res)
    }

    /// Logs in to the token and picks its first currently valid certificate
    /// that has a private key.
    fn open_token(
        ctx: &Pkcs11,
        slot: cryptoki::slot::Slot,
        token: TokenInfo,
        credential: &Credential,
    ) -> Result<Option<OpenedToken>, TokenError> {
        let session = ctx
            .open_ro_session(slot)
            .map_err(|e| token_error("C_OpenSession", e))?;

        let pin = AuthPin::new(credential.expose().to_string().into());
        session
            .login(UserType::User, Some(&pin))
            .map_err(|e| token_error("C_Login", e))?;

        let now = Utc::now();
        let certs = session
            .find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])
            .map_err(|e| token_error("C_FindObjects", e))?;

        for cert_handle in certs {
            let (der, id) = match cert_value_and_id(&session, cert_handle)? {
                Some(found) => found,
                None => continue,
            };

            let certificate = match CertificateInfo::from_der(&der) {
                Ok(certificate) => certificate,
                Err(e) => {
                    warn!("Ignoring unreadable certificate on token '{}': {}", token.serial, e);
                    continue;
                }
            };
            if !certificate.is_valid_at(now) {
                warn!(
                    "Ignoring certificate '{}' on token '{}', valid {} to {}",
                    certificate.subject, token.serial, certificate.valid_from, certificate.valid_to
                );
                continue;
            }

            let key = session
                .find_objects(&[
                    Attribute::Class(ObjectClass::PRIVATE_KEY),
                    Attribute::Id(id),
                ])
                .map_err(|e| token_error("C_FindObjects", e))?
                .into_iter()
                .next();
            let Some(key) = key else {
                debug!(
                    "Certificate '{}' on token '{}' has no private key",
                    certificate.subject, token.serial
                );
                continue;
            };

            let handle = Pkcs11Handle {
                session: Some(session),
                key,
                cert_der: der,
                signer: certificate.subject.clone(),
            };
            return Ok(Some(OpenedToken {
                token,
                certificate,
                handle: Box::new(handle),
            }));
        }

        let _ = session.logout();
        Ok(None)
    }
}

impl TokenGateway for Pkcs11Gateway {
    fn list_tokens(&self) -> Result<Vec<TokenInfo>, TokenError> {
        let mut res = vec![];
        for provider in self.installed_providers() {
            let ctx = match self.context(provider) {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!("Cannot use provider '{}': {}", provider.name, e);
                    continue;
                }
            };
            match Self::tokens_for(&ctx, provider) {
                Ok(tokens) => res.extend(tokens.into_iter().map(|(_, token)| token)),
                Err(e) => warn!("Cannot list tokens for provider '{}': {}", provider.name, e),
            }
        }
        Ok(res)
    }

    fn open_session(&self, credential: &Credential) -> Result<OpenedToken, TokenError> {
        let mut pin_rejected = false;

        for provider in self.installed_providers() {
            let ctx = match self.context(provider) {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!("Cannot use provider '{}': {}", provider.name, e);
                    continue;
                }
            };

            for (slot, token) in Self::tokens_for(&ctx, provider)? {
                let serial = token.serial.clone();
                match Self::open_token(&ctx, slot, token, credential) {
                    Ok(Some(opened)) => {
                        info!(
                            "Opened session on token '{}' of provider '{}'",
                            opened.token.serial, provider.name
                        );
                        return Ok(opened);
                    }
                    Ok(None) => {
                        debug!("Token '{}' has no usable certificate", serial);
                    }
                    Err(TokenError::InvalidCredential) => {
                        debug!("Token '{}' rejected the PIN", serial);
                        pin_rejected = true;
                    }
                    Err(TokenError::PinLocked) => return Err(TokenError::PinLocked),
                    Err(e) => warn!("Cannot open token '{}': {}", serial, e),
                }
            }
        }

        if pin_rejected {
            Err(TokenError::InvalidCredential)
        } else {
            Err(TokenError::unavailable(
                "no token with a currently valid certificate was found",
            ))
        }
    }
}

fn lib_file_name(path: &Path) -> Result<String, TokenError> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            TokenError::driver(format!(
                "PKCS#11 library path '{}' does not point to a file",
                path.display()
            ))
        })
}

fn cert_value_and_id(
    session: &Session,
    cert: ObjectHandle,
) -> Result<Option<(Vec<u8>, Vec<u8>)>, TokenError> {
    let attrs = session
        .get_attributes(cert, &[AttributeType::Value, AttributeType::Id])
        .map_err(|e| token_error("C_GetAttributeValue", e))?;

    let mut value = None;
    let mut id = None;
    for attr in attrs {
        match attr {
            Attribute::Value(v) => value = Some(v),
            Attribute::Id(v) => id = Some(v),
            _ => {}
        }
    }
    Ok(value.zip(id))
}

fn token_error(function: &str, err: CkError) -> TokenError {
    match &err {
        CkError::Pkcs11(RvError::PinIncorrect | RvError::PinInvalid | RvError::PinLenRange, _) => {
            TokenError::InvalidCredential
        }
        CkError::Pkcs11(RvError::PinLocked, _) => TokenError::PinLocked,
        CkError::Pkcs11(
            RvError::DeviceRemoved
            | RvError::TokenNotPresent
            | RvError::SessionClosed
            | RvError::SessionHandleInvalid
            | RvError::DeviceError,
            _,
        ) => TokenError::unavailable(format!("{}: {}", function, err)),
        _ => TokenError::driver(format!("{}: {}", function, err)),
    }
}


//------------ Pkcs11Handle --------------------------------------------------

struct Pkcs11Handle {
    session: Option<Session>,
    key: ObjectHandle,
    cert_der: Vec<u8>,
    signer: String,
}

impl TokenHandle for Pkcs11Handle {
    fn sign(&mut self, input: &SigningInput) -> Result<SignedArtifact, TokenError> {
        let session = self.session.as_ref().ok_or(TokenError::SessionClosed)?;
        let key = self.key;

        let envelope =
            SignedEnvelope::sign_with(input, &self.cert_der, &self.signer, |data| {
                trace!("Signing {} bytes with CKM_SHA256_RSA_PKCS", data.len());
                session
                    .sign(&Mechanism::Sha256RsaPkcs, key, data)
                    .map_err(|e| token_error("C_Sign", e))
            })?;

        Ok(SignedArtifact {
            content: envelope.to_bytes()?,
            timestamp: None,
            revocation_status: None,
        })
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.logout() {
                debug!("Logout on close failed: {}", e);
            }
            // Dropping the session closes it.
        }
    }
}
