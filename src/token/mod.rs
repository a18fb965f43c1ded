//! Hardware tokens: discovery, authenticated sessions and signing.
pub mod cert;
pub mod envelope;
pub mod gateway;
pub mod mock;
pub mod registry;

#[cfg(feature = "hsm")]
pub mod pkcs11;
