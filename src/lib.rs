//! The _docsign_ library crate: document signing with hardware tokens.
//!
//! Operators open a signing session with the PIN of their token. Within the
//! session documents are rendered, signed on the token and recorded in the
//! signature ledger, which keeps at most one active signature per document.

#[macro_use]
extern crate log;

pub mod commons;
pub mod config;
pub mod constants;
pub mod ledger;
pub mod service;
pub mod session;
pub mod signing;
pub mod storage;
pub mod token;
