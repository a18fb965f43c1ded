//! The signing certificate found on a token.

use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::x509::{X509, X509NameRef};
use serde::{Deserialize, Serialize};

use crate::commons::clock::Time;


//------------ CertificateInfo -----------------------------------------------

/// The parts of an X.509 certificate that signatures record.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub valid_from: Time,
    pub valid_to: Time,
}

impl CertificateInfo {
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let cert = X509::from_der(der)?;
        Self::from_x509(&cert)
    }

    pub fn from_x509(cert: &X509) -> Result<Self, CertificateError> {
        let serial = cert.serial_number().to_bn()?.to_hex_str()?.to_string();

        Ok(CertificateInfo {
            subject: name_to_string(cert.subject_name()),
            issuer: name_to_string(cert.issuer_name()),
            serial,
            valid_from: asn1_to_time(cert.not_before())?,
            valid_to: asn1_to_time(cert.not_after())?,
        })
    }

    pub fn is_valid_at(&self, now: Time) -> bool {
        self.valid_from <= now && now <= self.valid_to
    }

    /// Whole days until the certificate expires, negative once expired.
    pub fn days_until_expiry(&self, now: Time) -> i64 {
        (self.valid_to - now).num_days()
    }

    /// The CN of the subject, or the full subject if it has none.
    pub fn common_name(&self) -> &str {
        self.subject
            .split(", ")
            .find_map(|part| part.strip_prefix("CN="))
            .unwrap_or(&self.subject)
    }
}

fn name_to_string(name: &X509NameRef) -> String {
    let mut parts: Vec<String> = name
        .entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect();

    // Most specific first, the way people read a DN.
    parts.reverse();
    parts.join(", ")
}

fn asn1_to_time(time: &Asn1TimeRef) -> Result<Time, CertificateError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or(CertificateError::TimeOutOfRange)
}


//------------ CertificateError ----------------------------------------------

#[derive(Debug)]
pub enum CertificateError {
    Parse(ErrorStack),
    TimeOutOfRange,
}

impl std::fmt::Display for CertificateError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CertificateError::Parse(e) => {
                write!(f, "cannot parse certificate: {}", e)
            }
            CertificateError::TimeOutOfRange => {
                write!(f, "certificate validity is out of range")
            }
        }
    }
}

impl std::error::Error for CertificateError {}

impl From<ErrorStack> for CertificateError {
    fn from(e: ErrorStack) -> Self {
        CertificateError::Parse(e)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn info(from_days: i64, to_days: i64) -> CertificateInfo {
        let now = Utc::now();
        CertificateInfo {
            subject: "CN=Nguyen Van A, O=Hospital, C=VN".to_string(),
            issuer: "CN=Test CA, C=VN".to_string(),
            serial: "01".to_string(),
            valid_from: now + chrono::Duration::days(from_days),
            valid_to: now + chrono::Duration::days(to_days),
        }
    }

    #[test]
    fn validity_window() {
        let now = Utc::now();
        assert!(info(-1, 10).is_valid_at(now));
        assert!(!info(-10, -1).is_valid_at(now));
        assert!(!info(1, 10).is_valid_at(now));
    }

    #[test]
    fn common_name_from_subject() {
        assert_eq!(info(-1, 1).common_name(), "Nguyen Van A");

        let mut no_cn = info(-1, 1);
        no_cn.subject = "O=Hospital".to_string();
        assert_eq!(no_cn.common_name(), "O=Hospital");
    }

    #[test]
    fn days_until_expiry() {
        let cert = info(-1, 20);
        let days = cert.days_until_expiry(Utc::now());
        assert!(days == 19 || days == 20);
    }
}
