//! Test signing single documents through the service.

use docsign::commons::actor::Actor;
use docsign::commons::error::Error;
use docsign::ledger::SignatureStatus;
use docsign::token::gateway::Credential;
use docsign::token::mock::{FnIdx, MockTokenConfig};

mod common;

use common::{doc, op, sign_request, TestConfig, PIN};


//------------ Test Functions ------------------------------------------------

#[tokio::test]
async fn sign_with_session() {
    let t = TestConfig::mem_storage().start();

    eprintln!(">>>> Open a session and check its status.");
    let info = t.service.open_session(&op("u1"), &Credential::new(PIN)).await.unwrap();
    assert_eq!(info.token_serial, "T1");
    assert_eq!(info.ca_provider, "mock");

    let status = t.service.session_status(&op("u1"));
    assert!(status.active);
    assert_eq!(status.token_serial.as_deref(), Some("T1"));
    assert!(status.certificate_expires_in_days.is_none());

    eprintln!(">>>> Sign D1, then sign it again.");
    let signed = t
        .service
        .sign(&op("u1"), sign_request("D1", "EMR", None))
        .await
        .unwrap();
    assert_eq!(signed.document_code, "EMR-D1");
    assert_eq!(signed.signer_name, "Mock Signer");
    assert_eq!(signed.ca_provider, "mock");
    assert_eq!(signed.certificate_serial, t.gateway.certificate().serial);
    assert!(signed.signed_document_ref.starts_with("signed/EMR/D1_"));

    let err = t.sign("u1", "D1", "EMR").await.unwrap_err();
    assert!(matches!(err, Error::DocumentAlreadySigned(..)));
    assert_eq!(t.gateway.call_counts().get(FnIdx::Sign), 1);

    eprintln!(">>>> The record carries the signing details.");
    let records = t.service.list_signatures(&doc("D1")).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, signed.signature_id);
    assert_eq!(record.signer, op("u1"));
    assert_eq!(record.hash_algorithm, "SHA-256");
    assert_eq!(record.location, "Viet Nam");
    assert_eq!(record.token_serial, "T1");
    assert_eq!(record.status, SignatureStatus::Active);

    let verification = t.service.verify_signature(signed.signature_id).unwrap();
    assert!(verification.valid);

    eprintln!(">>>> The token was registered and marked as used.");
    let tokens = t.service.operator_tokens(&op("u1")).unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].token_serial, "T1");
    assert!(tokens[0].last_used_at.is_some());
}

#[tokio::test]
async fn sign_opens_session_with_credential() {
    let t = TestConfig::mem_storage().start();

    let err = t.sign("u1", "D1", "EMR").await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession(_)));

    let err = t
        .service
        .sign(&op("u1"), sign_request("D1", "EMR", Some("0000")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidCredential));
    assert!(!t.service.session_status(&op("u1")).active);

    let mut request = sign_request("D1", "EMR", Some(PIN));
    request.location = Some("Da Nang".to_string());
    let signed = t.service.sign(&op("u1"), request).await.unwrap();
    assert!(t.service.session_status(&op("u1")).active);

    let record = t.service.signature(signed.signature_id).unwrap();
    assert_eq!(record.location, "Da Nang");
}

#[tokio::test]
async fn expired_session_needs_fresh_credential() {
    let t = TestConfig::mem_storage().start();
    t.open("u1").await;

    t.clock.advance(chrono::Duration::minutes(16));
    assert!(!t.service.session_status(&op("u1")).active);

    let err = t.sign("u1", "D1", "EMR").await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession(_)));
    assert!(err.is_client_error());

    t.service
        .sign(&op("u1"), sign_request("D1", "EMR", Some(PIN)))
        .await
        .unwrap();
    assert_eq!(t.gateway.call_counts().get(FnIdx::OpenSession), 2);
}

#[tokio::test]
async fn signing_extends_the_session() {
    let t = TestConfig::mem_storage().start();
    t.open("u1").await;

    t.clock.advance(chrono::Duration::minutes(10));
    t.sign("u1", "D1", "EMR").await.unwrap();

    t.clock.advance(chrono::Duration::minutes(10));
    assert!(t.service.session_status(&op("u1")).active);
    t.sign("u1", "D2", "EMR").await.unwrap();
}

#[tokio::test]
async fn revoke_and_sign_again() {
    let t = TestConfig::file_storage().start();
    t.open("u1").await;
    t.open("u2").await;

    let first = t.sign("u1", "D1", "EMR").await.unwrap();

    eprintln!(">>>> Only the signer or an admin may revoke.");
    let err = t
        .service
        .revoke(first, &Actor::operator(op("u2")), "not mine")
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    t.service
        .revoke(first, &Actor::operator(op("u1")), "wrong patient")
        .unwrap();
    let err = t
        .service
        .revoke(first, &Actor::admin(op("root")), "again")
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRevoked(_)));

    eprintln!(">>>> The document can be signed again, history is kept.");
    let second = t.sign("u2", "D1", "EMR").await.unwrap();

    let active = t.service.list_signatures(&doc("D1")).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second);

    let history = t.service.signature_history(&doc("D1")).unwrap();
    assert_eq!(history.len(), 2);
    let revoked = history.iter().find(|r| r.id == first).unwrap();
    assert_eq!(revoked.status, SignatureStatus::Revoked);
    assert_eq!(revoked.revocation.as_ref().unwrap().reason, "wrong patient");

    let verification = t.service.verify_signature(first).unwrap();
    assert!(verification.revoked);
}

#[tokio::test]
async fn render_failure_does_not_touch_the_token() {
    let t = TestConfig::mem_storage().start();
    t.open("u1").await;

    let err = t.sign("u1", "missing-1", "EMR").await.unwrap_err();
    assert!(matches!(err, Error::RenderFailed(_)));
    assert_eq!(t.gateway.call_counts().get(FnIdx::Sign), 0);
    assert!(t.service.list_signatures(&doc("missing-1")).unwrap().is_empty());
}

#[tokio::test]
async fn removed_token_closes_the_session() {
    let t = TestConfig::mem_storage().start();
    t.open("u1").await;

    t.gateway.set_present(false);
    let err = t.sign("u1", "D1", "EMR").await.unwrap_err();
    assert!(matches!(err, Error::TokenUnavailable(_)));
    assert!(!t.service.session_status(&op("u1")).active);
    assert_eq!(t.gateway.call_counts().get(FnIdx::Close), 1);

    let err = t.sign("u1", "D1", "EMR").await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession(_)));
}

#[tokio::test]
async fn close_session() {
    let t = TestConfig::mem_storage().start();
    t.open("u1").await;

    t.service.close_session(&op("u1")).await;
    t.service.close_session(&op("u1")).await;
    assert!(!t.service.session_status(&op("u1")).active);
    assert_eq!(t.gateway.call_counts().get(FnIdx::Close), 1);
}

#[tokio::test]
async fn expiring_certificate_is_reported() {
    let mut token = MockTokenConfig::new("T1", PIN);
    token.not_after_days = 12;
    let t = TestConfig::mem_storage().token(token).start();
    t.open("u1").await;

    let days = t
        .service
        .session_status(&op("u1"))
        .certificate_expires_in_days
        .unwrap();
    assert!(days == 11 || days == 12);
}

#[tokio::test]
async fn tokens_and_registration() {
    let t = TestConfig::file_storage().start();

    let tokens = t.service.list_tokens().await.unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].serial, "T1");

    let mapping = t.service.register_token(&op("u1"), "T1").await.unwrap();
    assert_eq!(mapping.token_label, "Mock token T1");
    assert_eq!(mapping.ca_provider, "mock");

    let mapping = t.service.register_token(&op("u2"), "OTHER").await.unwrap();
    assert_eq!(mapping.token_label, "");

    assert_eq!(t.service.operator_tokens(&op("u1")).unwrap().len(), 1);
    assert_eq!(t.service.operator_tokens(&op("u2")).unwrap().len(), 1);

    // Opening a session moves the token to the operator using it.
    t.open("u2").await;
    assert!(t.service.operator_tokens(&op("u1")).unwrap().is_empty());
    assert_eq!(t.service.operator_tokens(&op("u2")).unwrap().len(), 2);

    assert!(matches!(
        t.service.register_token(&op("u1"), "  ").await,
        Err(Error::InvalidInput(_))
    ));
}
