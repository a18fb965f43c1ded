//! Test concurrent signing: one active signature per document, and one
//! token operation at a time per session.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use docsign::commons::error::Error;
use docsign::token::mock::MockTokenConfig;

mod common;

use common::{doc, TestConfig, TestService, PIN};


//------------ Test Functions ------------------------------------------------

/// Signs D2 ten times at once, operator `i` picked by `operator_for(i)`.
async fn race_for_d2(t: &Arc<TestService>, operator_for: fn(usize) -> &'static str) {
    let tasks = (0..10).map(|i| {
        let t = t.clone();
        tokio::spawn(async move { t.sign(operator_for(i), "D2", "EMR").await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|res| res.unwrap())
        .collect();

    let won = results.iter().filter(|res| res.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|res| matches!(res, Err(Error::DocumentAlreadySigned(..))))
        .count();
    assert_eq!(won, 1);
    assert_eq!(conflicts, 9);
    assert_eq!(t.service.list_signatures(&doc("D2")).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_of_many_concurrent_signatures_wins() {
    let t = Arc::new(TestConfig::mem_storage().start());
    t.open("u1").await;

    race_for_d2(&t, |_| "u1").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ledger_settles_races_between_operators() {
    // Two sessions, so the requests really overlap rather than queue on
    // one session gate.
    let t = Arc::new(TestConfig::file_storage().start());
    t.open("u1").await;
    t.open("u2").await;

    race_for_d2(&t, |i| if i % 2 == 0 { "u1" } else { "u2" }).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn token_operations_never_overlap_within_a_session() {
    let mut token = MockTokenConfig::new("T1", PIN);
    token.sign_delay = Duration::from_millis(20);
    let t = Arc::new(TestConfig::mem_storage().token(token).start());
    t.open("u1").await;

    let tasks = (0..8).map(|i| {
        let t = t.clone();
        tokio::spawn(async move { t.sign("u1", &format!("D{}", i), "EMR").await })
    });
    for res in join_all(tasks).await {
        res.unwrap().unwrap();
    }

    assert_eq!(t.gateway.max_concurrent_signs(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_keep_one_session() {
    let t = Arc::new(TestConfig::mem_storage().start());

    let tasks = (0..5).map(|_| {
        let t = t.clone();
        tokio::spawn(async move { t.open("u1").await })
    });
    for res in join_all(tasks).await {
        res.unwrap();
    }

    assert_eq!(
        t.gateway.call_counts().get(docsign::token::mock::FnIdx::OpenSession),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_signature_releases_the_session() {
    let mut token = MockTokenConfig::new("T1", PIN);
    token.sign_delay = Duration::from_millis(200);
    let t = Arc::new(TestConfig::mem_storage().token(token).start());
    t.open("u1").await;

    // The caller gives up, the token operation still runs to completion.
    let res = tokio::time::timeout(Duration::from_millis(20), t.sign("u1", "F1", "EMR")).await;
    assert!(res.is_err());

    t.sign("u1", "F2", "EMR").await.unwrap();
    assert_eq!(t.gateway.max_concurrent_signs(), 1);
    assert_eq!(
        t.gateway.call_counts().get(docsign::token::mock::FnIdx::Sign),
        2
    );
}
