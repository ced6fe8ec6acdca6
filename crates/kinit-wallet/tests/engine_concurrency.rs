//! Onboarding single-flight, balance notification, and lifecycle behaviour.

mod common;

use common::{eventually, Harness};
use kinit_types::Balance;
use kinit_wallet::{BalanceDelegate, LifecycleEvent, OnboardingResult, UserProfile, WalletError};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Balance>>,
}

impl BalanceDelegate for Recorder {
    fn balance_did_update(&self, balance: Balance) {
        self.seen.lock().unwrap().push(balance);
    }
}

#[tokio::test]
async fn concurrent_onboarding_shares_one_flight() {
    let h = Harness::new();
    h.remote.respond("/user/onboard", json!({ "status": "ok" }));
    h.remote.set_latency(Duration::from_millis(50));
    let engine = h.engine(UserProfile::default()).await;

    let first = engine.perform_onboarding_if_needed();
    let second = engine.perform_onboarding_if_needed();
    let (a, b) = tokio::join!(first, second);

    assert_eq!(a, OnboardingResult::Success);
    assert_eq!(b, OnboardingResult::Success);
    assert_eq!(h.remote.calls("/user/onboard"), 1);
    assert_eq!(h.current.lookup_count(), 1);
}

#[tokio::test]
async fn failed_onboarding_clears_the_slot() {
    let h = Harness::new();
    h.remote.respond("/user/onboard", json!({ "status": "error", "reason": "rate limited" }));
    let engine = h.engine(UserProfile::default()).await;

    match engine.perform_onboarding_if_needed().await {
        OnboardingResult::Failure(reason) => assert!(reason.contains("rate limited")),
        other => panic!("unexpected result {:?}", other),
    }

    // A later call starts a new attempt.
    h.remote.respond("/user/onboard", json!({ "status": "ok" }));
    assert_eq!(engine.perform_onboarding_if_needed().await, OnboardingResult::Success);
    assert_eq!(h.remote.calls("/user/onboard"), 2);
}

#[tokio::test]
async fn existing_ledger_account_is_not_registered() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    h.current.fund(&engine.public_address(), Balance::from_kin(3).unwrap());

    assert_eq!(engine.perform_onboarding_if_needed().await, OnboardingResult::Success);
    assert_eq!(h.remote.calls("/user/onboard"), 0);
    assert_eq!(engine.balance(), Balance::from_kin(3).unwrap());
    assert_eq!(engine.user().public_address, Some(engine.public_address()));
}

#[tokio::test]
async fn known_address_resolves_immediately_and_refreshes() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let address = engine.public_address();
    h.current.fund(&address, Balance::from_kin(8).unwrap());
    engine.update_user(UserProfile {
        public_address: Some(address),
        ..Default::default()
    });

    assert_eq!(engine.perform_onboarding_if_needed().await, OnboardingResult::Success);
    assert!(eventually(|| engine.balance() == Balance::from_kin(8).unwrap()).await);
    assert_eq!(h.remote.calls("/user/onboard"), 0);
}

#[tokio::test]
async fn other_balance_failures_fail_onboarding() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    h.current.fail_lookups(Some("gateway unreachable"));

    match engine.perform_onboarding_if_needed().await {
        OnboardingResult::Failure(reason) => assert!(reason.contains("gateway unreachable")),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(h.remote.calls("/user/onboard"), 0);
}

#[tokio::test]
async fn refresh_updates_cache_and_delegates_once_each() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let address = engine.public_address();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    engine.add_balance_delegate(&first);
    engine.add_balance_delegate(&second);
    engine.add_balance_delegate(&first);

    h.current.fund(&address, Balance::from_quarks(150_050));
    let value = engine.refresh_balance().await.unwrap();
    assert_eq!(value, Decimal::new(150_050, 5));

    assert_eq!(*first.seen.lock().unwrap(), vec![Balance::from_quarks(150_050)]);
    assert_eq!(*second.seen.lock().unwrap(), vec![Balance::from_quarks(150_050)]);

    engine.remove_balance_delegate(&second);
    h.current.fund(&address, Balance::from_quarks(7));
    engine.refresh_balance().await.unwrap();
    assert_eq!(first.seen.lock().unwrap().len(), 2);
    assert_eq!(second.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_refresh_keeps_cached_balance() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let recorder = Arc::new(Recorder::default());
    engine.add_balance_delegate(&recorder);
    h.current.fund(&engine.public_address(), Balance::from_kin(5).unwrap());
    engine.refresh_balance().await.unwrap();

    h.current.fail_lookups(Some("503"));
    let err = engine.refresh_balance().await.unwrap_err();
    assert!(matches!(err, WalletError::BalanceQueryFailed(_)));
    assert_eq!(err.report_description(), "ledger request failed: 503");
    assert_eq!(engine.balance(), Balance::from_kin(5).unwrap());
    assert_eq!(recorder.seen.lock().unwrap().len(), 1);

    h.current.fail_lookups(None);
    h.current.remove(&engine.public_address());
    assert!(matches!(engine.refresh_balance().await, Err(WalletError::MissingAccount)));
    assert_eq!(engine.balance(), Balance::from_kin(5).unwrap());
}

#[tokio::test]
async fn dropped_delegate_is_not_called() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let kept = Arc::new(Recorder::default());
    let gone = Arc::new(Recorder::default());
    engine.add_balance_delegate(&kept);
    engine.add_balance_delegate(&gone);
    drop(gone);

    h.current.fund(&engine.public_address(), Balance::from_kin(1).unwrap());
    engine.refresh_balance().await.unwrap();
    assert_eq!(kept.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_refreshes_are_independent() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    h.current.fund(&engine.public_address(), Balance::from_kin(2).unwrap());
    h.current.set_latency(Duration::from_millis(20));
    let recorder = Arc::new(Recorder::default());
    engine.add_balance_delegate(&recorder);

    let (a, b) = tokio::join!(engine.refresh_balance(), engine.refresh_balance());
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.current.lookup_count(), 2);
    assert_eq!(recorder.seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn lifecycle_activation_refreshes_balance() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    h.current.fund(&engine.public_address(), Balance::from_kin(21).unwrap());

    let (tx, rx) = broadcast::channel(4);
    engine.watch_lifecycle(rx);
    tx.send(LifecycleEvent::WillResignActive).unwrap();
    tx.send(LifecycleEvent::DidBecomeActive).unwrap();

    assert!(eventually(|| engine.balance() == Balance::from_kin(21).unwrap()).await);

    // Dropping the engine stops the watcher.
    drop(engine);
    assert!(eventually(|| tx.receiver_count() == 0).await);
}
