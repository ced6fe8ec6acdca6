//! End-to-end engine scenarios against in-memory ledgers and backend.

mod common;

use common::{eventually, next_event, verified_user, Harness};
use kinit_types::{keys, Balance, LedgerVersion};
use kinit_wallet::{
    BalanceDelegate, ImportWalletResult, KeyPair, KeyValueStore, MigrationEvent, MigrationState,
    OnboardingResult, SendRequest, StatsSnapshot, TransactionKind, UserProfile, WalletError,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Balance>>,
}

impl BalanceDelegate for Recorder {
    fn balance_did_update(&self, balance: Balance) {
        self.seen.lock().unwrap().push(balance);
    }
}

fn spend(amount: u64, order_id: &str) -> SendRequest {
    SendRequest {
        amount,
        order_id: order_id.to_string(),
        destination: KeyPair::generate().address().to_string(),
        memo: Some(order_id.to_string()),
        kind: TransactionKind::Spend,
    }
}

#[tokio::test]
async fn fresh_install_creates_current_account_and_onboards_once() {
    let h = Harness::new();
    h.remote.respond("/user/onboard", json!({ "status": "ok" }));

    let engine = h.engine(UserProfile::default()).await;
    assert_eq!(engine.migration_state(), MigrationState::NotNeeded);
    assert_eq!(engine.active_version(), LedgerVersion::Current);
    assert_eq!(h.client(LedgerVersion::Current).accounts().unwrap().len(), 1);
    assert!(h.remote.requests().is_empty());

    let recorder = Arc::new(Recorder::default());
    engine.add_balance_delegate(&recorder);

    assert_eq!(engine.perform_onboarding_if_needed().await, OnboardingResult::Success);
    assert_eq!(h.remote.calls("/user/onboard"), 1);
    let body = h.remote.requests()[0].body.clone().unwrap();
    assert_eq!(body["public_address"], engine.public_address());

    assert_eq!(engine.balance(), Balance::ZERO);
    assert_eq!(h.preferences.get(keys::BALANCE).unwrap(), Some(json!(0)));
    assert_eq!(*recorder.seen.lock().unwrap(), vec![Balance::ZERO]);
}

#[tokio::test]
async fn existing_current_account_is_reused() {
    let h = Harness::new();
    let first = h.client(LedgerVersion::Current).add_account().unwrap();
    let latest = h.client(LedgerVersion::Current).add_account().unwrap();

    let engine = h.engine(UserProfile::default()).await;
    assert_eq!(engine.public_address(), latest.public_address());
    assert_ne!(engine.public_address(), first.public_address());
}

#[tokio::test]
async fn unmigrated_legacy_account_starts_migration_at_construction() {
    let h = Harness::new();
    let legacy = h.client(LedgerVersion::Legacy).add_account().unwrap();
    let address = legacy.public_address().to_string();
    h.legacy.fund(&address, Balance::from_kin(40).unwrap());
    h.remote.respond(
        "/user/migration/status",
        json!({ "status": "ok", "is_migrated": false }),
    );
    let current = h.current.clone();
    let moved = address.clone();
    h.remote.on("/user/migrate", move |_| {
        current.fund(&moved, Balance::from_kin(40).unwrap());
        Ok(json!({ "status": "ok" }))
    });

    let (engine, mut events) = h.engine_with_events(verified_user("user-1")).await;
    assert_eq!(engine.migration_state(), MigrationState::InProgress);
    assert_eq!(engine.active_version(), LedgerVersion::Legacy);
    assert_eq!(engine.public_address(), address);

    assert_eq!(next_event(&mut events).await, MigrationEvent::Started { address: address.clone() });
    assert_eq!(next_event(&mut events).await, MigrationEvent::Succeeded { address: address.clone() });

    assert_eq!(engine.migration_state(), MigrationState::Succeeded);
    assert_eq!(engine.active_version(), LedgerVersion::Current);
    assert_eq!(engine.public_address(), address);
    assert!(eventually(|| engine.balance() == Balance::from_kin(40).unwrap()).await);

    let migrate = h
        .remote
        .requests()
        .into_iter()
        .find(|r| r.path == "/user/migrate")
        .unwrap();
    assert_eq!(migrate.query_value("user_id"), Some("user-1"));
    assert_eq!(migrate.query_value("address"), Some(address.as_str()));
}

#[tokio::test]
async fn migrated_legacy_account_is_not_migrated_again() {
    let h = Harness::new();
    let legacy = h.client(LedgerVersion::Legacy).add_account().unwrap();
    h.client(LedgerVersion::Current)
        .import_account(&legacy.export("").unwrap(), "")
        .unwrap();
    h.remote.respond(
        "/user/migration/status",
        json!({ "status": "ok", "is_migrated": true }),
    );

    let engine = h.engine(verified_user("user-1")).await;
    assert_eq!(engine.migration_state(), MigrationState::NotNeeded);
    assert_eq!(engine.active_version(), LedgerVersion::Current);
    assert_eq!(engine.public_address(), legacy.public_address());
    assert_eq!(h.remote.calls("/user/migrate"), 0);
}

#[tokio::test]
async fn failed_migration_keeps_legacy_account_until_restarted() {
    let h = Harness::new();
    let legacy = h.client(LedgerVersion::Legacy).add_account().unwrap();
    let address = legacy.public_address().to_string();
    h.remote.respond("/user/migrate", json!({ "status": "error", "reason": "kyc pending" }));

    let (engine, mut events) = h.engine_with_events(verified_user("user-1")).await;
    assert!(matches!(next_event(&mut events).await, MigrationEvent::Started { .. }));
    match next_event(&mut events).await {
        MigrationEvent::Failed { reason } => assert!(reason.contains("kyc pending")),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(engine.migration_state(), MigrationState::Failed(_)));
    assert_eq!(engine.active_version(), LedgerVersion::Legacy);
    assert_eq!(engine.public_address(), address);
    assert_eq!(h.remote.calls("/user/migrate"), 1);

    h.current.fund(&address, Balance::ZERO);
    h.remote.respond("/user/migrate", json!({ "status": "ok" }));
    engine.start_migration().unwrap();
    assert!(matches!(next_event(&mut events).await, MigrationEvent::Started { .. }));
    assert!(matches!(next_event(&mut events).await, MigrationEvent::Succeeded { .. }));
    assert_eq!(engine.active_version(), LedgerVersion::Current);
}

#[tokio::test]
async fn successful_send_refreshes_balance_and_counts() {
    let h = Harness::new();
    h.install_cosigner();
    let engine = h.engine(UserProfile::default()).await;
    h.current.fund(&engine.public_address(), Balance::from_kin(1_000).unwrap());

    let request = spend(100, "X");
    let destination = request.destination.clone();
    let tx_id = engine.send(request).await.unwrap();

    assert!(!tx_id.is_empty());
    assert_eq!(
        engine.stats(),
        StatsSnapshot {
            spend_count: 1,
            transaction_count: 1,
            total_spent: 100
        }
    );
    assert_eq!(engine.balance(), Balance::from_kin(900).unwrap());
    assert_eq!(h.current.balance_of(&destination), Some(Balance::from_kin(100).unwrap()));

    let sign = &h.remote.requests()[0];
    assert_eq!(sign.path, "/user/transaction/sign");
    assert_eq!(sign.body.as_ref().unwrap()["amount"], 100);
}

#[tokio::test]
async fn rejected_cosign_changes_nothing() {
    let h = Harness::new();
    h.remote.respond(
        "/user/transaction/sign",
        json!({ "status": "denied", "reason": "order already paid" }),
    );
    let engine = h.engine(UserProfile::default()).await;
    h.current.fund(&engine.public_address(), Balance::from_kin(1_000).unwrap());

    let err = engine.send(spend(100, "X")).await.unwrap_err();
    match err {
        WalletError::RemoteRejected { reason } => assert_eq!(reason, "order already paid"),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(engine.stats(), StatsSnapshot::default());
    assert!(h.current.submissions().is_empty());
    assert_eq!(h.current.balance_of(&engine.public_address()), Some(Balance::from_kin(1_000).unwrap()));
}

#[tokio::test]
async fn import_with_wrong_passphrase_leaves_state_untouched() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let before = (engine.public_address(), engine.active_version());

    let backup = h
        .foreign_client(LedgerVersion::Legacy)
        .add_account()
        .unwrap()
        .export("right-pass")
        .unwrap();

    match engine.import_wallet(&backup, "wrong-pass").await {
        ImportWalletResult::DecryptFailed(WalletError::DecryptionFailed) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!((engine.public_address(), engine.active_version()), before);
    assert!(h.client(LedgerVersion::Legacy).accounts().unwrap().is_empty());
    assert_eq!(h.client(LedgerVersion::Current).accounts().unwrap().len(), 1);

    assert!(matches!(
        engine.import_wallet("garbage", "right-pass").await,
        ImportWalletResult::DecryptFailed(WalletError::InvalidFile(_))
    ));
}

#[tokio::test]
async fn import_with_corrupt_kdf_header_is_rejected() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let before = engine.public_address();

    let backup = h
        .foreign_client(LedgerVersion::Legacy)
        .add_account()
        .unwrap()
        .export("pw")
        .unwrap();
    let mut file: serde_json::Value = serde_json::from_str(&backup).unwrap();
    let mut blob = hex::decode(file["seed"].as_str().unwrap()).unwrap();
    blob[9..13].copy_from_slice(&u32::MAX.to_le_bytes());
    file["seed"] = json!(hex::encode(&blob));

    assert!(matches!(
        engine.import_wallet(&file.to_string(), "pw").await,
        ImportWalletResult::DecryptFailed(WalletError::InvalidFile(_))
    ));
    assert_eq!(engine.public_address(), before);
    assert!(h.client(LedgerVersion::Legacy).accounts().unwrap().is_empty());
}

#[tokio::test]
async fn import_of_already_migrated_backup_adopts_current_account() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let account = h.foreign_client(LedgerVersion::Legacy).add_account().unwrap();
    let address = account.public_address().to_string();
    h.current.fund(&address, Balance::from_kin(12).unwrap());

    let result = engine.import_wallet(&account.export("pw").unwrap(), "pw").await;
    assert!(matches!(result, ImportWalletResult::Success { migration_needed: false }));
    assert_eq!(engine.active_version(), LedgerVersion::Current);
    assert_eq!(engine.public_address(), address);
    assert_eq!(engine.balance(), Balance::from_kin(12).unwrap());
    let current = h.client(LedgerVersion::Current).accounts().unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].public_address(), address);
}

#[tokio::test]
async fn import_needing_migration_then_migrates() {
    let h = Harness::new();
    let (engine, mut events) = h.engine_with_events(verified_user("user-9")).await;
    assert_eq!(engine.migration_state(), MigrationState::NotNeeded);

    let account = h.foreign_client(LedgerVersion::Legacy).add_account().unwrap();
    let address = account.public_address().to_string();
    let result = engine.import_wallet(&account.export("pw").unwrap(), "pw").await;

    assert!(matches!(result, ImportWalletResult::Success { migration_needed: true }));
    assert_eq!(engine.active_version(), LedgerVersion::Legacy);
    assert_eq!(engine.public_address(), address);
    assert!(h.client(LedgerVersion::Current).accounts().unwrap().is_empty());

    let current = h.current.clone();
    let moved = address.clone();
    h.remote.on("/user/migrate", move |_| {
        current.fund(&moved, Balance::ZERO);
        Ok(json!({ "status": "ok" }))
    });
    engine.start_migration().unwrap();

    assert_eq!(next_event(&mut events).await, MigrationEvent::Started { address: address.clone() });
    assert_eq!(next_event(&mut events).await, MigrationEvent::Succeeded { address: address.clone() });
    assert_eq!(engine.active_version(), LedgerVersion::Current);
    assert_eq!(engine.migration_state(), MigrationState::Succeeded);
}

#[tokio::test]
async fn import_check_failure_discards_transient_keystore() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let account = h.foreign_client(LedgerVersion::Legacy).add_account().unwrap();
    h.current.fail_lookups(Some("gateway timeout"));

    let result = engine.import_wallet(&account.export("pw").unwrap(), "pw").await;
    assert!(matches!(
        result,
        ImportWalletResult::MigrationCheckFailed(WalletError::BalanceQueryFailed(_))
    ));
    assert!(h.client(LedgerVersion::Current).accounts().unwrap().is_empty());
    assert_eq!(engine.active_version(), LedgerVersion::Legacy);
}

#[tokio::test]
async fn reset_key_store_replaces_keys() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let old = engine.public_address();
    h.client(LedgerVersion::Legacy).add_account().unwrap();
    engine.set_performed_backup(true).unwrap();
    assert!(engine.performed_backup());

    engine.reset_key_store().unwrap();

    assert!(!engine.performed_backup());
    assert_ne!(engine.public_address(), old);
    assert!(h.client(LedgerVersion::Legacy).accounts().unwrap().is_empty());
    let current = h.client(LedgerVersion::Current).accounts().unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].public_address(), engine.public_address());
}

#[tokio::test]
async fn export_round_trips_through_another_device() {
    let h = Harness::new();
    let engine = h.engine(UserProfile::default()).await;
    let backup = engine.export_wallet("s3cret").unwrap();
    assert!(!backup.contains("s3cret"));

    let restored = h
        .foreign_client(LedgerVersion::Current)
        .import_account(&backup, "s3cret")
        .unwrap();
    assert_eq!(restored.public_address(), engine.public_address());
}
