//! Shared harness for engine integration tests.
#![allow(dead_code)]

use kinit_types::{LedgerVersion, Network};
use kinit_wallet::testkit::{Cosigner, MemoryLedger, MockRemote};
use kinit_wallet::{
    AccountEngine, Client, EngineConfig, EngineDeps, KdfParams, KeyValueStore, MemoryStore,
    MigrationConfig, MigrationEvent, UserProfile,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct Harness {
    pub preferences: Arc<MemoryStore>,
    pub keychain: Arc<MemoryStore>,
    pub remote: Arc<MockRemote>,
    pub legacy: Arc<MemoryLedger>,
    pub current: Arc<MemoryLedger>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            preferences: Arc::new(MemoryStore::new()),
            keychain: Arc::new(MemoryStore::new()),
            remote: Arc::new(MockRemote::new()),
            legacy: Arc::new(MemoryLedger::new()),
            current: Arc::new(MemoryLedger::new()),
        }
    }

    pub fn config() -> EngineConfig {
        EngineConfig {
            kdf: KdfParams::light(),
            migration: MigrationConfig {
                poll_interval: Duration::from_millis(5),
                poll_attempts: 5,
            },
            ..Default::default()
        }
    }

    pub fn deps(&self, user: UserProfile) -> EngineDeps {
        EngineDeps::new(
            self.preferences.clone(),
            self.keychain.clone(),
            self.remote.clone(),
            self.legacy.clone(),
            self.current.clone(),
        )
        .with_user(user)
    }

    pub async fn engine(&self, user: UserProfile) -> AccountEngine {
        AccountEngine::new(Self::config(), self.deps(user))
            .await
            .expect("engine construction")
    }

    /// Engine plus a receiver subscribed before construction.
    pub async fn engine_with_events(
        &self,
        user: UserProfile,
    ) -> (AccountEngine, broadcast::Receiver<MigrationEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let engine = AccountEngine::new(Self::config(), self.deps(user).with_events(tx))
            .await
            .expect("engine construction");
        (engine, rx)
    }

    /// Client over the shared keychain, for seeding keystores.
    pub fn client(&self, version: LedgerVersion) -> Client {
        let ledger = match version {
            LedgerVersion::Legacy => self.legacy.clone(),
            LedgerVersion::Current => self.current.clone(),
        };
        Client::new(version, Network::Testnet, self.keychain.clone(), ledger, KdfParams::light())
    }

    /// Client over a separate keychain, standing in for another device.
    pub fn foreign_client(&self, version: LedgerVersion) -> Client {
        let keychain: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Client::new(version, Network::Testnet, keychain, self.legacy.clone(), KdfParams::light())
    }

    pub fn install_cosigner(&self) {
        self.current.require_signatures(2);
        Cosigner::new(LedgerVersion::Current.network_passphrase(Network::Testnet)).install(&self.remote);
    }
}

pub fn verified_user(id: &str) -> UserProfile {
    UserProfile {
        user_id: Some(id.to_string()),
        phone_verified: true,
        public_address: None,
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<MigrationEvent>) -> MigrationEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for migration event")
        .expect("event channel closed")
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
