//! Kinit wallet core.
//!
//! Provides keystore-backed accounts on the legacy and current ledgers,
//! passphrase-encrypted backups, the legacy-to-current migration state
//! machine, cosigned payments, a persisted balance cache with weak observers,
//! observable containers for backend lists, and the [`AccountEngine`] that
//! ties them together.

pub mod error;
pub mod store;
pub mod encryption;
pub mod keys;
pub mod ledger;
pub mod envelope;
pub mod account;
pub mod client;
pub mod cosign;
pub mod balance;
pub mod fetch;
pub mod loader;
pub mod migration;
pub mod config;
pub mod engine;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::WalletError;
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreExt};
pub use encryption::KdfParams;
pub use keys::KeyPair;
pub use ledger::{AccountInfo, GatewayLedger, LedgerError, LedgerNetwork, TxId};
pub use envelope::{Transaction, TransactionEnvelope};
pub use account::Account;
pub use client::Client;
pub use cosign::{CosigningProtocol, Payment};
pub use balance::{BalanceCache, BalanceDelegate, ObserverSet};
pub use fetch::{FetchContainer, FetchResult, SubscriptionId};
pub use loader::DataLoader;
pub use migration::{MigrationConfig, MigrationDelegate, MigrationError, MigrationState, MigrationStateMachine};
pub use config::EngineConfig;
pub use engine::{
    AccountEngine, EngineDeps, ImportWalletResult, LifecycleEvent, MigrationEvent,
    OnboardingResult, PendingOnboarding, SendRequest, StatsSnapshot, TransactionKind, UserProfile,
};
