//! The account engine.
//!
//! [`AccountEngine`] owns the active {client, account} pair and is the entry
//! point for everything the app does with the wallet: balance, onboarding,
//! payments, backup export/import, key reset, and migration. It hosts the
//! [`MigrationStateMachine`] as its delegate and re-targets the active pair
//! when a migration completes.
//!
//! The handle is cheap to clone; clones share state.

use crate::account::Account;
use crate::balance::{BalanceCache, BalanceDelegate};
use crate::client::Client;
use crate::config::EngineConfig;
use crate::cosign::{CosigningProtocol, Payment};
use crate::error::WalletError;
use crate::ledger::{LedgerNetwork, TxId};
use crate::migration::{
    Evaluation, MigrationDelegate, MigrationError, MigrationState, MigrationStateMachine,
};
use crate::store::{KeyValueStore, StoreExt};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use kinit_rpc::{requests, RemoteService};
use kinit_types::{keys, Balance, LedgerVersion};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 16;

// =============================================================================
// Public types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    Started { address: String },
    Succeeded { address: String },
    Failed { reason: String },
}

/// App lifecycle signals the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    DidBecomeActive,
    WillResignActive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: Option<String>,
    pub phone_verified: bool,
    /// Address the backend already knows for this user.
    pub public_address: Option<String>,
}

impl UserProfile {
    /// A verified identity is needed before any migration is attempted.
    pub fn has_identity(&self) -> bool {
        self.phone_verified && self.user_id.is_some()
    }
}

#[derive(Debug)]
pub enum ImportWalletResult {
    Success { migration_needed: bool },
    DecryptFailed(WalletError),
    MigrationCheckFailed(WalletError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingResult {
    Success,
    Failure(String),
}

/// Onboarding in flight; every caller shares the same outcome.
pub type PendingOnboarding = Shared<BoxFuture<'static, OnboardingResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Spend,
    PeerToPeer,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Spend => f.write_str("spend"),
            TransactionKind::PeerToPeer => f.write_str("p2p"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Whole KIN.
    pub amount: u64,
    pub order_id: String,
    pub destination: String,
    pub memo: Option<String>,
    pub kind: TransactionKind,
}

/// Counters of successful sends. Kept in memory.
#[derive(Debug, Default)]
pub struct TransactionStats {
    spend_count: AtomicU64,
    transaction_count: AtomicU64,
    total_spent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub spend_count: u64,
    pub transaction_count: u64,
    pub total_spent: u64,
}

impl TransactionStats {
    fn record_spend(&self, amount: u64) {
        self.spend_count.fetch_add(1, Ordering::SeqCst);
        self.transaction_count.fetch_add(1, Ordering::SeqCst);
        self.total_spent.fetch_add(amount, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            spend_count: self.spend_count.load(Ordering::SeqCst),
            transaction_count: self.transaction_count.load(Ordering::SeqCst),
            total_spent: self.total_spent.load(Ordering::SeqCst),
        }
    }
}

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub preferences: Arc<dyn KeyValueStore>,
    pub keychain: Arc<dyn KeyValueStore>,
    pub remote: Arc<dyn RemoteService>,
    pub legacy_ledger: Arc<dyn LedgerNetwork>,
    pub current_ledger: Arc<dyn LedgerNetwork>,
    pub user: UserProfile,
    /// Migration events. Subscribe before construction to see a migration
    /// started by the constructor.
    pub events: broadcast::Sender<MigrationEvent>,
}

impl EngineDeps {
    pub fn new(
        preferences: Arc<dyn KeyValueStore>,
        keychain: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteService>,
        legacy_ledger: Arc<dyn LedgerNetwork>,
        current_ledger: Arc<dyn LedgerNetwork>,
    ) -> Self {
        Self {
            preferences,
            keychain,
            remote,
            legacy_ledger,
            current_ledger,
            user: UserProfile::default(),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn with_user(mut self, user: UserProfile) -> Self {
        self.user = user;
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<MigrationEvent>) -> Self {
        self.events = events;
        self
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Clone)]
struct ActivePair {
    client: Client,
    account: Account,
}

struct EngineInner {
    this: Weak<EngineInner>,
    config: EngineConfig,
    preferences: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteService>,
    active: RwLock<ActivePair>,
    migration: Mutex<MigrationStateMachine>,
    balance: BalanceCache,
    onboarding: Mutex<Option<PendingOnboarding>>,
    user: RwLock<UserProfile>,
    stats: TransactionStats,
    events: broadcast::Sender<MigrationEvent>,
    lifecycle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct AccountEngine {
    inner: Arc<EngineInner>,
}

impl AccountEngine {
    /// Build the engine, deciding which account is active.
    ///
    /// A legacy account that still needs migrating becomes active and its
    /// migration starts right away. Otherwise the most recent current-ledger
    /// account is used, or a new one is created.
    pub async fn new(config: EngineConfig, deps: EngineDeps) -> Result<Self, WalletError> {
        let EngineDeps {
            preferences,
            keychain,
            remote,
            legacy_ledger,
            current_ledger,
            user,
            events,
        } = deps;

        let legacy = Client::new(
            LedgerVersion::Legacy,
            config.network,
            keychain.clone(),
            legacy_ledger,
            config.kdf,
        );
        let current = Client::new(
            LedgerVersion::Current,
            config.network,
            keychain,
            current_ledger,
            config.kdf,
        );
        let mut machine = MigrationStateMachine::new(
            user.user_id.clone(),
            legacy.clone(),
            current.clone(),
            remote.clone(),
            preferences.clone(),
            config.migration.clone(),
        );

        let (active, needs_migration) = match machine.evaluate(user.has_identity()).await? {
            Evaluation::Required(account) => {
                log::info!("legacy account {} requires migration", account.public_address());
                (ActivePair { client: legacy, account }, true)
            }
            Evaluation::NotNeeded => {
                let account = match current.accounts()?.pop() {
                    Some(account) => account,
                    None => current.add_account()?,
                };
                log::info!("migration not needed; active account {}", account.public_address());
                (ActivePair { client: current, account }, false)
            }
        };

        let inner = Arc::new_cyclic(|this: &Weak<EngineInner>| {
            let delegate: Weak<dyn MigrationDelegate> = this.clone();
            machine.set_delegate(delegate);
            EngineInner {
                this: this.clone(),
                config,
                balance: BalanceCache::new(preferences.clone()),
                preferences,
                remote,
                active: RwLock::new(active),
                migration: Mutex::new(machine),
                onboarding: Mutex::new(None),
                user: RwLock::new(user),
                stats: TransactionStats::default(),
                events,
                lifecycle: Mutex::new(None),
            }
        });

        let engine = Self { inner };
        if needs_migration {
            engine.start_migration()?;
        }
        Ok(engine)
    }

    pub fn public_address(&self) -> String {
        self.inner.public_address()
    }

    pub fn active_version(&self) -> LedgerVersion {
        read(&self.inner.active).client.version()
    }

    pub fn active_account(&self) -> Account {
        self.inner.active_account()
    }

    pub fn migration_state(&self) -> MigrationState {
        lock(&self.inner.migration).state()
    }

    pub fn subscribe_migration_events(&self) -> broadcast::Receiver<MigrationEvent> {
        self.inner.events.subscribe()
    }

    pub fn user(&self) -> UserProfile {
        read(&self.inner.user).clone()
    }

    pub fn update_user(&self, user: UserProfile) {
        *write(&self.inner.user) = user;
    }

    // -------------------------------------------------------------------------
    // Balance
    // -------------------------------------------------------------------------

    /// Last known balance.
    pub fn balance(&self) -> Balance {
        self.inner.balance.balance()
    }

    /// Fetch the balance from the ledger and update the cache.
    pub async fn refresh_balance(&self) -> Result<Decimal, WalletError> {
        self.inner.refresh_balance().await
    }

    pub fn add_balance_delegate<D: BalanceDelegate + 'static>(&self, delegate: &Arc<D>) {
        self.inner.balance.add_delegate(delegate);
    }

    pub fn remove_balance_delegate<D: BalanceDelegate + 'static>(&self, delegate: &Arc<D>) {
        self.inner.balance.remove_delegate(delegate);
    }

    // -------------------------------------------------------------------------
    // Onboarding
    // -------------------------------------------------------------------------

    /// Make sure the active account exists on the ledger, registering it with
    /// the backend if it does not.
    ///
    /// At most one onboarding runs at a time: a call made while one is in
    /// flight gets the same pending result.
    pub fn perform_onboarding_if_needed(&self) -> PendingOnboarding {
        let inner = &self.inner;

        if read(&inner.user).public_address.is_some() {
            inner.spawn_refresh();
            return future::ready(OnboardingResult::Success).boxed().shared();
        }

        let mut slot = lock(&inner.onboarding);
        if let Some(pending) = slot.as_ref() {
            log::debug!("onboarding already in flight");
            return pending.clone();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return future::ready(OnboardingResult::Failure("no async runtime".into()))
                .boxed()
                .shared();
        };

        let task_inner = inner.clone();
        let task = runtime.spawn(async move {
            let result = task_inner.onboard().await;
            lock(&task_inner.onboarding).take();
            result
        });
        let pending = async move {
            task.await
                .unwrap_or_else(|e| OnboardingResult::Failure(format!("onboarding task failed: {}", e)))
        }
        .boxed()
        .shared();

        *slot = Some(pending.clone());
        pending
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    /// Pay `request.amount` KIN through the cosigning backend.
    pub async fn send(&self, request: SendRequest) -> Result<TxId, WalletError> {
        let account = self.active_account();
        let payment = Payment {
            order_id: request.order_id,
            destination: request.destination,
            amount: request.amount,
            memo: request.memo,
        };

        let protocol = CosigningProtocol::new(self.inner.remote.as_ref(), &self.inner.config.app_id);
        match protocol.execute(&account, &payment).await {
            Ok(tx_id) => {
                log::info!(
                    "{} of {} KIN succeeded (order {}, tx {})",
                    request.kind,
                    payment.amount,
                    payment.order_id,
                    tx_id
                );
                self.inner.stats.record_spend(payment.amount);
                // Refresh failures are logged by refresh_balance.
                let _ = self.inner.refresh_balance().await;
                Ok(tx_id)
            }
            Err(e) => {
                log::error!(
                    "{} of {} KIN failed (order {}): {}",
                    request.kind,
                    payment.amount,
                    payment.order_id,
                    e
                );
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    // -------------------------------------------------------------------------
    // Keys and backup
    // -------------------------------------------------------------------------

    pub fn export_wallet(&self, passphrase: &str) -> Result<String, WalletError> {
        self.active_account().export(passphrase)
    }

    /// Import a backup into the legacy keystore and check whether it still
    /// needs migrating.
    ///
    /// A backup that fails to decrypt leaves the engine untouched.
    pub async fn import_wallet(&self, blob: &str, passphrase: &str) -> ImportWalletResult {
        let legacy = lock(&self.inner.migration).client(LedgerVersion::Legacy).clone();
        let client = legacy.clone();
        let blob = blob.to_string();
        let passphrase = passphrase.to_string();

        let imported =
            tokio::task::spawn_blocking(move || client.import_account(&blob, &passphrase)).await;
        let account = match imported {
            Ok(Ok(account)) => account,
            Ok(Err(e)) => {
                log::warn!("wallet import failed: {}", e);
                return ImportWalletResult::DecryptFailed(e);
            }
            Err(e) => return ImportWalletResult::DecryptFailed(WalletError::Other(e.to_string())),
        };

        log::info!("imported legacy account {}", account.public_address());
        *write(&self.inner.active) = ActivePair {
            client: legacy,
            account,
        };
        self.start_migration_if_needed().await
    }

    /// Onboarding-time migration check for a freshly imported legacy account:
    /// carry the key over to the current keystore and see whether the account
    /// already exists on the current ledger.
    async fn start_migration_if_needed(&self) -> ImportWalletResult {
        let legacy_account = self.active_account();
        let current = lock(&self.inner.migration).client(LedgerVersion::Current).clone();

        if let Err(e) = current.delete_keystore() {
            return ImportWalletResult::MigrationCheckFailed(e);
        }

        let transfer_client = current.clone();
        let transferred = tokio::task::spawn_blocking(move || {
            let exported = legacy_account.export("")?;
            transfer_client.import_account(&exported, "")
        })
        .await
        .unwrap_or_else(|e| Err(WalletError::Other(e.to_string())));

        let transient = match transferred {
            Ok(account) => account,
            Err(e) => {
                discard_transient(&current);
                return ImportWalletResult::MigrationCheckFailed(e);
            }
        };

        match transient.balance().await {
            Ok(balance) => {
                log::info!(
                    "imported account {} already lives on the current ledger",
                    transient.public_address()
                );
                *write(&self.inner.active) = ActivePair {
                    client: current,
                    account: transient,
                };
                self.inner.balance_updated(balance);
                ImportWalletResult::Success {
                    migration_needed: false,
                }
            }
            Err(WalletError::MissingAccount) => {
                discard_transient(&current);
                ImportWalletResult::Success {
                    migration_needed: true,
                }
            }
            Err(e) => {
                discard_transient(&current);
                ImportWalletResult::MigrationCheckFailed(e)
            }
        }
    }

    /// Delete every stored key and start over with a fresh account on the
    /// active ledger. Only call this once a backup is known to exist.
    pub fn reset_key_store(&self) -> Result<(), WalletError> {
        self.set_performed_backup(false)?;
        lock(&self.inner.migration).delete_keystores()?;

        let client = read(&self.inner.active).client.clone();
        let account = client.add_account()?;
        log::info!(
            "keystore reset; new {} account {}",
            client.version(),
            account.public_address()
        );
        write(&self.inner.active).account = account;
        Ok(())
    }

    pub fn performed_backup(&self) -> bool {
        self.inner.preferences.flag(keys::PERFORMED_BACKUP)
    }

    pub fn set_performed_backup(&self, performed: bool) -> Result<(), WalletError> {
        self.inner.preferences.save(keys::PERFORMED_BACKUP, &performed)
    }

    // -------------------------------------------------------------------------
    // Migration
    // -------------------------------------------------------------------------

    /// Start migrating the active account for the current user.
    ///
    /// After a finished run (`NotNeeded` or `Succeeded`) a legacy account, for
    /// instance one just imported, gets a fresh state machine.
    pub fn start_migration(&self) -> Result<(), WalletError> {
        let user_id = read(&self.inner.user).user_id.clone();
        let (address, version) = {
            let active = read(&self.inner.active);
            (active.account.public_address().to_string(), active.client.version())
        };

        let mut machine = lock(&self.inner.migration);
        if machine.state().is_terminal() && version == LedgerVersion::Legacy {
            log::debug!("starting a new migration run for {}", address);
            *machine = machine.renewed();
        }
        machine.start(user_id.as_deref(), &address)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Refresh the balance every time the app becomes active.
    ///
    /// The watcher holds only a weak reference and stops with the engine.
    pub fn watch_lifecycle(&self, mut events: broadcast::Receiver<LifecycleEvent>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("no async runtime; lifecycle events ignored");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::DidBecomeActive) => {
                        let Some(inner) = weak.upgrade() else { break };
                        let _ = inner.refresh_balance().await;
                    }
                    Ok(LifecycleEvent::WillResignActive) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("lifecycle watcher skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = lock(&self.inner.lifecycle).replace(handle) {
            previous.abort();
        }
    }
}

impl std::fmt::Debug for AccountEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountEngine")
            .field("address", &self.public_address())
            .field("version", &self.active_version())
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    fn public_address(&self) -> String {
        read(&self.active).account.public_address().to_string()
    }

    fn active_account(&self) -> Account {
        read(&self.active).account.clone()
    }

    async fn refresh_balance(&self) -> Result<Decimal, WalletError> {
        let account = self.active_account();
        match account.balance().await {
            Ok(balance) => {
                self.balance_updated(balance);
                Ok(balance.to_decimal())
            }
            Err(e) => {
                log::error!("error fetching balance: {}", e.report_description());
                Err(e)
            }
        }
    }

    fn balance_updated(&self, balance: Balance) {
        log::debug!("balance is now {} KIN", balance);
        self.balance.update(balance);
    }

    fn spawn_refresh(&self) {
        let Some(inner) = self.this.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _ = inner.refresh_balance().await;
                });
            }
            Err(_) => log::debug!("no async runtime; skipping balance refresh"),
        }
    }

    async fn onboard(&self) -> OnboardingResult {
        match self.refresh_balance().await {
            Ok(balance) => {
                log::info!("account already onboarded; balance is {} KIN", balance);
                self.remember_address();
                OnboardingResult::Success
            }
            Err(WalletError::MissingAccount) => {
                let address = self.public_address();
                match requests::create_account(&address)
                    .load(self.remote.as_ref())
                    .await
                {
                    Ok(_) => {
                        log::info!("onboarded account {}", address);
                        self.balance_updated(Balance::ZERO);
                        self.remember_address();
                        OnboardingResult::Success
                    }
                    Err(e) => {
                        log::error!("onboarding {} failed: {}", address, e);
                        OnboardingResult::Failure(e.to_string())
                    }
                }
            }
            Err(e) => OnboardingResult::Failure(e.report_description()),
        }
    }

    fn remember_address(&self) {
        let address = self.public_address();
        write(&self.user).public_address = Some(address);
    }
}

// Called by the migration state machine, possibly from its task. These must
// not lock `migration`: `start` holds it while calling `on_started`.
impl MigrationDelegate for EngineInner {
    fn needs_version(&self) -> LedgerVersion {
        self.config.target_version
    }

    fn on_started(&self) {
        let address = self.public_address();
        log::info!("migration started for {}", address);
        let _ = self.events.send(MigrationEvent::Started { address });
    }

    fn on_ready(&self, client: Client) {
        let account = match client.accounts() {
            Ok(mut accounts) => accounts.pop(),
            Err(e) => {
                log::error!("migrated keystore unreadable: {}", e);
                None
            }
        };
        let Some(account) = account else {
            let reason = format!("{} keystore holds no account", client.version());
            log::error!("{}", reason);
            let _ = self.events.send(MigrationEvent::Failed { reason });
            return;
        };

        let address = account.public_address().to_string();
        log::info!("{} account {} ready", client.version(), address);
        *write(&self.active) = ActivePair { client, account };
        let _ = self.events.send(MigrationEvent::Succeeded { address });
        self.spawn_refresh();
    }

    fn on_error(&self, error: &MigrationError) {
        log::error!("migration failed: {}", error);
        let _ = self.events.send(MigrationEvent::Failed {
            reason: error.to_string(),
        });
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let handle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

fn discard_transient(client: &Client) {
    match client.delete_keystore() {
        Ok(()) => log::info!("transient {} keystore deleted", client.version()),
        Err(e) => log::warn!("failed to delete transient keystore: {}", e),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
