//! Legacy-to-current ledger migration.
//!
//! [`MigrationStateMachine`] decides whether the user's legacy account must
//! move to the current ledger and drives the move:
//!
//! ```text
//! NotEvaluated ──> NotNeeded
//!      │
//!      └──> InProgress ──> Succeeded
//!               ▲   │
//!               │   └──> Failed
//!               └────────┘   (explicit restart only)
//! ```
//!
//! The backend performs the move; the wallet then carries the key over to the
//! current keystore and waits for the account to show up on the current
//! ledger. Results reach the owner through [`MigrationDelegate`]. `on_ready`
//! and `on_error` run on the migration task.

use crate::client::Client;
use crate::error::WalletError;
use crate::ledger::LedgerError;
use crate::store::{KeyValueStore, StoreExt};
use crate::account::Account;
use kinit_rpc::error::REASON_ALREADY_MIGRATED;
use kinit_rpc::requests::{self, MigrationQuery};
use kinit_rpc::{RemoteService, RpcError};
use kinit_types::{keys, LedgerVersion};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationState {
    NotEvaluated,
    NotNeeded,
    InProgress,
    Succeeded,
    Failed(String),
}

impl MigrationState {
    pub fn can_transition_to(&self, next: &MigrationState) -> bool {
        use MigrationState::*;
        matches!(
            (self, next),
            (NotEvaluated, NotNeeded)
                | (NotEvaluated, InProgress)
                | (InProgress, Succeeded)
                | (InProgress, Failed(_))
                | (Failed(_), InProgress)
        )
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::NotNeeded | MigrationState::Succeeded)
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration service error: {0}")]
    Remote(#[from] RpcError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("migrated account did not appear after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("no legacy account {0} to migrate")]
    NoAccount(String),

    #[error("invalid migration transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: MigrationState,
        to: MigrationState,
    },

    #[error("key transfer task failed: {0}")]
    KeyTransfer(String),

    #[error("no async runtime to run the migration on")]
    NoRuntime,

    #[error("{0}")]
    Wallet(#[source] Box<WalletError>),
}

impl From<WalletError> for MigrationError {
    fn from(e: WalletError) -> Self {
        MigrationError::Wallet(Box::new(e))
    }
}

/// Owner of a migration: picks the target ledger and receives the outcome.
///
/// Implementations must not call back into the state machine from these
/// methods; `on_started` (and `on_ready` when no migration is needed) run
/// while the caller of [`MigrationStateMachine::start`] is still inside it.
pub trait MigrationDelegate: Send + Sync {
    /// Ledger version the app wants to end up on.
    fn needs_version(&self) -> LedgerVersion;
    fn on_started(&self);
    /// `client` is the client whose keystore now holds the active account.
    fn on_ready(&self, client: Client);
    fn on_error(&self, error: &MigrationError);
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Wait between checks for the migrated account on the current ledger.
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            poll_attempts: 30,
        }
    }
}

/// Result of evaluating whether a migration is required.
#[derive(Debug)]
pub enum Evaluation {
    /// The legacy account must be migrated.
    Required(Account),
    NotNeeded,
}

pub struct MigrationStateMachine {
    query: MigrationQuery,
    legacy: Client,
    current: Client,
    remote: Arc<dyn RemoteService>,
    store: Arc<dyn KeyValueStore>,
    config: MigrationConfig,
    state: Arc<Mutex<MigrationState>>,
    delegate: Option<Weak<dyn MigrationDelegate>>,
    task: Option<JoinHandle<()>>,
}

impl MigrationStateMachine {
    pub fn new(
        user_id: Option<String>,
        legacy: Client,
        current: Client,
        remote: Arc<dyn RemoteService>,
        store: Arc<dyn KeyValueStore>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            query: MigrationQuery::new(user_id),
            legacy,
            current,
            remote,
            store,
            config,
            state: Arc::new(Mutex::new(MigrationState::NotEvaluated)),
            delegate: None,
            task: None,
        }
    }

    /// A fresh machine over the same clients and delegate, back at
    /// `NotEvaluated`.
    pub fn renewed(&self) -> Self {
        Self {
            query: self.query.clone(),
            legacy: self.legacy.clone(),
            current: self.current.clone(),
            remote: self.remote.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            state: Arc::new(Mutex::new(MigrationState::NotEvaluated)),
            delegate: self.delegate.clone(),
            task: None,
        }
    }

    pub fn set_delegate(&mut self, delegate: Weak<dyn MigrationDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn state(&self) -> MigrationState {
        lock(&self.state).clone()
    }

    pub fn query(&self) -> &MigrationQuery {
        &self.query
    }

    pub fn client(&self, version: LedgerVersion) -> &Client {
        match version {
            LedgerVersion::Legacy => &self.legacy,
            LedgerVersion::Current => &self.current,
        }
    }

    /// Delete the keystores of both ledger versions.
    pub fn delete_keystores(&self) -> Result<(), WalletError> {
        self.legacy.delete_keystore()?;
        self.current.delete_keystore()
    }

    /// Whether `address` has been migrated, by local record first and the
    /// backend second.
    pub async fn is_account_migrated(&self, address: &str) -> Result<bool, RpcError> {
        if is_recorded_migrated(self.store.as_ref(), address) {
            return Ok(true);
        }
        requests::migration_status(address, &self.query)
            .load(self.remote.as_ref())
            .await
    }

    /// Decide whether the legacy account needs migrating.
    ///
    /// Without an identity there is nothing to migrate. When the backend
    /// cannot be asked, migration is assumed to be required.
    pub async fn evaluate(&self, has_identity: bool) -> Result<Evaluation, WalletError> {
        if !has_identity {
            log::debug!("no verified identity; migration not needed");
            self.transition(MigrationState::NotNeeded)?;
            return Ok(Evaluation::NotNeeded);
        }

        let Some(account) = self.legacy.accounts()?.pop() else {
            log::debug!("no legacy account; migration not needed");
            self.transition(MigrationState::NotNeeded)?;
            return Ok(Evaluation::NotNeeded);
        };

        match self.is_account_migrated(account.public_address()).await {
            Ok(true) => {
                log::info!("{} already migrated", account.public_address());
                self.transition(MigrationState::NotNeeded)?;
                Ok(Evaluation::NotNeeded)
            }
            Ok(false) => Ok(Evaluation::Required(account)),
            Err(e) => {
                log::warn!(
                    "migration status of {} unknown ({}); assuming migration is required",
                    account.public_address(),
                    e
                );
                Ok(Evaluation::Required(account))
            }
        }
    }

    /// Start migrating `address`.
    ///
    /// If the delegate wants the legacy ledger the machine settles on
    /// `NotNeeded` and hands back the legacy client. Otherwise it enters
    /// `InProgress`, calls `on_started`, and runs the migration on a tokio
    /// task. A changed `user_id` rebuilds the request query first.
    pub fn start(&mut self, user_id: Option<&str>, address: &str) -> Result<(), MigrationError> {
        if self.query.user_id.as_deref() != user_id {
            log::debug!("migration query rebuilt for user {:?}", user_id);
            self.query = MigrationQuery::new(user_id.map(str::to_string));
        }

        let delegate = self.delegate.as_ref().and_then(Weak::upgrade);
        if let Some(d) = &delegate {
            if d.needs_version() == LedgerVersion::Legacy {
                self.transition(MigrationState::NotNeeded)?;
                log::info!("legacy ledger requested; skipping migration of {}", address);
                d.on_ready(self.legacy.clone());
                return Ok(());
            }
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MigrationError::NoRuntime)?;
        self.transition(MigrationState::InProgress)?;
        log::info!("migrating {} to the current ledger", address);
        if let Some(d) = &delegate {
            d.on_started();
        }

        let task = MigrationTask {
            address: address.to_string(),
            query: self.query.clone(),
            legacy: self.legacy.clone(),
            current: self.current.clone(),
            remote: self.remote.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            delegate: self.delegate.clone(),
        };
        self.task = Some(runtime.spawn(task.run()));
        Ok(())
    }

    /// Wait for a running migration task to finish.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("migration task failed: {}", e);
            }
        }
    }

    fn transition(&self, next: MigrationState) -> Result<(), MigrationError> {
        transition(&self.state, next)
    }
}

impl std::fmt::Debug for MigrationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStateMachine")
            .field("state", &self.state())
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

struct MigrationTask {
    address: String,
    query: MigrationQuery,
    legacy: Client,
    current: Client,
    remote: Arc<dyn RemoteService>,
    store: Arc<dyn KeyValueStore>,
    config: MigrationConfig,
    state: Arc<Mutex<MigrationState>>,
    delegate: Option<Weak<dyn MigrationDelegate>>,
}

impl MigrationTask {
    async fn run(self) {
        let result = self.migrate().await;
        let delegate = self.delegate.as_ref().and_then(Weak::upgrade);

        match result {
            Ok(client) => {
                if let Err(e) = transition(&self.state, MigrationState::Succeeded) {
                    log::error!("{}", e);
                }
                log::info!("migration of {} succeeded", self.address);
                if let Some(d) = delegate {
                    d.on_ready(client);
                }
            }
            Err(e) => {
                if let Err(te) = transition(&self.state, MigrationState::Failed(e.to_string())) {
                    log::error!("{}", te);
                }
                log::error!("migration of {} failed: {}", self.address, e);
                if let Some(d) = delegate {
                    d.on_error(&e);
                }
            }
        }
    }

    async fn migrate(&self) -> Result<Client, MigrationError> {
        match requests::migrate(&self.address, &self.query)
            .load(self.remote.as_ref())
            .await
        {
            Ok(_) => log::debug!("backend migrated {}", self.address),
            Err(e) if e.rejection_reason() == Some(REASON_ALREADY_MIGRATED) => {
                log::info!("{} was already migrated", self.address)
            }
            Err(e) => return Err(e.into()),
        }

        let imported = self.carry_key_over().await?;
        if let Err(e) = self.wait_for_account().await {
            if imported {
                if let Err(de) = self.current.delete_keystore() {
                    log::warn!("failed to discard migrated keystore: {}", de);
                }
            }
            return Err(e);
        }

        record_migrated(self.store.as_ref(), &self.address);
        Ok(self.current.clone())
    }

    /// Copy the legacy key into the current keystore. Returns whether a key
    /// was added. Key derivation runs on the blocking pool.
    async fn carry_key_over(&self) -> Result<bool, MigrationError> {
        let legacy = self.legacy.clone();
        let current = self.current.clone();
        let address = self.address.clone();

        tokio::task::spawn_blocking(move || transfer_key(&legacy, &current, &address))
            .await
            .map_err(|e| MigrationError::KeyTransfer(e.to_string()))?
    }

    async fn wait_for_account(&self) -> Result<(), MigrationError> {
        let account = self
            .current
            .accounts()?
            .into_iter()
            .find(|a| a.public_address() == self.address)
            .ok_or_else(|| MigrationError::NoAccount(self.address.clone()))?;

        for attempt in 1..=self.config.poll_attempts {
            match account.balance().await {
                Ok(balance) => {
                    log::debug!("{} live on the current ledger with {} KIN", self.address, balance);
                    return Ok(());
                }
                Err(WalletError::MissingAccount) => {
                    log::debug!(
                        "{} not yet on the current ledger (attempt {}/{})",
                        self.address,
                        attempt,
                        self.config.poll_attempts
                    );
                }
                Err(e) => return Err(e.into()),
            }
            if attempt < self.config.poll_attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
        Err(MigrationError::Timeout {
            attempts: self.config.poll_attempts,
        })
    }
}

fn transfer_key(legacy: &Client, current: &Client, address: &str) -> Result<bool, MigrationError> {
    if current.accounts()?.iter().any(|a| a.public_address() == address) {
        return Ok(false);
    }

    let legacy_account = legacy
        .accounts()?
        .into_iter()
        .find(|a| a.public_address() == address)
        .ok_or_else(|| MigrationError::NoAccount(address.to_string()))?;
    let exported = legacy_account.export("")?;
    current.import_account(&exported, "")?;
    Ok(true)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn transition(state: &Mutex<MigrationState>, next: MigrationState) -> Result<(), MigrationError> {
    let mut current = lock(state);
    if !current.can_transition_to(&next) {
        return Err(MigrationError::InvalidTransition {
            from: current.clone(),
            to: next,
        });
    }
    log::debug!("migration state {:?} -> {:?}", *current, next);
    *current = next;
    Ok(())
}

fn is_recorded_migrated(store: &dyn KeyValueStore, address: &str) -> bool {
    match store.load::<Vec<String>>(keys::MIGRATED_ADDRESSES) {
        Ok(Some(list)) => list.iter().any(|a| a == address),
        Ok(None) => false,
        Err(e) => {
            log::warn!("migrated address list unreadable: {}", e);
            false
        }
    }
}

fn record_migrated(store: &dyn KeyValueStore, address: &str) {
    let mut list = store
        .load::<Vec<String>>(keys::MIGRATED_ADDRESSES)
        .ok()
        .flatten()
        .unwrap_or_default();
    if list.iter().any(|a| a == address) {
        return;
    }
    list.push(address.to_string());
    if let Err(e) = store.save(keys::MIGRATED_ADDRESSES, &list) {
        log::warn!("failed to record migration of {}: {}", address, e);
    }
}
