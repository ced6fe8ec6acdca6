//! In-memory doubles for the ledger and the backend.
//!
//! Built for unit tests and with the `testkit` feature, which the integration
//! tests enable. Handy for demos that should run without a network.

use crate::envelope::TransactionEnvelope;
use crate::keys::KeyPair;
use crate::ledger::{AccountInfo, LedgerError, LedgerNetwork, TxId};
use async_trait::async_trait;
use kinit_rpc::{RawRequest, RemoteService, RpcError};
use kinit_types::Balance;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, AccountInfo>,
    lookup_failure: Option<String>,
    submit_failure: Option<String>,
    submissions: Vec<TransactionEnvelope>,
    latency: Duration,
    required_signatures: usize,
}

/// A ledger held in memory. Submissions move funds and bump sequences.
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    lookups: AtomicUsize,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                required_signatures: 1,
                ..Default::default()
            }),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Create the account if needed and set its balance.
    pub fn fund(&self, address: &str, balance: Balance) {
        let mut state = lock(&self.state);
        let entry = state.accounts.entry(address.to_string()).or_insert(AccountInfo {
            balance: Balance::ZERO,
            sequence: 0,
        });
        entry.balance = balance;
    }

    pub fn remove(&self, address: &str) {
        lock(&self.state).accounts.remove(address);
    }

    pub fn exists(&self, address: &str) -> bool {
        lock(&self.state).accounts.contains_key(address)
    }

    pub fn balance_of(&self, address: &str) -> Option<Balance> {
        lock(&self.state).accounts.get(address).map(|a| a.balance)
    }

    /// Make every lookup fail with a network error (`None` restores).
    pub fn fail_lookups(&self, reason: Option<&str>) {
        lock(&self.state).lookup_failure = reason.map(str::to_string);
    }

    /// Make every submission get rejected (`None` restores).
    pub fn fail_submissions(&self, reason: Option<&str>) {
        lock(&self.state).submit_failure = reason.map(str::to_string);
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Number of signatures a submission needs to be accepted.
    pub fn require_signatures(&self, count: usize) {
        lock(&self.state).required_signatures = count;
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<TransactionEnvelope> {
        lock(&self.state).submissions.clone()
    }

    fn latency(&self) -> Duration {
        lock(&self.state).latency
    }
}

#[async_trait]
impl LedgerNetwork for MemoryLedger {
    async fn account(&self, address: &str) -> Result<AccountInfo, LedgerError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = lock(&self.state);
        if let Some(reason) = &state.lookup_failure {
            return Err(LedgerError::Network(RpcError::Other(reason.clone())));
        }
        state
            .accounts
            .get(address)
            .copied()
            .ok_or_else(|| LedgerError::MissingAccount(address.to_string()))
    }

    async fn submit(&self, envelope: &TransactionEnvelope) -> Result<TxId, LedgerError> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = lock(&self.state);
        if let Some(reason) = &state.submit_failure {
            return Err(LedgerError::Rejected(reason.clone()));
        }
        if envelope.signatures.len() < state.required_signatures {
            return Err(LedgerError::Rejected("tx_bad_auth".into()));
        }

        let tx = &envelope.tx;
        let source = state
            .accounts
            .get(&tx.source)
            .copied()
            .ok_or_else(|| LedgerError::Rejected("tx_no_source_account".into()))?;
        if tx.sequence != source.sequence + 1 {
            return Err(LedgerError::Rejected("tx_bad_seq".into()));
        }
        let debit = tx.amount + u64::from(tx.fee);
        let Some(remaining) = source.balance.quarks().checked_sub(debit) else {
            return Err(LedgerError::Rejected("op_underfunded".into()));
        };

        state.accounts.insert(
            tx.source.clone(),
            AccountInfo {
                balance: Balance::from_quarks(remaining),
                sequence: tx.sequence,
            },
        );
        let dest = state.accounts.entry(tx.destination.clone()).or_insert(AccountInfo {
            balance: Balance::ZERO,
            sequence: 0,
        });
        dest.balance = Balance::from_quarks(dest.balance.quarks() + tx.amount);
        state.submissions.push(envelope.clone());

        let body = serde_json::to_vec(tx).map_err(|e| LedgerError::Malformed(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(body)))
    }
}

// =============================================================================
// Backend
// =============================================================================

type Handler = Arc<dyn Fn(&RawRequest) -> Result<Value, RpcError> + Send + Sync>;

/// A backend answering each path with a scripted handler. Unscripted paths
/// answer `NotFound`.
#[derive(Default)]
pub struct MockRemote {
    handlers: Mutex<HashMap<String, Handler>>,
    requests: Mutex<Vec<RawRequest>>,
    latency: Mutex<Duration>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, path: &str, handler: F)
    where
        F: Fn(&RawRequest) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        lock(&self.handlers).insert(path.to_string(), Arc::new(handler));
    }

    /// Always answer `path` with `body`.
    pub fn respond(&self, path: &str, body: Value) {
        self.on(path, move |_| Ok(body.clone()));
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn calls(&self, path: &str) -> usize {
        lock(&self.requests).iter().filter(|r| r.path == path).count()
    }

    pub fn requests(&self) -> Vec<RawRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn execute(&self, request: &RawRequest) -> Result<Value, RpcError> {
        lock(&self.requests).push(request.clone());
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let handler = lock(&self.handlers).get(&request.path).cloned();
        match handler {
            Some(h) => h(request),
            None => Err(RpcError::NotFound {
                url: request.path.clone(),
            }),
        }
    }
}

/// A cosigning backend: decodes the submitted envelope, adds its own
/// signature, and hands it back.
pub struct Cosigner {
    keypair: KeyPair,
    network_passphrase: String,
}

impl Cosigner {
    pub fn new(network_passphrase: &str) -> Self {
        Self {
            keypair: KeyPair::generate(),
            network_passphrase: network_passphrase.to_string(),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    /// Answer the signing endpoint on `remote`.
    pub fn install(self, remote: &MockRemote) {
        remote.on("/user/transaction/sign", move |req| self.cosign(req));
    }

    fn cosign(&self, req: &RawRequest) -> Result<Value, RpcError> {
        let encoded = req
            .body
            .as_ref()
            .and_then(|b| b["transaction"].as_str())
            .ok_or_else(|| RpcError::Other("missing transaction".into()))?;
        let mut envelope =
            TransactionEnvelope::from_base64(encoded).map_err(|e| RpcError::Other(e.to_string()))?;
        envelope
            .sign(&self.keypair, &self.network_passphrase)
            .map_err(|e| RpcError::Other(e.to_string()))?;
        let tx = envelope.to_base64().map_err(|e| RpcError::Other(e.to_string()))?;
        Ok(json!({ "status": "ok", "tx": tx }))
    }
}
