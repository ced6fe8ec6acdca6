//! A single ledger account backed by a local keypair.

use crate::encryption::{self, KdfParams};
use crate::envelope::{Transaction, TransactionEnvelope};
use crate::error::WalletError;
use crate::keys::KeyPair;
use crate::ledger::{LedgerError, LedgerNetwork, TxId};
use kinit_types::{Balance, LedgerVersion, PublicAddress};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Portable export of one account: `{"pkey": <address>, "seed": <hex blob>}`,
/// where the blob is the passphrase-encrypted seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedAccount {
    pub pkey: String,
    pub seed: String,
}

impl ExportedAccount {
    pub fn parse(json: &str) -> Result<Self, WalletError> {
        serde_json::from_str(json).map_err(|e| WalletError::InvalidFile(e.to_string()))
    }

    /// Decrypt the seed and check it belongs to `pkey`.
    pub fn open(&self, passphrase: &str) -> Result<KeyPair, WalletError> {
        let blob = hex::decode(&self.seed).map_err(|e| WalletError::InvalidFile(format!("seed: {}", e)))?;
        let seed = encryption::decrypt(&blob, passphrase.as_bytes())?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| WalletError::InvalidFile("seed must be 32 bytes".into()))?;
        let keypair = KeyPair::from_seed(&seed);
        if keypair.address().as_str() != self.pkey {
            return Err(WalletError::InvalidFile(format!(
                "seed does not match address {}",
                self.pkey
            )));
        }
        Ok(keypair)
    }
}

#[derive(Clone)]
pub struct Account {
    version: LedgerVersion,
    network_passphrase: &'static str,
    keypair: Arc<KeyPair>,
    ledger: Arc<dyn LedgerNetwork>,
    kdf: KdfParams,
}

impl Account {
    pub(crate) fn new(
        version: LedgerVersion,
        network_passphrase: &'static str,
        keypair: KeyPair,
        ledger: Arc<dyn LedgerNetwork>,
        kdf: KdfParams,
    ) -> Self {
        Self {
            version,
            network_passphrase,
            keypair: Arc::new(keypair),
            ledger,
            kdf,
        }
    }

    pub fn public_address(&self) -> &str {
        self.keypair.address().as_str()
    }

    pub fn address(&self) -> &PublicAddress {
        self.keypair.address()
    }

    pub fn version(&self) -> LedgerVersion {
        self.version
    }

    pub(crate) fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Current ledger balance. A never-funded account is `MissingAccount`.
    pub async fn balance(&self) -> Result<Balance, WalletError> {
        self.ledger
            .account(self.public_address())
            .await
            .map(|info| info.balance)
            .map_err(map_lookup_error)
    }

    /// Export the account encrypted under `passphrase` (which may be empty).
    pub fn export(&self, passphrase: &str) -> Result<String, WalletError> {
        let blob = encryption::encrypt(&self.keypair.seed(), passphrase.as_bytes(), &self.kdf)?;
        let exported = ExportedAccount {
            pkey: self.public_address().to_string(),
            seed: hex::encode(blob),
        };
        serde_json::to_string(&exported).map_err(|e| WalletError::Encryption(e.to_string()))
    }

    /// Build a payment envelope signed by this account.
    pub async fn build_transaction(
        &self,
        destination: &str,
        amount: Balance,
        memo: Option<String>,
        fee: u32,
    ) -> Result<TransactionEnvelope, WalletError> {
        let destination = PublicAddress::parse(destination)?;
        let info = self
            .ledger
            .account(self.public_address())
            .await
            .map_err(map_lookup_error)?;

        let tx = Transaction {
            source: self.public_address().to_string(),
            destination: destination.to_string(),
            amount: amount.quarks(),
            fee,
            sequence: info.sequence + 1,
            memo,
        };
        let mut envelope = TransactionEnvelope::new(tx);
        envelope.sign(&self.keypair, self.network_passphrase)?;
        Ok(envelope)
    }

    pub async fn submit(&self, envelope: &TransactionEnvelope) -> Result<TxId, WalletError> {
        self.ledger
            .submit(envelope)
            .await
            .map_err(WalletError::Submission)
    }

    pub fn network_passphrase(&self) -> &'static str {
        self.network_passphrase
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("version", &self.version)
            .field("address", &self.public_address())
            .finish()
    }
}

fn map_lookup_error(e: LedgerError) -> WalletError {
    match e {
        LedgerError::MissingAccount(_) => WalletError::MissingAccount,
        other => WalletError::BalanceQueryFailed(other),
    }
}
