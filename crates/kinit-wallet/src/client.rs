//! Per-ledger keystore client.
//!
//! A [`Client`] owns the keystore for one ledger version and hands out
//! [`Account`]s bound to that ledger. The keystore is a list of seeds under
//! [`keys::keystore`], oldest first.

use crate::account::{Account, ExportedAccount};
use crate::encryption::KdfParams;
use crate::error::WalletError;
use crate::keys::KeyPair;
use crate::ledger::LedgerNetwork;
use crate::store::{KeyValueStore, StoreExt};
use kinit_types::{keys, LedgerVersion, Network};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKey {
    address: String,
    seed: String,
}

#[derive(Clone)]
pub struct Client {
    version: LedgerVersion,
    network: Network,
    keychain: Arc<dyn KeyValueStore>,
    ledger: Arc<dyn LedgerNetwork>,
    kdf: KdfParams,
}

impl Client {
    pub fn new(
        version: LedgerVersion,
        network: Network,
        keychain: Arc<dyn KeyValueStore>,
        ledger: Arc<dyn LedgerNetwork>,
        kdf: KdfParams,
    ) -> Self {
        Self {
            version,
            network,
            keychain,
            ledger,
            kdf,
        }
    }

    pub fn version(&self) -> LedgerVersion {
        self.version
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Accounts in the keystore, oldest first.
    pub fn accounts(&self) -> Result<Vec<Account>, WalletError> {
        self.load_keys()?
            .iter()
            .map(|k| KeyPair::from_seed_hex(&k.seed).map(|kp| self.account(kp)))
            .collect()
    }

    /// Generate a fresh keypair and append it to the keystore.
    pub fn add_account(&self) -> Result<Account, WalletError> {
        let keypair = KeyPair::generate();
        self.store_key(&keypair)?;
        log::info!("{} keystore: added account {}", self.version, keypair.address());
        Ok(self.account(keypair))
    }

    /// Import an exported account. Importing an address the keystore already
    /// holds returns the existing account.
    pub fn import_account(&self, exported: &str, passphrase: &str) -> Result<Account, WalletError> {
        let exported = ExportedAccount::parse(exported)?;
        let keypair = exported.open(passphrase)?;

        if self
            .load_keys()?
            .iter()
            .any(|k| k.address == keypair.address().as_str())
        {
            log::debug!("{} keystore already holds {}", self.version, keypair.address());
            return Ok(self.account(keypair));
        }

        self.store_key(&keypair)?;
        log::info!("{} keystore: imported account {}", self.version, keypair.address());
        Ok(self.account(keypair))
    }

    /// Remove every key of this ledger version.
    pub fn delete_keystore(&self) -> Result<(), WalletError> {
        self.keychain.remove(&keys::keystore(self.version))?;
        log::info!("{} keystore deleted", self.version);
        Ok(())
    }

    fn account(&self, keypair: KeyPair) -> Account {
        Account::new(
            self.version,
            self.version.network_passphrase(self.network),
            keypair,
            self.ledger.clone(),
            self.kdf,
        )
    }

    fn load_keys(&self) -> Result<Vec<StoredKey>, WalletError> {
        Ok(self
            .keychain
            .load::<Vec<StoredKey>>(&keys::keystore(self.version))?
            .unwrap_or_default())
    }

    fn store_key(&self, keypair: &KeyPair) -> Result<(), WalletError> {
        let mut stored = self.load_keys()?;
        stored.push(StoredKey {
            address: keypair.address().to_string(),
            seed: hex::encode(keypair.seed()),
        });
        self.keychain.save(&keys::keystore(self.version), &stored)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("version", &self.version)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testkit::MemoryLedger;
    use kinit_types::Balance;

    fn client(version: LedgerVersion, keychain: Arc<dyn KeyValueStore>, ledger: Arc<MemoryLedger>) -> Client {
        Client::new(version, Network::Testnet, keychain, ledger, KdfParams::light())
    }

    #[test]
    fn test_accounts_oldest_first() {
        let keychain: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let c = client(LedgerVersion::Current, keychain, Arc::new(MemoryLedger::new()));
        assert!(c.accounts().unwrap().is_empty());

        let first = c.add_account().unwrap();
        let second = c.add_account().unwrap();
        let addresses: Vec<String> = c.accounts().unwrap().iter().map(|a| a.public_address().to_string()).collect();
        assert_eq!(addresses, vec![first.public_address(), second.public_address()]);
    }

    #[test]
    fn test_keystores_are_per_version() {
        let keychain: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let legacy = client(LedgerVersion::Legacy, keychain.clone(), ledger.clone());
        let current = client(LedgerVersion::Current, keychain, ledger);

        legacy.add_account().unwrap();
        assert!(current.accounts().unwrap().is_empty());

        legacy.delete_keystore().unwrap();
        assert!(legacy.accounts().unwrap().is_empty());
    }

    #[test]
    fn test_export_import_across_versions() {
        let keychain: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let legacy = client(LedgerVersion::Legacy, keychain.clone(), ledger.clone());
        let current = client(LedgerVersion::Current, keychain, ledger);

        let account = legacy.add_account().unwrap();
        let exported = account.export("").unwrap();
        let imported = current.import_account(&exported, "").unwrap();

        assert_eq!(imported.public_address(), account.public_address());
        assert_eq!(imported.version(), LedgerVersion::Current);
        assert_eq!(current.accounts().unwrap().len(), 1);

        // Re-import does not duplicate.
        current.import_account(&exported, "").unwrap();
        assert_eq!(current.accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_import_errors() {
        let keychain: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let c = client(LedgerVersion::Legacy, keychain, Arc::new(MemoryLedger::new()));
        let exported = c.add_account().unwrap().export("pass").unwrap();
        c.delete_keystore().unwrap();

        assert!(matches!(c.import_account(&exported, "nope"), Err(WalletError::DecryptionFailed)));
        assert!(matches!(c.import_account("not json", "pass"), Err(WalletError::InvalidFile(_))));

        let mut tampered = ExportedAccount::parse(&exported).unwrap();
        tampered.pkey = KeyPair::generate().address().to_string();
        let tampered = serde_json::to_string(&tampered).unwrap();
        assert!(matches!(c.import_account(&tampered, "pass"), Err(WalletError::InvalidFile(_))));

        assert!(c.accounts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_account_balance_and_missing() {
        let keychain: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let c = client(LedgerVersion::Current, keychain, ledger.clone());
        let account = c.add_account().unwrap();

        assert!(matches!(account.balance().await, Err(WalletError::MissingAccount)));

        ledger.fund(account.public_address(), Balance::from_quarks(1_000_000));
        assert_eq!(account.balance().await.unwrap(), Balance::from_quarks(1_000_000));

        ledger.fail_lookups(Some("gateway down"));
        assert!(matches!(account.balance().await, Err(WalletError::BalanceQueryFailed(_))));
    }

    #[tokio::test]
    async fn test_build_transaction_uses_next_sequence() {
        let keychain: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let c = client(LedgerVersion::Current, keychain, ledger.clone());
        let account = c.add_account().unwrap();
        ledger.fund(account.public_address(), Balance::from_kin(50).unwrap());

        let dest = KeyPair::generate();
        let env = account
            .build_transaction(dest.address().as_str(), Balance::from_kin(5).unwrap(), Some("1-kit-x".into()), 0)
            .await
            .unwrap();
        assert_eq!(env.tx.sequence, 1);
        assert_eq!(env.tx.amount, 500_000);
        assert!(env.is_signed_by(&account.keypair().public_key(), account.network_passphrase()));

        let err = account
            .build_transaction("GBAD", Balance::from_kin(1).unwrap(), None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAddress(_)));
    }
}
