//! Network constants, ledger versions, and persisted-state key names.

use serde::{Deserialize, Serialize};

// =============================================================================
// Network Types
// =============================================================================

/// Network type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger generation an account lives on.
///
/// `Legacy` is the pre-migration ledger (Kin 2), `Current` the ledger accounts
/// migrate to (Kin 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerVersion {
    Legacy,
    Current,
}

impl LedgerVersion {
    /// Both versions, in migration order.
    pub const ALL: [LedgerVersion; 2] = [LedgerVersion::Legacy, LedgerVersion::Current];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerVersion::Legacy => "kin2",
            LedgerVersion::Current => "kin3",
        }
    }

    /// Passphrase mixed into every transaction hash on this ledger.
    pub fn network_passphrase(&self, network: Network) -> &'static str {
        match (self, network) {
            (LedgerVersion::Legacy, Network::Mainnet) => LEGACY_MAINNET_PASSPHRASE,
            (LedgerVersion::Legacy, Network::Testnet) => LEGACY_TESTNET_PASSPHRASE,
            (LedgerVersion::Current, Network::Mainnet) => CURRENT_MAINNET_PASSPHRASE,
            (LedgerVersion::Current, Network::Testnet) => CURRENT_TESTNET_PASSPHRASE,
        }
    }

    /// Default ledger gateway URL.
    pub fn default_ledger_url(&self, network: Network) -> &'static str {
        match (self, network) {
            (LedgerVersion::Legacy, Network::Mainnet) => {
                "https://horizon-ecosystem.kininfrastructure.com"
            }
            (LedgerVersion::Legacy, Network::Testnet) => {
                "https://horizon-playground.kininfrastructure.com"
            }
            (LedgerVersion::Current, Network::Mainnet) => "https://horizon.kinfederation.com",
            (LedgerVersion::Current, Network::Testnet) => {
                "https://horizon-testnet.kininfrastructure.com"
            }
        }
    }
}

impl std::fmt::Display for LedgerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const LEGACY_MAINNET_PASSPHRASE: &str = "Public Global Kin Ecosystem Network ; June 2018";
pub const LEGACY_TESTNET_PASSPHRASE: &str = "Kin Playground Network ; June 2018";
pub const CURRENT_MAINNET_PASSPHRASE: &str = "Kin Mainnet ; December 2018";
pub const CURRENT_TESTNET_PASSPHRASE: &str = "Kin Testnet ; December 2018";

// =============================================================================
// Amounts
// =============================================================================

/// Number of fractional digits in a KIN amount.
pub const DECIMALS: u32 = 5;

/// Smallest units (quarks) per whole KIN.
pub const QUARKS_PER_KIN: u64 = 100_000;

// =============================================================================
// Application
// =============================================================================

/// Application identifier embedded in transaction memos.
pub const DEFAULT_APP_ID: &str = "kit";

/// Memo protocol version prefix.
pub const MEMO_VERSION: u8 = 1;

/// Maximum memo length in bytes accepted by the ledger.
pub const MAX_MEMO_LEN: usize = 28;

// =============================================================================
// Persisted State Keys
// =============================================================================

/// Stable key names in the persistent key-value store.
///
/// All slots are optional on first run; absence is not an error.
pub mod keys {
    /// Last known balance, integer count of quarks.
    pub const BALANCE: &str = "org.kinfoundation.kinwallet.currentBalance";
    /// Whether the user confirmed an external backup.
    pub const PERFORMED_BACKUP: &str = "org.kinfoundation.kinwallet.performedBackup";
    /// Cached list of available backup hints.
    pub const AVAILABLE_BACKUP_LIST: &str = "Kinit-AvailableBackupList";
    /// Addresses this device has seen migrate successfully.
    pub const MIGRATED_ADDRESSES: &str = "kinit.migration.migrated";

    /// Keychain slot holding the stored seeds for one ledger version.
    pub fn keystore(version: super::LedgerVersion) -> String {
        format!("kinit.keystore.{}", version.as_str())
    }
}
