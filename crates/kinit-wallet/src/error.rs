//! Wallet error types.

use crate::ledger::LedgerError;
use crate::migration::MigrationError;
use kinit_rpc::RpcError;
use kinit_types::{AddressError, AmountError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption failed (wrong passphrase or corrupted data)")]
    DecryptionFailed,

    #[error("invalid wallet file: {0}")]
    InvalidFile(String),

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("invalid memo: {0}")]
    InvalidMemo(String),

    #[error("account does not exist on the ledger")]
    MissingAccount,

    #[error("balance query failed: {0}")]
    BalanceQueryFailed(#[source] LedgerError),

    #[error("transaction encoding failed: {0}")]
    EncodingFailed(String),

    #[error("transaction decoding failed: {0}")]
    DecodingFailed(String),

    #[error("cosigner rejected the transaction: {reason}")]
    RemoteRejected { reason: String },

    #[error("cosigned transaction does not match the payment: {0}")]
    CosignMismatch(String),

    #[error("transaction submission failed: {0}")]
    Submission(#[source] LedgerError),

    #[error("no account in keystore")]
    NoAccount,

    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("{0}")]
    Other(String),
}

impl WalletError {
    /// Description suitable for showing to a user.
    ///
    /// Balance failures are unwrapped to the underlying ledger or network
    /// fault; the full error stays available through `Display`/`source`.
    pub fn report_description(&self) -> String {
        match self {
            WalletError::BalanceQueryFailed(inner) => inner.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_missing_account(&self) -> bool {
        matches!(self, WalletError::MissingAccount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_description_unwraps_balance_failure() {
        let err = WalletError::BalanceQueryFailed(LedgerError::Malformed("bad balance".into()));
        assert_eq!(err.to_string(), "balance query failed: malformed ledger response: bad balance");
        assert_eq!(err.report_description(), "malformed ledger response: bad balance");
    }

    #[test]
    fn test_report_description_passthrough() {
        let err = WalletError::RemoteRejected { reason: "duplicate order".into() };
        assert_eq!(err.report_description(), err.to_string());
        assert!(!err.is_missing_account());
        assert!(WalletError::MissingAccount.is_missing_account());
    }
}
