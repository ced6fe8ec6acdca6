//! Ledger boundary.
//!
//! The wallet talks to each ledger through [`LedgerNetwork`]: look up an
//! account (balance + sequence) and submit a signed envelope. [`GatewayLedger`]
//! is the production implementation over [`kinit_rpc::LedgerRpc`].

use crate::envelope::TransactionEnvelope;
use async_trait::async_trait;
use kinit_rpc::{LedgerRpc, RpcError};
use kinit_types::{Balance, LedgerVersion};
use thiserror::Error;

/// Ledger transaction hash, hex encoded.
pub type TxId = String;

/// Asset code the legacy ledger tracks KIN under.
pub const LEGACY_ASSET_CODE: &str = "KIN";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} does not exist on the ledger")]
    MissingAccount(String),

    #[error("ledger request failed: {0}")]
    Network(#[from] RpcError),

    #[error("ledger rejected the transaction: {0}")]
    Rejected(String),

    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

/// Ledger view of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub balance: Balance,
    pub sequence: u64,
}

#[async_trait]
pub trait LedgerNetwork: Send + Sync {
    /// Look up an account. A never-created account is `MissingAccount`.
    async fn account(&self, address: &str) -> Result<AccountInfo, LedgerError>;

    async fn submit(&self, envelope: &TransactionEnvelope) -> Result<TxId, LedgerError>;
}

/// Which balance line of an account holds KIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceAsset {
    Native,
    Issued { code: String },
}

/// [`LedgerNetwork`] over a ledger gateway.
pub struct GatewayLedger {
    rpc: LedgerRpc,
    asset: BalanceAsset,
}

impl GatewayLedger {
    pub fn new(rpc: LedgerRpc, asset: BalanceAsset) -> Self {
        Self { rpc, asset }
    }

    /// Gateway client configured for a ledger version: KIN is an issued asset
    /// on the legacy ledger and the native asset on the current one.
    pub fn for_version(version: LedgerVersion, url: &str) -> Result<Self, RpcError> {
        let asset = match version {
            LedgerVersion::Legacy => BalanceAsset::Issued {
                code: LEGACY_ASSET_CODE.to_string(),
            },
            LedgerVersion::Current => BalanceAsset::Native,
        };
        Ok(Self::new(LedgerRpc::new(url)?, asset))
    }

    pub fn url(&self) -> &str {
        self.rpc.url()
    }
}

#[async_trait]
impl LedgerNetwork for GatewayLedger {
    async fn account(&self, address: &str) -> Result<AccountInfo, LedgerError> {
        let account = self.rpc.account(address).await.map_err(|e| {
            if e.is_not_found() {
                LedgerError::MissingAccount(address.to_string())
            } else {
                LedgerError::Network(e)
            }
        })?;

        let line = match &self.asset {
            BalanceAsset::Native => account.native_balance(),
            BalanceAsset::Issued { code } => account.asset_balance(code),
        };
        let balance = match line {
            Some(s) => Balance::parse(s).map_err(|e| LedgerError::Malformed(format!("balance {:?}: {}", s, e)))?,
            // An account without the KIN line holds no KIN.
            None => Balance::ZERO,
        };

        Ok(AccountInfo {
            balance,
            sequence: account.sequence_number(),
        })
    }

    async fn submit(&self, envelope: &TransactionEnvelope) -> Result<TxId, LedgerError> {
        let encoded = envelope
            .to_base64()
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        match self.rpc.submit(&encoded).await {
            Ok(resp) => {
                log::debug!("submitted {} (ledger {:?})", resp.hash, resp.ledger);
                Ok(resp.hash)
            }
            Err(RpcError::HttpStatus { status, body, .. }) if status == 400 => {
                Err(LedgerError::Rejected(body))
            }
            Err(e) => Err(LedgerError::Network(e)),
        }
    }
}
