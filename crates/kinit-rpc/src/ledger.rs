//! Ledger gateway client.
//!
//! Typed async access to the two gateway endpoints the wallet needs: account
//! lookup (`GET /accounts/{address}`) and transaction submission
//! (`POST /transactions`). One client per ledger version.

use crate::error::RpcError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

// =============================================================================
// Response Types
// =============================================================================

/// Gateway `/accounts/{address}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerAccount {
    pub id: String,
    #[serde(default)]
    pub sequence: String,
    #[serde(default)]
    pub balances: Vec<LedgerBalance>,
}

/// One balance line of an account.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerBalance {
    pub balance: String,
    pub asset_type: String,
    #[serde(default)]
    pub asset_code: Option<String>,
    #[serde(default)]
    pub asset_issuer: Option<String>,
}

impl LedgerAccount {
    /// Balance of the native asset.
    pub fn native_balance(&self) -> Option<&str> {
        self.balances
            .iter()
            .find(|b| b.asset_type == "native")
            .map(|b| b.balance.as_str())
    }

    /// Balance of an issued asset identified by code.
    pub fn asset_balance(&self, code: &str) -> Option<&str> {
        self.balances
            .iter()
            .find(|b| b.asset_code.as_deref() == Some(code))
            .map(|b| b.balance.as_str())
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence.parse().unwrap_or(0)
    }
}

/// Gateway `/transactions` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub hash: String,
    #[serde(default)]
    pub ledger: Option<u64>,
}

// =============================================================================
// Client
// =============================================================================

/// Async client for a ledger gateway.
pub struct LedgerRpc {
    client: reqwest::Client,
    url: String,
}

impl LedgerRpc {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RpcError::Other(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Look up an account. A ledger with no record of it yields `NotFound`.
    pub async fn account(&self, address: &str) -> Result<LedgerAccount, RpcError> {
        let url = format!("{}/accounts/{}", self.url, address);
        let resp = self.client.get(&url).send().await.map_err(|e| RpcError::Http {
            method: "GET".into(),
            url: url.clone(),
            source: e,
        })?;

        let status = resp.status().as_u16();
        if status == 404 {
            return Err(RpcError::NotFound { url });
        }
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                method: "GET".into(),
                url,
                status,
                body: body.chars().take(500).collect(),
            });
        }

        resp.json().await.map_err(|e| RpcError::Http {
            method: "GET".into(),
            url,
            source: e,
        })
    }

    /// Submit an encoded transaction envelope.
    pub async fn submit(&self, envelope: &str) -> Result<SubmitResponse, RpcError> {
        let url = format!("{}/transactions", self.url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "tx": envelope }))
            .send()
            .await
            .map_err(|e| RpcError::Http {
                method: "POST".into(),
                url: url.clone(),
                source: e,
            })?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                method: "POST".into(),
                url,
                status,
                body: body.chars().take(500).collect(),
            });
        }

        resp.json().await.map_err(|e| RpcError::Http {
            method: "POST".into(),
            url,
            source: e,
        })
    }
}
