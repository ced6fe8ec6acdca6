//! Payment transactions and their signed envelopes.
//!
//! A [`Transaction`] is a single payment. Its hash commits to the network
//! passphrase, so a signature on one ledger is worthless on the other. The
//! [`TransactionEnvelope`] carries the transaction plus decorated signatures
//! and travels as base64-encoded JSON.

use crate::error::WalletError;
use crate::keys::{self, KeyPair, HINT_LEN};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kinit_types::{MAX_MEMO_LEN, MEMO_VERSION};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single payment from `source` to `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub source: String,
    pub destination: String,
    /// Amount in quarks.
    pub amount: u64,
    pub fee: u32,
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Transaction {
    /// `sha256(sha256(passphrase) || json(tx))`.
    pub fn hash(&self, network_passphrase: &str) -> Result<[u8; 32], WalletError> {
        let body = serde_json::to_vec(self).map_err(|e| WalletError::EncodingFailed(e.to_string()))?;
        let network_id = Sha256::digest(network_passphrase.as_bytes());
        let mut hasher = Sha256::new();
        hasher.update(network_id);
        hasher.update(&body);
        Ok(hasher.finalize().into())
    }
}

/// A signature plus the hint identifying which key made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    pub hint: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx: Transaction,
    #[serde(default)]
    pub signatures: Vec<DecoratedSignature>,
}

impl TransactionEnvelope {
    pub fn new(tx: Transaction) -> Self {
        Self {
            tx,
            signatures: Vec::new(),
        }
    }

    /// Append `keypair`'s signature over the transaction hash.
    pub fn sign(&mut self, keypair: &KeyPair, network_passphrase: &str) -> Result<(), WalletError> {
        let hash = self.tx.hash(network_passphrase)?;
        self.signatures.push(DecoratedSignature {
            hint: hex::encode(keypair.hint()),
            signature: hex::encode(keypair.sign(&hash)),
        });
        Ok(())
    }

    /// Whether some attached signature verifies against `public_key`.
    pub fn is_signed_by(&self, public_key: &[u8; 32], network_passphrase: &str) -> bool {
        let Ok(hash) = self.tx.hash(network_passphrase) else {
            return false;
        };
        let hint = hex::encode(keys::hint_for(public_key));
        self.signatures
            .iter()
            .filter(|s| s.hint == hint)
            .any(|s| {
                let Ok(bytes) = hex::decode(&s.signature) else {
                    return false;
                };
                let Ok(sig) = <[u8; 64]>::try_from(bytes.as_slice()) else {
                    return false;
                };
                keys::verify(public_key, &hash, &sig)
            })
    }

    pub fn hash_hex(&self, network_passphrase: &str) -> Result<String, WalletError> {
        Ok(hex::encode(self.tx.hash(network_passphrase)?))
    }

    pub fn to_base64(&self) -> Result<String, WalletError> {
        let json = serde_json::to_vec(self).map_err(|e| WalletError::EncodingFailed(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, WalletError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| WalletError::DecodingFailed(e.to_string()))?;
        let envelope: TransactionEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| WalletError::DecodingFailed(e.to_string()))?;
        if envelope.signatures.iter().any(|s| s.hint.len() != HINT_LEN * 2) {
            return Err(WalletError::DecodingFailed("malformed signature hint".into()));
        }
        Ok(envelope)
    }
}

/// Build the on-ledger memo `"<version>-<app_id>-<memo>"`.
pub fn format_memo(app_id: &str, memo: Option<&str>) -> Result<String, WalletError> {
    let formatted = format!("{}-{}-{}", MEMO_VERSION, app_id, memo.unwrap_or(""));
    if formatted.len() > MAX_MEMO_LEN {
        return Err(WalletError::InvalidMemo(format!(
            "{} bytes exceeds the {}-byte limit",
            formatted.len(),
            MAX_MEMO_LEN
        )));
    }
    Ok(formatted)
}
