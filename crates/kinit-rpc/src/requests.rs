//! Catalogue of backend endpoints.
//!
//! Each function builds a [`WebRequest`]; executing it against a
//! [`RemoteService`](crate::RemoteService) is the caller's business.

use crate::error::RpcError;
use crate::request::WebRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub type Success = bool;
pub type TransactionId = String;

/// Query parameter carrying the user identity on migration requests.
pub const USER_ID_QUERY_ITEM: &str = "user_id";

// =============================================================================
// Response Types
// =============================================================================

/// Body of endpoints that only report a status.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Cosigner response carrying the signed, encoded envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureResponse {
    pub status: String,
    #[serde(default)]
    pub tx: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationStatusResponse {
    pub status: String,
    #[serde(default)]
    pub is_migrated: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OffersResponse {
    #[serde(default)]
    pub offers: Option<Vec<Offer>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionHistoryResponse {
    pub status: String,
    #[serde(default)]
    pub transactions: Option<Vec<KinitTransaction>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemedItemsResponse {
    pub status: String,
    #[serde(default)]
    pub items: Option<Vec<RedeemTransaction>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionReportResponse {
    pub status: String,
    pub transaction: KinitTransaction,
}

// =============================================================================
// Domain Types
// =============================================================================

/// A payment prepared locally and handed to the cosigner.
///
/// `transaction` is the encoded envelope; `amount` is whole KIN and must match
/// the payment inside the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignableTransaction {
    pub id: String,
    pub sender_address: String,
    pub recipient_address: String,
    pub amount: u64,
    pub transaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub offer_type: String,
    pub price: u64,
    #[serde(default)]
    pub address: Option<String>,
}

/// History entry. Two entries are the same transaction when their hashes match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinitTransaction {
    pub tx_hash: String,
    pub amount: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub client_received: bool,
    #[serde(default)]
    pub date: String,
}

impl PartialEq for KinitTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.tx_hash == other.tx_hash
    }
}

impl Eq for KinitTransaction {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemTransaction {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcosystemApp {
    pub identifier: String,
    pub name: String,
    pub bundle_id: String,
    pub category_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcosystemAppCategory {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub apps: Vec<EcosystemApp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableBackupHint {
    pub id: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableBackupHintList {
    pub hints: Vec<AvailableBackupHint>,
}

/// Identity attached to migration requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationQuery {
    pub user_id: Option<String>,
}

impl MigrationQuery {
    pub fn new(user_id: Option<String>) -> Self {
        Self { user_id }
    }

    fn apply<R: serde::de::DeserializeOwned, T>(&self, req: WebRequest<R, T>) -> WebRequest<R, T> {
        match &self.user_id {
            Some(id) => req.query(USER_ID_QUERY_ITEM, id.clone()),
            None => req,
        }
    }
}

// =============================================================================
// Onboarding
// =============================================================================

/// Register a new account's public address with the backend.
pub fn create_account(public_address: &str) -> WebRequest<StatusResponse, Success> {
    WebRequest::post(
        "/user/onboard",
        json!({ "public_address": public_address }),
        |_: StatusResponse| Some(true),
    )
    .require_ok()
}

// =============================================================================
// Spend
// =============================================================================

/// Ask the cosigner to add its signature to a prepared transaction.
pub fn add_signature(
    transaction: &SignableTransaction,
) -> Result<WebRequest<SignatureResponse, String>, RpcError> {
    let body = serde_json::to_value(transaction).map_err(|e| RpcError::Json {
        context: "/user/transaction/sign".to_string(),
        source: e,
    })?;
    Ok(
        WebRequest::post("/user/transaction/sign", body, |r: SignatureResponse| r.tx)
            .require_ok(),
    )
}

/// Report a completed peer-to-peer payment; returns the recorded history entry.
pub fn report_transaction(
    tx_id: &str,
    amount: u64,
    destination: &str,
) -> WebRequest<TransactionReportResponse, KinitTransaction> {
    WebRequest::post(
        "/user/transaction/p2p",
        json!({
            "tx_hash": tx_id,
            "amount": amount,
            "destination_address": destination,
        }),
        |r: TransactionReportResponse| Some(r.transaction),
    )
    .require_ok()
}

pub fn offers() -> WebRequest<OffersResponse, Vec<Offer>> {
    WebRequest::get("/user/offers", |r: OffersResponse| r.offers)
}

// =============================================================================
// History
// =============================================================================

pub fn transactions_history() -> WebRequest<TransactionHistoryResponse, Vec<KinitTransaction>> {
    WebRequest::get("/user/transactions", |r: TransactionHistoryResponse| {
        r.transactions
    })
    .require_ok()
}

pub fn redeemed_items() -> WebRequest<RedeemedItemsResponse, Vec<RedeemTransaction>> {
    WebRequest::get("/user/redeemed", |r: RedeemedItemsResponse| r.items).require_ok()
}

// =============================================================================
// Discovery and Backup
// =============================================================================

pub fn discovery_apps() -> WebRequest<Vec<EcosystemAppCategory>, Vec<EcosystemAppCategory>> {
    WebRequest::get("/app_discovery", Some)
}

pub fn backup_hints() -> WebRequest<AvailableBackupHintList, AvailableBackupHintList> {
    WebRequest::get("/backup/hints", Some)
}

// =============================================================================
// Migration
// =============================================================================

/// Whether the backend has recorded `address` as migrated.
pub fn migration_status(
    address: &str,
    query: &MigrationQuery,
) -> WebRequest<MigrationStatusResponse, bool> {
    query.apply(
        WebRequest::get("/user/migration/status", |r: MigrationStatusResponse| {
            r.is_migrated
        })
        .query("address", address)
        .require_ok(),
    )
}

/// Ask the backend to move `address` from the legacy ledger to the current one.
///
/// A rejection with reason [`REASON_ALREADY_MIGRATED`](crate::error::REASON_ALREADY_MIGRATED)
/// means the move already happened.
pub fn migrate(address: &str, query: &MigrationQuery) -> WebRequest<StatusResponse, Success> {
    query.apply(
        WebRequest::post("/user/migrate", json!({}), |_: StatusResponse| Some(true))
            .query("address", address)
            .require_ok(),
    )
}
