//! Cosigned payment flow.
//!
//! Payments need a second signature from the backend before the ledger will
//! accept them:
//!
//! 1. build an envelope signed by the sender;
//! 2. encode it;
//! 3. send it with the payment details to the cosigner;
//! 4. decode the cosigned envelope and check it is the same payment;
//! 5. submit it to the ledger.
//!
//! The flow makes one attempt. Each step has its own error so callers can tell
//! where it stopped.

use crate::account::Account;
use crate::envelope::{format_memo, TransactionEnvelope};
use crate::error::WalletError;
use crate::ledger::TxId;
use kinit_rpc::{requests, RemoteService, RpcError, SignableTransaction};
use kinit_types::Balance;

/// A payment as requested by the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub order_id: String,
    pub destination: String,
    /// Whole KIN.
    pub amount: u64,
    pub memo: Option<String>,
}

pub struct CosigningProtocol<'a> {
    remote: &'a dyn RemoteService,
    app_id: &'a str,
}

impl<'a> CosigningProtocol<'a> {
    pub fn new(remote: &'a dyn RemoteService, app_id: &'a str) -> Self {
        Self { remote, app_id }
    }

    pub async fn execute(&self, account: &Account, payment: &Payment) -> Result<TxId, WalletError> {
        let amount = Balance::from_kin(payment.amount)?;
        let memo = format_memo(self.app_id, payment.memo.as_deref())?;

        let envelope = account
            .build_transaction(&payment.destination, amount, Some(memo), 0)
            .await?;
        let encoded = envelope.to_base64()?;

        let signable = SignableTransaction {
            id: payment.order_id.clone(),
            sender_address: account.public_address().to_string(),
            recipient_address: payment.destination.clone(),
            amount: payment.amount,
            transaction: encoded,
        };
        let request = requests::add_signature(&signable)
            .map_err(|e| WalletError::EncodingFailed(e.to_string()))?;
        let signed = request.load(self.remote).await.map_err(map_cosign_error)?;

        let cosigned = TransactionEnvelope::from_base64(&signed)?;
        if cosigned.tx != envelope.tx {
            return Err(WalletError::CosignMismatch(format!(
                "expected {} quarks to {}, got {} quarks to {}",
                envelope.tx.amount, envelope.tx.destination, cosigned.tx.amount, cosigned.tx.destination
            )));
        }
        log::debug!(
            "order {} cosigned ({} signatures)",
            payment.order_id,
            cosigned.signatures.len()
        );

        account.submit(&cosigned).await
    }
}

fn map_cosign_error(e: RpcError) -> WalletError {
    match e {
        RpcError::Rejected { reason, status, .. } => WalletError::RemoteRejected {
            reason: reason.unwrap_or(status),
        },
        RpcError::NoResult { context } => {
            WalletError::DecodingFailed(format!("{}: no signed envelope", context))
        }
        RpcError::Json { context, source } => {
            WalletError::DecodingFailed(format!("{}: {}", context, source))
        }
        other => WalletError::Rpc(other),
    }
}
