//! Remote data feeding the app's lists.
//!
//! [`DataLoader`] owns one [`FetchContainer`] per list (offers, transaction
//! history, redeemed items, discovery apps) and refreshes them from the
//! backend. A non-empty list is `Present`; an empty list or a failure is
//! `Absent`, with the failure attached.

use crate::error::WalletError;
use crate::fetch::{FetchContainer, FetchResult, SharedError};
use crate::store::{KeyValueStore, StoreExt};
use kinit_rpc::requests::{
    self, AvailableBackupHint, AvailableBackupHintList, EcosystemApp, EcosystemAppCategory,
    KinitTransaction, Offer, RedeemTransaction,
};
use kinit_rpc::{RemoteService, WebRequest};
use kinit_types::keys;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub struct DataLoader {
    remote: Arc<dyn RemoteService>,
    store: Arc<dyn KeyValueStore>,
    pub offers: FetchContainer<Vec<Offer>>,
    pub transactions: FetchContainer<Vec<KinitTransaction>>,
    pub redeemed_items: FetchContainer<Vec<RedeemTransaction>>,
    pub ecosystem_apps: FetchContainer<Vec<EcosystemAppCategory>>,
}

impl DataLoader {
    pub fn new(remote: Arc<dyn RemoteService>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            remote,
            store,
            offers: FetchContainer::new(),
            transactions: FetchContainer::new(),
            redeemed_items: FetchContainer::new(),
            ecosystem_apps: FetchContainer::new(),
        }
    }

    /// Refresh every list, and the cached backup hints, concurrently.
    pub async fn load_all(&self) {
        futures::join!(
            self.load_offers(),
            self.load_transactions(),
            self.load_redeemed_items(),
            self.load_ecosystem_apps(),
            self.refresh_backup_hints()
        );
    }

    pub async fn load_offers(&self) {
        self.load_items(requests::offers(), &self.offers).await;
    }

    pub async fn load_transactions(&self) {
        self.load_items(requests::transactions_history(), &self.transactions).await;
    }

    pub async fn load_redeemed_items(&self) {
        self.load_items(requests::redeemed_items(), &self.redeemed_items).await;
    }

    pub async fn load_ecosystem_apps(&self) {
        self.load_items(requests::discovery_apps(), &self.ecosystem_apps).await;
    }

    async fn load_items<R, T>(&self, request: WebRequest<R, Vec<T>>, container: &FetchContainer<Vec<T>>)
    where
        R: DeserializeOwned,
        T: Clone,
    {
        let path = request.raw().path.clone();
        let result = match request.load(self.remote.as_ref()).await {
            Ok(items) if items.is_empty() => FetchResult::Absent(None),
            Ok(items) => FetchResult::Present(items),
            Err(e) => {
                log::warn!("loading {} failed: {}", path, e);
                let err: SharedError = Arc::new(e);
                FetchResult::Absent(Some(err))
            }
        };
        container.next(result);
    }

    /// Put a just-made transaction at the top of the history. A transaction
    /// already listed is left where it is.
    pub fn prepend_transaction(&self, transaction: KinitTransaction) {
        self.transactions.modify(|current| match current {
            FetchResult::Present(list) if list.contains(&transaction) => None,
            FetchResult::Present(list) => {
                let mut updated = Vec::with_capacity(list.len() + 1);
                updated.push(transaction);
                updated.extend(list.iter().cloned());
                Some(FetchResult::Present(updated))
            }
            FetchResult::Absent(_) => Some(FetchResult::Present(vec![transaction])),
        });
    }

    /// Report a peer-to-peer payment and add the recorded entry to the history.
    pub async fn report_p2p_transaction(
        &self,
        tx_id: &str,
        amount: u64,
        destination: &str,
    ) -> Result<KinitTransaction, WalletError> {
        let transaction = requests::report_transaction(tx_id, amount, destination)
            .load(self.remote.as_ref())
            .await?;
        self.prepend_transaction(transaction.clone());
        Ok(transaction)
    }

    /// Security questions available for backups. Cached after the first
    /// non-empty answer unless `skip_cache` is set.
    pub async fn available_backup_hints(
        &self,
        skip_cache: bool,
    ) -> Result<Vec<AvailableBackupHint>, WalletError> {
        if !skip_cache {
            match self.store.load::<AvailableBackupHintList>(keys::AVAILABLE_BACKUP_LIST) {
                Ok(Some(cached)) => return Ok(cached.hints),
                Ok(None) => {}
                Err(e) => log::warn!("cached backup hints unreadable: {}", e),
            }
        }

        let list = requests::backup_hints().load(self.remote.as_ref()).await?;
        if !list.hints.is_empty() {
            if let Err(e) = self.store.save(keys::AVAILABLE_BACKUP_LIST, &list) {
                log::warn!("failed to cache backup hints: {}", e);
            }
        }
        Ok(list.hints)
    }

    async fn refresh_backup_hints(&self) {
        if let Err(e) = self.available_backup_hints(true).await {
            log::warn!("loading backup hints failed: {}", e);
        }
    }

    /// Look up a discovery app by bundle id, with the name of its category.
    pub fn ecosystem_app(&self, bundle_id: &str) -> Option<(EcosystemApp, String)> {
        let categories = self.ecosystem_apps.value();
        categories.value()?.iter().find_map(|category| {
            category
                .apps
                .iter()
                .find(|app| app.bundle_id == bundle_id)
                .map(|app| (app.clone(), category.name.clone()))
        })
    }
}
