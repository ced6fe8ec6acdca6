//! Cached balance with weak-reference observers.

use crate::store::{KeyValueStore, StoreExt};
use kinit_types::{keys, Balance};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Receives balance changes. Registration holds only a weak reference, so a
/// delegate that is dropped simply stops being called.
pub trait BalanceDelegate: Send + Sync {
    fn balance_did_update(&self, balance: Balance);
}

/// Weakly-held observers, in registration order.
pub struct ObserverSet<T: ?Sized> {
    entries: Vec<Weak<T>>,
}

impl<T: ?Sized> Default for ObserverSet<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T: ?Sized> ObserverSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Returns `false` if it was already registered.
    pub fn add(&mut self, observer: Weak<T>) -> bool {
        let ptr = observer.as_ptr() as *const ();
        if self.entries.iter().any(|w| w.as_ptr() as *const () == ptr) {
            return false;
        }
        self.entries.push(observer);
        true
    }

    /// Remove the observer living at `ptr`.
    pub fn remove(&mut self, ptr: *const ()) -> bool {
        let before = self.entries.len();
        self.entries.retain(|w| w.as_ptr() as *const () != ptr);
        self.entries.len() != before
    }

    /// Live observers in registration order. Dead entries are pruned.
    pub fn live(&mut self) -> Vec<Arc<T>> {
        let mut live = Vec::with_capacity(self.entries.len());
        self.entries.retain(|w| match w.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        live
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Last known balance, persisted across restarts, plus its observers.
pub struct BalanceCache {
    store: Arc<dyn KeyValueStore>,
    observers: Mutex<ObserverSet<dyn BalanceDelegate>>,
    // Serializes persist + notify so delegates end on the stored value.
    updates: Mutex<()>,
}

impl BalanceCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            observers: Mutex::new(ObserverSet::new()),
            updates: Mutex::new(()),
        }
    }

    /// Cached balance; zero when nothing was ever stored.
    pub fn balance(&self) -> Balance {
        match self.store.load::<u64>(keys::BALANCE) {
            Ok(Some(quarks)) => Balance::from_quarks(quarks),
            Ok(None) => Balance::ZERO,
            Err(e) => {
                log::warn!("cached balance unreadable: {}", e);
                Balance::ZERO
            }
        }
    }

    /// Persist `balance` and notify every live delegate.
    ///
    /// Concurrent updates are applied one at a time. Delegates are called
    /// after the observer lock is released, so they may register or
    /// unregister from inside the callback, but must not call `update`.
    pub fn update(&self, balance: Balance) {
        let _serial = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.store.save(keys::BALANCE, &balance.quarks()) {
            log::warn!("failed to persist balance: {}", e);
        }
        let observers = self.observers().live();
        for observer in observers {
            observer.balance_did_update(balance);
        }
    }

    pub fn add_delegate<D: BalanceDelegate + 'static>(&self, delegate: &Arc<D>) {
        let weak: Weak<dyn BalanceDelegate> = Arc::downgrade(delegate) as Weak<dyn BalanceDelegate>;
        self.observers().add(weak);
    }

    pub fn remove_delegate<D: BalanceDelegate + 'static>(&self, delegate: &Arc<D>) {
        self.observers().remove(Arc::as_ptr(delegate) as *const ());
    }

    pub fn delegate_count(&self) -> usize {
        self.observers().len()
    }

    fn observers(&self) -> MutexGuard<'_, ObserverSet<dyn BalanceDelegate>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Balance>>,
    }

    impl BalanceDelegate for Recorder {
        fn balance_did_update(&self, balance: Balance) {
            self.seen.lock().unwrap().push(balance);
        }
    }

    #[test]
    fn test_cache_defaults_to_zero_and_persists() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = BalanceCache::new(store.clone());
        assert_eq!(cache.balance(), Balance::ZERO);

        cache.update(Balance::from_quarks(123_456));
        assert_eq!(BalanceCache::new(store).balance(), Balance::from_quarks(123_456));
    }

    #[test]
    fn test_delegates_notified_in_order_without_duplicates() {
        let cache = BalanceCache::new(Arc::new(MemoryStore::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tagged(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl BalanceDelegate for Tagged {
            fn balance_did_update(&self, _: Balance) {
                self.1.lock().unwrap().push(self.0);
            }
        }

        let a = Arc::new(Tagged("a", order.clone()));
        let b = Arc::new(Tagged("b", order.clone()));
        cache.add_delegate(&a);
        cache.add_delegate(&b);
        cache.add_delegate(&a);
        assert_eq!(cache.delegate_count(), 2);

        cache.update(Balance::from_quarks(1));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_dropped_delegate_is_skipped() {
        let cache = BalanceCache::new(Arc::new(MemoryStore::new()));
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        cache.add_delegate(&kept);
        cache.add_delegate(&dropped);
        drop(dropped);

        cache.update(Balance::from_quarks(5));
        assert_eq!(*kept.seen.lock().unwrap(), vec![Balance::from_quarks(5)]);
        assert_eq!(cache.delegate_count(), 1);
    }

    #[test]
    fn test_remove_delegate() {
        let cache = BalanceCache::new(Arc::new(MemoryStore::new()));
        let d = Arc::new(Recorder::default());
        cache.add_delegate(&d);
        cache.remove_delegate(&d);
        cache.update(Balance::from_quarks(9));
        assert!(d.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_updates_end_on_stored_value() {
        let cache = BalanceCache::new(Arc::new(MemoryStore::new()));
        let recorder = Arc::new(Recorder::default());
        cache.add_delegate(&recorder);

        std::thread::scope(|scope| {
            for t in 0..8u64 {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..50u64 {
                        cache.update(Balance::from_quarks(t * 1_000 + i));
                    }
                });
            }
        });

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 400);
        assert_eq!(seen.last().copied(), Some(cache.balance()));
    }

    #[test]
    fn test_delegate_may_reenter() {
        struct Reentrant {
            cache: Arc<BalanceCache>,
            me: Mutex<Option<Arc<Reentrant>>>,
        }
        impl BalanceDelegate for Reentrant {
            fn balance_did_update(&self, _: Balance) {
                if let Some(me) = self.me.lock().unwrap().take() {
                    self.cache.remove_delegate(&me);
                }
            }
        }

        let cache = Arc::new(BalanceCache::new(Arc::new(MemoryStore::new())));
        let d = Arc::new(Reentrant { cache: cache.clone(), me: Mutex::new(None) });
        *d.me.lock().unwrap() = Some(d.clone());
        cache.add_delegate(&d);

        cache.update(Balance::from_quarks(1));
        assert_eq!(cache.delegate_count(), 0);
    }
}
