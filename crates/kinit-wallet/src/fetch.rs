//! Observable holder for remotely fetched data.
//!
//! A [`FetchContainer`] always holds a [`FetchResult`]: either the data
//! (`Present`) or nothing, optionally with the error that caused it
//! (`Absent`). Subscribers see the current value on subscription and every
//! transition after that.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub enum FetchResult<T> {
    Absent(Option<SharedError>),
    Present(T),
}

impl<T> Default for FetchResult<T> {
    fn default() -> Self {
        FetchResult::Absent(None)
    }
}

impl<T> FetchResult<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            FetchResult::Present(v) => Some(v),
            FetchResult::Absent(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SharedError> {
        match self {
            FetchResult::Absent(e) => e.as_ref(),
            FetchResult::Present(_) => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, FetchResult::Present(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&FetchResult<T>) + Send + Sync>;

struct State<T> {
    value: FetchResult<T>,
    subscribers: Vec<(SubscriptionId, Callback<T>)>,
    next_id: u64,
}

pub struct FetchContainer<T> {
    state: Mutex<State<T>>,
}

impl<T: Clone> Default for FetchContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FetchContainer<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                value: FetchResult::default(),
                subscribers: Vec::new(),
                next_id: 0,
            }),
        }
    }

    pub fn value(&self) -> FetchResult<T> {
        self.state().value.clone()
    }

    /// Replace the held value and notify subscribers.
    pub fn next(&self, result: FetchResult<T>) {
        self.modify(|_| Some(result));
    }

    /// Compute a replacement from the current value under the lock. `None`
    /// leaves the value untouched and notifies nobody.
    pub fn modify<F>(&self, f: F)
    where
        F: FnOnce(&FetchResult<T>) -> Option<FetchResult<T>>,
    {
        let (result, subscribers) = {
            let mut state = self.state();
            let Some(next) = f(&state.value) else {
                return;
            };
            state.value = next.clone();
            let subscribers: Vec<Callback<T>> =
                state.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            (next, subscribers)
        };
        for cb in subscribers {
            cb(&result);
        }
    }

    /// Subscribe to transitions. The callback fires immediately with the
    /// current value.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&FetchResult<T>) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let (id, current) = {
            let mut state = self.state();
            let id = SubscriptionId(state.next_id);
            state.next_id += 1;
            state.subscribers.push((id, callback.clone()));
            (id, state.value.clone())
        };
        callback(&current);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sid, _)| *sid != id);
        state.subscribers.len() != before
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
