//! Keyed store - one future-backed slot per projected key

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use statecast_core::{AbortHandle, Detail, MessageKind, Notifier, Timestamp};

use crate::{Read, StatusFuture};

/// Store notification
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent<K, V> {
    /// A value was written (fired on every `set`, changed or not)
    Updated { key: K, value: V },
    /// The whole store was cleared
    Reset,
    /// A pending future was created for an absent key
    Missing { key: K },
    /// An inbound message no handler claimed
    Message { kind: MessageKind, detail: Detail },
}

impl<K, V> StoreEvent<K, V> {
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::Updated { .. } => EventKind::Updated,
            StoreEvent::Reset => EventKind::Reset,
            StoreEvent::Missing { .. } => EventKind::Missing,
            StoreEvent::Message { .. } => EventKind::Message,
        }
    }
}

/// Notification class, used to pick which events a binding forwards
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Updated,
    Reset,
    Missing,
    Message,
}

/// Param → key projection
pub type Projection<P, K> = Arc<dyn Fn(&P) -> K + Send + Sync>;

struct StoreState<K, V> {
    slots: HashMap<K, StatusFuture<V>>,
    last_updated: Timestamp,
    destroyed: bool,
}

/// Mapping from projected keys to future-backed value slots
///
/// Every public operation first projects the caller's param to a key; params
/// that project to the same key share one slot. Per key, the store hands out
/// one stable [`StatusFuture`] until a *different* value is written, at which
/// point a new fulfilled future is minted.
pub struct KeyedStore<P: ?Sized, K, V> {
    state: Mutex<StoreState<K, V>>,
    /// Held from a state change until its notification is delivered, so
    /// listeners see writes in the order they were applied. Reentrant, as
    /// listeners may write back into the store.
    writer: ReentrantMutex<()>,
    project: Projection<P, K>,
    events: Notifier<StoreEvent<K, V>>,
}

impl<K, V> KeyedStore<K, K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Store keyed by the param itself
    pub fn new() -> Self {
        Self::with_projection(|key: &K| key.clone())
    }

    /// Store pre-populated with entries
    pub fn with_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let store = Self::new();
        store.extend(entries);
        store
    }
}

impl<K, V> Default for KeyedStore<K, K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, K, V> KeyedStore<P, K, V>
where
    P: ?Sized,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Store with a custom key projection, for structured params
    pub fn with_projection<F>(project: F) -> Self
    where
        F: Fn(&P) -> K + Send + Sync + 'static,
    {
        KeyedStore {
            state: Mutex::new(StoreState {
                slots: HashMap::new(),
                last_updated: Timestamp::now(),
                destroyed: false,
            }),
            writer: ReentrantMutex::new(()),
            project: Arc::new(project),
            events: Notifier::new(),
        }
    }

    /// Set each entry in order
    pub fn extend<Q>(&self, entries: impl IntoIterator<Item = (Q, V)>)
    where
        Q: std::borrow::Borrow<P>,
    {
        for (param, value) in entries {
            self.set(param.borrow(), value);
        }
    }

    #[inline]
    pub fn key_of(&self, param: &P) -> K {
        (self.project)(param)
    }

    /// Current value, without creating any state
    pub fn peek(&self, param: &P) -> Option<V> {
        self.peek_key(&self.key_of(param))
    }

    /// Stable future for the param's value, created pending if absent
    pub fn get_async(&self, param: &P) -> StatusFuture<V> {
        self.get_async_key(self.key_of(param))
    }

    /// The value if already available, otherwise its future
    pub fn read(&self, param: &P) -> Read<V> {
        self.get_async(param).into()
    }

    /// Ensure a future exists to receive a later value
    pub fn prime(&self, param: &P) {
        let _ = self.get_async(param);
    }

    pub fn set(&self, param: &P, value: V) {
        self.set_key(self.key_of(param), value);
    }

    /// Re-announce the param's value if one is present
    pub fn request(&self, param: &P) {
        self.request_key(self.key_of(param));
    }

    pub fn contains(&self, param: &P) -> bool {
        let key = self.key_of(param);
        self.state.lock().slots.contains_key(&key)
    }

    pub fn peek_key(&self, key: &K) -> Option<V> {
        self.state.lock().slots.get(key).and_then(|f| f.value())
    }

    pub fn get_async_key(&self, key: K) -> StatusFuture<V> {
        let _ordered = self.writer.lock();
        let future = {
            let mut state = self.state.lock();
            if let Some(existing) = state.slots.get(&key) {
                return existing.clone();
            }
            let future = StatusFuture::pending();
            state.slots.insert(key.clone(), future.clone());
            future
        };

        self.events.emit(&StoreEvent::Missing { key });
        future
    }

    pub fn set_key(&self, key: K, value: V) {
        let _ordered = self.writer.lock();
        let pending = {
            let mut state = self.state.lock();
            state.last_updated = Timestamp::now();
            match state.slots.get(&key).cloned() {
                Some(current) if !current.is_fulfilled() => Some(current),
                Some(current) if current.holds(&value) => None,
                _ => {
                    state
                        .slots
                        .insert(key.clone(), StatusFuture::fulfilled(value.clone()));
                    None
                }
            }
        };

        // The pending future becomes the fulfilled one, so handles given to
        // waiters stay identical to what get_async returns afterwards.
        let installed = match pending {
            Some(future) if !future.resolve(value.clone()) => future.value(),
            _ => Some(value),
        };

        if let Some(value) = installed {
            self.events.emit(&StoreEvent::Updated { key, value });
        }
    }

    pub fn request_key(&self, key: K) {
        let _ordered = self.writer.lock();
        // Nothing to answer with: the requester keeps waiting.
        if let Some(value) = self.peek_key(&key) {
            self.events.emit(&StoreEvent::Updated { key, value });
        }
    }

    /// Drop every slot and waiter. Outstanding futures stay pending forever.
    pub fn clear(&self) {
        let _ordered = self.writer.lock();
        let dropped: Vec<StatusFuture<V>> = {
            let mut state = self.state.lock();
            state.slots.drain().map(|(_, f)| f).collect()
        };

        let stalled: usize = dropped.iter().map(|f| f.abandon()).sum();
        if stalled > 0 {
            tracing::debug!(stalled, "store cleared with parked waiters");
        }

        self.events.emit(&StoreEvent::Reset);
    }

    /// Clear, then close the notifier for good
    pub fn destroy(&self) {
        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.destroyed, true)
        };
        self.clear();
        self.events.close();
        if first {
            tracing::debug!("store destroyed");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Time of the last `set`, across all keys
    pub fn last_updated(&self) -> Timestamp {
        self.state.lock().last_updated
    }

    /// Number of keys holding a pending or fulfilled future
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events(&self) -> &Notifier<StoreEvent<K, V>> {
        &self.events
    }

    pub fn subscribe<F>(&self, signal: &AbortHandle, handler: F) -> bool
    where
        F: Fn(&StoreEvent<K, V>) + Send + Sync + 'static,
    {
        self.events.subscribe(signal, handler)
    }

    /// Listen for keys that became pending without a value
    pub fn on_missing<F>(&self, signal: &AbortHandle, handler: F) -> bool
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        self.events.subscribe(signal, move |event| {
            if let StoreEvent::Missing { key } = event {
                handler(key);
            }
        })
    }
}

impl<P: ?Sized, K, V> fmt::Debug for KeyedStore<P, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("KeyedStore")
            .field("keys", &state.slots.len())
            .field("last_updated", &state.last_updated)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
