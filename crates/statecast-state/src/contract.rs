//! Store contract consumed by the replication bindings
//!
//! Bindings work at key level: params are already projected by the time a
//! value reaches the wire. Any cache exposing this trait (for example one
//! layering refresh policy over a [`KeyedStore`]) can be bound to a channel.

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use statecast_core::{Notifier, StatecastError, StatecastResult, Timestamp};

use crate::{KeyedStore, StatusFuture, StoreEvent, ValueCell};

pub trait StateStore: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    fn peek_key(&self, key: &Self::Key) -> Option<Self::Value>;

    fn get_async_key(&self, key: Self::Key) -> StatusFuture<Self::Value>;

    fn set_key(&self, key: Self::Key, value: Self::Value);

    /// Re-emit `Updated` for the key if a value is present; otherwise no-op
    fn request_key(&self, key: Self::Key);

    fn clear(&self);

    fn destroy(&self);

    fn last_updated(&self) -> Timestamp;

    fn events(&self) -> &Notifier<StoreEvent<Self::Key, Self::Value>>;

    /// Wire form of a key; `None` for single-value stores
    fn encode_key(key: &Self::Key) -> StatecastResult<Option<Value>>;

    fn decode_key(raw: Option<&Value>) -> StatecastResult<Self::Key>;
}

impl<P, K, V> StateStore for KeyedStore<P, K, V>
where
    P: ?Sized + 'static,
    K: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    type Key = K;
    type Value = V;

    fn peek_key(&self, key: &K) -> Option<V> {
        KeyedStore::peek_key(self, key)
    }

    fn get_async_key(&self, key: K) -> StatusFuture<V> {
        KeyedStore::get_async_key(self, key)
    }

    fn set_key(&self, key: K, value: V) {
        KeyedStore::set_key(self, key, value)
    }

    fn request_key(&self, key: K) {
        KeyedStore::request_key(self, key)
    }

    fn clear(&self) {
        KeyedStore::clear(self)
    }

    fn destroy(&self) {
        KeyedStore::destroy(self)
    }

    fn last_updated(&self) -> Timestamp {
        KeyedStore::last_updated(self)
    }

    fn events(&self) -> &Notifier<StoreEvent<K, V>> {
        KeyedStore::events(self)
    }

    fn encode_key(key: &K) -> StatecastResult<Option<Value>> {
        serde_json::to_value(key)
            .map(Some)
            .map_err(|e| StatecastError::InvalidKey(e.to_string()))
    }

    fn decode_key(raw: Option<&Value>) -> StatecastResult<K> {
        let raw = raw.ok_or_else(|| StatecastError::InvalidKey("missing key".to_string()))?;
        serde_json::from_value(raw.clone()).map_err(|e| StatecastError::InvalidKey(e.to_string()))
    }
}

impl<V> StateStore for ValueCell<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    type Key = ();
    type Value = V;

    fn peek_key(&self, _key: &()) -> Option<V> {
        self.peek()
    }

    fn get_async_key(&self, _key: ()) -> StatusFuture<V> {
        self.get_async()
    }

    fn set_key(&self, _key: (), value: V) {
        self.set(value)
    }

    fn request_key(&self, _key: ()) {
        self.request()
    }

    fn clear(&self) {
        ValueCell::clear(self)
    }

    fn destroy(&self) {
        ValueCell::destroy(self)
    }

    fn last_updated(&self) -> Timestamp {
        ValueCell::last_updated(self)
    }

    fn events(&self) -> &Notifier<StoreEvent<(), V>> {
        self.store().events()
    }

    fn encode_key(_key: &()) -> StatecastResult<Option<Value>> {
        Ok(None)
    }

    fn decode_key(_raw: Option<&Value>) -> StatecastResult<()> {
        Ok(())
    }
}
