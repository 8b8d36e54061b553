//! Single-value cell

use std::fmt;

use statecast_core::{AbortHandle, Notifier, Timestamp};

use crate::{KeyedStore, Read, StatusFuture, StoreEvent};

/// A keyed store with exactly one implicit key
pub struct ValueCell<V> {
    store: KeyedStore<(), (), V>,
}

impl<V> ValueCell<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        ValueCell {
            store: KeyedStore::new(),
        }
    }

    /// Cell holding an initial value
    pub fn with_value(value: V) -> Self {
        let cell = Self::new();
        cell.set(value);
        cell
    }

    pub fn peek(&self) -> Option<V> {
        self.store.peek(&())
    }

    pub fn get_async(&self) -> StatusFuture<V> {
        self.store.get_async(&())
    }

    pub fn read(&self) -> Read<V> {
        self.store.read(&())
    }

    pub fn prime(&self) {
        self.store.prime(&())
    }

    pub fn set(&self, value: V) {
        self.store.set(&(), value)
    }

    /// Re-announce the value if one is present
    pub fn request(&self) {
        self.store.request(&())
    }

    pub fn clear(&self) {
        self.store.clear()
    }

    pub fn destroy(&self) {
        self.store.destroy()
    }

    pub fn is_destroyed(&self) -> bool {
        self.store.is_destroyed()
    }

    pub fn last_updated(&self) -> Timestamp {
        self.store.last_updated()
    }

    pub fn events(&self) -> &Notifier<StoreEvent<(), V>> {
        self.store.events()
    }

    pub fn subscribe<F>(&self, signal: &AbortHandle, handler: F) -> bool
    where
        F: Fn(&StoreEvent<(), V>) + Send + Sync + 'static,
    {
        self.store.subscribe(signal, handler)
    }

    pub fn on_missing<F>(&self, signal: &AbortHandle, handler: F) -> bool
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.store.on_missing(signal, move |_| handler())
    }

    pub(crate) fn store(&self) -> &KeyedStore<(), (), V> {
        &self.store
    }
}

impl<V> Default for ValueCell<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for ValueCell<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueCell").field(&self.store).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_initial_value() {
        let cell = ValueCell::with_value("light");
        assert_eq!(cell.peek(), Some("light"));
        assert_eq!(cell.read().ready(), Some("light"));

        let empty = ValueCell::<u8>::new();
        assert_eq!(empty.peek(), None);
    }

    #[test]
    fn test_identity_follows_value_changes() {
        let cell = ValueCell::new();
        let pending = cell.get_async();
        assert!(pending.ptr_eq(&cell.get_async()));

        cell.set(1);
        assert!(pending.ptr_eq(&cell.get_async()));
        cell.set(1);
        assert!(pending.ptr_eq(&cell.get_async()));

        cell.set(2);
        assert!(!pending.ptr_eq(&cell.get_async()));
    }

    #[tokio::test]
    async fn test_pending_resolves_on_set() {
        let cell = ValueCell::new();
        let value = cell.get_async();
        cell.set("dark".to_string());
        assert_eq!(value.await, "dark");
    }

    #[test]
    fn test_missing_signal() {
        let cell = ValueCell::<u8>::new();
        let signal = AbortHandle::new();
        let missing = Arc::new(AtomicUsize::new(0));
        {
            let missing = Arc::clone(&missing);
            cell.on_missing(&signal, move || {
                missing.fetch_add(1, Ordering::SeqCst);
            });
        }

        cell.prime();
        cell.prime();
        assert_eq!(missing.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_destroy_stalls_waiters() {
        let cell = ValueCell::<u32>::new();
        let pending = cell.get_async();
        cell.destroy();
        cell.set(5);

        assert!(tokio::time::timeout(Duration::from_millis(50), pending)
            .await
            .is_err());
    }
}
