//! Sink binding - mirrors a remote store from a channel

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use statecast_core::{
    AbortHandle, Detail, Envelope, MessageKind, Namespace, StatecastError, StatecastResult,
};
use statecast_state::{StateStore, StoreEvent};
use statecast_transport::Channel;

/// Applies one inbound message to the mirror store
pub type SinkHandler<S> = Arc<dyn Fn(&S, &Detail) -> StatecastResult<()> + Send + Sync>;

/// Message kind → handler table
///
/// The default table applies `state:update` and `state:reset`. Messages
/// without a handler are re-emitted on the store as
/// [`StoreEvent::Message`].
pub struct SinkHandlers<S> {
    handlers: HashMap<MessageKind, SinkHandler<S>>,
}

impl<S: StateStore> SinkHandlers<S> {
    /// Table with no handlers at all
    pub fn empty() -> Self {
        SinkHandlers {
            handlers: HashMap::new(),
        }
    }

    /// Add or replace the handler for `kind`
    pub fn on<F>(mut self, kind: MessageKind, handler: F) -> Self
    where
        F: Fn(&S, &Detail) -> StatecastResult<()> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn without(mut self, kind: &MessageKind) -> Self {
        self.handlers.remove(kind);
        self
    }

    pub fn get(&self, kind: &MessageKind) -> Option<&SinkHandler<S>> {
        self.handlers.get(kind)
    }
}

impl<S> Default for SinkHandlers<S>
where
    S: StateStore,
    S::Value: DeserializeOwned,
{
    fn default() -> Self {
        SinkHandlers::empty()
            .on(MessageKind::Update, apply_update::<S>)
            .on(MessageKind::Reset, apply_reset::<S>)
    }
}

impl<S> Clone for SinkHandlers<S> {
    fn clone(&self) -> Self {
        SinkHandlers {
            handlers: self.handlers.clone(),
        }
    }
}

impl<S> fmt::Debug for SinkHandlers<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Write an inbound value into the mirror
pub fn apply_update<S>(store: &S, detail: &Detail) -> StatecastResult<()>
where
    S: StateStore,
    S::Value: DeserializeOwned,
{
    let key = S::decode_key(detail.key.as_ref())?;
    let raw = detail.value.clone().unwrap_or(Value::Null);
    let value: S::Value =
        serde_json::from_value(raw).map_err(|e| StatecastError::InvalidValue(e.to_string()))?;
    store.set_key(key, value);
    Ok(())
}

/// Clear the mirror
pub fn apply_reset<S: StateStore>(store: &S, _detail: &Detail) -> StatecastResult<()> {
    store.clear();
    Ok(())
}

/// A mirror store bound to a channel
///
/// Derefs to the store. [`Sink::detach`] disconnects the channel and then
/// destroys the store.
#[must_use = "a sink stays attached until detach() is called"]
pub struct Sink<S: StateStore> {
    store: Arc<S>,
    channel: Arc<dyn Channel>,
    namespace: Namespace,
    signal: AbortHandle,
}

/// Mirror the `namespace` session on `channel` into `store`
pub fn sink<S, C>(
    channel: C,
    store: Arc<S>,
    namespace: impl Into<Namespace>,
    handlers: SinkHandlers<S>,
) -> StatecastResult<Sink<S>>
where
    S: StateStore,
    C: Channel + 'static,
{
    let namespace = namespace.into();
    let channel: Arc<dyn Channel> = Arc::new(channel);
    let signal = AbortHandle::new();

    let subscribed = {
        let channel = Arc::clone(&channel);
        let namespace = namespace.clone();
        store.events().subscribe(&signal, move |event| {
            let StoreEvent::Missing { key } = event else {
                return;
            };
            let raw = match S::encode_key(key) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(%namespace, "Cannot request {:?}: {}", key, e);
                    return;
                }
            };
            tracing::trace!(%namespace, ?key, "requesting missing value");
            let detail = Detail::request(raw);
            if let Err(e) = channel.send_message(MessageKind::Request, &namespace, detail) {
                tracing::warn!(%namespace, "Sink request failed: {}", e);
            }
        })
    };
    if !subscribed {
        tracing::warn!(%namespace, "Cannot bind sink to a destroyed store");
        return Err(StatecastError::Detached);
    }

    let store_ref = Arc::downgrade(&store);
    let inbound_namespace = namespace.clone();
    let attached = channel.on_message(Arc::new(move |envelope: &Envelope| {
        if !envelope.in_namespace(&inbound_namespace) {
            return;
        }
        let Some(store) = store_ref.upgrade() else {
            return;
        };
        match handlers.get(&envelope.kind) {
            Some(handler) => {
                if let Err(e) = handler(&*store, &envelope.detail) {
                    tracing::warn!(
                        namespace = %inbound_namespace,
                        kind = %envelope.kind,
                        "Dropping message: {}",
                        e
                    );
                }
            }
            None => {
                store.events().emit(&StoreEvent::Message {
                    kind: envelope.kind.clone(),
                    detail: envelope.detail.clone(),
                });
            }
        }
    }));

    if let Err(e) = attached {
        signal.abort();
        return Err(e);
    }

    tracing::debug!(%namespace, "sink attached");
    Ok(Sink {
        store,
        channel,
        namespace,
        signal,
    })
}

impl<S: StateStore> Sink<S> {
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Disconnect from the channel, then destroy the store. Idempotent.
    pub fn detach(&self) {
        let first = self.signal.abort();
        self.channel.detach();
        self.store.destroy();
        if first {
            tracing::debug!(namespace = %self.namespace, "sink detached");
        }
    }

    /// Same as [`Sink::detach`]
    pub fn destroy(&self) {
        self.detach()
    }

    pub fn is_detached(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl<S: StateStore> Deref for Sink<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.store
    }
}

impl<S: StateStore> fmt::Debug for Sink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("namespace", &self.namespace)
            .field("detached", &self.is_detached())
            .finish()
    }
}
