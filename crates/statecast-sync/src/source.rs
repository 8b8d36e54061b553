//! Source binding - publishes an authoritative store on a channel

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use statecast_core::{
    AbortHandle, Detail, Envelope, MessageKind, Namespace, StatecastError, StatecastResult,
    STATE_MISSING,
};
use statecast_state::{EventKind, StateStore, StoreEvent};
use statecast_transport::Channel;

/// Source binding configuration
#[derive(Clone, Debug)]
pub struct SourceOptions {
    /// Store notifications forwarded to peers
    pub events: Vec<EventKind>,
    /// Stamped on every outbound detail, to tell sources apart
    pub id: Option<String>,
    /// Stamp outbound details with the store's last update time
    pub stamp_timestamp: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        SourceOptions {
            events: vec![EventKind::Updated, EventKind::Reset],
            id: None,
            stamp_timestamp: false,
        }
    }
}

impl SourceOptions {
    pub fn with_events(mut self, events: impl IntoIterator<Item = EventKind>) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self) -> Self {
        self.stamp_timestamp = true;
        self
    }
}

/// Wire form of a store notification
pub fn outbound<S>(event: &StoreEvent<S::Key, S::Value>) -> StatecastResult<(MessageKind, Detail)>
where
    S: StateStore,
    S::Value: Serialize,
{
    match event {
        StoreEvent::Updated { key, value } => Ok((
            MessageKind::Update,
            Detail::update(S::encode_key(key)?, encode_value(value)?),
        )),
        StoreEvent::Reset => Ok((MessageKind::Reset, Detail::empty())),
        StoreEvent::Missing { key } => Ok((
            MessageKind::Other(STATE_MISSING.to_string()),
            Detail::request(S::encode_key(key)?),
        )),
        StoreEvent::Message { kind, detail } => Ok((kind.clone(), detail.clone())),
    }
}

fn encode_value<V: Serialize>(value: &V) -> StatecastResult<Value> {
    serde_json::to_value(value).map_err(|e| StatecastError::InvalidValue(e.to_string()))
}

/// An authoritative store bound to a channel
///
/// Derefs to the store. [`Source::detach`] disconnects the channel and then
/// destroys the store; use it instead of the store's own `destroy`.
#[must_use = "a source stays attached until detach() is called"]
pub struct Source<S: StateStore> {
    store: Arc<S>,
    channel: Arc<dyn Channel>,
    namespace: Namespace,
    signal: AbortHandle,
}

/// Publish `store` on `channel` under `namespace`
pub fn source<S, C>(
    channel: C,
    store: Arc<S>,
    namespace: impl Into<Namespace>,
    options: SourceOptions,
) -> StatecastResult<Source<S>>
where
    S: StateStore,
    S::Value: Serialize,
    C: Channel + 'static,
{
    let namespace = namespace.into();
    let channel: Arc<dyn Channel> = Arc::new(channel);
    let signal = AbortHandle::new();

    let subscribed = {
        let channel = Arc::clone(&channel);
        let store_ref = Arc::downgrade(&store);
        let namespace = namespace.clone();
        store.events().subscribe(&signal, move |event| {
            if !options.events.contains(&event.kind()) {
                return;
            }

            let (kind, mut detail) = match outbound::<S>(event) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(%namespace, "Cannot encode store event: {}", e);
                    return;
                }
            };
            if let Some(id) = &options.id {
                detail.id = Some(id.clone());
            }
            if options.stamp_timestamp {
                if let Some(store) = store_ref.upgrade() {
                    detail.timestamp = Some(store.last_updated());
                }
            }

            tracing::trace!(%namespace, %kind, "source forward");
            if let Err(e) = channel.send_message(kind, &namespace, detail) {
                tracing::warn!(%namespace, "Source send failed: {}", e);
            }
        })
    };
    if !subscribed {
        tracing::warn!(%namespace, "Cannot bind source to a destroyed store");
        return Err(StatecastError::Detached);
    }

    let store_ref = Arc::downgrade(&store);
    let inbound_namespace = namespace.clone();
    let attached = channel.on_message(Arc::new(move |envelope: &Envelope| {
        if !envelope.in_namespace(&inbound_namespace) || envelope.kind != MessageKind::Request {
            return;
        }
        let Some(store) = store_ref.upgrade() else {
            return;
        };
        match S::decode_key(envelope.detail.key.as_ref()) {
            Ok(key) => {
                tracing::trace!(namespace = %inbound_namespace, ?key, "value requested");
                store.request_key(key);
            }
            Err(e) => {
                tracing::warn!(namespace = %inbound_namespace, "Ignoring request: {}", e);
            }
        }
    }));

    if let Err(e) = attached {
        signal.abort();
        return Err(e);
    }

    tracing::debug!(%namespace, "source attached");
    Ok(Source {
        store,
        channel,
        namespace,
        signal,
    })
}

impl<S: StateStore> Source<S> {
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
            tracing::debug!(namespace = %self.namespace, "source detached");
        }
    }

    /// Same as [`Source::detach`]
    pub fn destroy(&self) {
        self.detach()
    }

    pub fn is_detached(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl<S: StateStore> Deref for Source<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.store
    }
}

impl<S: StateStore> fmt::Debug for Source<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("namespace", &self.namespace)
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use statecast_state::{KeyedStore, ValueCell};
    use statecast_transport::{MessageHandler, Port, PortChannel};
    use std::time::Duration;

    type Store = KeyedStore<String, String, String>;

    /// Channel stub recording everything sent and exposing its handlers
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Envelope>>,
        handlers: Mutex<Vec<MessageHandler>>,
        detached: Mutex<bool>,
    }

    impl Recorder {
        fn deliver(&self, envelope: Envelope) {
            let handlers = self.handlers.lock().clone();
            for handler in handlers {
                handler(&envelope);
            }
        }

        fn kinds(&self) -> Vec<MessageKind> {
            self.sent.lock().iter().map(|e| e.kind.clone()).collect()
        }
    }

    impl Channel for Recorder {
        fn send(&self, envelope: Envelope) -> StatecastResult<()> {
            if *self.detached.lock() {
                return Err(StatecastError::Detached);
            }
            self.sent.lock().push(envelope);
            Ok(())
        }

        fn on_message(&self, handler: MessageHandler) -> StatecastResult<()> {
            if *self.detached.lock() {
                return Err(StatecastError::Detached);
            }
            self.handlers.lock().push(handler);
            Ok(())
        }

        fn detach(&self) {
            *self.detached.lock() = true;
            self.handlers.lock().clear();
        }

        fn is_detached(&self) -> bool {
            *self.detached.lock()
        }
    }

    fn request(namespace: &str, key: &str) -> Envelope {
        Envelope::new(
            MessageKind::Request,
            namespace,
            Detail::request(Some(json!(key))),
        )
    }

    #[test]
    fn test_forwards_updates_and_resets() {
        let channel = Arc::new(Recorder::default());
        let src = source(
            Arc::clone(&channel),
            Arc::new(Store::new()),
            "ns",
            SourceOptions::default(),
        )
        .unwrap();

        src.set(&"theme".to_string(), "dark".to_string());
        let _ = src.get_async(&"font".to_string());
        src.clear();

        assert_eq!(channel.kinds(), vec![MessageKind::Update, MessageKind::Reset]);
        let first = channel.sent.lock()[0].clone();
        assert_eq!(first.namespace, Namespace::from("ns"));
        assert_eq!(
            first.detail,
            Detail::update(Some(json!("theme")), json!("dark"))
        );
    }

    #[test]
    fn test_stamps_id_and_timestamp() {
        let channel = Arc::new(Recorder::default());
        let store = Arc::new(Store::new());
        let src = source(
            Arc::clone(&channel),
            Arc::clone(&store),
            "ns",
            SourceOptions::default().with_id("primary").with_timestamp(),
        )
        .unwrap();

        src.set(&"k".to_string(), "v".to_string());

        let detail = channel.sent.lock()[0].detail.clone();
        assert_eq!(detail.id.as_deref(), Some("primary"));
        assert_eq!(detail.timestamp, Some(store.last_updated()));
    }

    #[test]
    fn test_custom_event_selection() {
        let channel = Arc::new(Recorder::default());
        let src = source(
            Arc::clone(&channel),
            Arc::new(Store::new()),
            "ns",
            SourceOptions::default().with_events([EventKind::Missing]),
        )
        .unwrap();

        src.set(&"a".to_string(), "1".to_string());
        let _ = src.get_async(&"b".to_string());

        assert_eq!(
            channel.kinds(),
            vec![MessageKind::Other(STATE_MISSING.to_string())]
        );
    }

    #[test]
    fn test_request_republishes_present_value() {
        let channel = Arc::new(Recorder::default());
        let src = source(
            Arc::clone(&channel),
            Arc::new(Store::new()),
            "ns",
            SourceOptions::default(),
        )
        .unwrap();
        src.set(&"theme".to_string(), "dark".to_string());
        channel.sent.lock().clear();

        channel.deliver(request("ns", "theme"));
        assert_eq!(channel.kinds(), vec![MessageKind::Update]);

        // Other namespaces and absent keys are ignored.
        channel.deliver(request("elsewhere", "theme"));
        channel.deliver(request("ns", "unknown"));
        assert_eq!(channel.sent.lock().len(), 1);
    }

    #[test]
    fn test_stale_request_is_silent() {
        let channel = Arc::new(Recorder::default());
        let src = source(
            Arc::clone(&channel),
            Arc::new(Store::new()),
            "ns",
            SourceOptions::default(),
        )
        .unwrap();
        src.set(&"theme".to_string(), "dark".to_string());
        src.clear();
        channel.sent.lock().clear();

        channel.deliver(request("ns", "theme"));
        assert!(channel.sent.lock().is_empty());
    }

    #[test]
    fn test_single_value_request_has_no_key() {
        let channel = Arc::new(Recorder::default());
        let src = source(
            Arc::clone(&channel),
            Arc::new(ValueCell::with_value(7u32)),
            "cell",
            SourceOptions::default(),
        )
        .unwrap();
        assert_eq!(src.peek(), Some(7));

        channel.deliver(Envelope::new(MessageKind::Request, "cell", Detail::empty()));
        let sent = channel.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].detail, Detail::update(None, json!(7)));
    }

    #[test]
    fn test_detach_disconnects_then_destroys() {
        let channel = Arc::new(Recorder::default());
        let store = Arc::new(Store::new());
        let src = source(
            Arc::clone(&channel),
            Arc::clone(&store),
            "ns",
            SourceOptions::default(),
        )
        .unwrap();
        src.set(&"k".to_string(), "v".to_string());
        channel.sent.lock().clear();

        src.detach();
        src.detach();

        assert!(src.is_detached());
        assert!(channel.is_detached());
        assert!(store.is_destroyed());
        assert_eq!(store.peek(&"k".to_string()), None);
        // The teardown reset never reaches the wire.
        assert!(channel.sent.lock().is_empty());
    }

    #[test]
    fn test_attach_to_detached_channel_fails() {
        let channel = Recorder::default();
        channel.detach();
        let result = source(channel, Arc::new(Store::new()), "ns", SourceOptions::default());
        assert!(matches!(result, Err(StatecastError::Detached)));
    }

    #[test]
    fn test_attach_to_destroyed_store_fails() {
        let store = Arc::new(Store::new());
        store.destroy();

        let channel = Arc::new(Recorder::default());
        let result = source(Arc::clone(&channel), store, "ns", SourceOptions::default());
        assert!(matches!(result, Err(StatecastError::Detached)));
        assert!(channel.handlers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_source_over_ports() {
        let port = Port::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            PortChannel::receive_only(Arc::clone(&port))
                .on_message(Arc::new(move |e: &Envelope| seen.lock().push(e.clone())))
                .unwrap();
        }

        let src = source(
            PortChannel::send_only(Arc::clone(&port)),
            Arc::new(Store::new()),
            "ns",
            SourceOptions::default(),
        )
        .unwrap();
        src.set(&"theme".to_string(), "dark".to_string());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.lock().len(), 1);
        src.detach();
    }
}
