//! In-process message ports
//!
//! A [`Port`] is one receiving context: messages posted to it are queued and
//! dispatched to its listeners by a background task, so delivery always
//! happens on a later scheduler turn than the send. Messages from one sender
//! to one port arrive in send order.
//!
//! A [`PortChannel`] receives on one port and sends to a set of peer ports.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use statecast_core::{AbortHandle, Envelope, Notifier, StatecastError, StatecastResult};

use crate::{Channel, MessageHandler, Peers};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// Port identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PortId(pub u64);

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A receiving context with an asynchronous inbox
pub struct Port {
    id: PortId,
    inbox: mpsc::UnboundedSender<Envelope>,
    listeners: Arc<Notifier<Envelope>>,
}

impl Port {
    /// Create a port and start its dispatch task.
    ///
    /// Must be called from within a tokio runtime. The task ends once the
    /// port is dropped.
    pub fn spawn() -> Arc<Port> {
        let id = PortId(NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let listeners = Arc::new(Notifier::new());

        let dispatch = Arc::clone(&listeners);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let delivered = dispatch.emit(&envelope);
                tracing::trace!(port = %id, kind = %envelope.kind, delivered, "port dispatch");
            }
            tracing::trace!(port = %id, "port dispatch loop finished");
        });

        Arc::new(Port {
            id,
            inbox: tx,
            listeners,
        })
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    /// Queue an envelope for this port's listeners
    pub fn post(&self, envelope: Envelope) -> StatecastResult<()> {
        self.inbox
            .send(envelope)
            .map_err(|_| StatecastError::PeerClosed(self.id.to_string()))
    }

    pub fn add_listener(&self, signal: &AbortHandle, handler: MessageHandler) -> bool {
        self.listeners.subscribe_handler(signal, handler)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.listener_count()
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl From<Arc<Port>> for Peers<Arc<Port>> {
    fn from(port: Arc<Port>) -> Self {
        Peers::One(port)
    }
}

/// Channel over in-process ports
#[derive(Debug)]
pub struct PortChannel {
    receiver: Option<Arc<Port>>,
    peers: Peers<Arc<Port>>,
    signal: AbortHandle,
}

impl PortChannel {
    pub fn new(receiver: Arc<Port>, peers: impl Into<Peers<Arc<Port>>>) -> Self {
        PortChannel {
            receiver: Some(receiver),
            peers: peers.into(),
            signal: AbortHandle::new(),
        }
    }

    /// Receive and send on the same port, like a context messaging itself
    pub fn loopback(port: Arc<Port>) -> Self {
        Self::new(Arc::clone(&port), port)
    }

    pub fn receive_only(receiver: Arc<Port>) -> Self {
        Self::new(receiver, Peers::None)
    }

    pub fn send_only(peers: impl Into<Peers<Arc<Port>>>) -> Self {
        PortChannel {
            receiver: None,
            peers: peers.into(),
            signal: AbortHandle::new(),
        }
    }

    pub fn receiver(&self) -> Option<&Arc<Port>> {
        self.receiver.as_ref()
    }
}

impl Channel for PortChannel {
    fn send(&self, envelope: Envelope) -> StatecastResult<()> {
        if self.signal.is_aborted() {
            return Err(StatecastError::Detached);
        }

        let mut result = Ok(());
        for peer in self.peers.resolve(&envelope) {
            tracing::trace!(peer = %peer.id(), kind = %envelope.kind, namespace = %envelope.namespace, "post");
            if let Err(e) = peer.post(envelope.clone()) {
                tracing::warn!("Port send failed: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn on_message(&self, handler: MessageHandler) -> StatecastResult<()> {
        if self.signal.is_aborted() {
            return Err(StatecastError::Detached);
        }
        if let Some(receiver) = &self.receiver {
            receiver.add_listener(&self.signal, handler);
        }
        Ok(())
    }

    fn detach(&self) {
        if self.signal.abort() {
            tracing::debug!(
                receiver = ?self.receiver.as_ref().map(|p| p.id()),
                "port channel detached"
            );
        }
    }

    fn is_detached(&self) -> bool {
        self.signal.is_aborted()
    }
}
