//! Channel contract and peer selection

use std::fmt;
use std::sync::Arc;

use statecast_core::{Detail, Envelope, MessageKind, Namespace, StatecastResult};

/// Inbound message callback
pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Bidirectional message transport between one local context and its peers
///
/// A channel starts attached. `detach` cancels every handler registered
/// through this instance and is terminal; afterwards `send` and `on_message`
/// fail with [`statecast_core::StatecastError::Detached`].
pub trait Channel: Send + Sync {
    /// Deliver an envelope to every configured peer
    fn send(&self, envelope: Envelope) -> StatecastResult<()>;

    /// Register a handler for all inbound envelopes. Handlers see every
    /// namespace and filter for themselves.
    fn on_message(&self, handler: MessageHandler) -> StatecastResult<()>;

    /// Cancel all handlers and stop delivery. Idempotent.
    fn detach(&self);

    fn is_detached(&self) -> bool;

    fn send_message(
        &self,
        kind: MessageKind,
        namespace: &Namespace,
        detail: Detail,
    ) -> StatecastResult<()> {
        self.send(Envelope::new(kind, namespace.clone(), detail))
    }
}

impl<C: Channel + ?Sized> Channel for Arc<C> {
    fn send(&self, envelope: Envelope) -> StatecastResult<()> {
        (**self).send(envelope)
    }

    fn on_message(&self, handler: MessageHandler) -> StatecastResult<()> {
        (**self).on_message(handler)
    }

    fn detach(&self) {
        (**self).detach()
    }

    fn is_detached(&self) -> bool {
        (**self).is_detached()
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&self, envelope: Envelope) -> StatecastResult<()> {
        (**self).send(envelope)
    }

    fn on_message(&self, handler: MessageHandler) -> StatecastResult<()> {
        (**self).on_message(handler)
    }

    fn detach(&self) {
        (**self).detach()
    }

    fn is_detached(&self) -> bool {
        (**self).is_detached()
    }
}

/// Peer selection for outbound messages
pub enum Peers<T> {
    /// Receive-only channel
    None,
    One(T),
    Many(Vec<T>),
    /// Fan-out decided from each outgoing envelope
    Computed(Arc<dyn Fn(&Envelope) -> Vec<T> + Send + Sync>),
}

impl<T: Clone> Peers<T> {
    pub fn computed<F>(select: F) -> Self
    where
        F: Fn(&Envelope) -> Vec<T> + Send + Sync + 'static,
    {
        Peers::Computed(Arc::new(select))
    }

    /// Peers this envelope goes to
    pub fn resolve(&self, envelope: &Envelope) -> Vec<T> {
        match self {
            Peers::None => Vec::new(),
            Peers::One(peer) => vec![peer.clone()],
            Peers::Many(peers) => peers.clone(),
            Peers::Computed(select) => select(envelope),
        }
    }
}

impl<T: Clone> Clone for Peers<T> {
    fn clone(&self) -> Self {
        match self {
            Peers::None => Peers::None,
            Peers::One(peer) => Peers::One(peer.clone()),
            Peers::Many(peers) => Peers::Many(peers.clone()),
            Peers::Computed(select) => Peers::Computed(Arc::clone(select)),
        }
    }
}

impl<T> From<Vec<T>> for Peers<T> {
    fn from(peers: Vec<T>) -> Self {
        Peers::Many(peers)
    }
}

impl<T: fmt::Debug> fmt::Debug for Peers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peers::None => f.write_str("Peers::None"),
            Peers::One(peer) => f.debug_tuple("Peers::One").field(peer).finish(),
            Peers::Many(peers) => f.debug_tuple("Peers::Many").field(peers).finish(),
            Peers::Computed(_) => f.write_str("Peers::Computed(..)"),
        }
    }
}
