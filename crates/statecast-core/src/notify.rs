//! Synchronous notification fan-out
//!
//! A [`Notifier`] delivers events to its listeners on the caller's stack.
//! Listeners are registered against an [`AbortHandle`]; aborting the handle
//! unregisters every listener added through it in one step.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Listener callback
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Cancellation handle shared by a group of listeners
#[derive(Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        AbortHandle::default()
    }

    /// Abort the group. Returns true only for the call that performed it.
    pub fn abort(&self) -> bool {
        !self.aborted.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

struct Listener<E> {
    handler: Handler<E>,
    signal: AbortHandle,
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Listener {
            handler: Arc::clone(&self.handler),
            signal: self.signal.clone(),
        }
    }
}

struct NotifierState<E> {
    listeners: Vec<Listener<E>>,
    closed: bool,
}

/// Event fan-out to registered listeners
pub struct Notifier<E> {
    state: Mutex<NotifierState<E>>,
}

impl<E> Notifier<E> {
    pub fn new() -> Self {
        Notifier {
            state: Mutex::new(NotifierState {
                listeners: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Register a listener. Returns false if the notifier is already closed
    /// or the signal already aborted.
    pub fn subscribe<F>(&self, signal: &AbortHandle, handler: F) -> bool
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_handler(signal, Arc::new(handler))
    }

    pub fn subscribe_handler(&self, signal: &AbortHandle, handler: Handler<E>) -> bool {
        let mut state = self.state.lock();
        if state.closed || signal.is_aborted() {
            return false;
        }
        state.listeners.retain(|l| !l.signal.is_aborted());
        state.listeners.push(Listener {
            handler,
            signal: signal.clone(),
        });
        true
    }

    /// Deliver an event to every live listener, returning how many ran.
    ///
    /// The listener list is snapshotted before dispatch, so handlers may
    /// subscribe, abort, or emit again without deadlocking.
    pub fn emit(&self, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.listeners.retain(|l| !l.signal.is_aborted());
            state.listeners.clone()
        };

        let mut delivered = 0;
        for listener in snapshot {
            // A handler earlier in this dispatch may have aborted this one.
            if listener.signal.is_aborted() {
                continue;
            }
            (listener.handler)(event);
            delivered += 1;
        }
        delivered
    }

    /// Permanently drop all listeners; later subscriptions are refused.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of listeners whose signal is still live
    pub fn listener_count(&self) -> usize {
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|l| !l.signal.is_aborted())
            .count()
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Notifier")
            .field("listeners", &state.listeners.len())
            .field("closed", &state.closed)
            .finish()
    }
}
