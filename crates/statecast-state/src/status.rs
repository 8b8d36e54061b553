//! Futures with an observable status
//!
//! A [`StatusFuture`] is a shared handle to a value that is either still
//! pending or already fulfilled. The status and the resolved value can be
//! inspected without awaiting. Clones share one slot, so handle identity
//! ([`StatusFuture::ptr_eq`]) is meaningful: the store hands out the same
//! slot until it mints a new generation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

/// Resolution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
}

struct Slot<V> {
    value: Option<V>,
    waiters: Vec<Waker>,
}

/// Shared, clonable future carrying its own status
pub struct StatusFuture<V> {
    slot: Arc<Mutex<Slot<V>>>,
}

impl<V> StatusFuture<V> {
    pub(crate) fn pending() -> Self {
        StatusFuture {
            slot: Arc::new(Mutex::new(Slot {
                value: None,
                waiters: Vec::new(),
            })),
        }
    }

    pub(crate) fn fulfilled(value: V) -> Self {
        StatusFuture {
            slot: Arc::new(Mutex::new(Slot {
                value: Some(value),
                waiters: Vec::new(),
            })),
        }
    }

    pub fn status(&self) -> Status {
        if self.slot.lock().value.is_some() {
            Status::Fulfilled
        } else {
            Status::Pending
        }
    }

    #[inline]
    pub fn is_fulfilled(&self) -> bool {
        self.status() == Status::Fulfilled
    }

    /// Do both handles refer to the same future?
    #[inline]
    pub fn ptr_eq(&self, other: &StatusFuture<V>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Number of tasks currently parked on this future
    pub fn waiter_count(&self) -> usize {
        self.slot.lock().waiters.len()
    }

    /// Fulfil a pending future and wake its waiters.
    /// Returns false if it was already fulfilled.
    pub(crate) fn resolve(&self, value: V) -> bool {
        let waiters = {
            let mut slot = self.slot.lock();
            if slot.value.is_some() {
                return false;
            }
            slot.value = Some(value);
            std::mem::take(&mut slot.waiters)
        };

        for waker in waiters {
            waker.wake();
        }
        true
    }

    /// Drop every parked waker without waking it. The future stays pending.
    pub(crate) fn abandon(&self) -> usize {
        let mut slot = self.slot.lock();
        let dropped = slot.waiters.len();
        slot.waiters.clear();
        dropped
    }
}

impl<V: PartialEq> StatusFuture<V> {
    /// Is this future fulfilled with a value equal to `value`?
    pub fn holds(&self, value: &V) -> bool {
        self.slot.lock().value.as_ref() == Some(value)
    }
}

impl<V: Clone> StatusFuture<V> {
    /// Resolved value, if any
    pub fn value(&self) -> Option<V> {
        self.slot.lock().value.clone()
    }
}

impl<V> Clone for StatusFuture<V> {
    fn clone(&self) -> Self {
        StatusFuture {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<V: Clone> Future for StatusFuture<V> {
    type Output = V;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<V> {
        let mut slot = self.slot.lock();
        if let Some(value) = &slot.value {
            return Poll::Ready(value.clone());
        }
        if !slot.waiters.iter().any(|w| w.will_wake(cx.waker())) {
            slot.waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<V> fmt::Debug for StatusFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        let status = if slot.value.is_some() {
            Status::Fulfilled
        } else {
            Status::Pending
        };
        f.debug_struct("StatusFuture")
            .field("status", &status)
            .field("waiters", &slot.waiters.len())
            .finish()
    }
}

/// Outcome of a synchronous-or-asynchronous read
#[derive(Debug, Clone)]
pub enum Read<V> {
    /// The value was already available
    Ready(V),
    /// The value is not available yet; await the future
    Pending(StatusFuture<V>),
}

impl<V: Clone> Read<V> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Read::Ready(_))
    }

    /// The value if it was available synchronously
    pub fn ready(self) -> Option<V> {
        match self {
            Read::Ready(value) => Some(value),
            Read::Pending(_) => None,
        }
    }

    /// Wait for the value, whichever way it is available
    pub async fn wait(self) -> V {
        match self {
            Read::Ready(value) => value,
            Read::Pending(future) => future.await,
        }
    }
}

impl<V: Clone> From<StatusFuture<V>> for Read<V> {
    fn from(future: StatusFuture<V>) -> Self {
        match future.value() {
            Some(value) => Read::Ready(value),
            None => Read::Pending(future),
        }
    }
}
