//! Listener registry
//!
//! Maps opaque ids to callbacks. Dispatch works on a snapshot of the live
//! entries, so removal never races with an invocation already handed out.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};

/// Shared listener callback
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifier returned by [`super::EventBus::add`]; unique per bus, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One queued invocation of a serial listener
pub(crate) struct SerialJob<E> {
    pub event: Arc<E>,
    /// Resolved with `true` when the callback returned, `false` when it panicked
    pub ack: oneshot::Sender<bool>,
}

pub(crate) enum Listener<E> {
    /// Every invocation runs on its own blocking task
    Concurrent(Callback<E>),
    /// Invocations are queued to a dedicated worker and run in dispatch order
    Serial(mpsc::UnboundedSender<SerialJob<E>>),
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        match self {
            Listener::Concurrent(callback) => Listener::Concurrent(Arc::clone(callback)),
            Listener::Serial(tx) => Listener::Serial(tx.clone()),
        }
    }
}

pub(crate) struct ListenerRegistry<E> {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<ListenerId, Listener<E>>>,
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().insert(id, listener);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Drop every listener, returning how many were registered.
    /// Callbacks are released after the lock is let go.
    pub fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.write());
        removed.len()
    }

    /// Clone out the live listeners, ordered by registration
    pub fn snapshot(&self) -> Vec<(ListenerId, Listener<E>)> {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut live: Vec<_> = listeners
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();
        live.sort_unstable_by_key(|(id, _)| *id);
        live
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ListenerId, Listener<E>>> {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
