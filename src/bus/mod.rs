//! Multicast event bus
//!
//! Fans every dispatched event out to all registered listeners. Listeners can
//! attach and detach at any time. Outstanding dispatches are tracked in a
//! fixed-capacity ring; once the ring is full the next dispatch waits for the
//! oldest one, which bounds the concurrent work a fast producer can create.

mod registry;

pub use registry::{Callback, ListenerId};

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::metrics::FeedMetrics;
use registry::{Listener, ListenerRegistry, SerialJob};

/// Default number of outstanding dispatches
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// Result of one dispatch once every listener invocation has finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Invocations that returned normally
    pub delivered: usize,
    /// Invocations that panicked
    pub failed: usize,
}

/// Joinable handle of one dispatch; producers are free to drop it
pub type Completion = Shared<BoxFuture<'static, DispatchOutcome>>;

struct InFlight {
    completion: Completion,
    task: AbortHandle,
}

enum Invocation {
    Delivered,
    Failed(ListenerId),
    /// Listener was removed before its worker accepted the event
    Skipped,
}

/// Thread-safe multicast dispatcher
pub struct EventBus<E> {
    name: String,
    registry: ListenerRegistry<E>,
    in_flight: Mutex<VecDeque<InFlight>>,
    capacity: usize,
}

impl<E> EventBus<E>
where
    E: Send + Sync + 'static,
{
    /// Create a bus with the default ring capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    /// Create a bus that keeps at most `capacity` dispatches in flight
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: String::from("bus"),
            registry: ListenerRegistry::new(),
            in_flight: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Name used in log records
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a listener whose invocations may run in parallel with each other
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.insert(Listener::Concurrent(Arc::new(listener)));
        debug!(bus = %self.name, listener = %id, "Listener added");
        id
    }

    /// Register a listener that observes events one at a time, in dispatch order.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_serial<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let callback: Callback<E> = Arc::new(listener);
        let (tx, mut rx) = mpsc::unbounded_channel::<SerialJob<E>>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let callback = Arc::clone(&callback);
                let event = job.event;
                let ok = tokio::task::spawn_blocking(move || callback(&event))
                    .await
                    .is_ok();
                let _ = job.ack.send(ok);
            }
        });

        let id = self.registry.insert(Listener::Serial(tx));
        debug!(bus = %self.name, listener = %id, "Serial listener added");
        id
    }

    /// Unregister a listener; unknown ids are ignored
    pub fn remove(&self, id: ListenerId) {
        if self.registry.remove(id) {
            debug!(bus = %self.name, listener = %id, "Listener removed");
        }
    }

    /// Unregister every listener. Dispatches already in flight still finish.
    pub fn clear(&self) {
        let removed = self.registry.clear();
        if removed > 0 {
            debug!(bus = %self.name, listeners = removed, "Listeners cleared");
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of dispatches that have not finished yet
    pub async fn in_flight(&self) -> usize {
        let mut ring = self.in_flight.lock().await;
        ring.retain(|f| !f.task.is_finished());
        ring.len()
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// Suspends only while the ring is full, until the oldest outstanding
    /// dispatch completes. Listener failures are logged, never returned.
    pub async fn dispatch(&self, event: E) -> Completion {
        let mut ring = self.in_flight.lock().await;
        ring.retain(|f| !f.task.is_finished());

        if ring.len() >= self.capacity {
            if let Some(oldest) = ring.pop_front() {
                FeedMetrics::global().backpressure_waits.inc();
                trace!(bus = %self.name, capacity = self.capacity, "Dispatch ring full, waiting");
                oldest.completion.await;
            }
        }

        let listeners = self.registry.snapshot();
        let event = Arc::new(event);
        let mut pending: Vec<BoxFuture<'static, Invocation>> = Vec::with_capacity(listeners.len());

        for (id, listener) in listeners {
            match listener {
                Listener::Concurrent(callback) => {
                    let event = Arc::clone(&event);
                    let handle = tokio::task::spawn_blocking(move || callback(&event));
                    pending.push(
                        async move {
                            match handle.await {
                                Ok(()) => Invocation::Delivered,
                                Err(_) => Invocation::Failed(id),
                            }
                        }
                        .boxed(),
                    );
                }
                Listener::Serial(tx) => {
                    let (ack, done) = oneshot::channel();
                    let job = SerialJob {
                        event: Arc::clone(&event),
                        ack,
                    };
                    if tx.send(job).is_ok() {
                        pending.push(
                            async move {
                                match done.await {
                                    Ok(true) => Invocation::Delivered,
                                    Ok(false) => Invocation::Failed(id),
                                    Err(_) => Invocation::Skipped,
                                }
                            }
                            .boxed(),
                        );
                    }
                }
            }
        }

        FeedMetrics::global().dispatched_events.inc();

        let name = self.name.clone();
        let task = tokio::spawn(async move {
            let mut outcome = DispatchOutcome::default();
            for invocation in join_all(pending).await {
                match invocation {
                    Invocation::Delivered => outcome.delivered += 1,
                    Invocation::Failed(id) => {
                        outcome.failed += 1;
                        FeedMetrics::global().listener_failures.inc();
                        warn!(bus = %name, listener = %id, "Listener panicked during dispatch");
                    }
                    Invocation::Skipped => {}
                }
            }
            outcome
        });

        let abort = task.abort_handle();
        let completion = async move { task.await.unwrap_or_default() }
            .boxed()
            .shared();

        ring.push_back(InFlight {
            completion: completion.clone(),
            task: abort,
        });

        completion
    }

    /// Wait for every outstanding dispatch to finish
    pub async fn drain(&self) {
        let pending: Vec<Completion> = {
            let ring = self.in_flight.lock().await;
            ring.iter().map(|f| f.completion.clone()).collect()
        };
        join_all(pending).await;
    }
}

impl<E> Default for EventBus<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
