//! Time-series snapshot assembly
//!
//! The feed streams history backwards in time, newest first, with transactional
//! flags. [`SnapshotAssembler`] folds that stream into the set of events inside
//! `[from_time, to_time]` and decides completion from the flags and event times.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FeedError, Result};
use crate::events::{EventFlags, MarketEvent, TimeSeriesEvent};
use crate::metrics::FeedMetrics;
use crate::session::Session;

/// Parameters of a one-shot time-series request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub symbol: String,
    /// Inclusive lower bound, epoch millis
    pub from_time: u64,
    /// Inclusive upper bound, epoch millis
    pub to_time: u64,
    /// `Duration::ZERO` waits until completion or disconnect
    pub timeout: Duration,
}

impl SnapshotRequest {
    pub fn new(symbol: impl Into<String>, from_time: u64, to_time: u64) -> Self {
        Self {
            symbol: symbol.into(),
            from_time,
            to_time,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How an assembly ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The stream reached `from_time` or signalled the end of history
    Complete,
    /// Session closed or disconnected first
    Interrupted,
    TimedOut,
}

impl SnapshotOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotOutcome::Complete => "complete",
            SnapshotOutcome::Interrupted => "disconnected",
            SnapshotOutcome::TimedOut => "timeout",
        }
    }
}

/// Folds a backward stream of one time-series kind into a windowed snapshot
pub struct SnapshotAssembler<E> {
    symbol: String,
    from_time: u64,
    to_time: u64,
    events: Mutex<BTreeMap<u64, E>>,
    done: AtomicBool,
    interrupted: AtomicBool,
    notify: Notify,
}

impl<E: TimeSeriesEvent> SnapshotAssembler<E> {
    pub fn new(symbol: impl Into<String>, from_time: u64, to_time: u64) -> Self {
        Self {
            symbol: symbol.into(),
            from_time,
            to_time,
            events: Mutex::new(BTreeMap::new()),
            done: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Fold one event. Events of other kinds are dropped.
    pub fn apply(&self, event: &MarketEvent) {
        let Some(event) = E::from_event(event) else {
            return;
        };

        let mut copy = event.clone();
        let flags = copy.flags();
        let time = copy.time();

        {
            let mut events = self.lock();
            if self.from_time <= time && time <= self.to_time {
                let remove = flags.contains(EventFlags::REMOVE_EVENT);
                copy.set_flags(EventFlags::empty());

                match events.entry(copy.index()) {
                    Entry::Vacant(slot) => {
                        if !remove {
                            slot.insert(copy);
                        }
                    }
                    Entry::Occupied(mut slot) => {
                        if remove {
                            slot.remove();
                        } else {
                            slot.insert(copy);
                        }
                    }
                }
            }
        }

        if time <= self.from_time || flags.contains(EventFlags::SNAPSHOT_SNIP) {
            self.complete();
        }
    }

    /// Mark the assembly finished from outside the stream
    pub fn finish(&self) {
        if !self.done.load(Ordering::SeqCst) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
        self.complete();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Outcome so far; `TimedOut` while still running
    pub fn outcome(&self) -> SnapshotOutcome {
        if !self.is_done() {
            SnapshotOutcome::TimedOut
        } else if self.interrupted.load(Ordering::SeqCst) {
            SnapshotOutcome::Interrupted
        } else {
            SnapshotOutcome::Complete
        }
    }

    /// Wait for completion. Returns false when `timeout` elapsed first.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let completed = async {
            loop {
                let notified = self.notify.notified();
                if self.is_done() {
                    return;
                }
                notified.await;
            }
        };

        if timeout.is_zero() {
            completed.await;
            true
        } else {
            tokio::time::timeout(timeout, completed).await.is_ok()
        }
    }

    /// Take the collected events, most recent first
    pub fn result(&self) -> Vec<E> {
        let events = std::mem::take(&mut *self.lock());
        events.into_values().rev().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn complete(&self) {
        if !self.done.swap(true, Ordering::SeqCst) {
            debug!(symbol = %self.symbol, "Snapshot assembly complete");
        }
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, E>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a request in the background
    pub fn request(session: &Arc<Session>, request: SnapshotRequest) -> JoinHandle<Result<Vec<E>>> {
        let session = Arc::clone(session);
        tokio::spawn(async move { Self::collect(&session, request).await })
    }

    /// Subscribe, fold until done or timed out, tear down and return the events
    pub async fn collect(session: &Session, request: SnapshotRequest) -> Result<Vec<E>> {
        let metrics = FeedMetrics::global();
        let started = Instant::now();

        let channel = session
            .subscribe_time_series(&[E::KIND], request.from_time)
            .map_err(|e| Self::refused(&request, e))?;

        let assembler = Arc::new(Self::new(
            request.symbol.clone(),
            request.from_time,
            request.to_time,
        ));

        let fold = {
            let assembler = Arc::clone(&assembler);
            channel
                .on_event()
                .add_serial(move |event| assembler.apply(event))
        };
        let on_close = {
            let assembler = Arc::clone(&assembler);
            session.on_close().add(move |_| assembler.finish())
        };
        let on_disconnect = {
            let assembler = Arc::clone(&assembler);
            session.on_disconnect().add(move |_| assembler.finish())
        };
        // a notice handled before the listeners above were registered is not replayed
        if session.is_closed() || session.is_disconnected() {
            assembler.finish();
        }

        let subscribed = channel.add_symbol(&request.symbol);
        let completed = match &subscribed {
            Ok(()) => assembler.wait(request.timeout).await,
            Err(_) => false,
        };
        let events = assembler.result();

        channel.on_event().remove(fold);
        session.on_close().remove(on_close);
        session.on_disconnect().remove(on_disconnect);
        channel.close();

        subscribed.map_err(|e| Self::refused(&request, e))?;

        let outcome = if completed {
            assembler.outcome()
        } else {
            SnapshotOutcome::TimedOut
        };
        metrics
            .snapshot_requests
            .with_label_values(&[outcome.as_str()])
            .inc();

        info!(
            kind = %E::KIND,
            symbol = %request.symbol,
            outcome = outcome.as_str(),
            events = events.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Snapshot request finished"
        );

        Ok(events)
    }

    /// Log and count a request the transport would not serve
    fn refused(request: &SnapshotRequest, error: FeedError) -> FeedError {
        warn!(
            kind = %E::KIND,
            symbol = %request.symbol,
            error = %error,
            "Snapshot request failed to subscribe"
        );
        FeedMetrics::global()
            .snapshot_requests
            .with_label_values(&["unavailable"])
            .inc();
        error
    }
}
