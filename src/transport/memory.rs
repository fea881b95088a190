//! In-process transport
//!
//! Simulates a feed: keeps per-symbol history for time-series kinds and replays
//! it the way a live server does, newest first from "now" back to the requested
//! start time, on a thread of its own. Live events are routed with `publish`.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{
    ChannelHandle, ConnectionHandle, ConnectionNotice, ConnectionSink, ConnectionStatus,
    EventSink, StatusChange, Transport,
};
use crate::error::{FeedError, Result};
use crate::events::{Candle, EventFlags, EventKind, Greeks, MarketEvent, TimeAndSale};

struct ConnectionEntry {
    address: String,
    notices: ConnectionSink,
    status: ConnectionStatus,
}

struct ChannelEntry {
    connection: ConnectionHandle,
    kinds: Vec<EventKind>,
    from_time: Option<u64>,
    symbols: BTreeSet<String>,
    sink: EventSink,
}

#[derive(Default)]
struct MemoryState {
    connections: HashMap<ConnectionHandle, ConnectionEntry>,
    channels: HashMap<ChannelHandle, ChannelEntry>,
    history: HashMap<(EventKind, String), Vec<MarketEvent>>,
}

/// Simulated transport
pub struct InMemoryTransport {
    next_id: AtomicU64,
    available: AtomicBool,
    state: Mutex<MemoryState>,
    channel_closes: AtomicUsize,
    disconnects: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            state: Mutex::new(MemoryState::default()),
            channel_closes: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// When unavailable, `connect` and `open_channel` are refused
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Store a time-series event for later replay.
    ///
    /// A history event with the same index replaces the stored one.
    pub fn add_history(&self, event: MarketEvent) {
        let Some(index) = event.index() else {
            warn!(kind = %event.kind(), "Ignoring history for non-indexed event");
            return;
        };

        let key = (event.kind(), event.symbol().to_string());
        let mut state = self.lock();
        let history = state.history.entry(key).or_default();
        history.retain(|e| e.index() != Some(index));
        history.push(event);
    }

    pub fn extend_history<I>(&self, events: I)
    where
        I: IntoIterator<Item = MarketEvent>,
    {
        for event in events {
            self.add_history(event);
        }
    }

    /// Deliver a live event to every open channel subscribed to its kind and symbol.
    ///
    /// Returns the number of channels that accepted it.
    pub async fn publish(&self, event: MarketEvent) -> usize {
        let sinks: Vec<EventSink> = {
            let state = self.lock();
            state
                .channels
                .values()
                .filter(|c| c.kinds.contains(&event.kind()) && c.symbols.contains(event.symbol()))
                .map(|c| c.sink.clone())
                .collect()
        };

        let mut delivered = 0;
        for sink in sinks {
            if sink.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Simulate a dropped connection
    pub fn drop_connection(&self, connection: ConnectionHandle) {
        let mut state = self.lock();
        if let Some(entry) = state.connections.get_mut(&connection) {
            let old = entry.status;
            entry.status = ConnectionStatus::NotConnected;
            let _ = entry.notices.notify(ConnectionNotice::Disconnected);
            let _ = entry.notices.notify(ConnectionNotice::StatusChanged(StatusChange {
                old,
                new: ConnectionStatus::NotConnected,
            }));
            info!(address = %entry.address, "Simulated connection drop");
        }
    }

    /// Simulate a status transition
    pub fn change_status(&self, connection: ConnectionHandle, new: ConnectionStatus) {
        let mut state = self.lock();
        if let Some(entry) = state.connections.get_mut(&connection) {
            let old = entry.status;
            entry.status = new;
            let _ = entry
                .notices
                .notify(ConnectionNotice::StatusChanged(StatusChange { old, new }));
        }
    }

    pub fn connections(&self) -> Vec<ConnectionHandle> {
        let mut handles: Vec<_> = self.lock().connections.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Open channels across all connections
    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// Symbols currently subscribed on a channel
    pub fn symbols(&self, channel: ChannelHandle) -> Option<BTreeSet<String>> {
        self.lock().channels.get(&channel).map(|c| c.symbols.clone())
    }

    /// Number of `close_channel` calls received
    pub fn channel_closes(&self) -> usize {
        self.channel_closes.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls received
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start history replay for symbols newly added to a time-series channel
    fn replay_added(state: &MemoryState, channel: &ChannelEntry, added: &[String]) {
        let Some(from_time) = channel.from_time else {
            return;
        };

        for kind in channel.kinds.iter().copied().filter(|k| k.is_time_series()) {
            for symbol in added {
                let history = state
                    .history
                    .get(&(kind, symbol.clone()))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let events = replay_sequence(kind, symbol, history, from_time);
                let sink = channel.sink.clone();
                let name = format!("replay-{}-{}", kind, symbol);

                debug!(kind = %kind, symbol = %symbol, events = events.len(), "Replaying history");

                let spawned = std::thread::Builder::new().name(name).spawn(move || {
                    for event in events {
                        if sink.blocking_send(event).is_err() {
                            break;
                        }
                    }
                });
                if let Err(e) = spawned {
                    warn!(error = %e, "Failed to start history replay");
                }
            }
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self, address: &str, notices: ConnectionSink) -> Result<ConnectionHandle> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(FeedError::TransportUnavailable(format!(
                "cannot connect to {}",
                address
            )));
        }

        let handle = ConnectionHandle(self.next_id());
        let _ = notices.notify(ConnectionNotice::StatusChanged(StatusChange {
            old: ConnectionStatus::NotConnected,
            new: ConnectionStatus::Connected,
        }));

        self.lock().connections.insert(
            handle,
            ConnectionEntry {
                address: address.to_string(),
                notices,
                status: ConnectionStatus::Connected,
            },
        );

        info!(address = %address, "In-memory connection opened");
        Ok(handle)
    }

    fn disconnect(&self, connection: ConnectionHandle) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);

        let mut state = self.lock();
        state.connections.remove(&connection);
        state.channels.retain(|_, c| c.connection != connection);
    }

    fn open_channel(
        &self,
        connection: ConnectionHandle,
        kinds: &[EventKind],
        from_time: Option<u64>,
        sink: EventSink,
    ) -> Result<ChannelHandle> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(FeedError::TransportUnavailable(
                "subscription refused".to_string(),
            ));
        }

        let mut state = self.lock();
        if !state.connections.contains_key(&connection) {
            return Err(FeedError::TransportUnavailable(
                "connection is not open".to_string(),
            ));
        }

        let handle = ChannelHandle(self.next_id());
        state.channels.insert(
            handle,
            ChannelEntry {
                connection,
                kinds: kinds.to_vec(),
                from_time,
                symbols: BTreeSet::new(),
                sink,
            },
        );
        Ok(handle)
    }

    fn add_symbols(&self, channel: ChannelHandle, symbols: &[String]) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(FeedError::ChannelClosed)?;

        let added: Vec<String> = symbols
            .iter()
            .filter(|s| entry.symbols.insert((*s).clone()))
            .cloned()
            .collect();

        let state = &*state;
        if let Some(entry) = state.channels.get(&channel) {
            Self::replay_added(state, entry, &added);
        }
        Ok(())
    }

    fn remove_symbols(&self, channel: ChannelHandle, symbols: &[String]) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(FeedError::ChannelClosed)?;
        for symbol in symbols {
            entry.symbols.remove(symbol);
        }
        Ok(())
    }

    fn set_symbols(&self, channel: ChannelHandle, symbols: &[String]) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(FeedError::ChannelClosed)?;

        let next: BTreeSet<String> = symbols.iter().cloned().collect();
        let added: Vec<String> = next.difference(&entry.symbols).cloned().collect();
        entry.symbols = next;

        let state = &*state;
        if let Some(entry) = state.channels.get(&channel) {
            Self::replay_added(state, entry, &added);
        }
        Ok(())
    }

    fn clear_symbols(&self, channel: ChannelHandle) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(FeedError::ChannelClosed)?;
        entry.symbols.clear();
        Ok(())
    }

    fn close_channel(&self, channel: ChannelHandle) {
        self.channel_closes.fetch_add(1, Ordering::SeqCst);
        self.lock().channels.remove(&channel);
    }
}

/// Order history the way a server streams it: newest first down to `from_time`,
/// plus the first older event when one exists. Without an older event the last
/// delivered one is marked `SNAPSHOT_SNIP`.
fn replay_sequence(
    kind: EventKind,
    symbol: &str,
    history: &[MarketEvent],
    from_time: u64,
) -> Vec<MarketEvent> {
    let mut sorted: Vec<MarketEvent> = history.to_vec();
    sorted.sort_by(|a, b| {
        b.time()
            .cmp(&a.time())
            .then_with(|| b.index().cmp(&a.index()))
    });

    let in_range = sorted.iter().take_while(|e| e.time() >= from_time).count();
    let overshoot = sorted.get(in_range).cloned();
    sorted.truncate(in_range);

    match overshoot {
        Some(older) => sorted.push(older),
        None => match sorted.last_mut() {
            Some(last) => {
                let mut flags = last.flags();
                flags.insert(EventFlags::SNAPSHOT_SNIP);
                last.set_flags(flags);
            }
            None => sorted.extend(empty_snapshot(kind, symbol)),
        },
    }

    if let Some(first) = sorted.first_mut() {
        let mut flags = first.flags();
        flags.insert(EventFlags::SNAPSHOT_BEGIN);
        first.set_flags(flags);
    }

    sorted
}

/// Marker sent when a symbol has no history at all
fn empty_snapshot(kind: EventKind, symbol: &str) -> Option<MarketEvent> {
    let mut event: MarketEvent = match kind {
        EventKind::TimeAndSale => TimeAndSale::new(symbol, 0, 0).into(),
        EventKind::Candle => Candle::new(symbol, 0, 0).into(),
        EventKind::Greeks => Greeks::new(symbol, 0, 0).into(),
        _ => return None,
    };
    event.set_flags(EventFlags::REMOVE_EVENT | EventFlags::SNAPSHOT_SNIP);
    Some(event)
}
