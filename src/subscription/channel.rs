//! Subscription channel
//!
//! One transport subscription, its symbol set and the bus that fans its events
//! out. A pump task moves events from the transport sink into the bus one at a
//! time, so delivery order per channel follows arrival order.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::{EventBus, ListenerId};
use crate::error::Result;
use crate::events::{EventKind, KindFilter, MarketEvent};
use crate::transport::{ChannelHandle, ConnectionHandle, EventSink, Transport};

/// Session-local identity of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sizing for channels opened by a session
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelOptions {
    pub ring_capacity: usize,
    pub buffer: usize,
}

struct ChannelState {
    /// `None` once closed
    handle: Option<ChannelHandle>,
    symbols: BTreeSet<String>,
    pump: Option<JoinHandle<()>>,
}

/// Shared part of a channel. [`SubscriptionChannel`] owns it; the session
/// registry only keeps a weak reference.
pub(crate) struct ChannelCore {
    id: ChannelId,
    transport: Arc<dyn Transport>,
    kinds: Vec<EventKind>,
    from_time: Option<u64>,
    bus: Arc<EventBus<MarketEvent>>,
    state: Mutex<ChannelState>,
}

impl ChannelCore {
    /// Open the transport subscription and start the pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        id: ChannelId,
        transport: Arc<dyn Transport>,
        connection: ConnectionHandle,
        kinds: &[EventKind],
        from_time: Option<u64>,
        options: ChannelOptions,
    ) -> Result<Arc<Self>> {
        let (sink, mut rx) = EventSink::channel(options.buffer);
        let handle = transport.open_channel(connection, kinds, from_time, sink)?;

        let bus = Arc::new(
            EventBus::with_capacity(options.ring_capacity).named(format!("channel-{}", id)),
        );

        let pump_bus = Arc::clone(&bus);
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = pump_bus.dispatch(event).await;
            }
            debug!(bus = %pump_bus.name(), "Channel pump finished");
        });

        info!(
            channel = %id,
            handle = %handle,
            kinds = ?kinds,
            from_time = ?from_time,
            "Subscription channel opened"
        );

        Ok(Arc::new(Self {
            id,
            transport,
            kinds: kinds.to_vec(),
            from_time,
            bus,
            state: Mutex::new(ChannelState {
                handle: Some(handle),
                symbols: BTreeSet::new(),
                pump: Some(pump),
            }),
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.lock().handle.is_none()
    }

    /// Release the transport subscription and drop every listener.
    /// Returns false when already closed.
    pub fn close(&self) -> bool {
        let handle = {
            let mut state = self.lock();
            let Some(handle) = state.handle.take() else {
                return false;
            };

            self.transport.close_channel(handle);
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            state.symbols.clear();
            handle
        };

        // outside the state lock: a released listener may hold the last session reference
        self.bus.clear();

        info!(channel = %self.id, handle = %handle, "Subscription channel closed");
        true
    }

    /// Run a transport call against the open handle; no-op once closed
    fn mutate<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&dyn Transport, ChannelHandle, &mut BTreeSet<String>) -> Result<()>,
    {
        let mut state = self.lock();
        let ChannelState {
            handle, symbols, ..
        } = &mut *state;

        match handle {
            Some(handle) => op(self.transport.as_ref(), *handle, symbols),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A live subscription for a set of symbols. Closed on drop.
pub struct SubscriptionChannel {
    core: Arc<ChannelCore>,
}

impl SubscriptionChannel {
    pub(crate) fn new(core: Arc<ChannelCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> ChannelId {
        self.core.id
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.core.kinds
    }

    /// Start of requested history for time-series channels
    pub fn from_time(&self) -> Option<u64> {
        self.core.from_time
    }

    /// Bus carrying every event of this subscription
    pub fn on_event(&self) -> &EventBus<MarketEvent> {
        &self.core.bus
    }

    /// Register a listener for one concrete event kind; other kinds are skipped
    pub fn on<T, F>(&self, listener: F) -> ListenerId
    where
        T: KindFilter + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core.bus.add(move |event: &MarketEvent| {
            if let Some(event) = T::from_event(event) {
                listener(event);
            }
        })
    }

    pub fn add_symbol(&self, symbol: &str) -> Result<()> {
        self.add_symbols([symbol])
    }

    pub fn add_symbols<I, S>(&self, symbols: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        self.core.mutate(|transport, handle, current| {
            transport.add_symbols(handle, &symbols)?;
            current.extend(symbols.iter().cloned());
            debug!(channel = %self.id(), symbols = ?symbols, "Symbols added");
            Ok(())
        })
    }

    pub fn remove_symbol(&self, symbol: &str) -> Result<()> {
        self.remove_symbols([symbol])
    }

    pub fn remove_symbols<I, S>(&self, symbols: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        self.core.mutate(|transport, handle, current| {
            transport.remove_symbols(handle, &symbols)?;
            for symbol in &symbols {
                current.remove(symbol);
            }
            debug!(channel = %self.id(), symbols = ?symbols, "Symbols removed");
            Ok(())
        })
    }

    /// Replace the whole symbol set
    pub fn set_symbols<I, S>(&self, symbols: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        self.core.mutate(|transport, handle, current| {
            transport.set_symbols(handle, &symbols)?;
            *current = symbols.iter().cloned().collect();
            debug!(channel = %self.id(), symbols = ?symbols, "Symbols set");
            Ok(())
        })
    }

    pub fn clear_symbols(&self) -> Result<()> {
        self.core.mutate(|transport, handle, current| {
            transport.clear_symbols(handle)?;
            current.clear();
            debug!(channel = %self.id(), "Symbols cleared");
            Ok(())
        })
    }

    /// Subscribed symbols as tracked locally
    pub fn symbols(&self) -> BTreeSet<String> {
        self.core.lock().symbols.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Release the subscription. Safe to call any number of times.
    pub fn close(&self) {
        self.core.close();
    }
}

impl Drop for SubscriptionChannel {
    fn drop(&mut self) {
        self.core.close();
    }
}

impl fmt::Debug for SubscriptionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionChannel")
            .field("id", &self.core.id)
            .field("kinds", &self.core.kinds)
            .field("from_time", &self.core.from_time)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::events::{Quote, Trade};
    use crate::transport::{InMemoryTransport, MockTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const OPTIONS: ChannelOptions = ChannelOptions {
        ring_capacity: 16,
        buffer: 16,
    };

    fn open_memory(transport: &Arc<InMemoryTransport>, kinds: &[EventKind]) -> SubscriptionChannel {
        let (notices, _rx) = crate::transport::ConnectionSink::channel();
        let conn = transport.connect("demo:7300", notices).unwrap();
        let core = ChannelCore::open(
            ChannelId(1),
            transport.clone(),
            conn,
            kinds,
            None,
            OPTIONS,
        )
        .unwrap();
        SubscriptionChannel::new(core)
    }

    #[tokio::test]
    async fn test_close_releases_transport_once() {
        let mut transport = MockTransport::new();
        transport
            .expect_open_channel()
            .times(1)
            .returning(|_, _, _, _| Ok(ChannelHandle(7)));
        transport
            .expect_close_channel()
            .withf(|handle| *handle == ChannelHandle(7))
            .times(1)
            .return_const(());

        let core = ChannelCore::open(
            ChannelId(1),
            Arc::new(transport),
            ConnectionHandle(1),
            &[EventKind::Quote],
            None,
            OPTIONS,
        )
        .unwrap();
        let channel = SubscriptionChannel::new(core);

        channel.close();
        channel.close();
        assert!(channel.is_closed());
        drop(channel);
    }

    #[tokio::test]
    async fn test_close_drops_listeners() {
        let transport = Arc::new(InMemoryTransport::new());
        let channel = open_memory(&transport, &[EventKind::Quote]);

        let held = Arc::new(());
        let h = held.clone();
        channel.on_event().add(move |_| {
            let _ = &h;
        });
        channel.on::<Quote, _>(|_| {});
        assert_eq!(channel.on_event().len(), 2);

        channel.close();
        assert!(channel.on_event().is_empty());
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[tokio::test]
    async fn test_concurrent_close_releases_once() {
        let transport = Arc::new(InMemoryTransport::new());
        let channel = Arc::new(open_memory(&transport, &[EventKind::Quote]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let channel = channel.clone();
                std::thread::spawn(move || channel.close())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(transport.channel_closes(), 1);
        drop(channel);
        assert_eq!(transport.channel_closes(), 1);
    }

    #[tokio::test]
    async fn test_operations_after_close_are_noops() {
        let mut transport = MockTransport::new();
        transport
            .expect_open_channel()
            .returning(|_, _, _, _| Ok(ChannelHandle(3)));
        transport
            .expect_add_symbols()
            .times(1)
            .returning(|_, _| Ok(()));
        transport.expect_close_channel().times(1).return_const(());

        let core = ChannelCore::open(
            ChannelId(2),
            Arc::new(transport),
            ConnectionHandle(1),
            &[EventKind::Trade],
            None,
            OPTIONS,
        )
        .unwrap();
        let channel = SubscriptionChannel::new(core);

        channel.add_symbol("AAPL").unwrap();
        channel.close();

        assert!(channel.add_symbol("IBM").is_ok());
        assert!(channel.set_symbols(["MSFT"]).is_ok());
        assert!(channel.clear_symbols().is_ok());
        assert!(channel.symbols().is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_is_surfaced() {
        let mut transport = MockTransport::new();
        transport
            .expect_open_channel()
            .returning(|_, _, _, _| Err(FeedError::TransportUnavailable("down".into())));

        let result = ChannelCore::open(
            ChannelId(1),
            Arc::new(transport),
            ConnectionHandle(1),
            &[EventKind::Quote],
            None,
            OPTIONS,
        );
        assert!(matches!(result, Err(FeedError::TransportUnavailable(_))));
    }

    #[tokio::test]
    async fn test_symbol_set_tracking() {
        let transport = Arc::new(InMemoryTransport::new());
        let channel = open_memory(&transport, &[EventKind::Quote]);

        channel.add_symbols(["AAPL", "IBM"]).unwrap();
        channel.remove_symbol("IBM").unwrap();
        channel.add_symbol("MSFT").unwrap();
        assert_eq!(
            channel.symbols().into_iter().collect::<Vec<_>>(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );

        channel.set_symbols(vec!["GOOG".to_string()]).unwrap();
        assert_eq!(channel.symbols().len(), 1);
        assert!(channel.symbols().contains("GOOG"));

        channel.clear_symbols().unwrap();
        assert!(channel.symbols().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_events_are_forwarded_to_bus() {
        let transport = Arc::new(InMemoryTransport::new());
        let channel = open_memory(&transport, &[EventKind::Quote, EventKind::Trade]);
        channel.add_symbol("AAPL").unwrap();

        let quotes = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let q = quotes.clone();
        channel.on::<Quote, _>(move |quote| {
            assert_eq!(quote.symbol, "AAPL");
            q.fetch_add(1, Ordering::SeqCst);
        });
        let a = all.clone();
        channel.on_event().add(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        transport.publish(Quote::new("AAPL").into()).await;
        transport.publish(Trade::new("AAPL").into()).await;
        transport.publish(Quote::new("AAPL").into()).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while all.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        channel.on_event().drain().await;

        assert_eq!(quotes.load(Ordering::SeqCst), 2);
        assert_eq!(all.load(Ordering::SeqCst), 3);
    }
}
