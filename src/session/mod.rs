//! Session lifecycle
//!
//! A [`Session`] owns one transport connection and tracks the channels opened
//! through it. The registry keyed by [`ChannelId`] holds weak references only:
//! each [`SubscriptionChannel`] owns its core, and a closed channel drops its
//! listeners, so channels never keep the session alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::events::{EventKind, TimeSeriesEvent};
use crate::subscription::channel::{ChannelCore, ChannelId, ChannelOptions};
use crate::subscription::{SnapshotAssembler, SnapshotRequest, SubscriptionChannel};
use crate::transport::{
    ConnectionHandle, ConnectionNotice, ConnectionSink, ConnectionStatus, StatusChange, Transport,
};

struct SessionState {
    /// `None` once closed
    connection: Option<ConnectionHandle>,
    channels: HashMap<ChannelId, Weak<ChannelCore>>,
}

/// A connection to the feed and the subscriptions opened through it
pub struct Session {
    address: String,
    transport: Arc<dyn Transport>,
    options: ChannelOptions,
    state: Mutex<SessionState>,
    status: Arc<Mutex<ConnectionStatus>>,
    closed: AtomicBool,
    /// Set by the notice pump when the transport reports the connection lost
    disconnected: Arc<AtomicBool>,
    next_channel: AtomicU64,
    on_close: EventBus<()>,
    on_disconnect: Arc<EventBus<()>>,
    on_status_changed: Arc<EventBus<StatusChange>>,
    notice_pump: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Connect through `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        transport: Arc<dyn Transport>,
        address: &str,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let (notices, mut rx) = ConnectionSink::channel();
        let connection = transport.connect(address, notices)?;

        let status = Arc::new(Mutex::new(ConnectionStatus::Connected));
        let disconnected = Arc::new(AtomicBool::new(false));
        let on_disconnect = Arc::new(EventBus::new().named("session-disconnect"));
        let on_status_changed = Arc::new(EventBus::new().named("session-status"));

        let pump = {
            let status = Arc::clone(&status);
            let disconnected = Arc::clone(&disconnected);
            let on_disconnect = Arc::clone(&on_disconnect);
            let on_status_changed = Arc::clone(&on_status_changed);
            let address = address.to_string();

            tokio::spawn(async move {
                while let Some(notice) = rx.recv().await {
                    match notice {
                        ConnectionNotice::Disconnected => {
                            disconnected.store(true, Ordering::SeqCst);
                            warn!(address = %address, "Connection lost");
                            let _ = on_disconnect.dispatch(()).await;
                        }
                        ConnectionNotice::StatusChanged(change) => {
                            *lock_status(&status) = change.new;
                            if change.new.is_connected() {
                                disconnected.store(false, Ordering::SeqCst);
                            }
                            info!(
                                address = %address,
                                old = %change.old,
                                new = %change.new,
                                "Connection status changed"
                            );
                            let _ = on_status_changed.dispatch(change).await;
                        }
                    }
                }
                debug!(address = %address, "Notice pump finished");
            })
        };

        info!(address = %address, "Session connected");

        Ok(Arc::new(Self {
            address: address.to_string(),
            transport,
            options: ChannelOptions {
                ring_capacity: config.ring_capacity,
                buffer: config.channel_buffer,
            },
            state: Mutex::new(SessionState {
                connection: Some(connection),
                channels: HashMap::new(),
            }),
            status,
            closed: AtomicBool::new(false),
            disconnected,
            next_channel: AtomicU64::new(1),
            on_close: EventBus::new().named("session-close"),
            on_disconnect,
            on_status_changed,
            notice_pump: Mutex::new(Some(pump)),
        }))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fired once when the session closes
    pub fn on_close(&self) -> &EventBus<()> {
        &self.on_close
    }

    /// Fired when the transport reports the connection lost
    pub fn on_disconnect(&self) -> &EventBus<()> {
        &self.on_disconnect
    }

    pub fn on_status_changed(&self) -> &EventBus<StatusChange> {
        &self.on_status_changed
    }

    pub fn status(&self) -> ConnectionStatus {
        *lock_status(&self.status)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True once the transport reported the connection lost, until it
    /// reports it connected again
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Open a live subscription for `kinds`
    pub fn subscribe(&self, kinds: &[EventKind]) -> Result<SubscriptionChannel> {
        self.open_channel(kinds, None)
    }

    /// Open a subscription that first delivers history back to `from_time`
    pub fn subscribe_time_series(
        &self,
        kinds: &[EventKind],
        from_time: u64,
    ) -> Result<SubscriptionChannel> {
        self.open_channel(kinds, Some(from_time))
    }

    /// Request `E` events for `symbol` within `[from_time, to_time]`
    pub fn time_series<E: TimeSeriesEvent>(
        self: &Arc<Self>,
        symbol: &str,
        from_time: u64,
        to_time: u64,
        timeout: Duration,
    ) -> JoinHandle<Result<Vec<E>>> {
        let request = SnapshotRequest::new(symbol, from_time, to_time).with_timeout(timeout);
        SnapshotAssembler::<E>::request(self, request)
    }

    /// Live channels opened through this session
    pub fn channel_count(&self) -> usize {
        self.lock()
            .channels
            .values()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_closed())
            .count()
    }

    /// Close the session: notify `on_close`, close every channel, disconnect.
    /// Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(address = %self.address, "Closing session");
        let _ = self.on_close.dispatch(()).await;
        self.shutdown();
    }

    fn open_channel(
        &self,
        kinds: &[EventKind],
        from_time: Option<u64>,
    ) -> Result<SubscriptionChannel> {
        let mut state = self.lock();
        if self.is_closed() {
            return Err(FeedError::SessionClosed);
        }
        let connection = state.connection.ok_or(FeedError::SessionClosed)?;

        let id = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        let core = ChannelCore::open(
            id,
            Arc::clone(&self.transport),
            connection,
            kinds,
            from_time,
            self.options,
        )?;

        state
            .channels
            .retain(|_, c| c.upgrade().is_some_and(|c| !c.is_closed()));
        state.channels.insert(id, Arc::downgrade(&core));

        Ok(SubscriptionChannel::new(core))
    }

    /// Close channels and disconnect; the synchronous half of `close`
    fn shutdown(&self) {
        let (connection, channels) = {
            let mut state = self.lock();
            (
                state.connection.take(),
                std::mem::take(&mut state.channels),
            )
        };

        let closed = channels
            .values()
            .filter_map(Weak::upgrade)
            .filter(|c| c.close())
            .count();
        if let Some(connection) = connection {
            self.transport.disconnect(connection);
        }
        *lock_status(&self.status) = ConnectionStatus::NotConnected;

        if let Some(pump) = self
            .notice_pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            pump.abort();
        }

        info!(address = %self.address, channels = closed, "Session closed");
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

fn lock_status(status: &Mutex<ConnectionStatus>) -> MutexGuard<'_, ConnectionStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
