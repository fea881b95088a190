//! Transport seam
//!
//! The feed core never talks to the network itself. A [`Transport`] opens the
//! connection and subscription handles, and pushes decoded events into the
//! [`EventSink`] it was given for each channel, on threads of its own.

mod memory;

pub use memory::InMemoryTransport;

use std::fmt;
use tokio::sync::mpsc;

use crate::error::{FeedError, Result};
use crate::events::{EventKind, MarketEvent};

/// Transport-side identity of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

/// Transport-side identity of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u64);

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection status as reported by the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    #[default]
    NotConnected,
    Connected,
    LoginRequired,
    Authorized,
}

impl ConnectionStatus {
    /// Any state with a live link, whether or not login has completed
    pub fn is_connected(self) -> bool {
        self != ConnectionStatus::NotConnected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::NotConnected => "Not connected",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::LoginRequired => "Login required",
            ConnectionStatus::Authorized => "Authorized",
        };
        f.write_str(s)
    }
}

/// A status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub old: ConnectionStatus,
    pub new: ConnectionStatus,
}

/// Connection-level notifications pushed by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionNotice {
    Disconnected,
    StatusChanged(StatusChange),
}

/// Producer end of a channel's event queue.
///
/// Bounded: when consumers fall behind, sending suspends (or blocks) the
/// transport instead of buffering without limit.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<MarketEvent>,
}

impl EventSink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<MarketEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub async fn send(&self, event: MarketEvent) -> Result<()> {
        self.tx.send(event).await?;
        Ok(())
    }

    /// For transport threads outside the async runtime
    pub fn blocking_send(&self, event: MarketEvent) -> Result<()> {
        self.tx.blocking_send(event)?;
        Ok(())
    }

    pub fn try_send(&self, event: MarketEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => FeedError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => FeedError::ChannelClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Producer end of a connection's notice queue
#[derive(Debug, Clone)]
pub struct ConnectionSink {
    tx: mpsc::UnboundedSender<ConnectionNotice>,
}

impl ConnectionSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConnectionNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, notice: ConnectionNotice) -> Result<()> {
        self.tx.send(notice).map_err(|_| FeedError::SessionClosed)
    }
}

/// External feed transport
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection; notices are pushed into `notices` until `disconnect`
    fn connect(&self, address: &str, notices: ConnectionSink) -> Result<ConnectionHandle>;

    /// Release the connection
    fn disconnect(&self, connection: ConnectionHandle);

    /// Open a subscription for `kinds`. With `from_time`, time-series history
    /// starting at that time is delivered before live events.
    fn open_channel(
        &self,
        connection: ConnectionHandle,
        kinds: &[EventKind],
        from_time: Option<u64>,
        sink: EventSink,
    ) -> Result<ChannelHandle>;

    fn add_symbols(&self, channel: ChannelHandle, symbols: &[String]) -> Result<()>;

    fn remove_symbols(&self, channel: ChannelHandle, symbols: &[String]) -> Result<()>;

    fn set_symbols(&self, channel: ChannelHandle, symbols: &[String]) -> Result<()>;

    fn clear_symbols(&self, channel: ChannelHandle) -> Result<()>;

    /// Release the subscription; its sink is dropped
    fn close_channel(&self, channel: ChannelHandle);
}
