//! Market Feed - event delivery core for a market-data feed client
//!
//! This crate fans events from a feed transport out to listeners through
//! backpressured event buses, assembles time-series snapshots from backward
//! history streams, and ties subscriptions to a session lifecycle.

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod session;
pub mod subscription;
pub mod time;
pub mod transport;

pub use bus::{Completion, DispatchOutcome, EventBus, ListenerId};
pub use config::Config;
pub use error::{FeedError, Result};
pub use events::{
    Candle, EventFlags, EventKind, Greeks, IndexedEvent, KindFilter, MarketEvent, Order, Quote,
    Summary, TimeAndSale, TimeSeriesEvent, Trade,
};
pub use session::Session;
pub use subscription::{
    ChannelId, SnapshotAssembler, SnapshotOutcome, SnapshotRequest, SubscriptionChannel,
};
pub use transport::{ConnectionStatus, InMemoryTransport, StatusChange, Transport};
