//! Subscriptions and time-series snapshots

pub mod channel;
pub mod snapshot;

pub use channel::{ChannelId, SubscriptionChannel};
pub use snapshot::{SnapshotAssembler, SnapshotOutcome, SnapshotRequest};
