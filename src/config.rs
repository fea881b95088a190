//! Configuration for the feed client

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::bus::DEFAULT_RING_CAPACITY;
use crate::error::{FeedError, Result};
use crate::time::parse_iso;

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Feed address handed to the transport
    pub address: String,

    /// Symbols for live quote subscriptions (e.g., ["AAPL", "IBM"])
    pub symbols: Vec<String>,

    /// Symbol for the demo candle snapshot
    pub snapshot_symbol: String,

    /// Snapshot window, epoch millis, inclusive
    pub snapshot_from: u64,
    pub snapshot_to: u64,

    /// Snapshot timeout; zero waits until completion
    pub snapshot_timeout_ms: u64,

    /// Outstanding dispatches per bus before producers wait
    pub ring_capacity: usize,

    /// Events buffered between transport and channel pump
    pub channel_buffer: usize,

    /// Emit logs as JSON lines
    pub log_json: bool,

    /// Serve `/health` and `/metrics` here and keep running until Ctrl-C
    pub metrics_addr: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let symbols: Vec<String> = env::var("FEED_SYMBOLS")
            .unwrap_or_else(|_| "AAPL,IBM".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let snapshot_from = match env::var("SNAPSHOT_FROM") {
            Ok(s) => parse_iso(&s)?,
            Err(_) => defaults.snapshot_from,
        };
        let snapshot_to = match env::var("SNAPSHOT_TO") {
            Ok(s) => parse_iso(&s)?,
            Err(_) => defaults.snapshot_to,
        };
        if snapshot_from > snapshot_to {
            return Err(FeedError::Config(format!(
                "snapshot window starts after it ends ({} > {})",
                snapshot_from, snapshot_to
            )));
        }

        let config = Self {
            address: env::var("FEED_ADDRESS").unwrap_or(defaults.address),
            symbols,
            snapshot_symbol: env::var("SNAPSHOT_SYMBOL").unwrap_or(defaults.snapshot_symbol),
            snapshot_from,
            snapshot_to,
            snapshot_timeout_ms: env::var("SNAPSHOT_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            ring_capacity: env::var("RING_CAPACITY")
                .unwrap_or_else(|_| DEFAULT_RING_CAPACITY.to_string())
                .parse()
                .unwrap_or(DEFAULT_RING_CAPACITY),
            channel_buffer: env::var("CHANNEL_BUFFER")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .unwrap_or(256),
            log_json: env::var("LOG_JSON")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            metrics_addr: env::var("METRICS_ADDR").ok().filter(|s| !s.trim().is_empty()),
        };

        if config.ring_capacity == 0 {
            return Err(FeedError::Config("RING_CAPACITY must be positive".into()));
        }

        Ok(config)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "demo.feed.local:7300".to_string(),
            symbols: vec!["AAPL".to_string()],
            snapshot_symbol: "AAPL{=1m}".to_string(),
            // 2022-08-04T00:00:00Z .. 2022-08-04T01:00:00Z
            snapshot_from: 1_659_571_200_000,
            snapshot_to: 1_659_574_800_000,
            snapshot_timeout_ms: 5000,
            ring_capacity: DEFAULT_RING_CAPACITY,
            channel_buffer: 256,
            log_json: false,
            metrics_addr: None,
        }
    }
}
