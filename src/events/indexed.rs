//! Indexed and time-series events
//!
//! Each of these has a stable numeric index per symbol, so a later event with the
//! same index updates (or, with `REMOVE_EVENT`, removes) the earlier one.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::EventFlags;

/// Compose a time-series index from a millisecond timestamp and a sequence number.
///
/// Layout: seconds in the high 32 bits, milliseconds in bits 22..32, sequence in
/// the low 22 bits. A larger index is always a more recent event.
pub fn time_sequence_index(time_ms: u64, sequence: u32) -> u64 {
    let seconds = time_ms / 1000;
    let millis = time_ms % 1000;
    (seconds << 32) | (millis << 22) | u64::from(sequence & 0x3F_FFFF)
}

/// Side of an order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[default]
    Undefined,
    Buy,
    Sell,
}

/// Order book entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub event_time: u64,
    pub flags: EventFlags,
    pub index: u64,
    pub time: u64,
    pub sequence: u32,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
    pub exchange: char,
    pub market_maker: Option<String>,
}

impl Order {
    pub fn new(symbol: &str, index: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            index,
            ..Default::default()
        }
    }
}

/// A single trade print
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeAndSale {
    pub symbol: String,
    pub event_time: u64,
    pub flags: EventFlags,
    pub index: u64,
    pub time: u64,
    pub sequence: u32,
    pub exchange: char,
    pub price: Decimal,
    pub size: Decimal,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub side: Side,
    pub eth: bool,
}

impl TimeAndSale {
    pub fn new(symbol: &str, time: u64, sequence: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            index: time_sequence_index(time, sequence),
            time,
            sequence,
            ..Default::default()
        }
    }
}

/// OHLCV bar. The symbol carries the aggregation period, e.g. `AAPL{=1m}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub event_time: u64,
    pub flags: EventFlags,
    pub index: u64,
    pub time: u64,
    pub sequence: u32,
    pub count: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub vwap: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub open_interest: Decimal,
}

impl Candle {
    pub fn new(symbol: &str, time: u64, sequence: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            index: time_sequence_index(time, sequence),
            time,
            sequence,
            ..Default::default()
        }
    }
}

/// Option greeks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub symbol: String,
    pub event_time: u64,
    pub flags: EventFlags,
    pub index: u64,
    pub time: u64,
    pub sequence: u32,
    pub price: Decimal,
    pub volatility: Decimal,
    pub delta: Decimal,
    pub gamma: Decimal,
    pub theta: Decimal,
    pub rho: Decimal,
    pub vega: Decimal,
}

impl Greeks {
    pub fn new(symbol: &str, time: u64, sequence: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            index: time_sequence_index(time, sequence),
            time,
            sequence,
            ..Default::default()
        }
    }
}
