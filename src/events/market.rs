//! Non-indexed market events
//!
//! These carry no index and no transactional flags; every delivery replaces the
//! previous state of the symbol.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Best bid and offer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    /// Event time (milliseconds)
    pub event_time: u64,
    pub bid_time: u64,
    pub bid_exchange: char,
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_time: u64,
    pub ask_exchange: char,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
}

impl Quote {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }

    /// Mid price, when both sides are quoted
    pub fn mid_price(&self) -> Option<Decimal> {
        if self.bid_price > Decimal::ZERO && self.ask_price > Decimal::ZERO {
            Some((self.bid_price + self.ask_price) / Decimal::from(2))
        } else {
            None
        }
    }
}

/// Last trade, also used for the extended trading hours session when `eth` is set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub event_time: u64,
    /// Trade time (milliseconds)
    pub time: u64,
    pub sequence: u32,
    pub exchange: char,
    pub price: Decimal,
    pub size: Decimal,
    pub change: Decimal,
    pub day_volume: Decimal,
    pub day_turnover: Decimal,
    pub eth: bool,
}

impl Trade {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }
}

/// Daily summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub symbol: String,
    pub event_time: u64,
    pub day_id: i32,
    pub day_open_price: Decimal,
    pub day_high_price: Decimal,
    pub day_low_price: Decimal,
    pub day_close_price: Decimal,
    pub prev_day_id: i32,
    pub prev_day_close_price: Decimal,
    pub prev_day_volume: Decimal,
    pub open_interest: Decimal,
}

impl Summary {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_mid_price() {
        let mut quote = Quote::new("AAPL");
        assert_eq!(quote.mid_price(), None);

        quote.bid_price = dec!(100.00);
        quote.ask_price = dec!(100.10);
        assert_eq!(quote.mid_price(), Some(dec!(100.05)));
    }
}
