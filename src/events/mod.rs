//! Market events
//!
//! A closed set of event kinds modelled as one enum. Consumers route by pattern
//! matching; typed access goes through [`KindFilter`] and [`TimeSeriesEvent`].

mod flags;
mod indexed;
mod market;

pub use flags::EventFlags;
pub use indexed::{time_sequence_index, Candle, Greeks, Order, Side, TimeAndSale};
pub use market::{Quote, Summary, Trade};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of market event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Quote,
    Trade,
    Summary,
    Order,
    TimeAndSale,
    Candle,
    Greeks,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Quote,
        EventKind::Trade,
        EventKind::Summary,
        EventKind::Order,
        EventKind::TimeAndSale,
        EventKind::Candle,
        EventKind::Greeks,
    ];

    /// Events of this kind carry an index and transactional flags
    pub fn is_indexed(self) -> bool {
        matches!(
            self,
            EventKind::Order | EventKind::TimeAndSale | EventKind::Candle | EventKind::Greeks
        )
    }

    /// Events of this kind can be requested from a point in time
    pub fn is_time_series(self) -> bool {
        matches!(
            self,
            EventKind::TimeAndSale | EventKind::Candle | EventKind::Greeks
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Quote => "Quote",
            EventKind::Trade => "Trade",
            EventKind::Summary => "Summary",
            EventKind::Order => "Order",
            EventKind::TimeAndSale => "TimeAndSale",
            EventKind::Candle => "Candle",
            EventKind::Greeks => "Greeks",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Any event delivered by the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MarketEvent {
    Quote(Quote),
    Trade(Trade),
    Summary(Summary),
    Order(Order),
    TimeAndSale(TimeAndSale),
    Candle(Candle),
    Greeks(Greeks),
}

impl MarketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MarketEvent::Quote(_) => EventKind::Quote,
            MarketEvent::Trade(_) => EventKind::Trade,
            MarketEvent::Summary(_) => EventKind::Summary,
            MarketEvent::Order(_) => EventKind::Order,
            MarketEvent::TimeAndSale(_) => EventKind::TimeAndSale,
            MarketEvent::Candle(_) => EventKind::Candle,
            MarketEvent::Greeks(_) => EventKind::Greeks,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Quote(e) => &e.symbol,
            MarketEvent::Trade(e) => &e.symbol,
            MarketEvent::Summary(e) => &e.symbol,
            MarketEvent::Order(e) => &e.symbol,
            MarketEvent::TimeAndSale(e) => &e.symbol,
            MarketEvent::Candle(e) => &e.symbol,
            MarketEvent::Greeks(e) => &e.symbol,
        }
    }

    /// Transactional flags; always empty for non-indexed kinds
    pub fn flags(&self) -> EventFlags {
        match self {
            MarketEvent::Order(e) => e.flags,
            MarketEvent::TimeAndSale(e) => e.flags,
            MarketEvent::Candle(e) => e.flags,
            MarketEvent::Greeks(e) => e.flags,
            MarketEvent::Quote(_) | MarketEvent::Trade(_) | MarketEvent::Summary(_) => {
                EventFlags::empty()
            }
        }
    }

    /// Index for indexed kinds
    pub fn index(&self) -> Option<u64> {
        match self {
            MarketEvent::Order(e) => Some(e.index),
            MarketEvent::TimeAndSale(e) => Some(e.index),
            MarketEvent::Candle(e) => Some(e.index),
            MarketEvent::Greeks(e) => Some(e.index),
            MarketEvent::Quote(_) | MarketEvent::Trade(_) | MarketEvent::Summary(_) => None,
        }
    }

    /// Logical event time in milliseconds
    pub fn time(&self) -> u64 {
        match self {
            MarketEvent::Quote(e) => e.bid_time.max(e.ask_time),
            MarketEvent::Trade(e) => e.time,
            MarketEvent::Summary(e) => e.event_time,
            MarketEvent::Order(e) => e.time,
            MarketEvent::TimeAndSale(e) => e.time,
            MarketEvent::Candle(e) => e.time,
            MarketEvent::Greeks(e) => e.time,
        }
    }

    /// Replace the transactional flags (ignored for non-indexed kinds)
    pub fn set_flags(&mut self, flags: EventFlags) {
        match self {
            MarketEvent::Order(e) => e.flags = flags,
            MarketEvent::TimeAndSale(e) => e.flags = flags,
            MarketEvent::Candle(e) => e.flags = flags,
            MarketEvent::Greeks(e) => e.flags = flags,
            MarketEvent::Quote(_) | MarketEvent::Trade(_) | MarketEvent::Summary(_) => {}
        }
    }
}

/// Typed view of one concrete event kind
pub trait KindFilter: Sized {
    const KIND: EventKind;

    /// Borrow the concrete event when `event` is of this kind
    fn from_event(event: &MarketEvent) -> Option<&Self>;
}

/// An event with a stable per-symbol index
pub trait IndexedEvent {
    fn symbol(&self) -> &str;
    fn index(&self) -> u64;
    fn flags(&self) -> EventFlags;
    fn set_flags(&mut self, flags: EventFlags);
}

/// An indexed event that can be requested from a point in time
pub trait TimeSeriesEvent: IndexedEvent + KindFilter + Clone + Send + Sync + 'static {
    /// Logical event time in milliseconds
    fn time(&self) -> u64;
}

macro_rules! kind_filter {
    ($ty:ident) => {
        impl KindFilter for $ty {
            const KIND: EventKind = EventKind::$ty;

            fn from_event(event: &MarketEvent) -> Option<&Self> {
                match event {
                    MarketEvent::$ty(e) => Some(e),
                    _ => None,
                }
            }
        }

        impl From<$ty> for MarketEvent {
            fn from(event: $ty) -> Self {
                MarketEvent::$ty(event)
            }
        }
    };
}

macro_rules! indexed_event {
    ($ty:ident) => {
        impl IndexedEvent for $ty {
            fn symbol(&self) -> &str {
                &self.symbol
            }

            fn index(&self) -> u64 {
                self.index
            }

            fn flags(&self) -> EventFlags {
                self.flags
            }

            fn set_flags(&mut self, flags: EventFlags) {
                self.flags = flags;
            }
        }
    };
}

macro_rules! time_series_event {
    ($ty:ident) => {
        indexed_event!($ty);

        impl TimeSeriesEvent for $ty {
            fn time(&self) -> u64 {
                self.time
            }
        }
    };
}

kind_filter!(Quote);
kind_filter!(Trade);
kind_filter!(Summary);
kind_filter!(Order);
kind_filter!(TimeAndSale);
kind_filter!(Candle);
kind_filter!(Greeks);

indexed_event!(Order);
time_series_event!(TimeAndSale);
time_series_event!(Candle);
time_series_event!(Greeks);
