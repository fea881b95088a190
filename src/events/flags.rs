//! Transactional event flags
//!
//! Control-plane bits that travel with indexed events: transaction boundaries,
//! removals and snapshot markers. They carry protocol semantics, not market data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask of transactional flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const TX_PENDING: EventFlags = EventFlags(0x01);
    pub const REMOVE_EVENT: EventFlags = EventFlags(0x02);
    pub const SNAPSHOT_BEGIN: EventFlags = EventFlags(0x04);
    pub const SNAPSHOT_END: EventFlags = EventFlags(0x08);
    pub const SNAPSHOT_SNIP: EventFlags = EventFlags(0x10);
    // 0x20 is reserved on the wire
    pub const SNAPSHOT_MODE: EventFlags = EventFlags(0x40);
    pub const REMOVE_SYMBOL: EventFlags = EventFlags(0x80);

    const NAMED: [(EventFlags, &'static str); 7] = [
        (Self::TX_PENDING, "TX_PENDING"),
        (Self::REMOVE_EVENT, "REMOVE_EVENT"),
        (Self::SNAPSHOT_BEGIN, "SNAPSHOT_BEGIN"),
        (Self::SNAPSHOT_END, "SNAPSHOT_END"),
        (Self::SNAPSHOT_SNIP, "SNAPSHOT_SNIP"),
        (Self::SNAPSHOT_MODE, "SNAPSHOT_MODE"),
        (Self::REMOVE_SYMBOL, "REMOVE_SYMBOL"),
    ];

    /// The empty set
    pub const fn empty() -> Self {
        EventFlags(0)
    }

    /// Build from raw wire bits (unknown bits are kept)
    pub const fn from_bits(bits: u32) -> Self {
        EventFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set in `self`
    pub const fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when `self` and `other` share at least one bit
    pub const fn intersects(self, other: EventFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: EventFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EventFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventFlags {
    fn bitor_assign(&mut self, rhs: EventFlags) {
        self.insert(rhs);
    }
}

impl fmt::Display for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        if names.is_empty() {
            write!(f, "0x{:x}", self.0)
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_clear() {
        let mut flags = EventFlags::REMOVE_EVENT | EventFlags::SNAPSHOT_SNIP;
        assert!(flags.contains(EventFlags::REMOVE_EVENT));
        assert!(flags.contains(EventFlags::SNAPSHOT_SNIP));
        assert!(!flags.contains(EventFlags::TX_PENDING));

        flags.remove(EventFlags::REMOVE_EVENT);
        assert!(!flags.contains(EventFlags::REMOVE_EVENT));
        assert_eq!(flags.bits(), 0x10);
    }

    #[test]
    fn test_contains_needs_every_bit() {
        let mask = EventFlags::REMOVE_EVENT | EventFlags::SNAPSHOT_SNIP;
        assert!(mask.contains(EventFlags::REMOVE_EVENT));
        assert!(!EventFlags::REMOVE_EVENT.contains(mask));
        assert!(EventFlags::REMOVE_EVENT.intersects(mask));
        assert!(!EventFlags::TX_PENDING.intersects(mask));
        assert!(mask.contains(EventFlags::empty()));
        assert!(!mask.intersects(EventFlags::empty()));
    }

    #[test]
    fn test_display() {
        let flags = EventFlags::TX_PENDING | EventFlags::SNAPSHOT_SNIP;
        assert_eq!(flags.to_string(), "TX_PENDING|SNAPSHOT_SNIP");
        assert_eq!(EventFlags::empty().to_string(), "0x0");
    }

    #[test]
    fn test_serializes_as_bits() {
        let flags = EventFlags::SNAPSHOT_BEGIN | EventFlags::SNAPSHOT_MODE;
        assert_eq!(serde_json::to_string(&flags).unwrap(), "68");
    }
}
