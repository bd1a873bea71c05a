// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

/// Raw unit identifier as transmitted in the last header byte.
pub type UnitId = u8;

/// A single byte for addressing a device behind the dongle.
///
/// The dongle is a gateway: every request carries the unit it should be
/// forwarded to, or [`Unit::dongle()`] if the dongle itself is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Unit(pub UnitId);

impl Unit {
    /// The reserved address of the dongle itself, as opposed to a
    /// downstream unit it gateways to.
    pub const fn dongle() -> Self {
        Unit(0xFE)
    }

    pub fn is_dongle(self) -> bool {
        self == Self::dongle()
    }
}

impl From<UnitId> for Unit {
    fn from(from: UnitId) -> Self {
        Unit(from)
    }
}

impl From<Unit> for UnitId {
    fn from(from: Unit) -> Self {
        from.0
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0>2X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dongle_address() {
        assert!(Unit(0xFE).is_dongle());
        assert!(!Unit(0x01).is_dongle());
        assert_eq!(UnitId::from(Unit::dongle()), 0xFE);
    }

    #[test]
    fn display_unit() {
        assert_eq!(Unit(0x0A).to_string(), "0x0A");
        assert_eq!(Unit::dongle().to_string(), "0xFE");
    }
}
