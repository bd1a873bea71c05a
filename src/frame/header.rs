// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder as _};

use crate::{error::ProtocolError, unit::UnitId};

pub type TransactionId = u16;

/// Size of the fixed frame header in bytes.
pub(crate) const HEADER_SIZE: usize = 7;

/// The only protocol version that is spoken.
pub(crate) const PROTOCOL_VERSION: u16 = 0x0000;

/// A decoded frame header.
///
/// On the wire the length field counts the unit byte in addition to
/// the PDU. `length` holds the logical PDU length, i.e. the wire value
/// minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub transaction_id: TransactionId,
    pub version: u16,
    pub length: u16,
    pub unit_id: UnitId,
}

impl Header {
    /// Extract the header fields from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// No validation is performed.
    pub(crate) fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= HEADER_SIZE);
        Self {
            transaction_id: BigEndian::read_u16(&buf[0..2]),
            version: BigEndian::read_u16(&buf[2..4]),
            // A wire length of 0 cannot be valid and ends up as zero length, too.
            length: BigEndian::read_u16(&buf[4..6]).saturating_sub(1),
            unit_id: buf[6],
        }
    }

    /// Check that this header is acceptable as a response for a request
    /// that was sent to `expected_unit`.
    pub(crate) fn validate(&self, expected_unit: UnitId) -> Result<(), ProtocolError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::BadVersion(self.version));
        }
        if self.length == 0 {
            return Err(ProtocolError::ZeroLength);
        }
        if self.unit_id != expected_unit {
            return Err(ProtocolError::UnitMismatch {
                expected: expected_unit,
                actual: self.unit_id,
            });
        }
        Ok(())
    }
}
