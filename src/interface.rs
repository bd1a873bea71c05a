// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration and status of the hardware interface of the dongle.

use std::fmt;

/// The bus the dongle talks to its units with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    #[default]
    Unknown,
    Bootloader,
    Auto,
    I2c,
    Uart,
    Canbus,
}

impl Mode {
    /// Decode a mode byte. Values without a meaning map to [`Mode::Unknown`].
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            1 => Self::Bootloader,
            2 => Self::Auto,
            4 => Self::I2c,
            8 => Self::Uart,
            16 => Self::Canbus,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Bootloader => 1,
            Self::Auto => 2,
            Self::I2c => 4,
            Self::Uart => 8,
            Self::Canbus => 16,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Bootloader => "bootloader",
            Self::Auto => "auto",
            Self::I2c => "i2c",
            Self::Uart => "uart",
            Self::Canbus => "canbus",
        };
        f.write_str(name)
    }
}

/// The protocol spoken on top of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Unknown,
    Cs1108,
    J1939,
    Serial,
}

impl Protocol {
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            1 => Self::Cs1108,
            2 => Self::J1939,
            3 => Self::Serial,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Cs1108 => 1,
            Self::J1939 => 2,
            Self::Serial => 3,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Cs1108 => "cs1108",
            Self::J1939 => "j1939",
            Self::Serial => "serial",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    /// The bus is connected and operational.
    pub up: bool,
}

/// The decoded value of the interface characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInterface {
    pub mode: Mode,
    pub protocol: Protocol,
    pub status: Status,
}

impl DeviceInterface {
    /// Decode `[mode, protocol, status, config]`.
    ///
    /// Older firmware reports a single zero byte, which stands for an
    /// operational I2C bus. Anything else that is not 4 bytes long decodes
    /// to an unknown interface that is down.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        match *bytes {
            [0] => Self {
                mode: Mode::I2c,
                protocol: Protocol::Cs1108,
                status: Status { up: true },
            },
            [mode, protocol, status, _config] => Self {
                mode: Mode::new(mode),
                protocol: Protocol::new(protocol),
                status: Status {
                    up: status & 0x01 != 0,
                },
            },
            _ => Self::default(),
        }
    }

    /// Payload of the configure command that selects `mode` and `protocol`.
    #[must_use]
    pub fn config_bytes(mode: Mode, protocol: Protocol) -> [u8; 4] {
        [mode.value(), protocol.value(), 0x00, 0x00]
    }
}

impl fmt::Display for DeviceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.status.up { "up" } else { "down" };
        write!(f, "{}/{} ({status})", self.mode, self.protocol)
    }
}
