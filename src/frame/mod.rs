// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub(crate) mod header;

use std::{
    borrow::Cow,
    error,
    fmt::{self, Display},
};

pub use self::header::{Header, TransactionId};

/// A dongle function code.
///
/// The first byte of every request PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 67 (0x43) Read Object
    ReadObject,

    /// 68 (0x44) Write Object
    WriteObject,

    /// 69 (0x45) Read Memory
    ReadMemory,

    /// 70 (0x46) Write Memory
    WriteMemory,

    /// 71 (0x47) Command, followed by an [`Opcode`].
    Command,

    /// 100 (0x64) Write Memory with Verify
    WriteVerifyMemory,

    /// Custom function code.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x43 => Self::ReadObject,
            0x44 => Self::WriteObject,
            0x45 => Self::ReadMemory,
            0x46 => Self::WriteMemory,
            0x47 => Self::Command,
            0x64 => Self::WriteVerifyMemory,
            code => Self::Custom(code),
        }
    }

    /// Gets the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadObject => 0x43,
            Self::WriteObject => 0x44,
            Self::ReadMemory => 0x45,
            Self::WriteMemory => 0x46,
            Self::Command => 0x47,
            Self::WriteVerifyMemory => 0x64,
            Self::Custom(code) => code,
        }
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0>2X}", self.value())
    }
}

/// Sub-command of a [`FunctionCode::Command`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// 0x00
    Configure,
    /// 0x01
    KeySwitch,
    /// 0x02
    SetWatcher,
    /// 0x03
    Unwatch,
    /// 0x04
    UnwatchAll,
    /// 0x05
    SetSuperWatcher,
    /// 0x06
    GetWatcher,
    /// 0x07
    SuperWatchPacked,
    /// 0x08
    WatchMasked,
    /// None of the above.
    Custom(u8),
}

impl Opcode {
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x00 => Self::Configure,
            0x01 => Self::KeySwitch,
            0x02 => Self::SetWatcher,
            0x03 => Self::Unwatch,
            0x04 => Self::UnwatchAll,
            0x05 => Self::SetSuperWatcher,
            0x06 => Self::GetWatcher,
            0x07 => Self::SuperWatchPacked,
            0x08 => Self::WatchMasked,
            code => Self::Custom(code),
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Configure => 0x00,
            Self::KeySwitch => 0x01,
            Self::SetWatcher => 0x02,
            Self::Unwatch => 0x03,
            Self::UnwatchAll => 0x04,
            Self::SetSuperWatcher => 0x05,
            Self::GetWatcher => 0x06,
            Self::SuperWatchPacked => 0x07,
            Self::WatchMasked => 0x08,
            Self::Custom(code) => code,
        }
    }
}

/// A 16 bit device memory address.
pub type Address = u16;

/// Identifier of a device object.
pub type ObjectId = u8;

/// A request represents a message from the client to the dongle or to a
/// unit behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// Read the object with the given id.
    ReadObject(ObjectId),

    /// Write the given bytes to an object.
    WriteObject(ObjectId, Cow<'a, [u8]>),

    /// Read a number of bytes starting at the given address.
    ReadMemory(Address, u8),

    /// Write bytes starting at the given address.
    WriteMemory(Address, Cow<'a, [u8]>),

    /// Write bytes starting at the given address and have the device verify them.
    WriteVerifyMemory(Address, Cow<'a, [u8]>),

    /// A command addressed by its opcode, followed by opcode specific data.
    Command(Opcode, Cow<'a, [u8]>),

    /// A raw request.
    /// The first parameter is the function code.
    /// The second parameter contains the bytes following the function code.
    Custom(u8, Cow<'a, [u8]>),
}

impl Request<'_> {
    /// Converts the request into an owned instance with `'static'` lifetime.
    #[must_use]
    pub fn into_owned(self) -> Request<'static> {
        use Request::*;

        match self {
            ReadObject(id) => ReadObject(id),
            WriteObject(id, data) => WriteObject(id, Cow::Owned(data.into_owned())),
            ReadMemory(addr, len) => ReadMemory(addr, len),
            WriteMemory(addr, data) => WriteMemory(addr, Cow::Owned(data.into_owned())),
            WriteVerifyMemory(addr, data) => {
                WriteVerifyMemory(addr, Cow::Owned(data.into_owned()))
            }
            Command(opcode, data) => Command(opcode, Cow::Owned(data.into_owned())),
            Custom(code, data) => Custom(code, Cow::Owned(data.into_owned())),
        }
    }

    /// Get the [`FunctionCode`] of the [`Request`].
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;

        match self {
            ReadObject(_) => FunctionCode::ReadObject,
            WriteObject(_, _) => FunctionCode::WriteObject,
            ReadMemory(_, _) => FunctionCode::ReadMemory,
            WriteMemory(_, _) => FunctionCode::WriteMemory,
            WriteVerifyMemory(_, _) => FunctionCode::WriteVerifyMemory,
            Command(_, _) => FunctionCode::Command,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }
}

/// An exception code reported by the dongle or a unit behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    SlaveDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    SlaveDeviceBusy,
    /// 0x07
    NegativeAcknowledge,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B
    GatewayTargetNoResponse,
    /// 0x80
    VerifyFailed,
    /// None of the above.
    ///
    /// Prefer [`Self::new()`] over constructing this variant with one of the
    /// predefined values.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use crate::frame::ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            SlaveDeviceFailure => 0x04,
            Acknowledge => 0x05,
            SlaveDeviceBusy => 0x06,
            NegativeAcknowledge => 0x07,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetNoResponse => 0x0B,
            VerifyFailed => 0x80,
            Custom(code) => code,
        }
    }
}

impl ExceptionCode {
    /// Create a new [`ExceptionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        use crate::frame::ExceptionCode::*;

        match value {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => SlaveDeviceFailure,
            0x05 => Acknowledge,
            0x06 => SlaveDeviceBusy,
            0x07 => NegativeAcknowledge,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetNoResponse,
            0x80 => VerifyFailed,
            other => Custom(other),
        }
    }

    /// The gateway reports that it received more concurrent requests than it
    /// can handle.
    ///
    /// Usually a request the client already gave up on is still being
    /// processed by the device.
    #[must_use]
    pub const fn is_overload(self) -> bool {
        matches!(self, Self::Acknowledge | Self::GatewayPathUnavailable)
    }

    pub(crate) fn description(&self) -> &str {
        use crate::frame::ExceptionCode::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            SlaveDeviceFailure => "Slave device failure",
            Acknowledge => "Acknowledge",
            SlaveDeviceBusy => "Slave device busy",
            NegativeAcknowledge => "Negative acknowledge",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetNoResponse => "Gateway target device failed to respond",
            VerifyFailed => "Verify failed",
            Custom(_) => "Custom",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:0>2X})", self.description(), u8::from(*self))
    }
}

impl error::Error for ExceptionCode {}

/// An exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

impl ExceptionResponse {
    /// Interpret a response PDU as exception response.
    ///
    /// Returns `None` if the function code does not have its high bit set or
    /// if the exception code byte is missing.
    #[must_use]
    pub fn from_pdu(pdu: &[u8]) -> Option<Self> {
        match pdu {
            [function, exception, ..] if function & 0x80 != 0 => Some(Self {
                function: FunctionCode::new(function & 0x7F),
                exception: ExceptionCode::new(*exception),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// Check if a response PDU is an exception response.
pub(crate) fn is_exception(pdu: &[u8]) -> bool {
    ExceptionResponse::from_pdu(pdu).is_some()
}
