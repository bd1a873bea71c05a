// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The wireless link the dongle is reached through.
//!
//! Discovery, connection establishment and the characteristic primitives
//! are provided by the application, e.g. on top of a BLE stack, by
//! implementing [`Link`].

use std::{fmt::Debug, io};

use async_trait::async_trait;
use bytes::Bytes;

/// Receives the value of every notification of a subscribed channel.
pub type NotifyHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Characteristics of the dongle that are used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Inbound byte stream of the transparent UART service.
    Rx,
    /// Outbound byte stream of the transparent UART service.
    Tx,
    Product,
    Serial,
    Fault,
    /// Notifications of the standard watcher in the given slot.
    Status(u8),
    /// Notifications of all superwatchers.
    SuperWatcher,
    /// The device interface configuration and status.
    Interface,
    ModelNumber,
    SerialNumber,
    FirmwareRevision,
    HardwareRevision,
    SoftwareRevision,
    Manufacturer,
}

const UUID_STATUS: [&str; 10] = [
    "6765ed1f-4de1-49e1-4771-a14380c90006",
    "6765ed1f-4de1-49e1-4771-a14380c90007",
    "6765ed1f-4de1-49e1-4771-a14380c90008",
    "6765ed1f-4de1-49e1-4771-a14380c90009",
    "6765ed1f-4de1-49e1-4771-a14380c9000a",
    "6765ed1f-4de1-49e1-4771-a14380c9000b",
    "6765ed1f-4de1-49e1-4771-a14380c9000c",
    "6765ed1f-4de1-49e1-4771-a14380c9000d",
    "6765ed1f-4de1-49e1-4771-a14380c9000e",
    "6765ed1f-4de1-49e1-4771-a14380c9000f",
];

impl Channel {
    /// UUID of the service that contains the characteristic.
    #[must_use]
    pub const fn service_uuid(self) -> &'static str {
        match self {
            Self::Rx | Self::Tx => "49535343-fe7d-4ae5-8fa9-9fafd205e455",
            Self::ModelNumber
            | Self::SerialNumber
            | Self::FirmwareRevision
            | Self::HardwareRevision
            | Self::SoftwareRevision
            | Self::Manufacturer => "180a",
            _ => "6765ed1f-4de1-49e1-4771-a14380c90000",
        }
    }

    /// UUID of the characteristic in lower case notation.
    ///
    /// Returns `None` for channels whose characteristic must be looked up
    /// by the link, i.e. the interface and status channels beyond the
    /// known slots.
    #[must_use]
    pub fn uuid(self) -> Option<&'static str> {
        let uuid = match self {
            Self::Rx => "49535343-1e4d-4bd9-ba61-23c647249616",
            Self::Tx => "49535343-8841-43f4-a8d4-ecbe34729bb3",
            Self::Product => "6765ed1f-4de1-49e1-4771-a14380c90003",
            Self::Serial => "6765ed1f-4de1-49e1-4771-a14380c90004",
            Self::Fault => "6765ed1f-4de1-49e1-4771-a14380c90005",
            Self::Status(slot) => return UUID_STATUS.get(usize::from(slot)).copied(),
            Self::SuperWatcher => "6765ed1f-4de1-49e1-4771-a14380c900ff",
            Self::Interface => return None,
            Self::ModelNumber => "2a24",
            Self::SerialNumber => "2a25",
            Self::FirmwareRevision => "2a26",
            Self::HardwareRevision => "2a27",
            Self::SoftwareRevision => "2a28",
            Self::Manufacturer => "2a29",
        };
        Some(uuid)
    }
}

/// Connection to a single dongle.
#[async_trait]
pub trait Link: Send + Sync + Debug {
    /// Transmit bytes on [`Channel::Tx`] without waiting for completion.
    ///
    /// Must not deliver inbound data synchronously from within this call.
    fn write(&self, bytes: Bytes);

    /// Read the current value of a characteristic.
    async fn read(&self, channel: Channel) -> io::Result<Bytes>;

    /// Deliver every notification of `channel` to `on_notify`, replacing a
    /// previous subscription of the same channel.
    async fn subscribe(&self, channel: Channel, on_notify: NotifyHandler) -> io::Result<()>;

    async fn unsubscribe(&self, channel: Channel) -> io::Result<()>;

    /// Disconnects from the dongle.
    async fn disconnect(&self) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_channels() {
        assert_eq!(
            Channel::Status(0).uuid(),
            Some("6765ed1f-4de1-49e1-4771-a14380c90006")
        );
        assert_eq!(
            Channel::Status(9).uuid(),
            Some("6765ed1f-4de1-49e1-4771-a14380c9000f")
        );
        assert_eq!(Channel::Status(10).uuid(), None);
        assert_eq!(Channel::Interface.uuid(), None);
    }

    #[test]
    fn services() {
        assert_eq!(Channel::Rx.service_uuid(), Channel::Tx.service_uuid());
        assert_eq!(Channel::SoftwareRevision.service_uuid(), "180a");
        assert_eq!(
            Channel::SuperWatcher.service_uuid(),
            Channel::Status(3).service_uuid()
        );
    }
}
