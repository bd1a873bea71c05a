// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [tokio](https://tokio.rs) based client for wireless gateway dongles.
//!
//! The dongle is reached through a byte stream that delivers data in
//! arbitrary chunks, e.g. the transparent UART service of a BLE
//! peripheral. Requests are framed with a 7 byte header and correlated
//! with their responses by a transaction id. The dongle forwards requests
//! to the units behind it and can watch their memory for changes.
//!
//! The wireless connection itself is provided by the application through
//! the [`Link`] trait.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tokio-dongle = "*"
//! ```

pub mod prelude;

mod codec;
mod config;
mod dongle;
mod error;
mod frame;
mod info;
mod interface;
mod link;
mod transaction;
mod transport;
mod unit;
mod watcher;

pub use self::{
    config::{Config, RequestOptions},
    dongle::{Dongle, QueueStatus},
    error::{Error, ProtocolError},
    frame::{
        Address, ExceptionCode, ExceptionResponse, FunctionCode, Header, ObjectId, Opcode, Request,
        TransactionId,
    },
    info::{DongleInfo, SoftwareRevision},
    interface::{DeviceInterface, Mode, Protocol, Status},
    link::{Channel, Link, NotifyHandler},
    unit::{Unit, UnitId},
    watcher::{SlotKind, WatchCallback, Watcher, MAX_SUPER_WATCHERS, MAX_WATCHERS},
};

/// Specialized [`std::result::Result`] type for dongle operations.
pub type Result<T> = std::result::Result<T, Error>;
