// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types and traits

///////////////////////////////////////////////////////////////////
/// Types
///////////////////////////////////////////////////////////////////
pub use crate::{Config, Dongle, RequestOptions};
pub use crate::{Error, ExceptionCode, Result};
pub use crate::{Opcode, Request, Unit};
pub use crate::{WatchCallback, Watcher};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::{Channel, Link, NotifyHandler};
