// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::io;

use thiserror::Error;

use crate::{
    frame::{ExceptionResponse, TransactionId},
    unit::UnitId,
    watcher::SlotKind,
};

/// A response that does not fit the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid version in response header: expected 0, got {0}")]
    BadVersion(u16),

    #[error("invalid length in response header: expected at least 1, got 0")]
    ZeroLength,

    #[error("invalid unit in response header: expected {expected}, got {actual}")]
    UnitMismatch { expected: UnitId, actual: UnitId },

    #[error("response too short: expected at least {expected} byte(s), got {actual}")]
    ShortResponse { expected: usize, actual: usize },
}

/// Error type of all dongle operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The response header did not match the request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A response arrived for a transaction that is not pending (anymore).
    #[error("response for unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    /// The dongle responded with an exception.
    #[error("exception: {0}")]
    Exception(#[from] ExceptionResponse),

    /// No response arrived within the timeout.
    #[error("response timed out")]
    TimedOut,

    /// All watcher slots of the given kind are in use.
    #[error("not enough {0} resources")]
    ResourceExhausted(SlotKind),

    /// A watcher mask must have one byte for every watched byte.
    #[error("watcher mask has {actual} byte(s), but {expected} are watched")]
    InvalidMask { expected: usize, actual: usize },

    /// The slot index does not exist.
    #[error("invalid watcher slot {0}")]
    InvalidSlot(usize),

    /// The request does not fit into its length field.
    #[error("payload of {actual} byte(s) exceeds the maximum of {max}")]
    PayloadTooLarge { max: usize, actual: usize },

    /// The transaction was destroyed before it completed.
    #[error("transaction cancelled")]
    Cancelled,

    /// The dongle has been destroyed.
    #[error("dongle destroyed")]
    Destroyed,

    /// The underlying link failed.
    #[error(transparent)]
    Transport(#[from] io::Error),
}

impl Error {
    /// The exception response, if the dongle reported one.
    #[must_use]
    pub fn exception(&self) -> Option<ExceptionResponse> {
        match self {
            Self::Exception(rsp) => Some(*rsp),
            _ => None,
        }
    }
}
