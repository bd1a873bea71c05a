// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registered interest in device memory regions and the slot tables that
//! hold them.

use std::{fmt, sync::Arc};

use smallvec::SmallVec;

use crate::{
    frame::{Address, Opcode},
    unit::Unit,
    Error, Result,
};

/// Number of standard watcher slots, one notification channel each.
pub const MAX_WATCHERS: usize = 10;

/// Number of superwatcher slots, all sharing a single notification channel.
pub const MAX_SUPER_WATCHERS: usize = 25;

/// Receives the watched bytes together with their address and unit.
pub type WatchCallback = Arc<dyn Fn(&[u8], Address, Unit) + Send + Sync>;

type Mask = SmallVec<[u8; 8]>;

/// A watched memory region.
#[derive(Clone)]
pub struct Watcher {
    unit: Unit,
    address: Address,
    length: u8,
    mask: Option<Mask>,
    callback: WatchCallback,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("unit", &self.unit)
            .field("address", &self.address)
            .field("length", &self.length)
            .field("mask", &self.mask)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// A watcher that reports every change of the region.
    pub fn new(unit: Unit, address: Address, length: u8, callback: WatchCallback) -> Self {
        Self {
            unit,
            address,
            length,
            mask: None,
            callback,
        }
    }

    /// A watcher that only reports changes of the masked bits.
    ///
    /// Without a mask all bits are of interest. A mask must have exactly
    /// `length` bytes.
    pub fn masked(
        unit: Unit,
        address: Address,
        length: u8,
        mask: Option<&[u8]>,
        callback: WatchCallback,
    ) -> Result<Self> {
        let mask = match mask {
            Some(mask) if mask.len() != usize::from(length) => {
                return Err(Error::InvalidMask {
                    expected: length.into(),
                    actual: mask.len(),
                });
            }
            Some(mask) => Mask::from_slice(mask),
            None => smallvec::smallvec![0xFF; length.into()],
        };
        Ok(Self {
            unit,
            address,
            length,
            mask: Some(mask),
            callback,
        })
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn mask(&self) -> Option<&[u8]> {
        self.mask.as_deref()
    }

    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    /// The command that registers this watcher with the dongle.
    pub(crate) fn opcode(&self) -> Opcode {
        if self.has_mask() {
            Opcode::WatchMasked
        } else {
            Opcode::SetWatcher
        }
    }

    /// `[unit, addr_hi, addr_lo, length, ...mask]`
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let [addr_hi, addr_lo] = self.address.to_be_bytes();
        let mut bytes = vec![self.unit.0, addr_hi, addr_lo, self.length];
        if let Some(mask) = &self.mask {
            bytes.extend_from_slice(mask);
        }
        bytes
    }

    /// Deliver a notification. Values that do not have the watched length
    /// are dropped.
    pub fn handle_update(&self, value: &[u8]) {
        if value.len() != usize::from(self.length) {
            log::warn!(
                "Watcher update for {:#06X} with {} byte(s), expected {}",
                self.address,
                value.len(),
                self.length
            );
            return;
        }
        (self.callback)(value, self.address, self.unit);
    }
}

/// Which of the two slot tables ran out of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Watcher,
    SuperWatcher,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watcher => f.write_str("watcher"),
            Self::SuperWatcher => f.write_str("superwatcher"),
        }
    }
}

/// Identifies the registration that occupies a slot.
pub(crate) type Token = u64;

#[derive(Debug, Clone, Default)]
pub(crate) enum Slot {
    #[default]
    Empty,
    /// Claimed by a registration that is still waiting for the dongle.
    Reserved(Token),
    Active(Token, Watcher),
}

impl Slot {
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    fn token(&self) -> Option<Token> {
        match self {
            Self::Empty => None,
            Self::Reserved(token) | Self::Active(token, _) => Some(*token),
        }
    }
}

/// A claimed slot. Only the holder may activate or cancel it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Reservation {
    pub(crate) index: usize,
    token: Token,
}

/// A fixed number of watcher slots.
#[derive(Debug)]
pub(crate) struct SlotTable {
    kind: SlotKind,
    slots: Vec<Slot>,
    next_token: Token,
}

impl SlotTable {
    pub(crate) fn new(kind: SlotKind, size: usize) -> Self {
        Self {
            kind,
            slots: vec![Slot::Empty; size],
            next_token: 0,
        }
    }

    /// Claim the first empty slot.
    pub(crate) fn reserve(&mut self) -> Result<Reservation> {
        let index = self
            .slots
            .iter()
            .position(Slot::is_empty)
            .ok_or(Error::ResourceExhausted(self.kind))?;
        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        self.slots[index] = Slot::Reserved(token);
        Ok(Reservation { index, token })
    }

    /// Claim the first empty slot for `watcher`.
    pub(crate) fn insert(&mut self, watcher: Watcher) -> Result<usize> {
        let Reservation { index, token } = self.reserve()?;
        self.slots[index] = Slot::Active(token, watcher);
        Ok(index)
    }

    /// Activate a reserved slot.
    ///
    /// Returns `false` if the slot has been released and possibly reserved
    /// by another registration in the meantime.
    pub(crate) fn commit(&mut self, reservation: &Reservation, watcher: Watcher) -> bool {
        let Some(slot) = self.slots.get_mut(reservation.index) else {
            return false;
        };
        if !matches!(*slot, Slot::Reserved(token) if token == reservation.token) {
            return false;
        }
        *slot = Slot::Active(reservation.token, watcher);
        true
    }

    /// Empty the slot if it is still held by `reservation`, active or not.
    pub(crate) fn cancel(&mut self, reservation: &Reservation) -> bool {
        let Some(slot) = self.slots.get_mut(reservation.index) else {
            return false;
        };
        if slot.token() != Some(reservation.token) {
            return false;
        }
        *slot = Slot::Empty;
        true
    }

    /// Empty the slot and return what it held.
    pub(crate) fn release(&mut self, index: usize) -> Result<Slot> {
        let slot = self.slots.get_mut(index).ok_or(Error::InvalidSlot(index))?;
        Ok(std::mem::take(slot))
    }

    pub(crate) fn clear(&mut self) {
        self.slots.fill(Slot::Empty);
    }

    /// The active watcher in slot `index`.
    pub(crate) fn watcher(&self, index: usize) -> Option<&Watcher> {
        match self.slots.get(index) {
            Some(Slot::Active(_, watcher)) => Some(watcher),
            _ => None,
        }
    }

    /// All slots that are not empty, including reserved ones.
    pub(crate) fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_empty())
            .map(|(index, _)| index)
    }

    pub(crate) fn active(&self) -> impl Iterator<Item = (usize, &Watcher)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Active(_, watcher) => Some((index, watcher)),
                _ => None,
            })
    }
}
