// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registration of watchers and superwatchers with the dongle.

use std::sync::{Arc, Mutex};

use super::{lock, Dongle, Inner};
use crate::{
    frame::{Address, Opcode},
    link::Channel,
    unit::Unit,
    watcher::{Reservation, WatchCallback, Watcher},
    Error, Result,
};

/// Unwatch argument that addresses the superwatcher instead of a slot.
const SUPER_WATCHER_SELECTOR: u8 = 0xFF;

/// Superwatcher option: one update per notification.
const SUPER_WATCH_SINGLE: u8 = 0xFF;

/// Superwatcher option: multiple updates may be packed into a notification.
const SUPER_WATCH_PACKED: u8 = 0xFE;

fn slot_id(slot: usize) -> Result<u8> {
    u8::try_from(slot).map_err(|_| Error::InvalidSlot(slot))
}

/// Deliver a notification of a standard watcher channel to the watcher that
/// currently occupies `slot`.
fn dispatch_watcher(shared: &Mutex<Inner>, slot: usize, value: &[u8]) {
    let watcher = lock(shared).watchers.watcher(slot).cloned();
    match watcher {
        Some(watcher) => watcher.handle_update(value),
        None => log::debug!("Dropping notification for inactive watcher slot {slot}"),
    }
}

/// `[addr_hi, addr_lo, value]`
fn dispatch_super_watcher(shared: &Mutex<Inner>, value: &[u8]) {
    let &[addr_hi, addr_lo, data] = value else {
        log::error!(
            "Superwatcher notification with wrong number of bytes: {:02X?}",
            value
        );
        return;
    };
    let address = Address::from_be_bytes([addr_hi, addr_lo]);
    let watchers: Vec<_> = lock(shared)
        .super_watchers
        .active()
        .filter(|(_, watcher)| watcher.address() == address)
        .map(|(_, watcher)| watcher.clone())
        .collect();
    log::trace!(
        "Superwatcher update {address:#06X} = {data:#04X} for {} slot(s)",
        watchers.len()
    );
    for watcher in watchers {
        watcher.handle_update(&[data]);
    }
}

impl Dongle {
    /// Watch a memory region of `unit` and return the slot.
    ///
    /// `callback` receives the region whenever it changes.
    pub async fn watch(
        &self,
        unit: Unit,
        address: Address,
        length: u8,
        callback: WatchCallback,
    ) -> Result<usize> {
        self.register_watcher(Watcher::new(unit, address, length, callback))
            .await
    }

    /// Watch the bits of a memory region that are set in `mask`.
    ///
    /// Without a mask every change is reported.
    pub async fn watch_masked(
        &self,
        unit: Unit,
        address: Address,
        length: u8,
        mask: Option<&[u8]>,
        callback: WatchCallback,
    ) -> Result<usize> {
        let watcher = Watcher::masked(unit, address, length, mask, callback)?;
        self.register_watcher(watcher).await
    }

    async fn register_watcher(&self, watcher: Watcher) -> Result<usize> {
        let reservation = self.lock().watchers.reserve()?;
        let slot = reservation.index;
        log::debug!(
            "Watch {:#06X} on unit {} in slot {slot}",
            watcher.address(),
            watcher.unit()
        );
        if let Err(err) = self.activate_watcher(&reservation, watcher).await {
            let cancelled = self.lock().watchers.cancel(&reservation);
            if !cancelled {
                log::debug!("Slot {slot} has been released in the meantime");
            }
            return Err(err);
        }
        Ok(slot)
    }

    /// The slot is committed only after the dongle acknowledged the watcher
    /// and only if it has not been released and reserved again meanwhile.
    async fn activate_watcher(&self, reservation: &Reservation, watcher: Watcher) -> Result<()> {
        let slot = reservation.index;
        let id = slot_id(slot)?;
        let mut data = vec![id];
        data.extend_from_slice(&watcher.to_bytes());
        self.command(Unit::dongle(), watcher.opcode(), &data).await?;

        let committed = self.lock().watchers.commit(reservation, watcher);
        if !committed {
            log::debug!("Watcher in slot {slot} removed before activation");
            return Err(Error::Cancelled);
        }

        // Dispatch through the table, the channel is shared by all
        // registrations of this slot
        let shared = Arc::downgrade(&self.shared);
        self.link
            .subscribe(
                Channel::Status(id),
                Box::new(move |value: &[u8]| {
                    if let Some(shared) = shared.upgrade() {
                        dispatch_watcher(&shared, slot, value);
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Free a watcher slot.
    ///
    /// The slot can be reused immediately.
    pub async fn unwatch(&self, slot: usize) -> Result<()> {
        let id = slot_id(slot)?;
        log::debug!("Unwatch slot {slot}");
        if self.lock().watchers.release(slot)?.is_empty() {
            log::debug!("Slot {slot} was not in use");
        }
        self.link.unsubscribe(Channel::Status(id)).await?;
        Ok(())
    }

    /// Free all watcher slots and tell the dongle to stop watching.
    ///
    /// Superwatchers are not affected.
    pub async fn unwatch_all(&self) -> Result<()> {
        let slots: Vec<_> = self.lock().watchers.occupied().collect();
        log::debug!("Unwatch all {slots:?}");
        for slot in slots {
            if let Err(err) = self.unwatch(slot).await {
                log::warn!("Failed to unwatch slot {slot}: {err}");
            }
        }
        self.command(Unit::dongle(), Opcode::UnwatchAll, &[])
            .await?;
        Ok(())
    }

    /// Register a single byte with the superwatcher and return the slot.
    ///
    /// The dongle is not informed before [`Self::update_super_watcher()`].
    /// All superwatchers must be on the same unit.
    pub fn super_watch(&self, unit: Unit, address: Address, callback: WatchCallback) -> Result<usize> {
        let slot = self
            .lock()
            .super_watchers
            .insert(Watcher::new(unit, address, 1, callback))?;
        log::debug!("Superwatch {address:#06X} on unit {unit} in slot {slot}");
        Ok(slot)
    }

    /// Start the superwatcher with all registered addresses.
    ///
    /// With `packed` the dongle may report multiple updates in a single
    /// notification. The superwatcher should have been cleared before to
    /// avoid updates of an old configuration.
    pub async fn update_super_watcher(&self, packed: bool) -> Result<()> {
        let (unit, addresses) = {
            let inner = self.lock();
            let mut unit = None;
            let mut addresses = Vec::new();
            for (_, watcher) in inner.super_watchers.active() {
                addresses.extend_from_slice(&watcher.address().to_be_bytes());
                unit = Some(watcher.unit());
            }
            (unit, addresses)
        };
        let Some(unit) = unit else {
            log::debug!("No superwatchers registered");
            return Ok(());
        };
        log::debug!("Update superwatcher on unit {unit}: {addresses:02X?}");

        let shared = Arc::downgrade(&self.shared);
        self.link
            .subscribe(
                Channel::SuperWatcher,
                Box::new(move |value: &[u8]| {
                    if let Some(shared) = shared.upgrade() {
                        dispatch_super_watcher(&shared, value);
                    }
                }),
            )
            .await?;

        let option = if packed {
            SUPER_WATCH_PACKED
        } else {
            SUPER_WATCH_SINGLE
        };
        let mut data = vec![option, unit.into()];
        data.extend_from_slice(&addresses);
        self.command(Unit::dongle(), Opcode::SetSuperWatcher, &data)
            .await?;
        Ok(())
    }

    /// Free all superwatcher slots and stop the superwatcher.
    pub async fn clear_super_watcher(&self) -> Result<()> {
        log::debug!("Clear superwatcher");
        self.lock().super_watchers.clear();
        self.link.unsubscribe(Channel::SuperWatcher).await?;
        self.command(Unit::dongle(), Opcode::Unwatch, &[SUPER_WATCHER_SELECTOR])
            .await?;
        Ok(())
    }

    /// The active watcher in `slot`.
    pub fn watcher(&self, slot: usize) -> Option<Watcher> {
        self.lock().watchers.watcher(slot).cloned()
    }

    /// The superwatcher in `slot`.
    pub fn super_watcher(&self, slot: usize) -> Option<Watcher> {
        self.lock().super_watchers.watcher(slot).cloned()
    }
}
