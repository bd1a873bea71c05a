// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The controller that talks to a dongle.

mod queue;
mod watch;

use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use bytes::Bytes;
use futures_util::future::try_join_all;
use tokio::{runtime::Handle, sync::oneshot};

use self::queue::Queue;
use crate::{
    config::{Config, RequestOptions},
    frame::{Address, ObjectId, Opcode, Request, TransactionId},
    info::{decode_string, DongleInfo, SoftwareRevision},
    interface::{DeviceInterface, Mode, Protocol},
    link::{Channel, Link},
    transaction::{TimeoutNotify, Transaction},
    transport::Transport,
    unit::Unit,
    watcher::{SlotKind, SlotTable, MAX_SUPER_WATCHERS, MAX_WATCHERS},
    Error, ProtocolError, Result,
};

/// Largest PDU whose length still fits into the 16 bit header field.
const MAX_PDU_LEN: usize = u16::MAX as usize - 1;

/// Number of transactions in the different stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    /// Waiting to be sent.
    pub queued: usize,
    /// Counted against [`Config::max_concurrent_requests`].
    pub executing: usize,
    /// Sent and waiting for a response.
    pub pending: usize,
}

struct Inner {
    config: Config,
    queue: Queue,
    transport: Transport,
    watchers: SlotTable,
    super_watchers: SlotTable,
    info: Option<DongleInfo>,
    destroyed: bool,
}

impl Inner {
    fn new(
        link: Arc<dyn Link>,
        config: Config,
        runtime: Option<Handle>,
        on_timeout: TimeoutNotify,
    ) -> Self {
        Self {
            queue: Queue::new(&config),
            transport: Transport::new(link, runtime, on_timeout),
            watchers: SlotTable::new(SlotKind::Watcher, MAX_WATCHERS),
            super_watchers: SlotTable::new(SlotKind::SuperWatcher, MAX_SUPER_WATCHERS),
            info: None,
            destroyed: false,
            config,
        }
    }

    /// Send as many queued transactions as admitted.
    fn drain(&mut self) {
        while let Some(transaction) = self.queue.next_ready() {
            self.transport.send_request(transaction);
        }
    }

    fn on_data(&mut self, data: &[u8]) {
        self.transport.on_data(data);
        while self.transport.process_frame(&mut self.queue) {
            self.drain();
        }
    }

    fn handle_timeout(&mut self, transaction_id: TransactionId) {
        let Some(transaction) = self.transport.take_expired(transaction_id) else {
            // Already answered
            return;
        };
        transaction.handle_timeout(&mut self.queue);
        self.drain();
    }
}

fn lock(shared: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client of a single dongle.
///
/// All requests are queued and at most
/// [`Config::max_concurrent_requests`] of them are in flight at the same
/// time. Failed requests are retried according to the [`Config`] and the
/// [`RequestOptions`] of the request.
///
/// A `Dongle` is a cheap handle that can be cloned. It must be used from
/// within a tokio runtime, which drives the response timeouts.
#[derive(Clone)]
pub struct Dongle {
    shared: Arc<Mutex<Inner>>,
    link: Arc<dyn Link>,
}

impl fmt::Debug for Dongle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dongle")
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

impl Dongle {
    /// Create a controller for a dongle that is reached through `link`.
    ///
    /// No inbound data is received before [`Self::initialize()`] has been
    /// called. Timeouts are driven by the current tokio runtime, or by the
    /// runtime of the first [`Self::execute()`] if there is none.
    pub fn new(link: Arc<dyn Link>, config: Config) -> Self {
        log::debug!("{config:?}");
        let runtime = Handle::try_current().ok();
        let shared = Arc::new_cyclic(|shared: &Weak<Mutex<Inner>>| {
            let shared = shared.clone();
            let on_timeout: TimeoutNotify = Arc::new(move |transaction_id: TransactionId| {
                if let Some(shared) = shared.upgrade() {
                    lock(&shared).handle_timeout(transaction_id);
                }
            });
            Mutex::new(Inner::new(Arc::clone(&link), config, runtime, on_timeout))
        });
        Self { shared, link }
    }

    /// Create a controller, start receiving and read the device information.
    pub async fn connect(link: Arc<dyn Link>, config: Config) -> Result<Self> {
        let dongle = Self::new(link, config);
        dongle.initialize().await?;
        let info = dongle.read_dongle_info().await?;
        log::info!(
            "Connected to {} {} (software {})",
            info.model,
            info.serial,
            info.software
        );
        Ok(dongle)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.shared)
    }

    /// Feed inbound bytes from [`Channel::Rx`] into [`Self::on_data()`].
    pub async fn initialize(&self) -> Result<()> {
        log::debug!("Initialize");
        let shared = Arc::downgrade(&self.shared);
        self.link
            .subscribe(
                Channel::Rx,
                Box::new(move |data: &[u8]| {
                    if let Some(shared) = shared.upgrade() {
                        lock(&shared).on_data(data);
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Process a chunk of the inbound byte stream.
    ///
    /// A chunk may contain any part of one or more responses.
    pub fn on_data(&self, data: &[u8]) {
        self.lock().on_data(data);
    }

    /// Send a raw PDU to `unit` and wait for the response PDU.
    ///
    /// An exception response that is not retried results in
    /// [`Error::Exception`].
    pub async fn execute(&self, unit: Unit, pdu: Bytes, options: RequestOptions) -> Result<Bytes> {
        // The length field also counts the unit id
        if pdu.len() > MAX_PDU_LEN {
            return Err(Error::PayloadTooLarge {
                max: MAX_PDU_LEN,
                actual: pdu.len(),
            });
        }
        let rx = {
            let mut inner = self.lock();
            if inner.destroyed {
                return Err(Error::Destroyed);
            }
            inner.transport.attach_current_runtime();
            let (tx, rx) = oneshot::channel();
            let options = inner.config.transaction_options(options);
            inner
                .queue
                .push_back(Transaction::new(unit.into(), pdu, options, tx));
            inner.drain();
            rx
        };
        rx.await.map_err(|_| Error::Cancelled)?
    }

    pub async fn call(
        &self,
        unit: Unit,
        request: Request<'_>,
        options: RequestOptions,
    ) -> Result<Bytes> {
        if let Request::WriteObject(_, data) = &request {
            if data.len() > usize::from(u8::MAX) {
                return Err(Error::PayloadTooLarge {
                    max: u8::MAX.into(),
                    actual: data.len(),
                });
            }
        }
        self.execute(unit, request.into(), options).await
    }

    /// Send a command to `unit`.
    pub async fn command(&self, unit: Unit, opcode: Opcode, data: &[u8]) -> Result<Bytes> {
        self.call(
            unit,
            Request::Command(opcode, Cow::Borrowed(data)),
            RequestOptions::default(),
        )
        .await
    }

    pub async fn configure(&self) -> Result<Bytes> {
        log::debug!("Configure");
        self.command(Unit::dongle(), Opcode::Configure, &[]).await
    }

    /// Select the bus and protocol of the dongle.
    pub async fn configure_interface(&self, mode: Mode, protocol: Protocol) -> Result<Bytes> {
        log::debug!("Configure interface {mode}/{protocol}");
        let config = DeviceInterface::config_bytes(mode, protocol);
        self.command(Unit::dongle(), Opcode::Configure, &config)
            .await
    }

    pub async fn configure_i2c(&self) -> Result<Bytes> {
        self.configure_interface(Mode::I2c, Protocol::Cs1108).await
    }

    pub async fn keyswitch(&self, enabled: bool) -> Result<Bytes> {
        log::info!("Keyswitch {}", if enabled { "on" } else { "off" });
        self.command(Unit::dongle(), Opcode::KeySwitch, &[u8::from(enabled)])
            .await
    }

    /// Read `length` bytes of memory, without the function code.
    pub async fn read_memory(&self, unit: Unit, address: Address, length: u8) -> Result<Bytes> {
        let rsp = self
            .call(
                unit,
                Request::ReadMemory(address, length),
                RequestOptions::default(),
            )
            .await?;
        payload(rsp, 1)
    }

    pub async fn write_memory(&self, unit: Unit, address: Address, data: &[u8]) -> Result<Bytes> {
        self.call(
            unit,
            Request::WriteMemory(address, Cow::Borrowed(data)),
            RequestOptions::default(),
        )
        .await
    }

    /// Write memory and let the unit read it back.
    ///
    /// A mismatch is reported as [`ExceptionCode::VerifyFailed`](crate::ExceptionCode::VerifyFailed).
    pub async fn write_verify_memory(
        &self,
        unit: Unit,
        address: Address,
        data: &[u8],
    ) -> Result<Bytes> {
        self.call(
            unit,
            Request::WriteVerifyMemory(address, Cow::Borrowed(data)),
            RequestOptions::default(),
        )
        .await
    }

    /// Read an object, without function code and object id.
    pub async fn read_object(&self, unit: Unit, id: ObjectId) -> Result<Bytes> {
        let rsp = self
            .call(unit, Request::ReadObject(id), RequestOptions::default())
            .await?;
        payload(rsp, 2)
    }

    /// Write an object and return the result code of the unit.
    pub async fn write_object(&self, unit: Unit, id: ObjectId, data: &[u8]) -> Result<u8> {
        let rsp = self
            .call(
                unit,
                Request::WriteObject(id, Cow::Borrowed(data)),
                RequestOptions::default(),
            )
            .await?;
        match rsp.get(1) {
            Some(result) => Ok(*result),
            None => Err(short_response(2, rsp.len())),
        }
    }

    pub async fn read_interface(&self) -> Result<DeviceInterface> {
        let bytes = self.link.read(Channel::Interface).await?;
        let interface = DeviceInterface::decode(&bytes);
        log::info!("Interface {interface}");
        Ok(interface)
    }

    /// Deliver every change of the device interface to `on_update`.
    ///
    /// Subscribing usually triggers an initial notification.
    pub async fn on_interface_update<F>(&self, on_update: F) -> Result<()>
    where
        F: Fn(DeviceInterface) + Send + Sync + 'static,
    {
        self.link
            .subscribe(
                Channel::Interface,
                Box::new(move |value: &[u8]| {
                    let interface = DeviceInterface::decode(value);
                    log::info!("Interface changed: {interface}");
                    on_update(interface);
                }),
            )
            .await?;
        Ok(())
    }

    async fn read_string(&self, channel: Channel) -> Result<String> {
        let bytes = self.link.read(channel).await?;
        Ok(decode_string(&bytes))
    }

    /// Read all identification strings of the dongle.
    ///
    /// The result is kept and available through [`Self::info()`] afterwards.
    pub async fn read_dongle_info(&self) -> Result<DongleInfo> {
        let channels = [
            Channel::ModelNumber,
            Channel::SerialNumber,
            Channel::FirmwareRevision,
            Channel::HardwareRevision,
            Channel::SoftwareRevision,
            Channel::Manufacturer,
            Channel::Product,
        ];
        let strings = try_join_all(channels.into_iter().map(|channel| self.read_string(channel)))
            .await?;
        let mut strings = strings.into_iter();
        let mut next = || strings.next().unwrap_or_default();
        let info = DongleInfo {
            model: next(),
            serial: next(),
            firmware: next(),
            hardware: next(),
            software: next(),
            manufacturer: next(),
            product: next(),
        };
        log::debug!("{info:?}");
        self.lock().info = Some(info.clone());
        Ok(info)
    }

    /// The information of the last successful [`Self::read_dongle_info()`].
    pub fn info(&self) -> Option<DongleInfo> {
        self.lock().info.clone()
    }

    pub fn software_revision(&self) -> Option<SoftwareRevision> {
        self.lock()
            .info
            .as_ref()
            .map(DongleInfo::software_revision)
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.lock();
        QueueStatus {
            queued: inner.queue.len(),
            executing: inner.queue.executing(),
            pending: inner.transport.pending_len(),
        }
    }

    /// Give up on all requests that have been sent, without waiting for
    /// their timeouts.
    ///
    /// The callers receive [`Error::Cancelled`]. Queued requests are sent
    /// afterwards.
    pub fn abandon_transactions(&self) {
        let mut inner = self.lock();
        let abandoned = inner.transport.destroy_all_transactions();
        log::debug!("Abandoned {abandoned} transaction(s)");
        inner.queue.release(abandoned);
        inner.drain();
    }

    /// Cancel all requests and forget all watchers.
    ///
    /// Every further request fails with [`Error::Destroyed`].
    pub fn destroy(&self) {
        log::debug!("Destroy");
        let mut inner = self.lock();
        inner.destroyed = true;
        inner.transport.reset();
        inner.queue.clear();
        inner.watchers.clear();
        inner.super_watchers.clear();
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.link.disconnect().await?;
        Ok(())
    }
}

fn short_response(expected: usize, actual: usize) -> Error {
    ProtocolError::ShortResponse { expected, actual }.into()
}

/// Strip the first `offset` bytes of a response.
fn payload(rsp: Bytes, offset: usize) -> Result<Bytes> {
    if rsp.len() < offset {
        return Err(short_response(offset, rsp.len()));
    }
    Ok(rsp.slice(offset..))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_payload() {
        let rsp = Bytes::from_static(&[0x43, 0x01, 0xAA, 0xBB]);
        assert_eq!(&payload(rsp.clone(), 2).unwrap()[..], &[0xAA, 0xBB]);
        assert!(payload(Bytes::from_static(&[0x43, 0x01]), 2)
            .unwrap()
            .is_empty());
        assert!(matches!(
            payload(Bytes::from_static(&[0x43]), 2),
            Err(Error::Protocol(ProtocolError::ShortResponse {
                expected: 2,
                actual: 1
            }))
        ));
    }
}
