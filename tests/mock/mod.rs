// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_dongle::{Channel, Config, Dongle, Link, NotifyHandler};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A link whose peer is played by the test.
#[derive(Default)]
pub struct MockLink {
    writes: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    subscriptions: Mutex<HashMap<Channel, NotifyHandler>>,
    values: Mutex<HashMap<Channel, Bytes>>,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink").finish_non_exhaustive()
    }
}

impl MockLink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Self {
            writes: Mutex::new(Some(tx)),
            ..Default::default()
        };
        (Arc::new(link), rx)
    }

    pub fn set_value(&self, channel: Channel, value: &[u8]) {
        self.values
            .lock()
            .unwrap()
            .insert(channel, Bytes::copy_from_slice(value));
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.subscriptions.lock().unwrap().contains_key(&channel)
    }

    /// Deliver a notification. Returns `false` if nobody is subscribed.
    pub fn notify(&self, channel: Channel, value: &[u8]) -> bool {
        let subscriptions = self.subscriptions.lock().unwrap();
        match subscriptions.get(&channel) {
            Some(handler) => {
                handler(value);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Link for MockLink {
    fn write(&self, bytes: Bytes) {
        if let Some(tx) = self.writes.lock().unwrap().as_ref() {
            let _ = tx.send(bytes);
        }
    }

    async fn read(&self, channel: Channel) -> io::Result<Bytes> {
        self.values
            .lock()
            .unwrap()
            .get(&channel)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{channel:?}")))
    }

    async fn subscribe(&self, channel: Channel, on_notify: NotifyHandler) -> io::Result<()> {
        self.subscriptions.lock().unwrap().insert(channel, on_notify);
        Ok(())
    }

    async fn unsubscribe(&self, channel: Channel) -> io::Result<()> {
        self.subscriptions.lock().unwrap().remove(&channel);
        Ok(())
    }

    async fn disconnect(&self) -> io::Result<()> {
        self.writes.lock().unwrap().take();
        Ok(())
    }
}

/// A request as seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Vec<u8>,
}

pub fn parse_request(adu: &[u8]) -> DeviceRequest {
    assert!(adu.len() > 7, "incomplete request {adu:02X?}");
    assert_eq!(&adu[2..4], &[0x00, 0x00]);
    let length = usize::from(u16::from_be_bytes([adu[4], adu[5]]));
    assert_eq!(length, adu.len() - 6);
    DeviceRequest {
        transaction_id: u16::from_be_bytes([adu[0], adu[1]]),
        unit_id: adu[6],
        pdu: adu[7..].to_vec(),
    }
}

pub fn response_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = transaction_id.to_be_bytes().to_vec();
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&u16::try_from(pdu.len() + 1).unwrap().to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// Requests the device has received so far.
pub type Journal = Arc<Mutex<Vec<DeviceRequest>>>;

/// Answer every request with the PDU returned by `respond`, or not at all
/// if it returns `None`.
pub fn spawn_device<F>(
    link: Arc<MockLink>,
    mut writes: mpsc::UnboundedReceiver<Bytes>,
    mut respond: F,
) -> Journal
where
    F: FnMut(&DeviceRequest) -> Option<Vec<u8>> + Send + 'static,
{
    let journal = Journal::default();
    let recorded = Arc::clone(&journal);
    tokio::spawn(async move {
        while let Some(adu) = writes.recv().await {
            let req = parse_request(&adu);
            recorded.lock().unwrap().push(req.clone());
            if let Some(pdu) = respond(&req) {
                link.notify(
                    Channel::Rx,
                    &response_frame(req.transaction_id, req.unit_id, &pdu),
                );
            }
        }
    });
    journal
}

/// A device that acknowledges every request by echoing it.
pub fn spawn_echo_device(
    link: Arc<MockLink>,
    writes: mpsc::UnboundedReceiver<Bytes>,
) -> Journal {
    spawn_device(link, writes, |req| Some(req.pdu.clone()))
}

pub async fn dongle(link: &Arc<MockLink>, config: Config) -> Dongle {
    init_logging();
    let dongle = Dongle::new(link.clone(), config);
    dongle.initialize().await.unwrap();
    dongle
}

pub fn pdus(journal: &Journal) -> Vec<Vec<u8>> {
    journal
        .lock()
        .unwrap()
        .iter()
        .map(|req| req.pdu.clone())
        .collect()
}
