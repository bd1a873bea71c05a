// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Framing of outgoing requests and correlation of incoming responses.

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::BytesMut;
use tokio::runtime::Handle;
use tokio_util::codec::Decoder as _;

use crate::{
    codec::adu::{encode_adu, ClientCodec, RequestAdu, ResponseAdu},
    frame::TransactionId,
    link::Link,
    transaction::{TimeoutNotify, Transaction, TransactionClient},
    Error,
};

/// Owns the inbound byte buffer and all transactions that have been sent
/// but not answered yet.
pub(crate) struct Transport {
    link: Arc<dyn Link>,
    buf: BytesMut,
    codec: ClientCodec,
    next_transaction_id: TransactionId,
    pending: HashMap<TransactionId, Transaction>,
    /// Drives the timeout timers.
    runtime: Option<Handle>,
    on_timeout: TimeoutNotify,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("buffered", &self.buf.len())
            .field("codec", &self.codec)
            .field("next_transaction_id", &self.next_transaction_id)
            .field("pending", &self.pending.len())
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub(crate) fn new(
        link: Arc<dyn Link>,
        runtime: Option<Handle>,
        on_timeout: TimeoutNotify,
    ) -> Self {
        Self {
            link,
            buf: BytesMut::new(),
            codec: ClientCodec::default(),
            next_transaction_id: 0,
            pending: HashMap::new(),
            runtime,
            on_timeout,
        }
    }

    /// Use the current runtime for timers if none has been set yet.
    pub(crate) fn attach_current_runtime(&mut self) {
        if self.runtime.is_none() {
            self.runtime = Handle::try_current().ok();
        }
    }

    /// The id sequence starts at 1 and skips 0xFFFF when it wraps.
    fn next_transaction_id(&mut self) -> TransactionId {
        let id = self.next_transaction_id.wrapping_add(1);
        self.next_transaction_id = if id == TransactionId::MAX { 0 } else { id };
        self.next_transaction_id
    }

    pub(crate) fn send_request(&mut self, mut transaction: Transaction) {
        let transaction_id = self.next_transaction_id();
        let adu = RequestAdu {
            transaction_id,
            unit_id: transaction.unit_id(),
            pdu: transaction.pdu().clone(),
        };
        let mut buf = BytesMut::new();
        encode_adu(&adu, &mut buf);
        log::trace!("Send transaction {transaction_id}: {:02X?}", &buf[..]);

        transaction.start(
            transaction_id,
            self.runtime.as_ref(),
            Arc::clone(&self.on_timeout),
        );
        if let Some(stale) = self.pending.insert(transaction_id, transaction) {
            log::warn!("Transaction id {transaction_id} reused while still pending");
            stale.reject(Error::Cancelled);
        }
        self.link.write(buf.freeze());
    }

    /// Append a chunk of the inbound byte stream.
    pub(crate) fn on_data(&mut self, data: &[u8]) {
        log::trace!("Received {:02X?}", data);
        self.buf.extend_from_slice(data);
    }

    /// Process the next complete frame, if any.
    ///
    /// Returns `false` when more bytes are needed.
    pub(crate) fn process_frame(&mut self, client: &mut dyn TransactionClient) -> bool {
        let ResponseAdu { hdr, pdu } = match self.codec.decode(&mut self.buf) {
            Ok(Some(adu)) => adu,
            Ok(None) => return false,
            Err(err) => {
                log::error!("Failed to decode response: {err}");
                self.buf.clear();
                self.codec.reset();
                return false;
            }
        };
        let Some(transaction) = self.pending.remove(&hdr.transaction_id) else {
            log::warn!(
                "Dropping response for unknown transaction {}",
                hdr.transaction_id
            );
            client.transaction_error(None, Error::UnknownTransaction(hdr.transaction_id));
            return true;
        };
        match hdr.validate(transaction.unit_id()) {
            Ok(()) => transaction.handle_response(pdu, client),
            Err(err) => {
                log::warn!("Invalid response for transaction {}: {err}", hdr.transaction_id);
                transaction.handle_error(err.into(), client);
            }
        }
        true
    }

    /// Forget the transaction whose timer fired.
    ///
    /// Returns `None` if a response has been processed in the meantime.
    pub(crate) fn take_expired(&mut self, transaction_id: TransactionId) -> Option<Transaction> {
        self.pending.remove(&transaction_id)
    }

    /// Drop all pending transactions without waiting for their responses.
    ///
    /// Returns how many have been dropped. Their callers receive
    /// [`Error::Cancelled`].
    pub(crate) fn destroy_all_transactions(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Additionally discard a partially received frame.
    pub(crate) fn reset(&mut self) -> usize {
        self.buf.clear();
        self.codec.reset();
        self.destroy_all_transactions()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
