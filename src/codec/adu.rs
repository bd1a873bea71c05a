// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;

use bytes::{BufMut as _, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use super::u16_len;
use crate::{
    frame::{
        header::{HEADER_SIZE, PROTOCOL_VERSION},
        Header, TransactionId,
    },
    unit::UnitId,
};

/// An outgoing request: header fields plus PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestAdu {
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
    pub(crate) pdu: Bytes,
}

/// An incoming, not yet validated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: Bytes,
}

/// Write `[id_hi, id_lo, 0, 0, len_hi, len_lo, unit, ...pdu]`.
///
/// The wire length counts the unit byte, i.e. it is the PDU length plus one.
pub(crate) fn encode_adu(adu: &RequestAdu, buf: &mut BytesMut) {
    buf.reserve(HEADER_SIZE + adu.pdu.len());
    buf.put_u16(adu.transaction_id);
    buf.put_u16(PROTOCOL_VERSION);
    buf.put_u16(u16_len(adu.pdu.len() + 1));
    buf.put_u8(adu.unit_id);
    buf.put_slice(&adu.pdu);
}

/// Reassembles response frames from a byte stream that arrives in
/// arbitrary chunks.
///
/// The header is consumed as soon as it is complete and kept until the
/// whole payload has been received.
#[derive(Debug, Default)]
pub(crate) struct ClientCodec {
    header: Option<Header>,
}

impl ClientCodec {
    /// Forget a partially received frame.
    pub(crate) fn reset(&mut self) {
        self.header = None;
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<ResponseAdu>> {
        let hdr = match self.header {
            Some(hdr) => hdr,
            None => {
                if buf.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let hdr = Header::decode(&buf.split_to(HEADER_SIZE));
                log::trace!("Header {hdr:?}");
                self.header = Some(hdr);
                hdr
            }
        };
        let len = usize::from(hdr.length);
        if buf.len() < len {
            return Ok(None);
        }
        let pdu = buf.split_to(len).freeze();
        self.header = None;
        Ok(Some(ResponseAdu { hdr, pdu }))
    }
}
