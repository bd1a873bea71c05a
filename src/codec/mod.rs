// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::{BufMut as _, Bytes, BytesMut};

use crate::frame::Request;

pub(crate) mod adu;

#[allow(clippy::cast_possible_truncation)]
fn u16_len(len: usize) -> u16 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
fn u8_len(len: usize) -> u8 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u8::MAX.into());
    len as u8
}

fn encode_request_pdu(buf: &mut BytesMut, request: &Request<'_>) {
    use crate::frame::Request::*;
    buf.put_u8(request.function_code().value());
    match request {
        ReadObject(id) => {
            buf.put_u8(*id);
        }
        WriteObject(id, data) => {
            buf.put_u8(*id);
            buf.put_u8(u8_len(data.len()));
            buf.put_slice(data);
        }
        ReadMemory(address, length) => {
            buf.put_u16(*address);
            buf.put_u8(*length);
        }
        WriteMemory(address, data) | WriteVerifyMemory(address, data) => {
            buf.put_u16(*address);
            buf.put_slice(data);
        }
        Command(opcode, data) => {
            buf.put_u8(opcode.value());
            buf.put_slice(data);
        }
        Custom(_, data) => {
            buf.put_slice(data);
        }
    }
}

impl<'a> From<Request<'a>> for Bytes {
    fn from(req: Request<'a>) -> Bytes {
        let mut data = BytesMut::new();
        encode_request_pdu(&mut data, &req);
        data.freeze()
    }
}
