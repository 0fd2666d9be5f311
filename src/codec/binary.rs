//! The compact binary codec.
//!
//! Every value is self-describing: a one-byte type tag followed by the
//! payload. Multi-byte integers are big-endian. The layout is a stable wire
//! contract.
//!
//! | Tag | Type   | Payload                                          |
//! |-----|--------|--------------------------------------------------|
//! | 0   | void   | none                                             |
//! | 1   | bool   | 1 byte, `0` or `1`                               |
//! | 2   | int32  | 4 bytes                                          |
//! | 3   | int64  | 8 bytes                                          |
//! | 4   | double | 8 bytes, IEEE-754 bit pattern                    |
//! | 5   | string | u32 length + UTF-8 bytes                         |
//! | 6   | array  | u32 count + elements                             |
//! | 7   | map    | u32 count + key/value pairs                      |
//! | 8   | record | u32 count + (u32 name length + name, value) pairs |
//!
//! A packet frame is `u32 xid`, `u8 kind`, then for a CALL the service and
//! method as raw strings (u32 length + bytes, no tag) and the
//! length-prefixed parameter bytes; for a REPLY the status byte and the
//! length-prefixed result bytes.

#![expect(clippy::big_endian_bytes, reason = "the wire format is big-endian")]
#![expect(
    clippy::indexing_slicing,
    reason = "ranges are length-checked before slicing"
)]

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{CodecError, CodecResult, Decoder, Encoder};
use crate::{
    message::{Message, MessageBody, MessageKind},
    status::ReplyStatus,
};

const TAG_VOID: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I32: u8 = 2;
const TAG_I64: u8 = 3;
const TAG_F64: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_MAP: u8 = 7;
const TAG_RECORD: u8 = 8;

fn tag_name(tag: u8) -> &'static str {
    match tag {
        TAG_VOID => "void",
        TAG_BOOL => "bool",
        TAG_I32 => "int32",
        TAG_I64 => "int64",
        TAG_F64 => "double",
        TAG_STR => "string",
        TAG_ARRAY => "array",
        TAG_MAP => "map",
        TAG_RECORD => "record",
        _ => "invalid",
    }
}

/// Streaming encoder writing the binary format into an owned buffer.
#[derive(Debug, Default)]
pub struct BinaryEncoder {
    buf: BytesMut,
}

impl BinaryEncoder {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn finish(self) -> Bytes { self.buf.freeze() }

    fn put_len(&mut self, len: usize) {
        debug_assert!(u32::try_from(len).is_ok());
        self.buf.put_u32(len as u32);
    }

    fn put_raw_str(&mut self, v: &str) {
        self.put_len(v.len());
        self.buf.put_slice(v.as_bytes());
    }
}

impl Encoder for BinaryEncoder {
    fn put_void(&mut self) { self.buf.put_u8(TAG_VOID); }

    fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(TAG_BOOL);
        self.buf.put_u8(u8::from(v));
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.put_u8(TAG_I32);
        self.buf.put_i32(v);
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.put_u8(TAG_I64);
        self.buf.put_i64(v);
    }

    fn put_f64(&mut self, v: f64) {
        self.buf.put_u8(TAG_F64);
        self.buf.put_u64(v.to_bits());
    }

    fn put_str(&mut self, v: &str) {
        self.buf.put_u8(TAG_STR);
        self.put_raw_str(v);
    }

    fn begin_array(&mut self, len: usize) {
        self.buf.put_u8(TAG_ARRAY);
        self.put_len(len);
    }

    fn end_array(&mut self) {}

    fn begin_map(&mut self, len: usize) {
        self.buf.put_u8(TAG_MAP);
        self.put_len(len);
    }

    fn end_map(&mut self) {}

    fn begin_record(&mut self, fields: usize) {
        self.buf.put_u8(TAG_RECORD);
        self.put_len(fields);
    }

    fn field(&mut self, name: &str) { self.put_raw_str(name); }

    fn end_record(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Array,
    Map,
    Record,
}

#[derive(Debug)]
struct Frame {
    container: Container,
    remaining: u32,
}

/// Streaming decoder over an owned binary buffer.
///
/// The container walk keeps a stack of element counts so `*_continue` can
/// report end-of-container without looking at the following bytes.
#[derive(Debug)]
pub struct BinaryDecoder {
    data: Bytes,
    pos: usize,
    stack: Vec<Frame>,
}

impl BinaryDecoder {
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
        }
    }

    fn take(&mut self, n: usize) -> CodecResult<&[u8]> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Incomplete)?;
        if end > self.data.len() {
            return Err(CodecError::Incomplete);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> CodecResult<u8> {
        let b = self.take(1)?;
        Ok(b[0])
    }

    fn take_u32(&mut self) -> CodecResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn expect_tag(&mut self, want: u8) -> CodecResult<()> {
        let got = self.take_u8()?;
        if got == want {
            Ok(())
        } else {
            Err(CodecError::Corrupt(format!(
                "expected {}, found {}",
                tag_name(want),
                tag_name(got)
            )))
        }
    }

    fn take_raw_str(&mut self) -> CodecResult<String> {
        let len = self.take_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::corrupt("string is not valid UTF-8"))
    }

    fn continue_container(&mut self, want: Container, what: &str) -> CodecResult<bool> {
        let frame = self
            .stack
            .last_mut()
            .filter(|frame| frame.container == want)
            .ok_or_else(|| CodecError::Corrupt(format!("not inside a {what}")))?;
        if frame.remaining > 0 {
            frame.remaining -= 1;
            Ok(true)
        } else {
            self.stack.pop();
            Ok(false)
        }
    }
}

impl Decoder for BinaryDecoder {
    fn get_void(&mut self) -> CodecResult<()> { self.expect_tag(TAG_VOID) }

    fn get_bool(&mut self) -> CodecResult<bool> {
        self.expect_tag(TAG_BOOL)?;
        match self.take_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::Corrupt(format!("invalid bool byte {other}"))),
        }
    }

    fn get_i32(&mut self) -> CodecResult<i32> {
        self.expect_tag(TAG_I32)?;
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn get_i64(&mut self) -> CodecResult<i64> {
        self.expect_tag(TAG_I64)?;
        let b = self.take(8)?;
        Ok(i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn get_f64(&mut self) -> CodecResult<f64> {
        self.expect_tag(TAG_F64)?;
        let b = self.take(8)?;
        let bits = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        Ok(f64::from_bits(bits))
    }

    fn get_string(&mut self) -> CodecResult<String> {
        self.expect_tag(TAG_STR)?;
        self.take_raw_str()
    }

    fn begin_array(&mut self) -> CodecResult<()> {
        self.expect_tag(TAG_ARRAY)?;
        let count = self.take_u32()?;
        self.stack.push(Frame {
            container: Container::Array,
            remaining: count,
        });
        Ok(())
    }

    fn array_continue(&mut self) -> CodecResult<bool> {
        self.continue_container(Container::Array, "array")
    }

    fn begin_map(&mut self) -> CodecResult<()> {
        self.expect_tag(TAG_MAP)?;
        let count = self.take_u32()?;
        self.stack.push(Frame {
            container: Container::Map,
            remaining: count,
        });
        Ok(())
    }

    fn map_continue(&mut self) -> CodecResult<bool> {
        self.continue_container(Container::Map, "map")
    }

    fn begin_record(&mut self) -> CodecResult<()> {
        self.expect_tag(TAG_RECORD)?;
        let count = self.take_u32()?;
        self.stack.push(Frame {
            container: Container::Record,
            remaining: count,
        });
        Ok(())
    }

    fn record_continue(&mut self) -> CodecResult<Option<String>> {
        if self.continue_container(Container::Record, "record")? {
            Ok(Some(self.take_raw_str()?))
        } else {
            Ok(None)
        }
    }
}

pub(super) fn encode_packet(msg: &Message, out: &mut BytesMut) {
    out.put_u32(msg.xid);
    out.put_u8(msg.kind() as u8);
    match &msg.body {
        MessageBody::Call(call) => {
            put_raw_str(out, &call.service);
            put_raw_str(out, &call.method);
            put_raw_bytes(out, &call.params);
        }
        MessageBody::Reply(reply) => {
            out.put_u8(reply.status.code());
            put_raw_bytes(out, &reply.result);
        }
    }
}

fn put_raw_str(out: &mut BytesMut, v: &str) {
    debug_assert!(u32::try_from(v.len()).is_ok());
    out.put_u32(v.len() as u32);
    out.put_slice(v.as_bytes());
}

fn put_raw_bytes(out: &mut BytesMut, v: &Bytes) {
    debug_assert!(u32::try_from(v.len()).is_ok());
    out.put_u32(v.len() as u32);
    out.put_slice(v);
}

/// Read-only cursor used to probe whether `src` holds a whole packet before
/// any byte is consumed.
struct Peek<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Peek<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.buf.len() {
            return None;
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn take_u8(&mut self) -> Option<u8> { self.take(1).map(|b| b[0]) }

    fn take_u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_counted(&mut self) -> Option<&'a [u8]> {
        let len = self.take_u32()? as usize;
        self.take(len)
    }
}

pub(super) fn decode_packet(src: &mut BytesMut) -> CodecResult<Option<Message>> {
    let mut peek = Peek { buf: src, pos: 0 };
    let Some(xid) = peek.take_u32() else {
        return Ok(None);
    };
    let Some(kind_byte) = peek.take_u8() else {
        return Ok(None);
    };
    let kind = MessageKind::from_wire(kind_byte)
        .ok_or_else(|| CodecError::Corrupt(format!("invalid message kind {kind_byte}")))?;

    let msg = match kind {
        MessageKind::Call => {
            let Some(service) = peek.take_counted() else {
                return Ok(None);
            };
            let Some(method) = peek.take_counted() else {
                return Ok(None);
            };
            let Some(params) = peek.take_counted() else {
                return Ok(None);
            };
            let service = std::str::from_utf8(service)
                .map_err(|_| CodecError::corrupt("service name is not valid UTF-8"))?;
            let method = std::str::from_utf8(method)
                .map_err(|_| CodecError::corrupt("method name is not valid UTF-8"))?;
            Message::call(xid, service, method, Bytes::copy_from_slice(params))
        }
        MessageKind::Reply => {
            let Some(status_byte) = peek.take_u8() else {
                return Ok(None);
            };
            let Some(result) = peek.take_counted() else {
                return Ok(None);
            };
            let status = ReplyStatus::try_from(status_byte)
                .map_err(|err| CodecError::corrupt(err.to_string()))?;
            Message::reply(xid, status, Bytes::copy_from_slice(result))
        }
    };
    let consumed = peek.pos;
    src.advance(consumed);
    Ok(Some(msg))
}
