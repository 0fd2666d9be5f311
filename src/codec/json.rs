//! The textual JSON codec.
//!
//! Values map onto JSON in the obvious way, with two conventions: records
//! are objects holding only their set attributes, and integer-keyed maps
//! travel as string-keyed objects (keys are stringified on encode and parsed
//! back on decode, since JSON object keys must be strings).
//!
//! A packet frame is one JSON object:
//! `{"xid":1,"type":1,"service":"calc","method":"Add","params":[...]}` for a
//! CALL, `{"xid":1,"type":2,"status":0,"result":...}` for a REPLY. A REPLY
//! with an empty result stream omits the `result` member.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::{Value, value::RawValue};

use super::{CodecError, CodecResult, Decoder, Encoder};
use crate::{
    message::{Message, MessageBody, MessageKind},
    status::ReplyStatus,
};

fn push_json_str(out: &mut String, v: &str) {
    out.push('"');
    for c in v.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[derive(Debug)]
enum Frame {
    Array { first: bool },
    Map { first: bool, next_is_key: bool },
    Record { first: bool },
}

/// Streaming encoder writing JSON text into an owned buffer.
///
/// Container state (separators, map key positions) is tracked on a frame
/// stack so the [`Encoder`] surface stays identical to the binary codec's.
#[derive(Debug, Default)]
pub struct JsonEncoder {
    out: String,
    stack: Vec<Frame>,
}

impl JsonEncoder {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn finish(self) -> Bytes { Bytes::from(self.out.into_bytes()) }

    /// Write one value token, handling separators and map-key positions.
    /// `key_text` is the stringified form used when the token lands in a map
    /// key position; `None` means the token is already a JSON string.
    fn emit(&mut self, text: &str, key_text: Option<String>) {
        let mut as_key = false;
        match self.stack.last_mut() {
            None | Some(Frame::Record { .. }) => {}
            Some(Frame::Array { first }) => {
                if !*first {
                    self.out.push(',');
                }
                *first = false;
            }
            Some(Frame::Map { first, next_is_key }) => {
                if *next_is_key {
                    if !*first {
                        self.out.push(',');
                    }
                    *first = false;
                    *next_is_key = false;
                    as_key = true;
                } else {
                    *next_is_key = true;
                }
            }
        }
        if as_key {
            match key_text {
                Some(key) => self.out.push_str(&key),
                None => self.out.push_str(text),
            }
            self.out.push(':');
        } else {
            self.out.push_str(text);
        }
    }

    fn emit_open(&mut self, open: char, frame: Frame) {
        self.emit("", None);
        self.out.push(open);
        self.stack.push(frame);
    }

    fn emit_close(&mut self, close: char) {
        self.out.push(close);
        self.stack.pop();
    }
}

impl Encoder for JsonEncoder {
    fn put_void(&mut self) { self.emit("null", Some("\"null\"".to_owned())); }

    fn put_bool(&mut self, v: bool) {
        let text = if v { "true" } else { "false" };
        self.emit(text, Some(format!("\"{text}\"")));
    }

    fn put_i32(&mut self, v: i32) { self.emit(&v.to_string(), Some(format!("\"{v}\""))); }

    fn put_i64(&mut self, v: i64) { self.emit(&v.to_string(), Some(format!("\"{v}\""))); }

    fn put_f64(&mut self, v: f64) {
        // JSON has no representation for non-finite doubles.
        let text = if v.is_finite() { format!("{v:?}") } else { "null".to_owned() };
        self.emit(&text, Some(format!("\"{text}\"")));
    }

    fn put_str(&mut self, v: &str) {
        let mut text = String::with_capacity(v.len() + 2);
        push_json_str(&mut text, v);
        self.emit(&text, None);
    }

    fn begin_array(&mut self, _len: usize) {
        self.emit_open('[', Frame::Array { first: true });
    }

    fn end_array(&mut self) { self.emit_close(']'); }

    fn begin_map(&mut self, _len: usize) {
        self.emit_open(
            '{',
            Frame::Map {
                first: true,
                next_is_key: true,
            },
        );
    }

    fn end_map(&mut self) { self.emit_close('}'); }

    fn begin_record(&mut self, _fields: usize) {
        self.emit_open('{', Frame::Record { first: true });
    }

    fn field(&mut self, name: &str) {
        let need_comma = match self.stack.last_mut() {
            Some(Frame::Record { first }) => {
                let comma = !*first;
                *first = false;
                comma
            }
            _ => false,
        };
        if need_comma {
            self.out.push(',');
        }
        push_json_str(&mut self.out, name);
        self.out.push(':');
    }

    fn end_record(&mut self) { self.emit_close('}'); }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug)]
enum JFrame {
    Array(std::vec::IntoIter<Value>),
    Map {
        iter: serde_json::map::IntoIter,
        value_pending: Option<Value>,
    },
    Record(serde_json::map::IntoIter),
}

/// Tree-walking decoder over one parsed JSON document.
///
/// The whole input is parsed up front: a truncated document surfaces as
/// [`CodecError::Incomplete`], anything else unparsable as
/// [`CodecError::Corrupt`]. Map keys are re-parsed from their string form
/// when an integer key type is requested.
#[derive(Debug)]
pub struct JsonDecoder {
    next: Option<(Value, bool)>,
    stack: Vec<JFrame>,
}

impl JsonDecoder {
    /// # Errors
    /// `Incomplete` if the document ends early, `Corrupt` if it is not JSON.
    pub fn new(input: &[u8]) -> CodecResult<Self> {
        let root: Value = serde_json::from_slice(input).map_err(|err| {
            if err.is_eof() {
                CodecError::Incomplete
            } else {
                CodecError::Corrupt(err.to_string())
            }
        })?;
        Ok(Self {
            next: Some((root, false)),
            stack: Vec::new(),
        })
    }

    fn next_value(&mut self) -> CodecResult<(Value, bool)> {
        if let Some(staged) = self.next.take() {
            return Ok(staged);
        }
        if let Some(JFrame::Map { value_pending, .. }) = self.stack.last_mut()
            && let Some(value) = value_pending.take()
        {
            return Ok((value, false));
        }
        Err(CodecError::corrupt("no value available at this position"))
    }
}

impl Decoder for JsonDecoder {
    fn get_void(&mut self) -> CodecResult<()> {
        match self.next_value()? {
            (Value::Null, _) => Ok(()),
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected void, found {}",
                describe(&other)
            ))),
        }
    }

    fn get_bool(&mut self) -> CodecResult<bool> {
        match self.next_value()? {
            (Value::Bool(v), _) => Ok(v),
            (Value::String(s), true) => s
                .parse()
                .map_err(|_| CodecError::Corrupt(format!("invalid bool key `{s}`"))),
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected bool, found {}",
                describe(&other)
            ))),
        }
    }

    fn get_i32(&mut self) -> CodecResult<i32> {
        match self.next_value()? {
            (Value::Number(n), _) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| CodecError::Corrupt(format!("number {n} is not an int32"))),
            (Value::String(s), true) => s
                .parse()
                .map_err(|_| CodecError::Corrupt(format!("invalid int32 key `{s}`"))),
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected int32, found {}",
                describe(&other)
            ))),
        }
    }

    fn get_i64(&mut self) -> CodecResult<i64> {
        match self.next_value()? {
            (Value::Number(n), _) => n
                .as_i64()
                .ok_or_else(|| CodecError::Corrupt(format!("number {n} is not an int64"))),
            (Value::String(s), true) => s
                .parse()
                .map_err(|_| CodecError::Corrupt(format!("invalid int64 key `{s}`"))),
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected int64, found {}",
                describe(&other)
            ))),
        }
    }

    fn get_f64(&mut self) -> CodecResult<f64> {
        match self.next_value()? {
            (Value::Number(n), _) => n
                .as_f64()
                .ok_or_else(|| CodecError::Corrupt(format!("number {n} is not a double"))),
            // Non-finite doubles are encoded as null.
            (Value::Null, false) => Ok(f64::NAN),
            (Value::String(s), true) => s
                .parse()
                .map_err(|_| CodecError::Corrupt(format!("invalid double key `{s}`"))),
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected double, found {}",
                describe(&other)
            ))),
        }
    }

    fn get_string(&mut self) -> CodecResult<String> {
        match self.next_value()? {
            (Value::String(s), _) => Ok(s),
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected string, found {}",
                describe(&other)
            ))),
        }
    }

    fn begin_array(&mut self) -> CodecResult<()> {
        match self.next_value()? {
            (Value::Array(items), _) => {
                self.stack.push(JFrame::Array(items.into_iter()));
                Ok(())
            }
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected array, found {}",
                describe(&other)
            ))),
        }
    }

    fn array_continue(&mut self) -> CodecResult<bool> {
        let Some(JFrame::Array(iter)) = self.stack.last_mut() else {
            return Err(CodecError::corrupt("not inside an array"));
        };
        match iter.next() {
            Some(value) => {
                self.next = Some((value, false));
                Ok(true)
            }
            None => {
                self.stack.pop();
                Ok(false)
            }
        }
    }

    fn begin_map(&mut self) -> CodecResult<()> {
        match self.next_value()? {
            (Value::Object(entries), _) => {
                self.stack.push(JFrame::Map {
                    iter: entries.into_iter(),
                    value_pending: None,
                });
                Ok(())
            }
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected map, found {}",
                describe(&other)
            ))),
        }
    }

    fn map_continue(&mut self) -> CodecResult<bool> {
        let Some(JFrame::Map { iter, value_pending }) = self.stack.last_mut() else {
            return Err(CodecError::corrupt("not inside a map"));
        };
        match iter.next() {
            Some((key, value)) => {
                *value_pending = Some(value);
                self.next = Some((Value::String(key), true));
                Ok(true)
            }
            None => {
                self.stack.pop();
                Ok(false)
            }
        }
    }

    fn begin_record(&mut self) -> CodecResult<()> {
        match self.next_value()? {
            (Value::Object(entries), _) => {
                self.stack.push(JFrame::Record(entries.into_iter()));
                Ok(())
            }
            (other, _) => Err(CodecError::Corrupt(format!(
                "expected record, found {}",
                describe(&other)
            ))),
        }
    }

    fn record_continue(&mut self) -> CodecResult<Option<String>> {
        let Some(JFrame::Record(iter)) = self.stack.last_mut() else {
            return Err(CodecError::corrupt("not inside a record"));
        };
        match iter.next() {
            Some((name, value)) => {
                self.next = Some((value, false));
                Ok(Some(name))
            }
            None => {
                self.stack.pop();
                Ok(None)
            }
        }
    }
}

pub(super) fn encode_packet(msg: &Message, out: &mut BytesMut) {
    let mut s = String::new();
    s.push_str("{\"xid\":");
    s.push_str(&msg.xid.to_string());
    s.push_str(",\"type\":");
    s.push_str(&(msg.kind() as u8).to_string());
    match &msg.body {
        MessageBody::Call(call) => {
            s.push_str(",\"service\":");
            push_json_str(&mut s, &call.service);
            s.push_str(",\"method\":");
            push_json_str(&mut s, &call.method);
            s.push_str(",\"params\":");
            match std::str::from_utf8(&call.params) {
                Ok(text) if !text.is_empty() => s.push_str(text),
                _ => s.push_str("[]"),
            }
        }
        MessageBody::Reply(reply) => {
            s.push_str(",\"status\":");
            s.push_str(&reply.status.code().to_string());
            if !reply.result.is_empty()
                && let Ok(text) = std::str::from_utf8(&reply.result)
            {
                s.push_str(",\"result\":");
                s.push_str(text);
            }
        }
    }
    s.push('}');
    out.put_slice(s.as_bytes());
}

#[derive(Debug, Deserialize)]
struct PacketIn {
    xid: u32,
    #[serde(rename = "type")]
    kind: u8,
    service: Option<String>,
    method: Option<String>,
    params: Option<Box<RawValue>>,
    status: Option<u8>,
    result: Option<Box<RawValue>>,
}

pub(super) fn decode_packet(src: &mut BytesMut) -> CodecResult<Option<Message>> {
    let mut iter = serde_json::Deserializer::from_slice(src).into_iter::<PacketIn>();
    let packet = match iter.next() {
        None => return Ok(None),
        Some(Err(err)) if err.is_eof() => return Ok(None),
        Some(Err(err)) => return Err(CodecError::Corrupt(err.to_string())),
        Some(Ok(packet)) => packet,
    };
    let consumed = iter.byte_offset();
    src.advance(consumed);

    let kind = MessageKind::from_wire(packet.kind)
        .ok_or_else(|| CodecError::Corrupt(format!("invalid message kind {}", packet.kind)))?;
    match kind {
        MessageKind::Call => {
            let service = packet
                .service
                .ok_or_else(|| CodecError::corrupt("call packet missing service"))?;
            let method = packet
                .method
                .ok_or_else(|| CodecError::corrupt("call packet missing method"))?;
            let params = packet
                .params
                .map_or_else(|| Bytes::from_static(b"[]"), raw_bytes);
            Ok(Some(Message::call(packet.xid, service, method, params)))
        }
        MessageKind::Reply => {
            let status_code = packet
                .status
                .ok_or_else(|| CodecError::corrupt("reply packet missing status"))?;
            let status = ReplyStatus::try_from(status_code)
                .map_err(|err| CodecError::corrupt(err.to_string()))?;
            let result = packet.result.map_or_else(Bytes::new, raw_bytes);
            Ok(Some(Message::reply(packet.xid, status, result)))
        }
    }
}

fn raw_bytes(raw: Box<RawValue>) -> Bytes {
    Bytes::from(raw.get().as_bytes().to_vec())
}
