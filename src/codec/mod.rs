//! Pluggable wire codecs.
//!
//! A codec turns typed values and whole [`Message`]s into bytes and back.
//! Two implementations share one surface: a compact self-describing binary
//! format ([`binary`]) and a textual JSON format ([`json`]). The codec id is
//! negotiated in the TCP handshake and named in the HTTP `codec` header, so
//! both sides of a connection always agree on the encoding of every packet.
//!
//! Value encoding is driven through the [`Encoder`]/[`Decoder`] traits and
//! the [`WireValue`] trait implemented by every transportable type. Decoding
//! distinguishes a truncated stream ([`CodecError::Incomplete`], retry with
//! more bytes) from an unrecoverable one ([`CodecError::Corrupt`]).

mod args;
mod binary;
mod framed;
mod json;

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};
use thiserror::Error;

pub use self::{
    args::{ParamList, ParamsReader},
    binary::{BinaryDecoder, BinaryEncoder},
    framed::MessageCodec,
    json::{JsonDecoder, JsonEncoder},
};
use crate::message::Message;

/// Identifies a codec, both internally and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CodecKind {
    Binary = 1,
    Json = 2,
}

impl CodecKind {
    /// One-byte discriminator used in the TCP handshake.
    #[must_use]
    pub const fn wire_id(self) -> u8 { self as u8 }

    #[must_use]
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Binary),
            2 => Some(Self::Json),
            _ => None,
        }
    }

    /// Textual name used as the HTTP `codec` header value.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Json => "json",
        }
    }

    /// Inverse of [`CodecKind::name`].
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "binary" => Some(Self::Binary),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors surfaced by value and packet decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The stream ended mid-value. Callers holding a growable buffer should
    /// keep it and retry once more bytes arrive.
    #[error("truncated input")]
    Incomplete,
    /// The stream cannot be interpreted; the connection is unrecoverable.
    #[error("corrupt stream: {0}")]
    Corrupt(String),
}

impl CodecError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self { Self::Corrupt(msg.into()) }

    /// Error for a record missing one of its REQUIRED attributes.
    #[must_use]
    pub fn missing_required(record: &str, field: &str) -> Self {
        Self::Corrupt(format!("record `{record}` is missing required attribute `{field}`"))
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Streaming value encoder. Implementations are infallible: every supported
/// value has a representation in both codecs.
///
/// Containers are written as `begin_*`, the contained values, then `end_*`.
/// Map entries alternate key then value; keys must be scalars. Record fields
/// are announced with [`Encoder::field`] before the field value; only set
/// attributes are emitted and `begin_record` takes their count.
pub trait Encoder {
    fn put_void(&mut self);
    fn put_bool(&mut self, v: bool);
    fn put_i32(&mut self, v: i32);
    fn put_i64(&mut self, v: i64);
    fn put_f64(&mut self, v: f64);
    fn put_str(&mut self, v: &str);
    fn begin_array(&mut self, len: usize);
    fn end_array(&mut self);
    fn begin_map(&mut self, len: usize);
    fn end_map(&mut self);
    fn begin_record(&mut self, fields: usize);
    fn field(&mut self, name: &str);
    fn end_record(&mut self);
}

/// Streaming value decoder over an owned byte buffer.
///
/// The array and map walk is incremental: `begin_*` enters the container,
/// `*_continue` reports whether another element follows and arms the next
/// element for decoding. This lets a caller supply the expected type one
/// position at a time and detect surplus elements without knowing their
/// types — the server's arity check is built on exactly this.
pub trait Decoder {
    fn get_void(&mut self) -> CodecResult<()>;
    fn get_bool(&mut self) -> CodecResult<bool>;
    fn get_i32(&mut self) -> CodecResult<i32>;
    fn get_i64(&mut self) -> CodecResult<i64>;
    fn get_f64(&mut self) -> CodecResult<f64>;
    fn get_string(&mut self) -> CodecResult<String>;
    fn begin_array(&mut self) -> CodecResult<()>;
    fn array_continue(&mut self) -> CodecResult<bool>;
    fn begin_map(&mut self) -> CodecResult<()>;
    fn map_continue(&mut self) -> CodecResult<bool>;
    fn begin_record(&mut self) -> CodecResult<()>;
    /// Next attribute name, or `None` at the end of the record.
    fn record_continue(&mut self) -> CodecResult<Option<String>>;
}

/// A type transportable through any codec.
pub trait WireValue: Sized {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E);

    /// # Errors
    /// Returns [`CodecError::Incomplete`] if the stream ends mid-value and
    /// [`CodecError::Corrupt`] on a type or structure mismatch.
    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self>;
}

impl WireValue for () {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) { enc.put_void(); }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> { dec.get_void() }
}

impl WireValue for bool {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) { enc.put_bool(*self); }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> { dec.get_bool() }
}

impl WireValue for i32 {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) { enc.put_i32(*self); }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> { dec.get_i32() }
}

impl WireValue for i64 {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) { enc.put_i64(*self); }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> { dec.get_i64() }
}

impl WireValue for f64 {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) { enc.put_f64(*self); }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> { dec.get_f64() }
}

impl WireValue for String {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) { enc.put_str(self); }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> { dec.get_string() }
}

impl<T: WireValue> WireValue for Vec<T> {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) {
        enc.begin_array(self.len());
        for item in self {
            item.encode(enc);
        }
        enc.end_array();
    }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> {
        dec.begin_array()?;
        let mut out = Self::new();
        while dec.array_continue()? {
            out.push(T::decode(dec)?);
        }
        Ok(out)
    }
}

impl<K: WireValue + Ord, V: WireValue> WireValue for BTreeMap<K, V> {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) {
        enc.begin_map(self.len());
        for (key, value) in self {
            key.encode(enc);
            value.encode(enc);
        }
        enc.end_map();
    }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> {
        dec.begin_map()?;
        let mut out = Self::new();
        while dec.map_continue()? {
            let key = K::decode(dec)?;
            let value = V::decode(dec)?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

impl<K: WireValue + Eq + std::hash::Hash, V: WireValue> WireValue for HashMap<K, V> {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) {
        enc.begin_map(self.len());
        for (key, value) in self {
            key.encode(enc);
            value.encode(enc);
        }
        enc.end_map();
    }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> {
        dec.begin_map()?;
        let mut out = Self::new();
        while dec.map_continue()? {
            let key = K::decode(dec)?;
            let value = V::decode(dec)?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

/// Encoder for whichever codec a connection negotiated.
#[derive(Debug)]
pub enum AnyEncoder {
    Binary(BinaryEncoder),
    Json(JsonEncoder),
}

impl AnyEncoder {
    #[must_use]
    pub fn new(codec: CodecKind) -> Self {
        match codec {
            CodecKind::Binary => Self::Binary(BinaryEncoder::new()),
            CodecKind::Json => Self::Json(JsonEncoder::new()),
        }
    }

    /// Take the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Bytes {
        match self {
            Self::Binary(enc) => enc.finish(),
            Self::Json(enc) => enc.finish(),
        }
    }
}

macro_rules! delegate_encoder {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(fn $name(&mut self, $($arg: $ty),*) {
            match self {
                Self::Binary(enc) => enc.$name($($arg),*),
                Self::Json(enc) => enc.$name($($arg),*),
            }
        })*
    };
}

impl Encoder for AnyEncoder {
    delegate_encoder! {
        put_void();
        put_bool(v: bool);
        put_i32(v: i32);
        put_i64(v: i64);
        put_f64(v: f64);
        put_str(v: &str);
        begin_array(len: usize);
        end_array();
        begin_map(len: usize);
        end_map();
        begin_record(fields: usize);
        field(name: &str);
        end_record();
    }
}

/// Decoder for whichever codec a connection negotiated. Owns its input.
#[derive(Debug)]
pub enum AnyDecoder {
    Binary(BinaryDecoder),
    Json(JsonDecoder),
}

impl AnyDecoder {
    /// # Errors
    /// For the JSON codec the input is parsed eagerly: a truncated document
    /// is [`CodecError::Incomplete`], malformed text is
    /// [`CodecError::Corrupt`]. Binary input is validated lazily.
    pub fn new(codec: CodecKind, input: Bytes) -> CodecResult<Self> {
        match codec {
            CodecKind::Binary => Ok(Self::Binary(BinaryDecoder::new(input))),
            CodecKind::Json => Ok(Self::Json(JsonDecoder::new(&input)?)),
        }
    }
}

macro_rules! delegate_decoder {
    ($($name:ident() -> $ty:ty;)*) => {
        $(fn $name(&mut self) -> $ty {
            match self {
                Self::Binary(dec) => dec.$name(),
                Self::Json(dec) => dec.$name(),
            }
        })*
    };
}

impl Decoder for AnyDecoder {
    delegate_decoder! {
        get_void() -> CodecResult<()>;
        get_bool() -> CodecResult<bool>;
        get_i32() -> CodecResult<i32>;
        get_i64() -> CodecResult<i64>;
        get_f64() -> CodecResult<f64>;
        get_string() -> CodecResult<String>;
        begin_array() -> CodecResult<()>;
        array_continue() -> CodecResult<bool>;
        begin_map() -> CodecResult<()>;
        map_continue() -> CodecResult<bool>;
        begin_record() -> CodecResult<()>;
        record_continue() -> CodecResult<Option<String>>;
    }
}

/// Encode one value with the given codec.
#[must_use]
pub fn encode_value<T: WireValue>(codec: CodecKind, value: &T) -> Bytes {
    let mut enc = AnyEncoder::new(codec);
    value.encode(&mut enc);
    enc.finish()
}

/// Decode one value with the given codec.
///
/// # Errors
/// Returns an error if the bytes do not hold exactly one value of type `T`.
pub fn decode_value<T: WireValue>(codec: CodecKind, input: Bytes) -> CodecResult<T> {
    let mut dec = AnyDecoder::new(codec, input)?;
    T::decode(&mut dec)
}

/// Walk a record's attributes, dispatching each to `on_field`.
///
/// `on_field` decodes known attributes and returns `true`; returning `false`
/// rejects the attribute name, which fails the whole record. Used by manual
/// [`WireValue`] impls for composite types; REQUIRED-attribute checks are
/// the caller's, via [`CodecError::missing_required`].
///
/// # Errors
/// Propagates decoding failures; an unrecognized attribute is
/// [`CodecError::Corrupt`].
pub fn decode_record_fields<D, F>(dec: &mut D, mut on_field: F) -> CodecResult<()>
where
    D: Decoder + ?Sized,
    F: FnMut(&str, &mut D) -> CodecResult<bool>,
{
    dec.begin_record()?;
    while let Some(name) = dec.record_continue()? {
        if !on_field(&name, dec)? {
            return Err(CodecError::Corrupt(format!("unknown attribute `{name}`")));
        }
    }
    Ok(())
}

/// Frame one [`Message`] into `out` with the given codec.
pub fn encode_packet(codec: CodecKind, msg: &Message, out: &mut BytesMut) {
    match codec {
        CodecKind::Binary => binary::encode_packet(msg, out),
        CodecKind::Json => json::encode_packet(msg, out),
    }
}

/// Decode one [`Message`] from the front of `src`.
///
/// Returns `Ok(None)` when `src` does not yet hold a whole packet; the
/// buffer is left untouched so the caller can retry after reading more.
/// On success the packet's bytes are consumed from `src`.
///
/// # Errors
/// Returns [`CodecError::Corrupt`] when the stream cannot be a packet.
pub fn decode_packet(codec: CodecKind, src: &mut BytesMut) -> CodecResult<Option<Message>> {
    match codec {
        CodecKind::Binary => binary::decode_packet(src),
        CodecKind::Json => json::decode_packet(src),
    }
}
