//! Tokio codec adapter for message framing.
//!
//! [`MessageCodec`] implements Tokio's [`Decoder`] and [`Encoder`] traits
//! over the packet form of the negotiated codec, for use with
//! [`tokio_util::codec::Framed`] on TCP streams. A partial packet leaves the
//! read buffer untouched; a corrupt one surfaces as `InvalidData`, which
//! tears the connection down.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::{CodecError, CodecKind, decode_packet, encode_packet};
use crate::message::Message;

/// Default cap on a single packet, a buffer-DoS guard.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct MessageCodec {
    codec: CodecKind,
    max_packet_size: usize,
}

impl MessageCodec {
    #[must_use]
    pub const fn new(codec: CodecKind) -> Self {
        Self {
            codec,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    #[must_use]
    pub const fn with_max_packet_size(mut self, max: usize) -> Self {
        self.max_packet_size = max;
        self
    }

    #[must_use]
    pub const fn kind(&self) -> CodecKind { self.codec }
}

impl Decoder for MessageCodec {
    type Error = io::Error;
    type Item = Message;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, io::Error> {
        match decode_packet(self.codec, src) {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => {
                if src.len() > self.max_packet_size {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "packet exceeds maximum size",
                    ));
                }
                Ok(None)
            }
            Err(CodecError::Incomplete) => Ok(None),
            Err(CodecError::Corrupt(msg)) => {
                Err(io::Error::new(io::ErrorKind::InvalidData, msg))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, io::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if !src.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "incomplete packet at end of stream",
            ));
        }
        Ok(None)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), io::Error> {
        let before = dst.len();
        encode_packet(self.codec, &item, dst);
        if dst.len() - before > self.max_packet_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "packet exceeds maximum size",
            ));
        }
        Ok(())
    }
}

/// Passthrough for frames already encoded on a worker (the encode-now reply
/// mode). The bytes must hold exactly one packet in this codec's format.
impl Encoder<bytes::Bytes> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: bytes::Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        if item.len() > self.max_packet_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "packet exceeds maximum size",
            ));
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;

    use super::*;
    use crate::status::ReplyStatus;

    #[rstest]
    #[case::binary(CodecKind::Binary)]
    #[case::json(CodecKind::Json)]
    fn round_trips_call(#[case] kind: CodecKind) {
        let mut codec = MessageCodec::new(kind);
        let params = crate::codec::ParamList::new(kind).finish();
        let msg = Message::call(7, "calc", "Add", params);

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case::binary(CodecKind::Binary)]
    #[case::json(CodecKind::Json)]
    fn partial_packet_returns_none(#[case] kind: CodecKind) {
        let mut codec = MessageCodec::new(kind);
        let msg = Message::reply(3, ReplyStatus::Success, Bytes::from_static(b""));
        let mut full = BytesMut::new();
        codec.encode(msg, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        let len_before = partial.len();
        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), len_before);
    }

    #[rstest]
    #[case::binary(CodecKind::Binary)]
    #[case::json(CodecKind::Json)]
    fn pipelined_packets_decode_in_order(#[case] kind: CodecKind) {
        let mut codec = MessageCodec::new(kind);
        let first = Message::reply(1, ReplyStatus::Success, Bytes::new());
        let second = Message::reply(2, ReplyStatus::GarbageArgs, Bytes::new());
        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn corrupt_binary_kind_errors() {
        let mut codec = MessageCodec::new(CodecKind::Binary);
        let mut buf = BytesMut::from(&[0u8, 0, 0, 1, 9, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn oversized_buffer_without_packet_errors() {
        let mut codec = MessageCodec::new(CodecKind::Json).with_max_packet_size(8);
        let mut buf = BytesMut::from(&b"{\"xid\": 1, \"type\""[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
