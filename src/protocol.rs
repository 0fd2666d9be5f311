//! Constants and helpers for the TCP wire protocol.
//!
//! The TCP transport opens with a two-byte handshake (a fixed lead byte
//! followed by the codec id), mirrored by the peer. Everything after the
//! handshake is framed [`crate::message::Message`] packets in the negotiated
//! codec. The handshake is codec negotiation only.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};

use crate::codec::CodecKind;

/// Number of bytes in the handshake, identical in both directions.
pub const HANDSHAKE_LEN: usize = 2;
/// Fixed lead byte opening the handshake.
pub const HANDSHAKE_LEAD: u8 = 0xAB;
/// Timeout for the whole handshake exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while negotiating the handshake.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("invalid handshake lead byte 0x{0:02x}")]
    InvalidLead(u8),
    #[error("unknown codec id {0}")]
    UnknownCodec(u8),
    #[error("peer mirrored codec {got} instead of {want}")]
    CodecMismatch { want: &'static str, got: &'static str },
    #[error("handshake timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for HandshakeError {
    fn from(err: io::Error) -> Self { Self::Io(err.to_string()) }
}

/// Parse the two handshake bytes into the negotiated codec.
///
/// # Errors
/// Returns an error if the lead byte or the codec id is unknown.
pub fn parse_handshake(buf: &[u8; HANDSHAKE_LEN]) -> Result<CodecKind, HandshakeError> {
    if buf[0] != HANDSHAKE_LEAD {
        return Err(HandshakeError::InvalidLead(buf[0]));
    }
    CodecKind::from_wire(buf[1]).ok_or(HandshakeError::UnknownCodec(buf[1]))
}

/// Serialize the handshake for the given codec.
#[must_use]
pub const fn handshake_bytes(codec: CodecKind) -> [u8; HANDSHAKE_LEN] {
    [HANDSHAKE_LEAD, codec.wire_id()]
}

/// Client half of the handshake: send our codec, expect it mirrored.
///
/// # Errors
/// Returns an error on timeout, I/O failure, or a non-mirrored reply.
pub async fn client_handshake<S>(stream: &mut S, codec: CodecKind) -> Result<(), HandshakeError>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    stream.write_all(&handshake_bytes(codec)).await?;
    let mut buf = [0u8; HANDSHAKE_LEN];
    tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    let mirrored = parse_handshake(&buf)?;
    if mirrored != codec {
        return Err(HandshakeError::CodecMismatch {
            want: codec.name(),
            got: mirrored.name(),
        });
    }
    Ok(())
}

/// Server half of the handshake: read the client codec and mirror it back.
///
/// # Errors
/// Returns an error on timeout, I/O failure, or an unknown lead/codec byte.
pub async fn server_handshake<S>(stream: &mut S) -> Result<CodecKind, HandshakeError>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_LEN];
    tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    let codec = parse_handshake(&buf)?;
    stream.write_all(&handshake_bytes(codec)).await?;
    Ok(codec)
}
