//! In-memory representation of one RPC packet.
//!
//! A [`Message`] is either a CALL (service, method, encoded parameter tuple)
//! or a REPLY (status, encoded result). Ownership of the message, including
//! its body buffers, transfers with every hand-off between layers.

use bytes::Bytes;

use crate::status::ReplyStatus;

/// Wire tag distinguishing the two message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Call = 1,
    Reply = 2,
}

impl MessageKind {
    /// Stable textual name, used in protocol diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Reply => "REPLY",
        }
    }

    #[must_use]
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Call),
            2 => Some(Self::Reply),
            _ => None,
        }
    }
}

/// Body of a CALL message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBody {
    /// Routing name of the target service instance.
    pub service: String,
    /// Method name within the service.
    pub method: String,
    /// Parameter tuple, already encoded with the connection codec.
    pub params: Bytes,
}

/// Body of a REPLY message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyBody {
    pub status: ReplyStatus,
    /// Result value, encoded with the connection codec. Empty on most
    /// failures; may carry an encoded string hint.
    pub result: Bytes,
}

/// One RPC packet: a 32-bit transaction id plus a CALL or REPLY body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub xid: u32,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Call(CallBody),
    Reply(ReplyBody),
}

impl Message {
    /// Build a CALL message.
    #[must_use]
    pub fn call(
        xid: u32,
        service: impl Into<String>,
        method: impl Into<String>,
        params: Bytes,
    ) -> Self {
        Self {
            xid,
            body: MessageBody::Call(CallBody {
                service: service.into(),
                method: method.into(),
                params,
            }),
        }
    }

    /// Build a REPLY message.
    #[must_use]
    pub fn reply(xid: u32, status: ReplyStatus, result: Bytes) -> Self {
        Self {
            xid,
            body: MessageBody::Reply(ReplyBody { status, result }),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self.body {
            MessageBody::Call(_) => MessageKind::Call,
            MessageBody::Reply(_) => MessageKind::Reply,
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.body {
            MessageBody::Call(call) => write!(
                f,
                "CALL xid={} {}::{} ({} param bytes)",
                self.xid,
                call.service,
                call.method,
                call.params.len()
            ),
            MessageBody::Reply(reply) => write!(
                f,
                "REPLY xid={} {} ({} result bytes)",
                self.xid,
                reply.status,
                reply.result.len()
            ),
        }
    }
}
