//! Reply status codes shared by every transport.
//!
//! The numeric assignment is part of the wire contract: values below 100
//! originate on the server, values of 100 and above originate in the client
//! or transport layer and never travel on the wire in a server reply.

use thiserror::Error;

/// Outcome of a single RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReplyStatus {
    /// The call executed and returned a result.
    Success = 0,
    /// No service registered under the requested name.
    ServiceUnavailable = 1,
    /// The service has no such method.
    ProcUnavailable = 2,
    /// Argument decoding or arity check failed.
    GarbageArgs = 3,
    /// Framework failure on the server (executor saturation, invoker error).
    SystemError = 4,
    /// Network failure, non-200 HTTP response, or undecodable reply.
    ConnError = 100,
    /// The connection closed while the call was in flight.
    ConnClosed = 101,
    /// The per-call timer expired before a reply arrived.
    QueryTimeout = 102,
}

/// A reply carried a status byte outside the closed enumeration.
#[derive(Debug, Error)]
#[error("unknown reply status code {0}")]
pub struct UnknownStatus(pub u8);

impl ReplyStatus {
    /// Stable textual name, used in error hints when a failure reply has an
    /// empty body.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::ProcUnavailable => "PROC_UNAVAILABLE",
            Self::GarbageArgs => "GARBAGE_ARGS",
            Self::SystemError => "SYSTEM_ERROR",
            Self::ConnError => "CONN_ERROR",
            Self::ConnClosed => "CONN_CLOSED",
            Self::QueryTimeout => "QUERY_TIMEOUT",
        }
    }

    /// Whether this status originates in the client or transport layer.
    ///
    /// Client-side statuses are never encoded into a server reply; the send
    /// failure path asserts this invariant.
    #[must_use]
    pub const fn is_client_side(self) -> bool { (self as u8) >= 100 }

    /// Numeric wire code.
    #[must_use]
    pub const fn code(self) -> u8 { self as u8 }
}

impl TryFrom<u8> for ReplyStatus {
    type Error = UnknownStatus;

    fn try_from(value: u8) -> Result<Self, UnknownStatus> {
        match value {
            0 => Ok(Self::Success),
            1 => Ok(Self::ServiceUnavailable),
            2 => Ok(Self::ProcUnavailable),
            3 => Ok(Self::GarbageArgs),
            4 => Ok(Self::SystemError),
            100 => Ok(Self::ConnError),
            101 => Ok(Self::ConnClosed),
            102 => Ok(Self::QueryTimeout),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl std::fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ReplyStatus;

    #[rstest]
    #[case(ReplyStatus::Success, 0, false)]
    #[case(ReplyStatus::ServiceUnavailable, 1, false)]
    #[case(ReplyStatus::ProcUnavailable, 2, false)]
    #[case(ReplyStatus::GarbageArgs, 3, false)]
    #[case(ReplyStatus::SystemError, 4, false)]
    #[case(ReplyStatus::ConnError, 100, true)]
    #[case(ReplyStatus::ConnClosed, 101, true)]
    #[case(ReplyStatus::QueryTimeout, 102, true)]
    fn codes_are_stable(#[case] status: ReplyStatus, #[case] code: u8, #[case] client: bool) {
        assert_eq!(status.code(), code);
        assert_eq!(status.is_client_side(), client);
        assert_eq!(ReplyStatus::try_from(code).expect("round-trip"), status);
    }

    #[rstest]
    fn unknown_code_is_rejected() {
        assert!(ReplyStatus::try_from(57).is_err());
    }
}
