//! Client-side runtime: transports, the shared call machinery, and the
//! typed service wrapper.

mod calls;
pub mod failsafe;
pub mod http;
mod timeout;
pub mod tcp;
pub mod wrapper;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot;

pub use self::{
    calls::ResponseCallback,
    failsafe::FailsafeHttpClientConnection,
    http::HttpClientConnection,
    tcp::TcpClientConnection,
    wrapper::{CallFailure, CallId, ServiceWrapper},
};
use crate::{codec::CodecKind, protocol::HandshakeError, status::ReplyStatus};

/// Errors raised while establishing or driving a client connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no backends configured")]
    NoBackends,
}

/// The capability surface shared by every client transport.
///
/// A transport multiplexes concurrent calls over one connection, keyed by
/// XID. Per call, the reply callback is invoked exactly once — on reply
/// arrival, send failure, timeout, or the connection-close sweep — or never,
/// if the call is cancelled first.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// The codec every message on this connection is encoded with.
    fn codec(&self) -> CodecKind;

    /// Start an asynchronous call and return its XID immediately.
    ///
    /// `params` is the encoded argument tuple. The callback fires after at
    /// most `timeout`, with `QUERY_TIMEOUT` if no reply won the race.
    fn async_query(
        &self,
        service: &str,
        method: &str,
        params: Bytes,
        timeout: Duration,
        callback: ResponseCallback,
    ) -> u32;

    /// Synchronous convenience over [`ClientTransport::async_query`].
    async fn query(
        &self,
        service: &str,
        method: &str,
        params: Bytes,
        timeout: Duration,
    ) -> (ReplyStatus, Bytes) {
        let (done_tx, done_rx) = oneshot::channel();
        self.async_query(
            service,
            method,
            params,
            timeout,
            Box::new(move |_xid, status, result| {
                let _ = done_tx.send((status, result));
            }),
        );
        // The callback is dropped uninvoked only if the call is cancelled
        // out from under us.
        done_rx
            .await
            .unwrap_or_else(|_| (ReplyStatus::ConnError, Bytes::new()))
    }

    /// Cancel one call: its callback will not be invoked by any future
    /// event. Resolves only after the cancellation is fenced against an
    /// in-flight delivery.
    async fn cancel_query(&self, xid: u32);

    /// Cancel every pending call, with the same fence guarantee.
    async fn cancel_all_queries(&self);

    /// Close the connection. Pending calls complete with `CONN_CLOSED`
    /// before this resolves.
    async fn close(&self);
}
