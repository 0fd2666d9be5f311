//! HTTP client transport.
//!
//! No handshake: every call is one POST to the configured endpoint with the
//! codec named in the `codec` header and the encoded CALL as the body. The
//! reply comes back in the 200 response body; any other status is a
//! connection error for that call. There is no wire-level cancel — a
//! request in flight either completes or is discarded on arrival.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{
    ClientError, ClientTransport,
    calls::{CallTable, Command, ResponseCallback, await_fence},
    timeout::Timeouter,
};
use crate::{
    codec::{CodecKind, decode_packet, encode_packet},
    config::ClientConfig,
    message::{Message, MessageBody},
    status::ReplyStatus,
    transport::Credentials,
};

/// Slack added on top of the RPC timeout for the HTTP request itself; the
/// timeouter reaps the call first, this only bounds the socket.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// One completed (or failed) HTTP exchange, delivered to the driver.
pub(crate) struct HttpExchange {
    pub(crate) xid: u32,
    pub(crate) outcome: Result<Bytes, String>,
}

/// Issue one POST carrying an encoded CALL; returns the response body.
pub(crate) async fn post_call(
    client: &reqwest::Client,
    url: &str,
    codec: CodecKind,
    credentials: Option<&Credentials>,
    body: Bytes,
    timeout: Duration,
) -> Result<Bytes, String> {
    let mut request = client
        .post(url)
        .header("codec", codec.name())
        .timeout(timeout + REQUEST_TIMEOUT_SLACK)
        .body(body);
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.user, Some(&creds.password));
    }
    let response = request.send().await.map_err(|err| err.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("http status {status}"));
    }
    response.bytes().await.map_err(|err| err.to_string())
}

/// HTTP client transport over a single endpoint.
pub struct HttpClientConnection {
    codec: CodecKind,
    calls: Arc<CallTable>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl HttpClientConnection {
    /// Build the transport and start its driver task.
    ///
    /// `endpoint` is the full URL of the processor path, e.g.
    /// `http://127.0.0.1:8080/rpc/calc`.
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(
        endpoint: impl Into<String>,
        codec: CodecKind,
        credentials: Option<Credentials>,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let calls = Arc::new(CallTable::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(
            client,
            endpoint.into(),
            codec,
            credentials,
            cmd_rx,
            Arc::clone(&calls),
        ));
        Ok(Self {
            codec,
            calls,
            cmd_tx,
        })
    }

    async fn fence(&self, make: impl FnOnce(oneshot::Sender<()>) -> Command, what: &str) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(make(ack_tx)).is_ok() {
            await_fence(ack_rx, what).await;
        }
    }
}

#[async_trait]
impl ClientTransport for HttpClientConnection {
    fn codec(&self) -> CodecKind { self.codec }

    fn async_query(
        &self,
        service: &str,
        method: &str,
        params: Bytes,
        timeout: Duration,
        callback: ResponseCallback,
    ) -> u32 {
        let xid = self.calls.generate_xid();
        self.calls.insert(xid, callback);
        let msg = Message::call(xid, service, method, params);
        if self.cmd_tx.send(Command::Send { msg, timeout }).is_err() {
            self.calls.complete(xid, ReplyStatus::ConnClosed, Bytes::new());
        }
        xid
    }

    async fn cancel_query(&self, xid: u32) {
        self.calls.discard(xid);
        // Wire-level cancel is a no-op for HTTP: the request is in flight or
        // already answered. The fence still orders us behind deliveries.
        self.fence(|ack| Command::Cancel { xid, ack }, "cancel").await;
    }

    async fn cancel_all_queries(&self) {
        self.calls.discard_all();
        self.fence(|ack| Command::CancelAll { ack }, "cancel-all").await;
    }

    async fn close(&self) {
        self.fence(|ack| Command::Close { ack }, "close").await;
        debug_assert!(self.calls.is_empty(), "calls pending after close");
    }
}

async fn drive(
    client: reqwest::Client,
    endpoint: String,
    codec: CodecKind,
    credentials: Option<Credentials>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    calls: Arc<CallTable>,
) {
    let mut timeouts = Timeouter::new();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<HttpExchange>();
    let mut close_ack = None;
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None => break,
                Some(Command::Send { msg, timeout }) => {
                    let xid = msg.xid;
                    timeouts.set(xid, timeout);
                    let mut body = BytesMut::new();
                    encode_packet(codec, &msg, &mut body);
                    let client = client.clone();
                    let endpoint = endpoint.clone();
                    let credentials = credentials.clone();
                    let done_tx = done_tx.clone();
                    tokio::spawn(async move {
                        let outcome = post_call(
                            &client,
                            &endpoint,
                            codec,
                            credentials.as_ref(),
                            body.freeze(),
                            timeout,
                        )
                        .await;
                        let _ = done_tx.send(HttpExchange { xid, outcome });
                    });
                }
                Some(Command::Cancel { xid, ack }) => {
                    timeouts.unset(xid);
                    let _ = ack.send(());
                }
                Some(Command::CancelAll { ack }) => {
                    timeouts.clear();
                    let _ = ack.send(());
                }
                Some(Command::Close { ack }) => {
                    close_ack = Some(ack);
                    break;
                }
            },
            exchange = done_rx.recv() => {
                // A sender half lives in this scope, so recv cannot yield None.
                let Some(exchange) = exchange else { break };
                handle_exchange(&calls, &mut timeouts, codec, exchange);
            }
            xid = timeouts.next_expired() => {
                calls.complete(xid, ReplyStatus::QueryTimeout, Bytes::new());
            }
        }
    }

    timeouts.clear();
    calls.complete_all(ReplyStatus::ConnClosed);
    if let Some(ack) = close_ack {
        let _ = ack.send(());
    }
}

fn handle_exchange(
    calls: &CallTable,
    timeouts: &mut Timeouter,
    codec: CodecKind,
    exchange: HttpExchange,
) {
    let xid = exchange.xid;
    match exchange.outcome {
        Ok(body) => {
            let mut buf = BytesMut::from(&body[..]);
            match decode_packet(codec, &mut buf) {
                Ok(Some(Message {
                    body: MessageBody::Reply(reply),
                    ..
                })) => {
                    timeouts.unset(xid);
                    calls.complete(xid, reply.status, reply.result);
                }
                // A complete HTTP response cannot hold a partial packet and
                // must hold a reply; drop anything else and let the timeout
                // reap the call.
                other => {
                    warn!(target: "client::http", xid, "undecodable reply body: {other:?}");
                }
            }
        }
        Err(why) => {
            debug!(target: "client::http", xid, "request failed: {why}");
            timeouts.unset(xid);
            calls.complete(xid, ReplyStatus::ConnError, Bytes::new());
        }
    }
}
