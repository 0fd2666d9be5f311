//! Failsafe HTTP client transport.
//!
//! Layers load-balancing and bounded retries over a set of HTTP backends.
//! Each call walks a freshly shuffled backend order until one answers or
//! the attempt limit runs out. A per-query cancel flag lets the layer drop
//! a reply that arrives after the caller has lost interest; the retry
//! algorithm itself stays behind this module's interface.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{
    ClientError, ClientTransport,
    calls::{CallTable, Command, ResponseCallback, await_fence},
    http::{HttpExchange, post_call},
    timeout::Timeouter,
};
use crate::{
    codec::{CodecKind, decode_packet, encode_packet},
    config::ClientConfig,
    message::{Message, MessageBody},
    status::ReplyStatus,
    transport::Credentials,
};

/// HTTP client transport spreading calls over several backends.
pub struct FailsafeHttpClientConnection {
    codec: CodecKind,
    calls: Arc<CallTable>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl FailsafeHttpClientConnection {
    /// Build the transport over `backends` (full processor URLs).
    ///
    /// `max_attempts` bounds the backend walks per call; it is clamped to at
    /// least one attempt.
    ///
    /// # Errors
    /// Fails when no backends are given or the HTTP client cannot be built.
    pub fn new(
        backends: Vec<String>,
        max_attempts: usize,
        codec: CodecKind,
        credentials: Option<Credentials>,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        if backends.is_empty() {
            return Err(ClientError::NoBackends);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let calls = Arc::new(CallTable::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(
            client,
            backends,
            max_attempts.max(1),
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
impl ClientTransport for FailsafeHttpClientConnection {
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

#[expect(clippy::too_many_arguments, reason = "driver wiring, called once")]
async fn drive(
    client: reqwest::Client,
    backends: Vec<String>,
    max_attempts: usize,
    codec: CodecKind,
    credentials: Option<Credentials>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    calls: Arc<CallTable>,
) {
    let mut timeouts = Timeouter::new();
    // Cancel flags for calls with a request walk in flight.
    let mut lost_interest: HashMap<u32, Arc<AtomicBool>> = HashMap::new();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<HttpExchange>();
    let mut close_ack = None;
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None => break,
                Some(Command::Send { msg, timeout }) => {
                    let xid = msg.xid;
                    timeouts.set(xid, timeout);
                    let flag = Arc::new(AtomicBool::new(false));
                    lost_interest.insert(xid, Arc::clone(&flag));
                    let mut body = BytesMut::new();
                    encode_packet(codec, &msg, &mut body);
                    tokio::spawn(attempt_backends(
                        client.clone(),
                        backends.clone(),
                        max_attempts,
                        codec,
                        credentials.clone(),
                        xid,
                        body.freeze(),
                        timeout,
                        flag,
                        done_tx.clone(),
                    ));
                }
                Some(Command::Cancel { xid, ack }) => {
                    timeouts.unset(xid);
                    if let Some(flag) = lost_interest.remove(&xid) {
                        flag.store(true, Ordering::SeqCst);
                    }
                    let _ = ack.send(());
                }
                Some(Command::CancelAll { ack }) => {
                    timeouts.clear();
                    for flag in lost_interest.values() {
                        flag.store(true, Ordering::SeqCst);
                    }
                    lost_interest.clear();
                    let _ = ack.send(());
                }
                Some(Command::Close { ack }) => {
                    close_ack = Some(ack);
                    break;
                }
            },
            exchange = done_rx.recv() => {
                let Some(exchange) = exchange else { break };
                lost_interest.remove(&exchange.xid);
                handle_exchange(&calls, &mut timeouts, codec, exchange);
            }
            xid = timeouts.next_expired() => {
                if let Some(flag) = lost_interest.remove(&xid) {
                    flag.store(true, Ordering::SeqCst);
                }
                calls.complete(xid, ReplyStatus::QueryTimeout, Bytes::new());
            }
        }
    }

    for flag in lost_interest.values() {
        flag.store(true, Ordering::SeqCst);
    }
    timeouts.clear();
    calls.complete_all(ReplyStatus::ConnClosed);
    if let Some(ack) = close_ack {
        let _ = ack.send(());
    }
}

/// Walk the backends in a shuffled order until one answers.
#[expect(clippy::too_many_arguments, reason = "task wiring, called once")]
async fn attempt_backends(
    client: reqwest::Client,
    mut backends: Vec<String>,
    max_attempts: usize,
    codec: CodecKind,
    credentials: Option<Credentials>,
    xid: u32,
    body: Bytes,
    timeout: Duration,
    lost_interest: Arc<AtomicBool>,
    done_tx: mpsc::UnboundedSender<HttpExchange>,
) {
    backends.shuffle(&mut rand::thread_rng());
    let mut last_error = String::from("no attempt made");
    for (attempt, backend) in backends.iter().cycle().take(max_attempts).enumerate() {
        if lost_interest.load(Ordering::SeqCst) {
            debug!(target: "client::failsafe", xid, "dropping walk, caller lost interest");
            return;
        }
        match post_call(&client, backend, codec, credentials.as_ref(), body.clone(), timeout).await
        {
            Ok(reply) => {
                if lost_interest.load(Ordering::SeqCst) {
                    debug!(target: "client::failsafe", xid, "dropping late reply");
                    return;
                }
                let _ = done_tx.send(HttpExchange {
                    xid,
                    outcome: Ok(reply),
                });
                return;
            }
            Err(why) => {
                debug!(
                    target: "client::failsafe",
                    xid, attempt, backend = %backend, "attempt failed: {why}"
                );
                last_error = why;
            }
        }
    }
    let _ = done_tx.send(HttpExchange {
        xid,
        outcome: Err(last_error),
    });
}

fn handle_exchange(
    calls: &CallTable,
    timeouts: &mut Timeouter,
    codec: CodecKind,
    exchange: HttpExchange,
) {
    let xid = exchange.xid;
    match exchange.outcome {
        Ok(payload) => {
            let mut buf = BytesMut::from(&payload[..]);
            match decode_packet(codec, &mut buf) {
                Ok(Some(Message {
                    body: MessageBody::Reply(reply),
                    ..
                })) => {
                    timeouts.unset(xid);
                    calls.complete(xid, reply.status, reply.result);
                }
                other => {
                    warn!(target: "client::failsafe", xid, "undecodable reply body: {other:?}");
                }
            }
        }
        Err(why) => {
            warn!(target: "client::failsafe", xid, "all attempts failed: {why}");
            timeouts.unset(xid);
            calls.complete(xid, ReplyStatus::ConnError, Bytes::new());
        }
    }
}
