//! TCP client transport.
//!
//! After the codec handshake, the connection is framed messages both ways.
//! A single driver task owns the socket and the timeouter; entry points
//! talk to it over a command channel, which is also what gives the cancel
//! operations their fence semantics.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, sync::oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::{
    ClientError, ClientTransport,
    calls::{CallTable, Command, ResponseCallback, await_fence},
    timeout::Timeouter,
};
use crate::{
    codec::{CodecKind, MessageCodec},
    config::ClientConfig,
    message::{Message, MessageBody},
    protocol::client_handshake,
    status::ReplyStatus,
};

/// A connected TCP client transport. Cheap to share via [`Arc`].
pub struct TcpClientConnection {
    codec: CodecKind,
    calls: Arc<CallTable>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl TcpClientConnection {
    /// Connect, run the codec handshake, and start the driver task.
    ///
    /// # Errors
    /// Fails on connect timeout, socket errors, or a failed handshake.
    pub async fn connect(
        addr: &str,
        codec: CodecKind,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let connect = TcpStream::connect(addr);
        let mut stream = tokio::time::timeout(config.connect_timeout(), connect)
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;
        client_handshake(&mut stream, codec).await?;
        debug!(target: "client::tcp", %addr, codec = %codec, "connected");

        let framed = Framed::new(
            stream,
            MessageCodec::new(codec).with_max_packet_size(config.max_body_size),
        );
        let calls = Arc::new(CallTable::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(framed, cmd_rx, Arc::clone(&calls)));
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
impl ClientTransport for TcpClientConnection {
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
        // The send happens on the driver task; the callback just parked in
        // the table is what a send failure would complete.
        if self.cmd_tx.send(Command::Send { msg, timeout }).is_err() {
            self.calls.complete(xid, ReplyStatus::ConnClosed, Bytes::new());
        }
        xid
    }

    async fn cancel_query(&self, xid: u32) {
        // Pop first so no delivery can win after this point; the fence then
        // orders us behind any delivery already dispatched.
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

async fn drive(
    mut framed: Framed<TcpStream, MessageCodec>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    calls: Arc<CallTable>,
) {
    let mut timeouts = Timeouter::new();
    let mut close_ack = None;
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                // Every handle is gone; nobody can observe this connection.
                None => break,
                Some(Command::Send { msg, timeout }) => {
                    let xid = msg.xid;
                    timeouts.set(xid, timeout);
                    if let Err(err) = framed.send(msg).await {
                        warn!(target: "client::tcp", xid, "send failed: {err}");
                        timeouts.unset(xid);
                        calls.complete(xid, ReplyStatus::ConnError, Bytes::new());
                        break;
                    }
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
            incoming = framed.next() => match incoming {
                Some(Ok(msg)) => handle_response(&calls, &mut timeouts, msg),
                Some(Err(err)) => {
                    warn!(target: "client::tcp", "receive failed: {err}");
                    break;
                }
                None => {
                    debug!(target: "client::tcp", "peer closed the connection");
                    break;
                }
            },
            xid = timeouts.next_expired() => {
                // A wire-level cancel would go here; the call is already on
                // the wire, so the eventual reply is discarded as
                // unknown-XID instead.
                calls.complete(xid, ReplyStatus::QueryTimeout, Bytes::new());
            }
        }
    }

    // Connection-close sweep, exactly once, before the driver goes away.
    timeouts.clear();
    calls.complete_all(ReplyStatus::ConnClosed);
    if let Some(ack) = close_ack {
        let _ = ack.send(());
    }
}

fn handle_response(calls: &CallTable, timeouts: &mut Timeouter, msg: Message) {
    let xid = msg.xid;
    let MessageBody::Reply(reply) = msg.body else {
        warn!(target: "client::tcp", xid, "unexpected CALL from server");
        return;
    };
    timeouts.unset(xid);
    calls.complete(xid, reply.status, reply.result);
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::server_handshake;

    /// What the scripted server does after the handshake.
    #[derive(Clone, Copy)]
    enum Script {
        /// Echo every CALL's params back as a `SUCCESS` reply.
        Echo,
        /// Read calls but never answer.
        Mute,
        /// Drop the socket right after the handshake.
        Hangup,
    }

    async fn scripted_server(script: Script) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _peer) = listener.accept().await.unwrap();
            let codec = server_handshake(&mut socket).await.unwrap();
            if matches!(script, Script::Hangup) {
                return;
            }
            let mut framed = Framed::new(socket, MessageCodec::new(codec));
            while let Some(Ok(msg)) = framed.next().await {
                let MessageBody::Call(call) = msg.body else { continue };
                if matches!(script, Script::Mute) {
                    continue;
                }
                let reply = Message::reply(msg.xid, ReplyStatus::Success, call.params);
                if framed.send(reply).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    async fn connect(addr: std::net::SocketAddr) -> TcpClientConnection {
        TcpClientConnection::connect(
            &addr.to_string(),
            CodecKind::Binary,
            &ClientConfig::default(),
        )
        .await
        .expect("connect")
    }

    #[tokio::test]
    async fn xids_are_monotonic_and_replies_route_by_xid() {
        let addr = scripted_server(Script::Echo).await;
        let conn = connect(addr).await;

        let first = conn
            .query("svc", "m", Bytes::from_static(b"\x06\x00\x00\x00\x00"), Duration::from_secs(5));
        let (status, _result) = first.await;
        assert_eq!(status, ReplyStatus::Success);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let xid_a = conn.async_query(
            "svc",
            "m",
            Bytes::from_static(b"\x06\x00\x00\x00\x00"),
            Duration::from_secs(5),
            Box::new(move |xid, status, _result| {
                sink.lock().unwrap().push((xid, status));
            }),
        );
        let sink = Arc::clone(&seen);
        let xid_b = conn.async_query(
            "svc",
            "m",
            Bytes::from_static(b"\x06\x00\x00\x00\x00"),
            Duration::from_secs(5),
            Box::new(move |xid, status, _result| {
                sink.lock().unwrap().push((xid, status));
            }),
        );
        assert!(xid_b > xid_a);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, status)| *status == ReplyStatus::Success));

        conn.close().await;
    }

    #[tokio::test]
    async fn unanswered_call_times_out_exactly_once() {
        let addr = scripted_server(Script::Mute).await;
        let conn = connect(addr).await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        conn.async_query(
            "svc",
            "m",
            Bytes::from_static(b"\x06\x00\x00\x00\x00"),
            Duration::from_millis(100),
            Box::new(move |_xid, status, result| {
                assert_eq!(status, ReplyStatus::QueryTimeout);
                assert!(result.is_empty());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        conn.close().await;
    }

    #[tokio::test]
    async fn cancel_wins_over_a_later_timeout() {
        let addr = scripted_server(Script::Mute).await;
        let conn = connect(addr).await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let xid = conn.async_query(
            "svc",
            "m",
            Bytes::from_static(b"\x06\x00\x00\x00\x00"),
            Duration::from_millis(100),
            Box::new(move |_xid, _status, _result| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        conn.cancel_query(xid).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        conn.close().await;
    }

    #[tokio::test]
    async fn hangup_sweeps_with_conn_closed() {
        let addr = scripted_server(Script::Hangup).await;
        let conn = connect(addr).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let sink = Arc::clone(&seen);
            conn.async_query(
                "svc",
                "m",
                Bytes::from_static(b"\x06\x00\x00\x00\x00"),
                Duration::from_secs(30),
                Box::new(move |xid, status, _result| {
                    sink.lock().unwrap().push((xid, status));
                }),
            );
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, status)| *status == ReplyStatus::ConnClosed));

        conn.close().await;
    }
}
