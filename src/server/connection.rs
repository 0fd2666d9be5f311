//! Per-socket server connection: handshake, framed reads, query dispatch,
//! reply writes.
//!
//! Replies may complete on any executor worker; workers hand them to the
//! connection task over a channel and the task writes them in completion
//! order. The task itself tracks queries in flight: once the peer stops
//! sending (or errors, or shutdown is signalled), it stays alive until
//! every dispatched query has completed and its reply has been written,
//! then tears down.

use std::{io, sync::Arc};

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::{
    executor::{QueryExecutor, ResultHandler},
    query::{CompletedQuery, Query},
};
use crate::{
    codec::{CodecKind, MessageCodec, encode_packet},
    config::{ReplyEncoding, ServerConfig},
    message::{Message, MessageBody},
    protocol::{HandshakeError, server_handshake},
    status::ReplyStatus,
    transport::{TransportDescriptor, TransportKind},
};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A reply on its way to the socket. `Encoded` frames were serialized on the
/// completing worker; `Raw` ones are serialized by the connection task.
enum ReplyFrame {
    Raw(Message),
    Encoded(bytes::Bytes),
}

/// The connection's face toward the executor.
struct ReplySender {
    tx: mpsc::UnboundedSender<ReplyFrame>,
    codec: CodecKind,
    encoding: ReplyEncoding,
}

impl ResultHandler for ReplySender {
    fn handle_result(&self, completed: CompletedQuery) {
        let msg = Message::reply(completed.qid, completed.status, completed.result);
        let frame = match self.encoding {
            ReplyEncoding::InWriter => ReplyFrame::Raw(msg),
            ReplyEncoding::Immediate => {
                let mut buf = BytesMut::new();
                encode_packet(self.codec, &msg, &mut buf);
                ReplyFrame::Encoded(buf.freeze())
            }
        };
        if self.tx.send(frame).is_err() {
            debug!(
                target: "server::connection",
                qid = completed.qid,
                "connection gone, dropping reply"
            );
        }
    }
}

pub(super) async fn handle_connection(
    mut socket: TcpStream,
    executor: Arc<dyn QueryExecutor>,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    let peer = socket.peer_addr()?;
    let local = socket.local_addr()?;
    let codec = server_handshake(&mut socket).await?;
    debug!(target: "server::connection", %peer, codec = %codec, "connected");

    let mut framed = Framed::new(
        socket,
        MessageCodec::new(codec).with_max_packet_size(config.max_reply_buffer_size),
    );
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let handler = Arc::new(ReplySender {
        tx: reply_tx,
        codec,
        encoding: config.reply_encoding,
    });
    let rid = executor.register_result_handler(handler);
    let transport = TransportDescriptor::new(TransportKind::Tcp, local, peer);

    // Queries dispatched and not yet answered on the wire. Dispatch and
    // write both happen on this task, so a plain counter suffices.
    let mut in_flight: usize = 0;
    let mut read_open = true;
    let mut draining = false;

    let result = loop {
        tokio::select! {
            reply = reply_rx.recv(), if in_flight > 0 => {
                // The sender half lives in the executor registry for the
                // lifetime of this function, so recv cannot yield None here.
                let Some(frame) = reply else { break Ok(()) };
                in_flight -= 1;
                let written = match frame {
                    ReplyFrame::Raw(msg) => framed.send(msg).await,
                    ReplyFrame::Encoded(bytes) => framed.send(bytes).await,
                };
                if let Err(err) = written {
                    break Err(err.into());
                }
            }
            msg = framed.next(), if read_open => match msg {
                Some(Ok(msg)) => {
                    match dispatch(msg, &transport, codec, rid, &executor, &config, in_flight).await {
                        Dispatch::Queued => in_flight += 1,
                        Dispatch::Refused(xid) => {
                            let reply = Message::reply(xid, ReplyStatus::SystemError, bytes::Bytes::new());
                            if let Err(err) = framed.send(reply).await {
                                break Err(err.into());
                            }
                        }
                        Dispatch::Ignored => {}
                    }
                }
                Some(Err(err)) => break Err(err.into()),
                None => read_open = false,
            },
            _ = shutdown.changed(), if !draining => {
                // Stop taking new calls; replies for queries already
                // dispatched still drain through the arm above before the
                // task exits.
                debug!(target: "server::connection", %peer, "shutdown signal, draining");
                draining = true;
                read_open = false;
            }
        }
        if !read_open && in_flight == 0 {
            break Ok(());
        }
    };

    executor.unregister_result_handler(rid);
    debug!(target: "server::connection", %peer, "closed");
    result
}

enum Dispatch {
    Queued,
    Refused(u32),
    Ignored,
}

async fn dispatch(
    msg: Message,
    transport: &TransportDescriptor,
    codec: CodecKind,
    rid: u32,
    executor: &Arc<dyn QueryExecutor>,
    config: &ServerConfig,
    in_flight: usize,
) -> Dispatch {
    let xid = msg.xid;
    let MessageBody::Call(call) = msg.body else {
        warn!(target: "server::connection", xid, "unexpected REPLY from client");
        return Dispatch::Ignored;
    };
    if in_flight >= config.max_concurrent_requests_per_connection {
        warn!(target: "server::connection", xid, "per-connection request cap reached");
        return Dispatch::Refused(xid);
    }
    let mut query = Query::new(
        transport.clone(),
        xid,
        call.service,
        call.method,
        codec,
        call.params,
    );
    query.set_rid(rid);
    if executor.queue_rpc(query).await {
        Dispatch::Queued
    } else {
        warn!(target: "server::connection", xid, "executor saturated");
        Dispatch::Refused(xid)
    }
}
