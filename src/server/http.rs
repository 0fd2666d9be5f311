//! HTTP tunneling of RPC calls.
//!
//! Each HTTP request is self-contained: one POST carries one encoded CALL
//! and the response body carries the encoded REPLY. There is no handshake;
//! the codec is named in the `codec` request header. The processor mounts on
//! an axum router under a configurable path prefix, with the service (and
//! optionally the method) taken from the path segments after the prefix, or
//! from the call body when the fixed prefix path is used.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use bytes::BytesMut;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{
    executor::{QueryExecutor, ResultHandler},
    query::{CompletedQuery, Query},
    services::ServicesManager,
};
use crate::{
    codec::{CodecKind, decode_packet, encode_packet},
    config::HttpProcessorConfig,
    message::{Message, MessageBody},
    status::ReplyStatus,
    transport::{Credentials, TransportDescriptor, TransportKind},
};

/// Answer of an [`Authenticator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAnswer {
    Ok,
    Denied,
    NeedsChallenge,
}

/// Optional per-request authentication seam. The runtime itself carries the
/// credential pair through to the query and enforces nothing further.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: Option<&Credentials>) -> AuthAnswer;

    fn realm(&self) -> &str { "rpc" }
}

/// Processes RPC queries enclosed in HTTP requests.
///
/// Stateless in the connection sense; the only cross-request state is the
/// qid → waiting-request table used to pair executor completions with their
/// HTTP responses.
pub struct HttpProcessor {
    services: Arc<ServicesManager>,
    executor: Arc<dyn QueryExecutor>,
    authenticator: Option<Arc<dyn Authenticator>>,
    config: HttpProcessorConfig,
    rid: OnceLock<u32>,
    next_qid: AtomicU32,
    in_flight: AtomicUsize,
    requests_in_execution: Mutex<HashMap<u32, oneshot::Sender<CompletedQuery>>>,
}

impl HttpProcessor {
    /// Build the processor and register it with the executor.
    #[must_use]
    pub fn new(
        services: Arc<ServicesManager>,
        executor: Arc<dyn QueryExecutor>,
        authenticator: Option<Arc<dyn Authenticator>>,
        config: HttpProcessorConfig,
    ) -> Arc<Self> {
        let processor = Arc::new(Self {
            services,
            executor: Arc::clone(&executor),
            authenticator,
            config,
            rid: OnceLock::new(),
            next_qid: AtomicU32::new(1),
            in_flight: AtomicUsize::new(0),
            requests_in_execution: Mutex::default(),
        });
        let rid = executor.register_result_handler(Arc::clone(&processor) as Arc<dyn ResultHandler>);
        let _ = processor.rid.set(rid);
        processor
    }

    /// Routes under the configured path prefix.
    #[must_use]
    pub fn router(self: &Arc<Self>) -> Router {
        let prefix = self.config.path_prefix.trim_end_matches('/').to_owned();
        let mut router = Router::new()
            .route(&prefix, post(call_root))
            .route(&format!("{prefix}/:service"), post(call_service))
            .route(&format!("{prefix}/:service/:method"), post(call_service_method));
        if self.config.enable_auto_forms {
            router = router.route(&format!("{prefix}/__forms"), get(forms_index));
        }
        router.with_state(Arc::clone(self))
    }

    /// Unregister from the executor. Requests already in execution complete
    /// normally; their handler entry is consumed on completion.
    pub fn detach(&self) {
        if let Some(rid) = self.rid.get() {
            self.executor.unregister_result_handler(*rid);
        }
    }

    async fn handle_call(
        self: Arc<Self>,
        path_service: Option<String>,
        path_method: Option<String>,
        peer: Option<SocketAddr>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let Some(codec) = codec_from_headers(&headers) else {
            return (
                StatusCode::BAD_REQUEST,
                format!("missing or unknown codec header; {}", ReplyStatus::GarbageArgs),
            )
                .into_response();
        };

        if let (Some(class), Some(peer_addr)) = (self.config.ip_class_restriction, peer)
            && !class.admits(peer_addr.ip())
        {
            warn!(target: "server::http", %peer_addr, "caller outside the admitted address class");
            return StatusCode::FORBIDDEN.into_response();
        }

        let credentials = basic_credentials(&headers);
        if let Some(authenticator) = &self.authenticator {
            match authenticator.authenticate(credentials.as_ref()).await {
                AuthAnswer::Ok => {}
                AuthAnswer::Denied => return StatusCode::UNAUTHORIZED.into_response(),
                AuthAnswer::NeedsChallenge => {
                    let challenge = format!("Basic realm=\"{}\"", authenticator.realm());
                    return (
                        StatusCode::UNAUTHORIZED,
                        [(header::WWW_AUTHENTICATE, challenge)],
                    )
                        .into_response();
                }
            }
        }

        let mut buf = BytesMut::from(&body[..]);
        let call = match decode_packet(codec, &mut buf) {
            Ok(Some(Message {
                xid,
                body: MessageBody::Call(call),
            })) => (xid, call),
            _ => {
                return (StatusCode::BAD_REQUEST, "undecodable call message").into_response();
            }
        };
        let (xid, call) = call;
        let service = path_service.unwrap_or(call.service);
        let method = path_method.unwrap_or(call.method);

        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous >= self.config.max_concurrent_requests {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            warn!(target: "server::http", "request cap reached");
            return reply_response(codec, &Message::reply(xid, ReplyStatus::SystemError, bytes::Bytes::new()));
        }

        let qid = self.next_qid.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        self.requests_in_execution
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(qid, done_tx);

        let peer = peer.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let mut transport =
            TransportDescriptor::new(TransportKind::Http, SocketAddr::from(([0, 0, 0, 0], 0)), peer);
        if let Some(creds) = credentials {
            transport = transport.with_credentials(creds.user, creds.password);
        }

        let mut query = Query::new(transport, qid, service, method, codec, call.params);
        if let Some(rid) = self.rid.get() {
            query.set_rid(*rid);
        }

        if !self.executor.queue_rpc(query).await {
            self.forget(qid);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            warn!(target: "server::http", qid, "executor saturated");
            return reply_response(codec, &Message::reply(xid, ReplyStatus::SystemError, bytes::Bytes::new()));
        }

        let completed = done_rx.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match completed {
            Ok(completed) => {
                debug!(target: "server::http", qid, status = %completed.status, "completing request");
                reply_response(codec, &Message::reply(xid, completed.status, completed.result))
            }
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    fn forget(&self, qid: u32) {
        self.requests_in_execution
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&qid);
    }
}

impl ResultHandler for HttpProcessor {
    fn handle_result(&self, completed: CompletedQuery) {
        let waiter = self
            .requests_in_execution
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&completed.qid);
        match waiter {
            Some(done_tx) => {
                let _ = done_tx.send(completed);
            }
            None => warn!(
                target: "server::http",
                qid = completed.qid,
                "no request waiting for completed query"
            ),
        }
    }
}

fn codec_from_headers(headers: &HeaderMap) -> Option<CodecKind> {
    headers
        .get("codec")
        .and_then(|value| value.to_str().ok())
        .and_then(CodecKind::from_name)
}

fn basic_credentials(headers: &HeaderMap) -> Option<Credentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some(Credentials {
        user: user.to_owned(),
        password: password.to_owned(),
    })
}

fn reply_response(codec: CodecKind, msg: &Message) -> Response {
    let mut buf = BytesMut::new();
    encode_packet(codec, msg, &mut buf);
    let content_type = match codec {
        CodecKind::Binary => "application/octet-stream",
        CodecKind::Json => "application/json",
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type), (header::HeaderName::from_static("codec"), codec.name())],
        buf.freeze(),
    )
        .into_response()
}

async fn call_root(
    State(processor): State<Arc<HttpProcessor>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    processor
        .handle_call(None, None, connect_info.map(|info| info.0), headers, body)
        .await
}

async fn call_service(
    State(processor): State<Arc<HttpProcessor>>,
    Path(service): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    processor
        .handle_call(Some(service), None, connect_info.map(|info| info.0), headers, body)
        .await
}

async fn call_service_method(
    State(processor): State<Arc<HttpProcessor>>,
    Path((service, method)): Path<(String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    processor
        .handle_call(
            Some(service),
            Some(method),
            connect_info.map(|info| info.0),
            headers,
            body,
        )
        .await
}

/// Interactive listing of registered services, served when auto-forms are
/// enabled.
async fn forms_index(State(processor): State<Arc<HttpProcessor>>) -> Html<String> {
    let prefix = processor.config.path_prefix.trim_end_matches('/');
    let mut page = String::from("<html><body><h1>RPC services</h1><ul>");
    for name in processor.services.service_names() {
        page.push_str(&format!("<li><code>POST {prefix}/{name}</code></li>"));
    }
    page.push_str("</ul></body></html>");
    Html(page)
}
