//! Runtime core of an RPC framework carrying method calls between clients
//! and servers over pluggable transports.
//!
//! Services expose named methods; clients invoke them synchronously or
//! asynchronously with per-call timeouts and cancellation. The wire encoding
//! ([`codec`]) and the transport (TCP with a codec handshake, or HTTP
//! tunneling) vary independently; everything in between — the client-side
//! transaction table, the server-side routing and worker-pool execution —
//! is shared.

#![cfg_attr(test, expect(clippy::unwrap_used, reason = "test code can panic"))]
#![cfg_attr(test, expect(clippy::expect_used, reason = "test code can panic"))]
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "test code with known bounds")
)]
#![cfg_attr(test, expect(clippy::str_to_string, reason = "test code"))]

pub mod client;
pub mod codec;
pub mod config;
pub mod message;
pub mod protocol;
pub mod server;
pub mod status;
pub mod transport;

pub use client::{
    CallFailure, CallId, ClientError, ClientTransport, FailsafeHttpClientConnection,
    HttpClientConnection, ResponseCallback, ServiceWrapper, TcpClientConnection,
};
pub use codec::{CodecError, CodecKind, ParamList, WireValue};
pub use config::{
    ClientConfig, ExecutorConfig, HttpProcessorConfig, IpClass, ReplyEncoding, ServerConfig,
    WrapperConfig,
};
pub use message::{Message, MessageKind};
pub use server::{
    HttpProcessor, PoolExecutor, Query, QueryExecutor, Server, ServiceInvoker, ServicesManager,
    SimpleExecutor,
};
pub use status::ReplyStatus;
pub use transport::{Credentials, TransportDescriptor, TransportKind};
