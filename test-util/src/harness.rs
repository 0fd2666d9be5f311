//! In-process server harnesses for integration tests.

use std::{net::SocketAddr, sync::Arc};

use crosstalk::{
    ExecutorConfig, HttpProcessorConfig, ServerConfig,
    server::{
        Authenticator, HttpProcessor, PoolExecutor, QueryExecutor, Server, ServicesManager,
    },
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

use crate::services::{CalcService, DelayService, EchoService};

/// A services manager holding the sample services.
#[must_use]
pub fn sample_services() -> Arc<ServicesManager> {
    let services = Arc::new(ServicesManager::new());
    services
        .register_service(Arc::new(CalcService))
        .expect("register calc");
    services
        .register_service(Arc::new(EchoService))
        .expect("register echo");
    services
        .register_service(Arc::new(DelayService))
        .expect("register delay");
    services
}

/// A running TCP server over the sample services.
pub struct TcpTestServer {
    pub addr: SocketAddr,
    pub services: Arc<ServicesManager>,
    pub executor: Arc<dyn QueryExecutor>,
    server: Server,
}

impl TcpTestServer {
    /// Stop accepting and drain in-flight work. The server sequences the
    /// executor drain itself, while its connections are still alive.
    pub async fn shutdown(self) { self.server.shutdown().await; }
}

/// Start a TCP server on an ephemeral port.
///
/// # Panics
/// Panics when the server cannot bind; tests have no way to proceed.
pub async fn spawn_tcp(executor_config: ExecutorConfig, server_config: ServerConfig) -> TcpTestServer {
    let services = sample_services();
    let executor: Arc<dyn QueryExecutor> =
        Arc::new(PoolExecutor::new(Arc::clone(&services), &executor_config));
    let server = Server::bind("127.0.0.1:0", Arc::clone(&executor), server_config)
        .await
        .expect("bind test server");
    TcpTestServer {
        addr: server.local_addr(),
        services,
        executor,
        server,
    }
}

/// A running HTTP server exposing the processor over the sample services.
pub struct HttpTestServer {
    pub addr: SocketAddr,
    pub processor: Arc<HttpProcessor>,
    pub executor: Arc<dyn QueryExecutor>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl HttpTestServer {
    /// Processor URL for `service`, e.g. `http://127.0.0.1:4242/rpc/calc`.
    #[must_use]
    pub fn url(&self, service: &str) -> String {
        format!("http://{}/rpc/{service}", self.addr)
    }

    /// URL of the bare processor prefix (service and method in the body).
    #[must_use]
    pub fn root_url(&self) -> String { format!("http://{}/rpc", self.addr) }

    pub async fn shutdown(self) {
        self.processor.detach();
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
        self.executor.shutdown().await;
    }
}

/// Start an HTTP processor on an ephemeral port.
///
/// # Panics
/// Panics when the listener cannot bind.
pub async fn spawn_http(
    executor_config: ExecutorConfig,
    processor_config: HttpProcessorConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> HttpTestServer {
    let services = sample_services();
    let executor: Arc<dyn QueryExecutor> =
        Arc::new(PoolExecutor::new(Arc::clone(&services), &executor_config));
    let processor = HttpProcessor::new(
        services,
        Arc::clone(&executor),
        authenticator,
        processor_config,
    );
    let app = processor.router();

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind http listener");
    let addr = listener.local_addr().expect("listener local address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = serve.await {
            tracing::warn!("http test server error: {err}");
        }
    });

    HttpTestServer {
        addr,
        processor,
        executor,
        shutdown_tx,
        task,
    }
}
