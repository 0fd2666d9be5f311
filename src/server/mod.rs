//! Server-side runtime: TCP transport, HTTP processor, routing, execution.

mod connection;
pub mod executor;
pub mod http;
pub mod query;
pub mod services;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{
    net::TcpListener,
    sync::watch,
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

pub use self::{
    connection::ConnectionError,
    executor::{PoolExecutor, QueryExecutor, ResultHandler, SimpleExecutor},
    http::{AuthAnswer, Authenticator, HttpProcessor},
    query::{CompletedQuery, Query},
    services::{ServiceInvoker, ServicesError, ServicesManager},
};
use crate::config::ServerConfig;

/// The TCP server: an acceptor plus one task per connection.
///
/// The server keeps a handle on its executor so that [`Server::shutdown`]
/// can run the whole teardown as one sequence. Dropping the handle does not
/// stop the server; call [`Server::shutdown`].
pub struct Server {
    local_addr: SocketAddr,
    executor: Arc<dyn QueryExecutor>,
    shutdown_tx: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
}

impl Server {
    /// Bind and start accepting connections.
    ///
    /// # Errors
    /// Fails if the listener cannot be bound.
    pub async fn bind(
        addr: &str,
        executor: Arc<dyn QueryExecutor>,
        config: ServerConfig,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind rpc server on {addr}"))?;
        let local_addr = listener.local_addr().context("listener local address")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(target: "server", %local_addr, "rpc server listening");
        let acceptor = tokio::spawn(accept_connections(
            listener,
            Arc::clone(&executor),
            config,
            shutdown_rx,
        ));
        Ok(Self {
            local_addr,
            executor,
            shutdown_tx,
            acceptor,
        })
    }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }

    /// Tear the server down: stop accepting, stop connections taking new
    /// calls, drain the executor, and wait for every connection to flush
    /// its outstanding replies.
    ///
    /// Queries still queued in the executor complete with `SYSTEM_ERROR`;
    /// the drain runs while the connections are alive, so those replies
    /// reach the peers before the tasks exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.executor.shutdown().await;
        if let Err(err) = self.acceptor.await {
            warn!(target: "server", "acceptor task failed: {err}");
        }
    }
}

async fn accept_connections(
    listener: TcpListener,
    executor: Arc<dyn QueryExecutor>,
    config: ServerConfig,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut join_set = JoinSet::new();
    let mut shutdown = shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(target: "server", "shutdown signal received");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(target: "server", %peer, "accepted connection");
                    let executor = Arc::clone(&executor);
                    let config = config.clone();
                    let shutdown = shutdown_rx.clone();
                    join_set.spawn(async move {
                        if let Err(err) =
                            connection::handle_connection(socket, executor, config, shutdown).await
                        {
                            warn!(target: "server", %peer, "connection error: {err}");
                        }
                    });
                }
                Err(err) => warn!(target: "server", "accept error: {err}"),
            },
        }
    }
    while join_set.join_next().await.is_some() {}
}
