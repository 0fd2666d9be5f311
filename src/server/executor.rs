//! Asynchronous query execution.
//!
//! An executor accepts queries from the transports, runs the service code,
//! and hands the completed query back through a registered result handler.
//! Two implementations satisfy the contract: [`SimpleExecutor`] runs the
//! services manager inline on the caller's task, [`PoolExecutor`] owns a
//! bounded work queue drained by worker tasks.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, warn};

use super::{
    query::{CompletedQuery, Query},
    services::ServicesManager,
};
use crate::{config::ExecutorConfig, status::ReplyStatus};

/// Receives completed queries on behalf of a transport connection.
///
/// Invoked from whatever task completed the query; implementations hand the
/// result to their writer without blocking.
pub trait ResultHandler: Send + Sync {
    fn handle_result(&self, completed: CompletedQuery);
}

/// The execution contract shared by both executors.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Register a transport's result handler; the returned id is stamped
    /// into every query the transport submits.
    fn register_result_handler(&self, handler: Arc<dyn ResultHandler>) -> u32;

    fn unregister_result_handler(&self, rid: u32);

    /// Accept a query for execution. Returns `false` when the executor is
    /// saturated; the caller then synthesizes a `SYSTEM_ERROR` reply from
    /// its own record of the call.
    async fn queue_rpc(&self, query: Query) -> bool;

    /// Drain and stop. Pending queries complete with `SYSTEM_ERROR`.
    async fn shutdown(&self) {}
}

/// rid → handler table shared by the executors.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_rid: AtomicU32,
    handlers: Mutex<HashMap<u32, Arc<dyn ResultHandler>>>,
}

impl HandlerRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_rid: AtomicU32::new(1),
            handlers: Mutex::default(),
        })
    }

    fn register(&self, handler: Arc<dyn ResultHandler>) -> u32 {
        let rid = self.next_rid.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(rid, handler);
        rid
    }

    fn unregister(&self, rid: u32) {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&rid);
    }

    /// Route a completed query to its handler. The handler runs outside the
    /// table lock; it may reenter the executor.
    fn route(&self, completed: CompletedQuery) {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&completed.rid)
            .cloned();
        match handler {
            Some(handler) => handler.handle_result(completed),
            None => warn!(
                target: "server::executor",
                rid = completed.rid,
                qid = completed.qid,
                "result dropped: handler unregistered"
            ),
        }
    }
}

fn attach_completion(query: &mut Query, registry: &Arc<HandlerRegistry>, in_flight: &Arc<AtomicUsize>) {
    let registry = Arc::clone(registry);
    let in_flight = Arc::clone(in_flight);
    query.set_completion(Box::new(move |completed| {
        in_flight.fetch_sub(1, Ordering::SeqCst);
        registry.route(completed);
    }));
}

/// Runs queries inline on the task that submitted them.
///
/// Suitable when services are non-blocking; a slow service stalls the
/// submitting transport's read loop.
pub struct SimpleExecutor {
    services: Arc<ServicesManager>,
    registry: Arc<HandlerRegistry>,
    in_flight: Arc<AtomicUsize>,
    max_concurrent: usize,
}

impl SimpleExecutor {
    #[must_use]
    pub fn new(services: Arc<ServicesManager>, max_concurrent_queries: usize) -> Self {
        Self {
            services,
            registry: HandlerRegistry::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent: max_concurrent_queries,
        }
    }
}

#[async_trait]
impl QueryExecutor for SimpleExecutor {
    fn register_result_handler(&self, handler: Arc<dyn ResultHandler>) -> u32 {
        self.registry.register(handler)
    }

    fn unregister_result_handler(&self, rid: u32) { self.registry.unregister(rid); }

    async fn queue_rpc(&self, mut query: Query) -> bool {
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous >= self.max_concurrent {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        attach_completion(&mut query, &self.registry, &self.in_flight);
        self.services.call(query).await
    }
}

/// Runs queries on a fixed pool of worker tasks fed by a bounded queue.
pub struct PoolExecutor {
    registry: Arc<HandlerRegistry>,
    in_flight: Arc<AtomicUsize>,
    max_concurrent: usize,
    tx: Mutex<Option<mpsc::Sender<Query>>>,
    draining: Arc<AtomicBool>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
}

impl PoolExecutor {
    /// Spawn `config.worker_count` workers over a queue bounded by
    /// `config.max_concurrent_queries`.
    #[must_use]
    pub fn new(services: Arc<ServicesManager>, config: &ExecutorConfig) -> Self {
        let registry = HandlerRegistry::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let draining = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Query>(config.max_concurrent_queries.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker in 0..config.worker_count.max(1) {
            let services = Arc::clone(&services);
            let rx = Arc::clone(&rx);
            let draining = Arc::clone(&draining);
            workers.spawn(async move {
                loop {
                    let query = rx.lock().await.recv().await;
                    let Some(query) = query else { break };
                    if draining.load(Ordering::SeqCst) {
                        query.complete_status(ReplyStatus::SystemError);
                        continue;
                    }
                    debug!(target: "server::executor", worker, qid = query.qid(), "executing");
                    if !services.call(query).await {
                        warn!(target: "server::executor", worker, "invoker reported internal failure");
                    }
                }
            });
        }

        Self {
            registry,
            in_flight,
            max_concurrent: config.max_concurrent_queries,
            tx: Mutex::new(Some(tx)),
            draining,
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Query>> {
        self.tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl QueryExecutor for PoolExecutor {
    fn register_result_handler(&self, handler: Arc<dyn ResultHandler>) -> u32 {
        self.registry.register(handler)
    }

    fn unregister_result_handler(&self, rid: u32) { self.registry.unregister(rid); }

    async fn queue_rpc(&self, mut query: Query) -> bool {
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous >= self.max_concurrent {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        let Some(tx) = self.sender() else {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return false;
        };
        attach_completion(&mut query, &self.registry, &self.in_flight);
        match tx.try_send(query) {
            Ok(()) => true,
            // The refused query is dropped without running its completion;
            // the transport replies from its own record of the call.
            Err(_refused) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stop accepting work, complete everything still queued with
    /// `SYSTEM_ERROR`, and join the workers.
    async fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        drop(tx);
        let mut workers = self.workers.lock().await;
        while workers.join_next().await.is_some() {}
    }
}
