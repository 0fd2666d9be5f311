//! Service invokers and the name-to-invoker registry.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::query::Query;
use crate::status::ReplyStatus;

/// Server-side entry point of one service.
///
/// An invoker decodes the expected arguments from the query's positional
/// walker, dispatches to the typed method, and arranges for result delivery
/// through [`Query::complete`]. Method and argument errors are reported
/// through the query (`PROC_UNAVAILABLE`, `GARBAGE_ARGS`) with `call`
/// returning `true`; `false` is reserved for internal framework failure.
#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    /// Logical instance name used for routing.
    fn name(&self) -> &str;

    /// Schema name of the service.
    fn class_name(&self) -> &str;

    async fn call(&self, query: Query) -> bool;
}

/// Registration errors.
#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("service `{0}` is already registered")]
    DuplicateService(String),
}

/// Name → invoker registry with registration lifecycle.
///
/// Registration surfaces are lock-guarded; the call path clones the target
/// invoker out of the map and runs it without holding the lock.
#[derive(Default)]
pub struct ServicesManager {
    services: RwLock<HashMap<String, Arc<dyn ServiceInvoker>>>,
}

impl ServicesManager {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a service under its instance name.
    ///
    /// # Errors
    /// Rejects a duplicate name; the existing registration is untouched.
    pub fn register_service(&self, service: Arc<dyn ServiceInvoker>) -> Result<(), ServicesError> {
        let name = service.name().to_owned();
        let mut services = self.services.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if services.contains_key(&name) {
            return Err(ServicesError::DuplicateService(name));
        }
        info!(target: "server::services", service = %name, class = service.class_name(), "registered");
        services.insert(name, service);
        Ok(())
    }

    /// Remove a registration. Returns whether the name was registered.
    pub fn unregister_service(&self, name: &str) -> bool {
        let mut services = self.services.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let removed = services.remove(name).is_some();
        if removed {
            info!(target: "server::services", service = %name, "unregistered");
        } else {
            warn!(target: "server::services", service = %name, "unregister of unknown service");
        }
        removed
    }

    #[must_use]
    pub fn find_service(&self, name: &str) -> Option<Arc<dyn ServiceInvoker>> {
        self.services
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered instance names, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Route a query to its service.
    ///
    /// An unknown service completes the query with `SERVICE_UNAVAILABLE` and
    /// reports `true`; the return value mirrors the invoker contract.
    pub async fn call(&self, query: Query) -> bool {
        debug!(
            target: "server::services",
            service = %query.service(),
            method = %query.method(),
            qid = query.qid(),
            "dispatch"
        );
        let Some(service) = self.find_service(query.service()) else {
            warn!(target: "server::services", service = %query.service(), "unknown service");
            query.complete_status(ReplyStatus::ServiceUnavailable);
            return true;
        };
        service.call(query).await
    }
}

impl std::fmt::Debug for ServicesManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServicesManager {{ {} }}", self.service_names().join(", "))
    }
}
