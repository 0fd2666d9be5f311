//! Typed client-side stub over one connection.
//!
//! A wrapper pairs a service name with a connection and keeps its own
//! call-id table of typed result callbacks. Several wrappers may share one
//! connection. Result delivery decodes the reply body against the expected
//! return type and surfaces failures as textual hints.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{ClientTransport, calls::ResponseCallback};
use crate::{
    codec::{CodecKind, ParamList, WireValue, decode_value},
    config::WrapperConfig,
    status::ReplyStatus,
};

/// Identifier of one asynchronous call, usable with
/// [`ServiceWrapper::cancel_call`]. Maps one-to-one with the connection XID.
pub type CallId = u64;

/// A failed call: the wire status plus a textual hint — the server-provided
/// reason when the reply carried one, the status name otherwise.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{status}: {hint}")]
pub struct CallFailure {
    pub status: ReplyStatus,
    pub hint: String,
}

type ErasedResultCallback = Box<dyn FnOnce(ReplyStatus, Bytes) + Send + 'static>;

/// Client stub for one named service.
pub struct ServiceWrapper {
    connection: Arc<dyn ClientTransport>,
    service_class_name: String,
    service_name: String,
    call_timeout_ms: AtomicU64,
    result_callbacks: Arc<Mutex<HashMap<CallId, ErasedResultCallback>>>,
}

impl ServiceWrapper {
    #[must_use]
    pub fn new(
        connection: Arc<dyn ClientTransport>,
        service_class_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self::with_config(connection, service_class_name, service_name, &WrapperConfig::default())
    }

    #[must_use]
    pub fn with_config(
        connection: Arc<dyn ClientTransport>,
        service_class_name: impl Into<String>,
        service_name: impl Into<String>,
        config: &WrapperConfig,
    ) -> Self {
        Self {
            connection,
            service_class_name: service_class_name.into(),
            service_name: service_name.into(),
            call_timeout_ms: AtomicU64::new(config.call_timeout_ms),
            result_callbacks: Arc::new(Mutex::default()),
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str { &self.service_name }

    #[must_use]
    pub fn service_class_name(&self) -> &str { &self.service_class_name }

    #[must_use]
    pub fn codec(&self) -> CodecKind { self.connection.codec() }

    /// Timeout applied to every call made through this wrapper.
    pub fn set_call_timeout(&self, timeout: Duration) {
        debug_assert!(u64::try_from(timeout.as_millis()).is_ok());
        self.call_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.load(Ordering::Relaxed))
    }

    /// Builder for this wrapper's parameter tuples.
    #[must_use]
    pub fn params(&self) -> ParamList { ParamList::new(self.codec()) }

    /// Start an asynchronous call; the typed result is delivered to
    /// `on_result` exactly once, unless the call is cancelled first.
    pub fn async_call<T, F>(&self, method: &str, params: ParamList, on_result: F) -> CallId
    where
        T: WireValue + Send + 'static,
        F: FnOnce(Result<T, CallFailure>) + Send + 'static,
    {
        let codec = self.codec();
        let service = self.service_name.clone();
        let method_name = method.to_owned();
        let typed: ErasedResultCallback = Box::new(move |status, result| {
            on_result(decode_call_result::<T>(codec, &service, &method_name, status, result));
        });

        let table = Arc::clone(&self.result_callbacks);
        let response_callback: ResponseCallback = Box::new(move |xid, status, result| {
            // Pop under the lock, invoke outside it: the callback may
            // reenter this wrapper.
            let popped = {
                let mut callbacks = table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                callbacks.remove(&CallId::from(xid))
            };
            match popped {
                Some(callback) => callback(status, result),
                None => debug!(target: "client::wrapper", xid, "result for cancelled call"),
            }
        });

        // Hold the table lock across async_query: delivery happens on the
        // driver task and pops under this same lock, so it cannot outrun
        // the registration below.
        let mut callbacks = self
            .result_callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let xid = self.connection.async_query(
            &self.service_name,
            method,
            params.finish(),
            self.call_timeout(),
            response_callback,
        );
        let call_id = CallId::from(xid);
        callbacks.insert(call_id, typed);
        call_id
    }

    /// Call a remote method and wait for its typed result.
    ///
    /// # Errors
    /// Any non-success reply status, or a result that does not decode as
    /// `T`, is a [`CallFailure`].
    pub async fn call<T>(&self, method: &str, params: ParamList) -> Result<T, CallFailure>
    where
        T: WireValue + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.async_call::<T, _>(method, params, move |outcome| {
            let _ = done_tx.send(outcome);
        });
        done_rx.await.unwrap_or_else(|_| {
            Err(CallFailure {
                status: ReplyStatus::ConnError,
                hint: "call cancelled".to_owned(),
            })
        })
    }

    /// Cancel one call: its typed callback is destroyed, never invoked.
    ///
    /// The connection-level cancel is issued after the local table lock is
    /// released — it fences on the driver task, which may at this moment be
    /// delivering a result that needs that same lock.
    pub async fn cancel_call(&self, call_id: CallId) {
        let popped = {
            let mut callbacks = self
                .result_callbacks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            callbacks.remove(&call_id)
        };
        drop(popped);
        if let Ok(xid) = u32::try_from(call_id) {
            self.connection.cancel_query(xid).await;
        }
    }

    /// Cancel every call made through this wrapper.
    pub async fn cancel_all_calls(&self) {
        let drained: Vec<(CallId, ErasedResultCallback)> = {
            let mut callbacks = self
                .result_callbacks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            callbacks.drain().collect()
        };
        for (call_id, callback) in drained {
            drop(callback);
            if let Ok(xid) = u32::try_from(call_id) {
                self.connection.cancel_query(xid).await;
            }
        }
    }
}

pub(crate) fn decode_call_result<T: WireValue>(
    codec: CodecKind,
    service: &str,
    method: &str,
    status: ReplyStatus,
    result: Bytes,
) -> Result<T, CallFailure> {
    if status != ReplyStatus::Success {
        let hint = if result.is_empty() {
            status.name().to_owned()
        } else {
            decode_value::<String>(codec, result).unwrap_or_else(|_| status.name().to_owned())
        };
        warn!(
            target: "client::wrapper",
            %service, %method, %status, %hint, "call failed"
        );
        return Err(CallFailure { status, hint });
    }
    decode_value::<T>(codec, result).map_err(|err| {
        warn!(target: "client::wrapper", %service, %method, "result decode failed: {err}");
        CallFailure {
            status,
            hint: "Error decoding data, the server returned a wrong type".to_owned(),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        client::calls::{CallTable, ResponseCallback},
        codec::encode_value,
    };

    /// What the scripted transport does with each query.
    #[derive(Clone, Copy)]
    enum Script {
        /// Reply with `SUCCESS` and the query's own params echoed back.
        EchoParams,
        /// Reply with the given status and an encoded string hint.
        FailWithHint(ReplyStatus, &'static str),
        /// Reply with the given status and an empty body.
        FailEmpty(ReplyStatus),
        /// Reply with `SUCCESS` and a boolean, whatever was asked.
        WrongType,
        /// Never reply.
        Silent,
    }

    struct ScriptedTransport {
        codec: CodecKind,
        calls: Arc<CallTable>,
        script: Script,
        queries: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                codec: CodecKind::Binary,
                calls: Arc::new(CallTable::new()),
                script,
                queries: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ClientTransport for ScriptedTransport {
        fn codec(&self) -> CodecKind { self.codec }

        fn async_query(
            &self,
            _service: &str,
            _method: &str,
            params: Bytes,
            _timeout: Duration,
            callback: ResponseCallback,
        ) -> u32 {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let xid = self.calls.generate_xid();
            self.calls.insert(xid, callback);
            let calls = Arc::clone(&self.calls);
            let codec = self.codec;
            let script = self.script;
            // Deliver on another task, as a driver would.
            tokio::spawn(async move {
                match script {
                    Script::EchoParams => {
                        calls.complete(xid, ReplyStatus::Success, params);
                    }
                    Script::FailWithHint(status, hint) => {
                        calls.complete(xid, status, encode_value(codec, &hint.to_owned()));
                    }
                    Script::FailEmpty(status) => {
                        calls.complete(xid, status, Bytes::new());
                    }
                    Script::WrongType => {
                        calls.complete(xid, ReplyStatus::Success, encode_value(codec, &true));
                    }
                    Script::Silent => {}
                }
            });
            xid
        }

        async fn cancel_query(&self, xid: u32) { self.calls.discard(xid); }

        async fn cancel_all_queries(&self) { self.calls.discard_all(); }

        async fn close(&self) { self.calls.complete_all(ReplyStatus::ConnClosed); }
    }

    fn int_params(wrapper: &ServiceWrapper, value: i32) -> ParamList {
        let mut params = wrapper.params();
        params.push(&value);
        params
    }

    #[tokio::test]
    async fn typed_success_delivery() {
        let transport = ScriptedTransport::new(Script::EchoParams);
        let wrapper = ServiceWrapper::new(transport, "Echo", "echo");
        // EchoParams returns the whole tuple; expect it as a one-int array.
        let result: Vec<i32> = wrapper
            .call("Ping", int_params(&wrapper, 41))
            .await
            .expect("echo");
        assert_eq!(result, vec![41]);
    }

    #[tokio::test]
    async fn failure_hint_comes_from_the_body() {
        let transport =
            ScriptedTransport::new(Script::FailWithHint(ReplyStatus::GarbageArgs, "bad args"));
        let wrapper = ServiceWrapper::new(transport, "Echo", "echo");
        let err = wrapper
            .call::<i32>("Ping", int_params(&wrapper, 1))
            .await
            .expect_err("scripted failure");
        assert_eq!(err.status, ReplyStatus::GarbageArgs);
        assert_eq!(err.hint, "bad args");
    }

    #[tokio::test]
    async fn failure_hint_falls_back_to_the_status_name() {
        let transport = ScriptedTransport::new(Script::FailEmpty(ReplyStatus::ProcUnavailable));
        let wrapper = ServiceWrapper::new(transport, "Echo", "echo");
        let err = wrapper
            .call::<i32>("Ping", int_params(&wrapper, 1))
            .await
            .expect_err("scripted failure");
        assert_eq!(err.hint, "PROC_UNAVAILABLE");
    }

    #[tokio::test]
    async fn wrong_result_type_is_reported() {
        let transport = ScriptedTransport::new(Script::WrongType);
        let wrapper = ServiceWrapper::new(transport, "Echo", "echo");
        let err = wrapper
            .call::<String>("Ping", int_params(&wrapper, 1))
            .await
            .expect_err("bool cannot decode as String");
        assert_eq!(
            err.hint,
            "Error decoding data, the server returned a wrong type"
        );
    }

    #[tokio::test]
    async fn cancelled_call_drops_the_typed_callback() {
        let transport = ScriptedTransport::new(Script::Silent);
        let wrapper = ServiceWrapper::new(Arc::clone(&transport) as _, "Echo", "echo");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let call_id =
            wrapper.async_call::<i32, _>("Ping", int_params(&wrapper, 1), move |_outcome| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        wrapper.cancel_call(call_id).await;

        // Even a late delivery finds no registration.
        transport
            .calls
            .complete(u32::try_from(call_id).unwrap(), ReplyStatus::Success, Bytes::new());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn call_timeout_is_configurable() {
        let transport = ScriptedTransport::new(Script::Silent);
        let wrapper = ServiceWrapper::new(transport, "Echo", "echo");
        assert_eq!(wrapper.call_timeout(), Duration::from_millis(5000));
        wrapper.set_call_timeout(Duration::from_millis(250));
        assert_eq!(wrapper.call_timeout(), Duration::from_millis(250));
    }
}
