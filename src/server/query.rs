//! The server-side representation of one in-execution call.

use bytes::Bytes;
use tracing::warn;

use crate::{
    codec::{CodecKind, CodecResult, ParamsReader, WireValue, encode_value},
    status::ReplyStatus,
    transport::TransportDescriptor,
};

/// Continuation invoked with the completed query. Set by the execution
/// layer before the query reaches the service.
pub type CompletionFn = Box<dyn FnOnce(CompletedQuery) + Send + 'static>;

/// One call in execution on the server.
///
/// Built by the transport on receipt of a CALL, handed to the services
/// manager, and consumed by the service through [`Query::complete`] (or one
/// of its shorthands) exactly once — completion takes the query by value, so
/// a second completion does not typecheck.
pub struct Query {
    transport: TransportDescriptor,
    qid: u32,
    service: String,
    method: String,
    codec: CodecKind,
    args: Bytes,
    /// Persistent positional walker over `args`; created on first use.
    reader: Option<ParamsReader>,
    /// Identifies the result handler registered with the executor.
    rid: u32,
    completion: Option<CompletionFn>,
}

impl Query {
    #[must_use]
    pub fn new(
        transport: TransportDescriptor,
        qid: u32,
        service: impl Into<String>,
        method: impl Into<String>,
        codec: CodecKind,
        args: Bytes,
    ) -> Self {
        Self {
            transport,
            qid,
            service: service.into(),
            method: method.into(),
            codec,
            args,
            reader: None,
            rid: 0,
            completion: None,
        }
    }

    #[must_use]
    pub const fn transport(&self) -> &TransportDescriptor { &self.transport }

    #[must_use]
    pub const fn qid(&self) -> u32 { self.qid }

    #[must_use]
    pub fn service(&self) -> &str { &self.service }

    #[must_use]
    pub fn method(&self) -> &str { &self.method }

    #[must_use]
    pub const fn codec(&self) -> CodecKind { self.codec }

    #[must_use]
    pub const fn rid(&self) -> u32 { self.rid }

    pub(crate) const fn set_rid(&mut self, rid: u32) { self.rid = rid; }

    pub(crate) fn set_completion(&mut self, completion: CompletionFn) {
        self.completion = Some(completion);
    }

    /// Decode the next positional argument.
    ///
    /// # Errors
    /// A missing, surplus, or wrongly typed argument surfaces as
    /// [`crate::codec::CodecError::Corrupt`]; the invoker maps that to
    /// `GARBAGE_ARGS`.
    pub fn param<T: WireValue>(&mut self) -> CodecResult<T> {
        self.reader()?
            .next()?
            .ok_or_else(|| crate::codec::CodecError::corrupt("too few arguments"))
    }

    /// Assert the argument tuple is exhausted.
    ///
    /// # Errors
    /// A surplus argument of any type is an error.
    pub fn params_done(&mut self) -> CodecResult<()> { self.reader()?.expect_end() }

    fn reader(&mut self) -> CodecResult<&mut ParamsReader> {
        match &mut self.reader {
            Some(reader) => Ok(reader),
            slot @ None => {
                let reader = ParamsReader::new(self.codec, self.args.clone())?;
                Ok(slot.insert(reader))
            }
        }
    }

    /// Complete the call: encode `result`, hand the outcome to the
    /// execution layer's completion callback.
    pub fn complete<T: WireValue>(self, status: ReplyStatus, result: &T) {
        let encoded = encode_value(self.codec, result);
        self.finish(status, encoded);
    }

    /// Complete successfully with `result`.
    pub fn complete_ok<T: WireValue>(self, result: &T) {
        self.complete(ReplyStatus::Success, result);
    }

    /// Complete with a bare status and an empty result stream. The client
    /// surfaces the status name as the failure hint.
    pub fn complete_status(self, status: ReplyStatus) { self.finish(status, Bytes::new()); }

    fn finish(mut self, status: ReplyStatus, result: Bytes) {
        debug_assert!(
            !status.is_client_side(),
            "server-side completion with client-side status {status}"
        );
        let Some(completion) = self.completion.take() else {
            warn!(
                target: "server::query",
                qid = self.qid,
                service = %self.service,
                "query completed before the execution layer attached a completion callback"
            );
            return;
        };
        completion(CompletedQuery {
            transport: self.transport,
            qid: self.qid,
            service: self.service,
            method: self.method,
            codec: self.codec,
            rid: self.rid,
            status,
            result,
        });
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("qid", &self.qid)
            .field("service", &self.service)
            .field("method", &self.method)
            .field("codec", &self.codec)
            .field("rid", &self.rid)
            .finish_non_exhaustive()
    }
}

/// A query after completion, on its way back to the transport.
#[derive(Debug, Clone)]
pub struct CompletedQuery {
    pub transport: TransportDescriptor,
    pub qid: u32,
    pub service: String,
    pub method: String,
    pub codec: CodecKind,
    pub rid: u32,
    pub status: ReplyStatus,
    pub result: Bytes,
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::codec::ParamList;

    fn local_transport() -> TransportDescriptor {
        TransportDescriptor::new(
            crate::transport::TransportKind::Tcp,
            "127.0.0.1:5000".parse().unwrap(),
            "127.0.0.1:6000".parse().unwrap(),
        )
    }

    #[test]
    fn walks_params_and_completes_once() {
        let mut params = ParamList::new(CodecKind::Binary);
        params.push(&41i32).push(&1i32);
        let mut query = Query::new(
            local_transport(),
            9,
            "calc",
            "Add",
            CodecKind::Binary,
            params.finish(),
        );

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        query.set_completion(Box::new(move |done| {
            *sink.lock().unwrap() = Some(done);
        }));

        let a: i32 = query.param().unwrap();
        let b: i32 = query.param().unwrap();
        query.params_done().unwrap();
        query.complete_ok(&(a + b));

        let done = seen.lock().unwrap().take().unwrap();
        assert_eq!(done.qid, 9);
        assert_eq!(done.status, ReplyStatus::Success);
        let sum: i32 = crate::codec::decode_value(CodecKind::Binary, done.result).unwrap();
        assert_eq!(sum, 42);
    }

    #[test]
    fn too_few_arguments_is_an_error() {
        let params = ParamList::new(CodecKind::Json).finish();
        let mut query = Query::new(
            local_transport(),
            1,
            "calc",
            "Add",
            CodecKind::Json,
            params,
        );
        assert!(query.param::<i32>().is_err());
    }
}
