//! The client-side transaction table and the call policies shared by every
//! transport: complete, complete-all, cancel, cancel-all.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::{message::Message, status::ReplyStatus};

/// Continuation for one in-flight call: `(xid, status, result)`.
///
/// Owned by the transaction table until exactly one of reply arrival, send
/// failure, timeout, or cancellation wins the race to pop it. Every path but
/// cancellation invokes it; cancellation drops it.
pub type ResponseCallback = Box<dyn FnOnce(u32, ReplyStatus, Bytes) + Send + 'static>;

/// Bound on waits for the driver-task fences.
pub(crate) const FENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// XID-keyed table of pending calls plus the XID counter.
///
/// Callbacks are never invoked under the table lock: a callback routinely
/// reenters the wrapper or the connection, and a lock-held invocation would
/// deadlock. Every path pops under the lock and invokes after releasing it.
#[derive(Default)]
pub(crate) struct CallTable {
    next_xid: Mutex<u32>,
    pending: Mutex<HashMap<u32, ResponseCallback>>,
}

impl CallTable {
    pub(crate) fn new() -> Self {
        Self {
            next_xid: Mutex::new(1),
            pending: Mutex::default(),
        }
    }

    /// Allocate the next XID. Strictly monotonic per connection.
    pub(crate) fn generate_xid(&self) -> u32 {
        let mut next = self
            .next_xid
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let xid = *next;
        *next = next.wrapping_add(1);
        xid
    }

    /// Park the callback under its XID.
    pub(crate) fn insert(&self, xid: u32, callback: ResponseCallback) {
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(xid, callback);
        debug_assert!(previous.is_none(), "duplicate in-flight xid {xid}");
    }

    fn pop(&self, xid: u32) -> Option<ResponseCallback> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&xid)
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool { self.len() == 0 }

    /// Deliver `status`/`result` to the call, if it is still pending.
    ///
    /// Races between reply arrival and timeout fire resolve here: only one
    /// of them finds the callback in the table.
    pub(crate) fn complete(&self, xid: u32, status: ReplyStatus, result: Bytes) -> bool {
        let Some(callback) = self.pop(xid) else {
            debug!(target: "client", xid, %status, "no pending call (already completed or cancelled)");
            return false;
        };
        callback(xid, status, result);
        true
    }

    /// Sweep every pending call with `status` and an empty result. Used on
    /// connection close.
    pub(crate) fn complete_all(&self, status: ReplyStatus) {
        let drained: Vec<(u32, ResponseCallback)> = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.drain().collect()
        };
        if !drained.is_empty() {
            warn!(
                target: "client",
                count = drained.len(),
                %status,
                "sweeping pending calls"
            );
        }
        for (xid, callback) in drained {
            callback(xid, status, Bytes::new());
        }
    }

    /// Drop the call's callback without invoking it.
    pub(crate) fn discard(&self, xid: u32) -> bool { self.pop(xid).is_some() }

    /// Drop every callback without invoking any.
    pub(crate) fn discard_all(&self) {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

/// Commands sent from the entry points into a connection's driver task.
///
/// The driver is the event-loop analog: it alone owns the socket and the
/// timeouter. `ack` senders implement the synchronous fences — the entry
/// point resolves only once the driver has processed the command, which
/// orders "no more deliveries" against any dispatch already in flight.
pub(crate) enum Command {
    Send { msg: Message, timeout: Duration },
    Cancel { xid: u32, ack: oneshot::Sender<()> },
    CancelAll { ack: oneshot::Sender<()> },
    Close { ack: oneshot::Sender<()> },
}

/// Await a driver fence with the bounded wait.
pub(crate) async fn await_fence(ack: oneshot::Receiver<()>, what: &str) {
    match tokio::time::timeout(FENCE_TIMEOUT, ack).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => debug!(target: "client", "driver gone before {what} fence"),
        Err(_) => error!(target: "client", "timeout waiting for {what} fence"),
    }
}
