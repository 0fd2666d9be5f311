//! Per-call timeout alarms, owned by a connection's driver task.

use std::{collections::HashMap, time::Duration};

use futures_util::StreamExt;
use tokio_util::time::{DelayQueue, delay_queue::Key};

/// Alarm table keyed by XID.
///
/// Only the driver task touches this; entry points elsewhere reach it by
/// sending the driver a command. That single-owner discipline is what makes
/// the cancel fences meaningful.
#[derive(Debug, Default)]
pub(crate) struct Timeouter {
    queue: DelayQueue<u32>,
    keys: HashMap<u32, Key>,
}

impl Timeouter {
    pub(crate) fn new() -> Self { Self::default() }

    /// Arm (or re-arm) the alarm for `xid`.
    pub(crate) fn set(&mut self, xid: u32, after: Duration) {
        if let Some(key) = self.keys.get(&xid) {
            self.queue.reset(key, after);
            return;
        }
        let key = self.queue.insert(xid, after);
        self.keys.insert(xid, key);
    }

    /// Disarm the alarm for `xid`. Missing entries are fine: the alarm may
    /// have fired already.
    pub(crate) fn unset(&mut self, xid: u32) {
        if let Some(key) = self.keys.remove(&xid) {
            self.queue.remove(&key);
        }
    }

    /// Disarm everything.
    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.keys.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool { self.keys.is_empty() }

    /// Next expired XID. Pends forever while no alarm is armed, so it can
    /// sit in a `select!` arm without spinning.
    pub(crate) async fn next_expired(&mut self) -> u32 {
        loop {
            if self.keys.is_empty() {
                std::future::pending::<()>().await;
            }
            if let Some(expired) = self.queue.next().await {
                let xid = expired.into_inner();
                self.keys.remove(&xid);
                return xid;
            }
        }
    }
}
