//! In-flight request tracking.
//!
//! Every registered request owns a settlement channel and an expiry timer.
//! Removal from the table is the single point of settlement: whoever removes
//! an entry under the lock (reply correlation, the expiry timer, or a
//! broadcast cancellation) is the only party allowed to fire it.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;

use crate::types::{Error, RequestId, Result};

/// Outcome delivered to the caller awaiting a request.
pub type Settlement = Result<Value>;

/// Receiving side handed back by [`PendingTable::register`].
pub type SettlementReceiver = oneshot::Receiver<Settlement>;

/// Cancellable handle to a request's expiry timer. Dropping it cancels the timer.
#[derive(Debug)]
struct ExpiryHandle(Option<AbortHandle>);

impl ExpiryHandle {
    /// Release the handle without cancelling; used by the timer itself.
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for ExpiryHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    settle: oneshot::Sender<Settlement>,
    expiry: ExpiryHandle,
}

#[derive(Debug, Default)]
struct TableInner {
    entries: HashMap<RequestId, PendingRequest>,
    /// Set by `cancel_all`; a closed table refuses new registrations.
    closed: Option<String>,
}

/// Table of requests awaiting a correlated reply.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<TableInner>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and start its expiry timer.
    ///
    /// The returned receiver yields exactly one settlement: the correlated
    /// reply, `Error::Timeout` after `timeout`, or `Error::ConnectionLost`
    /// from [`cancel_all`](Self::cancel_all).
    pub async fn register(&self, id: RequestId, timeout: Duration) -> Result<SettlementReceiver> {
        let mut inner = self.inner.lock().await;
        if let Some(reason) = &inner.closed {
            return Err(Error::connection_lost(reason.clone()));
        }
        if inner.entries.contains_key(&id) {
            return Err(Error::internal(format!("request id {} is already pending", id)));
        }

        let (tx, rx) = oneshot::channel();

        // The timer cannot observe the table before the insert below: it
        // needs the lock we are holding.
        let table = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire(table, id, timeout).await;
        });

        inner.entries.insert(
            id,
            PendingRequest {
                settle: tx,
                expiry: ExpiryHandle(Some(timer.abort_handle())),
            },
        );
        tracing::debug!(request_id = %id, ?timeout, "Registered pending request");

        Ok(rx)
    }

    /// Settle `id` with `outcome`, cancelling its timer.
    ///
    /// Returns `false` if `id` is not pending (expired, already settled or
    /// never registered); nothing else happens in that case.
    pub async fn settle(&self, id: RequestId, outcome: Settlement) -> bool {
        let entry = self.inner.lock().await.entries.remove(&id);
        match entry {
            Some(PendingRequest { settle, expiry }) => {
                drop(expiry);
                // The caller may have stopped waiting; the entry is gone either way.
                let _ = settle.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Reject every pending request with `ConnectionLost(reason)` and close
    /// the table to further registrations.
    ///
    /// Returns the number of requests settled. Calling it again is a no-op
    /// that keeps the first reason.
    pub async fn cancel_all(&self, reason: &str) -> usize {
        let (drained, reason) = {
            let mut inner = self.inner.lock().await;
            let reason = inner
                .closed
                .get_or_insert_with(|| reason.to_string())
                .clone();
            let drained: Vec<_> = inner.entries.drain().collect();
            (drained, reason)
        };

        let count = drained.len();
        for (id, PendingRequest { settle, expiry }) in drained {
            drop(expiry);
            tracing::debug!(request_id = %id, "Cancelling pending request: {}", reason);
            let _ = settle.send(Err(Error::connection_lost(reason.clone())));
        }
        count
    }

    /// Number of requests currently pending.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `cancel_all` has run.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed.is_some()
    }
}

/// Timer body: remove and reject `id` if it is still pending.
async fn expire(table: Weak<Mutex<TableInner>>, id: RequestId, after: Duration) {
    let Some(table) = table.upgrade() else {
        return;
    };
    let entry = table.lock().await.entries.remove(&id);
    if let Some(PendingRequest { settle, expiry }) = entry {
        // Aborting here would cancel this very task.
        expiry.disarm();
        tracing::debug!(request_id = %id, "Pending request expired");
        let _ = settle.send(Err(Error::Timeout { id, after }));
    }
}
