//! Request correlation.
//!
//! The correlator owns the pending-request table. Callers register an entry,
//! the read loop resolves it when the response with the same id arrives,
//! and connection loss drains the whole table at once.
//!
//! ```text
//!  submit() ──► register id ──► WriterHandle ──► wire
//!     ▲                                           │
//!     └── oneshot ◄── resolve(envelope) ◄── read loop
//! ```
//!
//! Ids come from a counter that wraps at a configurable bound and skips ids
//! that are still outstanding, so an id is never reused while its request is
//! unresolved.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{QrcError, Result};
use crate::protocol::{encode, Envelope};
use crate::writer::WriterHandle;

/// Default wrap bound for request ids.
pub const DEFAULT_ID_BOUND: u64 = i32::MAX as u64;

type Resolver = oneshot::Sender<Result<Value>>;

struct PendingRequest {
    method: String,
    submitted_at: Instant,
    /// Unique per registration, never wraps.
    seq: u64,
    resolver: Resolver,
}

struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
    last_id: u64,
    next_seq: u64,
    /// Submissions are refused while closed.
    open: bool,
}

/// Tracks outstanding requests and matches responses to them.
pub struct RequestCorrelator {
    table: Mutex<PendingTable>,
    id_bound: u64,
}

impl RequestCorrelator {
    /// Create a closed correlator with the default id bound.
    pub fn new() -> Self {
        Self::with_id_bound(DEFAULT_ID_BOUND)
    }

    /// Create a closed correlator whose ids wrap after `id_bound`.
    pub fn with_id_bound(id_bound: u64) -> Self {
        Self {
            table: Mutex::new(PendingTable {
                entries: HashMap::new(),
                last_id: 0,
                next_seq: 0,
                open: false,
            }),
            id_bound: id_bound.max(1),
        }
    }

    /// Start accepting submissions (a connection is up).
    pub fn open(&self) {
        self.table.lock().open = true;
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Check whether `id` is outstanding.
    pub fn is_pending(&self, id: u64) -> bool {
        self.table.lock().entries.contains_key(&id)
    }

    fn register(&self, method: &str) -> Result<(u64, u64, oneshot::Receiver<Result<Value>>)> {
        let mut table = self.table.lock();
        if !table.open {
            return Err(QrcError::Disconnected);
        }
        let outstanding = table.entries.len();
        if outstanding as u64 >= self.id_bound {
            return Err(QrcError::TooManyPending(outstanding));
        }

        let mut id = table.last_id;
        loop {
            id = if id >= self.id_bound { 1 } else { id + 1 };
            if !table.entries.contains_key(&id) {
                break;
            }
        }
        table.last_id = id;

        let seq = table.next_seq;
        table.next_seq += 1;

        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                submitted_at: Instant::now(),
                seq,
                resolver: tx,
            },
        );
        Ok((id, seq, rx))
    }

    fn remove_if_current(&self, id: u64, seq: u64) -> bool {
        let mut table = self.table.lock();
        match table.entries.get(&id) {
            Some(entry) if entry.seq == seq => {
                table.entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Send a request and wait for its outcome.
    ///
    /// Resolves with the response's `result`, or fails with `Rpc` (error
    /// response), `RequestTimeout`, `ConnectionLost` (bulk cancellation) or
    /// `Disconnected` (no connection to write to). The pending entry is gone
    /// when this returns, including when the future is dropped early.
    pub async fn submit(
        &self,
        writer: &WriterHandle,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let (id, seq, rx) = self.register(method)?;
        let mut guard = PendingGuard {
            correlator: self,
            id,
            seq,
            armed: true,
        };

        // One deadline covers both the queue wait and the response
        let deadline = tokio::time::Instant::now() + timeout;
        let timed_out = || {
            tracing::warn!(request_id = id, method, ?timeout, "request timed out");
            QrcError::RequestTimeout {
                method: method.to_string(),
                timeout,
            }
        };

        let frame = encode(&Envelope::request(id, method, params))?;
        match tokio::time::timeout_at(deadline, writer.send(frame)).await {
            Ok(queued) => queued?,
            Err(_) => return Err(timed_out()),
        }
        tracing::debug!(request_id = id, method, "request submitted");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => {
                guard.armed = false;
                outcome
            }
            Ok(Err(_)) => {
                guard.armed = false;
                Err(QrcError::ConnectionLost("request was cancelled".into()))
            }
            Err(_) => Err(timed_out()),
        }
    }

    /// Route a response to its pending request.
    ///
    /// Returns the envelope back when no outstanding request has its id.
    pub fn resolve(&self, envelope: Envelope) -> Option<Envelope> {
        let Some(id) = envelope.id_u64() else {
            return Some(envelope);
        };
        let Some(pending) = self.table.lock().entries.remove(&id) else {
            return Some(envelope);
        };

        tracing::debug!(
            request_id = id,
            method = %pending.method,
            elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64,
            "request resolved"
        );
        let _ = pending.resolver.send(outcome_of(envelope));
        None
    }

    /// Fail every outstanding request with `ConnectionLost` and refuse new
    /// submissions until [`open`](Self::open) is called again.
    ///
    /// Returns the number of requests cancelled.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.table.lock();
            table.open = false;
            table.entries.drain().map(|(_, p)| p).collect()
        };

        let count = drained.len();
        for pending in drained {
            tracing::debug!(method = %pending.method, reason, "cancelling pending request");
            let _ = pending
                .resolver
                .send(Err(QrcError::ConnectionLost(reason.to_string())));
        }
        count
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome_of(envelope: Envelope) -> Result<Value> {
    match (envelope.result, envelope.error) {
        (Some(result), None) => Ok(result),
        (None, Some(error)) => Err(QrcError::Rpc {
            code: error.code,
            message: error.message,
        }),
        (Some(_), Some(_)) => Err(QrcError::MalformedEnvelope(
            "response carries both result and error".into(),
        )),
        (None, None) => Err(QrcError::MalformedEnvelope(
            "response carries neither result nor error".into(),
        )),
    }
}

/// Removes the pending entry unless the request completed normally.
struct PendingGuard<'a> {
    correlator: &'a RequestCorrelator,
    id: u64,
    seq: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.remove_if_current(self.id, self.seq);
        }
    }
}
