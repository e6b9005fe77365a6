//! Request identifiers and the pending-request table
//!
//! Every outbound request gets an identifier from an [`IdGenerator`] owned by
//! the client. The process transport registers each in-flight request with a
//! [`Correlator`], which hands the matching response to exactly one waiter.

use crate::error::{MCPError, Result};
use crate::protocol::JsonRpcResponse;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Multiplier applied to the millisecond timestamp; leaves room for
/// 1000 sequence numbers per millisecond before borrowing from the next one
const SEQUENCE_SPACE: u64 = 1000;

/// Generates unique, strictly increasing request identifiers
///
/// Identifiers are `timestamp_ms * 1000 + sequence`. When a burst exhausts the
/// sequence space of one millisecond the generator keeps counting past it, so
/// identifiers never repeat even if the wall clock stalls or steps backwards.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    /// Create a generator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next identifier
    pub fn next_id(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis())
            .unwrap_or(0)
            .saturating_mul(SEQUENCE_SPACE);
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }
}

/// A request waiting for its response
#[derive(Debug)]
pub struct PendingRequest {
    /// Tool (or method) the request is for
    pub tool: String,
    /// When the request was registered
    pub created_at: DateTime<Utc>,
    responder: oneshot::Sender<Result<JsonRpcResponse>>,
}

/// Table of in-flight requests keyed by identifier
#[derive(Debug)]
pub struct Correlator {
    pending: Mutex<HashMap<u64, PendingRequest>>,
    timeout: Duration,
}

impl Correlator {
    /// Create an empty table with the given per-request timeout
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Per-request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a request and get the receiver its response will arrive on
    ///
    /// # Errors
    /// Returns an error if the identifier is already outstanding
    pub fn register(
        &self,
        id: u64,
        tool: &str,
    ) -> Result<oneshot::Receiver<Result<JsonRpcResponse>>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return Err(MCPError::InvalidResponse(format!(
                "request id {id} is already outstanding"
            )));
        }
        pending.insert(
            id,
            PendingRequest {
                tool: tool.into(),
                created_at: Utc::now(),
                responder: tx,
            },
        );
        Ok(rx)
    }

    /// Deliver a response to its waiter
    ///
    /// Returns `false` when no request with that identifier is outstanding
    /// (duplicate, late, or unsolicited responses); such responses are dropped.
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.numeric_id() else {
            warn!("Dropping response without a numeric id: {:?}", response.id);
            return false;
        };

        let entry = self.lock().remove(&id);
        match entry {
            Some(entry) => {
                let elapsed = Utc::now() - entry.created_at;
                debug!(
                    id,
                    tool = %entry.tool,
                    elapsed_ms = elapsed.num_milliseconds(),
                    "Response correlated"
                );
                // The waiter may already be gone (caller dropped the future)
                let _ = entry.responder.send(Ok(response));
                true
            }
            None => {
                debug!(id, "No pending request for response, dropping");
                false
            }
        }
    }

    /// Forget a request without resolving it (e.g. the write failed)
    pub fn discard(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Guard that discards the entry for `id` when dropped
    ///
    /// Keeps the table bounded when the caller's future is dropped before a
    /// response arrives. Dropping it after the entry was resolved is a no-op.
    #[must_use]
    pub fn track(&self, id: u64) -> PendingGuard<'_> {
        PendingGuard {
            correlator: self,
            id,
        }
    }

    /// Reject every outstanding request with a transport error and clear the table
    ///
    /// Returns the number of requests rejected.
    pub fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            debug!(id, tool = %entry.tool, "Rejecting pending request: {}", reason);
            let _ = entry
                .responder
                .send(Err(MCPError::Transport(reason.to_string())));
        }
        if count > 0 {
            warn!("Rejected {} pending request(s): {}", count, reason);
        }
        count
    }

    /// Wait for the response to a registered request
    ///
    /// On timeout the entry is removed, so a response arriving afterwards finds
    /// nothing to resolve.
    ///
    /// # Errors
    /// Returns [`MCPError::Timeout`] if no response arrives in time, or a
    /// transport error if the request was rejected or its table was torn down
    pub async fn wait(
        &self,
        id: u64,
        tool: &str,
        rx: oneshot::Receiver<Result<JsonRpcResponse>>,
    ) -> Result<JsonRpcResponse> {
        let _pending = self.track(id);
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MCPError::Transport(
                "connection closed before a response arrived".into(),
            )),
            Err(_) => {
                warn!(id, tool, "Request timed out after {:?}", self.timeout);
                Err(MCPError::Timeout {
                    tool: tool.into(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Number of outstanding requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no requests are outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Removes a pending entry on drop; see [`Correlator::track`]
#[derive(Debug)]
pub struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.discard(self.id);
    }
}
