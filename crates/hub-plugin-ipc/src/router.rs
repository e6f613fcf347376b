//! Request/response correlation over the ring buffer pair (spec §4.2): every
//! outbound call gets a monotonic `id`; the consumer loop that drains the
//! inbound ring matches responses back to the waiting caller by `id`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum PluginIpcError {
    #[error("plugin call timed out after {0:?}")]
    Timeout(Duration),
    #[error("plugin process exited before responding")]
    PluginCrashed,
    #[error("response channel dropped without a reply")]
    ChannelClosed,
    #[error("ring buffer error: {0}")]
    Ring(#[from] crate::ring::RingError),
}

/// Tracks in-flight requests keyed by correlation id and completes them
/// when a matching response frame is decoded off the inbound ring, or when
/// the caller's timeout/the plugin's death fires first.
pub struct PendingRequests {
    next_id: AtomicU64,
    waiters: DashMap<u64, oneshot::Sender<Vec<u8>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: DashMap::new(),
        }
    }

    /// Allocates the next correlation id. IDs are unique per `PendingRequests`
    /// instance (i.e. per plugin handle) and monotonically increasing for the
    /// lifetime of the process, so stale responses after a plugin restart
    /// never collide with a newly issued id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a waiter for `id` and returns the receiving half. Call this
    /// before the request frame is written to the outbound ring, so a
    /// response that arrives instantly can never race ahead of registration.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        rx
    }

    /// Called by the inbound-ring consumer loop for every decoded response
    /// frame. `id` is assumed to be the first 8 bytes of the frame (LE),
    /// with the remaining bytes as the payload handed to the waiter.
    pub fn complete(&self, id: u64, payload: Vec<u8>) {
        if let Some((_, tx)) = self.waiters.remove(&id) {
            let _ = tx.send(payload);
        }
    }

    /// Drops a waiter without completing it, used when a call gives up
    /// (timeout) so a late response doesn't leak a channel slot forever.
    pub fn cancel(&self, id: u64) {
        self.waiters.remove(&id);
    }

    /// Fails every outstanding waiter, used when the plugin process is
    /// observed to have exited — any caller still parked in `await` on a
    /// oneshot receiver sees the sender dropped and surfaces
    /// [`PluginIpcError::PluginCrashed`] instead of hanging forever.
    pub fn fail_all(&self) {
        self.waiters.clear();
    }

    pub fn in_flight(&self) -> usize {
        self.waiters.len()
    }

    /// Awaits `rx` with a bound on how long a single plugin call may run,
    /// cleaning up the pending-request slot either way.
    pub async fn await_response(
        &self,
        id: u64,
        rx: oneshot::Receiver<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Vec<u8>, PluginIpcError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(PluginIpcError::PluginCrashed),
            Err(_) => {
                self.cancel(id);
                Err(PluginIpcError::Timeout(timeout))
            }
        }
    }
}

/// Splits a response frame into its correlation id and payload. The wire
/// format reuses the ring's own framing: the first 8 bytes of every
/// request/response payload are the correlation id, LE-encoded.
pub fn split_correlation_id(frame: &[u8]) -> Option<(u64, &[u8])> {
    if frame.len() < 8 {
        return None;
    }
    let id = u64::from_le_bytes(frame[0..8].try_into().ok()?);
    Some((id, &frame[8..]))
}

/// Prepends a correlation id to a request payload before it is written to
/// the outbound ring.
pub fn with_correlation_id(id: u64, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(8 + payload.len());
    framed.extend_from_slice(&id.to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}
