//! Cancellation and deadline primitives carried on every blocking call.
//!
//! A per-project [`Cancellation`] is propagated to every worker and every
//! blocking call it makes (spec §5). We wrap `tokio_util::sync::
//! CancellationToken` rather than hand-rolling an atomic flag: it already
//! composes with `tokio::select!`, supports child tokens for per-component
//! scopes, and is the idiomatic choice in a tokio-native stack.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token, cheap to clone, shared by every task derived from the
/// same project lifecycle.
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: CancellationToken,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Marks this token (and every child derived from it) cancelled.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Derives a child token: cancelling the child never cancels the parent,
    /// but cancelling the parent always cancels the child. Used to give a
    /// single component its own early-exit scope nested inside the project's
    /// overall cancellation.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }

    /// Resolves once this token is cancelled; pair with `tokio::select!` at
    /// every suspension point (queue send/receive, KV call, adapter I/O,
    /// plugin-IPC wait, timer).
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute deadline expressed against the tokio time driver's monotonic
/// clock, so it composes with `tokio::time::timeout` without re-reading
/// wall-clock time.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

/// The context threaded through every blocking primitive: a cancellation
/// token plus an optional deadline. Mirrors the call-context pattern used
/// throughout the pipeline runtime's worker loops.
#[derive(Clone, Debug)]
pub struct CallContext {
    cancellation: Cancellation,
    deadline: Option<Deadline>,
}

impl CallContext {
    pub fn new(cancellation: Cancellation) -> Self {
        Self {
            cancellation,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map(|d| d.is_expired()).unwrap_or(false)
    }

    /// Races `fut` against cancellation and the deadline (if any), in that
    /// priority order: an already-cancelled context is reported before an
    /// already-expired deadline, since cancellation always implies "stop now"
    /// regardless of budget.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, CallOutcome>
    where
        F: std::future::Future<Output = T>,
    {
        if self.cancellation.is_cancelled() {
            return Err(CallOutcome::Cancelled);
        }
        if self.is_expired() {
            return Err(CallOutcome::Expired);
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => Err(CallOutcome::Cancelled),
                    _ = tokio::time::sleep(deadline.remaining()) => Err(CallOutcome::Expired),
                    value = fut => Ok(value),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => Err(CallOutcome::Cancelled),
                    value = fut => Ok(value),
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Cancelled,
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_completes_normally() {
        let ctx = CallContext::new(Cancellation::new());
        let out = ctx.run(async { 42 }).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test]
    async fn run_reports_cancellation() {
        let cancel = Cancellation::new();
        let ctx = CallContext::new(cancel.clone());
        cancel.cancel();
        let out = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(CallOutcome::Cancelled));
    }

    #[tokio::test]
    async fn run_reports_expiry() {
        let ctx = CallContext::new(Cancellation::new())
            .with_deadline(Deadline::after(Duration::from_millis(5)));
        let out = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(CallOutcome::Expired));
    }

    #[test]
    fn child_cancellation_is_one_directional() {
        let parent = Cancellation::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
