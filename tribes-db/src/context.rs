//! Execution context: deadline, cancellation and session namespace.
//!
//! Every blocking step of a transaction attempt, and the backoff sleep
//! between attempts, is raced against the context so cancelling it unwinds
//! promptly.

use std::future::{pending, Future};
use std::time::Duration;

use futures::future::{select_all, FutureExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ContextError;

/// Cancellation/timeout-bearing execution context.
///
/// Cloning is cheap; clones share cancellation with the original.
#[derive(Debug, Clone, Default)]
pub struct TxContext {
    deadline: Option<Instant>,
    cancel: Vec<watch::Receiver<bool>>,
    schema: Option<String>,
}

/// Cancels every context derived from [`TxContext::with_cancel`].
///
/// Dropping the handle does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl TxContext {
    /// Context with no deadline, no cancellation and no namespace
    pub fn background() -> Self {
        Self::default()
    }

    /// Tighten the deadline to at most `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Tighten the deadline; an earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Add a cancellation source; parent cancellation still applies.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel.push(rx);
        (self, CancelHandle { tx })
    }

    /// Route transactions run under this context to `schema`.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` if there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Non-blocking check: has the context already stopped?
    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.iter().any(|rx| *rx.borrow()) {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline elapses.
    pub async fn done(&self) -> ContextError {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = self.cancelled() => ContextError::Cancelled,
            _ = deadline => ContextError::DeadlineExceeded,
        }
    }

    async fn cancelled(&self) {
        if self.cancel.is_empty() {
            return pending().await;
        }

        let waits = self.cancel.iter().cloned().map(|mut rx| {
            async move {
                // A dropped handle can never cancel.
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    pending::<()>().await;
                }
            }
            .boxed()
        });
        select_all(waits).await;
    }

    /// Run `fut` unless the context stops first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration`, waking early if the context stops.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_fires() {
        let ctx = TxContext::background().with_timeout(Duration::from_millis(100));
        assert!(ctx.err().is_none());
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let ctx = TxContext::background()
            .with_timeout(Duration::from_millis(50))
            .with_timeout(Duration::from_secs(10));
        assert!(ctx.remaining().unwrap() <= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancellation_stops_run() {
        let (ctx, handle) = TxContext::background().with_cancel();
        handle.cancel();
        let result = ctx.run(async { 42 }).await;
        assert_eq!(result, Err(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancel_reaches_child() {
        let (parent, handle) = TxContext::background().with_cancel();
        let (child, _child_handle) = parent.clone().with_cancel();

        let waiter = tokio::spawn(async move { child.sleep(Duration::from_secs(3600)).await });
        tokio::task::yield_now().await;
        handle.cancel();

        assert_eq!(waiter.await.unwrap(), Err(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_does_not_cancel() {
        let (ctx, handle) = TxContext::background().with_cancel();
        drop(handle);
        let ctx = ctx.with_timeout(Duration::from_millis(10));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
    }

    #[test]
    fn schema_is_carried() {
        let ctx = TxContext::background().with_schema("test_7f3a");
        assert_eq!(ctx.schema(), Some("test_7f3a"));
        assert_eq!(ctx.clone().schema(), Some("test_7f3a"));
    }
}
