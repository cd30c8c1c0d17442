//! Background deadlock monitor.
//!
//! Advisory only: it logs, it never escalates. Probe failures are
//! classified with the same vocabulary as the retry policy so a dropped
//! connection reads differently from a broken query in the logs.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::classify::classify_sqlx;
use crate::context::TxContext;
use crate::db::Backend;
use crate::error::ContextError;
use crate::manager::TransactionManager;

/// How often the monitor probes by default
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Probe `backend` every `interval` until `ctx` stops.
///
/// The first probe runs one interval after the call. Returns the reason
/// the context stopped.
pub async fn monitor_deadlocks<B>(backend: &B, ctx: &TxContext, interval: Duration) -> ContextError
where
    B: Backend,
{
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs_f64(), "deadlock monitor started");

    loop {
        tokio::select! {
            reason = ctx.done() => {
                info!(reason = %reason, "deadlock monitor stopped");
                return reason;
            }
            _ = ticker.tick() => probe(backend, ctx).await,
        }
    }
}

async fn probe<B: Backend>(backend: &B, ctx: &TxContext) {
    match ctx.run(backend.deadlock_waiters()).await {
        // Context stopped mid-probe; the loop reports it.
        Err(_) => {}
        Ok(Ok(0)) => debug!("no sessions waiting on deadlock detection"),
        Ok(Ok(count)) => warn!(
            sessions = count,
            "sessions blocked past deadlock_timeout, possible deadlock"
        ),
        Ok(Err(e)) => {
            let class = classify_sqlx(&e);
            if class.is_connection() {
                debug!(fault = %class, error = %e, "deadlock probe skipped, database unreachable");
            } else {
                warn!(fault = %class, error = %e, "deadlock probe failed");
            }
        }
    }
}

impl<B: Backend> TransactionManager<B> {
    /// Run the deadlock monitor at the default interval until `ctx` stops.
    pub async fn monitor_deadlocks(&self, ctx: &TxContext) -> ContextError {
        monitor_deadlocks(self.backend(), ctx, DEFAULT_MONITOR_INTERVAL).await
    }

    /// Run the deadlock monitor on its own task.
    pub fn spawn_deadlock_monitor(&self, ctx: TxContext, interval: Duration) -> JoinHandle<ContextError>
    where
        B: Clone + 'static,
    {
        let backend = self.backend().clone();
        tokio::spawn(async move { monitor_deadlocks(&backend, &ctx, interval).await })
    }
}
