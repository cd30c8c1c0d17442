//! Transaction manager: retried, configured, namespace-verified transactions.
//!
//! Each attempt walks
//! `ConnectionCheck -> Begin -> Configure -> Execute -> Commit | Rollback`;
//! a failed attempt goes through [`decide`] which either sleeps and starts
//! over with a fresh transaction or gives up. Nothing carries over between
//! attempts except the attempt counter.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::context::TxContext;
use crate::db::{Backend, PgBackend, Session};
use crate::error::{Result, Stage, TxError};
use crate::namespace::{search_path_contains, search_path_for, SEARCH_PATH};
use crate::options::{as_pg_millis, TransactionOptions};
use crate::retry::{backoff, decide, RetryDecision};

/// Upper bound on how long a commit may take
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on how long a rollback may take
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// One step of an ordered transaction, see [`TransactionManager::run_ordered`]
pub type Step<S> =
    Arc<dyn for<'t> Fn(&'t mut S) -> BoxFuture<'t, Result<()>> + Send + Sync + 'static>;

/// Box a closure as a [`Step`].
///
/// ```ignore
/// let insert_member = step(move |tx: &mut PgSession| {
///     let tribe_id = tribe_id;
///     Box::pin(async move {
///         sqlx::query("INSERT INTO tribe_members (tribe_id, user_id) VALUES ($1, $2)")
///             .bind(tribe_id)
///             .bind(user_id)
///             .execute(tx.conn())
///             .await?;
///         Ok(())
///     })
/// });
/// ```
pub fn step<S, F>(f: F) -> Step<S>
where
    F: for<'t> Fn(&'t mut S) -> BoxFuture<'t, Result<()>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Runs units of work inside retried transactions.
///
/// Holds no per-call state; clone it freely and use it from many tasks.
#[derive(Debug, Clone)]
pub struct TransactionManager<B = PgBackend> {
    backend: B,
    default_schema: Option<String>,
    defaults: TransactionOptions,
}

impl TransactionManager<PgBackend> {
    /// Manager over a shared Postgres pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(PgBackend::new(pool))
    }
}

impl<B: Backend> TransactionManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            default_schema: None,
            defaults: TransactionOptions::default(),
        }
    }

    /// Namespace used when the context carries none.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        self.default_schema = (!schema.is_empty()).then_some(schema);
        self
    }

    /// Options used by [`run`](Self::run)
    pub fn with_default_options(mut self, options: TransactionOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn default_options(&self) -> &TransactionOptions {
        &self.defaults
    }

    /// Namespace for a call: the context wins over the configured default.
    pub fn namespace<'a>(&'a self, ctx: &'a TxContext) -> Option<&'a str> {
        ctx.schema()
            .filter(|s| !s.is_empty())
            .or(self.default_schema.as_deref())
    }

    /// [`run_in_transaction`](Self::run_in_transaction) with the manager's default options.
    pub async fn run<T, F>(&self, ctx: &TxContext, work: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut B::Session) -> BoxFuture<'t, Result<T>> + Send,
    {
        let options = self.defaults.clone();
        self.run_in_transaction(ctx, &options, work).await
    }

    /// Run `work` inside a transaction, retrying transient failures.
    ///
    /// `work` is called once per attempt with a fresh transaction; it must
    /// not assume anything from an earlier attempt survived. Closures need
    /// owned captures (clone inside the closure before moving into the
    /// returned future).
    ///
    /// # Errors
    ///
    /// - [`TxError::InvalidOptions`] before any attempt
    /// - [`TxError::Unavailable`] when the liveness check never succeeded
    /// - [`TxError::NamespaceMismatch`] immediately, never retried
    /// - [`TxError::Context`] when `ctx` is cancelled or its deadline passes
    /// - the unit of work's own error, verbatim, when it is not retryable
    /// - otherwise the last error once the attempt budget is spent
    pub async fn run_in_transaction<T, F>(
        &self,
        ctx: &TxContext,
        options: &TransactionOptions,
        mut work: F,
    ) -> Result<T>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut B::Session) -> BoxFuture<'t, Result<T>> + Send,
    {
        options.validate()?;
        let schema = self.namespace(ctx);
        let mut attempt: u32 = 0;

        loop {
            match self.attempt(ctx, options, schema, &mut work).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "transaction committed after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let class = err.fault_class();
                    match decide(class, attempt, options) {
                        RetryDecision::Retry { delay } => {
                            warn!(
                                attempt = attempt + 1,
                                max_attempts = options.max_attempts(),
                                stage = ?err.stage_of(),
                                fault = %class,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "transaction attempt failed, retrying"
                            );
                            ctx.sleep(delay).await?;
                            attempt += 1;
                        }
                        RetryDecision::GiveUp => {
                            debug!(
                                attempts = attempt + 1,
                                fault = %class,
                                error = %err,
                                "transaction failed"
                            );
                            return Err(match err {
                                TxError::Stage {
                                    stage: Stage::Connect,
                                    source,
                                } => TxError::Unavailable {
                                    attempts: attempt + 1,
                                    source,
                                },
                                other => other,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Run `steps` in order inside one transaction.
    ///
    /// Stops at the first failing step; later steps never run and earlier
    /// ones are rolled back with the attempt. Callers touching several
    /// tables pass steps in a fixed canonical order to avoid deadlocking
    /// against each other. Adds a deadline to `ctx` when it has none.
    pub async fn run_ordered(
        &self,
        ctx: &TxContext,
        options: &TransactionOptions,
        steps: Vec<Step<B::Session>>,
    ) -> Result<()> {
        let ctx = match ctx.deadline() {
            Some(_) => ctx.clone(),
            None => ctx.clone().with_timeout(ordered_budget(options)),
        };
        let steps: Arc<[Step<B::Session>]> = steps.into();

        self.run_in_transaction(&ctx, options, move |session| {
            let steps = Arc::clone(&steps);
            Box::pin(async move {
                for (index, step) in steps.iter().enumerate() {
                    if let Err(err) = step(&mut *session).await {
                        debug!(step = index, of = steps.len(), error = %err, "ordered step failed");
                        return Err(err);
                    }
                }
                Ok(())
            })
        })
        .await
    }

    async fn attempt<T, F>(
        &self,
        ctx: &TxContext,
        options: &TransactionOptions,
        schema: Option<&str>,
        work: &mut F,
    ) -> Result<T>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut B::Session) -> BoxFuture<'t, Result<T>> + Send,
    {
        ctx.run(self.backend.ping())
            .await?
            .map_err(|e| TxError::stage(Stage::Connect, e))?;

        let mut session = ctx
            .run(self.backend.begin(options.isolation_level))
            .await?
            .map_err(|e| TxError::stage(Stage::Begin, e))?;

        match self.execute(ctx, options, schema, &mut session, work).await {
            Ok(value) => {
                self.commit(ctx, session).await?;
                Ok(value)
            }
            Err(err) => {
                rollback(session, &err).await;
                Err(err)
            }
        }
    }

    async fn execute<T, F>(
        &self,
        ctx: &TxContext,
        options: &TransactionOptions,
        schema: Option<&str>,
        session: &mut B::Session,
        work: &mut F,
    ) -> Result<T>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut B::Session) -> BoxFuture<'t, Result<T>> + Send,
    {
        let timeouts = [
            ("lock_timeout", as_pg_millis(options.lock_timeout)),
            ("statement_timeout", as_pg_millis(options.statement_timeout)),
        ];
        for (name, value) in &timeouts {
            ctx.run(session.set_local(name, value))
                .await?
                .map_err(|e| TxError::stage(Stage::Configure, e))?;
        }

        if let Some(schema) = schema {
            ctx.run(session.set_local(SEARCH_PATH, &search_path_for(schema)))
                .await?
                .map_err(|e| TxError::stage(Stage::Namespace, e))?;
            verify_namespace(ctx, session, schema, Stage::Namespace).await?;
        }

        let value = ctx.run(work(&mut *session)).await??;

        if let Some(schema) = schema {
            verify_namespace(ctx, session, schema, Stage::Verify).await?;
        }

        Ok(value)
    }

    async fn commit(&self, ctx: &TxContext, session: B::Session) -> Result<()> {
        let budget = ctx
            .remaining()
            .map_or(COMMIT_TIMEOUT, |left| left.min(COMMIT_TIMEOUT));

        match ctx.run(tokio::time::timeout(budget, session.commit())).await? {
            Ok(result) => result.map_err(|e| TxError::stage(Stage::Commit, e)),
            Err(_) => Err(TxError::CommitTimeout { after: budget }),
        }
    }
}

/// Read back search_path and make sure `schema` is still on it.
async fn verify_namespace<S: Session>(
    ctx: &TxContext,
    session: &mut S,
    schema: &str,
    stage: Stage,
) -> Result<()> {
    let actual = ctx
        .run(session.current_setting(SEARCH_PATH))
        .await?
        .map_err(|e| TxError::stage(stage, e))?;

    if search_path_contains(&actual, schema) {
        Ok(())
    } else {
        Err(TxError::NamespaceMismatch {
            stage,
            expected: schema.to_string(),
            actual,
        })
    }
}

/// Best-effort rollback; failures are logged, the original error wins.
///
/// Not bound to the caller's context: a cancelled caller still gets its
/// transaction released.
async fn rollback<S: Session>(session: S, cause: &TxError) {
    match tokio::time::timeout(ROLLBACK_TIMEOUT, session.rollback()).await {
        Ok(Ok(())) => debug!(cause = %cause, "transaction rolled back"),
        Ok(Err(e)) => warn!(error = %e, cause = %cause, "rollback failed"),
        Err(_) => warn!(cause = %cause, "rollback timed out"),
    }
}

/// Deadline for an ordered run: one statement budget per attempt plus the
/// backoff sleeps between them.
pub fn ordered_budget(options: &TransactionOptions) -> Duration {
    let attempts = options.max_attempts();
    let statements = options.statement_timeout.saturating_mul(attempts);
    (0..options.max_retries)
        .map(backoff)
        .fold(statements, |total, delay| total.saturating_add(delay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockEvent, MockFault};
    use crate::options::IsolationLevel;

    fn manager() -> (MockBackend, TransactionManager<MockBackend>) {
        let backend = MockBackend::new();
        (backend.clone(), TransactionManager::new(backend))
    }

    #[tokio::test]
    async fn session_is_configured_before_work() {
        let (backend, manager) = manager();
        let options = TransactionOptions::default()
            .with_lock_timeout(Duration::from_secs(4))
            .with_statement_timeout(Duration::from_secs(12))
            .with_isolation_level(IsolationLevel::RepeatableRead);

        manager
            .run_in_transaction(&TxContext::background(), &options, |_tx| {
                Box::pin(async { Ok(()) })
            })
            .await
            .unwrap();

        assert_eq!(
            backend.events(),
            vec![
                MockEvent::Ping,
                MockEvent::Begin(IsolationLevel::RepeatableRead),
                MockEvent::SetLocal {
                    name: "lock_timeout".into(),
                    value: "4000ms".into()
                },
                MockEvent::SetLocal {
                    name: "statement_timeout".into(),
                    value: "12000ms".into()
                },
                MockEvent::Commit,
            ]
        );
    }

    #[tokio::test]
    async fn context_schema_beats_default() {
        let (backend, manager) = manager();
        let manager = manager.with_default_schema("from_config");
        let ctx = TxContext::background().with_schema("from_ctx");

        assert_eq!(manager.namespace(&ctx), Some("from_ctx"));
        assert_eq!(
            manager.namespace(&TxContext::background()),
            Some("from_config")
        );

        manager
            .run(&ctx, |_tx| Box::pin(async { Ok(()) }))
            .await
            .unwrap();
        assert!(backend.events().contains(&MockEvent::SetLocal {
            name: "search_path".into(),
            value: "\"from_ctx\", public".into()
        }));
    }

    #[tokio::test]
    async fn no_namespace_means_no_search_path() {
        let (backend, manager) = manager();
        manager
            .run(&TxContext::background(), |_tx| Box::pin(async { Ok(()) }))
            .await
            .unwrap();

        assert!(!backend
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::SetLocal { name, .. } if name == "search_path")));
    }

    #[tokio::test]
    async fn empty_default_schema_is_ignored() {
        let (_, manager) = manager();
        let manager = manager.with_default_schema("");
        assert_eq!(manager.namespace(&TxContext::background()), None);
    }

    #[tokio::test]
    async fn invalid_options_never_touch_the_backend() {
        let (backend, manager) = manager();
        let options = TransactionOptions::default().with_lock_timeout(Duration::ZERO);

        let err = manager
            .run_in_transaction(&TxContext::background(), &options, |_tx| {
                Box::pin(async { Ok(()) })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TxError::InvalidOptions(_)));
        assert!(backend.events().is_empty());
    }

    #[tokio::test]
    async fn configure_failure_is_tagged() {
        let (backend, manager) = manager();
        backend.fail_set_local(MockFault::Code("42501"));

        let err = manager
            .run(&TxContext::background(), |_tx| Box::pin(async { Ok(()) }))
            .await
            .unwrap_err();

        assert_eq!(err.stage_of(), Some(Stage::Configure));
        assert_eq!(backend.rollbacks(), 1);
        assert_eq!(backend.begins(), 1);
    }

    #[test]
    fn ordered_budget_covers_every_attempt() {
        let options = TransactionOptions::default()
            .with_statement_timeout(Duration::from_secs(10))
            .with_max_retries(2);
        // 3 x 10s + 100ms + 200ms
        assert_eq!(ordered_budget(&options), Duration::from_millis(30_300));

        let options = options.with_max_retries(0);
        assert_eq!(ordered_budget(&options), Duration::from_secs(10));
    }
}
