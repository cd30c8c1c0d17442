//! PostgreSQL backend over a sqlx pool.

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, PgPool, Postgres, Transaction};

use super::backend::{Backend, Session};
use crate::options::IsolationLevel;

/// Sessions waiting on a heavyweight lock for longer than `deadlock_timeout`
const DEADLOCK_WAITERS_SQL: &str = r#"
    SELECT COUNT(*)
    FROM pg_stat_activity
    WHERE wait_event_type = 'Lock'
      AND cardinality(pg_blocking_pids(pid)) > 0
      AND now() - state_change > current_setting('deadlock_timeout')::interval
"#;

/// Backend over a shared pool.
///
/// The pool is not owned exclusively; non-transactional callers may keep
/// using their own clone of it.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Backend for PgBackend {
    type Session = PgSession;

    async fn ping(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<PgSession, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Must be the first statement of the transaction.
        let sql = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&sql).execute(&mut *tx).await?;

        Ok(PgSession { tx })
    }

    async fn deadlock_waiters(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(DEADLOCK_WAITERS_SQL)
            .fetch_one(&self.pool)
            .await
    }
}

/// A live Postgres transaction.
///
/// Derefs to [`PgConnection`], so repositories run ordinary sqlx queries
/// against it:
///
/// ```ignore
/// sqlx::query("UPDATE tribes SET name = $1 WHERE id = $2")
///     .bind(name)
///     .bind(id)
///     .execute(&mut **session)
///     .await?;
/// ```
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

impl PgSession {
    /// Connection to run statements against
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

impl Deref for PgSession {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.tx
    }
}

impl DerefMut for PgSession {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl Session for PgSession {
    async fn set_local(&mut self, name: &str, value: &str) -> Result<(), sqlx::Error> {
        // set_config(.., is_local => true) is SET LOCAL with bind parameters.
        sqlx::query("SELECT set_config($1, $2, true)")
            .bind(name)
            .bind(value)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn current_setting(&mut self, name: &str) -> Result<String, sqlx::Error> {
        sqlx::query_scalar("SELECT current_setting($1)")
            .bind(name)
            .fetch_one(&mut *self.tx)
            .await
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}
