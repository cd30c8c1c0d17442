//! The capability seam between the transaction manager and a database.
//!
//! Production code runs on [`PgBackend`](super::PgBackend); tests run on
//! [`MockBackend`](crate::mock::MockBackend). Both satisfy the same pair of
//! traits, so the manager never needs to know which one it is driving.

use async_trait::async_trait;

use crate::options::IsolationLevel;

/// Pool-level operations
#[async_trait]
pub trait Backend: Send + Sync {
    /// Live transaction handle passed to units of work
    type Session: Session;

    /// Liveness check: acquire a connection and round-trip to the server.
    async fn ping(&self) -> Result<(), sqlx::Error>;

    /// Open a transaction at `isolation`. The isolation level is applied
    /// before any other statement runs in the transaction.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Self::Session, sqlx::Error>;

    /// Count sessions blocked on a lock for longer than the server's
    /// `deadlock_timeout`, i.e. those the deadlock detector is examining.
    async fn deadlock_waiters(&self) -> Result<i64, sqlx::Error>;
}

/// Query-capable transaction session
#[async_trait]
pub trait Session: Send {
    /// Set a run-time parameter for the rest of this transaction only.
    async fn set_local(&mut self, name: &str, value: &str) -> Result<(), sqlx::Error>;

    /// Read back a run-time parameter as the server currently sees it.
    async fn current_setting(&mut self, name: &str) -> Result<String, sqlx::Error>;

    async fn commit(self) -> Result<(), sqlx::Error>;

    async fn rollback(self) -> Result<(), sqlx::Error>;
}
