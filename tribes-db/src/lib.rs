//! tribes-db: transaction management for the tribes persistence layer
//!
//! Repositories (users, tribes, activities, lists) hand their multi-statement
//! work to a [`TransactionManager`], which runs it inside a configured,
//! namespace-verified transaction and retries connection drops and lock
//! contention with exponential backoff.
//!
//! ```ignore
//! let manager = TransactionManager::from_pool(pool).with_default_schema("tenant_a");
//! let ctx = TxContext::background().with_timeout(Duration::from_secs(30));
//!
//! let member_count = manager
//!     .run_in_transaction(&ctx, &TransactionOptions::default(), move |tx| {
//!         Box::pin(async move {
//!             let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tribe_members")
//!                 .fetch_one(tx.conn())
//!                 .await?;
//!             Ok(count)
//!         })
//!     })
//!     .await?;
//! ```

pub mod classify;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod manager;
pub mod mock;
pub mod monitor;
pub mod namespace;
pub mod options;
pub mod retry;

pub use classify::{classify_sqlx, ContentionKind, FaultClass};
pub use config::StoreConfig;
pub use context::{CancelHandle, TxContext};
pub use db::{create_pool, Backend, PgBackend, PgSession, Session};
pub use error::{ContextError, Result, Stage, TxError};
pub use manager::{step, Step, TransactionManager};
pub use monitor::{monitor_deadlocks, DEFAULT_MONITOR_INTERVAL};
pub use options::{IsolationLevel, TransactionOptions};
pub use retry::{backoff, decide, RetryDecision};
