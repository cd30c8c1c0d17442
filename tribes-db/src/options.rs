//! Per-call transaction options.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TxError;

/// Default lock acquisition timeout
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Default statement execution timeout
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword phrase, e.g. `READ COMMITTED`
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Options governing a single `run_in_transaction` call.
///
/// Cheap to clone and safe to share read-only across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Maximum time a statement waits to acquire a row or table lock
    pub lock_timeout: Duration,
    pub isolation_level: IsolationLevel,
    /// Retry on deadlock / lock timeout / serialization failure
    pub retry_on_deadlock: bool,
    /// Retries after the first attempt; total attempts is `max_retries + 1`
    pub max_retries: u32,
    /// Maximum execution time of any single statement
    pub statement_timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            isolation_level: IsolationLevel::ReadCommitted,
            retry_on_deadlock: true,
            max_retries: DEFAULT_MAX_RETRIES,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }
}

impl TransactionOptions {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_on_deadlock(mut self, retry: bool) -> Self {
        self.retry_on_deadlock = retry;
        self
    }

    /// Total number of attempts permitted.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Reject options the backend cannot honour.
    ///
    /// Postgres treats a zero timeout as "disabled", which would silently
    /// remove the bound, and stores timeouts as an `int` of milliseconds.
    pub fn validate(&self) -> Result<(), TxError> {
        check_timeout("lock_timeout", self.lock_timeout)?;
        check_timeout("statement_timeout", self.statement_timeout)
    }
}

/// Largest timeout Postgres accepts (`INT_MAX` milliseconds)
pub const MAX_PG_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

fn check_timeout(name: &str, value: Duration) -> Result<(), TxError> {
    if value.as_millis() == 0 {
        return Err(TxError::InvalidOptions(format!(
            "{} must be at least 1ms",
            name
        )));
    }
    if value > MAX_PG_TIMEOUT {
        return Err(TxError::InvalidOptions(format!(
            "{} must be at most {}ms, got {:?}",
            name,
            MAX_PG_TIMEOUT.as_millis(),
            value
        )));
    }
    Ok(())
}

/// Render a duration as a Postgres setting value in milliseconds.
pub(crate) fn as_pg_millis(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}
