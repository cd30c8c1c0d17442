//! Error types for tribes-db transaction handling.
//!
//! Library consumers get structured errors; every database failure is tagged
//! with the transaction stage it happened in so a caller can tell a failed
//! `BEGIN` apart from a failed `COMMIT` without retrying blindly.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::classify::{classify_sqlx, FaultClass};

/// Stage of a transaction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Pool liveness check
    Connect,
    Begin,
    /// Lock and statement timeouts
    Configure,
    /// search_path propagation and readback
    Namespace,
    /// Caller's unit of work
    Execute,
    /// search_path re-check after the unit of work
    Verify,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Begin => "begin",
            Self::Configure => "configure",
            Self::Namespace => "namespace",
            Self::Execute => "execute",
            Self::Verify => "verify",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Why a [`TxContext`](crate::TxContext) stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Main error type for transaction operations
#[derive(Error, Debug)]
pub enum TxError {
    /// Database failure at a given stage.
    ///
    /// `?` on a `sqlx::Error` inside a unit of work lands here tagged
    /// [`Stage::Execute`].
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: sqlx::Error,
    },

    /// Liveness check kept failing until the attempt budget ran out
    #[error("database unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// The session namespace did not stick
    #[error("search_path mismatch at {stage}: expected schema '{expected}', found '{actual}'")]
    NamespaceMismatch {
        stage: Stage,
        expected: String,
        actual: String,
    },

    /// Commit did not finish in time; its outcome is unknown
    #[error("commit timed out after {after:?}")]
    CommitTimeout { after: Duration },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("invalid transaction options: {0}")]
    InvalidOptions(String),

    /// Caller business-logic failure, surfaced verbatim
    #[error(transparent)]
    Application(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Result type alias for transaction operations
pub type Result<T, E = TxError> = std::result::Result<T, E>;

impl From<sqlx::Error> for TxError {
    fn from(source: sqlx::Error) -> Self {
        Self::Stage {
            stage: Stage::Execute,
            source,
        }
    }
}

impl TxError {
    /// Tag a database error with the stage it happened in
    pub fn stage(stage: Stage, source: sqlx::Error) -> Self {
        Self::Stage { stage, source }
    }

    /// Wrap a caller-side error so it passes through untouched
    pub fn application(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Application(err.into())
    }

    /// Fault class used by the retry policy.
    pub fn fault_class(&self) -> FaultClass {
        match self {
            // Any liveness-check failure is an infrastructure fault.
            Self::Stage {
                stage: Stage::Connect,
                ..
            } => FaultClass::Connection,
            Self::Stage { source, .. } => classify_sqlx(source),
            Self::Unavailable { .. } => FaultClass::Connection,
            Self::NamespaceMismatch { .. }
            | Self::CommitTimeout { .. }
            | Self::Context(_)
            | Self::InvalidOptions(_)
            | Self::Application(_) => FaultClass::Permanent,
        }
    }

    /// Stage the error is attributed to, if any
    pub fn stage_of(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } | Self::NamespaceMismatch { stage, .. } => Some(*stage),
            Self::Unavailable { .. } => Some(Stage::Connect),
            Self::CommitTimeout { .. } => Some(Stage::Commit),
            _ => None,
        }
    }

    /// Underlying database error, if this is one
    pub fn as_sqlx(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Stage { source, .. } | Self::Unavailable { source, .. } => Some(source),
            _ => None,
        }
    }
}
