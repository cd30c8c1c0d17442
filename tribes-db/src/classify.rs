//! Structured fault classification.
//!
//! Decisions are made from sqlx error variants and SQLSTATE codes only.
//! Driver messages are never inspected.

use std::fmt;

/// SQLSTATE `40P01` deadlock_detected
pub const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE `55P03` lock_not_available (raised when `lock_timeout` fires)
pub const LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE `40001` serialization_failure
pub const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE `57014` query_canceled (raised when `statement_timeout` fires)
pub const QUERY_CANCELED: &str = "57014";

/// SQLSTATE class `08` connection_exception
const CONNECTION_EXCEPTION_CLASS: &str = "08";
/// admin_shutdown, crash_shutdown, cannot_connect_now
const SERVER_GOING_AWAY: [&str; 3] = ["57P01", "57P02", "57P03"];

/// Which kind of lock contention was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionKind {
    Deadlock,
    LockTimeout,
    SerializationFailure,
}

/// Retry-relevant class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Connection dropped or unavailable; always worth another attempt
    Connection,
    /// Another transaction holds what we need; retry only when allowed
    Contention(ContentionKind),
    /// Application, configuration or statement errors
    Permanent,
}

impl FaultClass {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection)
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Contention(ContentionKind::Deadlock) => f.write_str("deadlock"),
            Self::Contention(ContentionKind::LockTimeout) => f.write_str("lock timeout"),
            Self::Contention(ContentionKind::SerializationFailure) => {
                f.write_str("serialization failure")
            }
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Classify a SQLSTATE code.
pub fn classify_sqlstate(code: &str) -> FaultClass {
    match code {
        DEADLOCK_DETECTED => FaultClass::Contention(ContentionKind::Deadlock),
        LOCK_NOT_AVAILABLE => FaultClass::Contention(ContentionKind::LockTimeout),
        SERIALIZATION_FAILURE => FaultClass::Contention(ContentionKind::SerializationFailure),
        c if c.starts_with(CONNECTION_EXCEPTION_CLASS) => FaultClass::Connection,
        c if SERVER_GOING_AWAY.contains(&c) => FaultClass::Connection,
        _ => FaultClass::Permanent,
    }
}

/// Classify a sqlx error.
pub fn classify_sqlx(err: &sqlx::Error) -> FaultClass {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| classify_sqlstate(&code))
            .unwrap_or(FaultClass::Permanent),
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => FaultClass::Connection,
        _ => FaultClass::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFault;
    use std::io;

    #[test]
    fn contention_codes() {
        assert_eq!(
            classify_sqlstate("40P01"),
            FaultClass::Contention(ContentionKind::Deadlock)
        );
        assert_eq!(
            classify_sqlstate("55P03"),
            FaultClass::Contention(ContentionKind::LockTimeout)
        );
        assert_eq!(
            classify_sqlstate("40001"),
            FaultClass::Contention(ContentionKind::SerializationFailure)
        );
    }

    #[test]
    fn connection_codes() {
        assert_eq!(classify_sqlstate("08006"), FaultClass::Connection);
        assert_eq!(classify_sqlstate("08003"), FaultClass::Connection);
        assert_eq!(classify_sqlstate("57P01"), FaultClass::Connection);
    }

    #[test]
    fn statement_timeout_and_constraint_violations_are_permanent() {
        assert_eq!(classify_sqlstate(QUERY_CANCELED), FaultClass::Permanent);
        assert_eq!(classify_sqlstate("23505"), FaultClass::Permanent);
        assert_eq!(classify_sqlstate("42P01"), FaultClass::Permanent);
    }

    #[test]
    fn sqlx_variants() {
        let io = sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(classify_sqlx(&io), FaultClass::Connection);
        assert_eq!(classify_sqlx(&sqlx::Error::PoolTimedOut), FaultClass::Connection);
        assert_eq!(classify_sqlx(&sqlx::Error::RowNotFound), FaultClass::Permanent);
    }

    #[test]
    fn database_errors_use_their_code() {
        let err = MockFault::Deadlock.into_error();
        assert!(classify_sqlx(&err).is_contention());

        let err = MockFault::Code("23503").into_error();
        assert_eq!(classify_sqlx(&err), FaultClass::Permanent);
    }

    #[test]
    fn message_text_is_ignored() {
        // Only the code counts, a scary message does not make it retryable.
        let err = MockFault::Message("bad connection", "XX000").into_error();
        assert_eq!(classify_sqlx(&err), FaultClass::Permanent);
    }
}
