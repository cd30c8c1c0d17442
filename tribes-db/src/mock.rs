//! In-memory backend for tests.
//!
//! Records every backend call, buffers session writes until commit, and
//! replays scripted faults so retry paths can be driven without a server.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sqlx::error::{DatabaseError, ErrorKind};

use crate::classify::{DEADLOCK_DETECTED, LOCK_NOT_AVAILABLE, QUERY_CANCELED, SERIALIZATION_FAILURE};
use crate::db::{Backend, Session};
use crate::options::IsolationLevel;

/// search_path a fresh mock session reports
pub const DEFAULT_SEARCH_PATH: &str = "\"$user\", public";

/// A scripted failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// Connection reset by peer
    Connection,
    Deadlock,
    LockTimeout,
    SerializationFailure,
    StatementTimeout,
    /// Database error with the given SQLSTATE
    Code(&'static str),
    /// Database error with a custom message and SQLSTATE
    Message(&'static str, &'static str),
}

impl MockFault {
    pub fn into_error(self) -> sqlx::Error {
        match self {
            Self::Connection => sqlx::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            Self::Deadlock => db_error("deadlock detected", DEADLOCK_DETECTED),
            Self::LockTimeout => db_error("canceling statement due to lock timeout", LOCK_NOT_AVAILABLE),
            Self::SerializationFailure => db_error(
                "could not serialize access due to concurrent update",
                SERIALIZATION_FAILURE,
            ),
            Self::StatementTimeout => {
                db_error("canceling statement due to statement timeout", QUERY_CANCELED)
            }
            Self::Code(code) => db_error("mock database error", code),
            Self::Message(message, code) => db_error(message, code),
        }
    }
}

fn db_error(message: &'static str, code: &'static str) -> sqlx::Error {
    sqlx::Error::Database(Box::new(MockDbError { message, code }))
}

/// Database error carrying a SQLSTATE, as a server would report it
#[derive(Debug)]
pub struct MockDbError {
    message: &'static str,
    code: &'static str,
}

impl fmt::Display for MockDbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.code)
    }
}

impl StdError for MockDbError {}

impl DatabaseError for MockDbError {
    fn message(&self) -> &str {
        self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code))
    }

    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Backend call as recorded by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Ping,
    Begin(IsolationLevel),
    SetLocal { name: String, value: String },
    Commit,
    Rollback,
    Probe,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<MockEvent>,
    committed: BTreeMap<String, String>,
    ping_faults: VecDeque<MockFault>,
    begin_faults: VecDeque<MockFault>,
    set_local_faults: VecDeque<MockFault>,
    commit_faults: VecDeque<MockFault>,
    probe_faults: VecDeque<MockFault>,
    setting_overrides: HashMap<String, String>,
    deadlock_waiters: i64,
}

/// Scriptable backend; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next ping with `fault`; queued faults are consumed in order.
    pub fn fail_ping(&self, fault: MockFault) -> &Self {
        lock(&self.state).ping_faults.push_back(fault);
        self
    }

    pub fn fail_begin(&self, fault: MockFault) -> &Self {
        lock(&self.state).begin_faults.push_back(fault);
        self
    }

    pub fn fail_set_local(&self, fault: MockFault) -> &Self {
        lock(&self.state).set_local_faults.push_back(fault);
        self
    }

    pub fn fail_commit(&self, fault: MockFault) -> &Self {
        lock(&self.state).commit_faults.push_back(fault);
        self
    }

    pub fn fail_probe(&self, fault: MockFault) -> &Self {
        lock(&self.state).probe_faults.push_back(fault);
        self
    }

    /// Make every readback of `name` report `value`, whatever was set.
    pub fn override_setting(&self, name: &str, value: &str) -> &Self {
        lock(&self.state)
            .setting_overrides
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn set_deadlock_waiters(&self, count: i64) -> &Self {
        lock(&self.state).deadlock_waiters = count;
        self
    }

    pub fn events(&self) -> Vec<MockEvent> {
        lock(&self.state).events.clone()
    }

    pub fn count(&self, event: &MockEvent) -> usize {
        lock(&self.state).events.iter().filter(|e| *e == event).count()
    }

    pub fn begins(&self) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| matches!(e, MockEvent::Begin(_)))
            .count()
    }

    pub fn commits(&self) -> usize {
        self.count(&MockEvent::Commit)
    }

    pub fn rollbacks(&self) -> usize {
        self.count(&MockEvent::Rollback)
    }

    /// Committed value for `key`
    pub fn committed(&self, key: &str) -> Option<String> {
        lock(&self.state).committed.get(key).cloned()
    }

    pub fn committed_len(&self) -> usize {
        lock(&self.state).committed.len()
    }
}

#[async_trait]
impl Backend for MockBackend {
    type Session = MockSession;

    async fn ping(&self) -> Result<(), sqlx::Error> {
        let mut state = lock(&self.state);
        state.events.push(MockEvent::Ping);
        match state.ping_faults.pop_front() {
            Some(fault) => Err(fault.into_error()),
            None => Ok(()),
        }
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<MockSession, sqlx::Error> {
        let mut state = lock(&self.state);
        state.events.push(MockEvent::Begin(isolation));
        if let Some(fault) = state.begin_faults.pop_front() {
            return Err(fault.into_error());
        }

        let mut settings = HashMap::new();
        settings.insert("search_path".to_string(), DEFAULT_SEARCH_PATH.to_string());
        settings.insert(
            "transaction_isolation".to_string(),
            isolation.as_sql().to_lowercase(),
        );

        Ok(MockSession {
            state: Arc::clone(&self.state),
            settings,
            writes: Vec::new(),
        })
    }

    async fn deadlock_waiters(&self) -> Result<i64, sqlx::Error> {
        let mut state = lock(&self.state);
        state.events.push(MockEvent::Probe);
        match state.probe_faults.pop_front() {
            Some(fault) => Err(fault.into_error()),
            None => Ok(state.deadlock_waiters),
        }
    }
}

/// Transaction handle of [`MockBackend`].
///
/// Writes are buffered and become visible through
/// [`MockBackend::committed`] only after commit.
#[derive(Debug)]
pub struct MockSession {
    state: Arc<Mutex<State>>,
    settings: HashMap<String, String>,
    writes: Vec<(String, String)>,
}

impl MockSession {
    pub fn write(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.writes.push((key.into(), value.into()));
    }

    /// Read through this transaction: own writes first, then committed data.
    pub fn read(&self, key: &str) -> Option<String> {
        self.writes
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .or_else(|| lock(&self.state).committed.get(key).cloned())
    }

    /// Drop a local setting back to its session default, the way a driver
    /// resetting session state would.
    pub fn reset_setting(&mut self, name: &str) {
        if name == "search_path" {
            self.settings
                .insert(name.to_string(), DEFAULT_SEARCH_PATH.to_string());
        } else {
            self.settings.remove(name);
        }
    }
}

#[async_trait]
impl Session for MockSession {
    async fn set_local(&mut self, name: &str, value: &str) -> Result<(), sqlx::Error> {
        {
            let mut state = lock(&self.state);
            state.events.push(MockEvent::SetLocal {
                name: name.to_string(),
                value: value.to_string(),
            });
            if let Some(fault) = state.set_local_faults.pop_front() {
                return Err(fault.into_error());
            }
        }
        self.settings.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn current_setting(&mut self, name: &str) -> Result<String, sqlx::Error> {
        if let Some(value) = lock(&self.state).setting_overrides.get(name) {
            return Ok(value.clone());
        }
        self.settings
            .get(name)
            .cloned()
            .ok_or_else(|| MockFault::Code("42704").into_error())
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        let mut state = lock(&self.state);
        state.events.push(MockEvent::Commit);
        if let Some(fault) = state.commit_faults.pop_front() {
            return Err(fault.into_error());
        }
        for (key, value) in self.writes {
            state.committed.insert(key, value);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        lock(&self.state).events.push(MockEvent::Rollback);
        Ok(())
    }
}
