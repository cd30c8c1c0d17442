use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::pool::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS};
use crate::monitor::DEFAULT_MONITOR_INTERVAL;
use crate::options::{
    IsolationLevel, TransactionOptions, DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_STATEMENT_TIMEOUT,
};

/// Store configuration for tribes services
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub transaction: TransactionConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string; `${VAR}` references are expanded from the environment
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Default namespace for transactions whose context carries none
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,

    #[serde(default)]
    pub isolation_level: IsolationLevel,

    #[serde(default = "default_true")]
    pub retry_on_deadlock: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/tribes".to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT.as_millis() as u64
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT.as_millis() as u64
}

fn default_statement_timeout_ms() -> u64 {
    DEFAULT_STATEMENT_TIMEOUT.as_millis() as u64
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_monitor_interval_secs() -> u64 {
    DEFAULT_MONITOR_INTERVAL.as_secs()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            schema: None,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
            isolation_level: IsolationLevel::default(),
            retry_on_deadlock: true,
            max_retries: default_max_retries(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
        }
    }
}

impl StoreConfig {
    /// Load config from `$TRIBES_CONFIG` or ~/.tribes/config.toml.
    ///
    /// A missing file yields defaults; environment overrides apply either way.
    pub fn load() -> Result<Self> {
        let path = env::var("TRIBES_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_path());

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Get config file path: ~/.tribes/config.toml
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tribes/config.toml")
    }

    /// Parse a config file without applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        toml::from_str(&content).context("Failed to parse config file (invalid TOML)")
    }

    /// Apply `DATABASE_URL`, `TRIBES_SCHEMA` and `TRIBES_MAX_CONNECTIONS`,
    /// then expand `${VAR}` references in the database url.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(schema) = lookup("TRIBES_SCHEMA") {
            self.database.schema = (!schema.is_empty()).then_some(schema);
        }
        if let Some(max) = lookup("TRIBES_MAX_CONNECTIONS") {
            self.database.max_connections = max
                .parse()
                .with_context(|| format!("TRIBES_MAX_CONNECTIONS is not a number: {}", max))?;
        }

        let mut vars = HashMap::new();
        for key in ["HOME", "USER", "PGHOST", "PGPORT", "PGUSER", "PGPASSWORD", "PGDATABASE"] {
            vars.insert(key.to_string(), lookup(key).unwrap_or_default());
        }
        self.database.url = expand_string(&self.database.url, &vars);

        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.database.acquire_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_secs.max(1))
    }

    /// Transaction defaults described by this config
    pub fn transaction_options(&self) -> TransactionOptions {
        let tx = &self.transaction;
        TransactionOptions {
            lock_timeout: Duration::from_millis(tx.lock_timeout_ms),
            isolation_level: tx.isolation_level,
            retry_on_deadlock: tx.retry_on_deadlock,
            max_retries: tx.max_retries,
            statement_timeout: Duration::from_millis(tx.statement_timeout_ms),
        }
    }
}

/// Expand ${var} references in a string
fn expand_string(s: &str, vars: &HashMap<String, String>) -> String {
    let mut result = s.to_string();

    for (key, value) in vars {
        let pattern = format!("${{{}}}", key);
        result = result.replace(&pattern, value);
    }

    result
}
