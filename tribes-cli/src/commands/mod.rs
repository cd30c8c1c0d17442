//! Command implementations for the tribes CLI

pub mod check;
pub mod monitor;

use anyhow::{Context, Result};
use tribes_db::db::create_pool_lazy;
use tribes_db::{StoreConfig, TransactionManager};

pub use check::run_check;
pub use monitor::run_monitor;

/// Transaction manager over a lazily connected pool.
///
/// Nothing touches the network here; the manager's liveness check does the
/// first connect and retries it with backoff.
pub(crate) fn connect(config: &StoreConfig) -> Result<TransactionManager> {
    let pool = create_pool_lazy(
        &config.database.url,
        config.database.max_connections,
        config.acquire_timeout(),
    )
    .context("Invalid database url")?;

    let manager =
        TransactionManager::from_pool(pool).with_default_options(config.transaction_options());

    Ok(match &config.database.schema {
        Some(schema) => manager.with_default_schema(schema.clone()),
        None => manager,
    })
}
