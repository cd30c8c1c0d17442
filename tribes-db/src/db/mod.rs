//! Database layer - connection pool and the backend seam
//!
//! # Design Principles
//!
//! - One shared pool; a connection is held only for one transaction attempt
//! - Session settings are transaction-local, never pool-wide
//! - Production and test backends implement the same traits

pub mod backend;
pub mod pool;
pub mod postgres;

pub use backend::{Backend, Session};
pub use pool::{create_pool, create_pool_lazy, create_pool_with_options};
pub use postgres::{PgBackend, PgSession};
