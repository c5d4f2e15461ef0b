//! Postgres connection pool and schema migrations

mod migrations;
mod pool;

pub use migrations::run_migrations;
pub use pool::{Database, PoolStats};
