//! Database layer for codelens
//!
//! SQLite storage for the quota ledger:
//! - Schema migrations via `PRAGMA user_version`
//! - Repository methods on [`Database`]

pub mod repo;
pub mod schema;

pub use repo::Database;
