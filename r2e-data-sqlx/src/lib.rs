//! # r2e-data-sqlx — SQLx backend for R2E data layer
//!
//! This crate provides the [SQLx](https://github.com/launchbadge/sqlx)-specific
//! implementations for R2E's data access layer. It depends on [`r2e-data`] for
//! the abstract traits and types, and adds the SQL-backed realtime/historical
//! store pair the hub runs on.
//!
//! # What's in this crate
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SqlRealtimeStore`] | `RealtimeStore` backed by a `source_topic`-keyed table, upserted on every write |
//! | [`SqlHistoricalStore`] | Append-only `HistoricalStore` over a time-ranged table |
//! | [`SqlxErrorExt`] | Extension trait to convert `sqlx::Error` → `DataError` (`.into_data_error()`) |
//! | [`SqlxResult<T>`] | Type alias for `Result<T, DataError>` |
//!
//! # Feature flags
//!
//! Enable exactly one database driver:
//!
//! | Feature    | Driver |
//! |------------|--------|
//! | `sqlite`   | SQLite via `sqlx/sqlite` |
//! | `postgres` | PostgreSQL via `sqlx/postgres` |
//! | `mysql`    | MySQL via `sqlx/mysql` |
//!
//! # Quick start
//!
//! ```toml
//! [dependencies]
//! r2e-data-sqlx = { version = "0.1", features = ["sqlite"] }
//! ```
//!
//! ```ignore
//! use r2e_data::Dialect;
//! use r2e_data_sqlx::{SqlHistoricalStore, SqlRealtimeStore};
//!
//! let realtime = SqlRealtimeStore::new(pool.clone(), Dialect::Sqlite);
//! let historical = SqlHistoricalStore::new(pool, Dialect::Sqlite);
//! realtime.store(&point).await?;
//! ```
//!
//! # Error bridging
//!
//! Due to Rust's orphan rules, `From<sqlx::Error> for DataError` can't be
//! implemented here. Use the [`SqlxErrorExt`] trait instead:
//!
//! ```ignore
//! use r2e_data_sqlx::SqlxErrorExt;
//!
//! let user = sqlx::query_as("SELECT ...")
//!     .fetch_one(&pool)
//!     .await
//!     .map_err(|e| e.into_data_error())?;
//! ```

pub mod error;
pub mod store;

pub use error::{SqlxErrorExt, SqlxResult};
pub use store::{SqlHistoricalStore, SqlRealtimeStore};

/// Re-exports of the most commonly used types from both `r2e-data` and this crate.
pub mod prelude {
    pub use crate::{SqlHistoricalStore, SqlRealtimeStore, SqlxErrorExt};
    pub use r2e_data::prelude::*;
}
