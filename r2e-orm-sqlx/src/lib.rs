//! # r2e-orm-sqlx - SQLx backend for r2e-orm
//!
//! Implements the [`r2e_orm::Driver`] contract on top of
//! [SQLx](https://github.com/launchbadge/sqlx).
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SqliteDriver`] | One SQLite connection shared by every statement, so transactions and savepoints work |
//! | [`SqlxErrorExt`] | Extension trait to convert `sqlx::Error` → `OrmError` (`.into_orm_error()`) |
//! | [`SqlxResult<T>`] | Type alias for `Result<T, OrmError>` |
//!
//! # Quick start
//!
//! ```ignore
//! use r2e_orm::prelude::*;
//! use r2e_orm_sqlx::SqliteDriver;
//!
//! let driver = Arc::new(SqliteDriver::connect("sqlite::memory:").await?);
//! let ds = DataSource::new(driver, Dialect::Sqlite, registry);
//! ds.initialize().await?;
//! ```
//!
//! The driver holds a single connection rather than a pool: the ORM's
//! transaction manager issues `BEGIN`/`SAVEPOINT` as plain statements and
//! expects them to land on the same session as the statements that follow.

pub mod error;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{SqlxErrorExt, SqlxResult};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

/// Re-exports of the most commonly used types from both `r2e-orm` and this crate.
pub mod prelude {
    pub use crate::SqlxErrorExt;
    #[cfg(feature = "sqlite")]
    pub use crate::SqliteDriver;
    pub use r2e_orm::prelude::*;
}
