//! Versioned schema changes with persisted history.
//!
//! ```ignore
//! struct CreateUsers;
//!
//! #[async_trait]
//! impl Migration for CreateUsers {
//!     fn timestamp(&self) -> i64 { 1_700_000_000_000 }
//!     fn name(&self) -> &str { "CreateUsers" }
//!     async fn up(&self, runner: &QueryRunner) -> OrmResult<()> {
//!         runner.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", vec![]).await?;
//!         Ok(())
//!     }
//!     async fn down(&self, runner: &QueryRunner) -> OrmResult<()> {
//!         runner.execute("DROP TABLE users", vec![]).await?;
//!         Ok(())
//!     }
//! }
//!
//! let executor = MigrationExecutor::from_data_source(&ds, vec![Arc::new(CreateUsers)])?;
//! executor.bootstrap().await?;
//! ```

mod executor;
mod runner;
mod storage;

pub use executor::MigrationExecutor;
pub use runner::MigrationRunner;
pub use storage::MigrationStorage;

use crate::driver::RunResult;
use crate::error::{OrmError, OrmResult};
use crate::transaction::TransactionManager;
use crate::value::{Record, Value};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One schema change. Timestamps must be unique across all declared migrations.
#[async_trait]
pub trait Migration: Send + Sync {
    fn timestamp(&self) -> i64;

    fn name(&self) -> &str;

    async fn up(&self, runner: &QueryRunner) -> OrmResult<()>;

    async fn down(&self, runner: &QueryRunner) -> OrmResult<()>;
}

/// Statement access handed to migration bodies, bound to the migration's own
/// transaction.
pub struct QueryRunner {
    manager: TransactionManager,
}

impl QueryRunner {
    pub fn new(manager: TransactionManager) -> Self {
        Self { manager }
    }

    pub async fn query(&self, sql: &str, params: Vec<Value>) -> OrmResult<Vec<Record>> {
        self.manager.query(sql, params).await
    }

    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> OrmResult<RunResult> {
        self.manager.execute(sql, params).await
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }
}

/// A row of the history table.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub timestamp: i64,
    pub name: String,
    pub executed_at: Option<DateTime<Utc>>,
    /// Milliseconds.
    pub execution_time: i64,
}

impl MigrationRecord {
    fn from_record(mut record: Record) -> OrmResult<Self> {
        Ok(Self {
            timestamp: record.take_as("timestamp")?,
            name: record.take_as("name")?,
            executed_at: record.take_as("executed_at")?,
            execution_time: record.take_as::<Option<i64>>("execution_time")?.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatus {
    pub timestamp: i64,
    pub name: String,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_time: Option<i64>,
}

pub(crate) fn missing(timestamp: i64, name: &str) -> OrmError {
    OrmError::MigrationNotFound {
        timestamp,
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_row(executed_at: Value) -> Record {
        Record::new()
            .with("timestamp", 7)
            .with("name", "Init")
            .with("executed_at", executed_at)
            .with("execution_time", 3)
    }

    #[test]
    fn test_record_without_execution_date() {
        let record = MigrationRecord::from_record(history_row(Value::Null)).unwrap();
        assert_eq!(record.executed_at, None);
        assert_eq!(record.execution_time, 3);
    }

    #[test]
    fn test_unreadable_execution_date_is_an_error() {
        let err = MigrationRecord::from_record(history_row(Value::Text("yesterday".into()))).unwrap_err();
        assert!(matches!(err, OrmError::Mapping(ref m) if m.contains("executed_at")));
    }
}
