#![allow(dead_code)]

use async_trait::async_trait;
use r2e_orm::prelude::*;
use r2e_orm::{Driver, QueryRows, RunResult, Statement};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory driver that records every statement and answers `all` with
/// scripted rows, in the order they were pushed.
#[derive(Default)]
pub struct RecordingDriver {
    log: Mutex<Vec<Statement>>,
    responses: Mutex<VecDeque<Vec<Record>>>,
    fail_on: Mutex<Option<String>>,
    next_id: AtomicI64,
    batch_calls: AtomicUsize,
    no_transactions: bool,
    batching: bool,
}

impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn without_transactions() -> Arc<Self> {
        Arc::new(Self {
            no_transactions: true,
            ..Default::default()
        })
    }

    pub fn with_batching() -> Arc<Self> {
        Arc::new(Self {
            batching: true,
            ..Default::default()
        })
    }

    /// Rows returned by the next `all` call.
    pub fn push_rows(&self, rows: Vec<Record>) {
        self.responses.lock().unwrap().push_back(rows);
    }

    /// Make every statement containing `pattern` fail.
    pub fn fail_on(&self, pattern: &str) {
        *self.fail_on.lock().unwrap() = Some(pattern.to_string());
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    fn record(&self, statement: &Statement) -> OrmResult<()> {
        self.log.lock().unwrap().push(statement.clone());
        if let Some(pattern) = self.fail_on.lock().unwrap().as_deref() {
            if statement.sql.contains(pattern) {
                return Err(OrmError::database_msg(format!("forced failure on {pattern}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn all(&self, statement: &Statement) -> OrmResult<QueryRows> {
        self.record(statement)?;
        let rows = self.responses.lock().unwrap().pop_front().unwrap_or_default();
        Ok(QueryRows::Wrapped { results: rows })
    }

    async fn run(&self, statement: &Statement) -> OrmResult<RunResult> {
        self.record(statement)?;
        let last_insert_id = statement
            .sql
            .starts_with("INSERT")
            .then(|| self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(RunResult {
            changes: Some(1),
            last_insert_id,
            success: Some(true),
        })
    }

    fn supports_batch(&self) -> bool {
        self.batching
    }

    async fn batch(&self, statements: &[Statement]) -> OrmResult<Vec<RunResult>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.run(statement).await?);
        }
        Ok(results)
    }

    fn supports_transactions(&self) -> bool {
        !self.no_transactions
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

impl Entity for User {
    fn table() -> TableMetadata {
        TableMetadata::new("users")
            .column(ColumnMetadata::primary_generated_column("id", Generated::Increment))
            .column(ColumnMetadata::new("name", ColumnType::Text))
            .column(ColumnMetadata::new("email", ColumnType::Text))
            .column(ColumnMetadata::new("status", ColumnType::Text))
            .column(ColumnMetadata::new("age", ColumnType::Integer))
    }

    fn from_record(mut record: Record) -> OrmResult<Self> {
        Ok(Self {
            id: record.take_as("id")?,
            name: record.take_as("name")?,
            email: record.take_as("email")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", &self.name)
            .with("email", &self.email)
    }
}

/// An entity without a primary column.
#[derive(Debug, Clone)]
pub struct AuditLine {
    pub line: String,
}

impl Entity for AuditLine {
    fn table() -> TableMetadata {
        TableMetadata::new("audit_lines").column(ColumnMetadata::new("line", ColumnType::Text))
    }

    fn from_record(mut record: Record) -> OrmResult<Self> {
        Ok(Self {
            line: record.take_as("line")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new().with("line", &self.line)
    }
}

pub fn user_row(id: i64, name: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("name", name)
        .with("email", format!("{}@x.com", name.to_lowercase()))
}

pub fn data_source(driver: Arc<RecordingDriver>) -> DataSource {
    init_tracing();
    let registry = MetadataRegistry::new();
    registry.register::<User>().unwrap();
    registry.register::<AuditLine>().unwrap();
    DataSource::new(driver, Dialect::Sqlite, Arc::new(registry))
}

/// Route ORM logs to the test output; `RUST_LOG=r2e_orm=debug` shows every statement.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
