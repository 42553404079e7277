//! The minimal contract a database adapter implements.
//!
//! A [`Statement`] is SQL text plus its positional parameters, built the same
//! way a prepared statement is: `Statement::prepare(sql).bind(params)`. The
//! driver executes it and hands rows back as [`Record`]s.

use crate::error::OrmResult;
use crate::value::{Record, Value};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn prepare(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind positional parameters, replacing any previously bound.
    pub fn bind(mut self, params: impl IntoIterator<Item = Value>) -> Self {
        self.params = params.into_iter().collect();
        self
    }
}

/// Rows returned by [`Driver::all`].
///
/// Some backends answer with a bare row list, others wrap it in a result
/// envelope; both are accepted and flattened by [`QueryRows::into_rows`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRows {
    Rows(Vec<Record>),
    Wrapped { results: Vec<Record> },
}

impl QueryRows {
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            QueryRows::Rows(rows) => rows,
            QueryRows::Wrapped { results } => results,
        }
    }
}

impl From<Vec<Record>> for QueryRows {
    fn from(rows: Vec<Record>) -> Self {
        QueryRows::Rows(rows)
    }
}

/// Outcome of a mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub changes: Option<u64>,
    pub last_insert_id: Option<i64>,
    pub success: Option<bool>,
}

/// A database session the ORM issues statements through.
///
/// Transactions assume every statement issued through one driver instance
/// hits the same underlying session.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn all(&self, statement: &Statement) -> OrmResult<QueryRows>;

    async fn run(&self, statement: &Statement) -> OrmResult<RunResult>;

    async fn first(&self, statement: &Statement) -> OrmResult<Option<Record>> {
        Ok(self.all(statement).await?.into_rows().into_iter().next())
    }

    /// Whether [`batch`](Self::batch) submits statements as one unit.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Run several statements. The default runs them one by one, in order.
    async fn batch(&self, statements: &[Statement]) -> OrmResult<Vec<RunResult>> {
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.run(statement).await?);
        }
        Ok(results)
    }

    /// Run parameterless SQL, such as DDL or transaction control.
    async fn exec(&self, sql: &str) -> OrmResult<()> {
        self.run(&Statement::prepare(sql)).await.map(|_| ())
    }

    /// Whether the driver keeps a session open across statements.
    fn supports_transactions(&self) -> bool {
        true
    }
}
