use crate::error::{SqlxErrorExt, SqlxResult};
use async_trait::async_trait;
use chrono::SecondsFormat;
use r2e_orm::{Driver, OrmResult, QueryRows, Record, RunResult, Statement, Value};
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Row, Sqlite, TypeInfo, ValueRef};
use std::sync::Arc;
use tokio::sync::Mutex;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// A [`Driver`] over one SQLite connection.
///
/// Statements are serialized through a mutex; cloning shares the connection.
///
/// # Example
///
/// ```ignore
/// let driver = SqliteDriver::connect("sqlite::memory:").await?;
/// let rows = driver.all(&Statement::prepare("SELECT 1 AS one")).await?;
/// ```
#[derive(Clone)]
pub struct SqliteDriver {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl SqliteDriver {
    pub async fn connect(url: &str) -> SqlxResult<Self> {
        let conn = SqliteConnection::connect(url)
            .await
            .map_err(|e| e.into_orm_error())?;
        tracing::debug!(url, "sqlite connection opened");
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database, gone when the driver is dropped.
    pub async fn in_memory() -> SqlxResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn from_connection(conn: SqliteConnection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn all(&self, statement: &Statement) -> OrmResult<QueryRows> {
        let mut conn = self.conn.lock().await;
        let rows = bind_all(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| e.into_orm_error())?;
        let records = rows
            .iter()
            .map(row_to_record)
            .collect::<SqlxResult<Vec<Record>>>()?;
        Ok(QueryRows::Rows(records))
    }

    async fn run(&self, statement: &Statement) -> OrmResult<RunResult> {
        let mut conn = self.conn.lock().await;
        let result = bind_all(sqlx::query(&statement.sql), &statement.params)
            .execute(&mut *conn)
            .await
            .map_err(|e| e.into_orm_error())?;
        let is_insert = statement
            .sql
            .trim_start()
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"));
        Ok(RunResult {
            changes: Some(result.rows_affected()),
            last_insert_id: (is_insert && result.rows_affected() > 0)
                .then(|| result.last_insert_rowid()),
            success: Some(true),
        })
    }

    async fn exec(&self, sql: &str) -> OrmResult<()> {
        let mut conn = self.conn.lock().await;
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| e.into_orm_error())?;
        Ok(())
    }
}

fn bind_all<'q>(query: SqliteQuery<'q>, params: &'q [Value]) -> SqliteQuery<'q> {
    params.iter().fold(query, bind_value)
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &'q Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Json(json) => query.bind(json.to_string()),
        Value::Date(d) => query.bind(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => query.bind(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}

/// Decode by the value's runtime storage class; declared column types are
/// handled by the ORM's transform pipeline.
fn row_to_record(row: &SqliteRow) -> SqlxResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index).map_err(|e| e.into_orm_error())?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage_class = raw.type_info().name().to_ascii_uppercase();
            match storage_class.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "INT8" | "BOOLEAN" => {
                    Value::Int(decode::<i64>(row, index)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => Value::Float(decode::<f64>(row, index)?),
                "BLOB" => Value::Bytes(decode::<Vec<u8>>(row, index)?),
                _ => Value::Text(decode::<String>(row, index)?),
            }
        };
        record.set(column.name(), value);
    }
    Ok(record)
}

fn decode<T>(row: &SqliteRow, index: usize) -> SqlxResult<T>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get_unchecked::<T, _>(index)
        .map_err(|e| e.into_orm_error())
}
