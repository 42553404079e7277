use super::MigrationRecord;
use crate::dialect::Dialect;
use crate::driver::{Driver, Statement};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{ColumnMetadata, ColumnType, Generated, TableMetadata};
use crate::query::is_valid_identifier;
use crate::schema::build_create_table_sql;
use crate::transform::{record_from_storage, to_storage};
use crate::value::Value;
use chrono::Utc;
use std::sync::Arc;

/// Reads and writes the migration history table.
pub struct MigrationStorage {
    driver: Arc<dyn Driver>,
    dialect: Dialect,
    table: TableMetadata,
}

impl MigrationStorage {
    pub fn new(driver: Arc<dyn Driver>, dialect: Dialect, table_name: &str) -> OrmResult<Self> {
        if !is_valid_identifier(table_name, false) {
            return Err(OrmError::InvalidIdentifier {
                kind: "table",
                ident: table_name.to_string(),
            });
        }
        Ok(Self {
            driver,
            dialect,
            table: history_table(table_name),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    pub async fn ensure_table(&self) -> OrmResult<()> {
        self.driver
            .exec(&build_create_table_sql(&self.table, self.dialect))
            .await
    }

    /// Executed migrations, oldest first.
    pub async fn get_executed(&self) -> OrmResult<Vec<MigrationRecord>> {
        let statement = Statement::prepare(format!(
            "SELECT * FROM {} ORDER BY timestamp ASC",
            self.table.name
        ));
        let rows = self.driver.all(&statement).await?.into_rows();
        rows.into_iter()
            .map(|row| MigrationRecord::from_record(record_from_storage(&self.table.columns, row)))
            .collect()
    }

    pub async fn insert(&self, timestamp: i64, name: &str, execution_time: i64) -> OrmResult<()> {
        let placeholders: Vec<String> = (1..=4).map(|i| self.dialect.placeholder(i)).collect();
        let sql = format!(
            "INSERT INTO {} (timestamp, name, executed_at, execution_time) VALUES ({})",
            self.table.name,
            placeholders.join(", ")
        );
        let executed_at = to_storage(self.table.find_column("executed_at"), Value::DateTime(Utc::now()));
        let statement = Statement::prepare(sql).bind([
            Value::Int(timestamp),
            Value::from(name),
            executed_at,
            Value::Int(execution_time),
        ]);
        self.driver.run(&statement).await.map(|_| ())
    }

    pub async fn delete(&self, timestamp: i64) -> OrmResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE timestamp = {}",
            self.table.name,
            self.dialect.placeholder(1)
        );
        let statement = Statement::prepare(sql).bind([Value::Int(timestamp)]);
        self.driver.run(&statement).await.map(|_| ())
    }
}

fn history_table(name: &str) -> TableMetadata {
    TableMetadata::new(name)
        .column(ColumnMetadata::primary_generated_column("id", Generated::Increment))
        .column(
            ColumnMetadata::new("timestamp", ColumnType::BigInt)
                .unique()
                .nullable(false),
        )
        .column(ColumnMetadata::new("name", ColumnType::Text).nullable(false))
        .column(ColumnMetadata::new("executed_at", ColumnType::DateTime))
        .column(ColumnMetadata::new("execution_time", ColumnType::Integer).nullable(false))
}
