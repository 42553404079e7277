//! `CREATE TABLE` generation from registered metadata. No diffing against a
//! live schema.

use crate::data_source::DataSource;
use crate::dialect::Dialect;
use crate::error::OrmResult;
use crate::metadata::{ColumnMetadata, ColumnType, Generated, TableMetadata};
use crate::value::Value;

/// `CREATE TABLE IF NOT EXISTS` for `table` in `dialect`.
pub fn build_create_table_sql(table: &TableMetadata, dialect: Dialect) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|column| column_definition(column, dialect))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.name,
        columns.join(", ")
    )
}

/// Create every registered table that does not exist yet.
pub async fn synchronize(data_source: &DataSource) -> OrmResult<()> {
    let dialect = data_source.dialect();
    let driver = data_source.driver();
    let mut tables = data_source.registry().tables();
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    for table in tables {
        let sql = build_create_table_sql(&table, dialect);
        tracing::debug!(sql = %sql, "synchronizing table");
        driver.exec(&sql).await?;
    }
    tracing::info!(dialect = dialect.name(), "schema synchronized");
    Ok(())
}

fn column_definition(column: &ColumnMetadata, dialect: Dialect) -> String {
    let increment_primary = column.primary && column.generated == Some(Generated::Increment);
    match dialect {
        Dialect::Sqlite | Dialect::D1 => {
            let sql_type = column.resolved_type(dialect);
            if increment_primary && sql_type == "INTEGER" {
                return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column.name);
            }
            common_parts(column, &sql_type).join(" ")
        }
        Dialect::Postgres => {
            if increment_primary && column.postgres_type.is_none() && column.column_type.is_integer_family() {
                let serial = if column.column_type == ColumnType::BigInt {
                    "BIGSERIAL"
                } else {
                    "SERIAL"
                };
                return format!("{} {serial} PRIMARY KEY", column.name);
            }
            common_parts(column, &column.resolved_type(dialect)).join(" ")
        }
        Dialect::MySql => {
            let base = column.resolved_type(dialect);
            let sql_type = match base.as_str() {
                "VARCHAR" | "CHAR" => {
                    let fallback = if base == "CHAR" && column.column_type == ColumnType::Uuid {
                        36
                    } else {
                        255
                    };
                    format!("{base}({})", column.length.unwrap_or(fallback))
                }
                "DECIMAL" => format!(
                    "DECIMAL({},{})",
                    column.precision.unwrap_or(10),
                    column.scale.unwrap_or(2)
                ),
                _ => base.clone(),
            };
            let mut parts = common_parts(column, &sql_type);
            if column.generated == Some(Generated::Increment) {
                parts.push("AUTO_INCREMENT".to_string());
            }
            parts.join(" ")
        }
    }
}

fn common_parts(column: &ColumnMetadata, sql_type: &str) -> Vec<String> {
    let mut parts = vec![format!("{} {sql_type}", column.name)];
    if column.primary {
        parts.push("PRIMARY KEY".to_string());
    }
    if column.unique {
        parts.push("UNIQUE".to_string());
    }
    if column.nullable == Some(false) {
        parts.push("NOT NULL".to_string());
    }
    if let Some(default) = &column.default {
        parts.push(format!("DEFAULT {}", quote_default(default)));
    }
    parts
}

fn quote_default(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Text(s) => quote(s),
        other => {
            let json = match other {
                Value::Json(j) => j.to_string(),
                Value::Bytes(b) => serde_json::Value::from(b.clone()).to_string(),
                Value::Date(d) => format!("\"{}\"", d.format("%Y-%m-%d")),
                Value::DateTime(dt) => format!(
                    "\"{}\"",
                    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                ),
                _ => String::new(),
            };
            quote(&json)
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> TableMetadata {
        TableMetadata::new("users")
            .column(ColumnMetadata::primary_generated_column("id", Generated::Increment))
            .column(ColumnMetadata::new("email", ColumnType::String).unique().nullable(false))
            .column(ColumnMetadata::new("active", ColumnType::Boolean).default_value(true))
    }

    #[test]
    fn test_sqlite_autoincrement_shorthand() {
        assert_eq!(
            build_create_table_sql(&users(), Dialect::Sqlite),
            "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT UNIQUE NOT NULL, active INTEGER DEFAULT 1)"
        );
    }

    #[test]
    fn test_mysql_lengths_and_auto_increment() {
        let table = users()
            .column(ColumnMetadata::new("token", ColumnType::Uuid))
            .column(ColumnMetadata::new("price", ColumnType::Decimal));
        assert_eq!(
            build_create_table_sql(&table, Dialect::MySql),
            "CREATE TABLE IF NOT EXISTS users (id INT PRIMARY KEY AUTO_INCREMENT, email VARCHAR(255) UNIQUE NOT NULL, \
             active BOOLEAN DEFAULT 1, token CHAR(36), price DECIMAL(10,2))"
        );
    }

    #[test]
    fn test_postgres_serial() {
        let table = TableMetadata::new("events")
            .column(ColumnMetadata::new("id", ColumnType::BigInt).primary().generated(Generated::Increment))
            .column(ColumnMetadata::new("payload", ColumnType::Json));
        assert_eq!(
            build_create_table_sql(&table, Dialect::Postgres),
            "CREATE TABLE IF NOT EXISTS events (id BIGSERIAL PRIMARY KEY, payload JSONB)"
        );
    }

    #[test]
    fn test_default_literals() {
        assert_eq!(quote_default(&Value::Null), "NULL");
        assert_eq!(quote_default(&Value::Int(5)), "5");
        assert_eq!(quote_default(&Value::Bool(false)), "0");
        assert_eq!(quote_default(&Value::Text("it's".into())), "'it''s'");
        assert_eq!(
            quote_default(&Value::Json(json!({"a": "b'c"}))),
            "'{\"a\":\"b''c\"}'"
        );
    }
}
