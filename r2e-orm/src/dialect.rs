use serde::Deserialize;

/// SQL rendering rules for one database family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite-style `?` placeholders (default).
    #[default]
    Sqlite,
    /// Cloudflare D1: SQLite rules over an HTTP-bound driver.
    D1,
    /// MySQL-style `?` placeholders.
    #[serde(alias = "mariadb")]
    MySql,
    /// Postgres-style `$1, $2, ...` placeholders.
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
}

/// Input to [`Dialect::build_upsert`].
#[derive(Debug, Clone)]
pub struct UpsertSpec<'a> {
    pub table: &'a str,
    pub columns: &'a [&'a str],
    pub primary_column: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ_UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ_COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE_READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::D1 => "d1",
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    /// Placeholder for the `index`-th (1-based) bound parameter.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite | Dialect::D1 | Dialect::MySql => "?".to_string(),
        }
    }

    /// Insert of a row whose columns all take their defaults.
    pub fn insert_defaults(self, table: &str) -> String {
        match self {
            Dialect::MySql => format!("INSERT INTO {table} () VALUES ()"),
            Dialect::Sqlite | Dialect::D1 | Dialect::Postgres => {
                format!("INSERT INTO {table} DEFAULT VALUES")
            }
        }
    }

    pub fn begin_transaction(self) -> &'static str {
        match self {
            Dialect::Sqlite | Dialect::D1 => "BEGIN TRANSACTION",
            Dialect::MySql => "START TRANSACTION",
            Dialect::Postgres => "BEGIN",
        }
    }

    /// Statement issued before `BEGIN` to lower isolation to read-uncommitted.
    pub fn read_uncommitted(self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite | Dialect::D1 => Some("PRAGMA read_uncommitted = 1"),
            Dialect::MySql => Some("SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED"),
            Dialect::Postgres => Some(
                "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
            ),
        }
    }

    /// Rendering for an isolation level, if this dialect has one.
    pub fn isolation_sql(self, level: IsolationLevel) -> Option<&'static str> {
        match level {
            IsolationLevel::ReadUncommitted => self.read_uncommitted(),
            _ => None,
        }
    }

    /// Case-insensitive pattern match keyword.
    pub fn ilike_keyword(self) -> &'static str {
        match self {
            Dialect::Postgres => "ILIKE",
            Dialect::Sqlite | Dialect::D1 | Dialect::MySql => "LIKE",
        }
    }

    /// Insert-or-update on the primary column, updating every other column.
    ///
    /// Placeholders are positional in `columns` order.
    pub fn build_upsert(self, upsert: &UpsertSpec<'_>) -> String {
        let placeholders: Vec<String> = (1..=upsert.columns.len())
            .map(|i| self.placeholder(i))
            .collect();
        let targets = upsert
            .columns
            .iter()
            .filter(|c| **c != upsert.primary_column);
        let head = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            upsert.table,
            upsert.columns.join(", "),
            placeholders.join(", ")
        );
        let conflict = match self {
            Dialect::Sqlite | Dialect::D1 => format!("ON CONFLICT({})", upsert.primary_column),
            Dialect::Postgres => format!("ON CONFLICT ({})", upsert.primary_column),
            Dialect::MySql => String::new(),
        };
        if targets.clone().next().is_none() {
            return match self {
                Dialect::MySql => format!(
                    "{head} ON DUPLICATE KEY UPDATE {0} = {0}",
                    upsert.primary_column
                ),
                _ => format!("{head} {conflict} DO NOTHING"),
            };
        }
        match self {
            Dialect::Sqlite | Dialect::D1 => {
                let updates: Vec<String> = targets.map(|c| format!("{c} = excluded.{c}")).collect();
                format!("{head} {conflict} DO UPDATE SET {}", updates.join(", "))
            }
            Dialect::Postgres => {
                let updates: Vec<String> = targets.map(|c| format!("{c} = EXCLUDED.{c}")).collect();
                format!("{head} {conflict} DO UPDATE SET {}", updates.join(", "))
            }
            Dialect::MySql => {
                let updates: Vec<String> = targets.map(|c| format!("{c} = VALUES({c})")).collect();
                format!("{head} ON DUPLICATE KEY UPDATE {}", updates.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users<'a>(columns: &'a [&'a str]) -> UpsertSpec<'a> {
        UpsertSpec {
            table: "users",
            columns,
            primary_column: "id",
        }
    }

    #[test]
    fn test_sqlite_upsert() {
        let sql = Dialect::Sqlite.build_upsert(&users(&["id", "name", "email"]));
        assert_eq!(
            sql,
            "INSERT INTO users (id, name, email) VALUES (?, ?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email"
        );
    }

    #[test]
    fn test_postgres_upsert_uses_numbered_placeholders() {
        let sql = Dialect::Postgres.build_upsert(&users(&["id", "name"]));
        assert_eq!(
            sql,
            "INSERT INTO users (id, name) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"
        );
    }

    #[test]
    fn test_mysql_upsert() {
        let sql = Dialect::MySql.build_upsert(&users(&["id", "name"]));
        assert_eq!(
            sql,
            "INSERT INTO users (id, name) VALUES (?, ?) ON DUPLICATE KEY UPDATE name = VALUES(name)"
        );
    }

    #[test]
    fn test_insert_defaults() {
        assert_eq!(Dialect::Sqlite.insert_defaults("t"), "INSERT INTO t DEFAULT VALUES");
        assert_eq!(Dialect::Postgres.insert_defaults("t"), "INSERT INTO t DEFAULT VALUES");
        assert_eq!(Dialect::MySql.insert_defaults("t"), "INSERT INTO t () VALUES ()");
    }

    #[test]
    fn test_upsert_of_primary_only_row() {
        assert_eq!(
            Dialect::Sqlite.build_upsert(&users(&["id"])),
            "INSERT INTO users (id) VALUES (?) ON CONFLICT(id) DO NOTHING"
        );
        assert_eq!(
            Dialect::MySql.build_upsert(&users(&["id"])),
            "INSERT INTO users (id) VALUES (?) ON DUPLICATE KEY UPDATE id = id"
        );
    }

    #[test]
    fn test_isolation_rendering_subset() {
        assert_eq!(
            Dialect::Sqlite.isolation_sql(IsolationLevel::ReadUncommitted),
            Some("PRAGMA read_uncommitted = 1")
        );
        assert_eq!(Dialect::Sqlite.isolation_sql(IsolationLevel::Serializable), None);
    }

    #[test]
    fn test_begin_statements() {
        assert_eq!(Dialect::Sqlite.begin_transaction(), "BEGIN TRANSACTION");
        assert_eq!(Dialect::Postgres.begin_transaction(), "BEGIN");
        assert_eq!(Dialect::MySql.begin_transaction(), "START TRANSACTION");
    }
}
