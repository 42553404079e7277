/// Errors that can occur in the ORM layer.
///
/// Structural errors (registration, shape, uniqueness, compile) indicate a
/// programming mistake and are never retried. `Database` wraps whatever the
/// driver rejected with.
#[derive(Debug)]
pub enum OrmError {
    /// A repository or data source referenced an entity that was never registered.
    EntityNotRegistered { entity: String },
    /// An identity-based operation on a table that declares no primary column.
    NoPrimaryColumn { table: String },
    /// Two declared migrations share a timestamp.
    DuplicateMigrationTimestamp(i64),
    /// A history record points at a migration that is no longer declared.
    MigrationNotFound { timestamp: i64, name: String },
    /// The driver cannot hold a session, so it cannot run transactions.
    TransactionUnsupported,
    /// `commit`/`rollback` on a transaction that already ended.
    TransactionInactive,
    /// The isolation level has no rendering and strict isolation is on.
    UnsupportedIsolation(String),
    /// A condition, ordering or grouping referenced an undeclared column.
    UnknownColumn { table: String, column: String },
    InvalidIdentifier { kind: &'static str, ident: String },
    /// A record could not be turned into an entity.
    Mapping(String),
    Config(String),
    Database(Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience alias used throughout the crate.
pub type OrmResult<T> = Result<T, OrmError>;

impl OrmError {
    /// Construct a `Database` variant from any error type.
    ///
    /// Used by driver crates (e.g. `r2e-orm-sqlx`) to wrap driver-specific errors.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        OrmError::Database(Box::new(err))
    }

    /// Construct a `Database` variant from a plain message.
    pub fn database_msg(msg: impl Into<String>) -> Self {
        OrmError::Database(msg.into().into())
    }

    pub fn mapping(msg: impl Into<String>) -> Self {
        OrmError::Mapping(msg.into())
    }

    pub fn unknown_column(table: &str, column: &str) -> Self {
        OrmError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// `true` for errors that point at a programming or configuration mistake.
    pub fn is_structural(&self) -> bool {
        !matches!(self, OrmError::Database(_))
    }
}

impl std::fmt::Display for OrmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrmError::EntityNotRegistered { entity } => {
                write!(f, "Entity {entity} is not registered")
            }
            OrmError::NoPrimaryColumn { table } => {
                write!(f, "No primary column found for {table}")
            }
            OrmError::DuplicateMigrationTimestamp(ts) => {
                write!(f, "Duplicate migration timestamp: {ts}")
            }
            OrmError::MigrationNotFound { timestamp, name } => {
                write!(f, "Migration not found: {name} ({timestamp})")
            }
            OrmError::TransactionUnsupported => {
                write!(f, "Driver does not support transactions")
            }
            OrmError::TransactionInactive => write!(f, "Transaction is not active"),
            OrmError::UnsupportedIsolation(level) => {
                write!(f, "Isolation level {level} is not supported by this dialect")
            }
            OrmError::UnknownColumn { table, column } => {
                write!(f, "Unknown column '{column}' on table {table}")
            }
            OrmError::InvalidIdentifier { kind, ident } => {
                write!(f, "Invalid {kind} identifier: {ident}")
            }
            OrmError::Mapping(msg) => write!(f, "Mapping error: {msg}"),
            OrmError::Config(msg) => write!(f, "Config error: {msg}"),
            OrmError::Database(err) => write!(f, "Database error: {err}"),
        }
    }
}

impl std::error::Error for OrmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrmError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
