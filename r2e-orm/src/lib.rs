//! # r2e-orm - entity mapping and query execution
//!
//! Maps entity types onto tables, compiles a typed operator algebra into
//! dialect SQL, and runs it through a minimal [`Driver`] contract. On top of
//! that sit repositories, savepoint-nested transactions, versioned
//! migrations, and `CREATE TABLE` synchronization.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`metadata`] | [`Entity`], table/column/relation descriptors, [`MetadataRegistry`] |
//! | [`transform`] | Application ⇄ storage value conversion |
//! | [`operator`] | Predicate trees (`eq`, `and`, `in_array`, ...) |
//! | [`query`] | [`QueryBuilder`] and the SQL compiler |
//! | [`repository`] | CRUD, offset pages and cursor pages |
//! | [`transaction`] | [`TransactionManager`] |
//! | [`migration`] | [`MigrationExecutor`] and the history table |
//! | [`schema`] | DDL generation |
//! | [`data_source`] | [`DataSource`], the entry point |
//!
//! Driver adapters live in separate crates (`r2e-orm-sqlx`).

pub mod config;
pub mod data_source;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod metadata;
pub mod migration;
pub mod operator;
pub mod page;
pub mod query;
pub mod repository;
pub mod schema;
pub mod transaction;
pub mod transform;
pub mod value;

pub use config::DataSourceOptions;
pub use data_source::DataSource;
pub use dialect::{Dialect, IsolationLevel, UpsertSpec};
pub use driver::{Driver, QueryRows, RunResult, Statement};
pub use error::{OrmError, OrmResult};
pub use metadata::{
    ColumnMetadata, ColumnTransformer, ColumnType, Entity, EntityKey, FnTransformer, Generated,
    JoinColumn, JoinTable, MetadataRegistry, RelationKind, RelationMetadata, RelationPatch,
    TableMetadata,
};
pub use migration::{
    Migration, MigrationExecutor, MigrationRecord, MigrationRunner, MigrationStatus,
    MigrationStorage, QueryRunner,
};
pub use operator::{Comparison, Condition, Operator};
pub use page::{CursorPage, CursorPageOptions, Page, Pageable};
pub use query::{BatchUpdate, CompiledQuery, Direction, QueryBuilder};
pub use repository::{FindOptions, Repository};
pub use transaction::{TransactionManager, TransactionState};
pub use value::{FromValue, Record, Value};

pub mod prelude {
    //! Re-exports of the most commonly used types and operator builders.
    pub use crate::operator::{
        and, between, eq, gt, gte, ilike, in_array, is_not_null, is_null, like, lt, lte, ne, not, or,
    };
    pub use crate::{
        ColumnMetadata, ColumnType, Condition, DataSource, Dialect, Direction, Entity, FindOptions,
        Generated, MetadataRegistry, OrmError, OrmResult, Page, Pageable, QueryBuilder, Record,
        Repository, TableMetadata, TransactionManager, Value,
    };
}
