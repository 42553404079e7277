//! Entity metadata: tables, columns, relations and the registry that holds them.

use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::value::{Record, Value};
use dashmap::DashMap;
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Dialect-agnostic logical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Text,
    RichText,
    Int,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal,
    Numeric,
    Boolean,
    Uuid,
    Json,
    Date,
    DateTime,
    Blob,
}

impl ColumnType {
    /// Physical type name for the given dialect, before length/precision decoration.
    pub fn physical(self, dialect: Dialect) -> &'static str {
        match dialect {
            Dialect::Sqlite | Dialect::D1 => self.sqlite_type(),
            Dialect::MySql => self.mysql_type(),
            Dialect::Postgres => self.postgres_type(),
        }
    }

    fn sqlite_type(self) -> &'static str {
        match self {
            ColumnType::String
            | ColumnType::Text
            | ColumnType::RichText
            | ColumnType::Uuid
            | ColumnType::Json
            | ColumnType::Date
            | ColumnType::DateTime => "TEXT",
            ColumnType::Int | ColumnType::Integer | ColumnType::BigInt | ColumnType::Boolean => {
                "INTEGER"
            }
            ColumnType::Float | ColumnType::Double => "REAL",
            ColumnType::Decimal | ColumnType::Numeric => "NUMERIC",
            ColumnType::Blob => "BLOB",
        }
    }

    fn mysql_type(self) -> &'static str {
        match self {
            ColumnType::String => "VARCHAR",
            ColumnType::Text => "TEXT",
            ColumnType::RichText => "LONGTEXT",
            ColumnType::Int | ColumnType::Integer => "INT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Decimal | ColumnType::Numeric => "DECIMAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Uuid => "CHAR",
            ColumnType::Json => "JSON",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Blob => "BLOB",
        }
    }

    // Booleans are stored as 0/1, so postgres gets an integer column for them.
    fn postgres_type(self) -> &'static str {
        match self {
            ColumnType::String => "VARCHAR",
            ColumnType::Text | ColumnType::RichText => "TEXT",
            ColumnType::Int | ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "REAL",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Decimal | ColumnType::Numeric => "NUMERIC",
            ColumnType::Boolean => "SMALLINT",
            ColumnType::Uuid => "UUID",
            ColumnType::Json => "JSONB",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "TIMESTAMPTZ",
            ColumnType::Blob => "BYTEA",
        }
    }

    pub fn is_integer_family(self) -> bool {
        matches!(
            self,
            ColumnType::Int | ColumnType::Integer | ColumnType::BigInt
        )
    }
}

/// How a primary value is produced when an insert omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generated {
    /// Left to the storage engine.
    Increment,
    /// A v4 uuid generated locally before the insert.
    Uuid,
}

/// A user-supplied value conversion applied around the built-in coercions.
///
/// On write, transformers run in declaration order; on read, in reverse order.
/// Neither method is invoked for `Value::Null`.
pub trait ColumnTransformer: Send + Sync {
    fn to_storage(&self, value: Value) -> Value {
        value
    }

    fn from_storage(&self, value: Value) -> Value {
        value
    }
}

/// Adapter turning a pair of closures into a [`ColumnTransformer`].
pub struct FnTransformer<To, From> {
    to: To,
    from: From,
}

impl<To, From> FnTransformer<To, From>
where
    To: Fn(Value) -> Value + Send + Sync,
    From: Fn(Value) -> Value + Send + Sync,
{
    pub fn new(to: To, from: From) -> Self {
        Self { to, from }
    }
}

impl<To, From> ColumnTransformer for FnTransformer<To, From>
where
    To: Fn(Value) -> Value + Send + Sync,
    From: Fn(Value) -> Value + Send + Sync,
{
    fn to_storage(&self, value: Value) -> Value {
        (self.to)(value)
    }

    fn from_storage(&self, value: Value) -> Value {
        (self.from)(value)
    }
}

#[derive(Clone, Default)]
pub struct TransformerChain(Vec<Arc<dyn ColumnTransformer>>);

impl TransformerChain {
    pub fn push(&mut self, transformer: Arc<dyn ColumnTransformer>) {
        self.0.push(transformer);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn ColumnTransformer>> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransformerChain({})", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    pub name: String,
    pub column_type: ColumnType,
    pub primary: bool,
    pub unique: bool,
    /// `None` leaves nullability to the engine; only `Some(false)` renders `NOT NULL`.
    pub nullable: Option<bool>,
    pub default: Option<Value>,
    pub generated: Option<Generated>,
    pub transformers: TransformerChain,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub comment: Option<String>,
    pub sqlite_type: Option<String>,
    pub mysql_type: Option<String>,
    pub postgres_type: Option<String>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary: false,
            unique: false,
            nullable: None,
            default: None,
            generated: None,
            transformers: TransformerChain::default(),
            length: None,
            precision: None,
            scale: None,
            comment: None,
            sqlite_type: None,
            mysql_type: None,
            postgres_type: None,
        }
    }

    /// A primary key column whose value the caller supplies.
    pub fn primary_column(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self::new(name, column_type).primary()
    }

    /// A primary key column generated by `strategy`: increment keys are
    /// `integer`, uuid keys are `uuid`.
    pub fn primary_generated_column(name: impl Into<String>, strategy: Generated) -> Self {
        let column_type = match strategy {
            Generated::Increment => ColumnType::Integer,
            Generated::Uuid => ColumnType::Uuid,
        };
        Self::new(name, column_type).primary().generated(strategy)
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn generated(mut self, strategy: Generated) -> Self {
        self.generated = Some(strategy);
        self
    }

    pub fn transformer(mut self, transformer: impl ColumnTransformer + 'static) -> Self {
        self.transformers.push(Arc::new(transformer));
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Override the physical type used for one dialect.
    pub fn physical_type(mut self, dialect: Dialect, sql_type: impl Into<String>) -> Self {
        let sql_type = Some(sql_type.into());
        match dialect {
            Dialect::Sqlite | Dialect::D1 => self.sqlite_type = sql_type,
            Dialect::MySql => self.mysql_type = sql_type,
            Dialect::Postgres => self.postgres_type = sql_type,
        }
        self
    }

    /// The physical type for `dialect`, honoring per-dialect overrides.
    pub fn resolved_type(&self, dialect: Dialect) -> String {
        let override_type = match dialect {
            Dialect::Sqlite | Dialect::D1 => self.sqlite_type.as_deref(),
            Dialect::MySql => self.mysql_type.as_deref(),
            Dialect::Postgres => self.postgres_type.as_deref(),
        };
        override_type
            .unwrap_or_else(|| self.column_type.physical(dialect))
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::ManyToOne => "many-to-one",
            RelationKind::OneToOne => "one-to-one",
            RelationKind::OneToMany => "one-to-many",
            RelationKind::ManyToMany => "many-to-many",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinColumn {
    pub name: Option<String>,
    pub referenced_column: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinTable {
    pub name: Option<String>,
    pub join_column: Option<String>,
    pub inverse_join_column: Option<String>,
}

/// A relation to another entity.
///
/// `target` is resolved lazily so entities may reference each other before
/// both are registered.
#[derive(Debug, Clone)]
pub struct RelationMetadata {
    pub property_name: String,
    pub kind: RelationKind,
    pub target: fn() -> EntityKey,
    pub inverse_side: Option<String>,
    pub join_column: Option<JoinColumn>,
    pub join_table: Option<JoinTable>,
    pub eager: bool,
    pub nullable: Option<bool>,
}

impl RelationMetadata {
    pub fn new(property_name: impl Into<String>, kind: RelationKind, target: fn() -> EntityKey) -> Self {
        Self {
            property_name: property_name.into(),
            kind,
            target,
            inverse_side: None,
            join_column: None,
            join_table: None,
            eager: false,
            nullable: None,
        }
    }

    pub fn many_to_one(property_name: impl Into<String>, target: fn() -> EntityKey) -> Self {
        Self::new(property_name, RelationKind::ManyToOne, target)
    }

    pub fn one_to_one(property_name: impl Into<String>, target: fn() -> EntityKey) -> Self {
        Self::new(property_name, RelationKind::OneToOne, target)
    }

    pub fn one_to_many(property_name: impl Into<String>, target: fn() -> EntityKey) -> Self {
        Self::new(property_name, RelationKind::OneToMany, target)
    }

    pub fn many_to_many(property_name: impl Into<String>, target: fn() -> EntityKey) -> Self {
        Self::new(property_name, RelationKind::ManyToMany, target)
    }

    pub fn inverse_side(mut self, inverse: impl Into<String>) -> Self {
        self.inverse_side = Some(inverse.into());
        self
    }

    pub fn join_column(mut self, name: impl Into<String>) -> Self {
        self.join_column = Some(JoinColumn {
            name: Some(name.into()),
            referenced_column: None,
        });
        self
    }

    pub fn join_table(mut self, join_table: JoinTable) -> Self {
        self.join_table = Some(join_table);
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }
}

/// Partial update applied by [`MetadataRegistry::patch_relation`].
#[derive(Debug, Clone, Default)]
pub struct RelationPatch {
    pub kind: Option<RelationKind>,
    pub target: Option<fn() -> EntityKey>,
    pub inverse_side: Option<String>,
    pub join_column: Option<JoinColumn>,
    pub join_table: Option<JoinTable>,
    pub eager: Option<bool>,
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
    pub relations: Vec<RelationMetadata>,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relation(mut self, relation: RelationMetadata) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn find_relation(&self, property_name: &str) -> Option<&RelationMetadata> {
        self.relations
            .iter()
            .find(|r| r.property_name == property_name)
    }

    pub fn primary_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.primary)
    }

    /// The primary column, or a shape error for identity-based operations.
    pub fn require_primary(&self) -> OrmResult<&ColumnMetadata> {
        self.primary_column().ok_or_else(|| OrmError::NoPrimaryColumn {
            table: self.name.clone(),
        })
    }
}

/// Stable identity of a registered entity: its Rust type.
#[derive(Debug, Clone, Copy)]
pub struct EntityKey {
    type_id: TypeId,
    name: &'static str,
}

impl EntityKey {
    pub fn of<T: 'static>() -> Self {
        let full = std::any::type_name::<T>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self {
            type_id: TypeId::of::<T>(),
            name,
        }
    }

    /// The bare type name, e.g. `User` for `my_app::entities::User`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Table name used when an entity is registered without one.
    pub fn default_table_name(&self) -> String {
        self.name.to_lowercase()
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

/// A Rust type mapped onto a table.
///
/// # Example
///
/// ```ignore
/// impl Entity for User {
///     fn table() -> TableMetadata {
///         TableMetadata::new("users")
///             .column(ColumnMetadata::primary_generated_column("id", Generated::Increment))
///             .column(ColumnMetadata::new("name", ColumnType::Text))
///     }
///     fn from_record(mut record: Record) -> OrmResult<Self> {
///         Ok(User { id: record.take_as("id")?, name: record.take_as("name")? })
///     }
///     fn to_record(&self) -> Record {
///         Record::new().with("id", self.id).with("name", &self.name)
///     }
/// }
/// ```
pub trait Entity: Sized + Send + Sync + 'static {
    fn table() -> TableMetadata;
    fn from_record(record: Record) -> OrmResult<Self>;
    fn to_record(&self) -> Record;

    fn key() -> EntityKey {
        EntityKey::of::<Self>()
    }
}

/// Registry of entity → table descriptors.
///
/// Injected rather than global, so each data source (and each test) owns its
/// own. Registration is additive: columns and relations declared separately
/// for the same entity land in the same table entry.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    tables: DashMap<EntityKey, Arc<TableMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an [`Entity`] using its own table declaration.
    pub fn register<T: Entity>(&self) -> OrmResult<()> {
        let table = T::table();
        if !crate::query::is_valid_identifier(&table.name, false) {
            return Err(OrmError::InvalidIdentifier {
                kind: "table",
                ident: table.name,
            });
        }
        self.add_table(T::key(), table);
        Ok(())
    }

    /// Register (or replace) the descriptor for `entity`.
    pub fn add_table(&self, entity: EntityKey, metadata: TableMetadata) {
        self.tables.insert(entity, Arc::new(metadata));
    }

    pub fn get_table(&self, entity: &EntityKey) -> Option<Arc<TableMetadata>> {
        self.tables.get(entity).map(|t| Arc::clone(t.value()))
    }

    pub fn has_table(&self, entity: &EntityKey) -> bool {
        self.tables.contains_key(entity)
    }

    /// Like [`get_table`](Self::get_table) but turns a miss into a registration error.
    pub fn require_table(&self, entity: &EntityKey) -> OrmResult<Arc<TableMetadata>> {
        self.get_table(entity)
            .ok_or_else(|| OrmError::EntityNotRegistered {
                entity: entity.name().to_string(),
            })
    }

    pub fn add_column(&self, entity: EntityKey, column: ColumnMetadata) {
        self.with_table(entity, |table| table.columns.push(column));
    }

    /// Insert a relation, merging into an existing one with the same property name.
    pub fn upsert_relation(&self, entity: EntityKey, relation: RelationMetadata) {
        self.with_table(entity, |table| {
            match table
                .relations
                .iter_mut()
                .find(|r| r.property_name == relation.property_name)
            {
                Some(existing) => *existing = relation,
                None => table.relations.push(relation),
            }
        });
    }

    /// Patch a relation in place, or add a many-to-one placeholder carrying the patch.
    pub fn patch_relation(&self, entity: EntityKey, property_name: &str, patch: RelationPatch) {
        self.with_table(entity, |table| {
            let index = match table
                .relations
                .iter()
                .position(|r| r.property_name == property_name)
            {
                Some(index) => index,
                None => {
                    table.relations.push(RelationMetadata::many_to_one(
                        property_name,
                        EntityKey::of::<()>,
                    ));
                    table.relations.len() - 1
                }
            };
            let relation = &mut table.relations[index];
            if let Some(kind) = patch.kind {
                relation.kind = kind;
            }
            if let Some(target) = patch.target {
                relation.target = target;
            }
            if patch.inverse_side.is_some() {
                relation.inverse_side = patch.inverse_side;
            }
            if patch.join_column.is_some() {
                relation.join_column = patch.join_column;
            }
            if patch.join_table.is_some() {
                relation.join_table = patch.join_table;
            }
            if let Some(eager) = patch.eager {
                relation.eager = eager;
            }
            if patch.nullable.is_some() {
                relation.nullable = patch.nullable;
            }
        });
    }

    /// Every registered table, in no particular order.
    pub fn tables(&self) -> Vec<Arc<TableMetadata>> {
        self.tables.iter().map(|t| Arc::clone(t.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&self) {
        self.tables.clear();
    }

    fn with_table(&self, entity: EntityKey, f: impl FnOnce(&mut TableMetadata)) {
        let mut entry = self
            .tables
            .entry(entity)
            .or_insert_with(|| Arc::new(TableMetadata::new(entity.default_table_name())));
        f(Arc::make_mut(entry.value_mut()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Profile;
    struct Account;

    #[test]
    fn test_get_table_missing_is_none() {
        let registry = MetadataRegistry::new();
        assert!(registry.get_table(&EntityKey::of::<Profile>()).is_none());
        assert!(!registry.has_table(&EntityKey::of::<Profile>()));
        let err = registry
            .require_table(&EntityKey::of::<Profile>())
            .unwrap_err();
        assert!(matches!(err, OrmError::EntityNotRegistered { ref entity } if entity == "Profile"));
    }

    #[test]
    fn test_add_column_creates_table_with_lowercase_name() {
        let registry = MetadataRegistry::new();
        let key = EntityKey::of::<Account>();
        registry.add_column(key, ColumnMetadata::primary_column("id", ColumnType::Integer));
        registry.add_column(key, ColumnMetadata::new("email", ColumnType::String));

        let table = registry.get_table(&key).unwrap();
        assert_eq!(table.name, "account");
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.primary_column().unwrap().name, "id");
    }

    #[test]
    fn test_add_table_replaces_same_identity() {
        let registry = MetadataRegistry::new();
        let key = EntityKey::of::<Account>();
        registry.add_table(key, TableMetadata::new("accounts"));
        registry.add_table(key, TableMetadata::new("accounts_v2"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_table(&key).unwrap().name, "accounts_v2");
    }

    #[test]
    fn test_upsert_relation_merges_by_property() {
        let registry = MetadataRegistry::new();
        let key = EntityKey::of::<Account>();
        registry.upsert_relation(key, RelationMetadata::many_to_one("profile", EntityKey::of::<Profile>));
        registry.upsert_relation(
            key,
            RelationMetadata::many_to_one("profile", EntityKey::of::<Profile>).join_column("profile_id"),
        );

        let table = registry.get_table(&key).unwrap();
        assert_eq!(table.relations.len(), 1);
        let relation = table.find_relation("profile").unwrap();
        assert_eq!(relation.kind, RelationKind::ManyToOne);
        assert_eq!(
            relation.join_column.as_ref().and_then(|j| j.name.as_deref()),
            Some("profile_id")
        );
        assert_eq!((relation.target)().name(), "Profile");
    }

    #[test]
    fn test_patch_relation_adds_placeholder() {
        let registry = MetadataRegistry::new();
        let key = EntityKey::of::<Account>();
        registry.patch_relation(
            key,
            "roles",
            RelationPatch {
                kind: Some(RelationKind::ManyToMany),
                target: Some(EntityKey::of::<Profile>),
                join_table: Some(JoinTable {
                    name: Some("user_roles".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let table = registry.get_table(&key).unwrap();
        let relation = table.find_relation("roles").unwrap();
        assert_eq!(relation.kind, RelationKind::ManyToMany);
        assert_eq!(
            relation.join_table.as_ref().and_then(|j| j.name.as_deref()),
            Some("user_roles")
        );
    }

    #[test]
    fn test_require_primary_fails_without_primary() {
        let table = TableMetadata::new("logs").column(ColumnMetadata::new("line", ColumnType::Text));
        assert!(matches!(
            table.require_primary(),
            Err(OrmError::NoPrimaryColumn { .. })
        ));
    }

    #[test]
    fn test_resolved_type_honors_override() {
        let column = ColumnMetadata::new("payload", ColumnType::Json)
            .physical_type(Dialect::MySql, "LONGTEXT");
        assert_eq!(column.resolved_type(Dialect::MySql), "LONGTEXT");
        assert_eq!(column.resolved_type(Dialect::Sqlite), "TEXT");
        assert_eq!(column.resolved_type(Dialect::Postgres), "JSONB");
    }
}
