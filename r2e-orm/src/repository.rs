//! Typed CRUD and pagination over one registered entity.
//!
//! # Example
//!
//! ```ignore
//! let users = data_source.get_repository::<User>()?;
//! let saved = users.save(&User::new("John", "john@x.com")).await?;
//! let page = users.find_page(Pageable::new(1, 20), None).await?;
//! ```

use crate::dialect::{Dialect, UpsertSpec};
use crate::driver::{Driver, RunResult, Statement};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{Entity, Generated, MetadataRegistry, RelationKind, RelationMetadata, TableMetadata};
use crate::operator::{and, eq, gt, Condition, Operator};
use crate::page::{CursorPage, CursorPageOptions, Page, Pageable};
use crate::query::{prepare_insert_row, BatchUpdate, Direction, QueryBuilder};
use crate::transform::to_storage;
use crate::value::{Record, Value};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Options for [`Repository::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Option<Condition>,
    pub order: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Relation property names to join and select.
    pub relations: Vec<String>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: impl Into<Condition>) -> Self {
        self.filter = Some(condition.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn relation(mut self, property: impl Into<String>) -> Self {
        self.relations.push(property.into());
        self
    }
}

pub struct Repository<T> {
    driver: Arc<dyn Driver>,
    registry: Arc<MetadataRegistry>,
    table: Arc<TableMetadata>,
    dialect: Dialect,
    logging: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    /// Fails immediately when `T` was never registered.
    pub fn new(
        driver: Arc<dyn Driver>,
        registry: Arc<MetadataRegistry>,
        dialect: Dialect,
    ) -> OrmResult<Self> {
        let table = registry.require_table(&T::key())?;
        Ok(Self {
            driver,
            registry,
            table,
            dialect,
            logging: true,
            _marker: PhantomData,
        })
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    pub fn table(&self) -> &TableMetadata {
        &self.table
    }

    /// A query builder pre-configured for this entity's table.
    pub fn create_query_builder(&self) -> QueryBuilder<T> {
        QueryBuilder::new(Arc::clone(&self.driver), Arc::clone(&self.table), self.dialect)
            .with_logging(self.logging)
    }

    pub async fn find(&self, options: FindOptions) -> OrmResult<Vec<T>> {
        self.find_query(options)?.execute().await
    }

    pub async fn find_one(&self, id: impl Into<Value>) -> OrmResult<Option<T>> {
        let primary = self.table.require_primary()?;
        self.create_query_builder()
            .filter(eq(primary.name.clone(), id))
            .get_one()
            .await
    }

    /// Insert `entity` and return it as stored, with generated keys filled in.
    pub async fn save(&self, entity: &T) -> OrmResult<T> {
        let (mut rows, results) = self
            .create_query_builder()
            .insert_rows(vec![entity.to_record()])
            .await?;
        let mut row = rows.pop().unwrap_or_default();
        if let Some(primary) = self.table.primary_column() {
            let missing = row.get(&primary.name).map_or(true, Value::is_null);
            let inserted_id = results.first().and_then(|r| r.last_insert_id);
            if missing && primary.generated == Some(Generated::Increment) {
                if let Some(id) = inserted_id {
                    row.set(primary.name.clone(), id);
                }
            }
        }
        T::from_record(row)
    }

    pub async fn update(&self, id: impl Into<Value>, values: Record) -> OrmResult<RunResult> {
        let primary = self.table.require_primary()?;
        if values.is_empty() {
            return Ok(RunResult::default());
        }
        let mut results = self
            .create_query_builder()
            .batch_update(vec![BatchUpdate {
                criteria: Record::new().with(primary.name.clone(), id),
                values,
            }])
            .await?;
        Ok(results.pop().unwrap_or_default())
    }

    pub async fn remove(&self, id: impl Into<Value>) -> OrmResult<RunResult> {
        let primary = self.table.require_primary()?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table.name,
            primary.name,
            self.dialect.placeholder(1)
        );
        let param = to_storage(Some(primary), id.into());
        let statement = Statement::prepare(sql).bind([param]);
        if self.logging {
            tracing::debug!(sql = %statement.sql, "executing delete");
        }
        self.driver.run(&statement).await
    }

    /// Insert, or update every non-primary column when the primary key exists.
    pub async fn upsert(&self, entity: &T) -> OrmResult<T> {
        let primary = self.table.require_primary()?;
        let row = prepare_insert_row(&self.table, entity.to_record());
        let columns: Vec<&str> = row.columns().collect();
        for column in &columns {
            if self.table.find_column(column).is_none() {
                return Err(OrmError::unknown_column(&self.table.name, column));
            }
        }
        let sql = self.dialect.build_upsert(&UpsertSpec {
            table: &self.table.name,
            columns: &columns,
            primary_column: &primary.name,
        });
        let params = row
            .iter()
            .map(|(column, value)| to_storage(self.table.find_column(column), value.clone()));
        let statement = Statement::prepare(sql).bind(params);
        if self.logging {
            tracing::debug!(sql = %statement.sql, params = statement.params.len(), "executing upsert");
        }
        self.driver.run(&statement).await?;
        T::from_record(row)
    }

    pub async fn count(&self, filter: Option<Condition>) -> OrmResult<u64> {
        let mut builder = self.create_query_builder();
        if let Some(filter) = filter {
            builder = builder.filter(filter);
        }
        Ok(builder.count("*").await?.max(0) as u64)
    }

    pub async fn exists(&self, filter: Option<Condition>) -> OrmResult<bool> {
        Ok(self.count(filter).await? > 0)
    }

    /// Rows for `options` plus the total matching its filter, from a separate `COUNT`.
    pub async fn find_and_count(&self, options: FindOptions) -> OrmResult<(Vec<T>, u64)> {
        let filter = options.filter.clone();
        let rows = self.find(options).await?;
        let total = self.count(filter).await?;
        Ok((rows, total))
    }

    pub async fn find_page(&self, pageable: Pageable, filter: Option<Condition>) -> OrmResult<Page<T>> {
        let pageable = pageable.clamped();
        let mut options = FindOptions::new()
            .limit(pageable.size)
            .offset(pageable.offset());
        options.filter = filter;
        let (data, total) = self.find_and_count(options).await?;
        Ok(Page::new(data, &pageable, total))
    }

    /// Keyset pagination: fetches one extra row to detect a next page.
    pub async fn find_cursor_page(&self, options: CursorPageOptions) -> OrmResult<CursorPage<T>> {
        let size = options.size.max(1);
        let order_by = match options.order_by {
            Some(column) => column,
            None => self.table.require_primary()?.name.clone(),
        };

        let mut conditions: Vec<Operator> = options
            .filter
            .into_iter()
            .flatten()
            .map(|(column, value)| eq(column, value))
            .collect();
        if let Some(cursor) = options.cursor {
            conditions.push(gt(order_by.clone(), cursor));
        }

        let mut builder = self
            .create_query_builder()
            .order_by(order_by.clone(), Direction::Asc)
            .limit(size.saturating_add(1));
        if !conditions.is_empty() {
            builder = builder.filter(and(conditions));
        }

        let mut rows = builder.execute_raw().await?;
        let has_next = rows.len() as u64 > size;
        rows.truncate(size as usize);
        let next_cursor = if has_next {
            rows.last().and_then(|row| row.get(&order_by).cloned())
        } else {
            None
        };
        let data = rows
            .into_iter()
            .map(T::from_record)
            .collect::<OrmResult<Vec<T>>>()?;
        Ok(CursorPage {
            data,
            next_cursor,
            has_next,
        })
    }

    pub(crate) fn find_query(&self, options: FindOptions) -> OrmResult<QueryBuilder<T>> {
        let mut builder = self.create_query_builder();
        if !options.relations.is_empty() {
            builder = builder.alias(self.table.name.clone());
            for property in &options.relations {
                builder = self.join_relation(builder, property)?;
            }
        }
        if let Some(filter) = options.filter {
            builder = builder.filter(filter);
        }
        for (column, direction) in options.order {
            builder = builder.order_by(column, direction);
        }
        if let Some(limit) = options.limit {
            builder = builder.limit(limit);
        }
        if let Some(offset) = options.offset {
            builder = builder.offset(offset);
        }
        Ok(builder)
    }

    fn join_relation(&self, builder: QueryBuilder<T>, property: &str) -> OrmResult<QueryBuilder<T>> {
        let relation = self
            .table
            .find_relation(property)
            .ok_or_else(|| OrmError::unknown_column(&self.table.name, property))?;
        let target = self.registry.require_table(&(relation.target)())?;
        let root = &self.table.name;
        let alias = &relation.property_name;

        let builder = match relation.kind {
            RelationKind::ManyToOne | RelationKind::OneToOne => {
                let foreign_key = join_column_name(relation);
                let referenced = match relation
                    .join_column
                    .as_ref()
                    .and_then(|j| j.referenced_column.clone())
                {
                    Some(column) => column,
                    None => target.require_primary()?.name.clone(),
                };
                builder.left_join_and_select(
                    &target.name,
                    alias,
                    &format!("{root}.{foreign_key} = {alias}.{referenced}"),
                )
            }
            RelationKind::OneToMany => {
                let primary = &self.table.require_primary()?.name;
                let inverse = relation.inverse_side.clone().unwrap_or_else(|| root.clone());
                builder.left_join_and_select(
                    &target.name,
                    alias,
                    &format!("{alias}.{inverse}Id = {root}.{primary}"),
                )
            }
            RelationKind::ManyToMany => {
                let primary = &self.table.require_primary()?.name;
                let target_primary = &target.require_primary()?.name;
                let join_table = relation.join_table.clone().unwrap_or_default();
                let junction = join_table
                    .name
                    .unwrap_or_else(|| format!("{root}_{}_{alias}", target.name));
                let junction_alias = format!("{alias}_junction");
                let owner_column = join_table
                    .join_column
                    .unwrap_or_else(|| format!("{root}Id"));
                let inverse_column = join_table
                    .inverse_join_column
                    .unwrap_or_else(|| format!("{}Id", target.name));
                builder
                    .left_join(
                        &junction,
                        &junction_alias,
                        &format!("{junction_alias}.{owner_column} = {root}.{primary}"),
                    )
                    .left_join_and_select(
                        &target.name,
                        alias,
                        &format!("{alias}.{target_primary} = {junction_alias}.{inverse_column}"),
                    )
            }
        };
        Ok(builder)
    }
}

/// Per-owner repository instances, keyed by entity type.
///
/// Two callers racing on the same entity may both construct a repository;
/// the first one stored wins and the other is dropped.
#[derive(Default)]
pub(crate) struct RepositoryCache {
    repositories: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl RepositoryCache {
    pub(crate) fn get_or_create<T: Entity>(
        &self,
        create: impl FnOnce() -> OrmResult<Repository<T>>,
    ) -> OrmResult<Arc<Repository<T>>> {
        let key = TypeId::of::<T>();
        if let Some(cached) = self.get::<T>(&key) {
            return Ok(cached);
        }
        let created: Arc<dyn Any + Send + Sync> = Arc::new(create()?);
        let stored = Arc::clone(self.repositories.entry(key).or_insert(created).value());
        stored
            .downcast::<Repository<T>>()
            .map_err(|_| OrmError::mapping("repository cache type mismatch"))
    }

    fn get<T: Entity>(&self, key: &TypeId) -> Option<Arc<Repository<T>>> {
        let entry = self.repositories.get(key)?;
        Arc::clone(entry.value()).downcast::<Repository<T>>().ok()
    }
}

fn join_column_name(relation: &RelationMetadata) -> String {
    relation
        .join_column
        .as_ref()
        .and_then(|j| j.name.clone())
        .unwrap_or_else(|| format!("{}Id", relation.property_name))
}
