//! Fluent query builder and the compiler that renders it to dialect SQL.
//!
//! # Example
//!
//! ```ignore
//! let users = repo
//!     .create_query_builder()
//!     .filter(and(vec![eq("status", "active"), gt("age", 18)]))
//!     .order_by("id", Direction::Asc)
//!     .limit(10)
//!     .execute()
//!     .await?;
//! // SELECT * FROM users WHERE (status = ? AND age > ?) ORDER BY id ASC LIMIT 10
//! ```

use crate::dialect::Dialect;
use crate::driver::{Driver, RunResult, Statement};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{ColumnMetadata, Entity, Generated, TableMetadata};
use crate::operator::{Comparison, Condition, Operator};
use crate::transform::{record_from_storage, to_storage};
use crate::value::{Record, Value};
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Join {
    kind: JoinKind,
    table: String,
    alias: String,
    on: String,
}

/// Accumulated builder state, compiled once per execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    select: Vec<String>,
    filter: Option<Condition>,
    joins: Vec<Join>,
    group_by: Vec<String>,
    having: Option<Condition>,
    order: Vec<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

/// SQL text plus its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl CompiledQuery {
    pub fn into_statement(self) -> Statement {
        Statement::prepare(self.sql).bind(self.params)
    }
}

/// One row of a [`QueryBuilder::batch_update`]: `values` are set on rows matching `criteria`.
#[derive(Debug, Clone)]
pub struct BatchUpdate {
    pub criteria: Record,
    pub values: Record,
}

pub struct QueryBuilder<T = Record> {
    driver: Arc<dyn Driver>,
    table: Arc<TableMetadata>,
    dialect: Dialect,
    alias: Option<String>,
    state: QueryState,
    logging: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for QueryBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            table: Arc::clone(&self.table),
            dialect: self.dialect,
            alias: self.alias.clone(),
            state: self.state.clone(),
            logging: self.logging,
            _marker: PhantomData,
        }
    }
}

impl<T> QueryBuilder<T> {
    pub fn new(driver: Arc<dyn Driver>, table: Arc<TableMetadata>, dialect: Dialect) -> Self {
        Self {
            driver,
            table,
            dialect,
            alias: None,
            state: QueryState::default(),
            logging: true,
            _marker: PhantomData,
        }
    }

    /// Toggle debug logging of compiled statements.
    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Alias the root table; unqualified columns are then rendered as `alias.column`.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn table(&self) -> &TableMetadata {
        &self.table
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// Replace the select list. Entries are raw expressions.
    pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.state.select = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.state.select.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Set the `WHERE` condition, replacing any previous one.
    pub fn filter(mut self, condition: impl Into<Condition>) -> Self {
        self.state.filter = Some(condition.into());
        self
    }

    pub fn group_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.state.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn having(mut self, condition: impl Into<Condition>) -> Self {
        self.state.having = Some(condition.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.state.order.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.state.offset = Some(offset);
        self
    }

    fn join(mut self, kind: JoinKind, table: &str, alias: &str, on: &str) -> Self {
        self.state.joins.push(Join {
            kind,
            table: table.to_string(),
            alias: alias.to_string(),
            on: on.to_string(),
        });
        self
    }

    pub fn inner_join(self, table: &str, alias: &str, on: &str) -> Self {
        self.join(JoinKind::Inner, table, alias, on)
    }

    pub fn left_join(self, table: &str, alias: &str, on: &str) -> Self {
        self.join(JoinKind::Left, table, alias, on)
    }

    pub fn right_join(self, table: &str, alias: &str, on: &str) -> Self {
        self.join(JoinKind::Right, table, alias, on)
    }

    pub fn inner_join_and_select(self, table: &str, alias: &str, on: &str) -> Self {
        self.select_joined(alias).inner_join(table, alias, on)
    }

    pub fn left_join_and_select(self, table: &str, alias: &str, on: &str) -> Self {
        self.select_joined(alias).left_join(table, alias, on)
    }

    pub fn right_join_and_select(self, table: &str, alias: &str, on: &str) -> Self {
        self.select_joined(alias).right_join(table, alias, on)
    }

    // Keeps the root table's columns when the first joined table is selected.
    fn select_joined(mut self, alias: &str) -> Self {
        if self.state.select.is_empty() {
            let root = self.alias.clone().unwrap_or_else(|| self.table.name.clone());
            self.state.select.push(format!("{root}.*"));
        }
        self.state.select.push(format!("{alias}.*"));
        self
    }

    /// Compile the accumulated state into a `SELECT`.
    pub fn build_select(&self) -> OrmResult<CompiledQuery> {
        let mut compiler = self.compiler();
        let columns = if self.state.select.is_empty() {
            "*".to_string()
        } else {
            self.state.select.join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {}", self.table_ref());
        self.append_joins(&mut sql)?;
        if let Some(filter) = &self.state.filter {
            let clause = compiler.condition(filter, false)?;
            sql.push_str(&format!(" WHERE {clause}"));
        }
        if !self.state.group_by.is_empty() {
            let mut columns = Vec::with_capacity(self.state.group_by.len());
            for column in &self.state.group_by {
                columns.push(compiler.resolve(column, true)?.0);
            }
            sql.push_str(&format!(" GROUP BY {}", columns.join(", ")));
        }
        if let Some(having) = &self.state.having {
            let clause = compiler.condition(having, true)?;
            sql.push_str(&format!(" HAVING {clause}"));
        }
        if !self.state.order.is_empty() {
            let mut clauses = Vec::with_capacity(self.state.order.len());
            for (column, direction) in &self.state.order {
                let (column, _) = compiler.resolve(column, true)?;
                clauses.push(format!("{column} {}", direction.as_sql()));
            }
            sql.push_str(&format!(" ORDER BY {}", clauses.join(", ")));
        }
        append_limit_offset(&mut sql, self.state.limit, self.state.offset);
        Ok(CompiledQuery {
            sql,
            params: compiler.params,
        })
    }

    /// Compile a single-row aggregate over the current `WHERE`.
    pub fn build_aggregate(&self, expr: &str, alias: &str) -> OrmResult<CompiledQuery> {
        let mut compiler = self.compiler();
        let mut sql = format!("SELECT {expr} AS {alias} FROM {}", self.table_ref());
        if let Some(filter) = &self.state.filter {
            let clause = compiler.condition(filter, false)?;
            sql.push_str(&format!(" WHERE {clause}"));
        }
        Ok(CompiledQuery {
            sql,
            params: compiler.params,
        })
    }

    pub fn build_count(&self) -> OrmResult<CompiledQuery> {
        self.build_aggregate("COUNT(*)", "count")
    }

    /// Run the query and return rows with storage values converted back.
    pub async fn execute_raw(&self) -> OrmResult<Vec<Record>> {
        let compiled = self.build_select()?;
        self.fetch(compiled.into_statement()).await
    }

    /// Run arbitrary SQL through the driver, converting declared columns on the way back.
    pub async fn raw(&self, sql: &str, params: Vec<Value>) -> OrmResult<Vec<Record>> {
        self.fetch(Statement::prepare(sql).bind(params)).await
    }

    pub async fn count(&self, column: &str) -> OrmResult<i64> {
        aggregate_target(column)?;
        let compiled = self.build_aggregate(&format!("COUNT({column})"), "count")?;
        let value = self.scalar(compiled, "count").await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    pub async fn sum(&self, column: &str) -> OrmResult<f64> {
        self.numeric_aggregate("SUM", column).await
    }

    pub async fn avg(&self, column: &str) -> OrmResult<f64> {
        self.numeric_aggregate("AVG", column).await
    }

    pub async fn max(&self, column: &str) -> OrmResult<f64> {
        self.numeric_aggregate("MAX", column).await
    }

    pub async fn min(&self, column: &str) -> OrmResult<f64> {
        self.numeric_aggregate("MIN", column).await
    }

    /// Insert rows, one statement each, with the columns each row carries.
    ///
    /// Uses the driver's batch submission when it has one; otherwise the
    /// statements run sequentially in the given order and a failure leaves
    /// earlier rows inserted.
    pub async fn batch_insert(&self, rows: Vec<Record>) -> OrmResult<Vec<RunResult>> {
        let (_, results) = self.insert_rows(rows).await?;
        Ok(results)
    }

    pub(crate) async fn insert_rows(
        &self,
        rows: Vec<Record>,
    ) -> OrmResult<(Vec<Record>, Vec<RunResult>)> {
        if rows.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let rows: Vec<Record> = rows.into_iter().map(|r| prepare_insert_row(&self.table, r)).collect();
        for row in &rows {
            for column in row.columns() {
                self.declared(column)?;
            }
        }
        let statements: Vec<Statement> = rows.iter().map(|row| self.insert_statement(row)).collect();
        let results = self.submit(&statements).await?;
        Ok((rows, results))
    }

    // Each row inserts exactly the columns it carries.
    fn insert_statement(&self, row: &Record) -> Statement {
        if row.is_empty() {
            return Statement::prepare(self.dialect.insert_defaults(&self.table.name));
        }
        let columns: Vec<&str> = row.columns().collect();
        let placeholders: Vec<String> = (1..=columns.len())
            .map(|i| self.dialect.placeholder(i))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table.name,
            columns.join(", "),
            placeholders.join(", ")
        );
        let params = row
            .iter()
            .map(|(column, value)| to_storage(self.table.find_column(column), value.clone()));
        Statement::prepare(sql).bind(params)
    }

    /// Apply several updates, each `UPDATE ... SET ... WHERE` on its own criteria.
    pub async fn batch_update(&self, items: Vec<BatchUpdate>) -> OrmResult<Vec<RunResult>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let mut statements = Vec::with_capacity(items.len());
        for item in items {
            let mut index = 0usize;
            let mut params = Vec::with_capacity(item.values.len() + item.criteria.len());
            let mut sets = Vec::with_capacity(item.values.len());
            for (column, value) in item.values.iter() {
                let meta = self.declared(column)?;
                index += 1;
                sets.push(format!("{column} = {}", self.dialect.placeholder(index)));
                params.push(to_storage(Some(meta), value.clone()));
            }
            let mut filters = Vec::with_capacity(item.criteria.len());
            for (column, value) in item.criteria.iter() {
                let meta = self.declared(column)?;
                index += 1;
                filters.push(format!("{column} = {}", self.dialect.placeholder(index)));
                params.push(to_storage(Some(meta), value.clone()));
            }
            let mut sql = format!("UPDATE {} SET {}", self.table.name, sets.join(", "));
            if !filters.is_empty() {
                sql.push_str(&format!(" WHERE {}", filters.join(" AND ")));
            }
            statements.push(Statement::prepare(sql).bind(params));
        }
        self.submit(&statements).await
    }

    async fn submit(&self, statements: &[Statement]) -> OrmResult<Vec<RunResult>> {
        for statement in statements {
            self.log(statement, "executing statement");
        }
        if self.driver.supports_batch() {
            return self.driver.batch(statements).await;
        }
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.driver.run(statement).await?);
        }
        Ok(results)
    }

    async fn fetch(&self, statement: Statement) -> OrmResult<Vec<Record>> {
        self.log(&statement, "executing query");
        let rows = self.driver.all(&statement).await?.into_rows();
        Ok(rows
            .into_iter()
            .map(|row| record_from_storage(&self.table.columns, row))
            .collect())
    }

    async fn scalar(&self, compiled: CompiledQuery, field: &str) -> OrmResult<Value> {
        let statement = compiled.into_statement();
        self.log(&statement, "executing aggregate");
        let row = self.driver.first(&statement).await?;
        Ok(row
            .and_then(|mut r| r.remove(field))
            .unwrap_or(Value::Null))
    }

    async fn numeric_aggregate(&self, function: &str, column: &str) -> OrmResult<f64> {
        aggregate_target(column)?;
        let compiled = self.build_aggregate(&format!("{function}({column})"), "value")?;
        let value = self.scalar(compiled, "value").await?;
        Ok(value.as_f64().unwrap_or(0.0))
    }

    fn log(&self, statement: &Statement, message: &str) {
        if self.logging {
            tracing::debug!(sql = %statement.sql, params = statement.params.len(), "{message}");
        }
    }

    fn declared(&self, column: &str) -> OrmResult<&ColumnMetadata> {
        self.table
            .find_column(column)
            .ok_or_else(|| OrmError::unknown_column(&self.table.name, column))
    }

    fn table_ref(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} {alias}", self.table.name),
            None => self.table.name.clone(),
        }
    }

    fn append_joins(&self, sql: &mut String) -> OrmResult<()> {
        for join in &self.state.joins {
            if !is_valid_identifier(&join.table, false) {
                return Err(OrmError::InvalidIdentifier {
                    kind: "table",
                    ident: join.table.clone(),
                });
            }
            if !is_valid_identifier(&join.alias, false) {
                return Err(OrmError::InvalidIdentifier {
                    kind: "alias",
                    ident: join.alias.clone(),
                });
            }
            sql.push_str(&format!(
                " {} JOIN {} {} ON {}",
                join.kind.as_sql(),
                join.table,
                join.alias,
                join.on
            ));
        }
        Ok(())
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler {
            table: &self.table,
            alias: self.alias.as_deref(),
            dialect: self.dialect,
            select_aliases: self.state.select.iter().filter_map(|s| select_alias(s)).collect(),
            params: Vec::new(),
        }
    }
}

impl<T: Entity> QueryBuilder<T> {
    /// Run the query and map every row onto `T`.
    pub async fn execute(&self) -> OrmResult<Vec<T>> {
        self.execute_raw()
            .await?
            .into_iter()
            .map(T::from_record)
            .collect()
    }

    /// First row, with `LIMIT 1` applied.
    pub async fn get_one(&self) -> OrmResult<Option<T>> {
        let rows = self.clone().limit(1).execute().await?;
        Ok(rows.into_iter().next())
    }
}

fn aggregate_target(column: &str) -> OrmResult<()> {
    if is_valid_identifier(column, true) {
        Ok(())
    } else {
        Err(OrmError::InvalidIdentifier {
            kind: "column",
            ident: column.to_string(),
        })
    }
}

/// Walks conditions and collects bound parameters in visit order.
struct Compiler<'a> {
    table: &'a TableMetadata,
    alias: Option<&'a str>,
    dialect: Dialect,
    select_aliases: Vec<String>,
    params: Vec<Value>,
}

impl<'a> Compiler<'a> {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    /// Resolve a column reference to its rendered form and, when it belongs to
    /// the root table, its metadata. References qualified by another alias are
    /// passed through unchecked.
    fn resolve(&self, column: &str, allow_select_alias: bool) -> OrmResult<(String, Option<&'a ColumnMetadata>)> {
        if !is_valid_identifier(column, false) {
            return Err(OrmError::InvalidIdentifier {
                kind: "column",
                ident: column.to_string(),
            });
        }
        if let Some((qualifier, plain)) = column.split_once('.') {
            let own = self.alias.unwrap_or(&self.table.name);
            if qualifier != own && qualifier != self.table.name {
                return Ok((column.to_string(), None));
            }
            let meta = self
                .table
                .find_column(plain)
                .ok_or_else(|| OrmError::unknown_column(&self.table.name, plain))?;
            return Ok((column.to_string(), Some(meta)));
        }
        if let Some(meta) = self.table.find_column(column) {
            let rendered = match self.alias {
                Some(alias) => format!("{alias}.{column}"),
                None => column.to_string(),
            };
            return Ok((rendered, Some(meta)));
        }
        if allow_select_alias && self.select_aliases.iter().any(|a| a == column) {
            return Ok((column.to_string(), None));
        }
        Err(OrmError::unknown_column(&self.table.name, column))
    }

    fn condition(&mut self, condition: &Condition, allow_select_alias: bool) -> OrmResult<String> {
        match condition {
            Condition::Match(record) => {
                let mut parts = Vec::with_capacity(record.len());
                for (column, value) in record.iter() {
                    let (rendered, meta) = self.resolve(column, allow_select_alias)?;
                    let placeholder = self.bind(to_storage(meta, value.clone()));
                    parts.push(format!("{rendered} = {placeholder}"));
                }
                if parts.is_empty() {
                    return Ok("1 = 1".to_string());
                }
                Ok(parts.join(" AND "))
            }
            Condition::Expr(op) => self.operator(op, allow_select_alias),
        }
    }

    fn operator(&mut self, op: &Operator, allow_select_alias: bool) -> OrmResult<String> {
        match op {
            Operator::Compare { op, column, value } => {
                let (rendered, meta) = self.resolve(column, allow_select_alias)?;
                let placeholder = self.bind(to_storage(meta, value.clone()));
                let symbol = match op {
                    Comparison::ILike => self.dialect.ilike_keyword(),
                    other => other.symbol(),
                };
                Ok(format!("{rendered} {symbol} {placeholder}"))
            }
            Operator::In { column, values } => {
                let (rendered, meta) = self.resolve(column, allow_select_alias)?;
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| self.bind(to_storage(meta, v.clone())))
                    .collect();
                Ok(format!("{rendered} IN ({})", placeholders.join(", ")))
            }
            Operator::Between { column, min, max } => {
                let (rendered, meta) = self.resolve(column, allow_select_alias)?;
                let low = self.bind(to_storage(meta, min.clone()));
                let high = self.bind(to_storage(meta, max.clone()));
                Ok(format!("{rendered} BETWEEN {low} AND {high}"))
            }
            Operator::IsNull { column } => {
                let (rendered, _) = self.resolve(column, allow_select_alias)?;
                Ok(format!("{rendered} IS NULL"))
            }
            Operator::IsNotNull { column } => {
                let (rendered, _) = self.resolve(column, allow_select_alias)?;
                Ok(format!("{rendered} IS NOT NULL"))
            }
            Operator::And(children) => self.combine(children, " AND ", "1 = 1", allow_select_alias),
            Operator::Or(children) => self.combine(children, " OR ", "1 = 0", allow_select_alias),
            Operator::Not(child) => {
                let inner = self.operator(child, allow_select_alias)?;
                match child.as_ref() {
                    Operator::And(c) | Operator::Or(c) if !c.is_empty() => Ok(format!("NOT {inner}")),
                    _ => Ok(format!("NOT ({inner})")),
                }
            }
        }
    }

    fn combine(
        &mut self,
        children: &[Operator],
        keyword: &str,
        empty: &str,
        allow_select_alias: bool,
    ) -> OrmResult<String> {
        if children.is_empty() {
            return Ok(empty.to_string());
        }
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            parts.push(self.operator(child, allow_select_alias)?);
        }
        Ok(format!("({})", parts.join(keyword)))
    }
}

/// Fill generated primary values before an insert: uuid columns get a fresh
/// v4 id when absent, increment columns are dropped when null so the engine
/// assigns them.
pub(crate) fn prepare_insert_row(table: &TableMetadata, mut row: Record) -> Record {
    for column in &table.columns {
        match column.generated {
            Some(Generated::Uuid) => {
                if row.get(&column.name).map_or(true, Value::is_null) {
                    row.set(column.name.clone(), uuid::Uuid::new_v4().to_string());
                }
            }
            Some(Generated::Increment) => {
                if row.get(&column.name).is_some_and(Value::is_null) {
                    row.remove(&column.name);
                }
            }
            None => {}
        }
    }
    row
}

fn append_limit_offset(sql: &mut String, limit: Option<u64>, offset: Option<u64>) {
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
}

/// `COUNT(*) as count` → `count`.
fn select_alias(expr: &str) -> Option<String> {
    let lower = expr.to_ascii_lowercase();
    let idx = lower.rfind(" as ")?;
    let alias = expr[idx + 4..].trim();
    is_valid_identifier(alias, false).then(|| alias.to_string())
}

pub(crate) fn is_valid_identifier(ident: &str, allow_star: bool) -> bool {
    if ident.is_empty() {
        return false;
    }
    let parts: Vec<&str> = ident.split('.').collect();
    for (idx, part) in parts.iter().enumerate() {
        if allow_star && *part == "*" {
            return idx + 1 == parts.len();
        }
        if !is_valid_segment(part) {
            return false;
        }
    }
    true
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
    }
    true
}
