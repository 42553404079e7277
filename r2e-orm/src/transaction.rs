//! Transactions with savepoint-based nesting.
//!
//! A root [`TransactionManager`] issues `BEGIN`/`COMMIT`/`ROLLBACK`. Managers
//! created with [`TransactionManager::create_nested_manager`] share the same
//! driver session and issue `SAVEPOINT`/`RELEASE SAVEPOINT`/`ROLLBACK TO
//! SAVEPOINT` instead.
//!
//! ```ignore
//! let tx = TransactionManager::new(driver, Dialect::Sqlite, registry);
//! tx.begin().await?;
//! tx.transaction(|inner| async move {
//!     inner.get_repository::<User>()?.save(&user).await
//! })
//! .await?;
//! tx.commit().await?;
//! ```
//!
//! Each manager must be driven by one caller at a time; beginning two nested
//! scopes concurrently on the same session is not supported.

use crate::dialect::{Dialect, IsolationLevel};
use crate::driver::{Driver, RunResult, Statement};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{Entity, MetadataRegistry};
use crate::repository::{Repository, RepositoryCache};
use crate::transform::record_from_storage;
use crate::value::{Record, Value};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Committed,
    RolledBack,
}

struct Inner {
    driver: Arc<dyn Driver>,
    dialect: Dialect,
    registry: Arc<MetadataRegistry>,
    isolation: Option<IsolationLevel>,
    strict_isolation: bool,
    logging: bool,
    savepoint: Option<String>,
    state: Mutex<TransactionState>,
    repositories: RepositoryCache,
}

/// One transaction scope, root or nested. Cloning shares the scope.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<Inner>,
}

impl TransactionManager {
    /// A root scope over `driver`.
    pub fn new(driver: Arc<dyn Driver>, dialect: Dialect, registry: Arc<MetadataRegistry>) -> Self {
        Self::build(driver, dialect, registry, None, false, true, None)
    }

    fn build(
        driver: Arc<dyn Driver>,
        dialect: Dialect,
        registry: Arc<MetadataRegistry>,
        isolation: Option<IsolationLevel>,
        strict_isolation: bool,
        logging: bool,
        savepoint: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                dialect,
                registry,
                isolation,
                strict_isolation,
                logging,
                savepoint,
                state: Mutex::new(TransactionState::Idle),
                repositories: RepositoryCache::default(),
            }),
        }
    }

    /// Isolation applied before `BEGIN`. Ignored on nested scopes.
    pub fn with_isolation(self, isolation: Option<IsolationLevel>, strict: bool) -> Self {
        let inner = &self.inner;
        Self::build(
            Arc::clone(&inner.driver),
            inner.dialect,
            Arc::clone(&inner.registry),
            isolation,
            strict,
            inner.logging,
            inner.savepoint.clone(),
        )
    }

    pub fn with_logging(self, logging: bool) -> Self {
        let inner = &self.inner;
        Self::build(
            Arc::clone(&inner.driver),
            inner.dialect,
            Arc::clone(&inner.registry),
            inner.isolation,
            inner.strict_isolation,
            logging,
            inner.savepoint.clone(),
        )
    }

    pub fn is_nested(&self) -> bool {
        self.inner.savepoint.is_some()
    }

    pub fn savepoint_name(&self) -> Option<&str> {
        self.inner.savepoint.as_deref()
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub async fn state(&self) -> TransactionState {
        *self.inner.state.lock().await
    }

    pub async fn is_active(&self) -> bool {
        self.state().await == TransactionState::Active
    }

    pub async fn begin(&self) -> OrmResult<()> {
        if !self.inner.driver.supports_transactions() {
            return Err(OrmError::TransactionUnsupported);
        }
        let mut state = self.inner.state.lock().await;
        if *state != TransactionState::Idle {
            return Err(OrmError::TransactionInactive);
        }
        match &self.inner.savepoint {
            Some(name) => {
                self.exec(&format!("SAVEPOINT {name}")).await?;
            }
            None => {
                self.apply_isolation().await?;
                self.exec(self.inner.dialect.begin_transaction()).await?;
            }
        }
        *state = TransactionState::Active;
        tracing::debug!(savepoint = ?self.inner.savepoint, "transaction started");
        Ok(())
    }

    pub async fn commit(&self) -> OrmResult<()> {
        let mut state = self.inner.state.lock().await;
        if *state != TransactionState::Active {
            return Err(OrmError::TransactionInactive);
        }
        match &self.inner.savepoint {
            Some(name) => self.exec(&format!("RELEASE SAVEPOINT {name}")).await?,
            None => self.exec("COMMIT").await?,
        }
        *state = TransactionState::Committed;
        tracing::debug!(savepoint = ?self.inner.savepoint, "transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> OrmResult<()> {
        let mut state = self.inner.state.lock().await;
        if *state != TransactionState::Active {
            return Err(OrmError::TransactionInactive);
        }
        match &self.inner.savepoint {
            Some(name) => {
                self.exec(&format!("ROLLBACK TO SAVEPOINT {name}")).await?;
                *state = TransactionState::RolledBack;
                self.exec(&format!("RELEASE SAVEPOINT {name}")).await?;
            }
            None => {
                self.exec("ROLLBACK").await?;
                *state = TransactionState::RolledBack;
            }
        }
        tracing::debug!(savepoint = ?self.inner.savepoint, "transaction rolled back");
        Ok(())
    }

    /// A scope nested in this one, identified by a fresh savepoint name.
    pub fn create_nested_manager(&self) -> TransactionManager {
        Self::build(
            Arc::clone(&self.inner.driver),
            self.inner.dialect,
            Arc::clone(&self.inner.registry),
            None,
            false,
            self.inner.logging,
            Some(savepoint_name()),
        )
    }

    /// Run `f` in a nested scope: committed when it returns `Ok`, rolled back
    /// when it returns `Err`. The callback's error is returned even if the
    /// rollback itself fails.
    pub async fn transaction<F, Fut, R>(&self, f: F) -> OrmResult<R>
    where
        F: FnOnce(TransactionManager) -> Fut,
        Fut: Future<Output = OrmResult<R>>,
    {
        run_scope(self.create_nested_manager(), f).await
    }

    /// Repository bound to this scope's session, cached per manager.
    pub fn get_repository<T: Entity>(&self) -> OrmResult<Arc<Repository<T>>> {
        self.inner.repositories.get_or_create(|| {
            Ok(Repository::new(
                Arc::clone(&self.inner.driver),
                Arc::clone(&self.inner.registry),
                self.inner.dialect,
            )?
            .with_logging(self.inner.logging))
        })
    }

    /// Run a row-returning statement on this scope's session.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> OrmResult<Vec<Record>> {
        let statement = Statement::prepare(sql).bind(params);
        self.log(&statement);
        Ok(self.inner.driver.all(&statement).await?.into_rows())
    }

    /// Run a mutation on this scope's session.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> OrmResult<RunResult> {
        let statement = Statement::prepare(sql).bind(params);
        self.log(&statement);
        self.inner.driver.run(&statement).await
    }

    /// Like [`query`](Self::query), converting values of `T`'s declared columns.
    pub async fn query_as_entity<T: Entity>(&self, sql: &str, params: Vec<Value>) -> OrmResult<Vec<T>> {
        let table = self.inner.registry.require_table(&T::key())?;
        self.query(sql, params)
            .await?
            .into_iter()
            .map(|row| T::from_record(record_from_storage(&table.columns, row)))
            .collect()
    }

    async fn apply_isolation(&self) -> OrmResult<()> {
        let Some(level) = self.inner.isolation else {
            return Ok(());
        };
        match self.inner.dialect.isolation_sql(level) {
            Some(sql) => self.exec(sql).await,
            None if self.inner.strict_isolation => {
                Err(OrmError::UnsupportedIsolation(level.as_str().to_string()))
            }
            None => {
                tracing::warn!(
                    level = level.as_str(),
                    dialect = self.inner.dialect.name(),
                    "isolation level is not enforced"
                );
                Ok(())
            }
        }
    }

    async fn exec(&self, sql: &str) -> OrmResult<()> {
        if self.inner.logging {
            tracing::debug!(sql, "executing transaction control");
        }
        self.inner.driver.exec(sql).await
    }

    fn log(&self, statement: &Statement) {
        if self.inner.logging {
            tracing::debug!(sql = %statement.sql, params = statement.params.len(), "executing statement");
        }
    }
}

/// Begin `manager`, run `f` with it, then commit or roll back.
pub(crate) async fn run_scope<F, Fut, R>(manager: TransactionManager, f: F) -> OrmResult<R>
where
    F: FnOnce(TransactionManager) -> Fut,
    Fut: Future<Output = OrmResult<R>>,
{
    manager.begin().await?;
    finish_scope(&manager, f(manager.clone()).await).await
}

/// Commit on `Ok`, roll back on `Err`; exactly one of the two is attempted.
pub(crate) async fn finish_scope<R>(manager: &TransactionManager, result: OrmResult<R>) -> OrmResult<R> {
    match result {
        Ok(value) => {
            manager.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = manager.rollback().await {
                tracing::warn!(error = %rollback_err, original = %err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// `sp_<counter>_<random>`, lowercase so it is always a valid identifier.
fn savepoint_name() -> String {
    let n = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("sp_{n}_{suffix}")
}
