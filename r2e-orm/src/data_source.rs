use crate::config::DataSourceOptions;
use crate::dialect::{Dialect, IsolationLevel};
use crate::driver::Driver;
use crate::error::OrmResult;
use crate::metadata::{Entity, MetadataRegistry};
use crate::migration::{Migration, MigrationExecutor};
use crate::repository::{Repository, RepositoryCache};
use crate::schema;
use crate::transaction::{finish_scope, TransactionManager};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entry point tying a driver, a dialect and a metadata registry together.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(MetadataRegistry::new());
/// registry.register::<User>()?;
///
/// let ds = DataSource::new(driver, Dialect::Sqlite, registry);
/// ds.initialize().await?;
///
/// let users = ds.get_repository::<User>()?;
/// ds.transaction(None, |tx| async move {
///     tx.get_repository::<User>()?.save(&user).await
/// })
/// .await?;
/// ```
pub struct DataSource {
    driver: Arc<dyn Driver>,
    registry: Arc<MetadataRegistry>,
    options: DataSourceOptions,
    repositories: RepositoryCache,
    tx_stack: Mutex<Vec<TransactionManager>>,
}

impl DataSource {
    pub fn new(driver: Arc<dyn Driver>, dialect: Dialect, registry: Arc<MetadataRegistry>) -> Self {
        Self::from_options(driver, registry, DataSourceOptions::new(dialect))
    }

    pub fn from_options(
        driver: Arc<dyn Driver>,
        registry: Arc<MetadataRegistry>,
        options: DataSourceOptions,
    ) -> Self {
        Self {
            driver,
            registry,
            options,
            repositories: RepositoryCache::default(),
            tx_stack: Mutex::new(Vec::new()),
        }
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.driver)
    }

    pub fn dialect(&self) -> Dialect {
        self.options.dialect
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &DataSourceOptions {
        &self.options
    }

    /// Synchronize the schema when the `synchronize` option is set.
    pub async fn initialize(&self) -> OrmResult<()> {
        if self.options.synchronize {
            schema::synchronize(self).await?;
        }
        Ok(())
    }

    /// [`initialize`](Self::initialize), then run pending migrations with the
    /// bootstrap policy when `migrations_run` is set.
    pub async fn initialize_with_migrations(
        &self,
        migrations: Vec<Arc<dyn Migration>>,
    ) -> OrmResult<()> {
        self.initialize().await?;
        if self.options.migrations_run {
            MigrationExecutor::from_data_source(self, migrations)?
                .bootstrap()
                .await?;
        }
        Ok(())
    }

    /// Cached repository for `T`. Fails if `T` was never registered.
    pub fn get_repository<T: Entity>(&self) -> OrmResult<Arc<Repository<T>>> {
        self.repositories.get_or_create(|| {
            Ok(Repository::new(
                Arc::clone(&self.driver),
                Arc::clone(&self.registry),
                self.options.dialect,
            )?
            .with_logging(self.options.logging))
        })
    }

    /// A root manager configured from this data source's options, not yet begun.
    pub fn create_transaction_manager(&self, isolation: Option<IsolationLevel>) -> TransactionManager {
        TransactionManager::new(
            Arc::clone(&self.driver),
            self.options.dialect,
            Arc::clone(&self.registry),
        )
        .with_isolation(isolation, self.options.strict_isolation)
        .with_logging(self.options.logging)
    }

    /// Begin a transaction: a savepoint inside the innermost active one, or a
    /// new root transaction. `isolation` only applies to root transactions.
    pub async fn begin_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> OrmResult<TransactionManager> {
        let mut stack = self.tx_stack.lock().await;
        while let Some(top) = stack.last() {
            if top.is_active().await {
                break;
            }
            stack.pop();
        }
        let manager = match stack.last() {
            Some(active) => active.create_nested_manager(),
            None => self.create_transaction_manager(isolation),
        };
        manager.begin().await?;
        stack.push(manager.clone());
        Ok(manager)
    }

    /// Run `f` in a transaction, committing on `Ok` and rolling back on `Err`.
    pub async fn transaction<F, Fut, R>(&self, isolation: Option<IsolationLevel>, f: F) -> OrmResult<R>
    where
        F: FnOnce(TransactionManager) -> Fut,
        Fut: Future<Output = OrmResult<R>>,
    {
        let manager = self.begin_transaction(isolation).await?;
        let result = finish_scope(&manager, f(manager.clone()).await).await;
        self.tx_stack.lock().await.pop();
        result
    }

    /// Number of transactions currently tracked as open.
    pub async fn transaction_depth(&self) -> usize {
        self.tx_stack.lock().await.len()
    }
}
