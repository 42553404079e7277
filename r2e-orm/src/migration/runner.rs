use super::{Migration, QueryRunner};
use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::error::OrmResult;
use crate::metadata::MetadataRegistry;
use crate::transaction::{run_scope, TransactionManager};
use std::sync::Arc;
use std::time::Instant;

/// Runs one migration body inside its own root transaction.
pub struct MigrationRunner {
    driver: Arc<dyn Driver>,
    dialect: Dialect,
    registry: Arc<MetadataRegistry>,
}

impl MigrationRunner {
    pub fn new(driver: Arc<dyn Driver>, dialect: Dialect, registry: Arc<MetadataRegistry>) -> Self {
        Self {
            driver,
            dialect,
            registry,
        }
    }

    /// Apply `migration`, returning the elapsed milliseconds.
    pub async fn execute_up(&self, migration: &dyn Migration) -> OrmResult<i64> {
        let started = Instant::now();
        run_scope(self.manager(), |tx| async move {
            migration.up(&QueryRunner::new(tx)).await
        })
        .await?;
        Ok(started.elapsed().as_millis() as i64)
    }

    /// Reverse `migration`, returning the elapsed milliseconds.
    pub async fn execute_down(&self, migration: &dyn Migration) -> OrmResult<i64> {
        let started = Instant::now();
        run_scope(self.manager(), |tx| async move {
            migration.down(&QueryRunner::new(tx)).await
        })
        .await?;
        Ok(started.elapsed().as_millis() as i64)
    }

    fn manager(&self) -> TransactionManager {
        TransactionManager::new(
            Arc::clone(&self.driver),
            self.dialect,
            Arc::clone(&self.registry),
        )
    }
}
