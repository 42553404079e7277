use super::{missing, Migration, MigrationRunner, MigrationStatus, MigrationStorage};
use crate::data_source::DataSource;
use crate::error::{OrmError, OrmResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Orders declared migrations and runs them against the history table.
pub struct MigrationExecutor {
    storage: MigrationStorage,
    runner: MigrationRunner,
    migrations: Vec<Arc<dyn Migration>>,
}

impl MigrationExecutor {
    /// Sorts `migrations` by timestamp. Fails on duplicate timestamps before
    /// anything runs.
    pub fn new(
        storage: MigrationStorage,
        runner: MigrationRunner,
        mut migrations: Vec<Arc<dyn Migration>>,
    ) -> OrmResult<Self> {
        migrations.sort_by_key(|m| m.timestamp());
        let mut seen = HashSet::new();
        for migration in &migrations {
            if !seen.insert(migration.timestamp()) {
                return Err(OrmError::DuplicateMigrationTimestamp(migration.timestamp()));
            }
        }
        Ok(Self {
            storage,
            runner,
            migrations,
        })
    }

    /// Executor over `data_source`'s driver, using its configured history table.
    pub fn from_data_source(
        data_source: &DataSource,
        migrations: Vec<Arc<dyn Migration>>,
    ) -> OrmResult<Self> {
        let storage = MigrationStorage::new(
            data_source.driver(),
            data_source.dialect(),
            &data_source.options().migrations_table,
        )?;
        let runner = MigrationRunner::new(
            data_source.driver(),
            data_source.dialect(),
            Arc::clone(data_source.registry()),
        );
        Self::new(storage, runner, migrations)
    }

    pub fn migrations(&self) -> &[Arc<dyn Migration>] {
        &self.migrations
    }

    pub async fn initialize(&self) -> OrmResult<()> {
        self.storage.ensure_table().await
    }

    /// Run every declared migration not yet in the history, oldest first.
    /// Each success is recorded before the next one starts. Returns the
    /// timestamps executed.
    pub async fn execute_pending(&self) -> OrmResult<Vec<i64>> {
        self.initialize().await?;
        let executed: HashSet<i64> = self
            .storage
            .get_executed()
            .await?
            .into_iter()
            .map(|r| r.timestamp)
            .collect();

        let mut ran = Vec::new();
        for migration in self.migrations.iter().filter(|m| !executed.contains(&m.timestamp())) {
            tracing::info!(timestamp = migration.timestamp(), name = migration.name(), "running migration");
            let elapsed = self.runner.execute_up(migration.as_ref()).await?;
            self.storage
                .insert(migration.timestamp(), migration.name(), elapsed)
                .await?;
            ran.push(migration.timestamp());
        }
        Ok(ran)
    }

    /// Reverse the last `steps` executed migrations, most recent first.
    /// Returns the timestamps reverted.
    pub async fn revert(&self, steps: usize) -> OrmResult<Vec<i64>> {
        if steps == 0 {
            return Ok(Vec::new());
        }
        self.initialize().await?;
        let executed = self.storage.get_executed().await?;
        let start = executed.len().saturating_sub(steps);

        let mut reverted = Vec::new();
        for record in executed[start..].iter().rev() {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.timestamp() == record.timestamp)
                .ok_or_else(|| missing(record.timestamp, &record.name))?;
            tracing::info!(timestamp = record.timestamp, name = %record.name, "reverting migration");
            self.runner.execute_down(migration.as_ref()).await?;
            self.storage.delete(record.timestamp).await?;
            reverted.push(record.timestamp);
        }
        Ok(reverted)
    }

    /// Every declared migration with its execution state.
    pub async fn show_status(&self) -> OrmResult<Vec<MigrationStatus>> {
        self.initialize().await?;
        let executed: HashMap<i64, _> = self
            .storage
            .get_executed()
            .await?
            .into_iter()
            .map(|r| (r.timestamp, r))
            .collect();
        Ok(self
            .migrations
            .iter()
            .map(|migration| {
                let record = executed.get(&migration.timestamp());
                MigrationStatus {
                    timestamp: migration.timestamp(),
                    name: migration.name().to_string(),
                    executed: record.is_some(),
                    executed_at: record.and_then(|r| r.executed_at),
                    execution_time: record.map(|r| r.execution_time),
                }
            })
            .collect())
    }

    /// Startup policy: run pending migrations; on failure revert one step and
    /// return the original error.
    pub async fn bootstrap(&self) -> OrmResult<Vec<i64>> {
        match self.execute_pending().await {
            Ok(ran) => Ok(ran),
            Err(err) => {
                tracing::error!(error = %err, "migration failed, reverting last step");
                if let Err(revert_err) = self.revert(1).await {
                    tracing::warn!(error = %revert_err, "revert after failed migration also failed");
                }
                Err(err)
            }
        }
    }
}
