mod common;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::{data_source, RecordingDriver};
use r2e_orm::prelude::*;
use r2e_orm::{Migration, MigrationExecutor, QueryRunner};
use std::sync::Arc;

struct CreateTable {
    timestamp: i64,
    name: String,
    fail: bool,
}

impl CreateTable {
    fn new(timestamp: i64) -> Arc<dyn Migration> {
        Arc::new(Self {
            timestamp,
            name: format!("CreateT{timestamp}"),
            fail: false,
        })
    }

    fn failing(timestamp: i64) -> Arc<dyn Migration> {
        Arc::new(Self {
            timestamp,
            name: format!("Broken{timestamp}"),
            fail: true,
        })
    }
}

#[async_trait]
impl Migration for CreateTable {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn up(&self, runner: &QueryRunner) -> OrmResult<()> {
        runner
            .execute(&format!("CREATE TABLE t{} (id INTEGER)", self.timestamp), vec![])
            .await?;
        if self.fail {
            return Err(OrmError::mapping("broken migration"));
        }
        Ok(())
    }

    async fn down(&self, runner: &QueryRunner) -> OrmResult<()> {
        runner
            .execute(&format!("DROP TABLE t{}", self.timestamp), vec![])
            .await?;
        Ok(())
    }
}

fn history_row(timestamp: i64) -> Record {
    Record::new()
        .with("id", timestamp)
        .with("timestamp", timestamp)
        .with("name", format!("CreateT{timestamp}"))
        .with("executed_at", "2024-05-01T10:00:00.000Z")
        .with("execution_time", 7)
}

fn positions(sql: &[String], needles: &[&str]) -> Vec<usize> {
    needles
        .iter()
        .map(|needle| {
            sql.iter()
                .position(|s| s.contains(needle))
                .unwrap_or_else(|| panic!("missing statement {needle}"))
        })
        .collect()
}

#[tokio::test]
async fn pending_migrations_run_in_timestamp_order() {
    let driver = RecordingDriver::new();
    let ds = data_source(driver.clone());
    let executor = MigrationExecutor::from_data_source(
        &ds,
        vec![CreateTable::new(3), CreateTable::new(1), CreateTable::new(2)],
    )
    .unwrap();

    let ran = executor.execute_pending().await.unwrap();
    assert_eq!(ran, vec![1, 2, 3]);

    let sql = driver.sql();
    assert!(sql[0].starts_with("CREATE TABLE IF NOT EXISTS migrations"));
    let order = positions(&sql, &["CREATE TABLE t1", "CREATE TABLE t2", "CREATE TABLE t3"]);
    assert!(order.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        sql.iter().filter(|s| s.starts_with("INSERT INTO migrations")).count(),
        3
    );
    assert_eq!(sql.iter().filter(|s| *s == "COMMIT").count(), 3);
}

#[tokio::test]
async fn history_entry_carries_name_and_timestamp() {
    let driver = RecordingDriver::new();
    let ds = data_source(driver.clone());
    let executor = MigrationExecutor::from_data_source(&ds, vec![CreateTable::new(42)]).unwrap();
    executor.execute_pending().await.unwrap();

    let insert = driver
        .statements()
        .into_iter()
        .find(|s| s.sql.starts_with("INSERT INTO migrations"))
        .unwrap();
    assert_eq!(
        insert.sql,
        "INSERT INTO migrations (timestamp, name, executed_at, execution_time) VALUES (?, ?, ?, ?)"
    );
    assert_eq!(insert.params[0], Value::Int(42));
    assert_eq!(insert.params[1], Value::from("CreateT42"));
    assert!(matches!(insert.params[2], Value::Text(_)));
}

#[tokio::test]
async fn duplicate_timestamps_are_rejected_up_front() {
    let driver = RecordingDriver::new();
    let ds = data_source(driver.clone());
    let result = MigrationExecutor::from_data_source(
        &ds,
        vec![CreateTable::new(1), CreateTable::new(2), CreateTable::new(2)],
    );
    match result {
        Err(OrmError::DuplicateMigrationTimestamp(ts)) => assert_eq!(ts, 2),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("duplicate timestamps accepted"),
    }
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn executed_migrations_are_skipped() {
    let driver = RecordingDriver::new();
    driver.push_rows(vec![history_row(1)]);
    let ds = data_source(driver.clone());
    let executor =
        MigrationExecutor::from_data_source(&ds, vec![CreateTable::new(1), CreateTable::new(2)]).unwrap();

    assert_eq!(executor.execute_pending().await.unwrap(), vec![2]);
    assert!(!driver.sql().iter().any(|s| s.contains("CREATE TABLE t1")));
}

#[tokio::test]
async fn revert_undoes_most_recent_first() {
    let driver = RecordingDriver::new();
    driver.push_rows(vec![history_row(1), history_row(2), history_row(3)]);
    let ds = data_source(driver.clone());
    let executor = MigrationExecutor::from_data_source(
        &ds,
        vec![CreateTable::new(1), CreateTable::new(2), CreateTable::new(3)],
    )
    .unwrap();

    assert_eq!(executor.revert(2).await.unwrap(), vec![3, 2]);

    let statements = driver.statements();
    let deletes: Vec<&Value> = statements
        .iter()
        .filter(|s| s.sql.starts_with("DELETE FROM migrations"))
        .map(|s| &s.params[0])
        .collect();
    assert_eq!(deletes, vec![&Value::Int(3), &Value::Int(2)]);
    let sql = driver.sql();
    let order = positions(&sql, &["DROP TABLE t3", "DROP TABLE t2"]);
    assert!(order[0] < order[1]);
    assert!(!sql.iter().any(|s| s.contains("DROP TABLE t1")));
}

#[tokio::test]
async fn revert_zero_steps_does_nothing() {
    let driver = RecordingDriver::new();
    let ds = data_source(driver.clone());
    let executor = MigrationExecutor::from_data_source(&ds, vec![CreateTable::new(1)]).unwrap();
    assert!(executor.revert(0).await.unwrap().is_empty());
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn revert_of_undeclared_migration_fails() {
    let driver = RecordingDriver::new();
    driver.push_rows(vec![history_row(9)]);
    let ds = data_source(driver.clone());
    let executor = MigrationExecutor::from_data_source(&ds, vec![CreateTable::new(1)]).unwrap();

    let err = executor.revert(1).await.unwrap_err();
    assert!(matches!(err, OrmError::MigrationNotFound { timestamp: 9, ref name } if name == "CreateT9"));
}

#[tokio::test]
async fn status_reports_every_declared_migration() {
    let driver = RecordingDriver::new();
    driver.push_rows(vec![history_row(1)]);
    let ds = data_source(driver.clone());
    let executor =
        MigrationExecutor::from_data_source(&ds, vec![CreateTable::new(2), CreateTable::new(1)]).unwrap();

    let status = executor.show_status().await.unwrap();
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].timestamp, 1);
    assert!(status[0].executed);
    assert_eq!(status[0].execution_time, Some(7));
    assert_eq!(
        status[0].executed_at,
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
    );
    assert_eq!(status[1].timestamp, 2);
    assert!(!status[1].executed);
    assert_eq!(status[1].executed_at, None);
    assert_eq!(status[1].execution_time, None);
}

#[tokio::test]
async fn bootstrap_reverts_one_step_and_returns_original_error() {
    let driver = RecordingDriver::new();
    // history before the run, then after the first migration was recorded
    driver.push_rows(vec![]);
    driver.push_rows(vec![history_row(1)]);
    let ds = data_source(driver.clone());
    let executor =
        MigrationExecutor::from_data_source(&ds, vec![CreateTable::new(1), CreateTable::failing(2)]).unwrap();

    let err = executor.bootstrap().await.unwrap_err();
    assert!(matches!(err, OrmError::Mapping(ref m) if m == "broken migration"));

    let sql = driver.sql();
    let order = positions(&sql, &["CREATE TABLE t2", "ROLLBACK", "DROP TABLE t1"]);
    assert!(order.windows(2).all(|w| w[0] < w[1]));
    assert!(sql.iter().any(|s| s.starts_with("DELETE FROM migrations")));
}
