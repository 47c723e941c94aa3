//! SQLite-based run history store

use crate::persistence::{ExecutionStatus, PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

const SELECT_RUNS: &str = r#"
    SELECT id, workflow, event, status, started_at, completed_at,
           total_instances, failed_instances, failures
    FROM runs
"#;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("flowline");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(db_dir.join("runs.db")).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow TEXT NOT NULL,
                event TEXT,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_instances INTEGER NOT NULL DEFAULT 0,
                failed_instances INTEGER NOT NULL DEFAULT 0,
                failures TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_status(status: &str) -> ExecutionStatus {
        match status {
            "running" => ExecutionStatus::Running,
            "success" => ExecutionStatus::Success,
            "failure" => ExecutionStatus::Failure,
            "cancelled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Pending,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        let failures: String = row.get("failures");
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            workflow: row.get("workflow"),
            event: row.get("event"),
            status: Self::parse_status(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            total_instances: row.get::<i64, _>("total_instances") as usize,
            failed_instances: row.get::<i64, _>("failed_instances") as usize,
            failures: serde_json::from_str(&failures).context("Corrupt failures column")?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, workflow, event, status, started_at, completed_at, total_instances, failed_instances, failures)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.workflow)
        .bind(&run.event)
        .bind(run.status.to_string())
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(run.total_instances as i64)
        .bind(run.failed_instances as i64)
        .bind(serde_json::to_string(&run.failures)?)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RUNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "{} WHERE workflow = ?1 ORDER BY started_at DESC",
            SELECT_RUNS
        ))
        .bind(workflow)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!("{} ORDER BY started_at DESC LIMIT ?1", SELECT_RUNS))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list recent runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT workflow
            FROM runs
            ORDER BY workflow ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list workflows")?;

        Ok(rows.iter().map(|row| row.get("workflow")).collect())
    }
}
