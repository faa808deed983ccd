//! Database files and the operations run against them.
//!
//! Everything that touches a SQLite file goes through here: opening
//! connections, read-consistent copies, integrity checks and statement
//! execution. The [`MigrationTarget`] trait is the seam the sandbox and the
//! apply engine use to reach the database being migrated.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, warn};

use crate::artifact::unused_path;
use crate::dialect::SqliteDialect;
use crate::error::{FailedStatement, Result, SyncError};
use crate::plan::MigrationPlan;

/// Result of `PRAGMA integrity_check` plus `PRAGMA foreign_key_check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Rows returned by `integrity_check`; `["ok"]` when healthy.
    pub messages: Vec<String>,
    /// Foreign-key violations, informational only.
    pub foreign_key_violations: Vec<String>,
}

impl IntegrityReport {
    /// Returns true when the integrity check reported `ok`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.messages.len() == 1 && self.messages[0].eq_ignore_ascii_case("ok")
    }

    /// One-line summary for messages.
    #[must_use]
    pub fn summary(&self) -> String {
        self.messages.join("; ")
    }
}

/// A backup taken right before a plan is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    /// Backup file.
    pub path: PathBuf,
    /// When the backup was written.
    pub created_at: DateTime<Local>,
}

/// A statement failure during plan execution.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    /// The rejected statement.
    pub statement: FailedStatement,
    /// Engine message.
    pub message: String,
}

/// Opens a read-only connection. The file must already exist.
pub async fn open_read_only(path: &Path) -> Result<SqliteConnection> {
    if !path.is_file() {
        return Err(SyncError::NotFound(path.to_path_buf()));
    }
    let conn = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .connect()
        .await?;
    Ok(conn)
}

/// Opens a read-write connection to an existing file.
pub async fn open_read_write(path: &Path) -> Result<SqliteConnection> {
    if !path.is_file() {
        return Err(SyncError::NotFound(path.to_path_buf()));
    }
    let conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .connect()
        .await?;
    Ok(conn)
}

/// Writes a transactionally consistent copy of the connected database.
/// `dest` must not exist.
pub async fn vacuum_into(conn: &mut SqliteConnection, dest: &Path) -> Result<()> {
    let sql = SqliteDialect::new().vacuum_into_sql(&dest.to_string_lossy());
    sqlx::raw_sql(&sql).execute(&mut *conn).await?;
    Ok(())
}

/// Runs the integrity and foreign-key checks.
pub async fn integrity_check(conn: &mut SqliteConnection) -> Result<IntegrityReport> {
    let messages: Vec<String> = sqlx::query_scalar("PRAGMA integrity_check")
        .fetch_all(&mut *conn)
        .await?;

    let rows: Vec<(String, Option<i64>, String, i64)> =
        sqlx::query_as("PRAGMA foreign_key_check")
            .fetch_all(&mut *conn)
            .await?;
    let foreign_key_violations: Vec<String> = rows
        .into_iter()
        .map(|(table, rowid, parent, fkid)| match rowid {
            Some(rowid) => format!("{table} rowid {rowid} -> {parent} (fk {fkid})"),
            None => format!("{table} -> {parent} (fk {fkid})"),
        })
        .collect();
    for violation in &foreign_key_violations {
        warn!(violation = %violation, "Foreign key violation");
    }

    Ok(IntegrityReport {
        messages,
        foreign_key_violations,
    })
}

/// Executes a plan statement by statement on one connection.
///
/// Stops at the first failure. An open transaction is left to the engine:
/// dropping the connection rolls it back.
pub async fn execute_plan(
    conn: &mut SqliteConnection,
    plan: &MigrationPlan,
) -> std::result::Result<(), ExecutionFailure> {
    for (index, statement) in plan.executable() {
        debug!(index, sql = %statement.sql, "Executing");
        if let Err(e) = sqlx::raw_sql(&statement.sql).execute(&mut *conn).await {
            return Err(ExecutionFailure {
                statement: FailedStatement {
                    index,
                    sql: statement.sql.clone(),
                },
                message: e.to_string(),
            });
        }
    }
    Ok(())
}

/// A database a plan can be validated against and applied to.
#[allow(async_fn_in_trait)]
pub trait MigrationTarget {
    /// Where the database lives.
    fn locator(&self) -> &Path;

    /// Opens the database for schema reads.
    async fn open_read_only(&self) -> Result<SqliteConnection>;

    /// Writes a disposable copy into `workdir` and opens it read-write.
    async fn open_writable_copy(&self, workdir: &Path) -> Result<(PathBuf, SqliteConnection)>;

    /// Opens the real database read-write.
    async fn open_live(&self) -> Result<SqliteConnection>;

    /// Writes a timestamped backup into `versions_dir`.
    async fn backup(&self, versions_dir: &Path) -> Result<BackupRecord>;
}

/// A SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteFileTarget {
    path: PathBuf,
}

impl SqliteFileTarget {
    /// Creates a target for the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| "target".to_string(), |s| s.to_string_lossy().into_owned())
    }
}

impl MigrationTarget for SqliteFileTarget {
    fn locator(&self) -> &Path {
        &self.path
    }

    async fn open_read_only(&self) -> Result<SqliteConnection> {
        open_read_only(&self.path).await
    }

    async fn open_writable_copy(&self, workdir: &Path) -> Result<(PathBuf, SqliteConnection)> {
        let copy = workdir.join(format!("{}_sandbox.sqlitedb", self.stem()));
        let mut source = open_read_only(&self.path).await?;
        vacuum_into(&mut source, &copy).await?;
        source.close().await?;

        let conn = open_read_write(&copy).await?;
        Ok((copy, conn))
    }

    async fn open_live(&self) -> Result<SqliteConnection> {
        open_read_write(&self.path).await
    }

    async fn backup(&self, versions_dir: &Path) -> Result<BackupRecord> {
        tokio::fs::create_dir_all(versions_dir).await?;
        let created_at = Local::now();
        let base = format!("{}_backup_{}", self.stem(), created_at.format("%Y%m%d_%H%M%S"));
        let path = unused_path(versions_dir, &base, "sqlitedb");

        let mut source = open_read_only(&self.path).await?;
        vacuum_into(&mut source, &path).await?;
        source.close().await?;

        Ok(BackupRecord { path, created_at })
    }
}
