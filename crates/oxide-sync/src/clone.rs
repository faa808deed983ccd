//! Snapshot cloning.
//!
//! Produces a compact, consistent copy of a live database, for example to
//! seed a reference from production before editing it.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::Connection;
use sqlx::sqlite::SqliteConnection;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::target::{self, IntegrityReport};

/// How the copy was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneMethod {
    /// `VACUUM INTO` from a read-only connection.
    VacuumInto,
    /// File copy under a read transaction, then `VACUUM`.
    PageCopy,
}

/// Result of [`clone_snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct CloneReport {
    /// Source database.
    pub source: PathBuf,
    /// Written copy.
    pub destination: PathBuf,
    /// Copy method that succeeded.
    pub method: CloneMethod,
    /// Size of the copy in bytes.
    pub bytes: u64,
    /// Integrity report of the copy.
    pub integrity: IntegrityReport,
}

/// Clones `source` into `destination`, replacing any existing file there.
pub async fn clone_snapshot(source: &Path, destination: &Path) -> Result<CloneReport> {
    if !source.is_file() {
        return Err(SyncError::NotFound(source.to_path_buf()));
    }
    remove_database(destination).await?;
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut conn = target::open_read_only(source).await?;
    let method = match target::vacuum_into(&mut conn, destination).await {
        Ok(()) => CloneMethod::VacuumInto,
        Err(e) => {
            warn!(error = %e, "VACUUM INTO failed, falling back to page copy");
            remove_database(destination).await?;
            page_copy(&mut conn, source, destination).await?;
            CloneMethod::PageCopy
        }
    };
    conn.close().await?;

    if method == CloneMethod::PageCopy {
        let mut copy = target::open_read_write(destination).await?;
        sqlx::raw_sql("VACUUM").execute(&mut copy).await?;
        sqlx::raw_sql("PRAGMA optimize").execute(&mut copy).await?;
        copy.close().await?;
    }

    let mut copy = target::open_read_only(destination).await?;
    let integrity = target::integrity_check(&mut copy).await?;
    copy.close().await?;
    if !integrity.is_healthy() {
        return Err(SyncError::UnhealthySnapshot {
            path: destination.to_path_buf(),
            messages: integrity.messages,
        });
    }

    let bytes = tokio::fs::metadata(destination).await?.len();
    info!(
        source = %source.display(),
        destination = %destination.display(),
        method = ?method,
        bytes,
        "Snapshot cloned"
    );
    Ok(CloneReport {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
        method,
        bytes,
        integrity,
    })
}

/// Copies the database file, and its WAL if any, while a read transaction
/// keeps writers from checkpointing underneath.
async fn page_copy(conn: &mut SqliteConnection, source: &Path, destination: &Path) -> Result<()> {
    sqlx::raw_sql("BEGIN").execute(&mut *conn).await?;
    let copied = async {
        let _: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master")
            .fetch_one(&mut *conn)
            .await?;
        tokio::fs::copy(source, destination).await?;
        let wal = side_file(source, "-wal");
        if wal.is_file() {
            tokio::fs::copy(&wal, side_file(destination, "-wal")).await?;
        }
        Ok::<(), SyncError>(())
    }
    .await;
    let committed = sqlx::raw_sql("COMMIT").execute(&mut *conn).await;
    settle_copy(copied, committed)
}

/// A failed copy wins over a failed COMMIT; the COMMIT error is only logged.
fn settle_copy<T>(copied: Result<()>, committed: std::result::Result<T, sqlx::Error>) -> Result<()> {
    match (copied, committed) {
        (Err(e), Err(commit_err)) => {
            warn!(error = %commit_err, "Releasing read transaction failed");
            Err(e)
        }
        (copied, committed) => {
            committed?;
            copied
        }
    }
}

async fn remove_database(path: &Path) -> Result<()> {
    for file in [path.to_path_buf(), side_file(path, "-wal"), side_file(path, "-shm")] {
        match tokio::fs::remove_file(&file).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
    }
    Ok(())
}

fn side_file(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
