#![allow(dead_code)]

use std::path::{Path, PathBuf};

use oxide_sync::SyncOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tempfile::TempDir;

/// A target and a reference database in a private directory.
pub struct Fixture {
    pub dir: TempDir,
    pub target: PathBuf,
    pub reference: PathBuf,
}

impl Fixture {
    pub async fn new(target_sql: &str, reference_sql: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("prod.sqlitedb");
        let reference = dir.path().join("pre.sqlitedb");
        create_db(&target, target_sql).await;
        create_db(&reference, reference_sql).await;
        Self {
            dir,
            target,
            reference,
        }
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.dir.path().join("versions")
    }

    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            artifact_dir: self.artifact_dir(),
            ..SyncOptions::default()
        }
    }

    pub fn target_bytes(&self) -> Vec<u8> {
        std::fs::read(&self.target).unwrap()
    }
}

pub async fn create_db(path: &Path, sql: &str) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap_or_else(|e| panic!("Failed to create {}: {e}", path.display()));
    sqlx::raw_sql(sql)
        .execute(&mut conn)
        .await
        .unwrap_or_else(|e| panic!("Failed to run fixture SQL: {sql}\nError: {e}"));
    conn.close().await.unwrap();
}

pub async fn open(path: &Path) -> SqliteConnection {
    SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .connect()
        .await
        .unwrap()
}

pub async fn column_names(path: &Path, table: &str) -> Vec<String> {
    let mut conn = open(path).await;
    let names = sqlx::query_scalar("SELECT name FROM pragma_table_xinfo(?1) ORDER BY cid")
        .bind(table)
        .fetch_all(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
    names
}

pub async fn table_names(path: &Path) -> Vec<String> {
    let mut conn = open(path).await;
    let names = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&mut conn)
    .await
    .unwrap();
    conn.close().await.unwrap();
    names
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}
