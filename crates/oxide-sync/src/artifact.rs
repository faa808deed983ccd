//! Persisted plan artifacts.
//!
//! Every plan is written to disk before anything is validated or applied so
//! an operator can audit it or run it by hand. Synthesis aborts leave a
//! plain-text report instead, never a runnable script.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::error::Result;
use crate::plan::MigrationPlan;
use crate::synthesizer::SynthesisError;

const PREFIX: &str = "oxide-sync";

/// Context written at the top of every artifact.
#[derive(Debug, Clone)]
pub struct ArtifactHeader {
    /// Target database.
    pub target: PathBuf,
    /// Reference database.
    pub reference: PathBuf,
    /// Generation time.
    pub generated_at: DateTime<Local>,
}

impl ArtifactHeader {
    /// Creates a header stamped with the current time.
    #[must_use]
    pub fn now(target: &Path, reference: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            reference: reference.to_path_buf(),
            generated_at: Local::now(),
        }
    }

    fn stamp(&self) -> String {
        self.generated_at.format("%Y%m%d_%H%M%S").to_string()
    }

    fn lines(&self, marker: &str) -> String {
        format!(
            "{marker} oxide-sync\n{marker} target:    {}\n{marker} reference: {}\n{marker} generated: {}\n",
            self.target.display(),
            self.reference.display(),
            self.generated_at.to_rfc3339()
        )
    }
}

/// Writes plan scripts and abort reports into one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Creates a store writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The artifact directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `oxide-sync_<ts>.sql` and returns its path.
    pub async fn write_plan(&self, plan: &MigrationPlan, header: &ArtifactHeader) -> Result<PathBuf> {
        let mut text = header.lines("--");
        for table in plan.classifications() {
            let _ = match &table.detail {
                Some(detail) => writeln!(text, "-- table {}: {} ({detail})", table.table, table.class),
                None => writeln!(text, "-- table {}: {}", table.table, table.class),
            };
        }
        text.push('\n');
        text.push_str(&plan.render());

        let path = self.write(&format!("{PREFIX}_{}", header.stamp()), "sql", &text).await?;
        info!(path = %path.display(), "Saved generated SQL");
        Ok(path)
    }

    /// Writes `oxide-sync_<ts>_aborted.txt` describing why synthesis stopped.
    pub async fn write_abort_report(
        &self,
        error: &SynthesisError,
        header: &ArtifactHeader,
    ) -> Result<PathBuf> {
        let mut text = header.lines("#");
        let _ = writeln!(text, "\nABORTED: no plan was generated.");
        let _ = writeln!(text, "table:  {}", error.table());
        let _ = writeln!(text, "reason: {error}");

        let path = self
            .write(&format!("{PREFIX}_{}_aborted", header.stamp()), "txt", &text)
            .await?;
        info!(path = %path.display(), "Saved abort report");
        Ok(path)
    }

    async fn write(&self, base: &str, ext: &str, contents: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = unused_path(&self.dir, base, ext);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }
}

/// `dir/base.ext`, or `dir/base_N.ext` for the first N not yet taken.
pub(crate) fn unused_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{base}.{ext}"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{base}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, SchemaSnapshot, TableSchema};
    use crate::synthesizer::MigrationSynthesizer;

    fn header() -> ArtifactHeader {
        ArtifactHeader::now(Path::new("prod.sqlitedb"), Path::new("pre.sqlitedb"))
    }

    #[tokio::test]
    async fn test_plan_artifact_has_header_and_script() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let reference = SchemaSnapshot::new().table(
            TableSchema::new("audit_log", "CREATE TABLE audit_log (msg TEXT)")
                .column(ColumnDescriptor::new("msg", "TEXT")),
        );
        let plan = MigrationSynthesizer::default()
            .synthesize(&SchemaSnapshot::new(), &reference)
            .unwrap();

        let path = store.write_plan(&plan, &header()).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("oxide-sync_"));
        assert!(name.ends_with(".sql"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("-- target:    prod.sqlitedb"));
        assert!(text.contains("-- table audit_log: new"));
        assert!(text.contains("CREATE TABLE audit_log (msg TEXT);"));
    }

    #[tokio::test]
    async fn test_repeated_writes_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let header = header();
        let error = SynthesisError::NoCommonColumns {
            table: "orders".to_string(),
        };

        let first = store.write_abort_report(&error, &header).await.unwrap();
        let second = store.write_abort_report(&error, &header).await.unwrap();
        assert_ne!(first, second);
        assert!(first.to_string_lossy().ends_with("_aborted.txt"));

        let text = std::fs::read_to_string(&second).unwrap();
        assert!(text.contains("table:  orders"));
        assert!(!text.contains("BEGIN"));
    }
}
