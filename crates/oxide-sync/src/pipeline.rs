//! The end-to-end synchronisation run.
//!
//! Stages run strictly in order and each one is awaited before the next
//! starts: read target, read reference, synthesize, persist, validate,
//! back up, apply, re-verify. Any failure stops the run there.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::Connection;
use tracing::{info, warn};

use crate::apply::{ApplyEngine, ApplyOutcome};
use crate::artifact::{ArtifactHeader, ArtifactStore};
use crate::error::{Result, SyncError};
use crate::hold::{self, HoldNotice};
use crate::plan::{MigrationPlan, TableClassification};
use crate::reader::SchemaReader;
use crate::sandbox::ValidationSandbox;
use crate::schema::SchemaSnapshot;
use crate::synthesizer::{MigrationSynthesizer, SynthesisOptions};
use crate::target::{self, BackupRecord, IntegrityReport, MigrationTarget, SqliteFileTarget};

/// Name of the backup directory created next to the target by default.
pub const DEFAULT_VERSIONS_DIR: &str = "versions";

/// Shared cancellation flag, checked before each stage.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Creates an untriggered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`SyncError::Interrupted`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            return Err(SyncError::Interrupted);
        }
        Ok(())
    }
}

/// Options for a run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Validate on a copy but never touch the target.
    pub dry_run: bool,
    /// Drop tables that exist only in the target.
    pub allow_drop: bool,
    /// Where plan artifacts and abort reports go.
    pub artifact_dir: PathBuf,
    /// Where backups go; `<target dir>/versions` when unset.
    pub versions_dir: Option<PathBuf>,
    /// Clear an integrity hold left by an earlier run.
    pub acknowledge_hold: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            allow_drop: false,
            artifact_dir: std::env::temp_dir(),
            versions_dir: None,
            acknowledge_hold: false,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Schemas already match; nothing was written.
    NoChanges {
        /// Per-table classification.
        classifications: Vec<TableClassification>,
    },
    /// Dry run: the plan passed validation and was not applied.
    Validated {
        /// Persisted plan.
        artifact: PathBuf,
        /// The validated plan.
        plan: MigrationPlan,
    },
    /// The plan was applied and the target is healthy.
    Applied {
        /// Persisted plan.
        artifact: PathBuf,
        /// Backup taken before the apply.
        backup: BackupRecord,
        /// Post-apply integrity report.
        integrity: IntegrityReport,
    },
    /// The plan was applied but the target failed its integrity check.
    AppliedWithIntegrityWarning {
        /// Persisted plan.
        artifact: PathBuf,
        /// Backup taken before the apply.
        backup: BackupRecord,
        /// Post-apply integrity report.
        integrity: IntegrityReport,
        /// Hold marker blocking further runs.
        hold: PathBuf,
    },
}

/// Synchronises one target with one reference.
pub struct SyncPipeline<T = SqliteFileTarget> {
    target: T,
    reference: PathBuf,
    options: SyncOptions,
    interrupt: Interrupt,
}

impl SyncPipeline<SqliteFileTarget> {
    /// Creates a pipeline for a target database file.
    pub fn new(target: impl Into<PathBuf>, reference: impl Into<PathBuf>, options: SyncOptions) -> Self {
        Self::with_target(SqliteFileTarget::new(target), reference, options)
    }
}

impl<T: MigrationTarget> SyncPipeline<T> {
    /// Creates a pipeline for any [`MigrationTarget`].
    pub fn with_target(target: T, reference: impl Into<PathBuf>, options: SyncOptions) -> Self {
        Self {
            target,
            reference: reference.into(),
            options,
            interrupt: Interrupt::new(),
        }
    }

    /// Shares an interrupt flag with the pipeline.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// The backup directory for this run.
    #[must_use]
    pub fn versions_dir(&self) -> PathBuf {
        if let Some(dir) = &self.options.versions_dir {
            return dir.clone();
        }
        self.target
            .locator()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_VERSIONS_DIR)
    }

    /// Reads both schemas and synthesizes the plan without validating,
    /// persisting or applying anything.
    pub async fn plan(&self) -> Result<MigrationPlan> {
        let (target_schema, reference_schema) = self.read_schemas().await?;
        self.synthesizer()
            .synthesize(&target_schema, &reference_schema)
            .map_err(|e| SyncError::structural(&e, None))
    }

    /// Runs every stage.
    pub async fn run(&self) -> Result<SyncOutcome> {
        let versions_dir = self.versions_dir();
        if self.options.acknowledge_hold {
            hold::acknowledge(&versions_dir).await?;
        } else {
            hold::check(&versions_dir)?;
        }

        let (target_schema, reference_schema) = self.read_schemas().await?;
        let header = ArtifactHeader::now(self.target.locator(), &self.reference);
        let store = ArtifactStore::new(&self.options.artifact_dir);

        self.interrupt.check()?;
        let plan = match self.synthesizer().synthesize(&target_schema, &reference_schema) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(table = %e.table(), reason = %e, "Synthesis aborted");
                let report = match store.write_abort_report(&e, &header).await {
                    Ok(path) => Some(path),
                    Err(write_err) => {
                        warn!(error = %write_err, "Could not save abort report");
                        None
                    }
                };
                return Err(SyncError::structural(&e, report));
            }
        };

        for table in plan.classifications() {
            info!(table = %table.table, class = %table.class, "Classified");
        }
        if plan.is_empty() {
            info!("No schema changes detected. Nothing to apply.");
            return Ok(SyncOutcome::NoChanges {
                classifications: plan.classifications().to_vec(),
            });
        }

        self.interrupt.check()?;
        let artifact = store.write_plan(&plan, &header).await?;

        self.interrupt.check()?;
        let validated = ValidationSandbox::new(&self.target)
            .validate(&plan, &reference_schema)
            .await
            .map_err(|e| e.with_artifact(&artifact))?;

        if self.options.dry_run {
            info!("Dry run: target left untouched");
            return Ok(SyncOutcome::Validated { artifact, plan });
        }

        let outcome = ApplyEngine::new(&self.target, &versions_dir)
            .with_interrupt(self.interrupt.clone())
            .apply(validated)
            .await
            .map_err(|e| e.with_artifact(&artifact))?;

        match outcome {
            ApplyOutcome::Applied { backup, integrity } => Ok(SyncOutcome::Applied {
                artifact,
                backup,
                integrity,
            }),
            ApplyOutcome::IntegrityWarning { backup, integrity } => {
                let notice = HoldNotice {
                    detected_at: chrono::Local::now(),
                    target: self.target.locator().to_path_buf(),
                    backup: backup.path.clone(),
                    artifact: Some(artifact.clone()),
                    messages: integrity.messages.clone(),
                };
                let hold = hold::place(&versions_dir, &notice).await?;
                Ok(SyncOutcome::AppliedWithIntegrityWarning {
                    artifact,
                    backup,
                    integrity,
                    hold,
                })
            }
        }
    }

    fn synthesizer(&self) -> MigrationSynthesizer {
        let mut options = SynthesisOptions::new();
        options.allow_drop = self.options.allow_drop;
        MigrationSynthesizer::new(options)
    }

    async fn read_schemas(&self) -> Result<(SchemaSnapshot, SchemaSnapshot)> {
        self.interrupt.check()?;
        info!(path = %self.target.locator().display(), "Reading target schema");
        let mut conn = self.target.open_read_only().await?;
        let target_schema = SchemaReader::new(&mut conn).snapshot().await?;
        conn.close().await?;

        self.interrupt.check()?;
        info!(path = %self.reference.display(), "Reading reference schema");
        let mut conn = target::open_read_only(&self.reference).await?;
        let reference_schema = SchemaReader::new(&mut conn).snapshot().await?;
        conn.close().await?;

        Ok((target_schema, reference_schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let shared = interrupt.clone();
        interrupt.check().unwrap();

        shared.trigger();
        assert!(interrupt.is_triggered());
        assert!(matches!(interrupt.check(), Err(SyncError::Interrupted)));
    }

    #[test]
    fn test_versions_dir_defaults_next_to_target() {
        let pipeline = SyncPipeline::new("/data/prod.sqlitedb", "/data/pre.sqlitedb", SyncOptions::default());
        assert_eq!(pipeline.versions_dir(), PathBuf::from("/data/versions"));

        let options = SyncOptions {
            versions_dir: Some(PathBuf::from("/backups")),
            ..SyncOptions::default()
        };
        let pipeline = SyncPipeline::new("/data/prod.sqlitedb", "/data/pre.sqlitedb", options);
        assert_eq!(pipeline.versions_dir(), PathBuf::from("/backups"));
    }
}
