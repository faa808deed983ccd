//! Applying a validated plan to the real target.
//!
//! The engine takes a backup, runs the plan on the live database and
//! re-checks integrity. It never restores or rolls back by itself: after a
//! failure the backup is the recovery path.

use std::path::{Path, PathBuf};

use sqlx::Connection;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::pipeline::Interrupt;
use crate::sandbox::ValidatedPlan;
use crate::target::{self, BackupRecord, IntegrityReport, MigrationTarget};

/// How an apply ended.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// Plan committed and the target is healthy.
    Applied {
        /// Backup taken before the apply.
        backup: BackupRecord,
        /// Post-apply integrity report.
        integrity: IntegrityReport,
    },
    /// Plan committed but the post-apply integrity check failed.
    IntegrityWarning {
        /// Backup taken before the apply.
        backup: BackupRecord,
        /// Post-apply integrity report.
        integrity: IntegrityReport,
    },
}

impl ApplyOutcome {
    /// The backup taken before the apply.
    #[must_use]
    pub fn backup(&self) -> &BackupRecord {
        match self {
            Self::Applied { backup, .. } | Self::IntegrityWarning { backup, .. } => backup,
        }
    }
}

/// Applies validated plans to one target.
pub struct ApplyEngine<'t, T> {
    target: &'t T,
    versions_dir: PathBuf,
    interrupt: Interrupt,
}

impl<'t, T: MigrationTarget> ApplyEngine<'t, T> {
    /// Creates an engine writing backups into `versions_dir`.
    pub fn new(target: &'t T, versions_dir: impl Into<PathBuf>) -> Self {
        Self {
            target,
            versions_dir: versions_dir.into(),
            interrupt: Interrupt::new(),
        }
    }

    /// Shares an interrupt flag with the engine.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Where backups are written.
    #[must_use]
    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    /// Backs up the target, applies the plan, re-checks integrity.
    ///
    /// Errors before the live connection is opened leave the target
    /// untouched. Execution errors come back as
    /// [`SyncError::ApplyFailure`] with the backup location.
    pub async fn apply(&self, validated: ValidatedPlan<'_>) -> Result<ApplyOutcome> {
        self.interrupt.check()?;
        let backup = self.target.backup(&self.versions_dir).await?;
        info!(path = %backup.path.display(), "Backup created");

        self.interrupt.check()?;
        let apply_failure = |statement, message: String| SyncError::ApplyFailure {
            statement,
            message,
            backup: backup.path.clone(),
            artifact: None,
        };

        let mut conn = match self.target.open_live().await {
            Ok(conn) => conn,
            Err(e) => return Err(apply_failure(None, e.to_string())),
        };

        info!(target = %self.target.locator().display(), "Applying migration");
        if let Err(e) = target::execute_plan(&mut conn, validated.plan()).await {
            // Closing hands the open transaction back to the engine.
            if let Err(close_err) = conn.close().await {
                warn!(error = %close_err, "Closing target connection failed");
            }
            return Err(apply_failure(Some(e.statement), e.message));
        }

        let integrity = match target::integrity_check(&mut conn).await {
            Ok(report) => report,
            Err(e) => IntegrityReport {
                messages: vec![format!("integrity_check could not run: {e}")],
                foreign_key_violations: Vec::new(),
            },
        };
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Closing target connection failed");
        }

        if self.interrupt.is_triggered() {
            warn!("Interrupt received while applying; the apply ran to completion");
        }

        if integrity.is_healthy() {
            info!("Migration applied");
            Ok(ApplyOutcome::Applied { backup, integrity })
        } else {
            warn!(
                messages = %integrity.summary(),
                backup = %backup.path.display(),
                "Post-apply integrity_check failed"
            );
            Ok(ApplyOutcome::IntegrityWarning { backup, integrity })
        }
    }
}
