//! Error types for schema synchronisation.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::synthesizer::SynthesisError;

/// A plan statement that the engine rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStatement {
    /// Position of the statement within the plan.
    pub index: usize,
    /// The statement text.
    pub sql: String,
}

impl fmt::Display for FailedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "statement #{} `{}`", self.index, self.sql)
    }
}

fn at_statement(statement: &Option<FailedStatement>) -> String {
    statement
        .as_ref()
        .map(|s| format!(" at {s}"))
        .unwrap_or_default()
}

fn see_artifact(artifact: &Option<PathBuf>) -> String {
    artifact
        .as_ref()
        .map(|p| format!("\nSee SQL: {}", p.display()))
        .unwrap_or_default()
}

/// Errors that can occur while synchronising a schema.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A database locator does not resolve to a readable file.
    #[error("Database not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Synthesis could not produce a safe plan for some table.
    #[error("ABORT: could not build a migration for table '{table}': {reason}{}", see_report(.report))]
    StructuralAbort {
        /// The offending table.
        table: String,
        /// Why the table cannot be migrated automatically.
        reason: String,
        /// Abort report written for the operator, if any.
        report: Option<PathBuf>,
    },

    /// The plan failed on the disposable copy. The target is untouched.
    #[error("ABORT: migration failed on test copy{}: {message}{}", at_statement(.statement), see_artifact(.artifact))]
    ValidationFailure {
        /// The statement that failed, when known.
        statement: Option<FailedStatement>,
        /// Engine or check message.
        message: String,
        /// Persisted plan artifact.
        artifact: Option<PathBuf>,
    },

    /// The plan failed on the real target after passing validation.
    #[error("ERROR applying migration to target{}: {message}\nBackup available: {}{}", at_statement(.statement), .backup.display(), see_artifact(.artifact))]
    ApplyFailure {
        /// The statement that failed, when known.
        statement: Option<FailedStatement>,
        /// Engine message.
        message: String,
        /// Backup taken immediately before the apply.
        backup: PathBuf,
        /// Persisted plan artifact.
        artifact: Option<PathBuf>,
    },

    /// An earlier post-apply integrity warning has not been acknowledged.
    #[error("Integrity hold in place ({}); inspect the target and acknowledge before running again", .0.display())]
    IntegrityHold(PathBuf),

    /// A cloned snapshot did not pass the integrity check.
    #[error("Snapshot {} failed integrity_check: {}", .path.display(), .messages.join("; "))]
    UnhealthySnapshot {
        /// The snapshot file.
        path: PathBuf,
        /// Integrity check output.
        messages: Vec<String>,
    },

    /// The operator interrupted the run before the next blocking stage.
    #[error("Cancelled by user")]
    Interrupted,

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (artifacts, backups, side files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn see_report(report: &Option<PathBuf>) -> String {
    report
        .as_ref()
        .map(|p| format!("\nSaved details to: {}", p.display()))
        .unwrap_or_default()
}

impl SyncError {
    /// Returns true for failures that guarantee the real target was not
    /// mutated.
    #[must_use]
    pub fn is_safe_abort(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::StructuralAbort { .. }
                | Self::ValidationFailure { .. }
                | Self::IntegrityHold(_)
        )
    }

    /// Attaches the persisted plan location to validation and apply failures.
    #[must_use]
    pub fn with_artifact(mut self, path: &Path) -> Self {
        match &mut self {
            Self::ValidationFailure { artifact, .. } | Self::ApplyFailure { artifact, .. } => {
                *artifact = Some(path.to_path_buf());
            }
            _ => {}
        }
        self
    }

    pub(crate) fn structural(error: &SynthesisError, report: Option<PathBuf>) -> Self {
        Self::StructuralAbort {
            table: error.table().to_string(),
            reason: error.to_string(),
            report,
        }
    }
}

/// Result type for synchronisation operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_abort_classification() {
        assert!(SyncError::NotFound(PathBuf::from("x.db")).is_safe_abort());
        assert!(SyncError::IntegrityHold(PathBuf::from(".hold")).is_safe_abort());
        assert!(!SyncError::Interrupted.is_safe_abort());

        let apply = SyncError::ApplyFailure {
            statement: None,
            message: "boom".to_string(),
            backup: PathBuf::from("versions/prod_backup.sqlitedb"),
            artifact: None,
        };
        assert!(!apply.is_safe_abort());
    }

    #[test]
    fn test_with_artifact_fills_validation_failure() {
        let err = SyncError::ValidationFailure {
            statement: Some(FailedStatement {
                index: 4,
                sql: "CREATE UNIQUE INDEX idx ON t(a)".to_string(),
            }),
            message: "UNIQUE constraint failed".to_string(),
            artifact: None,
        }
        .with_artifact(Path::new("/tmp/plan.sql"));

        let text = err.to_string();
        assert!(text.contains("statement #4"));
        assert!(text.contains("See SQL: /tmp/plan.sql"));
    }

    #[test]
    fn test_apply_failure_mentions_backup() {
        let err = SyncError::ApplyFailure {
            statement: None,
            message: "table already exists".to_string(),
            backup: PathBuf::from("versions/prod_backup_20240101_000000.sqlitedb"),
            artifact: Some(PathBuf::from("/tmp/plan.sql")),
        };
        let text = err.to_string();
        assert!(text.contains("Backup available: versions/prod_backup_20240101_000000.sqlitedb"));
        assert!(text.contains("See SQL: /tmp/plan.sql"));
    }
}
