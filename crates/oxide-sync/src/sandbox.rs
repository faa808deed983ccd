//! Dry-run validation on a disposable copy.
//!
//! The plan is executed against a fresh copy of the target in a private
//! temporary directory, then the copy is integrity-checked and compared
//! with the reference. Only a plan that passes all three comes out as a
//! [`ValidatedPlan`], which is the only thing the apply engine accepts.
//! The copy is discarded whatever the outcome.

use sqlx::Connection;
use sqlx::sqlite::SqliteConnection;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::plan::MigrationPlan;
use crate::reader::SchemaReader;
use crate::schema::SchemaSnapshot;
use crate::target::{self, IntegrityReport, MigrationTarget};

/// A plan that executed cleanly on a copy of the target.
#[derive(Debug)]
pub struct ValidatedPlan<'p> {
    plan: &'p MigrationPlan,
    report: IntegrityReport,
}

impl<'p> ValidatedPlan<'p> {
    /// The validated plan.
    #[must_use]
    pub fn plan(&self) -> &'p MigrationPlan {
        self.plan
    }

    /// Integrity report of the sandbox copy after the plan ran.
    #[must_use]
    pub fn report(&self) -> &IntegrityReport {
        &self.report
    }
}

/// Validates plans against copies of one target.
pub struct ValidationSandbox<'t, T> {
    target: &'t T,
}

impl<'t, T: MigrationTarget> ValidationSandbox<'t, T> {
    /// Creates a sandbox for `target`.
    pub fn new(target: &'t T) -> Self {
        Self { target }
    }

    /// Runs `plan` on a fresh copy of the target.
    ///
    /// Fails with [`SyncError::ValidationFailure`] if a statement is
    /// rejected, the copy fails its integrity check, or a reference table
    /// ends up with a different column order than the reference.
    pub async fn validate<'p>(
        &self,
        plan: &'p MigrationPlan,
        reference: &SchemaSnapshot,
    ) -> Result<ValidatedPlan<'p>> {
        let workdir = tempfile::Builder::new().prefix("oxide-sync-").tempdir()?;
        let (copy, mut conn) = self.target.open_writable_copy(workdir.path()).await?;
        if same_file(&copy, self.target.locator()) {
            return Err(failure("sandbox copy resolves to the target itself"));
        }
        info!(copy = %copy.display(), "Testing migration on a disposable copy");

        let outcome = exercise(&mut conn, plan, reference).await;
        // Closing rolls back whatever a failed statement left open.
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Closing sandbox connection failed");
        }
        drop(workdir);

        let report = outcome?;
        info!("Migration validated on test copy");
        Ok(ValidatedPlan { plan, report })
    }
}

async fn exercise(
    conn: &mut SqliteConnection,
    plan: &MigrationPlan,
    reference: &SchemaSnapshot,
) -> Result<IntegrityReport> {
    if let Err(e) = target::execute_plan(conn, plan).await {
        return Err(SyncError::ValidationFailure {
            statement: Some(e.statement),
            message: e.message,
            artifact: None,
        });
    }

    let report = target::integrity_check(conn).await?;
    if !report.is_healthy() {
        return Err(failure(format!(
            "integrity_check failed on test copy: {}",
            report.summary()
        )));
    }

    let migrated = SchemaReader::new(conn).snapshot().await?;
    check_convergence(&migrated, reference)?;
    Ok(report)
}

/// Every reference table must exist on `migrated` with the same column order.
/// Names compare ASCII case-insensitively.
fn check_convergence(migrated: &SchemaSnapshot, reference: &SchemaSnapshot) -> Result<()> {
    for expected in reference.tables() {
        let Some(actual) = migrated.get_table(&expected.name) else {
            return Err(failure(format!(
                "table '{}' is missing after migration",
                expected.name
            )));
        };
        let converged = actual.columns.len() == expected.columns.len()
            && actual
                .column_names()
                .zip(expected.column_names())
                .all(|(a, e)| a.eq_ignore_ascii_case(e));
        if !converged {
            let found: Vec<&str> = actual.column_names().collect();
            let wanted: Vec<&str> = expected.column_names().collect();
            return Err(failure(format!(
                "table '{}' did not converge: expected columns {wanted:?}, found {found:?}",
                expected.name
            )));
        }
    }
    Ok(())
}

fn failure(message: impl Into<String>) -> SyncError {
    SyncError::ValidationFailure {
        statement: None,
        message: message.into(),
        artifact: None,
    }
}

fn same_file(a: &std::path::Path, b: &std::path::Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, TableSchema};

    fn orders(columns: &[&str]) -> TableSchema {
        columns.iter().fold(
            TableSchema::new("orders", "CREATE TABLE orders (...)"),
            |table, name| table.column(ColumnDescriptor::new(*name, "")),
        )
    }

    #[test]
    fn test_convergence_accepts_extra_target_tables() {
        let migrated = SchemaSnapshot::new()
            .table(orders(&["id", "amount"]))
            .table(TableSchema::new("legacy", "CREATE TABLE legacy (x)"));
        let reference = SchemaSnapshot::new().table(orders(&["id", "amount"]));
        check_convergence(&migrated, &reference).unwrap();
    }

    #[test]
    fn test_convergence_rejects_column_order() {
        let migrated = SchemaSnapshot::new().table(orders(&["amount", "id"]));
        let reference = SchemaSnapshot::new().table(orders(&["id", "amount"]));
        let err = check_convergence(&migrated, &reference).unwrap_err();
        assert!(matches!(err, SyncError::ValidationFailure { statement: None, .. }));
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn test_convergence_ignores_name_case() {
        let migrated = SchemaSnapshot::new().table(orders(&["id", "Amount"]));
        let reference = SchemaSnapshot::new().table(orders(&["id", "amount"]));
        check_convergence(&migrated, &reference).unwrap();

        let shorter = SchemaSnapshot::new().table(orders(&["id"]));
        assert!(check_convergence(&shorter, &reference).is_err());
    }

    #[test]
    fn test_convergence_rejects_missing_table() {
        let reference = SchemaSnapshot::new().table(orders(&["id"]));
        let err = check_convergence(&SchemaSnapshot::new(), &reference).unwrap_err();
        assert!(err.to_string().contains("missing after migration"));
    }
}
