//! Plan synthesis.
//!
//! [`MigrationSynthesizer::synthesize`] is a pure function of two snapshots
//! and the options: it either returns a complete [`MigrationPlan`] or a
//! [`SynthesisError`] naming the table that could not be handled. The
//! in-progress statement buffer is never visible to callers.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::compat::{self, Compatibility};
use crate::dialect::{PLAN_POSTAMBLE, PLAN_PREAMBLE, SENTINEL_SUFFIX, SqliteDialect};
use crate::plan::{
    MigrationPlan, PlanStatement, SchemaDiffClass, StatementKind, TableClassification,
};
use crate::schema::{SchemaObject, SchemaSnapshot, TableSchema};

/// Options for the synthesizer.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    /// Drop tables that exist only in the target.
    pub allow_drop: bool,
}

impl SynthesisOptions {
    /// Creates default options (non-destructive).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables dropping target-only tables.
    #[must_use]
    pub fn with_drop(mut self) -> Self {
        self.allow_drop = true;
        self
    }
}

/// Synthesis failures. Any of these aborts the whole run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// A rebuild would copy nothing.
    #[error("no common columns for table '{table}'; inspect both schemas and migrate it manually")]
    NoCommonColumns {
        /// The table.
        table: String,
    },
    /// The reference has no CREATE statement to build the table from.
    #[error("no CREATE statement in reference for table '{table}'")]
    MissingCreateStatement {
        /// The table.
        table: String,
    },
}

impl SynthesisError {
    /// The table that caused the abort.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::NoCommonColumns { table } | Self::MissingCreateStatement { table } => table,
        }
    }
}

/// Turns a target and a reference snapshot into a migration plan.
#[derive(Debug, Default)]
pub struct MigrationSynthesizer {
    options: SynthesisOptions,
    dialect: SqliteDialect,
}

impl MigrationSynthesizer {
    /// Creates a synthesizer with the given options.
    #[must_use]
    pub fn new(options: SynthesisOptions) -> Self {
        Self {
            options,
            dialect: SqliteDialect::new(),
        }
    }

    /// Compares `target` with `reference` and returns the plan that brings
    /// the target in line.
    ///
    /// Order: creations for new tables, then in-place or rebuild statements
    /// for shared tables (reference name order), then optional drops.
    pub fn synthesize(
        &self,
        target: &SchemaSnapshot,
        reference: &SchemaSnapshot,
    ) -> Result<MigrationPlan, SynthesisError> {
        let mut builder = PlanBuilder::default();
        for pragma in PLAN_PREAMBLE {
            builder.push(StatementKind::Pragma, pragma);
        }
        builder.push(StatementKind::Transaction, "BEGIN");

        for table in reference.tables().filter(|t| !target.contains(&t.name)) {
            self.emit_new(&mut builder, table)?;
        }

        for table in reference.tables() {
            if let Some(existing) = target.get_table(&table.name) {
                self.emit_existing(&mut builder, existing, table, target, reference)?;
            }
        }

        for table in target.tables().filter(|t| !reference.contains(&t.name)) {
            if self.options.allow_drop {
                builder.push(StatementKind::DropTable, self.dialect.drop_table_sql(&table.name));
                builder.classify(&table.name, SchemaDiffClass::MissingFromReference, Some("dropped"));
            } else {
                builder.classify(&table.name, SchemaDiffClass::MissingFromReference, Some("kept"));
            }
        }

        builder.push(StatementKind::Transaction, "COMMIT");
        for pragma in PLAN_POSTAMBLE {
            builder.push(StatementKind::Pragma, pragma);
        }

        Ok(builder.finish())
    }

    fn emit_new(&self, builder: &mut PlanBuilder, table: &TableSchema) -> Result<(), SynthesisError> {
        let create = self.require_create(table)?;
        builder.push(StatementKind::CreateTable, create);
        self.emit_objects(builder, table);
        builder.classify(&table.name, SchemaDiffClass::New, None);
        Ok(())
    }

    fn emit_existing(
        &self,
        builder: &mut PlanBuilder,
        target: &TableSchema,
        reference: &TableSchema,
        target_db: &SchemaSnapshot,
        reference_db: &SchemaSnapshot,
    ) -> Result<(), SynthesisError> {
        match compat::assess(&target.columns, &reference.columns, &reference.create_sql) {
            Compatibility::AddOnly { new_columns } => {
                let before = builder.len();
                self.emit_add_columns(builder, target, reference);
                self.reconcile_objects(builder, &target.indexes, &reference.indexes, ObjectKind::Index);
                self.reconcile_objects(builder, &target.triggers, &reference.triggers, ObjectKind::Trigger);

                if builder.len() == before {
                    builder.classify(&reference.name, SchemaDiffClass::Unchanged, None);
                } else {
                    debug!(table = %reference.name, new_columns, "Altering table in place");
                    builder.classify(&reference.name, SchemaDiffClass::AddOnly, None);
                }
                Ok(())
            }
            Compatibility::Rebuild(reason) => {
                warn!(table = %reference.name, reason = %reason, "Table requires rebuild");
                self.emit_rebuild(builder, target, reference, target_db, reference_db)?;
                builder.classify(&reference.name, SchemaDiffClass::Rebuild, Some(&reason.to_string()));
                Ok(())
            }
        }
    }

    fn emit_add_columns(&self, builder: &mut PlanBuilder, target: &TableSchema, reference: &TableSchema) {
        let existing: HashSet<String> = target
            .column_names()
            .map(str::to_ascii_lowercase)
            .collect();
        for column in reference
            .columns
            .iter()
            .filter(|c| !existing.contains(&c.name.to_ascii_lowercase()))
        {
            builder.push(
                StatementKind::AddColumn,
                self.dialect.add_column_sql(&reference.name, column),
            );
        }
    }

    /// Creates reference indexes/triggers missing from the target and
    /// replaces those whose definition changed. Target-only objects stay.
    fn reconcile_objects(
        &self,
        builder: &mut PlanBuilder,
        target: &[SchemaObject],
        reference: &[SchemaObject],
        kind: ObjectKind,
    ) {
        for object in reference {
            match target.iter().find(|t| t.name == object.name) {
                Some(existing) if existing.same_definition(object) => {}
                Some(_) => {
                    let drop = match kind {
                        ObjectKind::Index => self.dialect.drop_index_sql(&object.name),
                        ObjectKind::Trigger => self.dialect.drop_trigger_sql(&object.name),
                    };
                    builder.push(kind.drop_kind(), drop);
                    builder.push(kind.create_kind(), self.dialect.bare_statement(&object.sql));
                }
                None => builder.push(kind.create_kind(), self.dialect.bare_statement(&object.sql)),
            }
        }
    }

    fn emit_rebuild(
        &self,
        builder: &mut PlanBuilder,
        target: &TableSchema,
        reference: &TableSchema,
        target_db: &SchemaSnapshot,
        reference_db: &SchemaSnapshot,
    ) -> Result<(), SynthesisError> {
        let create = self.require_create(reference)?;

        // (target spelling, reference spelling); generated columns fill themselves.
        let common: Vec<(&str, &str)> = reference
            .columns
            .iter()
            .filter(|r| !r.generated)
            .filter_map(|r| {
                target
                    .columns
                    .iter()
                    .find(|t| t.name.eq_ignore_ascii_case(&r.name))
                    .map(|t| (t.name.as_str(), r.name.as_str()))
            })
            .collect();
        if common.is_empty() {
            return Err(SynthesisError::NoCommonColumns {
                table: reference.name.clone(),
            });
        }

        let sentinel = sentinel_name(&reference.name, target_db, reference_db);

        builder.push(
            StatementKind::Comment,
            format!("-- Rebuild table {} (data-preserving)", reference.name),
        );
        builder.push(
            StatementKind::RenameTable,
            self.dialect.rename_table_sql(&reference.name, &sentinel),
        );
        builder.push(StatementKind::CreateTable, create);
        builder.push(
            StatementKind::CopyRows,
            self.dialect.copy_rows_sql(&sentinel, &reference.name, &common),
        );
        builder.push(StatementKind::DropTable, self.dialect.drop_table_sql(&sentinel));
        self.emit_objects(builder, reference);
        Ok(())
    }

    fn emit_objects(&self, builder: &mut PlanBuilder, table: &TableSchema) {
        for index in &table.indexes {
            builder.push(StatementKind::CreateIndex, self.dialect.bare_statement(&index.sql));
        }
        for trigger in &table.triggers {
            builder.push(StatementKind::CreateTrigger, self.dialect.bare_statement(&trigger.sql));
        }
    }

    fn require_create<'a>(&self, table: &'a TableSchema) -> Result<&'a str, SynthesisError> {
        let create = self.dialect.bare_statement(&table.create_sql);
        if create.is_empty() {
            return Err(SynthesisError::MissingCreateStatement {
                table: table.name.clone(),
            });
        }
        Ok(create)
    }
}

/// `<table>__old`, or `<table>__old_N` when that name is taken.
fn sentinel_name(table: &str, target: &SchemaSnapshot, reference: &SchemaSnapshot) -> String {
    let taken = |name: &str| target.contains(name) || reference.contains(name);
    let base = format!("{table}{SENTINEL_SUFFIX}");
    if !taken(&base) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug, Clone, Copy)]
enum ObjectKind {
    Index,
    Trigger,
}

impl ObjectKind {
    fn create_kind(self) -> StatementKind {
        match self {
            Self::Index => StatementKind::CreateIndex,
            Self::Trigger => StatementKind::CreateTrigger,
        }
    }

    fn drop_kind(self) -> StatementKind {
        match self {
            Self::Index => StatementKind::DropIndex,
            Self::Trigger => StatementKind::DropTrigger,
        }
    }
}

#[derive(Debug, Default)]
struct PlanBuilder {
    statements: Vec<PlanStatement>,
    tables: Vec<TableClassification>,
}

impl PlanBuilder {
    fn push(&mut self, kind: StatementKind, sql: impl Into<String>) {
        self.statements.push(PlanStatement::new(kind, sql));
    }

    fn len(&self) -> usize {
        self.statements.len()
    }

    fn classify(&mut self, table: &str, class: SchemaDiffClass, detail: Option<&str>) {
        self.tables.push(TableClassification {
            table: table.to_string(),
            class,
            detail: detail.map(str::to_string),
        });
    }

    fn finish(self) -> MigrationPlan {
        MigrationPlan::new(self.statements, self.tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDescriptor;

    fn orders(create: &str) -> TableSchema {
        TableSchema::new("orders", create)
            .column(ColumnDescriptor::new("id", "INTEGER").primary_key(1))
            .column(ColumnDescriptor::new("amount", "REAL"))
    }

    fn target() -> SchemaSnapshot {
        SchemaSnapshot::new().table(orders(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, amount REAL)",
        ))
    }

    fn sqls(plan: &MigrationPlan, kind: StatementKind) -> Vec<String> {
        plan.of_kind(kind).map(|s| s.sql.clone()).collect()
    }

    #[test]
    fn test_identical_schemas_produce_empty_plan() {
        let plan = MigrationSynthesizer::default()
            .synthesize(&target(), &target())
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.classification("orders"), Some(SchemaDiffClass::Unchanged));
        assert_eq!(plan.statements().first().unwrap().sql, PLAN_PREAMBLE[0]);
        assert_eq!(plan.statements().last().unwrap().sql, "PRAGMA foreign_keys=ON");
    }

    #[test]
    fn test_new_table_and_added_column() {
        let reference = SchemaSnapshot::new()
            .table(
                orders(
                    "CREATE TABLE orders (id INTEGER PRIMARY KEY, amount REAL, \
                     currency TEXT NOT NULL DEFAULT 'USD')",
                )
                .column(
                    ColumnDescriptor::new("currency", "TEXT")
                        .not_null()
                        .default("'USD'"),
                ),
            )
            .table(
                TableSchema::new(
                    "audit_log",
                    "CREATE TABLE audit_log (id INTEGER PRIMARY KEY, ts TEXT, msg TEXT)",
                )
                .column(ColumnDescriptor::new("id", "INTEGER").primary_key(1))
                .column(ColumnDescriptor::new("ts", "TEXT"))
                .column(ColumnDescriptor::new("msg", "TEXT"))
                .index("idx_audit_ts", "CREATE INDEX idx_audit_ts ON audit_log(ts)"),
            );

        let plan = MigrationSynthesizer::default()
            .synthesize(&target(), &reference)
            .unwrap();

        assert_eq!(plan.classification("audit_log"), Some(SchemaDiffClass::New));
        assert_eq!(plan.classification("orders"), Some(SchemaDiffClass::AddOnly));
        assert_eq!(
            sqls(&plan, StatementKind::CreateTable),
            vec!["CREATE TABLE audit_log (id INTEGER PRIMARY KEY, ts TEXT, msg TEXT)"]
        );
        assert_eq!(
            sqls(&plan, StatementKind::CreateIndex),
            vec!["CREATE INDEX idx_audit_ts ON audit_log(ts)"]
        );
        assert_eq!(
            sqls(&plan, StatementKind::AddColumn),
            vec!["ALTER TABLE \"orders\" ADD COLUMN \"currency\" TEXT NOT NULL DEFAULT 'USD'"]
        );
        assert_eq!(plan.of_kind(StatementKind::RenameTable).count(), 0);

        // Creations come before alterations.
        let create_at = plan
            .statements()
            .iter()
            .position(|s| s.kind == StatementKind::CreateTable)
            .unwrap();
        let alter_at = plan
            .statements()
            .iter()
            .position(|s| s.kind == StatementKind::AddColumn)
            .unwrap();
        assert!(create_at < alter_at);
    }

    #[test]
    fn test_reordered_columns_rebuild() {
        let reference = SchemaSnapshot::new().table(
            TableSchema::new(
                "orders",
                "CREATE TABLE orders (amount REAL, id INTEGER PRIMARY KEY)",
            )
            .column(ColumnDescriptor::new("amount", "REAL"))
            .column(ColumnDescriptor::new("id", "INTEGER").primary_key(1))
            .trigger(
                "trg_orders",
                "CREATE TRIGGER trg_orders AFTER INSERT ON orders BEGIN SELECT 1; END",
            ),
        );

        let plan = MigrationSynthesizer::default()
            .synthesize(&target(), &reference)
            .unwrap();

        assert_eq!(plan.classification("orders"), Some(SchemaDiffClass::Rebuild));
        let body: Vec<(StatementKind, &str)> = plan
            .statements()
            .iter()
            .filter(|s| s.kind.is_change())
            .map(|s| (s.kind, s.sql.as_str()))
            .collect();
        assert_eq!(
            body,
            vec![
                (
                    StatementKind::RenameTable,
                    "ALTER TABLE \"orders\" RENAME TO \"orders__old\""
                ),
                (
                    StatementKind::CreateTable,
                    "CREATE TABLE orders (amount REAL, id INTEGER PRIMARY KEY)"
                ),
                (
                    StatementKind::CopyRows,
                    "INSERT INTO \"orders\" (\"amount\", \"id\") SELECT \"amount\", \"id\" FROM \"orders__old\""
                ),
                (StatementKind::DropTable, "DROP TABLE \"orders__old\""),
                (
                    StatementKind::CreateTrigger,
                    "CREATE TRIGGER trg_orders AFTER INSERT ON orders BEGIN SELECT 1; END"
                ),
            ]
        );
    }

    #[test]
    fn test_rebuild_copies_across_case_and_skips_generated() {
        let target = SchemaSnapshot::new().table(
            TableSchema::new("orders", "CREATE TABLE orders (id INTEGER PRIMARY KEY, Amount REAL)")
                .column(ColumnDescriptor::new("id", "INTEGER").primary_key(1))
                .column(ColumnDescriptor::new("Amount", "REAL")),
        );
        let reference = SchemaSnapshot::new().table(
            TableSchema::new(
                "orders",
                "CREATE TABLE orders (amount REAL, id INTEGER PRIMARY KEY, \
                 total REAL GENERATED ALWAYS AS (amount * 2) VIRTUAL)",
            )
            .column(ColumnDescriptor::new("amount", "REAL"))
            .column(ColumnDescriptor::new("id", "INTEGER").primary_key(1))
            .column(ColumnDescriptor::new("total", "REAL").generated()),
        );

        let plan = MigrationSynthesizer::default()
            .synthesize(&target, &reference)
            .unwrap();
        assert_eq!(plan.classification("orders"), Some(SchemaDiffClass::Rebuild));
        assert_eq!(
            sqls(&plan, StatementKind::CopyRows),
            vec!["INSERT INTO \"orders\" (\"amount\", \"id\") SELECT \"Amount\", \"id\" FROM \"orders__old\""]
        );
    }

    #[test]
    fn test_case_only_difference_adds_nothing() {
        let target = SchemaSnapshot::new().table(
            TableSchema::new("orders", "CREATE TABLE orders (ID INTEGER PRIMARY KEY, Amount REAL)")
                .column(ColumnDescriptor::new("ID", "INTEGER").primary_key(1))
                .column(ColumnDescriptor::new("Amount", "REAL")),
        );
        let plan = MigrationSynthesizer::default()
            .synthesize(&target, &self::target())
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.classification("orders"), Some(SchemaDiffClass::Unchanged));
    }

    #[test]
    fn test_no_common_columns_aborts() {
        let reference = SchemaSnapshot::new().table(
            TableSchema::new("orders", "CREATE TABLE orders (sku TEXT, qty INTEGER)")
                .column(ColumnDescriptor::new("sku", "TEXT"))
                .column(ColumnDescriptor::new("qty", "INTEGER")),
        );

        let err = MigrationSynthesizer::default()
            .synthesize(&target(), &reference)
            .unwrap_err();
        assert_eq!(
            err,
            SynthesisError::NoCommonColumns {
                table: "orders".to_string()
            }
        );
        assert_eq!(err.table(), "orders");
    }

    #[test]
    fn test_target_only_tables_kept_unless_drop_allowed() {
        let target = target().table(
            TableSchema::new("legacy", "CREATE TABLE legacy (x)").column(ColumnDescriptor::new("x", "")),
        );
        let reference = self::target();

        let kept = MigrationSynthesizer::default()
            .synthesize(&target, &reference)
            .unwrap();
        assert!(kept.is_empty());
        assert_eq!(
            kept.classification("legacy"),
            Some(SchemaDiffClass::MissingFromReference)
        );

        let dropped = MigrationSynthesizer::new(SynthesisOptions::new().with_drop())
            .synthesize(&target, &reference)
            .unwrap();
        assert_eq!(
            sqls(&dropped, StatementKind::DropTable),
            vec!["DROP TABLE \"legacy\""]
        );
        // Drops sit right before COMMIT.
        let statements = dropped.statements();
        let drop_at = statements
            .iter()
            .position(|s| s.kind == StatementKind::DropTable)
            .unwrap();
        assert_eq!(statements[drop_at + 1].sql, "COMMIT");
    }

    #[test]
    fn test_sentinel_avoids_existing_names() {
        let target = target().table(TableSchema::new("orders__old", "CREATE TABLE orders__old (x)"));
        let reference = SchemaSnapshot::new().table(
            TableSchema::new("orders", "CREATE TABLE orders (amount REAL, id INTEGER PRIMARY KEY)")
                .column(ColumnDescriptor::new("amount", "REAL"))
                .column(ColumnDescriptor::new("id", "INTEGER").primary_key(1)),
        );
        let plan = MigrationSynthesizer::default()
            .synthesize(&target, &reference)
            .unwrap();
        assert_eq!(
            sqls(&plan, StatementKind::RenameTable),
            vec!["ALTER TABLE \"orders\" RENAME TO \"orders__old_1\""]
        );
    }

    #[test]
    fn test_changed_index_is_replaced_in_place() {
        let target = SchemaSnapshot::new().table(
            orders("CREATE TABLE orders (id INTEGER PRIMARY KEY, amount REAL)")
                .index("idx_amount", "CREATE INDEX idx_amount ON orders(amount)"),
        );
        let reference = SchemaSnapshot::new().table(
            orders("CREATE TABLE orders (id INTEGER PRIMARY KEY, amount REAL)")
                .index("idx_amount", "CREATE INDEX idx_amount ON orders(amount DESC)")
                .index("idx_id_amount", "CREATE INDEX idx_id_amount ON orders(id, amount)"),
        );

        let plan = MigrationSynthesizer::default()
            .synthesize(&target, &reference)
            .unwrap();
        assert_eq!(plan.classification("orders"), Some(SchemaDiffClass::AddOnly));
        assert_eq!(sqls(&plan, StatementKind::DropIndex), vec!["DROP INDEX \"idx_amount\""]);
        assert_eq!(
            sqls(&plan, StatementKind::CreateIndex),
            vec![
                "CREATE INDEX idx_amount ON orders(amount DESC)",
                "CREATE INDEX idx_id_amount ON orders(id, amount)"
            ]
        );
    }

    #[test]
    fn test_missing_create_statement_aborts() {
        let reference = SchemaSnapshot::new().table(TableSchema::new("ghost", ""));
        let err = MigrationSynthesizer::default()
            .synthesize(&SchemaSnapshot::new(), &reference)
            .unwrap_err();
        assert!(matches!(err, SynthesisError::MissingCreateStatement { .. }));
    }
}
