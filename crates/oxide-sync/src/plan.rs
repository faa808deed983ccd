//! Migration plan representation.
//!
//! A [`MigrationPlan`] only exists fully synthesized: it is built by the
//! synthesizer and is read-only for everybody else.

use std::fmt;

use serde::Serialize;

/// What a plan statement does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Connection setting.
    Pragma,
    /// BEGIN / COMMIT.
    Transaction,
    /// CREATE TABLE.
    CreateTable,
    /// ALTER TABLE ... ADD COLUMN.
    AddColumn,
    /// ALTER TABLE ... RENAME TO.
    RenameTable,
    /// INSERT ... SELECT during a rebuild.
    CopyRows,
    /// DROP TABLE.
    DropTable,
    /// DROP INDEX.
    DropIndex,
    /// DROP TRIGGER.
    DropTrigger,
    /// CREATE INDEX.
    CreateIndex,
    /// CREATE TRIGGER.
    CreateTrigger,
    /// SQL comment, not executed.
    Comment,
}

impl StatementKind {
    /// Returns true for statements that change structure or move data.
    #[must_use]
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Pragma | Self::Transaction | Self::Comment)
    }
}

/// One statement of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStatement {
    /// Statement kind.
    pub kind: StatementKind,
    /// Statement text without a trailing semicolon.
    pub sql: String,
}

impl PlanStatement {
    /// Creates a statement.
    #[must_use]
    pub fn new(kind: StatementKind, sql: impl Into<String>) -> Self {
        Self {
            kind,
            sql: sql.into(),
        }
    }

    /// Returns the statement as it appears in a script.
    #[must_use]
    pub fn to_script_line(&self) -> String {
        if self.kind == StatementKind::Comment {
            self.sql.clone()
        } else {
            format!("{};", self.sql)
        }
    }
}

/// Per-table classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaDiffClass {
    /// Only in the reference; created.
    New,
    /// In both; columns appended in place.
    AddOnly,
    /// In both; recreated with a data copy.
    Rebuild,
    /// In both; nothing to do.
    Unchanged,
    /// Only in the target; kept unless dropping is allowed.
    MissingFromReference,
}

impl fmt::Display for SchemaDiffClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::AddOnly => "add-only",
            Self::Rebuild => "rebuild",
            Self::Unchanged => "unchanged",
            Self::MissingFromReference => "missing-from-reference",
        };
        f.write_str(s)
    }
}

/// Classification record for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableClassification {
    /// Table name.
    pub table: String,
    /// Classification.
    pub class: SchemaDiffClass,
    /// Human-readable detail (rebuild reason, drop decision).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// An ordered, immutable statement plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    statements: Vec<PlanStatement>,
    tables: Vec<TableClassification>,
}

impl MigrationPlan {
    pub(crate) fn new(statements: Vec<PlanStatement>, tables: Vec<TableClassification>) -> Self {
        Self { statements, tables }
    }

    /// All statements in order, including pragmas and comments.
    #[must_use]
    pub fn statements(&self) -> &[PlanStatement] {
        &self.statements
    }

    /// Statements to send to the engine, with their plan positions.
    pub fn executable(&self) -> impl Iterator<Item = (usize, &PlanStatement)> {
        self.statements
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind != StatementKind::Comment)
    }

    /// Per-table classification, in synthesis order.
    #[must_use]
    pub fn classifications(&self) -> &[TableClassification] {
        &self.tables
    }

    /// Classification of one table.
    #[must_use]
    pub fn classification(&self, table: &str) -> Option<SchemaDiffClass> {
        self.tables
            .iter()
            .find(|t| t.table == table)
            .map(|t| t.class)
    }

    /// Number of statements that change structure or move data.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.statements.iter().filter(|s| s.kind.is_change()).count()
    }

    /// True when the plan holds nothing but its bracketing statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// Statements of a given kind.
    pub fn of_kind(&self, kind: StatementKind) -> impl Iterator<Item = &PlanStatement> {
        self.statements.iter().filter(move |s| s.kind == kind)
    }

    /// Renders the plan as a runnable SQL script.
    #[must_use]
    pub fn render(&self) -> String {
        let mut script = String::new();
        for statement in &self.statements {
            script.push_str(&statement.to_script_line());
            script.push('\n');
        }
        script
    }

    /// Serializes the plan as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bracketed(body: Vec<PlanStatement>) -> MigrationPlan {
        let mut statements = vec![
            PlanStatement::new(StatementKind::Pragma, "PRAGMA foreign_keys=OFF"),
            PlanStatement::new(StatementKind::Transaction, "BEGIN"),
        ];
        statements.extend(body);
        statements.push(PlanStatement::new(StatementKind::Transaction, "COMMIT"));
        statements.push(PlanStatement::new(StatementKind::Pragma, "PRAGMA foreign_keys=ON"));
        MigrationPlan::new(statements, Vec::new())
    }

    #[test]
    fn test_bracket_only_plan_is_empty() {
        let plan = bracketed(vec![PlanStatement::new(
            StatementKind::Comment,
            "-- nothing here",
        )]);
        assert!(plan.is_empty());
        assert_eq!(plan.executable().count(), 4);
    }

    #[test]
    fn test_render_terminates_statements() {
        let plan = bracketed(vec![
            PlanStatement::new(StatementKind::Comment, "-- Rebuild table t"),
            PlanStatement::new(StatementKind::DropTable, "DROP TABLE \"t\""),
        ]);
        assert!(!plan.is_empty());
        assert_eq!(plan.change_count(), 1);
        assert_eq!(
            plan.render(),
            "PRAGMA foreign_keys=OFF;\nBEGIN;\n-- Rebuild table t\nDROP TABLE \"t\";\nCOMMIT;\nPRAGMA foreign_keys=ON;\n"
        );
    }

    #[test]
    fn test_executable_skips_comments_but_keeps_positions() {
        let plan = bracketed(vec![
            PlanStatement::new(StatementKind::Comment, "-- note"),
            PlanStatement::new(StatementKind::DropTable, "DROP TABLE \"t\""),
        ]);
        let positions: Vec<usize> = plan.executable().map(|(i, _)| i).collect();
        assert_eq!(positions, vec![0, 1, 3, 4, 5]);
    }

    #[test]
    fn test_json_uses_snake_case_kinds() {
        let plan = MigrationPlan::new(
            vec![PlanStatement::new(StatementKind::AddColumn, "ALTER TABLE ...")],
            vec![TableClassification {
                table: "orders".to_string(),
                class: SchemaDiffClass::AddOnly,
                detail: None,
            }],
        );
        let json = plan.to_json().unwrap();
        assert!(json.contains("\"add_column\""));
        assert!(json.contains("\"add_only\""));
        assert!(!json.contains("detail"));
    }
}
