//! SQLite statement rendering.
//!
//! SQLite has limited ALTER TABLE support: columns can only be appended, so
//! every other change uses the table recreation strategy (rename the old
//! table away, create the new one, copy rows, drop the old one).

use crate::schema::ColumnDescriptor;

/// Pragmas and transaction markers that open a plan.
pub const PLAN_PREAMBLE: [&str; 3] = [
    "PRAGMA busy_timeout=5000",
    "PRAGMA foreign_keys=OFF",
    // Keeps RENAME from rewriting other tables' REFERENCES onto the sentinel.
    "PRAGMA legacy_alter_table=ON",
];

/// Pragmas that close a plan, after COMMIT.
pub const PLAN_POSTAMBLE: [&str; 2] = ["PRAGMA legacy_alter_table=OFF", "PRAGMA foreign_keys=ON"];

/// Suffix used for the renamed original during a rebuild.
pub const SENTINEL_SUFFIX: &str = "__old";

/// SQLite statement builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Quotes an identifier, doubling embedded quotes.
    #[must_use]
    pub fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes a string literal, doubling embedded quotes.
    #[must_use]
    pub fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Strips trailing semicolons and whitespace from a stored statement.
    #[must_use]
    pub fn bare_statement<'a>(&self, sql: &'a str) -> &'a str {
        sql.trim().trim_end_matches(';').trim_end()
    }

    /// `ALTER TABLE t ADD COLUMN ...`, limited to what SQLite accepts when
    /// appending: type, NOT NULL only together with a default, and the
    /// default literal verbatim.
    #[must_use]
    pub fn add_column_sql(&self, table: &str, column: &ColumnDescriptor) -> String {
        let mut parts = vec![self.quote_identifier(&column.name)];
        if !column.declared_type.is_empty() {
            parts.push(column.declared_type.clone());
        }
        if let Some(default) = column.default_literal() {
            if column.not_null {
                parts.push("NOT NULL".to_string());
            }
            parts.push(format!("DEFAULT {default}"));
        }

        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            parts.join(" ")
        )
    }

    /// `ALTER TABLE old RENAME TO new`.
    #[must_use]
    pub fn rename_table_sql(&self, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        )
    }

    /// `INSERT INTO to (cols) SELECT cols FROM from`. Each pair is the
    /// source column's spelling followed by the destination's.
    #[must_use]
    pub fn copy_rows_sql(&self, from: &str, to: &str, columns: &[(&str, &str)]) -> String {
        let (source, destination): (Vec<String>, Vec<String>) = columns
            .iter()
            .map(|(s, d)| (self.quote_identifier(s), self.quote_identifier(d)))
            .unzip();
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.quote_identifier(to),
            destination.join(", "),
            source.join(", "),
            self.quote_identifier(from)
        )
    }

    /// `DROP TABLE name`.
    #[must_use]
    pub fn drop_table_sql(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(name))
    }

    /// `DROP INDEX name`.
    #[must_use]
    pub fn drop_index_sql(&self, name: &str) -> String {
        format!("DROP INDEX {}", self.quote_identifier(name))
    }

    /// `DROP TRIGGER name`.
    #[must_use]
    pub fn drop_trigger_sql(&self, name: &str) -> String {
        format!("DROP TRIGGER {}", self.quote_identifier(name))
    }

    /// `VACUUM INTO 'path'`.
    #[must_use]
    pub fn vacuum_into_sql(&self, path: &str) -> String {
        format!("VACUUM INTO {}", self.quote_literal(path))
    }
}
