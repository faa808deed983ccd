//! Schema snapshot types.
//!
//! These are immutable point-in-time descriptions of what a database
//! contains. They are read fresh on every run and never cached.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One column of a table, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// 0-based position in declaration order.
    pub ordinal: usize,
    /// Column name, unique within the table.
    pub name: String,
    /// Declared type, verbatim (may be empty).
    pub declared_type: String,
    /// Whether the column is declared NOT NULL.
    pub not_null: bool,
    /// Default value literal, verbatim.
    pub default_value: Option<String>,
    /// Position within the primary key (0 = not part of it).
    pub primary_key: u32,
    /// Whether the column is `GENERATED ALWAYS AS`, stored or virtual.
    #[serde(default)]
    pub generated: bool,
}

impl ColumnDescriptor {
    /// Creates a nullable column without default. The ordinal is assigned
    /// when the column is added to a [`TableSchema`].
    #[must_use]
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            ordinal: 0,
            name: name.into(),
            declared_type: declared_type.into(),
            not_null: false,
            default_value: None,
            primary_key: 0,
            generated: false,
        }
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Sets the default literal.
    #[must_use]
    pub fn default(mut self, literal: impl Into<String>) -> Self {
        self.default_value = Some(literal.into());
        self
    }

    /// Sets the primary-key position (1-based).
    #[must_use]
    pub fn primary_key(mut self, position: u32) -> Self {
        self.primary_key = position;
        self
    }

    /// Marks the column as generated.
    #[must_use]
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Returns whether the column participates in the primary key.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.primary_key != 0
    }

    /// Returns the default literal if it is present and non-blank.
    #[must_use]
    pub fn default_literal(&self) -> Option<&str> {
        self.default_value
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}

/// A named schema object (index or trigger) with its creation statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaObject {
    /// Object name.
    pub name: String,
    /// Verbatim creation statement.
    pub sql: String,
}

impl SchemaObject {
    /// Creates a schema object.
    #[must_use]
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// Returns whether both objects have the same statement, ignoring
    /// whitespace layout.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.sql.split_whitespace().eq(other.sql.split_whitespace())
    }
}

/// Complete description of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Verbatim CREATE TABLE statement.
    pub create_sql: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDescriptor>,
    /// Index creation statements.
    pub indexes: Vec<SchemaObject>,
    /// Trigger creation statements.
    pub triggers: Vec<SchemaObject>,
}

impl TableSchema {
    /// Creates a table schema with no columns.
    #[must_use]
    pub fn new(name: impl Into<String>, create_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create_sql: create_sql.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// Appends a column, assigning the next ordinal.
    #[must_use]
    pub fn column(mut self, mut column: ColumnDescriptor) -> Self {
        column.ordinal = self.columns.len();
        self.columns.push(column);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.indexes.push(SchemaObject::new(name, sql));
        self
    }

    /// Adds a trigger.
    #[must_use]
    pub fn trigger(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.triggers.push(SchemaObject::new(name, sql));
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Checks that ordinals run 0, 1, 2, ... without gaps.
    #[must_use]
    pub fn has_contiguous_ordinals(&self) -> bool {
        self.columns.iter().enumerate().all(|(i, c)| c.ordinal == i)
    }
}

/// All user tables of one database, keyed and ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table to the snapshot.
    #[must_use]
    pub fn table(mut self, table: TableSchema) -> Self {
        self.insert(table);
        self
    }

    /// Inserts a table, replacing any table of the same name.
    pub fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Returns whether a table exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Returns table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Returns tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if there are no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builder_assigns_ordinals() {
        let table = TableSchema::new("orders", "CREATE TABLE orders (id INTEGER, amount REAL)")
            .column(ColumnDescriptor::new("id", "INTEGER").primary_key(1))
            .column(ColumnDescriptor::new("amount", "REAL"));

        assert_eq!(table.columns[0].ordinal, 0);
        assert_eq!(table.columns[1].ordinal, 1);
        assert!(table.has_contiguous_ordinals());
        assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["id", "amount"]);
    }

    #[test]
    fn test_default_literal_ignores_blank() {
        let blank = ColumnDescriptor::new("c", "TEXT").default("  ");
        assert_eq!(blank.default_literal(), None);

        let usd = ColumnDescriptor::new("c", "TEXT").default("'USD'");
        assert_eq!(usd.default_literal(), Some("'USD'"));
    }

    #[test]
    fn test_snapshot_names_are_sorted() {
        let snapshot = SchemaSnapshot::new()
            .table(TableSchema::new("orders", ""))
            .table(TableSchema::new("audit_log", ""));

        assert_eq!(
            snapshot.table_names().collect::<Vec<_>>(),
            vec!["audit_log", "orders"]
        );
        assert!(snapshot.contains("orders"));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_same_definition_ignores_layout() {
        let a = SchemaObject::new("idx", "CREATE INDEX idx ON t(a)");
        let b = SchemaObject::new("idx", "CREATE  INDEX idx\n  ON t(a)");
        let c = SchemaObject::new("idx", "CREATE INDEX idx ON t(b)");
        assert!(a.same_definition(&b));
        assert!(!a.same_definition(&c));
    }
}
