//! Schema introspection.
//!
//! Reads table, column, index and trigger metadata from a live connection
//! through `sqlite_master` and `pragma_table_xinfo`. Generated columns are
//! kept; hidden virtual-table columns are not. Nothing is cached: every run
//! reads fresh.

use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use crate::error::Result;
use crate::schema::{ColumnDescriptor, SchemaObject, SchemaSnapshot, TableSchema};

type ColumnRow = (String, Option<String>, i64, Option<String>, i64, i64);

/// `hidden` value of a column hidden by a virtual table.
const HIDDEN_VIRTUAL: i64 = 1;

/// Reads schema metadata from one connection.
pub struct SchemaReader<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SchemaReader<'c> {
    /// Wraps a connection.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// User tables, sorted by name. Engine-internal `sqlite_*` tables are
    /// excluded.
    pub async fn table_names(&mut self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             ORDER BY name",
        )
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(names)
    }

    /// Reads one table: its CREATE statement, columns in ordinal order, and
    /// the explicit indexes and triggers attached to it.
    pub async fn table(&mut self, name: &str) -> Result<TableSchema> {
        let create_sql = sqlx::query_scalar::<_, Option<String>>(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(name)
        .fetch_optional(&mut *self.conn)
        .await?
        .flatten();

        let rows: Vec<ColumnRow> = sqlx::query_as(
            "SELECT name, type, \"notnull\", dflt_value, pk, hidden \
             FROM pragma_table_xinfo(?1) ORDER BY cid",
        )
        .bind(name)
        .fetch_all(&mut *self.conn)
        .await?;

        // xinfo numbers hidden columns too, so ordinals are recounted.
        let columns = rows
            .into_iter()
            .filter(|row| row.5 != HIDDEN_VIRTUAL)
            .enumerate()
            .map(
                |(ordinal, (column, declared_type, not_null, default_value, pk, hidden))| {
                    ColumnDescriptor {
                        ordinal,
                        name: column,
                        declared_type: declared_type.unwrap_or_default(),
                        not_null: not_null != 0,
                        default_value,
                        primary_key: u32::try_from(pk).unwrap_or_default(),
                        generated: hidden > HIDDEN_VIRTUAL,
                    }
                },
            )
            .collect();

        let indexes = self.objects("index", name).await?;
        let triggers = self.objects("trigger", name).await?;

        debug!(table = %name, indexes = indexes.len(), triggers = triggers.len(), "Read table");

        Ok(TableSchema {
            name: name.to_string(),
            create_sql: create_sql.unwrap_or_default(),
            columns,
            indexes,
            triggers,
        })
    }

    /// Reads every user table into a snapshot.
    pub async fn snapshot(&mut self) -> Result<SchemaSnapshot> {
        let mut snapshot = SchemaSnapshot::new();
        for name in self.table_names().await? {
            let table = self.table(&name).await?;
            snapshot.insert(table);
        }
        Ok(snapshot)
    }

    async fn objects(&mut self, kind: &str, table: &str) -> Result<Vec<SchemaObject>> {
        // Auto-indexes have no SQL and are recreated by their table.
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = ?1 AND tbl_name = ?2 AND sql IS NOT NULL \
             ORDER BY rowid",
        )
        .bind(kind)
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, sql)| SchemaObject::new(name, sql))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::{ConnectOptions, Connection};
    use sqlx::sqlite::SqliteConnectOptions;

    use super::*;

    async fn memory_db(sql: &str) -> SqliteConnection {
        let mut conn = SqliteConnectOptions::new()
            .in_memory(true)
            .connect()
            .await
            .unwrap();
        sqlx::raw_sql(sql).execute(&mut conn).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_reads_columns_in_ordinal_order() {
        let mut conn = memory_db(
            "CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                amount REAL NOT NULL DEFAULT 0,
                note TEXT
            );",
        )
        .await;

        let table = SchemaReader::new(&mut conn).table("orders").await.unwrap();
        let names: Vec<&str> = table.column_names().collect();
        assert_eq!(names, vec!["id", "amount", "note"]);
        assert!(table.has_contiguous_ordinals());

        let id = table.get_column("id").unwrap();
        assert_eq!(id.primary_key, 1);
        let amount = table.get_column("amount").unwrap();
        assert!(amount.not_null);
        assert_eq!(amount.default_literal(), Some("0"));
        assert_eq!(table.get_column("note").unwrap().declared_type, "TEXT");
        assert!(table.create_sql.starts_with("CREATE TABLE orders"));

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_generated_columns_are_listed() {
        let mut conn = memory_db(
            "CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                amount REAL,
                total REAL GENERATED ALWAYS AS (amount * 2) VIRTUAL,
                taxed REAL AS (amount * 1.2) STORED,
                note TEXT
            );",
        )
        .await;

        let table = SchemaReader::new(&mut conn).table("orders").await.unwrap();
        let names: Vec<&str> = table.column_names().collect();
        assert_eq!(names, vec!["id", "amount", "total", "taxed", "note"]);
        assert!(table.has_contiguous_ordinals());

        let generated: Vec<&str> = table
            .columns
            .iter()
            .filter(|c| c.generated)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(generated, vec!["total", "taxed"]);

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_skips_internal_tables_and_auto_indexes() {
        let mut conn = memory_db(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT UNIQUE);
             CREATE INDEX idx_users_email ON users(email);
             CREATE TRIGGER trg_users AFTER INSERT ON users BEGIN SELECT 1; END;
             CREATE TABLE audit (msg TEXT);",
        )
        .await;

        let snapshot = SchemaReader::new(&mut conn).snapshot().await.unwrap();
        let names: Vec<&str> = snapshot.table_names().collect();
        assert_eq!(names, vec!["audit", "users"]);

        let users = snapshot.get_table("users").unwrap();
        assert_eq!(users.indexes.len(), 1);
        assert_eq!(users.indexes[0].name, "idx_users_email");
        assert_eq!(users.triggers.len(), 1);
        assert_eq!(users.triggers[0].name, "trg_users");

        conn.close().await.unwrap();
    }
}
