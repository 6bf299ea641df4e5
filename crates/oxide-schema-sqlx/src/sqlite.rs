//! SQLite adapter.

use std::collections::BTreeMap;
use std::str::FromStr;

use oxide_schema_core::adapter::Adapter;
use oxide_schema_core::dialect::SqliteDialect;
use oxide_schema_core::introspect::{RawCatalog, RawColumn, RawForeignKey, RawIndex, RawTable, TableFilter};
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};

/// A SQLite database reached through sqlx.
#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    pool: SqlitePool,
    dialect: SqliteDialect,
}

/// Name, type, not-null flag, default and primary key position.
type ColumnRow = (String, String, i64, Option<String>, i64);

/// Constraint id, column position, target table, source and target columns, actions.
type ForeignKeyRow = (i64, i64, String, String, Option<String>, String, String);

/// Name recovered from the table's DDL for a foreign key.
struct DeclaredForeignKey {
    name: String,
    columns: Vec<String>,
    deferrable: Option<String>,
}

impl SqliteAdapter {
    /// Opens a database, creating the file if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool. The pool should hold a single connection.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            dialect: SqliteDialect::new(),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn read_table(&self, name: &str, sql: &str) -> Result<RawTable> {
        let mut table = RawTable {
            name: name.to_string(),
            ..RawTable::default()
        };

        let rows: Vec<ColumnRow> = sqlx::query_as(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let mut primary_key: Vec<(i64, String)> = rows
            .iter()
            .filter(|row| row.4 > 0)
            .map(|row| (row.4, row.0.clone()))
            .collect();
        primary_key.sort();
        table.primary_key = primary_key.into_iter().map(|(_, c)| c).collect();
        let autoincrement = Regex::new(r"(?i)\bAUTOINCREMENT\b")?.is_match(sql);

        for (column, native_type, not_null, default, pk) in rows {
            let rowid_alias = autoincrement
                && pk > 0
                && table.primary_key.len() == 1
                && native_type.eq_ignore_ascii_case("integer");
            table.columns.push(RawColumn {
                name: column,
                // A rowid alias holds 64-bit values whatever its declared type.
                native_type: if rowid_alias {
                    "bigint".to_string()
                } else {
                    native_type
                },
                nullable: not_null == 0,
                default,
                auto_increment: rowid_alias,
                comment: None,
            });
        }

        table.indexes = self.read_indexes(name).await?;
        table.foreign_keys = self.read_foreign_keys(name, sql).await?;
        Ok(table)
    }

    async fn read_indexes(&self, table: &str) -> Result<Vec<RawIndex>> {
        let list: Vec<(String, i64, String, i64)> = sqlx::query_as(
            "SELECT name, \"unique\", origin, partial FROM pragma_index_list(?) ORDER BY name",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let where_clause = Regex::new(r"(?is)\)\s*WHERE\s+(.+?)\s*;?\s*$")?;
        let mut indexes = Vec::new();
        // Constraint-backed indexes (`pk`, `u`) are part of the table itself.
        for (name, unique, _, partial) in list.into_iter().filter(|row| row.2 == "c") {
            let columns: Vec<(Option<String>,)> =
                sqlx::query_as("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(&name)
                    .fetch_all(&self.pool)
                    .await?;
            if columns.iter().any(|c| c.0.is_none()) {
                warn!(table, index = %name, "skipping expression index");
                continue;
            }
            let condition = if partial == 1 {
                let sql: Option<(Option<String>,)> =
                    sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?")
                        .bind(&name)
                        .fetch_optional(&self.pool)
                        .await?;
                sql.and_then(|(sql,)| sql)
                    .and_then(|sql| where_clause.captures(&sql).map(|c| c[1].to_string()))
            } else {
                None
            };
            indexes.push(RawIndex {
                name: Some(name),
                columns: columns.into_iter().filter_map(|c| c.0).collect(),
                unique: unique == 1,
                kind: None,
                lengths: BTreeMap::new(),
                condition,
            });
        }
        Ok(indexes)
    }

    async fn read_foreign_keys(&self, table: &str, sql: &str) -> Result<Vec<RawForeignKey>> {
        let rows: Vec<ForeignKeyRow> = sqlx::query_as(
            "SELECT id, seq, \"table\", \"from\", \"to\", on_update, on_delete \
             FROM pragma_foreign_key_list(?) ORDER BY id, seq",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<i64, RawForeignKey> = BTreeMap::new();
        let mut implicit_targets: Vec<i64> = Vec::new();
        for (id, _, target, from, to, on_update, on_delete) in rows {
            let fk = grouped.entry(id).or_insert_with(|| RawForeignKey {
                references_table: target,
                on_update: Some(on_update),
                on_delete: Some(on_delete),
                ..RawForeignKey::default()
            });
            fk.columns.push(from);
            match to {
                Some(to) => fk.references_columns.push(to),
                None => implicit_targets.push(id),
            }
        }
        // `REFERENCES t` without columns points at the target's primary key.
        implicit_targets.dedup();
        for id in implicit_targets {
            if let Some(fk) = grouped.get_mut(&id) {
                fk.references_columns = self.primary_key_of(&fk.references_table).await?;
            }
        }

        let declared = declared_foreign_keys(sql)?;
        let mut foreign_keys: Vec<RawForeignKey> = grouped.into_values().collect();
        for fk in &mut foreign_keys {
            if let Some(found) = declared.iter().find(|d| d.columns == fk.columns) {
                fk.name = Some(found.name.clone());
                fk.deferrable.clone_from(&found.deferrable);
            }
        }
        Ok(foreign_keys)
    }

    async fn primary_key_of(&self, table: &str) -> Result<Vec<String>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT name, pk FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;
        if rows.is_empty() {
            return Err(AdapterError::Catalog {
                table: table.to_string(),
                message: "foreign key target has no primary key".to_string(),
            });
        }
        Ok(rows.into_iter().map(|(name, _)| name).collect())
    }
}

/// Named constraints as written in a `CREATE TABLE` statement.
fn declared_foreign_keys(sql: &str) -> Result<Vec<DeclaredForeignKey>> {
    let constraint = Regex::new(
        r#"(?i)CONSTRAINT\s+"((?:[^"]|"")+)"\s+FOREIGN\s+KEY\s*\(([^)]*)\)\s*REFERENCES\s+"?[^"(\s]+"?\s*(?:\([^)]*\))?([^,\n]*)"#,
    )?;
    let deferrable = Regex::new(r"(?i)(?:^|\s)DEFERRABLE\s+INITIALLY\s+(DEFERRED|IMMEDIATE)")?;
    Ok(constraint
        .captures_iter(sql)
        .map(|c| DeclaredForeignKey {
            name: c[1].replace("\"\"", "\""),
            columns: c[2]
                .split(',')
                .map(|column| column.trim().trim_matches('"').replace("\"\"", "\""))
                .collect(),
            deferrable: deferrable.captures(&c[3]).map(|d| d[1].to_ascii_uppercase()),
        })
        .collect())
}

impl Adapter for SqliteAdapter {
    type Dialect = SqliteDialect;
    type Error = AdapterError;

    fn dialect(&self) -> &SqliteDialect {
        &self.dialect
    }

    async fn catalog(&self, filter: &TableFilter) -> Result<RawCatalog> {
        let tables: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut catalog = RawCatalog::default();
        for (name, sql) in tables.into_iter().filter(|(name, _)| filter.matches(name)) {
            debug!(table = %name, "reading table");
            let table = self.read_table(&name, sql.as_deref().unwrap_or_default()).await?;
            catalog.tables.push(table);
        }
        Ok(catalog)
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        sqlx::query(statement).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_foreign_keys() {
        let sql = "CREATE TABLE \"posts\" (\n  \"id\" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,\n  \"user_id\" bigint,\n  \"a\" bigint,\n  \"b\" bigint,\n  CONSTRAINT \"fk_posts_user_id\" FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE,\n  CONSTRAINT \"fk_pair\" FOREIGN KEY (\"a\", \"b\") REFERENCES \"pairs\" (\"x\", \"y\") DEFERRABLE INITIALLY DEFERRED\n)";
        let declared = declared_foreign_keys(sql).unwrap();
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[0].name, "fk_posts_user_id");
        assert_eq!(declared[0].columns, vec!["user_id"]);
        assert_eq!(declared[0].deferrable, None);
        assert_eq!(declared[1].columns, vec!["a", "b"]);
        assert_eq!(declared[1].deferrable.as_deref(), Some("DEFERRED"));
    }
}
