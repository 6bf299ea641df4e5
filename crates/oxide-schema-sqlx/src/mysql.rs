//! MySQL adapter.
//!
//! The catalog is read from `information_schema`. Text columns are cast
//! to `CHAR` because MySQL 8 reports several of them as binary strings.

use std::collections::BTreeMap;

use oxide_schema_core::adapter::Adapter;
use oxide_schema_core::dialect::MySqlDialect;
use oxide_schema_core::introspect::{RawCatalog, RawColumn, RawForeignKey, RawIndex, RawTable, TableFilter};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::debug;

use crate::error::{AdapterError, Result};

/// Types whose defaults MySQL reports without quotes but that are not strings.
const NUMERIC_TYPES: &[&str] = &[
    "tinyint", "smallint", "mediumint", "int", "bigint", "decimal", "float", "double", "bit",
    "year",
];

/// A MySQL database reached through sqlx.
#[derive(Debug, Clone)]
pub struct MySqlAdapter {
    pool: MySqlPool,
    dialect: MySqlDialect,
    database: String,
    defaults: ServerDefaults,
}

/// Table options a new table gets when it declares none.
///
/// They are left out of the catalog so that a definition without options
/// matches a table created from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ServerDefaults {
    engine: Option<String>,
    charset: Option<String>,
    collation: Option<String>,
}

impl ServerDefaults {
    fn is_default(&self, key: &str, value: &str) -> bool {
        let default = match key {
            "engine" => &self.engine,
            "charset" => &self.charset,
            "collation" => &self.collation,
            _ => return false,
        };
        default
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case(value))
    }
}

/// Name, engine, collation and comment.
type TableRow = (String, Option<String>, Option<String>, Option<String>);

/// Name, column type, nullability, default, extra, comment and data type.
type ColumnRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
);

/// Index name, non-unique flag, column, prefix length and method.
type IndexRow = (String, i64, Option<String>, Option<i64>, String);

/// Constraint, column, target table, target column, update and delete rules.
type ForeignKeyRow = (String, String, String, String, String, String);

impl MySqlAdapter {
    /// Connects to the database named in the URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, reading the current database name from it.
    pub async fn from_pool(pool: MySqlPool) -> Result<Self> {
        let (database,): (Option<String>,) = sqlx::query_as("SELECT CAST(DATABASE() AS CHAR)")
            .fetch_one(&pool)
            .await?;
        let database = database.ok_or(AdapterError::NoDatabase)?;
        let (engine, charset, collation): (Option<String>, Option<String>, Option<String>) =
            sqlx::query_as(
                "SELECT CAST(@@default_storage_engine AS CHAR), \
                        CAST(DEFAULT_CHARACTER_SET_NAME AS CHAR), CAST(DEFAULT_COLLATION_NAME AS CHAR) \
                 FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
            )
            .bind(&database)
            .fetch_one(&pool)
            .await?;
        debug!(?engine, ?charset, ?collation, "server defaults");
        Ok(Self {
            pool,
            dialect: MySqlDialect::new(),
            database,
            defaults: ServerDefaults {
                engine,
                charset,
                collation,
            },
        })
    }

    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn read_table(&self, row: TableRow) -> Result<RawTable> {
        let (name, engine, collation, comment) = row;
        let mut table = RawTable {
            name,
            ..RawTable::default()
        };

        let columns: Vec<ColumnRow> = sqlx::query_as(
            "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR), \
                    CAST(IS_NULLABLE AS CHAR), CAST(COLUMN_DEFAULT AS CHAR), \
                    CAST(EXTRA AS CHAR), CAST(COLUMN_COMMENT AS CHAR), CAST(DATA_TYPE AS CHAR) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await?;
        for (column, column_type, nullable, default, extra, column_comment, data_type) in columns {
            let extra = extra.to_ascii_lowercase();
            table.columns.push(RawColumn {
                name: column,
                native_type: column_type,
                nullable: nullable == "YES",
                default: default.map(|d| default_literal(d, &data_type, &extra)),
                auto_increment: extra.contains("auto_increment"),
                comment: column_comment,
            });
        }

        let primary_key: Vec<(String,)> = sqlx::query_as(
            "SELECT CAST(COLUMN_NAME AS CHAR) FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await?;
        table.primary_key = primary_key.into_iter().map(|(c,)| c).collect();

        table.foreign_keys = self.read_foreign_keys(&table.name).await?;
        table.indexes = self.read_indexes(&table.name).await?;
        // MySQL adds an index named after a foreign key when none covers it.
        let implicit: Vec<(Option<String>, Vec<String>)> = table
            .foreign_keys
            .iter()
            .map(|fk| (fk.name.clone(), fk.columns.clone()))
            .collect();
        table
            .indexes
            .retain(|index| !implicit.contains(&(index.name.clone(), index.columns.clone())));

        table.options = table_options(engine, collation, comment, &self.defaults);
        Ok(table)
    }

    async fn read_indexes(&self, table: &str) -> Result<Vec<RawIndex>> {
        let rows: Vec<IndexRow> = sqlx::query_as(
            "SELECT CAST(INDEX_NAME AS CHAR), CAST(NON_UNIQUE AS SIGNED), CAST(COLUMN_NAME AS CHAR), \
                    CAST(SUB_PART AS SIGNED), CAST(INDEX_TYPE AS CHAR) \
             FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND INDEX_NAME <> 'PRIMARY' \
             ORDER BY INDEX_NAME, SEQ_IN_INDEX",
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut indexes: Vec<RawIndex> = Vec::new();
        for (name, non_unique, column, sub_part, kind) in rows {
            let Some(column) = column else {
                return Err(AdapterError::Catalog {
                    table: table.to_string(),
                    message: format!("functional index '{name}' is not supported"),
                });
            };
            let continues = indexes
                .last()
                .is_some_and(|last| last.name.as_deref() == Some(name.as_str()));
            if !continues {
                indexes.push(RawIndex {
                    name: Some(name),
                    unique: non_unique == 0,
                    kind: Some(kind),
                    ..RawIndex::default()
                });
            }
            let Some(index) = indexes.last_mut() else {
                continue;
            };
            if let Some(length) = sub_part.and_then(|l| u32::try_from(l).ok()) {
                index.lengths.insert(column.clone(), length);
            }
            index.columns.push(column);
        }
        Ok(indexes)
    }

    async fn read_foreign_keys(&self, table: &str) -> Result<Vec<RawForeignKey>> {
        let rows: Vec<ForeignKeyRow> = sqlx::query_as(
            "SELECT CAST(k.CONSTRAINT_NAME AS CHAR), CAST(k.COLUMN_NAME AS CHAR), \
                    CAST(k.REFERENCED_TABLE_NAME AS CHAR), CAST(k.REFERENCED_COLUMN_NAME AS CHAR), \
                    CAST(r.UPDATE_RULE AS CHAR), CAST(r.DELETE_RULE AS CHAR) \
             FROM information_schema.KEY_COLUMN_USAGE k \
             JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
               ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA \
              AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
              AND r.TABLE_NAME = k.TABLE_NAME \
             WHERE k.TABLE_SCHEMA = ? AND k.TABLE_NAME = ? AND k.REFERENCED_TABLE_NAME IS NOT NULL \
             ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, RawForeignKey> = BTreeMap::new();
        for (name, column, target, target_column, on_update, on_delete) in rows {
            let fk = grouped.entry(name.clone()).or_insert_with(|| RawForeignKey {
                name: Some(name),
                references_table: target,
                on_update: Some(on_update),
                on_delete: Some(on_delete),
                ..RawForeignKey::default()
            });
            fk.columns.push(column);
            fk.references_columns.push(target_column);
        }
        Ok(grouped.into_values().collect())
    }
}

/// Table options as declared, leaving out server defaults.
fn table_options(
    engine: Option<String>,
    collation: Option<String>,
    comment: Option<String>,
    defaults: &ServerDefaults,
) -> BTreeMap<String, String> {
    let mut options = BTreeMap::new();
    if let Some(engine) = engine {
        options.insert("engine".to_string(), engine);
    }
    if let Some(collation) = collation {
        if let Some((charset, _)) = collation.split_once('_') {
            options.insert("charset".to_string(), charset.to_string());
        }
        options.insert("collation".to_string(), collation);
    }
    options.retain(|key, value| !defaults.is_default(key, value));
    if let Some(comment) = comment.filter(|c| !c.is_empty()) {
        options.insert("comment".to_string(), comment);
    }
    options
}

/// Turns an `information_schema` default into SQL literal text.
fn default_literal(raw: String, data_type: &str, extra: &str) -> String {
    let data_type = data_type.to_ascii_lowercase();
    if extra.contains("default_generated") || NUMERIC_TYPES.contains(&data_type.as_str()) {
        if data_type == "bit" {
            // b'1'
            return raw
                .trim_start_matches("b'")
                .trim_end_matches('\'')
                .to_string();
        }
        return raw;
    }
    format!("'{}'", raw.replace('\'', "''"))
}

impl Adapter for MySqlAdapter {
    type Dialect = MySqlDialect;
    type Error = AdapterError;

    fn dialect(&self) -> &MySqlDialect {
        &self.dialect
    }

    async fn catalog(&self, filter: &TableFilter) -> Result<RawCatalog> {
        let tables: Vec<TableRow> = sqlx::query_as(
            "SELECT CAST(TABLE_NAME AS CHAR), CAST(ENGINE AS CHAR), \
                    CAST(TABLE_COLLATION AS CHAR), CAST(TABLE_COMMENT AS CHAR) \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await?;

        let mut catalog = RawCatalog::default();
        for row in tables.into_iter().filter(|row| filter.matches(&row.0)) {
            debug!(table = %row.0, database = %self.database, "reading table");
            catalog.tables.push(self.read_table(row).await?);
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
    fn test_table_options_skip_server_defaults() {
        let defaults = ServerDefaults {
            engine: Some("InnoDB".into()),
            charset: Some("utf8mb4".into()),
            collation: Some("utf8mb4_0900_ai_ci".into()),
        };
        let options = table_options(
            Some("InnoDB".into()),
            Some("utf8mb4_0900_ai_ci".into()),
            Some(String::new()),
            &defaults,
        );
        assert!(options.is_empty());

        let options = table_options(
            Some("MyISAM".into()),
            Some("latin1_swedish_ci".into()),
            Some("audit".into()),
            &defaults,
        );
        assert_eq!(options.get("engine").map(String::as_str), Some("MyISAM"));
        assert_eq!(options.get("charset").map(String::as_str), Some("latin1"));
        assert_eq!(
            options.get("collation").map(String::as_str),
            Some("latin1_swedish_ci")
        );
        assert_eq!(options.get("comment").map(String::as_str), Some("audit"));
    }

    #[test]
    fn test_default_literal() {
        assert_eq!(default_literal("0".into(), "int", ""), "0");
        assert_eq!(default_literal("b'1'".into(), "bit", ""), "1");
        assert_eq!(default_literal("it's".into(), "varchar", ""), "'it''s'");
        assert_eq!(
            default_literal("CURRENT_TIMESTAMP".into(), "datetime", "default_generated"),
            "CURRENT_TIMESTAMP"
        );
        assert_eq!(default_literal("2020-01-01".into(), "date", ""), "'2020-01-01'");
    }
}
