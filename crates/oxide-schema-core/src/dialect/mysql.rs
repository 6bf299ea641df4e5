//! MySQL dialect.
//!
//! MySQL alters tables in place, so every operation maps to one
//! statement and a bulk change becomes a single `ALTER TABLE` with
//! comma-separated clauses.

use crate::error::DialectError;
use crate::operation::Operation;
use crate::schema::{
    Column, ColumnType, Deferrable, ForeignKey, ForeignKeyAction, Index, IndexKind, Table,
    OPTION_CHARSET, OPTION_COLLATION, OPTION_COMMENT, OPTION_ENGINE,
};

use super::{common_type_name, parse_common_type, split_native_type, Dialect, NativeType, StatementContext};

type DialectResult<T> = Result<T, DialectError>;

/// Engine restored when a table stops declaring one.
pub const DEFAULT_ENGINE: &str = "InnoDB";

/// MySQL dialect.
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn unsupported(&self, feature: impl Into<String>) -> DialectError {
        DialectError::Unsupported {
            dialect: self.name(),
            feature: feature.into(),
        }
    }

    fn index_columns(&self, index: &Index) -> String {
        index
            .columns
            .iter()
            .map(|c| match index.lengths.get(c) {
                Some(length) => format!("{}({length})", self.quote_identifier(c)),
                None => self.quote_identifier(c),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `[UNIQUE|FULLTEXT|SPATIAL] INDEX name (cols) [USING HASH]`
    fn index_clause(&self, index: &Index) -> DialectResult<String> {
        if index.condition.is_some() {
            return Err(self.unsupported(format!("partial index '{}'", index.name)));
        }
        let prefix = match (index.kind, index.unique) {
            (IndexKind::FullText, _) => "FULLTEXT ",
            (IndexKind::Spatial, _) => "SPATIAL ",
            (_, true) => "UNIQUE ",
            (_, false) => "",
        };
        let using = if index.kind == IndexKind::Hash {
            " USING HASH"
        } else {
            ""
        };
        Ok(format!(
            "{prefix}INDEX {} ({}){using}",
            self.quote_identifier(&index.name),
            self.index_columns(index)
        ))
    }

    fn foreign_key_clause(&self, fk: &ForeignKey) -> DialectResult<String> {
        if fk.deferrable != Deferrable::NotDeferrable {
            return Err(self.unsupported(format!("deferrable foreign key '{}'", fk.name)));
        }
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&fk.name),
            self.column_list(&fk.columns),
            self.quote_identifier(&fk.references_table),
            self.column_list(&fk.references_columns)
        );
        if fk.on_delete != ForeignKeyAction::NoAction {
            sql.push_str(" ON DELETE ");
            sql.push_str(fk.on_delete.as_sql());
        }
        if fk.on_update != ForeignKeyAction::NoAction {
            sql.push_str(" ON UPDATE ");
            sql.push_str(fk.on_update.as_sql());
        }
        Ok(sql)
    }

    /// Table option clauses; `None` values reset what can be reset.
    fn option_clauses<'o, I>(&self, options: I) -> Vec<String>
    where
        I: IntoIterator<Item = (&'o String, Option<&'o String>)>,
    {
        let mut clauses = Vec::new();
        for (key, value) in options {
            match (key.as_str(), value) {
                (OPTION_ENGINE, v) => clauses.push(format!(
                    "ENGINE={}",
                    v.map_or(DEFAULT_ENGINE, String::as_str)
                )),
                (OPTION_CHARSET, v) => clauses.push(format!(
                    "DEFAULT CHARSET={}",
                    v.map_or("DEFAULT", String::as_str)
                )),
                (OPTION_COLLATION, v) => {
                    clauses.push(format!("COLLATE={}", v.map_or("DEFAULT", String::as_str)));
                }
                (OPTION_COMMENT, v) => clauses.push(format!(
                    "COMMENT={}",
                    self.quote_value(v.map_or("", String::as_str))
                )),
                ("options", Some(raw)) => clauses.push(raw.clone()),
                (other, Some(v)) => clauses.push(format!("{}={v}", other.to_ascii_uppercase())),
                (_, None) => {}
            }
        }
        clauses
    }

    fn create_table_sql(&self, table: &Table) -> DialectResult<String> {
        let mut defs = Vec::new();
        for column in &table.columns {
            defs.push(self.column_definition(column)?);
        }
        if !table.primary_key.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", self.column_list(&table.primary_key)));
        }
        for index in &table.indexes {
            defs.push(self.index_clause(index)?);
        }
        for fk in &table.foreign_keys {
            defs.push(self.foreign_key_clause(fk)?);
        }
        let mut sql = format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(&table.name),
            defs.join(",\n  ")
        );
        let options = self.option_clauses(table.options.iter().map(|(k, v)| (k, Some(v))));
        if !options.is_empty() {
            sql.push(' ');
            sql.push_str(&options.join(" "));
        }
        Ok(sql)
    }

    /// `MODIFY COLUMN` clauses for the auto-increment columns among `columns`,
    /// with or without the attribute.
    fn auto_increment_clauses(
        &self,
        table: Option<&Table>,
        columns: &[String],
        keep: bool,
    ) -> DialectResult<Vec<String>> {
        let Some(table) = table else {
            return Ok(Vec::new());
        };
        let mut clauses = Vec::new();
        for column in columns.iter().filter_map(|c| table.column(c)) {
            if column.auto_increment {
                let mut column = column.clone();
                column.auto_increment = keep;
                clauses.push(format!("MODIFY COLUMN {}", self.column_definition(&column)?));
            }
        }
        Ok(clauses)
    }

    /// The ALTER TABLE clauses for one operation.
    ///
    /// Outside a bulk change, an auto-increment column loses the attribute
    /// while its primary key is dropped and gets it back with the new key,
    /// since MySQL requires such a column to stay indexed.
    fn alter_clauses(
        &self,
        operation: &Operation,
        ctx: &StatementContext<'_>,
        in_bulk: bool,
    ) -> DialectResult<Vec<String>> {
        Ok(match operation {
            Operation::AddColumn { column, after, .. } => {
                let position = match after {
                    Some(after) => format!("AFTER {}", self.quote_identifier(after)),
                    None => "FIRST".to_string(),
                };
                vec![format!("ADD COLUMN {} {position}", self.column_definition(column)?)]
            }
            Operation::DropColumn { name, .. } => {
                vec![format!("DROP COLUMN {}", self.quote_identifier(name))]
            }
            Operation::ChangeColumn { column, .. } => {
                vec![format!("MODIFY COLUMN {}", self.column_definition(column)?)]
            }
            Operation::RenameColumn { from, to, .. } => vec![format!(
                "RENAME COLUMN {} TO {}",
                self.quote_identifier(from),
                self.quote_identifier(to)
            )],
            Operation::AddIndex { index, .. } => vec![format!("ADD {}", self.index_clause(index)?)],
            Operation::DropIndex { index, .. } => {
                vec![format!("DROP INDEX {}", self.quote_identifier(&index.name))]
            }
            Operation::AddForeignKey { foreign_key, .. } => {
                vec![format!("ADD {}", self.foreign_key_clause(foreign_key)?)]
            }
            Operation::DropForeignKey { foreign_key, .. } => vec![format!(
                "DROP FOREIGN KEY {}",
                self.quote_identifier(&foreign_key.name)
            )],
            Operation::DropPrimaryKey { table, columns } => {
                let mut clauses = if in_bulk {
                    Vec::new()
                } else {
                    self.auto_increment_clauses(ctx.before.table(table), columns, false)?
                };
                clauses.push("DROP PRIMARY KEY".to_string());
                clauses
            }
            Operation::AddPrimaryKey { table, columns } => {
                let mut clauses = vec![format!("ADD PRIMARY KEY ({})", self.column_list(columns))];
                if !in_bulk {
                    clauses.extend(self.auto_increment_clauses(ctx.after.table(table), columns, true)?);
                }
                clauses
            }
            Operation::ChangeTableOptions { changes, .. } => {
                self.option_clauses(changes.iter().map(|(k, v)| (k, v.as_ref())))
            }
            Operation::BulkChange { operations, .. } => {
                let mut clauses = Vec::new();
                for inner in operations {
                    clauses.extend(self.alter_clauses(inner, ctx, true)?);
                }
                clauses
            }
            Operation::CreateTable { .. } | Operation::DropTable { .. } | Operation::RenameTable { .. } => {
                return Err(self.unsupported(format!("'{}' inside ALTER TABLE", operation.description())))
            }
        })
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn quote_value(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn type_name(&self, column: &Column) -> DialectResult<String> {
        let name = match column.column_type {
            ColumnType::Boolean => "tinyint(1)".to_string(),
            ref other => common_type_name(other, |v| self.quote_value(v)),
        };
        let numeric = matches!(
            column.column_type,
            ColumnType::Integer(_) | ColumnType::Decimal { .. } | ColumnType::Float { .. } | ColumnType::Double
        );
        Ok(if column.unsigned && numeric {
            format!("{name} unsigned")
        } else {
            name
        })
    }

    fn parse_native_type(&self, native: &str) -> Option<NativeType> {
        let (head, args, unsigned) = split_native_type(native);
        let column_type = match head.as_str() {
            "tinyint" if args.first().map(String::as_str) == Some("1") => ColumnType::Boolean,
            "bit" if args.first().map_or(true, |a| a == "1") => ColumnType::Boolean,
            // Display widths carry no meaning for integers.
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
                parse_common_type(&head, &[])?
            }
            "double" | "real" => ColumnType::Double,
            _ => parse_common_type(&head, &args)?,
        };
        Some(NativeType {
            column_type,
            unsigned,
        })
    }

    fn is_default_foreign_key_name(&self, table: &str, name: &str, columns: &[String]) -> bool {
        if name == ForeignKey::synthesized_name(table, columns) {
            return true;
        }
        name.strip_prefix(table)
            .and_then(|rest| rest.strip_prefix("_ibfk_"))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }

    fn column_definition(&self, column: &Column) -> DialectResult<String> {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(column)?,
        ];
        parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
        if let Some(default_sql) = self.default_sql(&column.default) {
            parts.push(format!("DEFAULT {default_sql}"));
        }
        if column.auto_increment {
            parts.push("AUTO_INCREMENT".to_string());
        }
        if let Some(comment) = &column.comment {
            parts.push(format!("COMMENT {}", self.quote_value(comment)));
        }
        Ok(parts.join(" "))
    }

    fn statements(&self, operation: &Operation, ctx: &StatementContext<'_>) -> DialectResult<Vec<String>> {
        match operation {
            Operation::CreateTable { table } => Ok(vec![self.create_table_sql(table)?]),
            Operation::DropTable { name } => {
                Ok(vec![format!("DROP TABLE {}", self.quote_identifier(name))])
            }
            Operation::RenameTable { from, to } => Ok(vec![format!(
                "RENAME TABLE {} TO {}",
                self.quote_identifier(from),
                self.quote_identifier(to)
            )]),
            other => {
                let mut clauses = self.alter_clauses(other, ctx, false)?;
                if clauses.is_empty() {
                    return Ok(Vec::new());
                }
                if let Some(extra) = ctx.alter_extra {
                    clauses.push(extra.to_string());
                }
                Ok(vec![format!(
                    "ALTER TABLE {} {}",
                    self.quote_identifier(other.table_name()),
                    clauses.join(", ")
                )])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DefaultValue, IntWidth, Schema};

    fn dialect() -> MySqlDialect {
        MySqlDialect::new()
    }

    fn statements(op: &Operation, alter_extra: Option<&str>) -> Vec<String> {
        let schema = Schema::new();
        let ctx = StatementContext {
            before: &schema,
            after: &schema,
            alter_extra,
        };
        dialect().statements(op, &ctx).unwrap()
    }

    #[test]
    fn test_create_table() {
        let table = Table::new("users")
            .with_column(
                Column::new("id", ColumnType::Integer(IntWidth::Big))
                    .not_null()
                    .unsigned()
                    .auto_increment(),
            )
            .with_column(
                Column::new("name", ColumnType::String { limit: Some(255) })
                    .with_comment("display name"),
            )
            .with_column(Column::new("active", ColumnType::Boolean).with_default(DefaultValue::Bool(true)))
            .with_primary_key(["id"])
            .with_index(Index::new("idx_name", vec!["name".into()]).with_length("name", 16))
            .with_option("engine", "InnoDB")
            .with_option("comment", "People");
        let sql = statements(&Operation::create_table(table), None);
        assert_eq!(
            sql[0],
            "CREATE TABLE `users` (\n  `id` bigint unsigned NOT NULL AUTO_INCREMENT,\n  `name` varchar(255) NULL COMMENT 'display name',\n  `active` tinyint(1) NULL DEFAULT TRUE,\n  PRIMARY KEY (`id`),\n  INDEX `idx_name` (`name`(16))\n) COMMENT='People' ENGINE=InnoDB"
        );
    }

    #[test]
    fn test_bulk_change_is_one_statement() {
        let op = Operation::BulkChange {
            table: "users".into(),
            operations: vec![
                Operation::AddColumn {
                    table: "users".into(),
                    column: Column::new("email", ColumnType::String { limit: Some(100) }),
                    after: Some("name".into()),
                },
                Operation::drop_column("users", "legacy"),
                Operation::add_index("users", Index::new("idx_email", vec!["email".into()]).unique()),
            ],
        };
        assert_eq!(
            statements(&op, Some("ALGORITHM=INPLACE")),
            vec!["ALTER TABLE `users` ADD COLUMN `email` varchar(100) NULL AFTER `name`, DROP COLUMN `legacy`, ADD UNIQUE INDEX `idx_email` (`email`), ALGORITHM=INPLACE"]
        );
    }

    #[test]
    fn test_foreign_keys() {
        let fk = ForeignKey::new("fk_posts_user_id", vec!["user_id".into()], "users", vec!["id".into()])
            .on_delete(ForeignKeyAction::SetNull);
        assert_eq!(
            statements(&Operation::add_foreign_key("posts", fk.clone()), None),
            vec!["ALTER TABLE `posts` ADD CONSTRAINT `fk_posts_user_id` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`) ON DELETE SET NULL"]
        );
        assert_eq!(
            statements(&Operation::drop_foreign_key("posts", fk), None),
            vec!["ALTER TABLE `posts` DROP FOREIGN KEY `fk_posts_user_id`"]
        );
    }

    #[test]
    fn test_parse_native_type() {
        let d = dialect();
        assert_eq!(
            d.parse_native_type("tinyint(1)").map(|n| n.column_type),
            Some(ColumnType::Boolean)
        );
        assert_eq!(
            d.parse_native_type("int(10) unsigned"),
            Some(NativeType {
                column_type: ColumnType::Integer(IntWidth::Int),
                unsigned: true
            })
        );
        assert_eq!(
            d.parse_native_type("varchar(64)").map(|n| n.column_type),
            Some(ColumnType::String { limit: Some(64) })
        );
        assert_eq!(
            d.parse_native_type("enum('draft','live')").map(|n| n.column_type),
            Some(ColumnType::Enum(vec!["draft".into(), "live".into()]))
        );
    }

    #[test]
    fn test_default_foreign_key_names() {
        let d = dialect();
        let columns = vec!["user_id".to_string()];
        assert!(d.is_default_foreign_key_name("posts", "posts_ibfk_1", &columns));
        assert!(d.is_default_foreign_key_name("posts", "fk_posts_user_id", &columns));
        assert!(!d.is_default_foreign_key_name("posts", "fk_author", &columns));
        assert!(!d.is_default_foreign_key_name("posts", "posts_ibfk_", &columns));
        assert!(!d.is_default_foreign_key_name("posts", "posts_ibfk_1a", &columns));
        assert!(!d.is_default_foreign_key_name("posts", "comments_ibfk_1", &columns));
    }

    fn accounts() -> Table {
        Table::new("accounts")
            .with_column(
                Column::new("id", ColumnType::Integer(IntWidth::Big))
                    .not_null()
                    .auto_increment(),
            )
            .with_column(Column::new("tenant_id", ColumnType::Integer(IntWidth::Big)).not_null())
            .with_primary_key(["id"])
    }

    #[test]
    fn test_primary_key_swap_keeps_auto_increment_indexed() {
        let before = Schema::new().with_table(accounts());
        let after = Schema::new().with_table(accounts().with_primary_key(["id", "tenant_id"]));
        let drop = Operation::DropPrimaryKey {
            table: "accounts".into(),
            columns: vec!["id".into()],
        };
        let add = Operation::AddPrimaryKey {
            table: "accounts".into(),
            columns: vec!["id".into(), "tenant_id".into()],
        };

        let ctx = StatementContext {
            before: &before,
            after: &before,
            alter_extra: None,
        };
        assert_eq!(
            dialect().statements(&drop, &ctx).unwrap(),
            vec!["ALTER TABLE `accounts` MODIFY COLUMN `id` bigint NOT NULL, DROP PRIMARY KEY"]
        );

        let ctx = StatementContext {
            before: &before,
            after: &after,
            alter_extra: None,
        };
        assert_eq!(
            dialect().statements(&add, &ctx).unwrap(),
            vec!["ALTER TABLE `accounts` ADD PRIMARY KEY (`id`, `tenant_id`), MODIFY COLUMN `id` bigint NOT NULL AUTO_INCREMENT"]
        );

        let bulk = Operation::BulkChange {
            table: "accounts".into(),
            operations: vec![drop, add],
        };
        assert_eq!(
            dialect().statements(&bulk, &ctx).unwrap(),
            vec!["ALTER TABLE `accounts` DROP PRIMARY KEY, ADD PRIMARY KEY (`id`, `tenant_id`)"]
        );
    }

    #[test]
    fn test_removed_table_options_reset() {
        let mut changes = std::collections::BTreeMap::new();
        changes.insert("charset".to_string(), None);
        changes.insert("engine".to_string(), None);
        changes.insert("row_format".to_string(), None);
        let op = Operation::ChangeTableOptions {
            table: "logs".into(),
            changes,
        };
        assert_eq!(
            statements(&op, None),
            vec!["ALTER TABLE `logs` DEFAULT CHARSET=DEFAULT, ENGINE=InnoDB"]
        );
    }

    #[test]
    fn test_table_option_changes() {
        let mut changes = std::collections::BTreeMap::new();
        changes.insert("comment".to_string(), None);
        changes.insert("engine".to_string(), Some("MyISAM".to_string()));
        let op = Operation::ChangeTableOptions {
            table: "logs".into(),
            changes,
        };
        assert_eq!(
            statements(&op, None),
            vec!["ALTER TABLE `logs` COMMENT='', ENGINE=MyISAM"]
        );
    }
}
