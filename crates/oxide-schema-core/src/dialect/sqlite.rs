//! SQLite dialect.
//!
//! SQLite has limited ALTER TABLE support, so some operations require
//! the "table recreation" strategy: create a new table, copy data,
//! drop the old table, rename the new table.
//!
//! Column types are written with their MySQL-style names
//! (`varchar(255)`, `bigint unsigned`); SQLite keeps declared type text
//! verbatim, so widths and signedness survive introspection.

use std::collections::BTreeMap;

use crate::error::DialectError;
use crate::operation::Operation;
use crate::schema::{Column, ColumnType, Deferrable, DefaultValue, ForeignKey, ForeignKeyAction, Index, IndexKind, Table};

use super::{common_type_name, parse_common_type, split_native_type, Dialect, NativeType, StatementContext};

type DialectResult<T> = Result<T, DialectError>;

/// SQLite dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
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

    /// The column that becomes `INTEGER PRIMARY KEY AUTOINCREMENT`.
    fn rowid_alias<'t>(&self, table: &'t Table) -> Option<&'t Column> {
        match table.primary_key.as_slice() {
            [single] => table
                .column(single)
                .filter(|c| c.auto_increment && c.column_type.is_integer()),
            _ => None,
        }
    }

    /// Generates SQL for creating a table under `name`.
    fn create_table_sql(&self, table: &Table, name: &str) -> DialectResult<String> {
        let rowid = self.rowid_alias(table).map(|c| c.name.as_str());
        let mut defs = Vec::with_capacity(table.columns.len() + 1);
        for column in &table.columns {
            if Some(column.name.as_str()) == rowid {
                defs.push(format!(
                    "{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
                    self.quote_identifier(&column.name)
                ));
            } else {
                defs.push(self.column_definition(column)?);
            }
        }
        if rowid.is_none() && !table.primary_key.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", self.column_list(&table.primary_key)));
        }
        for fk in &table.foreign_keys {
            defs.push(self.foreign_key_clause(fk));
        }
        Ok(format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(name),
            defs.join(",\n  ")
        ))
    }

    fn foreign_key_clause(&self, fk: &ForeignKey) -> String {
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
        match fk.deferrable {
            Deferrable::NotDeferrable => {}
            Deferrable::Immediate => sql.push_str(" DEFERRABLE INITIALLY IMMEDIATE"),
            Deferrable::Deferred => sql.push_str(" DEFERRABLE INITIALLY DEFERRED"),
        }
        sql
    }

    /// Generates SQL for creating an index.
    fn create_index_sql(&self, table: &str, index: &Index) -> DialectResult<String> {
        if index.kind != IndexKind::BTree {
            return Err(self.unsupported(format!("{:?} index '{}'", index.kind, index.name)));
        }
        if !index.lengths.is_empty() {
            return Err(self.unsupported(format!("prefix lengths on index '{}'", index.name)));
        }
        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        sql.push_str(&self.quote_identifier(&index.name));
        sql.push_str(" ON ");
        sql.push_str(&self.quote_identifier(table));
        sql.push_str(" (");
        sql.push_str(&self.column_list(&index.columns));
        sql.push(')');
        if let Some(condition) = &index.condition {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }
        Ok(sql)
    }

    fn alter(&self, table: &str, clause: &str, ctx: &StatementContext<'_>) -> DialectResult<String> {
        if let Some(extra) = ctx.alter_extra {
            return Err(self.unsupported(format!("alter_extra '{extra}'")));
        }
        Ok(format!("ALTER TABLE {} {clause}", self.quote_identifier(table)))
    }

    /// Recreates `after` in place of `before`, copying every column that
    /// survives. `renames` maps new column names to old ones.
    fn rebuild(
        &self,
        before: &Table,
        after: &Table,
        renames: &BTreeMap<String, String>,
    ) -> DialectResult<Vec<String>> {
        let temporary = format!("_{}_new", after.name);
        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for column in &after.columns {
            let source = renames.get(&column.name).unwrap_or(&column.name);
            if before.column(source).is_some() {
                targets.push(column.name.clone());
                sources.push(source.clone());
            }
        }
        let mut statements = vec![
            "PRAGMA foreign_keys = OFF".to_string(),
            self.create_table_sql(after, &temporary)?,
        ];
        if !targets.is_empty() {
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote_identifier(&temporary),
                self.column_list(&targets),
                self.column_list(&sources),
                self.quote_identifier(&before.name)
            ));
        }
        statements.push(format!("DROP TABLE {}", self.quote_identifier(&before.name)));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(&temporary),
            self.quote_identifier(&after.name)
        ));
        for index in &after.indexes {
            statements.push(self.create_index_sql(&after.name, index)?);
        }
        statements.push("PRAGMA foreign_keys = ON".to_string());
        Ok(statements)
    }

    fn rebuild_table(
        &self,
        table: &str,
        ctx: &StatementContext<'_>,
        renames: &BTreeMap<String, String>,
    ) -> DialectResult<Vec<String>> {
        let before = ctx
            .before
            .table(table)
            .ok_or_else(|| DialectError::UnknownTable(table.to_string()))?;
        let after = ctx
            .after
            .table(table)
            .ok_or_else(|| DialectError::UnknownTable(table.to_string()))?;
        self.rebuild(before, after, renames)
    }

    /// `ADD COLUMN` appends a nullable or constant-defaulted column only.
    fn can_add_in_place(before: &Table, after: &Table, column: &Column, position: Option<&String>) -> bool {
        let appends = position.map(String::as_str) == before.columns.last().map(|c| c.name.as_str());
        let constant_default = !matches!(column.default, DefaultValue::Expression(_));
        let satisfiable = column.nullable || !matches!(column.default, DefaultValue::None | DefaultValue::Null);
        appends
            && constant_default
            && satisfiable
            && !column.auto_increment
            && !after.primary_key.contains(&column.name)
    }

    /// `DROP COLUMN` refuses keyed, indexed and referencing columns.
    fn can_drop_in_place(before: &Table, name: &str) -> bool {
        let name = name.to_string();
        !before.primary_key.contains(&name)
            && !before.indexes.iter().any(|i| i.columns.contains(&name))
            && !before.foreign_keys.iter().any(|fk| fk.columns.contains(&name))
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, column: &Column) -> DialectResult<String> {
        if matches!(column.column_type, ColumnType::Enum(_) | ColumnType::Set(_)) {
            return Err(self.unsupported(format!(
                "{} column '{}'",
                column.column_type.family(),
                column.name
            )));
        }
        let name = common_type_name(&column.column_type, |v| self.quote_value(v));
        Ok(if column.unsigned {
            format!("{name} unsigned")
        } else {
            name
        })
    }

    fn parse_native_type(&self, native: &str) -> Option<NativeType> {
        let (head, args, unsigned) = split_native_type(native);
        let column_type = match head.as_str() {
            // Affinity-only spellings written by other tools.
            "real" => ColumnType::Double,
            "clob" => ColumnType::Text(Default::default()),
            _ => parse_common_type(&head, &args)?,
        };
        Some(NativeType {
            column_type,
            unsigned,
        })
    }

    fn supports_table_options(&self) -> bool {
        false
    }

    fn supports_comments(&self) -> bool {
        false
    }

    fn default_sql(&self, default: &DefaultValue) -> Option<String> {
        match default {
            // Non-keyword expressions must be parenthesized.
            DefaultValue::Expression(expr)
                if !expr.to_ascii_uppercase().starts_with("CURRENT_") =>
            {
                Some(format!("({expr})"))
            }
            DefaultValue::None => None,
            DefaultValue::Null => Some("NULL".to_string()),
            DefaultValue::Bool(true) => Some("TRUE".to_string()),
            DefaultValue::Bool(false) => Some("FALSE".to_string()),
            DefaultValue::Integer(n) => Some(n.to_string()),
            DefaultValue::Float(f) => Some(f.to_string()),
            DefaultValue::String(s) => Some(self.quote_value(s)),
            DefaultValue::Expression(expr) => Some(expr.clone()),
        }
    }

    fn statements(&self, operation: &Operation, ctx: &StatementContext<'_>) -> DialectResult<Vec<String>> {
        let no_renames = BTreeMap::new();
        match operation {
            Operation::CreateTable { table } => {
                let mut statements = vec![self.create_table_sql(table, &table.name)?];
                for index in &table.indexes {
                    statements.push(self.create_index_sql(&table.name, index)?);
                }
                Ok(statements)
            }

            Operation::DropTable { name } => {
                Ok(vec![format!("DROP TABLE {}", self.quote_identifier(name))])
            }

            Operation::RenameTable { from, to } => Ok(vec![format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote_identifier(from),
                self.quote_identifier(to)
            )]),

            Operation::AddColumn {
                table,
                column,
                after,
            } => {
                let before_table = ctx
                    .before
                    .table(table)
                    .ok_or_else(|| DialectError::UnknownTable(table.clone()))?;
                let after_table = ctx
                    .after
                    .table(table)
                    .ok_or_else(|| DialectError::UnknownTable(table.clone()))?;
                if Self::can_add_in_place(before_table, after_table, column, after.as_ref()) {
                    let clause = format!("ADD COLUMN {}", self.column_definition(column)?);
                    Ok(vec![self.alter(table, &clause, ctx)?])
                } else {
                    self.rebuild(before_table, after_table, &no_renames)
                }
            }

            Operation::DropColumn { table, name } => {
                let before_table = ctx
                    .before
                    .table(table)
                    .ok_or_else(|| DialectError::UnknownTable(table.clone()))?;
                if Self::can_drop_in_place(before_table, name) {
                    let clause = format!("DROP COLUMN {}", self.quote_identifier(name));
                    Ok(vec![self.alter(table, &clause, ctx)?])
                } else {
                    self.rebuild_table(table, ctx, &no_renames)
                }
            }

            Operation::RenameColumn { table, from, to } => {
                let clause = format!(
                    "RENAME COLUMN {} TO {}",
                    self.quote_identifier(from),
                    self.quote_identifier(to)
                );
                Ok(vec![self.alter(table, &clause, ctx)?])
            }

            Operation::AddIndex { table, index } => Ok(vec![self.create_index_sql(table, index)?]),

            Operation::DropIndex { index, .. } => Ok(vec![format!(
                "DROP INDEX {}",
                self.quote_identifier(&index.name)
            )]),

            Operation::ChangeColumn { table, .. }
            | Operation::AddForeignKey { table, .. }
            | Operation::DropForeignKey { table, .. }
            | Operation::DropPrimaryKey { table, .. }
            | Operation::AddPrimaryKey { table, .. } => self.rebuild_table(table, ctx, &no_renames),

            Operation::ChangeTableOptions { .. } => Err(self.unsupported("table options")),

            Operation::BulkChange { table, operations } => {
                let mut renames = BTreeMap::new();
                for inner in operations {
                    match inner {
                        Operation::ChangeTableOptions { .. } => {
                            return Err(self.unsupported("table options"))
                        }
                        Operation::RenameColumn { from, to, .. } => {
                            // Follow chains so the copy reads the original name.
                            let origin = renames.remove(from).unwrap_or_else(|| from.clone());
                            renames.insert(to.clone(), origin);
                        }
                        _ => {}
                    }
                }
                self.rebuild_table(table, ctx, &renames)
            }
        }
    }
}
