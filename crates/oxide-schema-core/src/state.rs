//! Schema state tracking.
//!
//! [`SchemaState`] replays operations on a [`Schema`] so that the
//! structure reached after each step of a delta is known. Dialects use
//! it to emit rewrites that need the full table definition, and tests
//! use it to check that a delta turns `before` into `after`.

use crate::error::StateError;
use crate::operation::Operation;
use crate::schema::{Schema, Table};

type StateResult<T> = std::result::Result<T, StateError>;

/// A schema that operations are replayed on.
#[derive(Debug, Clone, Default)]
pub struct SchemaState {
    schema: Schema,
}

impl From<Schema> for SchemaState {
    fn from(schema: Schema) -> Self {
        Self { schema }
    }
}

impl SchemaState {
    /// Creates an empty schema state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Consumes and returns the schema.
    #[must_use]
    pub fn into_schema(self) -> Schema {
        self.schema
    }

    /// Applies a sequence of operations.
    pub fn apply_all<'a, I>(&mut self, operations: I) -> StateResult<()>
    where
        I: IntoIterator<Item = &'a Operation>,
    {
        for operation in operations {
            self.apply_operation(operation)?;
        }
        Ok(())
    }

    /// Applies a single operation to the schema state.
    pub fn apply_operation(&mut self, operation: &Operation) -> StateResult<()> {
        match operation {
            Operation::CreateTable { table } => {
                if self.schema.contains(&table.name) {
                    return Err(StateError::TableExists(table.name.clone()));
                }
                self.schema.add_table(table.clone());
            }

            Operation::DropTable { name } => {
                self.schema
                    .tables
                    .remove(name)
                    .ok_or_else(|| StateError::UnknownTable(name.clone()))?;
            }

            Operation::RenameTable { from, to } => {
                if self.schema.contains(to) {
                    return Err(StateError::TableExists(to.clone()));
                }
                let mut table = self
                    .schema
                    .tables
                    .remove(from)
                    .ok_or_else(|| StateError::UnknownTable(from.clone()))?;
                table.name.clone_from(to);
                self.schema.add_table(table);
                // References follow the renamed table.
                for other in self.schema.tables.values_mut() {
                    for fk in &mut other.foreign_keys {
                        if fk.references_table == *from {
                            fk.references_table.clone_from(to);
                        }
                    }
                }
            }

            Operation::AddColumn {
                table,
                column,
                after,
            } => {
                let t = self.table_mut(table)?;
                if t.column(&column.name).is_some() {
                    return Err(StateError::ColumnExists {
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
                let position = match after {
                    None => 0,
                    Some(after) => {
                        t.column_position(after)
                            .ok_or_else(|| StateError::UnknownColumn {
                                table: table.clone(),
                                column: after.clone(),
                            })?
                            + 1
                    }
                };
                t.columns.insert(position, column.clone());
            }

            Operation::DropColumn { table, name } => {
                let t = self.table_mut(table)?;
                let position = t
                    .column_position(name)
                    .ok_or_else(|| StateError::UnknownColumn {
                        table: table.clone(),
                        column: name.clone(),
                    })?;
                t.columns.remove(position);
                t.primary_key.retain(|c| c != name);
                for index in &mut t.indexes {
                    index.columns.retain(|c| c != name);
                    index.lengths.remove(name);
                }
                t.indexes.retain(|i| !i.columns.is_empty());
            }

            Operation::ChangeColumn { table, column } => {
                let t = self.table_mut(table)?;
                let existing =
                    t.column_mut(&column.name)
                        .ok_or_else(|| StateError::UnknownColumn {
                            table: table.clone(),
                            column: column.name.clone(),
                        })?;
                *existing = column.clone();
            }

            Operation::RenameColumn { table, from, to } => {
                let t = self.table_mut(table)?;
                if t.column(to).is_some() {
                    return Err(StateError::ColumnExists {
                        table: table.clone(),
                        column: to.clone(),
                    });
                }
                let column = t.column_mut(from).ok_or_else(|| StateError::UnknownColumn {
                    table: table.clone(),
                    column: from.clone(),
                })?;
                column.name.clone_from(to);
                rename_in(&mut t.primary_key, from, to);
                for index in &mut t.indexes {
                    rename_in(&mut index.columns, from, to);
                    if let Some(length) = index.lengths.remove(from) {
                        index.lengths.insert(to.clone(), length);
                    }
                }
                for fk in &mut t.foreign_keys {
                    rename_in(&mut fk.columns, from, to);
                }
                let table_name = table.clone();
                for other in self.schema.tables.values_mut() {
                    for fk in &mut other.foreign_keys {
                        if fk.references_table == table_name {
                            rename_in(&mut fk.references_columns, from, to);
                        }
                    }
                }
            }

            Operation::AddIndex { table, index } => {
                self.table_mut(table)?.indexes.push(index.clone());
            }

            Operation::DropIndex { table, index } => {
                let t = self.table_mut(table)?;
                let position = t
                    .indexes
                    .iter()
                    .position(|i| i.name == index.name)
                    .ok_or_else(|| StateError::UnknownIndex {
                        table: table.clone(),
                        index: index.name.clone(),
                    })?;
                t.indexes.remove(position);
            }

            Operation::AddForeignKey { table, foreign_key } => {
                self.table_mut(table)?
                    .foreign_keys
                    .push(foreign_key.clone());
            }

            Operation::DropForeignKey { table, foreign_key } => {
                let t = self.table_mut(table)?;
                let position = t
                    .foreign_keys
                    .iter()
                    .position(|fk| fk.name == foreign_key.name)
                    .ok_or_else(|| StateError::UnknownForeignKey {
                        table: table.clone(),
                        name: foreign_key.name.clone(),
                    })?;
                t.foreign_keys.remove(position);
            }

            Operation::DropPrimaryKey { table, .. } => {
                self.table_mut(table)?.primary_key.clear();
            }

            Operation::AddPrimaryKey { table, columns } => {
                let t = self.table_mut(table)?;
                if let Some(missing) = columns.iter().find(|c| t.column(c).is_none()) {
                    return Err(StateError::UnknownColumn {
                        table: table.clone(),
                        column: missing.clone(),
                    });
                }
                t.primary_key.clone_from(columns);
            }

            Operation::ChangeTableOptions { table, changes } => {
                let t = self.table_mut(table)?;
                for (key, value) in changes {
                    match value {
                        Some(value) => {
                            t.options.insert(key.clone(), value.clone());
                        }
                        None => {
                            t.options.remove(key);
                        }
                    }
                }
            }

            Operation::BulkChange { operations, .. } => {
                self.apply_all(operations)?;
            }
        }
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> StateResult<&mut Table> {
        self.schema
            .table_mut(name)
            .ok_or_else(|| StateError::UnknownTable(name.to_string()))
    }
}

fn rename_in(names: &mut [String], from: &str, to: &str) {
    for name in names.iter_mut().filter(|n| *n == from) {
        *name = to.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, ForeignKey, Index, IntWidth};

    fn users() -> Table {
        Table::new("users")
            .with_column(Column::new("id", ColumnType::Integer(IntWidth::Big)).not_null())
            .with_column(Column::new("name", ColumnType::String { limit: Some(255) }))
            .with_primary_key(["id"])
            .with_index(Index::new("idx_name", vec!["name".into()]))
    }

    #[test]
    fn test_create_and_drop_table() {
        let mut state = SchemaState::new();
        state
            .apply_operation(&Operation::create_table(users()))
            .unwrap();
        assert!(state.schema().contains("users"));
        assert_eq!(
            state.apply_operation(&Operation::create_table(users())),
            Err(StateError::TableExists("users".into()))
        );
        state.apply_operation(&Operation::drop_table("users")).unwrap();
        assert!(state.schema().is_empty());
    }

    #[test]
    fn test_add_column_positions() {
        let mut state = SchemaState::from(Schema::new().with_table(users()));
        state
            .apply_operation(&Operation::AddColumn {
                table: "users".into(),
                column: Column::new("email", ColumnType::Text(Default::default())),
                after: Some("id".into()),
            })
            .unwrap();
        state
            .apply_operation(&Operation::AddColumn {
                table: "users".into(),
                column: Column::new("tenant_id", ColumnType::Integer(IntWidth::Big)),
                after: None,
            })
            .unwrap();
        let names: Vec<&str> = state.schema().table("users").unwrap().columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["tenant_id", "id", "email", "name"]);
    }

    #[test]
    fn test_rename_column_updates_references() {
        let posts = Table::new("posts")
            .with_column(Column::new("user_id", ColumnType::Integer(IntWidth::Big)))
            .with_foreign_key(ForeignKey::new("fk", vec!["user_id".into()], "users", vec!["id".into()]));
        let mut state = SchemaState::from(Schema::new().with_table(users()).with_table(posts));
        state
            .apply_operation(&Operation::RenameColumn {
                table: "users".into(),
                from: "id".into(),
                to: "user_key".into(),
            })
            .unwrap();
        let schema = state.schema();
        assert_eq!(schema.table("users").unwrap().primary_key, vec!["user_key"]);
        assert_eq!(
            schema.table("posts").unwrap().foreign_keys[0].references_columns,
            vec!["user_key"]
        );
    }

    #[test]
    fn test_drop_column_drops_emptied_index() {
        let mut state = SchemaState::from(Schema::new().with_table(users()));
        state
            .apply_operation(&Operation::drop_column("users", "name"))
            .unwrap();
        assert!(state.schema().table("users").unwrap().indexes.is_empty());
    }

    #[test]
    fn test_unknown_targets() {
        let mut state = SchemaState::from(Schema::new().with_table(users()));
        assert_eq!(
            state.apply_operation(&Operation::drop_column("users", "nope")),
            Err(StateError::UnknownColumn {
                table: "users".into(),
                column: "nope".into()
            })
        );
        assert_eq!(
            state.apply_operation(&Operation::drop_table("ghosts")),
            Err(StateError::UnknownTable("ghosts".into()))
        );
    }
}
