//! Structural change operations.
//!
//! Operations always carry complete target definitions (a changed
//! column is restated in full) so a dialect never needs the previous
//! definition to emit a statement.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::{Column, ForeignKey, Index, Table};

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Creates a table. Its `foreign_keys` hold only the keys that can
    /// be created inline; its `indexes` are empty unless indexes are
    /// created with the table.
    CreateTable { table: Table },
    DropTable { name: String },
    RenameTable { from: String, to: String },
    /// Adds a column after `after`, or first when `after` is `None`.
    AddColumn {
        table: String,
        column: Column,
        after: Option<String>,
    },
    DropColumn { table: String, name: String },
    /// Redefines a column with its full target definition.
    ChangeColumn { table: String, column: Column },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    AddIndex { table: String, index: Index },
    DropIndex { table: String, index: Index },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    DropForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    DropPrimaryKey { table: String, columns: Vec<String> },
    AddPrimaryKey { table: String, columns: Vec<String> },
    /// Sets (`Some`) or clears (`None`) table options.
    ChangeTableOptions {
        table: String,
        changes: BTreeMap<String, Option<String>>,
    },
    /// Several alterations of one table applied as a unit.
    BulkChange {
        table: String,
        operations: Vec<Operation>,
    },
}

impl Operation {
    /// Creates a `CreateTable` operation.
    #[must_use]
    pub const fn create_table(table: Table) -> Self {
        Self::CreateTable { table }
    }

    /// Creates a `DropTable` operation.
    #[must_use]
    pub fn drop_table(name: impl Into<String>) -> Self {
        Self::DropTable { name: name.into() }
    }

    /// Creates a `DropColumn` operation.
    #[must_use]
    pub fn drop_column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            name: name.into(),
        }
    }

    /// Creates an `AddIndex` operation.
    #[must_use]
    pub fn add_index(table: impl Into<String>, index: Index) -> Self {
        Self::AddIndex {
            table: table.into(),
            index,
        }
    }

    /// Creates a `DropIndex` operation.
    #[must_use]
    pub fn drop_index(table: impl Into<String>, index: Index) -> Self {
        Self::DropIndex {
            table: table.into(),
            index,
        }
    }

    /// Creates an `AddForeignKey` operation.
    #[must_use]
    pub fn add_foreign_key(table: impl Into<String>, foreign_key: ForeignKey) -> Self {
        Self::AddForeignKey {
            table: table.into(),
            foreign_key,
        }
    }

    /// Creates a `DropForeignKey` operation.
    #[must_use]
    pub fn drop_foreign_key(table: impl Into<String>, foreign_key: ForeignKey) -> Self {
        Self::DropForeignKey {
            table: table.into(),
            foreign_key,
        }
    }

    /// Name of the table the operation acts on. For a rename this is
    /// the new name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        match self {
            Self::CreateTable { table } => &table.name,
            Self::DropTable { name } => name,
            Self::RenameTable { to, .. } => to,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::ChangeColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. }
            | Self::DropPrimaryKey { table, .. }
            | Self::AddPrimaryKey { table, .. }
            | Self::ChangeTableOptions { table, .. }
            | Self::BulkChange { table, .. } => table,
        }
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { table } => format!("Create table '{}'", table.name),
            Self::DropTable { name } => format!("Drop table '{name}'"),
            Self::RenameTable { from, to } => format!("Rename table '{from}' to '{to}'"),
            Self::AddColumn { table, column, .. } => {
                format!("Add column '{}' to table '{table}'", column.name)
            }
            Self::DropColumn { table, name } => {
                format!("Drop column '{name}' from table '{table}'")
            }
            Self::ChangeColumn { table, column } => {
                format!("Change column '{}' in table '{table}'", column.name)
            }
            Self::RenameColumn { table, from, to } => {
                format!("Rename column '{from}' to '{to}' in table '{table}'")
            }
            Self::AddIndex { table, index } => {
                format!("Add index '{}' on table '{table}'", index.name)
            }
            Self::DropIndex { table, index } => {
                format!("Drop index '{}' from table '{table}'", index.name)
            }
            Self::AddForeignKey { table, foreign_key } => format!(
                "Add foreign key '{}' to table '{table}'",
                foreign_key.name
            ),
            Self::DropForeignKey { table, foreign_key } => format!(
                "Drop foreign key '{}' from table '{table}'",
                foreign_key.name
            ),
            Self::DropPrimaryKey { table, .. } => {
                format!("Drop primary key of table '{table}'")
            }
            Self::AddPrimaryKey { table, columns } => format!(
                "Add primary key ({}) to table '{table}'",
                columns.join(", ")
            ),
            Self::ChangeTableOptions { table, .. } => {
                format!("Change options of table '{table}'")
            }
            Self::BulkChange { table, operations } => format!(
                "Change table '{table}' ({} alterations)",
                operations.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    #[test]
    fn test_table_name() {
        let op = Operation::RenameTable {
            from: "people".into(),
            to: "users".into(),
        };
        assert_eq!(op.table_name(), "users");
        assert_eq!(Operation::drop_table("logs").table_name(), "logs");
    }

    #[test]
    fn test_description() {
        let op = Operation::AddColumn {
            table: "users".into(),
            column: Column::new("email", ColumnType::String { limit: Some(255) }),
            after: Some("name".into()),
        };
        assert_eq!(op.description(), "Add column 'email' to table 'users'");
        let bulk = Operation::BulkChange {
            table: "users".into(),
            operations: vec![op, Operation::drop_column("users", "legacy")],
        };
        assert_eq!(bulk.description(), "Change table 'users' (2 alterations)");
    }
}
