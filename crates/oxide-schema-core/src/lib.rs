//! Declarative schema reconciliation.
//!
//! `oxide-schema-core` compares the schema a database has with the
//! schema a definition file declares and computes the operations that
//! reconcile them:
//!
//! - **Schema** - Tables, columns, indexes and foreign keys
//! - **DSL** - Parser and renderer for the definition language
//! - **Introspection** - Turns a database catalog into a schema
//! - **Differ** - Computes an ordered, dependency-safe [`Delta`]
//! - **Dialect** - SQL generation for MySQL and SQLite
//!
//! # Example
//!
//! ```rust
//! use oxide_schema_core::prelude::*;
//!
//! let parser = Parser::default();
//! let current = parser
//!     .parse_str(r#"create_table "users" do |t|
//!   t.string "name"
//! end"#)
//!     .unwrap();
//! let desired = parser
//!     .parse_str(r#"create_table "users" do |t|
//!   t.string "name"
//!   t.string "email"
//! end"#)
//!     .unwrap();
//!
//! let delta = Differ::default().diff(&current, &desired).unwrap();
//! assert!(delta.differ());
//! assert!(delta.script().starts_with("add_column \"users\", \"email\""));
//! ```
//!
//! Databases are reached through an [`Adapter`](adapter::Adapter); the
//! engine itself never opens connections.

pub mod adapter;
pub mod delta;
pub mod dialect;
pub mod diff;
pub mod dsl;
pub mod error;
pub mod introspect;
pub mod operation;
pub mod options;
pub mod schema;
pub mod state;

pub use delta::Delta;
pub use error::{Error, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::adapter::Adapter;
    pub use crate::delta::{Delta, MigrationReport, PlannedStatement};
    pub use crate::dialect::{Dialect, MySqlDialect, SqliteDialect};
    pub use crate::diff::{DiffWarning, Differ};
    pub use crate::dsl::{dump, dump_split, DumpOptions, FsLoader, MemoryLoader, Parser, SourceLoader};
    pub use crate::error::{ApplyError, DefinitionError, Error, IntrospectionError, Result};
    pub use crate::introspect::{Introspector, RawCatalog, TableFilter};
    pub use crate::operation::Operation;
    pub use crate::options::{DiffOptions, ForeignKeyMatching, ParseOptions, WidthDefaults};
    pub use crate::schema::{
        Column, ColumnType, DefaultValue, Deferrable, ForeignKey, ForeignKeyAction, Index,
        IndexKind, IntWidth, LobSize, Schema, Table,
    };
    pub use crate::state::SchemaState;
}
