//! Error types for schema reconciliation.

use std::fmt;
use std::path::PathBuf;

/// Boxed error coming from an adapter or dialect.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Position of a declaration in a definition source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub file: Option<PathBuf>,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file.display(), self.line, self.column),
            None => write!(f, "line {}, column {}", self.line, self.column),
        }
    }
}

fn location_suffix(location: &Option<Location>) -> String {
    location
        .as_ref()
        .map_or_else(String::new, |l| format!(" (at {l})"))
}

/// A malformed or self-inconsistent schema declaration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{declaration}: {cause}{}", location_suffix(.location))]
pub struct DefinitionError {
    /// The offending declaration, e.g. `create_table "users"`.
    pub declaration: String,
    /// Human-readable cause.
    pub cause: String,
    pub location: Option<Location>,
}

impl DefinitionError {
    /// Creates an error without a source location.
    pub fn new(declaration: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            declaration: declaration.into(),
            cause: cause.into(),
            location: None,
        }
    }

    /// Attaches a source location.
    #[must_use]
    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

/// Failure while reading a live catalog into a schema.
#[derive(Debug, thiserror::Error)]
pub enum IntrospectionError {
    /// The adapter failed to read the catalog.
    #[error("catalog read failed: {0}")]
    Adapter(#[source] BoxError),

    /// A native column type has no canonical counterpart.
    #[error("table '{table}': unknown type '{native}' for column '{column}'")]
    UnknownType {
        table: String,
        column: String,
        native: String,
    },

    /// A referential action the model cannot represent.
    #[error("table '{table}': unknown referential action '{action}'")]
    UnknownAction { table: String, action: String },

    /// An index method the model cannot represent.
    #[error("table '{table}': unknown index type '{kind}' on '{index}'")]
    UnknownIndexKind {
        table: String,
        index: String,
        kind: String,
    },

    /// An ignore pattern is not a valid regular expression.
    #[error("invalid table pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A dialect cannot express an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialectError {
    #[error("{dialect} does not support {feature}")]
    Unsupported {
        dialect: &'static str,
        feature: String,
    },

    #[error("table '{0}' is not known to the dialect")]
    UnknownTable(String),
}

/// An operation cannot be replayed on the tracked schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("table '{0}' does not exist")]
    UnknownTable(String),

    #[error("column '{column}' already exists in '{table}'")]
    ColumnExists { table: String, column: String },

    #[error("column '{column}' does not exist in '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("index '{index}' does not exist in '{table}'")]
    UnknownIndex { table: String, index: String },

    #[error("foreign key '{name}' does not exist in '{table}'")]
    UnknownForeignKey { table: String, name: String },
}

/// A statement failed while applying a delta.
///
/// Operations before `index` were applied and remain applied.
#[derive(Debug, thiserror::Error)]
#[error("operation #{index} ({operation}) failed after {applied} applied operation(s): {source}")]
pub struct ApplyError {
    /// Description of the failing operation.
    pub operation: String,
    /// Zero-based position of the failing operation.
    pub index: usize,
    /// Number of operations that completed.
    pub applied: usize,
    /// Statement being executed, when the failure came from the adapter.
    pub statement: Option<String>,
    #[source]
    pub source: BoxError,
}

/// Errors from the reconciliation engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Introspection(#[from] IntrospectionError),

    /// The primary key differs and `allow_pk_change` is unset.
    #[error(
        "primary key of '{table}' changes from [{}] to [{}]; enable allow_pk_change to apply it",
        .current.join(", "),
        .desired.join(", ")
    )]
    PrimaryKeyChange {
        table: String,
        current: Vec<String>,
        desired: Vec<String>,
    },

    /// Tables whose foreign keys cannot be created inline in any order.
    #[error("foreign keys form a cycle between tables: {}", .tables.join(", "))]
    UnresolvableDependency { tables: Vec<String> },

    #[error(transparent)]
    Dialect(#[from] DialectError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
