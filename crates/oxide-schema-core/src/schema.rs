//! Schema model.
//!
//! An adapter-agnostic snapshot of a database structure. Both the
//! [`Introspector`](crate::introspect::Introspector) and the
//! [`Parser`](crate::dsl::Parser) produce a [`Schema`]; the
//! [`Differ`](crate::diff::Differ) compares two of them.
//!
//! Tables are kept in a `BTreeMap` so every traversal is ordered by
//! name, which keeps the differ and the renderers deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Table option key holding the table comment.
pub const OPTION_COMMENT: &str = "comment";
/// Table option key holding the storage engine.
pub const OPTION_ENGINE: &str = "engine";
/// Table option key holding the default character set.
pub const OPTION_CHARSET: &str = "charset";
/// Table option key holding the default collation.
pub const OPTION_COLLATION: &str = "collation";

/// Width class of an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntWidth {
    /// 1 byte.
    Tiny,
    /// 2 bytes.
    Small,
    /// 3 bytes.
    Medium,
    /// 4 bytes.
    Int,
    /// 8 bytes.
    Big,
}

impl IntWidth {
    /// Maps a byte count (`limit:` in the DSL) to a width class.
    #[must_use]
    pub const fn from_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            1 => Some(Self::Tiny),
            2 => Some(Self::Small),
            3 => Some(Self::Medium),
            4 => Some(Self::Int),
            5..=8 => Some(Self::Big),
            _ => None,
        }
    }

    /// Storage size in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Tiny => 1,
            Self::Small => 2,
            Self::Medium => 3,
            Self::Int => 4,
            Self::Big => 8,
        }
    }
}

/// Size class shared by the text and blob families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LobSize {
    Tiny,
    #[default]
    Regular,
    Medium,
    Long,
}

impl LobSize {
    /// DSL symbol for this size (`size: :medium`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Regular => "regular",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }

    /// Parses a DSL size symbol.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tiny" => Some(Self::Tiny),
            "regular" | "normal" => Some(Self::Regular),
            "medium" => Some(Self::Medium),
            "long" => Some(Self::Long),
            _ => None,
        }
    }
}

/// Canonical column type.
///
/// Widths are optional so that a declaration without a width and an
/// introspected column with the adapter's implicit width can be
/// reconciled through [`WidthDefaults`](crate::options::WidthDefaults).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer(IntWidth),
    Decimal {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Float {
        precision: Option<u32>,
    },
    Double,
    /// Variable-length string (`varchar`).
    String {
        limit: Option<u32>,
    },
    Char {
        limit: Option<u32>,
    },
    Text(LobSize),
    /// Variable-length binary (`varbinary`).
    Binary {
        limit: Option<u32>,
    },
    Blob(LobSize),
    Boolean,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
    Enum(Vec<String>),
    Set(Vec<String>),
}

impl ColumnType {
    /// Short family name used in descriptions and warnings.
    #[must_use]
    pub const fn family(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Decimal { .. } => "decimal",
            Self::Float { .. } => "float",
            Self::Double => "double",
            Self::String { .. } => "string",
            Self::Char { .. } => "char",
            Self::Text(_) => "text",
            Self::Binary { .. } => "binary",
            Self::Blob(_) => "blob",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
            Self::Enum(_) => "enum",
            Self::Set(_) => "set",
        }
    }

    /// Returns `true` for the integer family.
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    /// Returns `true` for types whose literal defaults are text.
    #[must_use]
    pub const fn is_textual(&self) -> bool {
        matches!(
            self,
            Self::String { .. }
                | Self::Char { .. }
                | Self::Text(_)
                | Self::Binary { .. }
                | Self::Blob(_)
                | Self::Enum(_)
                | Self::Set(_)
                | Self::Date
                | Self::Time
                | Self::DateTime
                | Self::Timestamp
                | Self::Json
        )
    }
}

/// Default value of a column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum DefaultValue {
    /// No default clause.
    #[default]
    None,
    /// `DEFAULT NULL`.
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Raw SQL expression such as `CURRENT_TIMESTAMP`.
    Expression(String),
}

impl DefaultValue {
    /// Returns `true` when no default clause is present.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Coerces a literal to the representation the given type stores,
    /// so `default: 0` on a boolean compares equal to an introspected
    /// `false`.
    #[must_use]
    pub fn normalized_for(&self, column_type: &ColumnType) -> Self {
        match (column_type, self) {
            (ColumnType::Boolean, Self::Integer(n)) => Self::Bool(*n != 0),
            (ColumnType::Boolean, Self::String(s)) => match s.as_str() {
                "1" | "true" | "TRUE" => Self::Bool(true),
                "0" | "false" | "FALSE" => Self::Bool(false),
                _ => self.clone(),
            },
            (ColumnType::Integer(_), Self::Bool(b)) => Self::Integer(i64::from(*b)),
            (ColumnType::Integer(_), Self::String(s)) => {
                s.parse().map_or_else(|_| self.clone(), Self::Integer)
            }
            (
                ColumnType::Decimal { .. } | ColumnType::Float { .. } | ColumnType::Double,
                Self::Integer(n),
            ) => Self::Float(*n as f64),
            (
                ColumnType::Decimal { .. } | ColumnType::Float { .. } | ColumnType::Double,
                Self::String(s),
            ) => s
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map_or_else(|| self.clone(), Self::Float),
            (ty, Self::Integer(n)) if ty.is_textual() => Self::String(n.to_string()),
            (ty, Self::Float(f)) if ty.is_textual() => Self::String(f.to_string()),
            _ => self.clone(),
        }
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: DefaultValue,
    pub auto_increment: bool,
    pub unsigned: bool,
    pub comment: Option<String>,
    /// Declared previous name; only a declaration produces a rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

impl Column {
    /// Creates a nullable column without a default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: DefaultValue::None,
            auto_increment: false,
            unsigned: false,
            comment: None,
            renamed_from: None,
        }
    }

    /// Marks the column as NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = default;
        self
    }

    /// Marks the column as auto-increment.
    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Marks the column as unsigned.
    #[must_use]
    pub const fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    /// Sets the column comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Declares that this column was previously named `from`.
    #[must_use]
    pub fn renamed_from(mut self, from: impl Into<String>) -> Self {
        self.renamed_from = Some(from.into());
        self
    }
}

/// Index method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexKind {
    #[default]
    BTree,
    Hash,
    FullText,
    Spatial,
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub kind: IndexKind,
    /// Prefix length per column.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lengths: BTreeMap<String, u32>,
    /// Partial index predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Index {
    /// Creates a non-unique btree index.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            kind: IndexKind::BTree,
            lengths: BTreeMap::new(),
            condition: None,
        }
    }

    /// Name given to an index declared without one.
    #[must_use]
    pub fn synthesized_name(table: &str, columns: &[String]) -> String {
        format!("index_{}_on_{}", table, columns.join("_and_"))
    }

    /// Marks the index as unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the index method.
    #[must_use]
    pub const fn with_kind(mut self, kind: IndexKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets a prefix length on one column.
    #[must_use]
    pub fn with_length(mut self, column: impl Into<String>, length: u32) -> Self {
        self.lengths.insert(column.into(), length);
        self
    }

    /// Sets a partial index predicate.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Same column list and uniqueness.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.columns == other.columns && self.unique == other.unique
    }

    /// Equal in everything but the name.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.same_shape(other)
            && self.kind == other.kind
            && self.lengths == other.lengths
            && self.condition == other.condition
    }
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// SQL keyword form.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// DSL symbol form.
    #[must_use]
    pub const fn as_symbol(self) -> &'static str {
        match self {
            Self::NoAction => "no_action",
            Self::Restrict => "restrict",
            Self::Cascade => "cascade",
            Self::SetNull => "nullify",
            Self::SetDefault => "set_default",
        }
    }

    /// Parses a DSL symbol.
    #[must_use]
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "no_action" => Some(Self::NoAction),
            "restrict" => Some(Self::Restrict),
            "cascade" => Some(Self::Cascade),
            "nullify" | "set_null" => Some(Self::SetNull),
            "set_default" => Some(Self::SetDefault),
            _ => None,
        }
    }

    /// Parses the SQL keyword form reported by catalogs.
    #[must_use]
    pub fn from_sql(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO ACTION" | "NONE" | "" => Some(Self::NoAction),
            "RESTRICT" => Some(Self::Restrict),
            "CASCADE" => Some(Self::Cascade),
            "SET NULL" => Some(Self::SetNull),
            "SET DEFAULT" => Some(Self::SetDefault),
            _ => None,
        }
    }
}

/// Constraint checking time, where the database supports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Deferrable {
    #[default]
    NotDeferrable,
    Immediate,
    Deferred,
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    /// The name was synthesized or follows the adapter's default naming.
    pub default_name: bool,
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
    pub deferrable: Deferrable,
}

impl ForeignKey {
    /// Creates a foreign key with an explicit name.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        references_table: impl Into<String>,
        references_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            default_name: false,
            columns,
            references_table: references_table.into(),
            references_columns,
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
            deferrable: Deferrable::NotDeferrable,
        }
    }

    /// Name given to a foreign key declared without one.
    #[must_use]
    pub fn synthesized_name(table: &str, columns: &[String]) -> String {
        format!("fk_{}_{}", table, columns.join("_"))
    }

    /// Sets the on-delete action.
    #[must_use]
    pub const fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Sets the on-update action.
    #[must_use]
    pub const fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }

    /// Flags the name as a default one.
    #[must_use]
    pub const fn with_default_name(mut self) -> Self {
        self.default_name = true;
        self
    }

    /// Same source columns, referenced table and referenced columns.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.references_table == other.references_table
            && self.references_columns == other.references_columns
    }

    /// Equal in everything but the name.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.same_shape(other)
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
            && self.deferrable == other.deferrable
    }
}

/// A table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Opaque options: engine, charset, collation, comment and any
    /// adapter-specific pairs.
    pub options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
    /// Raw fragment appended to ALTER TABLE statements for this table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alter_extra: Option<String>,
}

impl Table {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            options: BTreeMap::new(),
            renamed_from: None,
            alter_extra: None,
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Appends an index.
    #[must_use]
    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Appends a foreign key.
    #[must_use]
    pub fn with_foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Sets a table option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Declares that this table was previously named `from`.
    #[must_use]
    pub fn renamed_from(mut self, from: impl Into<String>) -> Self {
        self.renamed_from = Some(from.into());
        self
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Looks up a column by name, mutably.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Zero-based position of a column.
    #[must_use]
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Looks up a foreign key by name.
    #[must_use]
    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|f| f.name == name)
    }

    /// The table comment, if any.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.options.get(OPTION_COMMENT).map(String::as_str)
    }
}

/// A database schema: tables by name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub tables: BTreeMap<String, Table>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, builder style.
    #[must_use]
    pub fn with_table(mut self, table: Table) -> Self {
        self.add_table(table);
        self
    }

    /// Inserts a table, returning the one it replaced.
    pub fn add_table(&mut self, table: Table) -> Option<Table> {
        self.tables.insert(table.name.clone(), table)
    }

    /// Looks up a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Looks up a table by name, mutably.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Whether a table exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the schema has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
