//! Schema introspection.
//!
//! An [`Adapter`] reports its catalog as a [`RawCatalog`]: native type
//! strings, default values as SQL literal text, raw action names and
//! possibly anonymous indexes and foreign keys. The [`Introspector`]
//! turns that into a [`Schema`] using the adapter's [`Dialect`].

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::dialect::Dialect;
use crate::error::IntrospectionError;
use crate::schema::{
    Column, Deferrable, ForeignKey, ForeignKeyAction, Index, IndexKind, Schema, Table,
    OPTION_COMMENT,
};

type IntrospectResult<T> = Result<T, IntrospectionError>;

/// Catalog contents as an adapter reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCatalog {
    pub tables: Vec<RawTable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub name: String,
    pub columns: Vec<RawColumn>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<RawIndex>,
    pub foreign_keys: Vec<RawForeignKey>,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: String,
    /// Type as the catalog spells it, e.g. `int(10) unsigned`.
    pub native_type: String,
    pub nullable: bool,
    /// Default as SQL literal text: strings quoted, expressions bare.
    pub default: Option<String>,
    pub auto_increment: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIndex {
    /// `None` for anonymous indexes.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Index method, e.g. `BTREE` or `FULLTEXT`.
    pub kind: Option<String>,
    pub lengths: BTreeMap<String, u32>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawForeignKey {
    /// `None` for anonymous constraints.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
    /// `DEFERRED` or `IMMEDIATE` for deferrable constraints.
    pub deferrable: Option<String>,
}

/// Selects the tables a run works on.
///
/// An explicit table list restricts the run to those names; ignore
/// patterns are unanchored regular expressions that exclude matches.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    tables: Option<BTreeSet<String>>,
    ignore: Vec<Regex>,
}

impl TableFilter {
    /// A filter accepting every table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the filter to the given tables.
    #[must_use]
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Excludes tables matching `pattern`.
    pub fn ignore_pattern(mut self, pattern: &str) -> IntrospectResult<Self> {
        self.ignore.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Whether `table` is part of the run.
    #[must_use]
    pub fn matches(&self, table: &str) -> bool {
        if let Some(tables) = &self.tables {
            if !tables.contains(table) {
                return false;
            }
        }
        !self.ignore.iter().any(|re| re.is_match(table))
    }

    /// Keeps only the accepted tables of `schema`.
    #[must_use]
    pub fn filter_schema(&self, mut schema: Schema) -> Schema {
        schema.tables.retain(|name, _| self.matches(name));
        schema
    }
}

/// Reads a live database into a [`Schema`].
#[derive(Debug)]
pub struct Introspector<'a, A> {
    adapter: &'a A,
    filter: TableFilter,
}

impl<'a, A: Adapter> Introspector<'a, A> {
    /// Creates an introspector accepting every table.
    #[must_use]
    pub fn new(adapter: &'a A) -> Self {
        Self {
            adapter,
            filter: TableFilter::new(),
        }
    }

    /// Sets the table filter.
    #[must_use]
    pub fn with_filter(mut self, filter: TableFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Reads the catalog and converts it.
    pub async fn introspect(&self) -> IntrospectResult<Schema> {
        let catalog = self
            .adapter
            .catalog(&self.filter)
            .await
            .map_err(|e| IntrospectionError::Adapter(Box::new(e)))?;
        info!(
            dialect = self.adapter.dialect().name(),
            tables = catalog.tables.len(),
            "read catalog"
        );
        convert_catalog(&catalog, self.adapter.dialect(), &self.filter)
    }
}

/// Converts a raw catalog into a schema.
pub fn convert_catalog<D: Dialect + ?Sized>(
    catalog: &RawCatalog,
    dialect: &D,
    filter: &TableFilter,
) -> IntrospectResult<Schema> {
    let mut schema = Schema::new();
    for raw in catalog.tables.iter().filter(|t| filter.matches(&t.name)) {
        let table = convert_table(raw, dialect)?;
        debug!(
            table = %table.name,
            columns = table.columns.len(),
            indexes = table.indexes.len(),
            foreign_keys = table.foreign_keys.len(),
            "introspected table"
        );
        schema.add_table(table);
    }
    Ok(schema)
}

fn convert_table<D: Dialect + ?Sized>(raw: &RawTable, dialect: &D) -> IntrospectResult<Table> {
    let mut table = Table::new(&raw.name);

    for rc in &raw.columns {
        let native = dialect
            .parse_native_type(&rc.native_type)
            .ok_or_else(|| IntrospectionError::UnknownType {
                table: raw.name.clone(),
                column: rc.name.clone(),
                native: rc.native_type.clone(),
            })?;
        let default = dialect.parse_default(rc.default.as_deref(), &native.column_type);
        let mut column = Column::new(&rc.name, native.column_type);
        column.nullable = rc.nullable;
        column.default = default;
        column.unsigned = native.unsigned;
        column.auto_increment = rc.auto_increment;
        column.comment = rc.comment.clone().filter(|c| !c.is_empty());
        table.columns.push(column);
    }
    table.primary_key.clone_from(&raw.primary_key);

    for ri in &raw.indexes {
        let name = ri
            .name
            .clone()
            .unwrap_or_else(|| Index::synthesized_name(&raw.name, &ri.columns));
        let kind = match ri.kind.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("BTREE") => IndexKind::BTree,
            Some("HASH") => IndexKind::Hash,
            Some("FULLTEXT") => IndexKind::FullText,
            Some("SPATIAL") => IndexKind::Spatial,
            Some(other) => {
                return Err(IntrospectionError::UnknownIndexKind {
                    table: raw.name.clone(),
                    index: name,
                    kind: other.to_string(),
                })
            }
        };
        let mut index = Index::new(name, ri.columns.clone()).with_kind(kind);
        index.unique = ri.unique;
        index.lengths.clone_from(&ri.lengths);
        index.condition.clone_from(&ri.condition);
        table.indexes.push(index);
    }

    for rf in &raw.foreign_keys {
        let action = |raw_action: &Option<String>| -> IntrospectResult<ForeignKeyAction> {
            match raw_action {
                None => Ok(ForeignKeyAction::NoAction),
                Some(a) => dialect
                    .parse_action(a)
                    .ok_or_else(|| IntrospectionError::UnknownAction {
                        table: raw.name.clone(),
                        action: a.clone(),
                    }),
            }
        };
        let (name, default_name) = match &rf.name {
            Some(name) => (
                name.clone(),
                dialect.is_default_foreign_key_name(&raw.name, name, &rf.columns),
            ),
            None => (ForeignKey::synthesized_name(&raw.name, &rf.columns), true),
        };
        let mut fk = ForeignKey::new(
            name,
            rf.columns.clone(),
            &rf.references_table,
            rf.references_columns.clone(),
        )
        .on_delete(action(&rf.on_delete)?)
        .on_update(action(&rf.on_update)?);
        fk.default_name = default_name;
        fk.deferrable = match rf.deferrable.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("DEFERRED") => Deferrable::Deferred,
            Some("IMMEDIATE") => Deferrable::Immediate,
            _ => Deferrable::NotDeferrable,
        };
        table.foreign_keys.push(fk);
    }

    table.options = raw
        .options
        .iter()
        .filter(|(k, v)| !(k.as_str() == OPTION_COMMENT && v.is_empty()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, SqliteDialect};
    use crate::schema::{ColumnType, DefaultValue, IntWidth};

    fn raw_posts() -> RawTable {
        RawTable {
            name: "posts".into(),
            columns: vec![
                RawColumn {
                    name: "id".into(),
                    native_type: "bigint unsigned".into(),
                    nullable: false,
                    auto_increment: true,
                    ..RawColumn::default()
                },
                RawColumn {
                    name: "user_id".into(),
                    native_type: "int(11)".into(),
                    nullable: true,
                    ..RawColumn::default()
                },
                RawColumn {
                    name: "state".into(),
                    native_type: "varchar(16)".into(),
                    nullable: false,
                    default: Some("'draft'".into()),
                    comment: Some(String::new()),
                    ..RawColumn::default()
                },
            ],
            primary_key: vec!["id".into()],
            indexes: vec![RawIndex {
                name: None,
                columns: vec!["user_id".into()],
                ..RawIndex::default()
            }],
            foreign_keys: vec![RawForeignKey {
                name: Some("posts_ibfk_1".into()),
                columns: vec!["user_id".into()],
                references_table: "users".into(),
                references_columns: vec!["id".into()],
                on_delete: Some("CASCADE".into()),
                on_update: Some("NO ACTION".into()),
                deferrable: None,
            }],
            options: BTreeMap::from([
                ("engine".to_string(), "InnoDB".to_string()),
                ("comment".to_string(), String::new()),
            ]),
        }
    }

    #[test]
    fn test_convert_catalog() {
        let catalog = RawCatalog {
            tables: vec![raw_posts()],
        };
        let schema = convert_catalog(&catalog, &MySqlDialect::new(), &TableFilter::new()).unwrap();
        let posts = schema.table("posts").unwrap();
        let id = posts.column("id").unwrap();
        assert_eq!(id.column_type, ColumnType::Integer(IntWidth::Big));
        assert!(id.unsigned && id.auto_increment && !id.nullable);
        let state = posts.column("state").unwrap();
        assert_eq!(state.default, DefaultValue::String("draft".into()));
        assert_eq!(state.comment, None);
        assert_eq!(posts.indexes[0].name, "index_posts_on_user_id");
        let fk = &posts.foreign_keys[0];
        assert!(fk.default_name);
        assert_eq!(fk.on_delete, ForeignKeyAction::Cascade);
        assert_eq!(fk.on_update, ForeignKeyAction::NoAction);
        assert_eq!(posts.options.len(), 1);
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let mut posts = raw_posts();
        posts.columns[1].native_type = "geometry".into();
        let catalog = RawCatalog {
            tables: vec![posts],
        };
        let err = convert_catalog(&catalog, &SqliteDialect::new(), &TableFilter::new()).unwrap_err();
        assert!(matches!(err, IntrospectionError::UnknownType { ref native, .. } if native == "geometry"));
    }

    #[test]
    fn test_table_filter() {
        let filter = TableFilter::new().ignore_pattern("^tmp_").unwrap();
        assert!(filter.matches("users"));
        assert!(!filter.matches("tmp_users"));
        let only = TableFilter::new().with_tables(["users", "tmp_users"]).ignore_pattern("tmp").unwrap();
        assert!(only.matches("users"));
        assert!(!only.matches("tmp_users"));
        assert!(!only.matches("posts"));
        assert!(TableFilter::new().ignore_pattern("(").is_err());
    }
}
