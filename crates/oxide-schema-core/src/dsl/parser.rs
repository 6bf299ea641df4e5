//! Interpretation of parsed calls into a [`Schema`].
//!
//! `add_index` and `add_foreign_key` statements, as well as inline
//! `t.index` and `t.foreign_key`, are collected while reading and
//! resolved once every source has been read, so declaration order
//! across files does not matter.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::ast::{Call, OptionArg, SyntaxParser, Value};
use super::lexer::Lexer;
use super::loader::{resolve_require, SourceLoader};
use super::token::{Span, SyntaxError};
use crate::error::{DefinitionError, Location};
use crate::options::ParseOptions;
use crate::schema::{
    Column, ColumnType, Deferrable, DefaultValue, ForeignKey, ForeignKeyAction, Index,
    IndexKind, IntWidth, LobSize, Schema, Table, OPTION_CHARSET, OPTION_COLLATION,
    OPTION_COMMENT, OPTION_ENGINE,
};

type ParseResult<T> = Result<T, DefinitionError>;

const TABLE_OPTIONS: &[&str] = &[
    "id",
    "primary_key",
    "force",
    "comment",
    "engine",
    "charset",
    "collation",
    "options",
    "renamed_from",
    "alter_extra",
];

const COLUMN_OPTIONS: &[&str] = &[
    "null",
    "default",
    "unsigned",
    "auto_increment",
    "comment",
    "primary_key",
    "renamed_from",
];

const INDEX_OPTIONS: &[&str] = &["name", "unique", "length", "using", "type", "where"];

const FOREIGN_KEY_OPTIONS: &[&str] = &[
    "column",
    "primary_key",
    "name",
    "on_delete",
    "on_update",
    "deferrable",
];

/// Parser for schema definition sources.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    options: ParseOptions,
}

impl Parser {
    /// Creates a parser.
    #[must_use]
    pub const fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    /// Parses a single self-contained source. `require` is rejected.
    pub fn parse_str(&self, source: &str) -> ParseResult<Schema> {
        let mut builder = Builder::new(&self.options, None);
        builder.read(source)?;
        builder.finish()
    }

    /// Parses a root file, following `require` through `loader`.
    pub fn parse_file(&self, path: &Path, loader: &dyn SourceLoader) -> ParseResult<Schema> {
        let mut builder = Builder::new(&self.options, Some(loader));
        builder.require_path(path, None)?;
        builder.finish()
    }
}

struct PendingIndex {
    table: String,
    index: Index,
    declaration: String,
    location: Location,
}

struct PendingForeignKey {
    table: String,
    foreign_key: ForeignKey,
    declaration: String,
    location: Location,
}

enum IdSpec {
    Implicit(String),
    Disabled,
}

struct Builder<'a> {
    options: &'a ParseOptions,
    loader: Option<&'a dyn SourceLoader>,
    file: Option<PathBuf>,
    stack: Vec<PathBuf>,
    loaded: BTreeSet<PathBuf>,
    schema: Schema,
    indexes: Vec<PendingIndex>,
    foreign_keys: Vec<PendingForeignKey>,
}

impl<'a> Builder<'a> {
    fn new(options: &'a ParseOptions, loader: Option<&'a dyn SourceLoader>) -> Self {
        Self {
            options,
            loader,
            file: None,
            stack: Vec::new(),
            loaded: BTreeSet::new(),
            schema: Schema::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    fn location(&self, span: Span) -> Location {
        Location {
            file: self.file.clone(),
            line: span.line,
            column: span.column,
        }
    }

    fn error(&self, call: &Call, cause: impl Into<String>) -> DefinitionError {
        DefinitionError::new(call.describe(), cause).at(self.location(call.span))
    }

    fn option_error(&self, call: &Call, opt: &OptionArg, cause: impl Into<String>) -> DefinitionError {
        DefinitionError::new(call.describe(), cause).at(self.location(opt.span))
    }

    fn syntax_error(&self, err: SyntaxError) -> DefinitionError {
        DefinitionError::new("syntax", err.message).at(self.location(err.span))
    }

    fn read(&mut self, source: &str) -> ParseResult<()> {
        let tokens = Lexer::new(source)
            .tokenize()
            .map_err(|e| self.syntax_error(e))?;
        let calls = SyntaxParser::new(tokens)
            .parse_program()
            .map_err(|e| self.syntax_error(e))?;
        for call in &calls {
            self.statement(call)?;
        }
        Ok(())
    }

    fn statement(&mut self, call: &Call) -> ParseResult<()> {
        if call.receiver.is_some() {
            return Err(self.error(call, "method call outside of a table block"));
        }
        match call.method.as_str() {
            "require" | "require_relative" => self.require(call),
            "create_table" => self.create_table(call),
            "add_index" => {
                let table = self.positional_name(call, 0, "a table name")?;
                let index = self.index(call, &table, call.args.get(1), &call.options)?;
                self.push_index(call, table, index);
                Ok(())
            }
            "add_foreign_key" => {
                let table = self.positional_name(call, 0, "a table name")?;
                let to = self.positional_name(call, 1, "a referenced table name")?;
                let foreign_key = self.foreign_key(call, &table, &to, &call.options)?;
                self.push_foreign_key(call, table, foreign_key);
                Ok(())
            }
            other => Err(self.error(call, format!("unknown declaration '{other}'"))),
        }
    }

    // ============================================================
    // require
    // ============================================================

    fn require(&mut self, call: &Call) -> ParseResult<()> {
        let target = self.positional_name(call, 0, "a file path")?;
        if self.loader.is_none() {
            return Err(self.error(call, "require is only available when parsing files"));
        }
        let base = self.file.clone().unwrap_or_default();
        let path = resolve_require(&base, &target);
        self.require_path(&path, Some(call))
    }

    fn require_path(&mut self, path: &Path, call: Option<&Call>) -> ParseResult<()> {
        let path = super::loader::normalize_path(path);
        let fail = |this: &Self, cause: String| match call {
            Some(call) => this.error(call, cause),
            None => DefinitionError::new(format!("{}", path.display()), cause),
        };
        if self.stack.contains(&path) {
            return Err(fail(self, format!("require cycle through '{}'", path.display())));
        }
        if !self.loaded.insert(path.clone()) {
            return Ok(());
        }
        let Some(loader) = self.loader else {
            return Err(fail(self, "no source loader".to_string()));
        };
        let source = loader
            .load(&path)
            .map_err(|e| fail(self, format!("cannot read '{}': {e}", path.display())))?;
        debug!(path = %path.display(), "reading schema definition");

        let previous = self.file.replace(path.clone());
        self.stack.push(path);
        let result = self.read(&source);
        self.stack.pop();
        self.file = previous;
        result
    }

    // ============================================================
    // create_table
    // ============================================================

    fn create_table(&mut self, call: &Call) -> ParseResult<()> {
        let name = self.positional_name(call, 0, "a table name")?;
        if call.args.len() > 1 {
            return Err(self.error(call, "create_table takes a single table name"));
        }
        if self.schema.contains(&name) {
            return Err(self.error(call, format!("duplicate table '{name}'")));
        }
        self.check_options(call, &call.options, TABLE_OPTIONS)?;

        let mut table = Table::new(&name);
        let mut flagged_pk = Vec::new();

        if let Some(block) = &call.block {
            let param = block.param.as_deref().unwrap_or("t");
            for body in &block.body {
                if body.receiver.as_deref() != Some(param) {
                    return Err(self.error(
                        body,
                        format!("expected a call on block parameter '{param}'"),
                    ));
                }
                self.table_body(body, &mut table, &mut flagged_pk)?;
            }
        }

        self.resolve_primary_key(call, &mut table, flagged_pk)?;

        for opt in &call.options {
            match opt.key.as_str() {
                "comment" => {
                    if let Some(comment) = self.optional_string(call, opt)? {
                        table.options.insert(OPTION_COMMENT.to_string(), comment);
                    }
                }
                key @ ("engine" | "charset" | "collation") => {
                    let value = self.string(call, opt)?;
                    let key = match key {
                        "engine" => OPTION_ENGINE,
                        "charset" => OPTION_CHARSET,
                        _ => OPTION_COLLATION,
                    };
                    table.options.insert(key.to_string(), value);
                }
                "options" => match &opt.value {
                    Value::Str(raw) => {
                        table.options.insert("options".to_string(), raw.clone());
                    }
                    Value::Hash(pairs) => {
                        for (key, value) in pairs {
                            let value = scalar_text(value).ok_or_else(|| {
                                self.option_error(call, opt, format!("option '{key}' must be a scalar"))
                            })?;
                            table.options.insert(key.clone(), value);
                        }
                    }
                    other => {
                        return Err(self.option_error(
                            call,
                            opt,
                            format!("options must be a string or hash, got {}", other.kind()),
                        ))
                    }
                },
                "renamed_from" => table.renamed_from = Some(self.name(call, opt)?),
                "alter_extra" => table.alter_extra = Some(self.string(call, opt)?),
                _ => {}
            }
        }

        debug!(table = %name, columns = table.columns.len(), "declared table");
        self.schema.add_table(table);
        Ok(())
    }

    fn table_body(
        &mut self,
        call: &Call,
        table: &mut Table,
        flagged_pk: &mut Vec<String>,
    ) -> ParseResult<()> {
        match call.method.as_str() {
            "index" => {
                let index = self.index(call, &table.name, call.args.first(), &call.options)?;
                self.push_index(call, table.name.clone(), index);
            }
            "foreign_key" => {
                let to = self.positional_name(call, 0, "a referenced table name")?;
                let foreign_key = self.foreign_key(call, &table.name, &to, &call.options)?;
                self.push_foreign_key(call, table.name.clone(), foreign_key);
            }
            "timestamps" => {
                self.check_options(call, &call.options, &["null"])?;
                let nullable = match call.option("null") {
                    Some(Value::Bool(b)) => *b,
                    Some(_) => return Err(self.error(call, "null must be true or false")),
                    None => false,
                };
                for name in ["created_at", "updated_at"] {
                    let mut column = Column::new(name, ColumnType::DateTime);
                    column.nullable = nullable;
                    self.add_column(call, table, column)?;
                }
            }
            "references" | "belongs_to" => self.references(call, table)?,
            "column" => {
                let name = self.positional_name(call, 0, "a column name")?;
                let type_name = self.positional_name(call, 1, "a column type")?;
                if call.args.len() > 2 {
                    return Err(self.error(call, "column takes a name and a type"));
                }
                let (column, pk) = self.column(call, &name, &type_name)?;
                if pk {
                    flagged_pk.push(name);
                }
                self.add_column(call, table, column)?;
            }
            type_name => {
                if call.args.is_empty() {
                    return Err(self.error(call, "expected a column name"));
                }
                for (position, _) in call.args.iter().enumerate() {
                    let name = self.positional_name(call, position, "a column name")?;
                    let (column, pk) = self.column(call, &name, type_name)?;
                    if pk {
                        flagged_pk.push(name);
                    }
                    self.add_column(call, table, column)?;
                }
            }
        }
        Ok(())
    }

    fn add_column(&self, call: &Call, table: &mut Table, column: Column) -> ParseResult<()> {
        if table.column(&column.name).is_some() {
            return Err(self.error(call, format!("duplicate column '{}'", column.name)));
        }
        table.columns.push(column);
        Ok(())
    }

    fn resolve_primary_key(
        &self,
        call: &Call,
        table: &mut Table,
        flagged: Vec<String>,
    ) -> ParseResult<()> {
        let id = match call.option("id") {
            None | Some(Value::Bool(true)) => IdSpec::Implicit("bigint".to_string()),
            Some(Value::Bool(false)) => IdSpec::Disabled,
            Some(value) => match value.as_name() {
                Some(type_name) => IdSpec::Implicit(type_name.to_string()),
                None => return Err(self.error(call, "id must be false or a column type")),
            },
        };
        let declared = match call.option("primary_key") {
            None => None,
            Some(value) => Some(self.names_value(call, value, "primary_key")?),
        };
        if let Some(declared) = &declared {
            if !flagged.is_empty() && *declared != flagged {
                return Err(self.error(call, "conflicting primary key declarations"));
            }
        }

        let primary_key = if let Some(declared) = declared {
            let missing: Vec<&String> = declared
                .iter()
                .filter(|c| table.column(c).is_none())
                .collect();
            match (missing.as_slice(), &id) {
                ([], _) => {}
                ([only], IdSpec::Implicit(type_name)) if declared.len() == 1 => {
                    let column = self.implicit_id(call, only, type_name)?;
                    table.columns.insert(0, column);
                }
                ([first, ..], _) => {
                    return Err(self.error(
                        call,
                        format!("primary key column '{first}' is not declared"),
                    ))
                }
            }
            declared
        } else if !flagged.is_empty() {
            flagged
        } else if let IdSpec::Implicit(type_name) = &id {
            if table.column("id").is_none() {
                let column = self.implicit_id(call, "id", type_name)?;
                table.columns.insert(0, column);
            }
            vec!["id".to_string()]
        } else {
            Vec::new()
        };

        for name in &primary_key {
            if let Some(column) = table.column_mut(name) {
                column.nullable = false;
            }
        }
        table.primary_key = primary_key;
        Ok(())
    }

    fn implicit_id(&self, call: &Call, name: &str, type_name: &str) -> ParseResult<Column> {
        let column_type = self.column_type(call, type_name, &[])?;
        let auto_increment = column_type.is_integer();
        let mut column = Column::new(name, column_type).not_null();
        column.auto_increment = auto_increment;
        Ok(column)
    }

    // ============================================================
    // columns
    // ============================================================

    fn column(&self, call: &Call, name: &str, type_name: &str) -> ParseResult<(Column, bool)> {
        let (type_options, column_type) = self.column_type_with_options(call, type_name)?;
        let mut allowed: Vec<&str> = COLUMN_OPTIONS.to_vec();
        allowed.extend_from_slice(type_options);
        self.check_options(call, &call.options, &allowed)?;

        let mut column = Column::new(name, column_type);
        let mut primary_key = false;
        for opt in &call.options {
            match opt.key.as_str() {
                "null" => column.nullable = self.bool(call, opt)?,
                "default" => column.default = self.default_value(call, opt)?,
                "unsigned" => column.unsigned = self.bool(call, opt)?,
                "auto_increment" => column.auto_increment = self.bool(call, opt)?,
                "comment" => column.comment = self.optional_string(call, opt)?,
                "primary_key" => primary_key = self.bool(call, opt)?,
                "renamed_from" => column.renamed_from = Some(self.name(call, opt)?),
                _ => {}
            }
        }
        if column.unsigned
            && !matches!(
                column.column_type,
                ColumnType::Integer(_)
                    | ColumnType::Decimal { .. }
                    | ColumnType::Float { .. }
                    | ColumnType::Double
            )
        {
            return Err(self.error(call, "unsigned is only valid on numeric columns"));
        }
        column.default = column.default.normalized_for(&column.column_type);
        Ok((column, primary_key))
    }

    fn column_type_with_options(
        &self,
        call: &Call,
        type_name: &str,
    ) -> ParseResult<(&'static [&'static str], ColumnType)> {
        let allowed: &'static [&'static str] = match type_name {
            "integer" | "int" => &["limit"],
            "decimal" | "numeric" => &["precision", "scale"],
            "float" => &["limit", "precision"],
            "string" | "varchar" | "char" | "binary" | "varbinary" => &["limit"],
            "text" | "blob" => &["size"],
            "enum" | "set" => &["values"],
            _ => &[],
        };
        let column_type = self.column_type(call, type_name, &call.options)?;
        Ok((allowed, column_type))
    }

    fn column_type(&self, call: &Call, type_name: &str, opts: &[OptionArg]) -> ParseResult<ColumnType> {
        let find = |key: &str| opts.iter().find(|o| o.key == key);
        let width = |key: &str| -> ParseResult<Option<u32>> {
            find(key).map_or(Ok(None), |opt| self.u32_value(call, opt).map(Some))
        };
        let size = || -> ParseResult<LobSize> {
            match find("size") {
                None => Ok(LobSize::Regular),
                Some(opt) => {
                    let raw = self.name(call, opt)?;
                    LobSize::parse(&raw)
                        .ok_or_else(|| self.option_error(call, opt, format!("unknown size '{raw}'")))
                }
            }
        };

        let column_type = match type_name {
            "integer" | "int" => match find("limit") {
                None => ColumnType::Integer(IntWidth::Int),
                Some(opt) => {
                    let bytes = self.u32_value(call, opt)?;
                    let width = IntWidth::from_bytes(bytes).ok_or_else(|| {
                        self.option_error(call, opt, format!("integer limit must be 1 to 8 bytes, got {bytes}"))
                    })?;
                    ColumnType::Integer(width)
                }
            },
            "tinyint" => ColumnType::Integer(IntWidth::Tiny),
            "smallint" => ColumnType::Integer(IntWidth::Small),
            "mediumint" => ColumnType::Integer(IntWidth::Medium),
            "bigint" => ColumnType::Integer(IntWidth::Big),
            "decimal" | "numeric" => ColumnType::Decimal {
                precision: width("precision")?,
                scale: width("scale")?,
            },
            "float" => ColumnType::Float {
                precision: match width("precision")? {
                    Some(p) => Some(p),
                    None => width("limit")?,
                },
            },
            "double" => ColumnType::Double,
            "string" | "varchar" => ColumnType::String {
                limit: width("limit")?,
            },
            "char" => ColumnType::Char {
                limit: width("limit")?,
            },
            "text" => ColumnType::Text(size()?),
            "tinytext" => ColumnType::Text(LobSize::Tiny),
            "mediumtext" => ColumnType::Text(LobSize::Medium),
            "longtext" => ColumnType::Text(LobSize::Long),
            "binary" | "varbinary" => ColumnType::Binary {
                limit: width("limit")?,
            },
            "blob" => ColumnType::Blob(size()?),
            "tinyblob" => ColumnType::Blob(LobSize::Tiny),
            "mediumblob" => ColumnType::Blob(LobSize::Medium),
            "longblob" => ColumnType::Blob(LobSize::Long),
            "boolean" => ColumnType::Boolean,
            "date" => ColumnType::Date,
            "time" => ColumnType::Time,
            "datetime" => ColumnType::DateTime,
            "timestamp" => ColumnType::Timestamp,
            "json" => ColumnType::Json,
            "enum" | "set" => {
                let opt = find("values")
                    .ok_or_else(|| self.error(call, format!("{type_name} requires values:")))?;
                let values = self.names_value(call, &opt.value, "values")?;
                if values.is_empty() {
                    return Err(self.option_error(call, opt, "values must not be empty"));
                }
                if type_name == "enum" {
                    ColumnType::Enum(values)
                } else {
                    ColumnType::Set(values)
                }
            }
            other => return Err(self.error(call, format!("unknown column type '{other}'"))),
        };
        Ok(self.options.widths.normalize(&column_type))
    }

    fn default_value(&self, call: &Call, opt: &OptionArg) -> ParseResult<DefaultValue> {
        Ok(match &opt.value {
            Value::Nil => DefaultValue::Null,
            Value::Bool(b) => DefaultValue::Bool(*b),
            Value::Integer(n) => DefaultValue::Integer(*n),
            Value::Float(n) => DefaultValue::Float(*n),
            Value::Str(s) => DefaultValue::String(s.clone()),
            Value::Lambda(expr) => DefaultValue::Expression(expr.clone()),
            other => {
                return Err(self.option_error(
                    call,
                    opt,
                    format!("default cannot be a {}", other.kind()),
                ))
            }
        })
    }

    fn references(&mut self, call: &Call, table: &mut Table) -> ParseResult<()> {
        self.check_options(
            call,
            &call.options,
            &["type", "index", "foreign_key", "null", "comment"],
        )?;
        let base = self.positional_name(call, 0, "a reference name")?;
        let column_name = format!("{base}_id");
        let type_name = match call.option("type") {
            Some(value) => value
                .as_name()
                .ok_or_else(|| self.error(call, "type must be a symbol"))?
                .to_string(),
            None => "bigint".to_string(),
        };
        let mut column = Column::new(&column_name, self.column_type(call, &type_name, &[])?);
        for opt in &call.options {
            match opt.key.as_str() {
                "null" => column.nullable = self.bool(call, opt)?,
                "comment" => column.comment = self.optional_string(call, opt)?,
                _ => {}
            }
        }
        self.add_column(call, table, column)?;

        let columns = vec![column_name.clone()];
        match call.option("index") {
            None | Some(Value::Bool(true)) => {
                let index = Index::new(Index::synthesized_name(&table.name, &columns), columns.clone());
                self.push_index(call, table.name.clone(), index);
            }
            Some(Value::Bool(false)) => {}
            Some(Value::Hash(pairs)) => {
                let opts = hash_options(pairs, call.span);
                let index = self.index(call, &table.name, Some(&Value::Str(column_name.clone())), &opts)?;
                self.push_index(call, table.name.clone(), index);
            }
            Some(_) => return Err(self.error(call, "index must be a boolean or hash")),
        }

        match call.option("foreign_key") {
            None | Some(Value::Bool(false)) => {}
            Some(Value::Bool(true)) => {
                let mut opts = hash_options(&[], call.span);
                opts.push(OptionArg {
                    key: "column".to_string(),
                    value: Value::Str(column_name),
                    span: call.span,
                });
                let to = pluralize(&base);
                let foreign_key = self.foreign_key(call, &table.name, &to, &opts)?;
                self.push_foreign_key(call, table.name.clone(), foreign_key);
            }
            Some(Value::Hash(pairs)) => {
                let mut to = pluralize(&base);
                let mut rest = Vec::new();
                for (key, value) in pairs {
                    if key == "to_table" {
                        to = value
                            .as_name()
                            .ok_or_else(|| self.error(call, "to_table must be a string"))?
                            .to_string();
                    } else {
                        rest.push((key.clone(), value.clone()));
                    }
                }
                let mut opts = hash_options(&rest, call.span);
                if !opts.iter().any(|o| o.key == "column") {
                    opts.push(OptionArg {
                        key: "column".to_string(),
                        value: Value::Str(column_name),
                        span: call.span,
                    });
                }
                let foreign_key = self.foreign_key(call, &table.name, &to, &opts)?;
                self.push_foreign_key(call, table.name.clone(), foreign_key);
            }
            Some(_) => return Err(self.error(call, "foreign_key must be a boolean or hash")),
        }
        Ok(())
    }

    // ============================================================
    // indexes and foreign keys
    // ============================================================

    fn index(
        &self,
        call: &Call,
        table: &str,
        columns: Option<&Value>,
        opts: &[OptionArg],
    ) -> ParseResult<Index> {
        self.check_options(call, opts, INDEX_OPTIONS)?;
        let columns = match columns {
            Some(value) => self.names_value(call, value, "index columns")?,
            None => return Err(self.error(call, "expected index columns")),
        };
        if columns.is_empty() {
            return Err(self.error(call, "index needs at least one column"));
        }
        let mut index = Index::new(Index::synthesized_name(table, &columns), columns);
        for opt in opts {
            match opt.key.as_str() {
                "name" => index.name = self.name(call, opt)?,
                "unique" => index.unique = self.bool(call, opt)?,
                "where" => index.condition = Some(self.string(call, opt)?),
                "length" => match &opt.value {
                    Value::Integer(_) => {
                        let length = self.u32_value(call, opt)?;
                        for column in &index.columns {
                            index.lengths.insert(column.clone(), length);
                        }
                    }
                    Value::Hash(pairs) => {
                        for (column, value) in pairs {
                            let Value::Integer(n) = value else {
                                return Err(self.option_error(call, opt, "length must be an integer"));
                            };
                            let length = u32::try_from(*n)
                                .map_err(|_| self.option_error(call, opt, "length out of range"))?;
                            index.lengths.insert(column.clone(), length);
                        }
                    }
                    _ => return Err(self.option_error(call, opt, "length must be an integer or hash")),
                },
                "using" => {
                    let method = self.name(call, opt)?;
                    index.kind = match method.as_str() {
                        "btree" => IndexKind::BTree,
                        "hash" => IndexKind::Hash,
                        other => {
                            return Err(self.option_error(call, opt, format!("unknown index method '{other}'")))
                        }
                    };
                }
                _ => {}
            }
        }
        // `type:` wins over `using:`; they do not combine.
        if let Some(opt) = opts.iter().find(|o| o.key == "type") {
            let kind = self.name(call, opt)?;
            index.kind = match kind.as_str() {
                "fulltext" => IndexKind::FullText,
                "spatial" => IndexKind::Spatial,
                other => {
                    return Err(self.option_error(call, opt, format!("unknown index type '{other}'")))
                }
            };
        }
        Ok(index)
    }

    fn foreign_key(
        &self,
        call: &Call,
        table: &str,
        to: &str,
        opts: &[OptionArg],
    ) -> ParseResult<ForeignKey> {
        self.check_options(call, opts, FOREIGN_KEY_OPTIONS)?;
        let find = |key: &str| opts.iter().find(|o| o.key == key);
        let columns = match find("column") {
            Some(opt) => self.names_value(call, &opt.value, "column")?,
            None => vec![format!("{}_id", singularize(to))],
        };
        let references_columns = match find("primary_key") {
            Some(opt) => self.names_value(call, &opt.value, "primary_key")?,
            None => vec!["id".to_string()],
        };
        if columns.len() != references_columns.len() {
            return Err(self.error(
                call,
                "foreign key column count does not match the referenced columns",
            ));
        }
        let synthesized = ForeignKey::synthesized_name(table, &columns);
        let mut foreign_key = ForeignKey::new(synthesized.clone(), columns, to, references_columns);
        foreign_key.default_name = true;
        for opt in opts {
            match opt.key.as_str() {
                "name" => {
                    foreign_key.name = self.name(call, opt)?;
                    foreign_key.default_name = foreign_key.name == synthesized;
                }
                "on_delete" => foreign_key.on_delete = self.action(call, opt)?,
                "on_update" => foreign_key.on_update = self.action(call, opt)?,
                "deferrable" => {
                    foreign_key.deferrable = match &opt.value {
                        Value::Bool(false) => Deferrable::NotDeferrable,
                        Value::Bool(true) => Deferrable::Immediate,
                        value => match value.as_name() {
                            Some("immediate") => Deferrable::Immediate,
                            Some("deferred") => Deferrable::Deferred,
                            _ => {
                                return Err(self.option_error(
                                    call,
                                    opt,
                                    "deferrable must be a boolean, :immediate or :deferred",
                                ))
                            }
                        },
                    };
                }
                _ => {}
            }
        }
        Ok(foreign_key)
    }

    fn action(&self, call: &Call, opt: &OptionArg) -> ParseResult<ForeignKeyAction> {
        let raw = self.name(call, opt)?;
        ForeignKeyAction::from_symbol(&raw).ok_or_else(|| {
            self.option_error(call, opt, format!("unknown referential action '{raw}'"))
        })
    }

    fn push_index(&mut self, call: &Call, table: String, index: Index) {
        self.indexes.push(PendingIndex {
            table,
            index,
            declaration: call.describe(),
            location: self.location(call.span),
        });
    }

    fn push_foreign_key(&mut self, call: &Call, table: String, foreign_key: ForeignKey) {
        self.foreign_keys.push(PendingForeignKey {
            table,
            foreign_key,
            declaration: call.describe(),
            location: self.location(call.span),
        });
    }

    /// Attaches collected indexes and foreign keys, validating references.
    fn finish(mut self) -> ParseResult<Schema> {
        for pending in std::mem::take(&mut self.indexes) {
            let fail = |cause: String| {
                DefinitionError::new(&pending.declaration, cause).at(pending.location.clone())
            };
            let table = self
                .schema
                .table_mut(&pending.table)
                .ok_or_else(|| fail(format!("table '{}' is not declared", pending.table)))?;
            if let Some(missing) = pending
                .index
                .columns
                .iter()
                .find(|c| table.column(c).is_none())
            {
                return Err(fail(format!("index on missing column '{missing}'")));
            }
            if let Some(extra) = pending
                .index
                .lengths
                .keys()
                .find(|c| !pending.index.columns.contains(c))
            {
                return Err(fail(format!("length given for non-indexed column '{extra}'")));
            }
            if table.index(&pending.index.name).is_some() {
                return Err(fail(format!("duplicate index '{}'", pending.index.name)));
            }
            table.indexes.push(pending.index);
        }

        for pending in std::mem::take(&mut self.foreign_keys) {
            let fail = |cause: String| {
                DefinitionError::new(&pending.declaration, cause).at(pending.location.clone())
            };
            let fk = &pending.foreign_key;
            let Some(target) = self.schema.table(&fk.references_table) else {
                return Err(fail(format!(
                    "foreign key references undeclared table '{}'",
                    fk.references_table
                )));
            };
            if let Some(missing) = fk
                .references_columns
                .iter()
                .find(|c| target.column(c).is_none())
            {
                return Err(fail(format!(
                    "foreign key references missing column '{}.{missing}'",
                    fk.references_table
                )));
            }
            let table = self
                .schema
                .table_mut(&pending.table)
                .ok_or_else(|| fail(format!("table '{}' is not declared", pending.table)))?;
            if let Some(missing) = fk.columns.iter().find(|c| table.column(c).is_none()) {
                return Err(fail(format!("foreign key on missing column '{missing}'")));
            }
            if table.foreign_key(&fk.name).is_some() {
                return Err(fail(format!("duplicate foreign key '{}'", fk.name)));
            }
            table.foreign_keys.push(pending.foreign_key);
        }

        Ok(self.schema)
    }

    // ============================================================
    // value helpers
    // ============================================================

    fn check_options(&self, call: &Call, opts: &[OptionArg], allowed: &[&str]) -> ParseResult<()> {
        let mut seen = BTreeSet::new();
        for opt in opts {
            if !allowed.contains(&opt.key.as_str()) {
                return Err(self.option_error(call, opt, format!("unknown option '{}'", opt.key)));
            }
            if !seen.insert(opt.key.as_str()) {
                return Err(self.option_error(call, opt, format!("option '{}' given twice", opt.key)));
            }
        }
        Ok(())
    }

    fn positional_name(&self, call: &Call, position: usize, what: &str) -> ParseResult<String> {
        call.args
            .get(position)
            .and_then(Value::as_name)
            .map(ToString::to_string)
            .ok_or_else(|| self.error(call, format!("expected {what}")))
    }

    fn names_value(&self, call: &Call, value: &Value, what: &str) -> ParseResult<Vec<String>> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_name()
                        .map(ToString::to_string)
                        .ok_or_else(|| self.error(call, format!("{what} must contain names")))
                })
                .collect(),
            other => other
                .as_name()
                .map(|name| vec![name.to_string()])
                .ok_or_else(|| self.error(call, format!("{what} must be a name or a list of names"))),
        }
    }

    fn name(&self, call: &Call, opt: &OptionArg) -> ParseResult<String> {
        opt.value
            .as_name()
            .map(ToString::to_string)
            .ok_or_else(|| self.option_error(call, opt, format!("{} must be a string or symbol", opt.key)))
    }

    fn string(&self, call: &Call, opt: &OptionArg) -> ParseResult<String> {
        match &opt.value {
            Value::Str(s) => Ok(s.clone()),
            other => Err(self.option_error(
                call,
                opt,
                format!("{} must be a string, got {}", opt.key, other.kind()),
            )),
        }
    }

    fn optional_string(&self, call: &Call, opt: &OptionArg) -> ParseResult<Option<String>> {
        match &opt.value {
            Value::Nil => Ok(None),
            _ => self.string(call, opt).map(Some),
        }
    }

    fn bool(&self, call: &Call, opt: &OptionArg) -> ParseResult<bool> {
        match opt.value {
            Value::Bool(b) => Ok(b),
            ref other => Err(self.option_error(
                call,
                opt,
                format!("{} must be true or false, got {}", opt.key, other.kind()),
            )),
        }
    }

    fn u32_value(&self, call: &Call, opt: &OptionArg) -> ParseResult<u32> {
        match opt.value {
            Value::Integer(n) => u32::try_from(n).map_err(|_| {
                self.option_error(call, opt, format!("{} must be a positive integer", opt.key))
            }),
            ref other => Err(self.option_error(
                call,
                opt,
                format!("{} must be an integer, got {}", opt.key, other.kind()),
            )),
        }
    }
}

fn hash_options(pairs: &[(String, Value)], span: Span) -> Vec<OptionArg> {
    pairs
        .iter()
        .map(|(key, value)| OptionArg {
            key: key.clone(),
            value: value.clone(),
            span,
        })
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) | Value::Symbol(s) => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        Value::Float(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Naive English singular, enough for table names like `users` or
/// `categories`.
pub(crate) fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["sses", "shes", "ches", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

/// Naive English plural, the inverse of [`singularize`].
pub(crate) fn pluralize(word: &str) -> String {
    let vowel_before_y = word
        .strip_suffix('y')
        .and_then(|stem| stem.chars().last())
        .is_some_and(|c| "aeiou".contains(c));
    if let Some(stem) = word.strip_suffix('y') {
        if !vowel_before_y {
            return format!("{stem}ies");
        }
    }
    if ["s", "sh", "ch", "x"].iter().any(|s| word.ends_with(s)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::loader::MemoryLoader;

    fn parse(source: &str) -> Schema {
        Parser::default().parse_str(source).unwrap()
    }

    fn parse_err(source: &str) -> DefinitionError {
        Parser::default().parse_str(source).unwrap_err()
    }

    #[test]
    fn test_implicit_id() {
        let schema = parse(
            r#"
            create_table "users" do |t|
              t.string "name"
            end
            "#,
        );
        let users = schema.table("users").unwrap();
        assert_eq!(users.primary_key, vec!["id"]);
        let id = &users.columns[0];
        assert_eq!(id.name, "id");
        assert_eq!(id.column_type, ColumnType::Integer(IntWidth::Big));
        assert!(id.auto_increment);
        assert!(!id.nullable);
        assert_eq!(
            users.column("name").unwrap().column_type,
            ColumnType::String { limit: Some(255) }
        );
    }

    #[test]
    fn test_explicit_primary_keys() {
        let schema = parse(
            r#"
            create_table "memberships", primary_key: ["user_id", "group_id"] do |t|
              t.bigint "user_id"
              t.bigint "group_id"
            end
            create_table "codes", id: false do |t|
              t.string "code", primary_key: true, limit: 8
            end
            create_table "logs", id: false do |t|
              t.text "line"
            end
            "#,
        );
        let memberships = schema.table("memberships").unwrap();
        assert_eq!(memberships.primary_key, vec!["user_id", "group_id"]);
        assert!(memberships.columns.iter().all(|c| !c.nullable));
        assert_eq!(schema.table("codes").unwrap().primary_key, vec!["code"]);
        assert!(schema.table("logs").unwrap().primary_key.is_empty());
    }

    #[test]
    fn test_column_options() {
        let schema = parse(
            r#"
            create_table "items", comment: "Things", engine: "InnoDB" do |t|
              t.integer "qty", limit: 2, unsigned: true, default: 0, null: false
              t.decimal "price", precision: 10, scale: 2
              t.text "body", size: :medium
              t.enum "state", values: ["on", "off"], default: "on"
              t.datetime "seen_at", default: -> { "CURRENT_TIMESTAMP" }, comment: "last seen"
              t.boolean "active", default: 1
            end
            "#,
        );
        let items = schema.table("items").unwrap();
        assert_eq!(items.comment(), Some("Things"));
        assert_eq!(items.options.get("engine").map(String::as_str), Some("InnoDB"));
        let qty = items.column("qty").unwrap();
        assert_eq!(qty.column_type, ColumnType::Integer(IntWidth::Small));
        assert!(qty.unsigned);
        assert!(!qty.nullable);
        assert_eq!(qty.default, DefaultValue::Integer(0));
        assert_eq!(
            items.column("body").unwrap().column_type,
            ColumnType::Text(LobSize::Medium)
        );
        assert_eq!(
            items.column("seen_at").unwrap().default,
            DefaultValue::Expression("CURRENT_TIMESTAMP".into())
        );
        assert_eq!(
            items.column("active").unwrap().default,
            DefaultValue::Bool(true)
        );
    }

    #[test]
    fn test_indexes_and_foreign_keys_resolve_late() {
        let schema = parse(
            r#"
            add_index "posts", ["user_id", "created_at"], unique: true
            add_foreign_key "posts", "users", on_delete: :cascade
            create_table "posts" do |t|
              t.bigint "user_id"
              t.datetime "created_at"
              t.index "created_at", name: "idx_created"
            end
            create_table "users" do |t|
            end
            "#,
        );
        let posts = schema.table("posts").unwrap();
        assert_eq!(posts.indexes.len(), 2);
        assert!(posts
            .index("index_posts_on_user_id_and_created_at")
            .unwrap()
            .unique);
        let fk = &posts.foreign_keys[0];
        assert_eq!(fk.name, "fk_posts_user_id");
        assert!(fk.default_name);
        assert_eq!(fk.columns, vec!["user_id"]);
        assert_eq!(fk.references_table, "users");
        assert_eq!(fk.on_delete, ForeignKeyAction::Cascade);
    }

    #[test]
    fn test_references() {
        let schema = parse(
            r#"
            create_table "categories" do |t|
            end
            create_table "posts" do |t|
              t.references "category", foreign_key: true, null: false
            end
            "#,
        );
        let posts = schema.table("posts").unwrap();
        assert!(!posts.column("category_id").unwrap().nullable);
        assert_eq!(posts.indexes[0].columns, vec!["category_id"]);
        assert_eq!(posts.foreign_keys[0].references_table, "categories");
    }

    #[test]
    fn test_foreign_key_to_undeclared_table() {
        let err = parse_err(
            r#"
            create_table "line_items" do |t|
              t.bigint "order_id"
            end
            add_foreign_key "line_items", "orders"
            "#,
        );
        assert!(err.cause.contains("undeclared table 'orders'"), "{err}");
        assert_eq!(err.location.unwrap().line, 5);
    }

    #[test]
    fn test_definition_errors() {
        let cases = [
            ("create_table \"a\" do |t|\n t.money \"x\"\nend", "unknown column type"),
            ("create_table \"a\" do |t|\n t.string \"x\"\n t.string \"x\"\nend", "duplicate column"),
            ("create_table \"a\"\ncreate_table \"a\"", "duplicate table"),
            ("create_table \"a\" do |t|\n t.string \"x\", limitt: 3\nend", "unknown option"),
            ("create_table \"a\" do |t|\n t.string \"x\", null: 3\nend", "must be true or false"),
            ("create_table \"a\" do |t|\n t.index [\"y\"]\nend", "missing column 'y'"),
            ("create_table \"a\" do |t|\n t.string \"x\", unsigned: true\nend", "numeric"),
            ("drop_table \"a\"", "unknown declaration"),
            ("create_table \"a\" do |t|\n t.integer \"x\", limit: 16\nend", "1 to 8"),
            ("create_table \"a\" do |t|\n t.string \"x\"", "missing 'end'"),
        ];
        for (source, expected) in cases {
            let err = parse_err(source);
            assert!(err.to_string().contains(expected), "{source}: {err}");
        }
    }

    #[test]
    fn test_require_split_layout() {
        let loader = MemoryLoader::new()
            .with_file(
                "schema/Schemafile",
                "require \"users.schema\"\nrequire \"posts.schema\"\n",
            )
            .with_file("schema/users.schema", "create_table \"users\" do |t|\nend\n")
            .with_file(
                "schema/posts.schema",
                "require \"users.schema\"\ncreate_table \"posts\" do |t|\n t.references \"user\", foreign_key: true\nend\n",
            );
        let schema = Parser::default()
            .parse_file(Path::new("schema/Schemafile"), &loader)
            .unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.table("posts").unwrap().foreign_keys.len(), 1);
    }

    #[test]
    fn test_require_cycle() {
        let loader = MemoryLoader::new()
            .with_file("a.schema", "require \"b.schema\"")
            .with_file("b.schema", "require \"a.schema\"");
        let err = Parser::default()
            .parse_file(Path::new("a.schema"), &loader)
            .unwrap_err();
        assert!(err.cause.contains("cycle"), "{err}");
    }

    #[test]
    fn test_inflections() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("user"), "users");
    }
}
