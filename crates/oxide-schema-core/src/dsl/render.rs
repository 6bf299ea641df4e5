//! Rendering of schemas and operations back into definition text.
//!
//! [`dump`] produces a Schemafile that [`Parser`](super::Parser) reads
//! back into an equivalent schema. [`render_operations`] produces the
//! migration-style script shown for a delta.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::operation::Operation;
use crate::schema::{
    Column, ColumnType, Deferrable, DefaultValue, ForeignKey, ForeignKeyAction, Index,
    IndexKind, IntWidth, LobSize, Schema, Table, OPTION_CHARSET, OPTION_COLLATION,
    OPTION_COMMENT, OPTION_ENGINE,
};

/// Name of the manifest written by [`dump_split`].
pub const MANIFEST_NAME: &str = "Schemafile";

/// Options for [`dump`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// Omit engine, charset, collation and other opaque table options.
    pub without_table_options: bool,
    /// Write foreign key names even when they are default names.
    pub with_default_fk_name: bool,
}

impl DumpOptions {
    #[must_use]
    pub const fn with_table_options(mut self, enabled: bool) -> Self {
        self.without_table_options = !enabled;
        self
    }

    #[must_use]
    pub const fn with_default_fk_name(mut self, enabled: bool) -> Self {
        self.with_default_fk_name = enabled;
        self
    }
}

/// A schema split into one file per table plus a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitDump {
    /// Contents of the manifest, a list of `require` lines.
    pub manifest: String,
    /// File name to contents.
    pub files: BTreeMap<String, String>,
}

/// Renders a whole schema as a single Schemafile.
#[must_use]
pub fn dump(schema: &Schema, options: &DumpOptions) -> String {
    schema
        .tables()
        .map(|table| dump_table(table, options))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders one table followed by its `add_foreign_key` lines.
#[must_use]
pub fn dump_table(table: &Table, options: &DumpOptions) -> String {
    let mut out = String::new();
    for line in create_table_lines(table, options, false) {
        out.push_str(&line);
        out.push('\n');
    }
    for fk in &table.foreign_keys {
        out.push_str(&foreign_key_line(&table.name, fk, options.with_default_fk_name));
        out.push('\n');
    }
    out
}

/// Renders a schema as per-table files and a manifest requiring them.
#[must_use]
pub fn dump_split(schema: &Schema, options: &DumpOptions) -> SplitDump {
    let mut manifest = String::new();
    let mut files = BTreeMap::new();
    for table in schema.tables() {
        let file = format!("{}.schema", table.name);
        let _ = writeln!(manifest, "require {}", quote(&file));
        files.insert(file, dump_table(table, options));
    }
    SplitDump { manifest, files }
}

/// Renders operations as a script, one block per table.
#[must_use]
pub fn render_operations(operations: &[Operation]) -> String {
    let mut out = String::new();
    let mut previous: Option<&str> = None;
    for op in operations {
        let table = op.table_name();
        if previous.is_some_and(|p| p != table) {
            out.push('\n');
        }
        previous = Some(table);
        for line in operation_lines(op) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

fn operation_lines(op: &Operation) -> Vec<String> {
    match op {
        Operation::CreateTable { table } => {
            create_table_lines(table, &DumpOptions::default(), true)
        }
        Operation::DropTable { name } => vec![format!("drop_table {}", quote(name))],
        Operation::RenameTable { from, to } => {
            vec![format!("rename_table {}, {}", quote(from), quote(to))]
        }
        Operation::AddColumn {
            table,
            column,
            after,
        } => {
            let mut parts = vec![
                format!("add_column {}", quote(table)),
                quote(&column.name),
                format!(":{}", column_method(&column.column_type)),
            ];
            parts.extend(column_options(column));
            match after {
                Some(after) => parts.push(format!("after: {}", quote(after))),
                None => parts.push("first: true".to_string()),
            }
            vec![parts.join(", ")]
        }
        Operation::DropColumn { table, name } => {
            vec![format!("remove_column {}, {}", quote(table), quote(name))]
        }
        Operation::ChangeColumn { table, column } => {
            let mut parts = vec![
                format!("change_column {}", quote(table)),
                quote(&column.name),
                format!(":{}", column_method(&column.column_type)),
            ];
            parts.extend(column_options(column));
            vec![parts.join(", ")]
        }
        Operation::RenameColumn { table, from, to } => vec![format!(
            "rename_column {}, {}, {}",
            quote(table),
            quote(from),
            quote(to)
        )],
        Operation::AddIndex { table, index } => {
            vec![format!("add_index {}, {}", quote(table), index_args(index))]
        }
        Operation::DropIndex { table, index } => vec![format!(
            "remove_index {}, name: {}",
            quote(table),
            quote(&index.name)
        )],
        Operation::AddForeignKey { table, foreign_key } => {
            vec![foreign_key_line(table, foreign_key, true)]
        }
        Operation::DropForeignKey { table, foreign_key } => vec![format!(
            "remove_foreign_key {}, name: {}",
            quote(table),
            quote(&foreign_key.name)
        )],
        Operation::DropPrimaryKey { table, columns } => vec![format!(
            "remove_primary_key {}, {}",
            quote(table),
            name_list(columns)
        )],
        Operation::AddPrimaryKey { table, columns } => vec![format!(
            "add_primary_key {}, {}",
            quote(table),
            name_list(columns)
        )],
        Operation::ChangeTableOptions { table, changes } => {
            let mut parts = vec![format!("change_table_options {}", quote(table))];
            parts.extend(option_changes(changes));
            vec![parts.join(", ")]
        }
        Operation::BulkChange { table, operations } => {
            let mut lines = vec![format!("change_table {}, bulk: true do |t|", quote(table))];
            for inner in operations {
                match bulk_line(inner) {
                    Some(line) => lines.push(format!("  t.{line}")),
                    None => lines.extend(operation_lines(inner).into_iter().map(|l| format!("  {l}"))),
                }
            }
            lines.push("end".to_string());
            lines
        }
    }
}

fn bulk_line(op: &Operation) -> Option<String> {
    Some(match op {
        Operation::AddColumn { column, after, .. } => {
            let mut parts = vec![
                format!("column {}", quote(&column.name)),
                format!(":{}", column_method(&column.column_type)),
            ];
            parts.extend(column_options(column));
            match after {
                Some(after) => parts.push(format!("after: {}", quote(after))),
                None => parts.push("first: true".to_string()),
            }
            parts.join(", ")
        }
        Operation::DropColumn { name, .. } => format!("remove {}", quote(name)),
        Operation::ChangeColumn { column, .. } => {
            let mut parts = vec![
                format!("change {}", quote(&column.name)),
                format!(":{}", column_method(&column.column_type)),
            ];
            parts.extend(column_options(column));
            parts.join(", ")
        }
        Operation::RenameColumn { from, to, .. } => {
            format!("rename {}, {}", quote(from), quote(to))
        }
        Operation::AddIndex { index, .. } => format!("index {}", index_args(index)),
        Operation::DropIndex { index, .. } => format!("remove_index name: {}", quote(&index.name)),
        Operation::DropPrimaryKey { .. } => "remove_primary_key".to_string(),
        Operation::AddPrimaryKey { columns, .. } => format!("primary_key {}", name_list(columns)),
        Operation::ChangeTableOptions { changes, .. } => {
            format!("options {}", option_changes(changes).join(", "))
        }
        _ => return None,
    })
}

fn create_table_lines(table: &Table, options: &DumpOptions, inline_fks: bool) -> Vec<String> {
    let implicit = has_implicit_id(table);
    let mut header = vec![format!("create_table {}", quote(&table.name))];
    match table.primary_key.as_slice() {
        _ if implicit => {}
        [] => header.push("id: false".to_string()),
        [single] => header.push(format!("primary_key: {}", quote(single))),
        columns => header.push(format!("primary_key: {}", name_list(columns))),
    }
    if let Some(comment) = table.comment() {
        header.push(format!("comment: {}", quote(comment)));
    }
    if !options.without_table_options {
        for key in [OPTION_ENGINE, OPTION_CHARSET, OPTION_COLLATION] {
            if let Some(value) = table.options.get(key) {
                header.push(format!("{key}: {}", quote(value)));
            }
        }
        let extra: Vec<String> = table
            .options
            .iter()
            .filter(|(k, _)| {
                ![OPTION_COMMENT, OPTION_ENGINE, OPTION_CHARSET, OPTION_COLLATION]
                    .contains(&k.as_str())
            })
            .map(|(k, v)| format!("{} => {}", quote(k), quote(v)))
            .collect();
        if !extra.is_empty() {
            header.push(format!("options: {{ {} }}", extra.join(", ")));
        }
    }
    if let Some(from) = &table.renamed_from {
        header.push(format!("renamed_from: {}", quote(from)));
    }
    if let Some(extra) = &table.alter_extra {
        header.push(format!("alter_extra: {}", quote(extra)));
    }

    let mut lines = vec![format!("{} do |t|", header.join(", "))];
    let skip = usize::from(implicit);
    for column in &table.columns[skip..] {
        let mut parts = vec![format!(
            "  t.{} {}",
            column_method(&column.column_type),
            quote(&column.name)
        )];
        parts.extend(column_options(column));
        lines.push(parts.join(", "));
    }
    for index in &table.indexes {
        lines.push(format!("  t.index {}", index_args(index)));
    }
    if inline_fks {
        for fk in &table.foreign_keys {
            let mut parts = vec![format!("  t.foreign_key {}", quote(&fk.references_table))];
            parts.extend(foreign_key_options(fk, true));
            lines.push(parts.join(", "));
        }
    }
    lines.push("end".to_string());
    lines
}

/// The table's key is the `id` column the parser adds on its own.
fn has_implicit_id(table: &Table) -> bool {
    table.primary_key == ["id"]
        && table.columns.first().is_some_and(|c| {
            c.name == "id"
                && c.column_type == ColumnType::Integer(IntWidth::Big)
                && c.auto_increment
                && !c.nullable
                && !c.unsigned
                && c.default.is_none()
                && c.comment.is_none()
                && c.renamed_from.is_none()
        })
}

fn column_method(column_type: &ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer(IntWidth::Big) => "bigint",
        ColumnType::Integer(_) => "integer",
        ColumnType::Decimal { .. } => "decimal",
        ColumnType::Float { .. } => "float",
        ColumnType::Double => "double",
        ColumnType::String { .. } => "string",
        ColumnType::Char { .. } => "char",
        ColumnType::Text(_) => "text",
        ColumnType::Binary { .. } => "binary",
        ColumnType::Blob(_) => "blob",
        ColumnType::Boolean => "boolean",
        ColumnType::Date => "date",
        ColumnType::Time => "time",
        ColumnType::DateTime => "datetime",
        ColumnType::Timestamp => "timestamp",
        ColumnType::Json => "json",
        ColumnType::Enum(_) => "enum",
        ColumnType::Set(_) => "set",
    }
}

fn type_options(column_type: &ColumnType) -> Vec<String> {
    let mut opts = Vec::new();
    match column_type {
        ColumnType::Integer(width @ (IntWidth::Tiny | IntWidth::Small | IntWidth::Medium)) => {
            opts.push(format!("limit: {}", width.bytes()));
        }
        ColumnType::Decimal { precision, scale } => {
            if let Some(p) = precision {
                opts.push(format!("precision: {p}"));
            }
            if let Some(s) = scale {
                opts.push(format!("scale: {s}"));
            }
        }
        ColumnType::Float { precision: Some(p) } => opts.push(format!("precision: {p}")),
        ColumnType::String { limit: Some(l) }
        | ColumnType::Char { limit: Some(l) }
        | ColumnType::Binary { limit: Some(l) } => opts.push(format!("limit: {l}")),
        ColumnType::Text(size) | ColumnType::Blob(size) if *size != LobSize::Regular => {
            opts.push(format!("size: :{}", size.as_str()));
        }
        ColumnType::Enum(values) | ColumnType::Set(values) => {
            opts.push(format!("values: {}", name_list(values)));
        }
        _ => {}
    }
    opts
}

fn column_options(column: &Column) -> Vec<String> {
    let mut opts = type_options(&column.column_type);
    if column.unsigned {
        opts.push("unsigned: true".to_string());
    }
    if !column.nullable {
        opts.push("null: false".to_string());
    }
    if let Some(default) = default_literal(&column.default) {
        opts.push(format!("default: {default}"));
    }
    if column.auto_increment {
        opts.push("auto_increment: true".to_string());
    }
    if let Some(comment) = &column.comment {
        opts.push(format!("comment: {}", quote(comment)));
    }
    if let Some(from) = &column.renamed_from {
        opts.push(format!("renamed_from: {}", quote(from)));
    }
    opts
}

fn default_literal(default: &DefaultValue) -> Option<String> {
    Some(match default {
        DefaultValue::None => return None,
        DefaultValue::Null => "nil".to_string(),
        DefaultValue::Bool(b) => b.to_string(),
        DefaultValue::Integer(n) => n.to_string(),
        DefaultValue::Float(f) => float_literal(*f),
        DefaultValue::String(s) => quote(s),
        DefaultValue::Expression(expr) => format!("-> {{ {} }}", quote(expr)),
    })
}

/// Shortest exact form, always with a fractional part so it reads back as a float.
fn float_literal(f: f64) -> String {
    let text = format!("{f:?}");
    match text.split_once('e') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => format!("{mantissa}.0e{exponent}"),
        _ => text,
    }
}

fn index_args(index: &Index) -> String {
    let mut parts = vec![name_list(&index.columns), format!("name: {}", quote(&index.name))];
    if index.unique {
        parts.push("unique: true".to_string());
    }
    if !index.lengths.is_empty() {
        let lengths: Vec<String> = index
            .lengths
            .iter()
            .map(|(c, l)| format!("{} => {l}", quote(c)))
            .collect();
        parts.push(format!("length: {{ {} }}", lengths.join(", ")));
    }
    match index.kind {
        IndexKind::BTree => {}
        IndexKind::Hash => parts.push("using: :hash".to_string()),
        IndexKind::FullText => parts.push("type: :fulltext".to_string()),
        IndexKind::Spatial => parts.push("type: :spatial".to_string()),
    }
    if let Some(condition) = &index.condition {
        parts.push(format!("where: {}", quote(condition)));
    }
    parts.join(", ")
}

fn foreign_key_line(table: &str, fk: &ForeignKey, with_default_name: bool) -> String {
    let mut parts = vec![format!(
        "add_foreign_key {}, {}",
        quote(table),
        quote(&fk.references_table)
    )];
    parts.extend(foreign_key_options(fk, with_default_name));
    parts.join(", ")
}

fn foreign_key_options(fk: &ForeignKey, with_default_name: bool) -> Vec<String> {
    let mut opts = vec![
        format!("column: {}", names(&fk.columns)),
        format!("primary_key: {}", names(&fk.references_columns)),
    ];
    if with_default_name || !fk.default_name {
        opts.push(format!("name: {}", quote(&fk.name)));
    }
    if fk.on_delete != ForeignKeyAction::NoAction {
        opts.push(format!("on_delete: :{}", fk.on_delete.as_symbol()));
    }
    if fk.on_update != ForeignKeyAction::NoAction {
        opts.push(format!("on_update: :{}", fk.on_update.as_symbol()));
    }
    match fk.deferrable {
        Deferrable::NotDeferrable => {}
        Deferrable::Immediate => opts.push("deferrable: :immediate".to_string()),
        Deferrable::Deferred => opts.push("deferrable: :deferred".to_string()),
    }
    opts
}

fn option_changes(changes: &BTreeMap<String, Option<String>>) -> Vec<String> {
    changes
        .iter()
        .map(|(key, value)| match value {
            Some(v) => format!("{key}: {}", quote(v)),
            None => format!("{key}: nil"),
        })
        .collect()
}

/// A single name as a string, several as an array.
fn names(items: &[String]) -> String {
    match items {
        [single] => quote(single),
        _ => name_list(items),
    }
}

fn name_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Double-quoted string literal the lexer reads back verbatim.
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Parser;

    const SOURCE: &str = r#"
create_table "users", comment: "People", engine: "InnoDB" do |t|
  t.string "name", limit: 100, null: false
  t.integer "age", limit: 2, unsigned: true, default: 0
  t.datetime "created_at", default: -> { "CURRENT_TIMESTAMP" }
  t.index ["name"], name: "index_users_on_name", unique: true, length: { name: 10 }
end

create_table "posts", id: false, primary_key: "code" do |t|
  t.string "code", limit: 16
  t.bigint "user_id"
  t.text "body", size: :long
  t.enum "state", values: ["draft", "live"], default: "draft"
end

add_foreign_key "posts", "users", on_delete: :cascade
"#;

    #[test]
    fn test_dump_round_trip() {
        let schema = Parser::default().parse_str(SOURCE).unwrap();
        let text = dump(&schema, &DumpOptions::default());
        let reparsed = Parser::default().parse_str(&text).unwrap();
        assert_eq!(schema, reparsed, "{text}");
    }

    #[test]
    fn test_dump_shape() {
        let schema = Parser::default().parse_str(SOURCE).unwrap();
        let text = dump(&schema, &DumpOptions::default());
        assert!(text.contains(
            "create_table \"users\", comment: \"People\", engine: \"InnoDB\" do |t|\n  t.string \"name\", limit: 100, null: false\n"
        ));
        assert!(text.contains("create_table \"posts\", primary_key: \"code\" do |t|"));
        assert!(text.contains(
            "add_foreign_key \"posts\", \"users\", column: \"user_id\", primary_key: \"id\", on_delete: :cascade"
        ));
        let named = dump(&schema, &DumpOptions::default().with_default_fk_name(true));
        assert!(named.contains("name: \"fk_posts_user_id\""));
        let bare = dump(&schema, &DumpOptions::default().with_table_options(false));
        assert!(!bare.contains("engine:"));
        assert!(bare.contains("comment: \"People\""));
    }

    #[test]
    fn test_dump_split() {
        let schema = Parser::default().parse_str(SOURCE).unwrap();
        let split = dump_split(&schema, &DumpOptions::default());
        assert_eq!(
            split.manifest,
            "require \"posts.schema\"\nrequire \"users.schema\"\n"
        );
        assert!(split.files["posts.schema"].contains("add_foreign_key"));
    }

    #[test]
    fn test_render_operations_groups_by_table() {
        let ops = vec![
            Operation::drop_index("users", Index::new("idx_flag", vec!["legacy_flag".into()])),
            Operation::drop_column("users", "legacy_flag"),
            Operation::drop_table("logs"),
        ];
        assert_eq!(
            render_operations(&ops),
            "remove_index \"users\", name: \"idx_flag\"\nremove_column \"users\", \"legacy_flag\"\n\ndrop_table \"logs\"\n"
        );
    }

    #[test]
    fn test_render_bulk_change() {
        let ops = vec![Operation::BulkChange {
            table: "users".into(),
            operations: vec![
                Operation::AddColumn {
                    table: "users".into(),
                    column: Column::new("email", ColumnType::String { limit: Some(255) }).not_null(),
                    after: Some("name".into()),
                },
                Operation::drop_column("users", "legacy"),
            ],
        }];
        assert_eq!(
            render_operations(&ops),
            "change_table \"users\", bulk: true do |t|\n  t.column \"email\", :string, limit: 255, null: false, after: \"name\"\n  t.remove \"legacy\"\nend\n"
        );
    }

    #[test]
    fn test_float_defaults_read_back() {
        assert_eq!(float_literal(0.5), "0.5");
        assert_eq!(float_literal(1e-7), "1.0e-7");
        assert_eq!(float_literal(1e20), "1.0e20");
        assert_eq!(float_literal(2.5e-9), "2.5e-9");

        let source = r#"
create_table "readings" do |t|
  t.float "tiny", default: 0.0000001
  t.float "huge", default: 100000000000000000000.0
  t.double "ratio", default: 0.25
end
"#;
        let schema = Parser::default().parse_str(source).unwrap();
        let text = dump(&schema, &DumpOptions::default());
        assert!(text.contains("default: 1.0e-7"), "{text}");
        let reparsed = Parser::default().parse_str(&text).unwrap();
        assert_eq!(schema, reparsed, "{text}");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
    }
}
