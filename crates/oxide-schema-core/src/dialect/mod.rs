//! Database dialect implementations.
//!
//! A dialect maps canonical types to native type names and back, reads
//! catalog defaults and actions, and generates the SQL statements that
//! carry out an [`Operation`]. Dialects are pure: they never touch a
//! connection.

mod mysql;
mod sqlite;

pub use mysql::MySqlDialect;
pub use sqlite::SqliteDialect;

use crate::error::DialectError;
use crate::operation::Operation;
use crate::schema::{Column, ColumnType, DefaultValue, ForeignKey, ForeignKeyAction, IntWidth, LobSize, Schema};

/// A native column type read back into the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    pub column_type: ColumnType,
    pub unsigned: bool,
}

impl NativeType {
    #[must_use]
    pub const fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            unsigned: false,
        }
    }
}

/// Schema snapshots around the operation being translated.
#[derive(Debug, Clone, Copy)]
pub struct StatementContext<'a> {
    /// Structure before the operation.
    pub before: &'a Schema,
    /// Structure once the operation has been applied.
    pub after: &'a Schema,
    /// Raw fragment appended to ALTER TABLE statements on this table.
    pub alter_extra: Option<&'a str>,
}

/// Trait for database-specific SQL generation and catalog decoding.
pub trait Dialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a string literal.
    fn quote_value(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Returns the native type for a column, including signedness.
    fn type_name(&self, column: &Column) -> Result<String, DialectError>;

    /// Reads a native type string as reported by the catalog.
    fn parse_native_type(&self, native: &str) -> Option<NativeType>;

    /// Whether table options (engine, charset, comment) exist at all.
    fn supports_table_options(&self) -> bool {
        true
    }

    /// Whether column comments are stored.
    fn supports_comments(&self) -> bool {
        true
    }

    /// Reads a catalog default, given as SQL literal text.
    fn parse_default(&self, raw: Option<&str>, column_type: &ColumnType) -> DefaultValue {
        let Some(raw) = raw.map(str::trim) else {
            return DefaultValue::None;
        };
        if raw.eq_ignore_ascii_case("null") {
            return DefaultValue::Null;
        }
        if let Some(text) = unquote(raw) {
            return DefaultValue::String(text).normalized_for(column_type);
        }
        if raw.eq_ignore_ascii_case("true") {
            return DefaultValue::Bool(true).normalized_for(column_type);
        }
        if raw.eq_ignore_ascii_case("false") {
            return DefaultValue::Bool(false).normalized_for(column_type);
        }
        if looks_numeric(raw) {
            if let Ok(n) = raw.parse::<i64>() {
                return DefaultValue::Integer(n).normalized_for(column_type);
            }
            if let Ok(f) = raw.parse::<f64>() {
                return DefaultValue::Float(f).normalized_for(column_type);
            }
        }
        DefaultValue::Expression(strip_parens(raw).to_string())
    }

    /// Reads a referential action name.
    fn parse_action(&self, raw: &str) -> Option<ForeignKeyAction> {
        ForeignKeyAction::from_sql(raw)
    }

    /// Whether `name` follows this database's naming for unnamed keys.
    fn is_default_foreign_key_name(&self, table: &str, name: &str, columns: &[String]) -> bool {
        name == ForeignKey::synthesized_name(table, columns)
    }

    /// Renders a default as SQL, or `None` when no clause is needed.
    fn default_sql(&self, default: &DefaultValue) -> Option<String> {
        match default {
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

    /// Generates column definition SQL (no key clauses).
    fn column_definition(&self, column: &Column) -> Result<String, DialectError> {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(column)?,
        ];
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default_sql) = self.default_sql(&column.default) {
            parts.push(format!("DEFAULT {default_sql}"));
        }
        Ok(parts.join(" "))
    }

    /// Quotes and joins a column list.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generates the statements carrying out an operation.
    fn statements(
        &self,
        operation: &Operation,
        ctx: &StatementContext<'_>,
    ) -> Result<Vec<String>, DialectError>;
}

/// Strips one level of single or double quotes, undoing doubled quotes.
fn unquote(raw: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            let inner = &raw[1..raw.len() - 1];
            let doubled: String = [quote, quote].iter().collect();
            return Some(inner.replace(&doubled, &quote.to_string()));
        }
    }
    None
}

fn looks_numeric(raw: &str) -> bool {
    let digits = raw.strip_prefix(['-', '+']).unwrap_or(raw);
    digits.starts_with(|c: char| c.is_ascii_digit() || c == '.')
}

fn strip_parens(raw: &str) -> &str {
    let mut s = raw.trim();
    while s.starts_with('(') && s.ends_with(')') && balanced(&s[1..s.len() - 1]) {
        s = s[1..s.len() - 1].trim();
    }
    s
}

fn balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// A native type split into its base name, arguments and modifiers:
/// `"decimal(10,2) unsigned"` gives `("decimal", ["10", "2"], true)`.
pub(crate) fn split_native_type(native: &str) -> (String, Vec<String>, bool) {
    let lower = native.trim().to_ascii_lowercase();
    let unsigned = lower.split_whitespace().any(|w| w == "unsigned");
    let (head, args) = match (lower.find('('), lower.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            let args = split_args(&native.trim()[open + 1..close]);
            (lower[..open].trim().to_string(), args)
        }
        _ => (
            lower
                .split_whitespace()
                .filter(|w| *w != "unsigned" && *w != "zerofill")
                .collect::<Vec<_>>()
                .join(" "),
            Vec::new(),
        ),
    };
    (head, args, unsigned)
}

/// Splits a type argument list, keeping quoted enum values intact.
fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if quoted && chars.peek() == Some(&'\'') => {
                current.push('\'');
                chars.next();
            }
            '\'' => quoted = !quoted,
            ',' if !quoted => {
                args.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() || !args.is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

/// Reads the native type names shared by MySQL and by the names this
/// crate writes into SQLite.
pub(crate) fn parse_common_type(head: &str, args: &[String]) -> Option<ColumnType> {
    let number = |i: usize| args.get(i).and_then(|a| a.parse::<u32>().ok());
    Some(match head {
        "tinyint" => ColumnType::Integer(IntWidth::Tiny),
        "smallint" => ColumnType::Integer(IntWidth::Small),
        "mediumint" => ColumnType::Integer(IntWidth::Medium),
        "int" | "integer" => ColumnType::Integer(IntWidth::Int),
        "bigint" => ColumnType::Integer(IntWidth::Big),
        "decimal" | "numeric" => ColumnType::Decimal {
            precision: number(0),
            scale: number(1),
        },
        "float" => ColumnType::Float {
            precision: number(0),
        },
        "double" | "double precision" | "real" => ColumnType::Double,
        "varchar" | "character varying" => ColumnType::String { limit: number(0) },
        "char" | "character" => ColumnType::Char { limit: number(0) },
        "tinytext" => ColumnType::Text(LobSize::Tiny),
        "text" => ColumnType::Text(LobSize::Regular),
        "mediumtext" => ColumnType::Text(LobSize::Medium),
        "longtext" => ColumnType::Text(LobSize::Long),
        "varbinary" | "binary" => ColumnType::Binary { limit: number(0) },
        "tinyblob" => ColumnType::Blob(LobSize::Tiny),
        "blob" => ColumnType::Blob(LobSize::Regular),
        "mediumblob" => ColumnType::Blob(LobSize::Medium),
        "longblob" => ColumnType::Blob(LobSize::Long),
        "boolean" | "bool" => ColumnType::Boolean,
        "date" => ColumnType::Date,
        "time" => ColumnType::Time,
        "datetime" => ColumnType::DateTime,
        "timestamp" => ColumnType::Timestamp,
        "json" => ColumnType::Json,
        "enum" => ColumnType::Enum(args.to_vec()),
        "set" => ColumnType::Set(args.to_vec()),
        _ => return None,
    })
}

/// Native name of a canonical type, MySQL spelling. `quote` renders
/// enum and set values.
pub(crate) fn common_type_name(column_type: &ColumnType, quote: impl Fn(&str) -> String) -> String {
    let with_width = |name: &str, width: Option<u32>| match width {
        Some(w) => format!("{name}({w})"),
        None => name.to_string(),
    };
    match column_type {
        ColumnType::Integer(IntWidth::Tiny) => "tinyint".to_string(),
        ColumnType::Integer(IntWidth::Small) => "smallint".to_string(),
        ColumnType::Integer(IntWidth::Medium) => "mediumint".to_string(),
        ColumnType::Integer(IntWidth::Int) => "int".to_string(),
        ColumnType::Integer(IntWidth::Big) => "bigint".to_string(),
        ColumnType::Decimal { precision, scale } => match (precision, scale) {
            (Some(p), Some(s)) => format!("decimal({p},{s})"),
            (Some(p), None) => format!("decimal({p})"),
            _ => "decimal".to_string(),
        },
        ColumnType::Float { precision } => with_width("float", *precision),
        ColumnType::Double => "double".to_string(),
        ColumnType::String { limit } => format!("varchar({})", limit.unwrap_or(255)),
        ColumnType::Char { limit } => with_width("char", *limit),
        ColumnType::Text(size) => lob_name("text", *size),
        ColumnType::Binary { limit } => format!("varbinary({})", limit.unwrap_or(255)),
        ColumnType::Blob(size) => lob_name("blob", *size),
        ColumnType::Boolean => "boolean".to_string(),
        ColumnType::Date => "date".to_string(),
        ColumnType::Time => "time".to_string(),
        ColumnType::DateTime => "datetime".to_string(),
        ColumnType::Timestamp => "timestamp".to_string(),
        ColumnType::Json => "json".to_string(),
        ColumnType::Enum(values) | ColumnType::Set(values) => {
            let name = if matches!(column_type, ColumnType::Enum(_)) { "enum" } else { "set" };
            let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
            format!("{name}({})", quoted.join(","))
        }
    }
}

fn lob_name(base: &str, size: LobSize) -> String {
    match size {
        LobSize::Regular => base.to_string(),
        other => format!("{}{base}", other.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_native_type() {
        assert_eq!(
            split_native_type("DECIMAL(10, 2) UNSIGNED"),
            ("decimal".to_string(), vec!["10".to_string(), "2".to_string()], true)
        );
        assert_eq!(
            split_native_type("enum('a','it''s')"),
            ("enum".to_string(), vec!["a".to_string(), "it's".to_string()], false)
        );
        assert_eq!(
            split_native_type("bigint unsigned"),
            ("bigint".to_string(), Vec::new(), true)
        );
    }

    #[test]
    fn test_parse_default() {
        let dialect = SqliteDialect::new();
        let text = ColumnType::String { limit: Some(10) };
        assert_eq!(dialect.parse_default(None, &text), DefaultValue::None);
        assert_eq!(dialect.parse_default(Some("NULL"), &text), DefaultValue::Null);
        assert_eq!(
            dialect.parse_default(Some("'it''s'"), &text),
            DefaultValue::String("it's".into())
        );
        assert_eq!(
            dialect.parse_default(Some("0"), &ColumnType::Boolean),
            DefaultValue::Bool(false)
        );
        assert_eq!(
            dialect.parse_default(Some("1.50"), &ColumnType::Double),
            DefaultValue::Float(1.5)
        );
        assert_eq!(
            dialect.parse_default(Some("-3"), &ColumnType::Integer(IntWidth::Int)),
            DefaultValue::Integer(-3)
        );
        assert_eq!(
            dialect.parse_default(Some("(datetime('now'))"), &ColumnType::DateTime),
            DefaultValue::Expression("datetime('now')".into())
        );
        assert_eq!(
            dialect.parse_default(Some("CURRENT_TIMESTAMP"), &ColumnType::DateTime),
            DefaultValue::Expression("CURRENT_TIMESTAMP".into())
        );
    }

    #[test]
    fn test_common_type_names() {
        let quote = |v: &str| format!("'{v}'");
        for (column_type, name) in [
            (ColumnType::Integer(IntWidth::Small), "smallint"),
            (ColumnType::Decimal { precision: Some(10), scale: Some(2) }, "decimal(10,2)"),
            (ColumnType::String { limit: Some(40) }, "varchar(40)"),
            (ColumnType::Text(LobSize::Medium), "mediumtext"),
            (ColumnType::Enum(vec!["a".into(), "b".into()]), "enum('a','b')"),
        ] {
            assert_eq!(common_type_name(&column_type, quote), name);
            let (head, args, _) = split_native_type(name);
            assert_eq!(parse_common_type(&head, &args), Some(column_type));
        }
    }
}
