//! Typed configuration for parsing and diffing.

use crate::schema::ColumnType;

/// Default and ceiling for one family's declared width.
///
/// A column declared without a width takes `default`; a declared width
/// above `ceiling` is capped, matching what a driver would silently do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WidthPolicy {
    pub default: Option<u32>,
    pub ceiling: Option<u32>,
}

impl WidthPolicy {
    /// Creates a policy with a default width and no ceiling.
    #[must_use]
    pub const fn with_default(default: u32) -> Self {
        Self {
            default: Some(default),
            ceiling: None,
        }
    }

    /// Creates a policy that leaves widths as declared.
    #[must_use]
    pub const fn unset() -> Self {
        Self {
            default: None,
            ceiling: None,
        }
    }

    /// Sets the ceiling.
    #[must_use]
    pub const fn capped_at(mut self, ceiling: u32) -> Self {
        self.ceiling = Some(ceiling);
        self
    }

    /// Applies the policy to a declared width.
    #[must_use]
    pub fn normalize(&self, declared: Option<u32>) -> Option<u32> {
        match (declared, self.ceiling) {
            (None, _) => self.default,
            (Some(width), Some(ceiling)) if width > ceiling => Some(ceiling),
            (Some(width), _) => Some(width),
        }
    }
}

/// Width policies per type family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidthDefaults {
    pub string: WidthPolicy,
    pub char: WidthPolicy,
    pub binary: WidthPolicy,
    pub float: WidthPolicy,
    pub decimal_precision: WidthPolicy,
    pub decimal_scale: WidthPolicy,
}

impl Default for WidthDefaults {
    fn default() -> Self {
        Self {
            string: WidthPolicy::with_default(255),
            char: WidthPolicy::with_default(1),
            binary: WidthPolicy::with_default(255),
            float: WidthPolicy::unset(),
            decimal_precision: WidthPolicy::with_default(10),
            decimal_scale: WidthPolicy::with_default(0),
        }
    }
}

impl WidthDefaults {
    /// Policies that never touch a declared width.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            string: WidthPolicy::unset(),
            char: WidthPolicy::unset(),
            binary: WidthPolicy::unset(),
            float: WidthPolicy::unset(),
            decimal_precision: WidthPolicy::unset(),
            decimal_scale: WidthPolicy::unset(),
        }
    }

    /// Normalizes the widths carried by a column type.
    #[must_use]
    pub fn normalize(&self, column_type: &ColumnType) -> ColumnType {
        match column_type {
            ColumnType::String { limit } => ColumnType::String {
                limit: self.string.normalize(*limit),
            },
            ColumnType::Char { limit } => ColumnType::Char {
                limit: self.char.normalize(*limit),
            },
            ColumnType::Binary { limit } => ColumnType::Binary {
                limit: self.binary.normalize(*limit),
            },
            ColumnType::Float { precision } => ColumnType::Float {
                precision: self.float.normalize(*precision),
            },
            ColumnType::Decimal { precision, scale } => ColumnType::Decimal {
                precision: self.decimal_precision.normalize(*precision),
                scale: self.decimal_scale.normalize(*scale),
            },
            other => other.clone(),
        }
    }
}

/// Options for the definition parser.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub widths: WidthDefaults,
}

impl ParseOptions {
    /// Creates parse options with default widths.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the width policies.
    #[must_use]
    pub const fn with_widths(mut self, widths: WidthDefaults) -> Self {
        self.widths = widths;
        self
    }
}

/// How an existing foreign key is recognized in the desired schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForeignKeyMatching {
    /// Match by name; two default-named keys also match by shape.
    Exact,
    /// Match by name, then by columns and referenced table/columns.
    #[default]
    Structural,
}

/// Options controlling the differ.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct DiffOptions {
    /// Do not compare the `comment` table option.
    pub ignore_table_comment: bool,
    /// Do not compare table options other than `comment`.
    pub ignore_table_options: bool,
    /// Do not compare column comments.
    pub skip_column_comment_change: bool,
    /// Turn primary key changes into drop/add pairs instead of failing.
    pub allow_pk_change: bool,
    /// Coalesce a table's alterations into one operation.
    pub bulk_change: bool,
    /// Emit DropTable for tables absent from the desired schema.
    pub drop_table: bool,
    /// Keep only the drops of undeclared tables and the foreign key drops
    /// they need. Implies `drop_table`.
    pub drop_table_only: bool,
    /// Omit DropIndex for indexes whose every column is being dropped.
    pub index_removed_drop_column: bool,
    /// Put indexes in CreateTable instead of separate AddIndex operations.
    pub create_table_with_index: bool,
    pub fk_matching: ForeignKeyMatching,
    /// Fail instead of deferring foreign keys out of a creation cycle.
    pub require_inline_foreign_keys: bool,
    /// Warn when a foreign key column's type differs from its target.
    pub check_relation_type: bool,
    pub widths: WidthDefaults,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ignore_table_comment: false,
            ignore_table_options: false,
            skip_column_comment_change: false,
            allow_pk_change: false,
            bulk_change: false,
            drop_table: true,
            drop_table_only: false,
            index_removed_drop_column: false,
            create_table_with_index: false,
            fk_matching: ForeignKeyMatching::Structural,
            require_inline_foreign_keys: false,
            check_relation_type: false,
            widths: WidthDefaults::default(),
        }
    }
}

impl DiffOptions {
    /// Creates options with the documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_ignore_table_comment(mut self, enabled: bool) -> Self {
        self.ignore_table_comment = enabled;
        self
    }

    #[must_use]
    pub const fn with_ignore_table_options(mut self, enabled: bool) -> Self {
        self.ignore_table_options = enabled;
        self
    }

    #[must_use]
    pub const fn with_skip_column_comment_change(mut self, enabled: bool) -> Self {
        self.skip_column_comment_change = enabled;
        self
    }

    #[must_use]
    pub const fn with_allow_pk_change(mut self, enabled: bool) -> Self {
        self.allow_pk_change = enabled;
        self
    }

    #[must_use]
    pub const fn with_bulk_change(mut self, enabled: bool) -> Self {
        self.bulk_change = enabled;
        self
    }

    #[must_use]
    pub const fn with_drop_table(mut self, enabled: bool) -> Self {
        self.drop_table = enabled;
        self
    }

    #[must_use]
    pub const fn with_drop_table_only(mut self, enabled: bool) -> Self {
        self.drop_table_only = enabled;
        self
    }

    #[must_use]
    pub const fn with_index_removed_drop_column(mut self, enabled: bool) -> Self {
        self.index_removed_drop_column = enabled;
        self
    }

    #[must_use]
    pub const fn with_create_table_with_index(mut self, enabled: bool) -> Self {
        self.create_table_with_index = enabled;
        self
    }

    #[must_use]
    pub const fn with_fk_matching(mut self, matching: ForeignKeyMatching) -> Self {
        self.fk_matching = matching;
        self
    }

    #[must_use]
    pub const fn with_require_inline_foreign_keys(mut self, enabled: bool) -> Self {
        self.require_inline_foreign_keys = enabled;
        self
    }

    #[must_use]
    pub const fn with_check_relation_type(mut self, enabled: bool) -> Self {
        self.check_relation_type = enabled;
        self
    }

    #[must_use]
    pub const fn with_widths(mut self, widths: WidthDefaults) -> Self {
        self.widths = widths;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_policy() {
        let policy = WidthPolicy::with_default(255).capped_at(1000);
        assert_eq!(policy.normalize(None), Some(255));
        assert_eq!(policy.normalize(Some(64)), Some(64));
        assert_eq!(policy.normalize(Some(4000)), Some(1000));
        assert_eq!(WidthPolicy::unset().normalize(None), None);
    }

    #[test]
    fn test_width_defaults_normalize_decimal() {
        let widths = WidthDefaults::default();
        let ty = widths.normalize(&ColumnType::Decimal {
            precision: None,
            scale: None,
        });
        assert_eq!(
            ty,
            ColumnType::Decimal {
                precision: Some(10),
                scale: Some(0)
            }
        );
    }

    #[test]
    fn test_diff_options_defaults() {
        let opts = DiffOptions::default();
        assert!(opts.drop_table);
        assert!(!opts.allow_pk_change);
        assert_eq!(opts.fk_matching, ForeignKeyMatching::Structural);
        let opts = opts.with_bulk_change(true).with_drop_table(false);
        assert!(opts.bulk_change);
        assert!(!opts.drop_table);
    }
}
