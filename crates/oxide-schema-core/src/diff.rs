//! Schema diffing.
//!
//! The [`Differ`] compares the current schema (`before`) with the
//! desired one (`after`) and produces a [`Delta`]: an ordered list of
//! operations that is safe to execute front to back.
//!
//! Renames are only produced from explicit `renamed_from` declarations.
//! A column or table that merely disappeared while another appeared is
//! a drop plus an add.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, info, warn};

use crate::delta::Delta;
use crate::error::{DefinitionError, Error, Result};
use crate::operation::Operation;
use crate::options::{DiffOptions, ForeignKeyMatching};
use crate::schema::{Column, DefaultValue, ForeignKey, Index, Schema, Table, OPTION_COMMENT};

/// A difference that produces no operation but should be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffWarning {
    /// The table is not declared but dropping tables is disabled.
    DropTableSkipped { table: String },
    /// Columns present on both sides are in a different order.
    ColumnOrderChanged {
        table: String,
        current: Vec<String>,
        desired: Vec<String>,
    },
    /// A foreign key column's type differs from the referenced column.
    RelationTypeMismatch {
        table: String,
        foreign_key: String,
        column: String,
        referenced: String,
    },
    /// Both sides carry a different `alter_extra` fragment.
    AlterExtraMismatch { table: String },
}

impl fmt::Display for DiffWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropTableSkipped { table } => {
                write!(f, "table '{table}' is not declared; drop skipped")
            }
            Self::ColumnOrderChanged {
                table,
                current,
                desired,
            } => write!(
                f,
                "column order of '{table}' differs: [{}] in the database, [{}] declared",
                current.join(", "),
                desired.join(", ")
            ),
            Self::RelationTypeMismatch {
                table,
                foreign_key,
                column,
                referenced,
            } => write!(
                f,
                "foreign key '{foreign_key}' on '{table}': column '{column}' does not match the type of '{referenced}'"
            ),
            Self::AlterExtraMismatch { table } => {
                write!(f, "alter_extra of '{table}' differs from the recorded one")
            }
        }
    }
}

/// Computes deltas between schemas.
#[derive(Debug, Clone, Default)]
pub struct Differ {
    options: DiffOptions,
}

// ============================================================
// Renames
// ============================================================

/// Declared renames: tables old to new, and per table (keyed by the
/// new table name) columns old to new.
#[derive(Debug, Default)]
struct Renames {
    tables: BTreeMap<String, String>,
    columns: BTreeMap<String, BTreeMap<String, String>>,
}

impl Renames {
    fn resolve(before: &Schema, after: &Schema) -> std::result::Result<Self, DefinitionError> {
        let mut renames = Self::default();
        for table in after.tables() {
            let Some(from) = &table.renamed_from else {
                continue;
            };
            // Already renamed on a previous run.
            if before.contains(&table.name) {
                continue;
            }
            if !before.contains(from) || after.contains(from) || renames.tables.contains_key(from) {
                return Err(DefinitionError::new(
                    format!("table '{}'", table.name),
                    format!("renamed_from '{from}' does not name a table that can be renamed"),
                ));
            }
            renames.tables.insert(from.clone(), table.name.clone());
        }

        for table in after.tables() {
            let Some(current) = before.table(renames.source_of(&table.name)) else {
                continue;
            };
            let mut columns = BTreeMap::new();
            for column in &table.columns {
                let Some(from) = &column.renamed_from else {
                    continue;
                };
                if current.column(&column.name).is_some() {
                    continue;
                }
                if current.column(from).is_none()
                    || table.column(from).is_some()
                    || columns.contains_key(from)
                {
                    return Err(DefinitionError::new(
                        format!("table '{}'", table.name),
                        format!(
                            "column '{}' is renamed_from '{from}', which cannot be renamed",
                            column.name
                        ),
                    ));
                }
                columns.insert(from.clone(), column.name.clone());
            }
            if !columns.is_empty() {
                renames.columns.insert(table.name.clone(), columns);
            }
        }
        Ok(renames)
    }

    /// Current name of a desired table.
    fn source_of<'a>(&'a self, table: &'a str) -> &'a str {
        self.tables
            .iter()
            .find(|(_, to)| to.as_str() == table)
            .map_or(table, |(from, _)| from.as_str())
    }

    fn is_renamed_target(&self, table: &str) -> bool {
        self.tables.values().any(|to| to == table)
    }

    fn column(&self, table: &str, column: &str) -> String {
        self.columns
            .get(table)
            .and_then(|columns| columns.get(column))
            .map_or_else(|| column.to_string(), Clone::clone)
    }

    fn columns(&self, table: &str, columns: &[String]) -> Vec<String> {
        columns.iter().map(|c| self.column(table, c)).collect()
    }

    /// A current index with desired column names.
    fn map_index(&self, table: &str, index: &Index) -> Index {
        let mut mapped = index.clone();
        mapped.columns = self.columns(table, &index.columns);
        mapped.lengths = index
            .lengths
            .iter()
            .map(|(c, l)| (self.column(table, c), *l))
            .collect();
        mapped
    }

    /// A current foreign key with desired table and column names.
    fn map_foreign_key(&self, table: &str, fk: &ForeignKey) -> ForeignKey {
        let mut mapped = fk.clone();
        mapped.columns = self.columns(table, &fk.columns);
        mapped.references_table = self
            .tables
            .get(&fk.references_table)
            .cloned()
            .unwrap_or_else(|| fk.references_table.clone());
        mapped.references_columns = self.columns(&mapped.references_table, &fk.references_columns);
        mapped
    }
}

// ============================================================
// Per-table changes
// ============================================================

#[derive(Debug, Default)]
struct TableChanges {
    rename_columns: Vec<Operation>,
    drop_indexes: Vec<Operation>,
    drop_primary_key: Option<Operation>,
    drop_columns: Vec<Operation>,
    change_columns: Vec<Operation>,
    add_columns: Vec<Operation>,
    add_primary_key: Option<Operation>,
    add_indexes: Vec<Operation>,
    change_options: Option<Operation>,
    drop_foreign_keys: Vec<Operation>,
    add_foreign_keys: Vec<ForeignKey>,
    /// Columns whose name and definition are untouched by this delta.
    stable_columns: BTreeSet<String>,
}

impl TableChanges {
    /// Alterations other than foreign keys and table options, in
    /// execution order.
    fn into_alterations(self) -> (Vec<Operation>, Vec<ForeignKey>, Option<Operation>) {
        let mut ops = self.rename_columns;
        ops.extend(self.drop_indexes);
        ops.extend(self.drop_primary_key);
        ops.extend(self.drop_columns);
        ops.extend(self.change_columns);
        ops.extend(self.add_columns);
        ops.extend(self.add_primary_key);
        ops.extend(self.add_indexes);
        (ops, self.add_foreign_keys, self.change_options)
    }
}

impl Differ {
    /// Creates a differ.
    #[must_use]
    pub const fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    /// Returns the options in effect.
    #[must_use]
    pub const fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// Computes the operations turning `before` into `after`.
    pub fn diff(&self, before: &Schema, after: &Schema) -> Result<Delta> {
        let before = self.normalize(before);
        let after = self.normalize(after);
        validate_tables(&before)?;
        validate_tables(&after)?;
        let renames = Renames::resolve(&before, &after)?;
        self.validate_references(&before, &after, &renames)?;

        let mut warnings = Vec::new();
        let mut changes = BTreeMap::new();
        for table in after.tables() {
            if let Some(current) = before.table(renames.source_of(&table.name)) {
                let table_changes = self.diff_table(current, table, &renames, &mut warnings)?;
                changes.insert(table.name.clone(), table_changes);
            }
        }
        let created: Vec<&Table> = after
            .tables()
            .filter(|t| !before.contains(&t.name) && !renames.is_renamed_target(&t.name))
            .collect();
        let removed: Vec<&Table> = before
            .tables()
            .filter(|t| !after.contains(&t.name) && !renames.tables.contains_key(&t.name))
            .collect();

        let mut operations = Vec::new();
        for (from, to) in &renames.tables {
            operations.push(Operation::RenameTable {
                from: from.clone(),
                to: to.clone(),
            });
        }
        for table_changes in changes.values_mut() {
            operations.append(&mut table_changes.drop_foreign_keys);
        }

        let mut available: BTreeMap<String, BTreeSet<String>> = changes
            .iter()
            .map(|(name, c)| (name.clone(), c.stable_columns.clone()))
            .collect();
        if self.options.drop_table || self.options.drop_table_only {
            operations.extend(drop_tables(&removed));
        } else {
            for table in &removed {
                warnings.push(DiffWarning::DropTableSkipped {
                    table: table.name.clone(),
                });
                available.insert(table.name.clone(), column_names(table));
            }
        }

        let mut pending_foreign_keys: BTreeMap<String, Vec<ForeignKey>> = BTreeMap::new();
        operations.extend(self.create_tables(&created, &mut available, &mut pending_foreign_keys)?);

        let mut option_changes = Vec::new();
        for (name, table_changes) in changes {
            let (alterations, foreign_keys, options) = table_changes.into_alterations();
            option_changes.extend(options);
            if self.options.bulk_change && !alterations.is_empty() {
                operations.push(Operation::BulkChange {
                    table: name.clone(),
                    operations: alterations,
                });
            } else {
                operations.extend(alterations);
            }
            if !foreign_keys.is_empty() {
                pending_foreign_keys.entry(name).or_default().splice(0..0, foreign_keys);
            }
        }
        for (table, foreign_keys) in pending_foreign_keys {
            for foreign_key in foreign_keys {
                operations.push(Operation::add_foreign_key(table.clone(), foreign_key));
            }
        }
        operations.extend(option_changes);
        if self.options.drop_table_only {
            let dropped: BTreeSet<&str> = removed.iter().map(|t| t.name.as_str()).collect();
            operations.retain(|op| match op {
                Operation::DropTable { .. } => true,
                Operation::DropForeignKey { table, foreign_key } => {
                    dropped.contains(table.as_str())
                        || dropped.contains(foreign_key.references_table.as_str())
                }
                _ => false,
            });
        }

        if self.options.check_relation_type {
            relation_warnings(&after, &mut warnings);
        }
        for warning in &warnings {
            warn!(%warning, "schema difference not applied");
        }
        info!(
            operations = operations.len(),
            warnings = warnings.len(),
            "computed delta"
        );

        let alter_extras = after
            .tables()
            .filter_map(|t| t.alter_extra.clone().map(|extra| (t.name.clone(), extra)))
            .collect();
        Ok(Delta::new(operations, warnings, before, alter_extras))
    }

    // ============================================================
    // Normalization and validation
    // ============================================================

    /// Applies width defaults and the comparison equivalences to a copy.
    fn normalize(&self, schema: &Schema) -> Schema {
        let mut schema = schema.clone();
        for table in schema.tables.values_mut() {
            for column in &mut table.columns {
                column.column_type = self.options.widths.normalize(&column.column_type);
                column.default = column.default.normalized_for(&column.column_type);
                if table.primary_key.contains(&column.name) {
                    column.nullable = false;
                }
                if column.nullable && column.default == DefaultValue::Null {
                    column.default = DefaultValue::None;
                }
                if column.comment.as_deref() == Some("") {
                    column.comment = None;
                }
            }
            if table.comment() == Some("") {
                table.options.remove(OPTION_COMMENT);
            }
        }
        schema
    }

    /// Foreign key targets must exist once the delta has run.
    fn validate_references(
        &self,
        before: &Schema,
        after: &Schema,
        renames: &Renames,
    ) -> std::result::Result<(), DefinitionError> {
        for table in after.tables() {
            for fk in &table.foreign_keys {
                let fail = |cause: String| {
                    DefinitionError::new(format!("foreign key '{}' on '{}'", fk.name, table.name), cause)
                };
                match after.table(&fk.references_table) {
                    Some(target) => {
                        if let Some(missing) = fk
                            .references_columns
                            .iter()
                            .find(|c| target.column(c).is_none())
                        {
                            return Err(fail(format!(
                                "references missing column '{}.{missing}'",
                                fk.references_table
                            )));
                        }
                    }
                    None => {
                        let kept = !self.options.drop_table
                            && before.contains(&fk.references_table)
                            && !renames.tables.contains_key(&fk.references_table);
                        if !kept {
                            return Err(fail(format!(
                                "references undeclared table '{}'",
                                fk.references_table
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ============================================================
    // Table comparison
    // ============================================================

    fn diff_table(
        &self,
        current: &Table,
        desired: &Table,
        renames: &Renames,
        warnings: &mut Vec<DiffWarning>,
    ) -> Result<TableChanges> {
        let name = desired.name.as_str();
        let mut changes = TableChanges::default();

        if let Some(columns) = renames.columns.get(name) {
            for (from, to) in columns {
                changes.rename_columns.push(Operation::RenameColumn {
                    table: name.to_string(),
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }

        // Columns
        let current_columns: BTreeMap<String, &Column> = current
            .columns
            .iter()
            .map(|c| (renames.column(name, &c.name), c))
            .collect();
        let dropped: BTreeSet<String> = current
            .columns
            .iter()
            .map(|c| renames.column(name, &c.name))
            .filter(|c| desired.column(c).is_none())
            .collect();
        for column in &current.columns {
            if dropped.contains(&column.name) {
                changes
                    .drop_columns
                    .push(Operation::drop_column(name, column.name.clone()));
            }
        }
        let renamed: BTreeSet<&String> = renames
            .columns
            .get(name)
            .map(|c| c.values().collect())
            .unwrap_or_default();
        for (position, column) in desired.columns.iter().enumerate() {
            match current_columns.get(&column.name) {
                None => changes.add_columns.push(Operation::AddColumn {
                    table: name.to_string(),
                    column: clean_column(column),
                    after: position
                        .checked_sub(1)
                        .map(|p| desired.columns[p].name.clone()),
                }),
                Some(existing) => {
                    if let Some(target) = self.column_change(existing, column) {
                        changes.change_columns.push(Operation::ChangeColumn {
                            table: name.to_string(),
                            column: target,
                        });
                    } else if !renamed.contains(&column.name) {
                        changes.stable_columns.insert(column.name.clone());
                    }
                }
            }
        }
        let current_order: Vec<String> = current
            .columns
            .iter()
            .map(|c| renames.column(name, &c.name))
            .filter(|c| !dropped.contains(c))
            .collect();
        let desired_order: Vec<String> = desired
            .columns
            .iter()
            .filter(|c| current_columns.contains_key(&c.name))
            .map(|c| c.name.clone())
            .collect();
        if current_order != desired_order {
            warnings.push(DiffWarning::ColumnOrderChanged {
                table: name.to_string(),
                current: current_order,
                desired: desired_order,
            });
        }

        // Primary key
        let current_pk = renames.columns(name, &current.primary_key);
        if current_pk != desired.primary_key {
            if !self.options.allow_pk_change {
                return Err(Error::PrimaryKeyChange {
                    table: name.to_string(),
                    current: current_pk,
                    desired: desired.primary_key.clone(),
                });
            }
            if !current_pk.is_empty() {
                changes.drop_primary_key = Some(Operation::DropPrimaryKey {
                    table: name.to_string(),
                    columns: current_pk,
                });
            }
            if !desired.primary_key.is_empty() {
                changes.add_primary_key = Some(Operation::AddPrimaryKey {
                    table: name.to_string(),
                    columns: desired.primary_key.clone(),
                });
            }
            changes.stable_columns.clear();
        }

        self.diff_indexes(current, desired, renames, &dropped, &mut changes);
        self.diff_foreign_keys(current, desired, renames, &mut changes);

        // Table options
        let mut option_changes = BTreeMap::new();
        if !self.options.ignore_table_options {
            let keys: BTreeSet<&String> = current
                .options
                .keys()
                .chain(desired.options.keys())
                .filter(|k| *k != OPTION_COMMENT)
                .collect();
            for key in keys {
                let wanted = desired.options.get(key);
                if current.options.get(key) != wanted {
                    option_changes.insert(key.clone(), wanted.cloned());
                }
            }
        }
        if !self.options.ignore_table_comment && current.comment() != desired.comment() {
            option_changes.insert(
                OPTION_COMMENT.to_string(),
                desired.comment().map(ToString::to_string),
            );
        }
        if !option_changes.is_empty() {
            changes.change_options = Some(Operation::ChangeTableOptions {
                table: name.to_string(),
                changes: option_changes,
            });
        }

        if let (Some(a), Some(b)) = (&current.alter_extra, &desired.alter_extra) {
            if a != b {
                warnings.push(DiffWarning::AlterExtraMismatch {
                    table: name.to_string(),
                });
            }
        }

        debug!(
            table = name,
            dropped_columns = changes.drop_columns.len(),
            changed_columns = changes.change_columns.len(),
            added_columns = changes.add_columns.len(),
            "compared table"
        );
        Ok(changes)
    }

    /// The target definition when `existing` must change, else `None`.
    fn column_change(&self, existing: &Column, desired: &Column) -> Option<Column> {
        let comment_differs =
            !self.options.skip_column_comment_change && existing.comment != desired.comment;
        let differs = existing.column_type != desired.column_type
            || existing.nullable != desired.nullable
            || existing.default != desired.default
            || existing.unsigned != desired.unsigned
            || existing.auto_increment != desired.auto_increment
            || comment_differs;
        if !differs {
            return None;
        }
        let mut target = clean_column(desired);
        if self.options.skip_column_comment_change {
            target.comment.clone_from(&existing.comment);
        }
        Some(target)
    }

    fn diff_indexes(
        &self,
        current: &Table,
        desired: &Table,
        renames: &Renames,
        dropped_columns: &BTreeSet<String>,
        changes: &mut TableChanges,
    ) {
        let name = desired.name.as_str();
        let mapped: Vec<Index> = current
            .indexes
            .iter()
            .map(|i| renames.map_index(name, i))
            .collect();
        let mut unmatched: Vec<&Index> = mapped.iter().collect();
        let mut pairs: Vec<(&Index, &Index)> = Vec::new();
        let mut leftover: Vec<&Index> = Vec::new();

        for index in &desired.indexes {
            match unmatched.iter().position(|i| i.name == index.name) {
                Some(pos) => pairs.push((unmatched.remove(pos), index)),
                None => leftover.push(index),
            }
        }
        let mut added: BTreeSet<&str> = BTreeSet::new();
        for index in leftover {
            match unmatched.iter().position(|i| i.same_shape(index)) {
                Some(pos) => pairs.push((unmatched.remove(pos), index)),
                None => {
                    added.insert(&index.name);
                }
            }
        }
        let mut removed: BTreeSet<&str> = unmatched.iter().map(|i| i.name.as_str()).collect();
        for (existing, index) in pairs {
            if !existing.same_definition(index) {
                removed.insert(&existing.name);
                added.insert(&index.name);
            }
        }

        for index in mapped.iter().filter(|i| removed.contains(i.name.as_str())) {
            let implied = self.options.index_removed_drop_column
                && index.columns.iter().all(|c| dropped_columns.contains(c));
            if !implied {
                changes
                    .drop_indexes
                    .push(Operation::drop_index(name, index.clone()));
            }
        }
        for index in desired
            .indexes
            .iter()
            .filter(|i| added.contains(i.name.as_str()))
        {
            changes
                .add_indexes
                .push(Operation::add_index(name, index.clone()));
        }
    }

    fn diff_foreign_keys(
        &self,
        current: &Table,
        desired: &Table,
        renames: &Renames,
        changes: &mut TableChanges,
    ) {
        let name = desired.name.as_str();
        let mapped: Vec<ForeignKey> = current
            .foreign_keys
            .iter()
            .map(|fk| renames.map_foreign_key(name, fk))
            .collect();
        let mut unmatched: Vec<&ForeignKey> = mapped.iter().collect();
        let mut pairs: Vec<(&ForeignKey, &ForeignKey)> = Vec::new();
        let mut leftover: Vec<&ForeignKey> = Vec::new();

        for fk in &desired.foreign_keys {
            match unmatched.iter().position(|f| f.name == fk.name) {
                Some(pos) => pairs.push((unmatched.remove(pos), fk)),
                None => leftover.push(fk),
            }
        }
        let mut added: Vec<&ForeignKey> = Vec::new();
        for fk in leftover {
            let found = unmatched.iter().position(|f| match self.options.fk_matching {
                ForeignKeyMatching::Structural => f.same_shape(fk),
                ForeignKeyMatching::Exact => f.default_name && fk.default_name && f.same_shape(fk),
            });
            match found {
                Some(pos) => pairs.push((unmatched.remove(pos), fk)),
                None => added.push(fk),
            }
        }
        let mut removed: Vec<&ForeignKey> = unmatched;
        for (existing, fk) in pairs {
            if !existing.same_definition(fk) {
                removed.push(existing);
                added.push(fk);
            }
        }

        for fk in mapped.iter().filter(|f| removed.iter().any(|r| r.name == f.name)) {
            changes
                .drop_foreign_keys
                .push(Operation::drop_foreign_key(name, fk.clone()));
        }
        for fk in desired
            .foreign_keys
            .iter()
            .filter(|f| added.iter().any(|a| a.name == f.name))
        {
            changes.add_foreign_keys.push(fk.clone());
        }
    }

    // ============================================================
    // Table creation order
    // ============================================================

    /// Creates tables referenced tables first. A foreign key goes inline
    /// when its target exists with the referenced columns untouched;
    /// otherwise it is added after every table has been altered.
    fn create_tables(
        &self,
        created: &[&Table],
        available: &mut BTreeMap<String, BTreeSet<String>>,
        pending: &mut BTreeMap<String, Vec<ForeignKey>>,
    ) -> Result<Vec<Operation>> {
        let mut remaining: BTreeMap<&str, &Table> =
            created.iter().map(|t| (t.name.as_str(), *t)).collect();
        let mut operations = Vec::new();

        while !remaining.is_empty() {
            let blocked = |table: &Table| {
                table.foreign_keys.iter().any(|fk| {
                    fk.references_table != table.name
                        && remaining.contains_key(fk.references_table.as_str())
                })
            };
            let ready = remaining.values().find(|t| !blocked(t)).copied();
            let table = match ready {
                Some(table) => table,
                None if self.options.require_inline_foreign_keys => {
                    return Err(Error::UnresolvableDependency {
                        tables: remaining.keys().map(ToString::to_string).collect(),
                    });
                }
                None => match remaining.values().next().copied() {
                    Some(table) => {
                        debug!(table = %table.name, "breaking foreign key cycle");
                        table
                    }
                    None => break,
                },
            };
            remaining.remove(table.name.as_str());

            let mut create = clean_table(table);
            let (inline, deferred): (Vec<ForeignKey>, Vec<ForeignKey>) = create
                .foreign_keys
                .drain(..)
                .partition(|fk| fk.references_table == table.name || references_available(fk, available));
            create.foreign_keys = inline;
            if !deferred.is_empty() {
                pending
                    .entry(table.name.clone())
                    .or_default()
                    .extend(deferred);
            }
            let indexes = if self.options.create_table_with_index {
                Vec::new()
            } else {
                std::mem::take(&mut create.indexes)
            };
            operations.push(Operation::create_table(create));
            for index in indexes {
                operations.push(Operation::add_index(table.name.clone(), index));
            }
            available.insert(table.name.clone(), column_names(table));
        }
        Ok(operations)
    }
}

fn references_available(fk: &ForeignKey, available: &BTreeMap<String, BTreeSet<String>>) -> bool {
    available
        .get(&fk.references_table)
        .is_some_and(|columns| fk.references_columns.iter().all(|c| columns.contains(c)))
}

/// Drops tables referencing ones first; a reference cycle is cut by
/// dropping the foreign keys pointing at the table dropped next.
fn drop_tables(removed: &[&Table]) -> Vec<Operation> {
    let mut remaining: BTreeMap<&str, Vec<ForeignKey>> = removed
        .iter()
        .map(|t| (t.name.as_str(), t.foreign_keys.clone()))
        .collect();
    let mut operations = Vec::new();

    while !remaining.is_empty() {
        let referenced = |name: &str| {
            remaining.iter().any(|(other, fks)| {
                *other != name && fks.iter().any(|fk| fk.references_table == name)
            })
        };
        let next = remaining.keys().find(|name| !referenced(name)).copied();
        let name = match next {
            Some(name) => name,
            None => {
                let Some(first) = remaining.keys().next().copied() else {
                    break;
                };
                for (other, fks) in remaining.iter_mut().filter(|(other, _)| **other != first) {
                    fks.retain(|fk| {
                        if fk.references_table == first {
                            operations.push(Operation::drop_foreign_key(*other, fk.clone()));
                            false
                        } else {
                            true
                        }
                    });
                }
                first
            }
        };
        remaining.remove(name);
        operations.push(Operation::drop_table(name));
    }
    operations
}

fn validate_tables(schema: &Schema) -> std::result::Result<(), DefinitionError> {
    for table in schema.tables() {
        let fail = |cause: String| DefinitionError::new(format!("table '{}'", table.name), cause);
        let mut names = BTreeSet::new();
        for column in &table.columns {
            if !names.insert(column.name.as_str()) {
                return Err(fail(format!("duplicate column '{}'", column.name)));
            }
        }
        if let Some(missing) = table.primary_key.iter().find(|c| !names.contains(c.as_str())) {
            return Err(fail(format!("primary key on missing column '{missing}'")));
        }
        let mut index_names = BTreeSet::new();
        for index in &table.indexes {
            if !index_names.insert(index.name.as_str()) {
                return Err(fail(format!("duplicate index '{}'", index.name)));
            }
            if let Some(missing) = index.columns.iter().find(|c| !names.contains(c.as_str())) {
                return Err(fail(format!(
                    "index '{}' on missing column '{missing}'",
                    index.name
                )));
            }
        }
        let mut fk_names = BTreeSet::new();
        for fk in &table.foreign_keys {
            if !fk_names.insert(fk.name.as_str()) {
                return Err(fail(format!("duplicate foreign key '{}'", fk.name)));
            }
            if let Some(missing) = fk.columns.iter().find(|c| !names.contains(c.as_str())) {
                return Err(fail(format!(
                    "foreign key '{}' on missing column '{missing}'",
                    fk.name
                )));
            }
            if fk.columns.len() != fk.references_columns.len() {
                return Err(fail(format!(
                    "foreign key '{}' column count does not match the referenced columns",
                    fk.name
                )));
            }
        }
    }
    Ok(())
}

fn relation_warnings(schema: &Schema, warnings: &mut Vec<DiffWarning>) {
    for table in schema.tables() {
        for fk in &table.foreign_keys {
            let Some(target) = schema.table(&fk.references_table) else {
                continue;
            };
            for (column, referenced) in fk.columns.iter().zip(&fk.references_columns) {
                let (Some(source), Some(dest)) = (table.column(column), target.column(referenced)) else {
                    continue;
                };
                if source.column_type != dest.column_type || source.unsigned != dest.unsigned {
                    warnings.push(DiffWarning::RelationTypeMismatch {
                        table: table.name.clone(),
                        foreign_key: fk.name.clone(),
                        column: column.clone(),
                        referenced: format!("{}.{referenced}", target.name),
                    });
                }
            }
        }
    }
}

fn column_names(table: &Table) -> BTreeSet<String> {
    table.columns.iter().map(|c| c.name.clone()).collect()
}

fn clean_column(column: &Column) -> Column {
    let mut column = column.clone();
    column.renamed_from = None;
    column
}

fn clean_table(table: &Table) -> Table {
    let mut table = table.clone();
    table.renamed_from = None;
    for column in &mut table.columns {
        column.renamed_from = None;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Parser;
    use crate::schema::{ColumnType, ForeignKeyAction, IntWidth};

    fn parse(source: &str) -> Schema {
        Parser::default().parse_str(source).unwrap()
    }

    fn diff(before: &str, after: &str, options: DiffOptions) -> Result<Delta> {
        Differ::new(options).diff(&parse(before), &parse(after))
    }

    fn descriptions(delta: &Delta) -> Vec<String> {
        delta.operations().iter().map(Operation::description).collect()
    }

    #[test]
    fn test_identical_schemas() {
        let source = r#"
            create_table "users" do |t|
              t.string "name"
              t.index ["name"]
            end
        "#;
        let delta = diff(source, source, DiffOptions::default()).unwrap();
        assert!(!delta.differ());
    }

    #[test]
    fn test_width_defaults_and_null_default_are_equivalent() {
        let before = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("a", ColumnType::String { limit: Some(255) }).with_default(DefaultValue::Null))
                .with_column(Column::new("b", ColumnType::Boolean).with_default(DefaultValue::Integer(1))),
        );
        let after = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("a", ColumnType::String { limit: None }))
                .with_column(Column::new("b", ColumnType::Boolean).with_default(DefaultValue::Bool(true))),
        );
        let delta = Differ::default().diff(&before, &after).unwrap();
        assert!(!delta.differ(), "{:?}", delta.operations());
    }

    #[test]
    fn test_column_changes() {
        let delta = diff(
            r#"
            create_table "users" do |t|
              t.string "name", limit: 100
              t.integer "age"
              t.string "legacy"
            end
            "#,
            r#"
            create_table "users" do |t|
              t.string "name", limit: 200, null: false
              t.integer "age"
              t.string "email"
            end
            "#,
            DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(
            descriptions(&delta),
            vec![
                "Drop column 'legacy' from table 'users'",
                "Change column 'name' in table 'users'",
                "Add column 'email' to table 'users'",
            ]
        );
        let Operation::AddColumn { after, .. } = &delta.operations()[2] else {
            panic!("expected AddColumn");
        };
        assert_eq!(after.as_deref(), Some("age"));
    }

    #[test]
    fn test_column_rename_is_explicit() {
        let before = r#"
            create_table "users" do |t|
              t.string "name"
              t.index ["name"], name: "idx_name"
            end
        "#;
        let renamed = diff(
            before,
            r#"
            create_table "users" do |t|
              t.string "full_name", renamed_from: "name"
              t.index ["full_name"], name: "idx_name"
            end
            "#,
            DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(
            descriptions(&renamed),
            vec!["Rename column 'name' to 'full_name' in table 'users'"]
        );

        let undeclared = diff(
            before,
            r#"
            create_table "users" do |t|
              t.string "full_name"
            end
            "#,
            DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(
            descriptions(&undeclared),
            vec![
                "Drop index 'idx_name' from table 'users'",
                "Drop column 'name' from table 'users'",
                "Add column 'full_name' to table 'users'",
            ]
        );
    }

    #[test]
    fn test_table_rename() {
        let delta = diff(
            r#"
            create_table "people" do |t|
              t.string "name"
            end
            create_table "posts" do |t|
              t.bigint "person_id"
            end
            add_foreign_key "posts", "people", column: "person_id", name: "fk_author"
            "#,
            r#"
            create_table "users", renamed_from: "people" do |t|
              t.string "name"
            end
            create_table "posts" do |t|
              t.bigint "person_id"
            end
            add_foreign_key "posts", "users", column: "person_id", name: "fk_author"
            "#,
            DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(
            descriptions(&delta),
            vec!["Rename table 'people' to 'users'"]
        );
    }

    #[test]
    fn test_index_matched_by_shape() {
        let delta = diff(
            r#"
            create_table "users" do |t|
              t.string "email"
              t.index ["email"], name: "users_email_key", unique: true
            end
            "#,
            r#"
            create_table "users" do |t|
              t.string "email"
              t.index ["email"], unique: true
            end
            "#,
            DiffOptions::default(),
        )
        .unwrap();
        assert!(!delta.differ());
    }

    #[test]
    fn test_index_removed_drop_column() {
        let before = r#"
            create_table "users" do |t|
              t.string "name"
              t.boolean "legacy_flag"
              t.index ["legacy_flag"]
            end
        "#;
        let after = r#"
            create_table "users" do |t|
              t.string "name"
            end
        "#;
        let delta = diff(
            before,
            after,
            DiffOptions::default().with_index_removed_drop_column(true),
        )
        .unwrap();
        assert_eq!(
            descriptions(&delta),
            vec!["Drop column 'legacy_flag' from table 'users'"]
        );
    }

    #[test]
    fn test_foreign_key_matching() {
        let before = Schema::new()
            .with_table(Table::new("users").with_column(Column::new("id", ColumnType::Integer(IntWidth::Big))))
            .with_table(
                Table::new("posts")
                    .with_column(Column::new("user_id", ColumnType::Integer(IntWidth::Big)))
                    .with_foreign_key(ForeignKey::new(
                        "posts_ibfk_1",
                        vec!["user_id".into()],
                        "users",
                        vec!["id".into()],
                    )),
            );
        let mut after = before.clone();
        after.tables.get_mut("posts").unwrap().foreign_keys = vec![ForeignKey::new(
            "fk_posts_user_id",
            vec!["user_id".into()],
            "users",
            vec!["id".into()],
        )
        .with_default_name()];

        let structural = Differ::default().diff(&before, &after).unwrap();
        assert!(!structural.differ());

        let exact = Differ::new(DiffOptions::default().with_fk_matching(ForeignKeyMatching::Exact))
            .diff(&before, &after)
            .unwrap();
        assert_eq!(
            descriptions(&exact),
            vec![
                "Drop foreign key 'posts_ibfk_1' from table 'posts'",
                "Add foreign key 'fk_posts_user_id' to table 'posts'",
            ]
        );

        let mut cascading = after.clone();
        cascading.tables.get_mut("posts").unwrap().foreign_keys[0].on_delete = ForeignKeyAction::Cascade;
        let changed = Differ::default().diff(&before, &cascading).unwrap();
        assert_eq!(changed.operations().len(), 2);
    }

    #[test]
    fn test_foreign_key_cycle() {
        let source = r#"
            create_table "a" do |t|
              t.bigint "b_id"
            end
            create_table "b" do |t|
              t.bigint "a_id"
            end
            add_foreign_key "a", "b"
            add_foreign_key "b", "a"
        "#;
        let delta = diff("", source, DiffOptions::default()).unwrap();
        assert_eq!(
            descriptions(&delta),
            vec![
                "Create table 'a'",
                "Create table 'b'",
                "Add foreign key 'fk_a_b_id' to table 'a'",
            ]
        );
        let Operation::CreateTable { table } = &delta.operations()[1] else {
            panic!("expected CreateTable");
        };
        assert_eq!(table.foreign_keys.len(), 1);

        let err = diff(
            "",
            source,
            DiffOptions::default().with_require_inline_foreign_keys(true),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnresolvableDependency { ref tables } if tables == &["a", "b"]));
    }

    #[test]
    fn test_drop_tables_referencers_first() {
        let before = r#"
            create_table "users" do |t|
            end
            create_table "posts" do |t|
              t.references "user", foreign_key: true
            end
            create_table "keep" do |t|
            end
        "#;
        let after = r#"
            create_table "keep" do |t|
            end
        "#;
        let delta = diff(before, after, DiffOptions::default()).unwrap();
        assert_eq!(
            descriptions(&delta),
            vec!["Drop table 'posts'", "Drop table 'users'"]
        );

        let kept = diff(before, after, DiffOptions::default().with_drop_table(false)).unwrap();
        assert!(!kept.differ());
        assert_eq!(kept.warnings().len(), 2);
    }

    #[test]
    fn test_drop_table_only() {
        let before = r#"
            create_table "users" do |t|
            end
            create_table "posts" do |t|
              t.references "user", foreign_key: true
            end
            create_table "comments" do |t|
              t.references "user", foreign_key: true
              t.string "body"
            end
        "#;
        let after = r#"
            create_table "comments" do |t|
              t.bigint "user_id"
              t.text "body"
              t.string "author"
            end
            create_table "tags" do |t|
            end
        "#;
        let options = DiffOptions::default()
            .with_drop_table(false)
            .with_drop_table_only(true);
        let delta = diff(before, after, options).unwrap();
        let ops = delta.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(
            &ops[0],
            Operation::DropForeignKey { table, foreign_key }
                if table == "comments" && foreign_key.references_table == "users"
        ));
        assert_eq!(ops[1], Operation::drop_table("posts"));
        assert_eq!(ops[2], Operation::drop_table("users"));
    }

    #[test]
    fn test_table_options() {
        let before = Schema::new().with_table(
            Table::new("logs")
                .with_option("engine", "InnoDB")
                .with_option("charset", "utf8mb4")
                .with_option("comment", "old"),
        );
        let after = Schema::new().with_table(
            Table::new("logs")
                .with_option("engine", "MyISAM")
                .with_option("comment", "new"),
        );
        let delta = Differ::default().diff(&before, &after).unwrap();
        let Operation::ChangeTableOptions { changes, .. } = &delta.operations()[0] else {
            panic!("expected ChangeTableOptions");
        };
        assert_eq!(changes.get("engine"), Some(&Some("MyISAM".to_string())));
        assert_eq!(changes.get("comment"), Some(&Some("new".to_string())));
        assert_eq!(changes.get("charset"), Some(&None));

        let ignored = Differ::new(
            DiffOptions::default()
                .with_ignore_table_comment(true)
                .with_ignore_table_options(true),
        )
        .diff(&before, &after)
        .unwrap();
        assert!(!ignored.differ());
    }

    #[test]
    fn test_removed_table_option_is_a_change_both_ways() {
        let with_engine = Schema::new().with_table(Table::new("logs").with_option("engine", "MyISAM"));
        let without = Schema::new().with_table(Table::new("logs"));

        let removed = Differ::default().diff(&with_engine, &without).unwrap();
        let added = Differ::default().diff(&without, &with_engine).unwrap();
        assert!(removed.differ());
        assert!(added.differ());
        assert_eq!(
            removed.operations(),
            &[Operation::ChangeTableOptions {
                table: "logs".into(),
                changes: BTreeMap::from([("engine".to_string(), None)]),
            }]
        );
    }

    #[test]
    fn test_non_finite_string_default_is_stable() {
        let source = r#"
            create_table "readings" do |t|
              t.float "value", default: "NaN"
            end
        "#;
        let delta = diff(source, source, DiffOptions::default()).unwrap();
        assert!(!delta.differ());
        let dumped = crate::dsl::dump(&parse(source), &crate::dsl::DumpOptions::default());
        assert!(!diff(source, &dumped, DiffOptions::default()).unwrap().differ());
    }

    #[test]
    fn test_column_comment_skip_keeps_current_comment() {
        let before = r#"
            create_table "users" do |t|
              t.string "name", comment: "old"
            end
        "#;
        let after = r#"
            create_table "users" do |t|
              t.string "name", comment: "new", null: false
            end
        "#;
        let delta = diff(
            before,
            after,
            DiffOptions::default().with_skip_column_comment_change(true),
        )
        .unwrap();
        let Operation::ChangeColumn { column, .. } = &delta.operations()[0] else {
            panic!("expected ChangeColumn");
        };
        assert_eq!(column.comment.as_deref(), Some("old"));
        assert!(!column.nullable);
    }

    #[test]
    fn test_bulk_change() {
        let delta = diff(
            r#"
            create_table "users" do |t|
              t.string "name"
            end
            "#,
            r#"
            create_table "users" do |t|
              t.string "name", null: false
              t.string "email"
              t.index ["email"]
            end
            "#,
            DiffOptions::default().with_bulk_change(true),
        )
        .unwrap();
        assert_eq!(delta.operations().len(), 1);
        let Operation::BulkChange { operations, .. } = &delta.operations()[0] else {
            panic!("expected BulkChange");
        };
        assert_eq!(operations.len(), 3);
    }

    #[test]
    fn test_table_options_follow_foreign_keys() {
        let before = r#"
            create_table "users" do |t|
              t.string "name"
            end
            create_table "posts", comment: "old" do |t|
              t.bigint "user_id"
            end
        "#;
        let after = r#"
            create_table "users" do |t|
              t.string "name"
            end
            create_table "posts", comment: "new" do |t|
              t.bigint "user_id"
            end
            add_foreign_key "posts", "users"
        "#;
        for options in [DiffOptions::default(), DiffOptions::default().with_bulk_change(true)] {
            let delta = diff(before, after, options).unwrap();
            let ops = delta.operations();
            assert_eq!(ops.len(), 2);
            assert!(matches!(ops[0], Operation::AddForeignKey { .. }));
            assert!(matches!(ops[1], Operation::ChangeTableOptions { .. }));
        }
    }

    #[test]
    fn test_warnings() {
        let delta = diff(
            r#"
            create_table "users" do |t|
              t.string "a"
              t.string "b"
            end
            "#,
            r#"
            create_table "users" do |t|
              t.string "b"
              t.string "a"
            end
            create_table "posts" do |t|
              t.integer "user_id"
            end
            add_foreign_key "posts", "users"
            "#,
            DiffOptions::default().with_check_relation_type(true),
        )
        .unwrap();
        let warnings: Vec<String> = delta.warnings().iter().map(ToString::to_string).collect();
        assert!(warnings.iter().any(|w| w.contains("column order of 'users'")), "{warnings:?}");
        assert!(warnings.iter().any(|w| w.contains("'users.id'")), "{warnings:?}");
    }

    #[test]
    fn test_renamed_from_unknown_column() {
        let err = diff(
            r#"
            create_table "users" do |t|
              t.string "name"
            end
            "#,
            r#"
            create_table "users" do |t|
              t.string "name"
              t.string "email", renamed_from: "mail"
            end
            "#,
            DiffOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Definition(_)), "{err}");
    }
}
