//! Computed deltas.
//!
//! A [`Delta`] is the ordered result of diffing two schemas. It can be
//! inspected, rendered as a definition script, translated to SQL for a
//! dialect, or applied through an [`Adapter`].

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::dialect::{Dialect, StatementContext};
use crate::diff::DiffWarning;
use crate::dsl::render_operations;
use crate::error::{ApplyError, BoxError, Result};
use crate::operation::Operation;
use crate::schema::Schema;
use crate::state::SchemaState;

/// An operation together with the SQL that carries it out.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStatement {
    pub operation: Operation,
    pub statements: Vec<String>,
}

/// Outcome of a successful migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Operations applied.
    pub applied: usize,
    /// Statements executed.
    pub statements: usize,
}

/// Ordered operations turning one schema into another.
#[derive(Debug, Clone)]
pub struct Delta {
    operations: Vec<Operation>,
    warnings: Vec<DiffWarning>,
    /// Structure the operations start from.
    before: Schema,
    alter_extras: BTreeMap<String, String>,
}

impl Delta {
    pub(crate) fn new(
        operations: Vec<Operation>,
        warnings: Vec<DiffWarning>,
        before: Schema,
        alter_extras: BTreeMap<String, String>,
    ) -> Self {
        Self {
            operations,
            warnings,
            before,
            alter_extras,
        }
    }

    /// Returns `true` when at least one operation is pending.
    #[must_use]
    pub fn differ(&self) -> bool {
        !self.operations.is_empty()
    }

    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    #[must_use]
    pub fn warnings(&self) -> &[DiffWarning] {
        &self.warnings
    }

    /// Renders the operations in the definition language.
    #[must_use]
    pub fn script(&self) -> String {
        render_operations(&self.operations)
    }

    /// Like [`Delta::script`], with every line commented out.
    #[must_use]
    pub fn script_commented(&self) -> String {
        self.script()
            .lines()
            .map(|line| {
                if line.is_empty() {
                    "#\n".to_string()
                } else {
                    format!("# {line}\n")
                }
            })
            .collect()
    }

    /// Translates every operation to SQL, in execution order.
    pub fn sql<D: Dialect + ?Sized>(&self, dialect: &D) -> Result<Vec<PlannedStatement>> {
        let mut state = SchemaState::from(self.before.clone());
        self.operations
            .iter()
            .map(|operation| {
                Ok(PlannedStatement {
                    operation: operation.clone(),
                    statements: self.plan(&mut state, dialect, operation)?,
                })
            })
            .collect()
    }

    /// Executes the delta one statement at a time.
    ///
    /// Stops at the first failure. Operations completed before it stay
    /// applied and are counted in the returned error.
    pub async fn migrate<A: Adapter>(
        &self,
        adapter: &A,
    ) -> std::result::Result<MigrationReport, ApplyError> {
        let mut state = SchemaState::from(self.before.clone());
        let mut report = MigrationReport::default();

        for (index, operation) in self.operations.iter().enumerate() {
            let fail = |source: BoxError, statement: Option<String>| ApplyError {
                operation: operation.description(),
                index,
                applied: index,
                statement,
                source,
            };
            let statements = self
                .plan(&mut state, adapter.dialect(), operation)
                .map_err(|e| fail(Box::new(e), None))?;

            info!(operation = %operation.description(), "applying");
            for statement in &statements {
                debug!(%statement, "executing");
                adapter
                    .execute(statement)
                    .await
                    .map_err(|e| fail(Box::new(e), Some(statement.clone())))?;
            }
            report.applied += 1;
            report.statements += statements.len();
        }

        info!(
            applied = report.applied,
            statements = report.statements,
            "migration complete"
        );
        Ok(report)
    }

    /// Generates the statements for one operation and advances `state`.
    fn plan<D: Dialect + ?Sized>(
        &self,
        state: &mut SchemaState,
        dialect: &D,
        operation: &Operation,
    ) -> Result<Vec<String>> {
        let mut next = state.clone();
        next.apply_operation(operation)?;
        let ctx = StatementContext {
            before: state.schema(),
            after: next.schema(),
            alter_extra: self
                .alter_extras
                .get(operation.table_name())
                .map(String::as_str),
        };
        let statements = dialect.statements(operation, &ctx)?;
        *state = next;
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, SqliteDialect};
    use crate::diff::Differ;
    use crate::dsl::Parser;
    use crate::options::DiffOptions;

    fn delta(before: &str, after: &str) -> Delta {
        let parser = Parser::default();
        Differ::new(DiffOptions::default())
            .diff(
                &parser.parse_str(before).unwrap(),
                &parser.parse_str(after).unwrap(),
            )
            .unwrap()
    }

    const USERS: &str = r#"
        create_table "users" do |t|
          t.string "name"
        end
    "#;

    const USERS_WITH_EMAIL: &str = r#"
        create_table "users" do |t|
          t.string "name"
          t.string "email", null: false, default: ""
        end
    "#;

    #[test]
    fn test_script() {
        let delta = delta(USERS, USERS_WITH_EMAIL);
        assert!(delta.script().contains("add_column \"users\", \"email\""));
        let commented = delta.script_commented();
        assert!(commented.lines().all(|l| l.starts_with('#')));
    }

    #[test]
    fn test_empty_delta() {
        let delta = delta(USERS, USERS);
        assert!(!delta.differ());
        assert_eq!(delta.script(), "");
        assert!(delta.sql(&MySqlDialect::new()).unwrap().is_empty());
    }

    #[test]
    fn test_sql_per_dialect() {
        let delta = delta(USERS, USERS_WITH_EMAIL);

        let mysql = delta.sql(&MySqlDialect::new()).unwrap();
        assert_eq!(mysql.len(), delta.operations().len());
        assert!(mysql[0].statements[0].starts_with("ALTER TABLE `users` ADD COLUMN `email`"));

        let sqlite = delta.sql(&SqliteDialect::new()).unwrap();
        assert!(sqlite[0].statements[0].starts_with("ALTER TABLE \"users\" ADD COLUMN \"email\""));
    }

    #[test]
    fn test_sql_reports_unsupported_operations() {
        let delta = delta(
            r#"
            create_table "t" do |t|
              t.string "kind"
            end
            "#,
            r#"
            create_table "t" do |t|
              t.string "kind"
              t.index ["kind"], type: :fulltext
            end
            "#,
        );
        assert!(delta.sql(&SqliteDialect::new()).is_err());
        assert!(delta.sql(&MySqlDialect::new()).is_ok());
    }
}
