#![allow(dead_code)]

use std::sync::Mutex;

use oxide_schema_core::adapter::Adapter;
use oxide_schema_core::dialect::Dialect;
use oxide_schema_core::introspect::{RawCatalog, TableFilter};
use oxide_schema_core::prelude::*;

pub fn parse(source: &str) -> Schema {
    Parser::default()
        .parse_str(source)
        .unwrap_or_else(|e| panic!("Failed to parse:\n{source}\nError: {e}"))
}

pub fn diff(before: &str, after: &str) -> Delta {
    diff_with(before, after, DiffOptions::default())
}

pub fn diff_with(before: &str, after: &str, options: DiffOptions) -> Delta {
    Differ::new(options)
        .diff(&parse(before), &parse(after))
        .unwrap_or_else(|e| panic!("Failed to diff: {e}"))
}

pub fn descriptions(delta: &Delta) -> Vec<String> {
    delta.operations().iter().map(Operation::description).collect()
}

/// Replays the delta on `before` and checks nothing is left to do.
pub fn assert_converges(before: &str, after: &str, options: DiffOptions) {
    let current = parse(before);
    let desired = parse(after);
    let differ = Differ::new(options);
    let delta = differ.diff(&current, &desired).unwrap();

    let mut state = SchemaState::from(current);
    state
        .apply_all(delta.operations())
        .unwrap_or_else(|e| panic!("Replay failed: {e}\n{}", delta.script()));
    let again = differ.diff(state.schema(), &desired).unwrap();
    assert!(
        !again.differ(),
        "Delta did not converge:\n{}\nremaining:\n{}",
        delta.script(),
        again.script()
    );
}

#[derive(Debug, thiserror::Error)]
#[error("statement rejected: {0}")]
pub struct Rejected(pub String);

/// Adapter that serves a fixed catalog and records statements.
pub struct RecordingAdapter<D> {
    dialect: D,
    catalog: RawCatalog,
    fail_on: Option<String>,
    executed: Mutex<Vec<String>>,
}

impl<D: Dialect> RecordingAdapter<D> {
    pub fn new(dialect: D) -> Self {
        Self {
            dialect,
            catalog: RawCatalog::default(),
            fail_on: None,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_catalog(mut self, catalog: RawCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Rejects the first statement containing `fragment`.
    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on = Some(fragment.to_string());
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl<D: Dialect> Adapter for RecordingAdapter<D> {
    type Dialect = D;
    type Error = Rejected;

    fn dialect(&self) -> &D {
        &self.dialect
    }

    async fn catalog(&self, _filter: &TableFilter) -> std::result::Result<RawCatalog, Rejected> {
        Ok(self.catalog.clone())
    }

    async fn execute(&self, statement: &str) -> std::result::Result<(), Rejected> {
        if let Some(fragment) = &self.fail_on {
            if statement.contains(fragment.as_str()) {
                return Err(Rejected(statement.to_string()));
            }
        }
        self.executed.lock().unwrap().push(statement.to_string());
        Ok(())
    }
}
