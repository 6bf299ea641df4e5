//! Database adapter capability.
//!
//! The engine never opens a connection itself. Introspection and
//! migration are handed an adapter explicitly.

use crate::dialect::Dialect;
use crate::introspect::{RawCatalog, TableFilter};

/// A live database the engine can read from and apply statements to.
#[allow(async_fn_in_trait)]
pub trait Adapter {
    type Dialect: Dialect;
    type Error: std::error::Error + Send + Sync + 'static;

    /// The SQL dialect spoken by this database.
    fn dialect(&self) -> &Self::Dialect;

    /// Reads the raw catalog for the tables accepted by `filter`.
    async fn catalog(&self, filter: &TableFilter) -> Result<RawCatalog, Self::Error>;

    /// Executes a single statement.
    async fn execute(&self, statement: &str) -> Result<(), Self::Error>;
}
