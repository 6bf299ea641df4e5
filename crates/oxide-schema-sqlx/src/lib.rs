//! sqlx adapters for `oxide-schema-core`.
//!
//! [`SqliteAdapter`] and [`MySqlAdapter`] read the database catalog and
//! execute generated statements over a single pooled connection, so
//! session settings such as `PRAGMA foreign_keys` persist across the
//! statements of a migration.

pub mod error;
mod mysql;
mod sqlite;

pub use error::{AdapterError, Result};
pub use mysql::MySqlAdapter;
pub use sqlite::SqliteAdapter;

/// Database family named by a connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    MySql,
}

impl Backend {
    /// Picks the backend from the URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("mysql:") {
            Ok(Self::MySql)
        } else {
            Err(AdapterError::UnsupportedUrl(url.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("sqlite://app.db").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_url("mysql://root@localhost/app").unwrap(),
            Backend::MySql
        );
        assert!(matches!(
            Backend::from_url("postgres://localhost/app"),
            Err(AdapterError::UnsupportedUrl(_))
        ));
    }
}
