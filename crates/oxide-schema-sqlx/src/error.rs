//! Adapter errors.

/// Errors raised while talking to a database.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Database error from the driver.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The URL names no supported database.
    #[error("Unsupported database URL '{0}'")]
    UnsupportedUrl(String),

    /// The MySQL connection has no default database.
    #[error("No database selected; add one to the connection URL")]
    NoDatabase,

    /// The catalog holds something the engine cannot represent.
    #[error("Cannot read table '{table}': {message}")]
    Catalog { table: String, message: String },

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;
