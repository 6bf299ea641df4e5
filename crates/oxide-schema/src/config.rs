//! Connection configuration.
//!
//! A configuration is given either inline as JSON, as a path to a
//! `.json`, `.yml` or `.yaml` file, or directly as a database URL.
//! Documents may hold one section per environment, selected with `--env`.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while loading a connection configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Environment '{0}' not found in config")]
    UnknownEnvironment(String),

    #[error("Unsupported adapter '{0}'")]
    UnsupportedAdapter(String),

    #[error("Config needs either 'url' or 'adapter' and 'database'")]
    Incomplete,
}

/// Connection settings, as written in a configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: Option<String>,
    pub adapter: Option<String>,
    pub database: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Builds the sqlx connection URL.
    pub fn url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let (Some(adapter), Some(database)) = (&self.adapter, &self.database) else {
            return Err(ConfigError::Incomplete);
        };
        match adapter.as_str() {
            "sqlite" | "sqlite3" => Ok(format!("sqlite:{database}")),
            "mysql" | "mysql2" | "trilogy" => {
                let mut url = String::from("mysql://");
                if let Some(username) = &self.username {
                    url.push_str(username);
                    if let Some(password) = &self.password {
                        url.push(':');
                        url.push_str(password);
                    }
                    url.push('@');
                }
                url.push_str(self.host.as_deref().unwrap_or("localhost"));
                if let Some(port) = self.port {
                    url.push_str(&format!(":{port}"));
                }
                url.push('/');
                url.push_str(database);
                Ok(url)
            }
            other => Err(ConfigError::UnsupportedAdapter(other.to_string())),
        }
    }
}

/// Whether `source` names a database rather than a definition file.
pub fn is_connection_source(source: &str) -> bool {
    let trimmed = source.trim_start();
    trimmed.starts_with('{') || is_url(trimmed) || Format::of_path(source).is_some()
}

fn is_url(source: &str) -> bool {
    source.starts_with("sqlite:") || source.starts_with("mysql:")
}

/// Syntax of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Guesses the format from a file extension.
    #[must_use]
    pub fn of_path(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Loads a configuration from inline JSON, a JSON or YAML file, or a URL.
pub fn load(source: &str, env: Option<&str>) -> Result<ConnectionConfig, ConfigError> {
    let trimmed = source.trim();
    if is_url(trimmed) {
        return Ok(ConnectionConfig {
            url: Some(trimmed.to_string()),
            ..ConnectionConfig::default()
        });
    }

    if trimmed.starts_with('{') {
        return parse(trimmed, env);
    }
    let text = fs::read_to_string(source).map_err(|source_err| ConfigError::Io {
        path: source.to_string(),
        source: source_err,
    })?;
    match Format::of_path(source) {
        Some(Format::Yaml) => parse_yaml(&text, env),
        _ => parse(&text, env),
    }
}

/// Parses a JSON configuration document.
pub fn parse(text: &str, env: Option<&str>) -> Result<ConnectionConfig, ConfigError> {
    select(serde_json::from_str(text)?, env)
}

/// Parses a YAML configuration document.
pub fn parse_yaml(text: &str, env: Option<&str>) -> Result<ConnectionConfig, ConfigError> {
    select(serde_yaml::from_str(text)?, env)
}

fn select(mut document: Value, env: Option<&str>) -> Result<ConnectionConfig, ConfigError> {
    if let Some(env) = env {
        document = match document.get_mut(env) {
            Some(section) => section.take(),
            None => return Err(ConfigError::UnknownEnvironment(env.to_string())),
        };
    }
    Ok(serde_json::from_value(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_passthrough() {
        let config = load("sqlite::memory:", None).unwrap();
        assert_eq!(config.url().unwrap(), "sqlite::memory:");
    }

    #[test]
    fn test_inline_json() {
        let config = load(r#"{"adapter": "sqlite3", "database": "db.sqlite3"}"#, None).unwrap();
        assert_eq!(config.url().unwrap(), "sqlite:db.sqlite3");
    }

    #[test]
    fn test_mysql_url() {
        let config = parse(
            r#"{"adapter": "mysql2", "database": "app", "host": "db", "port": 3307,
                "username": "root", "password": "secret"}"#,
            None,
        )
        .unwrap();
        assert_eq!(config.url().unwrap(), "mysql://root:secret@db:3307/app");
    }

    #[test]
    fn test_environment_section() {
        let text = r#"{
            "development": {"url": "sqlite:dev.sqlite3"},
            "production": {"url": "mysql://prod/app"}
        }"#;
        let config = parse(text, Some("production")).unwrap();
        assert_eq!(config.url().unwrap(), "mysql://prod/app");
        assert!(matches!(
            parse(text, Some("staging")),
            Err(ConfigError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn test_incomplete_and_unsupported() {
        assert!(matches!(
            parse(r#"{"adapter": "mysql2"}"#, None).unwrap().url(),
            Err(ConfigError::Incomplete)
        ));
        assert!(matches!(
            parse(r#"{"adapter": "oracle", "database": "x"}"#, None)
                .unwrap()
                .url(),
            Err(ConfigError::UnsupportedAdapter(_))
        ));
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json");
        fs::write(&path, r#"{"test": {"adapter": "sqlite", "database": "t.db"}}"#).unwrap();
        let source = path.to_str().unwrap();
        assert!(is_connection_source(source));
        let config = load(source, Some("test")).unwrap();
        assert_eq!(config.url().unwrap(), "sqlite:t.db");
    }

    #[test]
    fn test_yaml_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.yml");
        fs::write(
            &path,
            "development:\n  adapter: sqlite3\n  database: dev.db\n\
             production:\n  adapter: mysql2\n  database: app\n  host: db\n  port: 3306\n",
        )
        .unwrap();
        let source = path.to_str().unwrap();
        assert!(is_connection_source(source));
        assert_eq!(load(source, Some("development")).unwrap().url().unwrap(), "sqlite:dev.db");
        assert_eq!(
            load(source, Some("production")).unwrap().url().unwrap(),
            "mysql://db:3306/app"
        );
        assert!(matches!(
            load(source, Some("staging")),
            Err(ConfigError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::of_path("config/database.YAML"), Some(Format::Yaml));
        assert_eq!(Format::of_path("database.json"), Some(Format::Json));
        assert_eq!(Format::of_path("Schemafile"), None);
        assert!(matches!(parse_yaml("url: [", None), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_definition_files_are_not_connections() {
        assert!(!is_connection_source("Schemafile"));
        assert!(!is_connection_source("db/users.schema"));
    }
}
