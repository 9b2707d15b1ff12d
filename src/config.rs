//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::filter::TableFilterRule;
use crate::snapshot::DEFAULT_LIST_LIMIT;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// Connection settings for the database being crawled
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

/// Snapshot capture and storage settings
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub crawl_schema: String,
    pub store_path: PathBuf,
    pub list_limit: usize,
    pub filter: TableFilterRule,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            crawl_schema: "public".to_string(),
            store_path: PathBuf::from("data/schema_metadata.db"),
            list_limit: DEFAULT_LIST_LIMIT,
            filter: TableFilterRule::default(),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    /// `None` when no source database is configured; captures are then rejected
    pub source: Option<SourceConfig>,
    pub snapshots: SnapshotConfig,
    pub cors: CorsConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerConfig {
            host: lookup("HOST")
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().port),
        };

        let max_pool_size = lookup("DB_MAX_CONNECTIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        // SOURCE_DATABASE_URL wins over the generic DATABASE_URL
        let source = match lookup("SOURCE_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            Some(url) if !url.trim().is_empty() => Some(Self::parse_database_url(&url, max_pool_size)?),
            _ => None,
        };

        let defaults = SnapshotConfig::default();
        let list_limit = match lookup("SNAPSHOT_LIST_LIMIT") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue(format!(
                        "SNAPSHOT_LIST_LIMIT must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
            None => defaults.list_limit,
        };

        let case_sensitive = match lookup("FILTER_CASE_SENSITIVE") {
            Some(raw) => parse_bool("FILTER_CASE_SENSITIVE", &raw)?,
            None => false,
        };

        let filter = TableFilterRule {
            include_names: split_list(lookup("INCLUDE_TABLES")).into_iter().collect(),
            exclude_names: split_list(lookup("EXCLUDE_TABLES")).into_iter().collect(),
            include_patterns: split_list(lookup("INCLUDE_PATTERNS")),
            exclude_patterns: split_list(lookup("EXCLUDE_PATTERNS")),
            case_sensitive,
        };

        let snapshots = SnapshotConfig {
            crawl_schema: lookup("CRAWL_SCHEMA")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.crawl_schema),
            store_path: lookup("STORE_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            list_limit,
            filter,
        };

        let cors = CorsConfig {
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|s| split_list(Some(s)))
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        Ok(Self {
            server,
            source,
            snapshots,
            cors,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str, max_pool_size: usize) -> Result<SourceConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue("Invalid DATABASE_URL format (expected postgresql://...)".to_string())
        })?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(ConfigError::InvalidValue(format!(
                "Unsupported DATABASE_URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let require_tls = parsed
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && matches!(v.as_ref(), "require" | "verify-ca" | "verify-full"));

        Ok(SourceConfig {
            host,
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database,
            max_pool_size,
            require_tls,
        })
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .map(|item| item.to_string())
            .collect()
    })
    .unwrap_or_default()
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}
