//! Configuration management for the carton ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with LEDGER__ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    pub server: ServerConfig,

    pub database: DatabaseConfig,

    pub storage: StorageConfig,

    /// JWT operator identity configuration
    pub jwt: JwtConfig,

    pub barcode: BarcodeConfig,

    pub stocktake: StocktakeConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// HS256 secret shared with the identity provider
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BarcodeConfig {
    /// First segment of every generated barcode
    pub prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StocktakeConfig {
    /// Missing cartons written off in parallel during auto-adjust
    pub auto_adjust_concurrency: usize,

    /// Scans returned by the session scan list when no limit is given
    pub default_scan_limit: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "postgres://localhost/carton_ledger")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("storage.backend", "postgres")?
            .set_default("barcode.prefix", shared::barcode::DEFAULT_PREFIX)?
            .set_default("stocktake.auto_adjust_concurrency", 8)?
            .set_default("stocktake.default_scan_limit", 50)?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::Message("jwt.secret must be set".into()));
        }
        if self.barcode.prefix.is_empty() || self.barcode.prefix.contains('-') {
            return Err(ConfigError::Message(
                "barcode.prefix must be non-empty and contain no '-'".into(),
            ));
        }
        if self.stocktake.auto_adjust_concurrency == 0 {
            return Err(ConfigError::Message(
                "stocktake.auto_adjust_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// In-memory configuration for tests and local runs
    pub fn for_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            environment: "test".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 0,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
            },
            jwt: JwtConfig {
                secret: jwt_secret.into(),
            },
            barcode: BarcodeConfig {
                prefix: shared::barcode::DEFAULT_PREFIX.to_string(),
            },
            stocktake: StocktakeConfig {
                auto_adjust_concurrency: 4,
                default_scan_limit: 50,
            },
            logging: LoggingConfig {
                format: LogFormat::Pretty,
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}
