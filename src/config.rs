//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use chrono::FixedOffset;

/// Default primary BCV rate source
const DEFAULT_BCV_PRIMARY_URL: &str = "https://pydolarve.org/api/v1/dollar?page=bcv";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Bank API credentials and endpoints
    pub bnc: BncConfig,

    /// Primary BCV rate endpoint
    pub bcv_primary_url: String,

    /// How long a fetched rate stays cached
    pub rate_cache_ttl: Duration,

    /// Local offset used for daily key scope and bank references
    pub utc_offset: FixedOffset,
}

/// BNC API settings. The master key and GUID are secrets.
#[derive(Clone)]
pub struct BncConfig {
    /// Base URL, always ending in `/`
    pub base_url: String,
    pub client_guid: String,
    pub client_id: String,
    pub master_key: String,
    /// Default account for history and reference validation
    pub account_number: Option<String>,
}

impl std::fmt::Debug for BncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BncConfig")
            .field("base_url", &self.base_url)
            .field("client_guid", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("master_key", &"[REDACTED]")
            .field("account_number", &self.account_number)
            .finish()
    }
}

impl BncConfig {
    pub fn new(
        base_url: impl Into<String>,
        client_guid: impl Into<String>,
        client_id: impl Into<String>,
        master_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            client_guid: client_guid.into(),
            client_id: client_id.into(),
            master_key: master_key.into(),
            account_number: None,
        }
    }

    pub fn with_account_number(mut self, account_number: impl Into<String>) -> Self {
        self.account_number = Some(account_number.into());
        self
    }

    /// Full URL for a bank endpoint such as `Services/Banks`
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

fn normalize_base_url(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut bnc = BncConfig::new(
            required("BNC_BASE_URL")?,
            required("BNC_CLIENT_GUID")?,
            required("BNC_CLIENT_ID")?,
            required("BNC_MASTER_KEY")?,
        );
        if let Ok(account) = env::var("BNC_ACCOUNT_NUMBER") {
            if !account.trim().is_empty() {
                bnc = bnc.with_account_number(account.trim());
            }
        }

        let bcv_primary_url =
            env::var("BCV_PRIMARY_URL").unwrap_or_else(|_| DEFAULT_BCV_PRIMARY_URL.to_string());

        let rate_cache_ttl_secs: u64 = env::var("RATE_CACHE_TTL_SECS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RATE_CACHE_TTL_SECS"))?;

        let offset_hours: i32 = env::var("APP_UTC_OFFSET_HOURS")
            .unwrap_or_else(|_| "-4".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("APP_UTC_OFFSET_HOURS"))?;
        let utc_offset = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or(ConfigError::InvalidValue("APP_UTC_OFFSET_HOURS"))?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            bnc,
            bcv_primary_url,
            rate_cache_ttl: Duration::from_secs(rate_cache_ttl_secs),
            utc_offset,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
