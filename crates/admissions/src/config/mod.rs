use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::workflows::enrollment::locks::DEFAULT_BULK_STATUS_LIMIT;
use crate::workflows::enrollment::password::DEFAULT_HASH_ROUNDS;
use crate::workflows::enrollment::validation::{
    DEFAULT_MAX_REASON_LENGTH, DEFAULT_MIN_PASSWORD_LENGTH,
};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub processing: ProcessingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = ProcessingConfig::default();
        let processing = ProcessingConfig {
            lock_ttl_secs: at_most(
                "APP_LOCK_TTL_SECS",
                positive("APP_LOCK_TTL_SECS", defaults.lock_ttl_secs)?,
                MAX_LOCK_TTL_SECS,
            )?,
            sweep_interval_secs: positive("APP_LOCK_SWEEP_SECS", defaults.sweep_interval_secs)?,
            bulk_status_limit: positive("APP_LOCK_BULK_LIMIT", defaults.bulk_status_limit)?,
            max_reason_length: positive("APP_REJECTION_REASON_MAX", defaults.max_reason_length)?,
            min_password_length: positive(
                "APP_PASSWORD_MIN_LENGTH",
                defaults.min_password_length,
            )?,
            password_hash_rounds: positive(
                "APP_PASSWORD_HASH_ROUNDS",
                defaults.password_hash_rounds,
            )?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            processing,
        })
    }
}

/// Read a positive integer setting, falling back to `default` when unset.
fn positive<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(ConfigError::InvalidNumber { key, value: raw }),
        },
    }
}

fn at_most(key: &'static str, value: u64, max: u64) -> Result<u64, ConfigError> {
    if value > max {
        return Err(ConfigError::TooLarge { key, value, max });
    }
    Ok(value)
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Longest lock lifetime accepted from configuration (one week).
pub const MAX_LOCK_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Knobs for application processing: lock lifetimes and input limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingConfig {
    pub lock_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub bulk_status_limit: usize,
    pub max_reason_length: usize,
    pub min_password_length: usize,
    pub password_hash_rounds: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 300,
            sweep_interval_secs: 60,
            bulk_status_limit: DEFAULT_BULK_STATUS_LIMIT,
            max_reason_length: DEFAULT_MAX_REASON_LENGTH,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            password_hash_rounds: DEFAULT_HASH_ROUNDS,
        }
    }
}

impl ProcessingConfig {
    /// Lock lifetime, capped at [`MAX_LOCK_TTL_SECS`].
    pub fn lock_ttl(&self) -> chrono::Duration {
        let secs = self.lock_ttl_secs.min(MAX_LOCK_TTL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or_default())
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    TooLarge { key: &'static str, value: u64, max: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer, got '{value}'")
            }
            ConfigError::TooLarge { key, value, max } => {
                write!(f, "{key} must be at most {max}, got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::TooLarge { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
