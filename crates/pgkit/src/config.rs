//! Client configuration.
//!
//! All structs implement `Default` and `serde::Deserialize`, so a
//! configuration can be built in code with the builder-style setters or
//! loaded from a JSON/TOML document by the caller.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::retry::RetryPolicy;
use crate::{PgKitError, Result};

// ============================================================================
// Log Level
// ============================================================================

/// Verbosity of the client's own advisory messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Silent,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Returns true if messages at `level` should be emitted.
    pub fn allows(self, level: LogLevel) -> bool {
        level != LogLevel::Silent && self >= level
    }
}

impl FromStr for LogLevel {
    type Err = PgKitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(PgKitError::Configuration(format!(
                "Invalid log level '{}': expected silent, error, warn, info or debug",
                other
            ))),
        }
    }
}

// ============================================================================
// SSL
// ============================================================================

/// SSL negotiation mode, mirroring libpq's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn to_pg(self) -> sqlx::postgres::PgSslMode {
        use sqlx::postgres::PgSslMode;
        match self {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Allow => PgSslMode::Allow,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

impl FromStr for SslMode {
    type Err = PgKitError;

    /// Accepts libpq mode names as well as boolean-ish values (`true` = require).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" | "false" | "0" | "off" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "true" | "1" | "on" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(PgKitError::Configuration(format!(
                "Invalid SSL mode '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Connection Settings
// ============================================================================

/// Connection endpoint: either a URL or discrete fields.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<SslMode>,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssl", &self.ssl)
            .finish()
    }
}

impl ConnectionSettings {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Returns true if the settings name a reachable endpoint.
    pub fn is_complete(&self) -> bool {
        self.url.is_some() || (self.host.is_some() && self.database.is_some())
    }
}

/// AWS DSQL sub-configuration.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AwsDsqlConfig {
    /// Cluster endpoint hostname
    pub hostname: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Resolve credentials from the default provider chain
    pub use_default_credentials: bool,
    /// Requested token lifetime in seconds (default 604800)
    pub token_expires_in: Option<u64>,
    /// Database user (default `admin`)
    pub user: Option<String>,
    /// Database name (default `postgres`)
    pub database: Option<String>,
    pub ssl: Option<SslMode>,
}

impl fmt::Debug for AwsDsqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsDsqlConfig")
            .field("hostname", &self.hostname)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("use_default_credentials", &self.use_default_credentials)
            .field("token_expires_in", &self.token_expires_in)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("ssl", &self.ssl)
            .finish()
    }
}

impl AwsDsqlConfig {
    pub fn new(hostname: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            region: Some(region.into()),
            ..Default::default()
        }
    }

    pub fn credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn token_expires_in(mut self, seconds: u64) -> Self {
        self.token_expires_in = Some(seconds);
        self
    }

    /// True when both hostname and region are present (the AWS path is taken).
    pub fn is_configured(&self) -> bool {
        self.hostname.is_some() && self.region.is_some()
    }

    pub fn user_or_default(&self) -> &str {
        self.user.as_deref().unwrap_or("admin")
    }

    pub fn database_or_default(&self) -> &str {
        self.database.as_deref().unwrap_or("postgres")
    }
}

// ============================================================================
// Pool Settings
// ============================================================================

/// User-provided pool parameters. `None` fields take the smart defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub idle_timeout_ms: Option<u64>,
    pub connection_timeout_ms: Option<u64>,
    pub application_name: Option<String>,
    pub ssl: Option<SslMode>,
    /// Skip environment-derived defaults and validation
    pub disable_smart_defaults: bool,
}

impl PoolSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min(mut self, min: u32) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: u32) -> Self {
        self.max = Some(max);
        self
    }

    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = Some(ms);
        self
    }

    pub fn connection_timeout_ms(mut self, ms: u64) -> Self {
        self.connection_timeout_ms = Some(ms);
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

// ============================================================================
// Validation Policy
// ============================================================================

/// What to do when row validation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnValidationError {
    /// Fail the operation with one aggregated error
    #[default]
    Throw,
    /// Emit a warning and continue
    Warn,
    /// Emit an informational log line and continue
    Log,
}

/// Validation applied before mutating SQL is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub enabled: bool,
    pub validate_length: bool,
    pub validate_types: bool,
    pub on_error: OnValidationError,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            validate_length: true,
            validate_types: true,
            on_error: OnValidationError::Throw,
        }
    }
}

impl ValidationPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

// ============================================================================
// Client Configuration
// ============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionSettings,
    pub aws: Option<AwsDsqlConfig>,
    /// `Some(false)` forces single-connection mode
    pub pooling: Option<bool>,
    pub pool: PoolSettings,
    /// `None` disables retries
    pub retry: Option<RetryPolicy>,
    pub log_level: LogLevel,
    pub validation: ValidationPolicy,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration pointing at a connection URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionSettings::from_url(url),
            ..Default::default()
        }
    }

    pub fn connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    pub fn aws(mut self, aws: AwsDsqlConfig) -> Self {
        self.aws = Some(aws);
        self
    }

    pub fn pooling(mut self, pooling: bool) -> Self {
        self.pooling = Some(pooling);
        self
    }

    pub fn pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retry = None;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn validation(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }

    /// True when the AWS DSQL credential path applies.
    pub fn uses_aws(&self) -> bool {
        self.aws.as_ref().map(AwsDsqlConfig::is_configured).unwrap_or(false)
    }

    /// Pooling is on unless explicitly disabled.
    pub fn pooling_enabled(&self) -> bool {
        self.pooling.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_allows() {
        assert!(LogLevel::Warn.allows(LogLevel::Error));
        assert!(LogLevel::Warn.allows(LogLevel::Warn));
        assert!(!LogLevel::Warn.allows(LogLevel::Info));
        assert!(!LogLevel::Silent.allows(LogLevel::Error));
        assert!(LogLevel::Debug.allows(LogLevel::Info));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_ssl_mode_parse() {
        assert_eq!("require".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("true".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("verify-full".parse::<SslMode>().unwrap(), SslMode::VerifyFull);
        assert_eq!("disable".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert!("sometimes".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_pooling_default_on() {
        assert!(ClientConfig::new().pooling_enabled());
        assert!(!ClientConfig::new().pooling(false).pooling_enabled());
    }

    #[test]
    fn test_uses_aws_requires_hostname_and_region() {
        assert!(!ClientConfig::new().uses_aws());
        let partial = AwsDsqlConfig {
            hostname: Some("h".into()),
            ..Default::default()
        };
        assert!(!ClientConfig::new().aws(partial).uses_aws());
        assert!(ClientConfig::new().aws(AwsDsqlConfig::new("h", "r")).uses_aws());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = ConnectionSettings {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let aws = AwsDsqlConfig::new("h", "r").credentials("AKID", "SECRET");
        assert!(!format!("{:?}", settings).contains("hunter2"));
        assert!(!format!("{:?}", aws).contains("SECRET"));
    }

    #[test]
    fn test_deserialize_config() {
        let config: ClientConfig = serde_json::from_str(
            r#"{
                "connection": {"url": "postgres://localhost/app"},
                "pooling": false,
                "retry": {"max_retries": 2},
                "log_level": "debug",
                "validation": {"on_error": "warn"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.connection.url.as_deref(), Some("postgres://localhost/app"));
        assert!(!config.pooling_enabled());
        assert_eq!(config.retry.unwrap().max_retries, 2);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.validation.on_error, OnValidationError::Warn);
        assert!(config.validation.enabled);
    }
}
