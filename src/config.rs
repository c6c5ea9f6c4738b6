//! Configuration Module
//!
//! Handles configuration loading from a YAML file, environment variables, and
//! command-line arguments. All components receive their configuration by
//! injection; nothing reads ambient globals after startup.

use crate::{ProxyError, Result};
use clap::{Arg, Command};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Custom deserializer for Duration from string format like "30s", "5m", "12h"
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty duration string".to_string());
        }

        let num_end = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        if num_end == 0 {
            return Err(format!("No number found in duration string: {}", s));
        }

        let value: f64 = s[..num_end]
            .parse()
            .map_err(|e| format!("Failed to parse number '{}': {}", &s[..num_end], e))?;

        let duration = match s[num_end..].trim() {
            "" | "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs_f64(value),
            "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs_f64(value * 60.0),
            "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs_f64(value * 3600.0),
            "d" | "day" | "days" => Duration::from_secs_f64(value * 86400.0),
            "ms" | "millis" | "millisecond" | "milliseconds" => {
                Duration::from_secs_f64(value / 1000.0)
            }
            unit => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(duration)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_concurrent_requests: usize,
    #[serde(deserialize_with = "duration_serde::deserialize")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            max_concurrent_requests: 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Primary object store configuration
///
/// The authorize endpoint and credentials come from the deployment
/// environment; `base_url` is the public read URL for the bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryStoreConfig {
    pub bucket_id: String,
    pub key_id: String,
    pub application_key: String,
    pub base_url: String,
    pub authorize_url: String,
    #[serde(deserialize_with = "duration_serde::deserialize")]
    pub session_ttl: Duration,
    pub session_cache_key: String,
}

impl Default for PrimaryStoreConfig {
    fn default() -> Self {
        Self {
            bucket_id: String::new(),
            key_id: String::new(),
            application_key: String::new(),
            base_url: String::new(),
            authorize_url: String::new(),
            session_ttl: Duration::from_secs(3600 * 12),
            session_cache_key: "session".to_string(),
        }
    }
}

/// Backup origin consulted when the primary store lacks an object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecondaryConfig {
    pub base_url: String,
}

/// Edge-cache-affinity hint attached to upstream fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCacheConfig {
    #[serde(deserialize_with = "duration_serde::deserialize")]
    pub ttl: Duration,
}

impl Default for EdgeCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(14400),
        }
    }
}

/// Cache-Control policy applied to every outgoing response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    #[serde(deserialize_with = "duration_serde::deserialize")]
    pub max_age: Duration,
    #[serde(deserialize_with = "duration_serde::deserialize")]
    pub stale_while_revalidate: Duration,
    #[serde(deserialize_with = "duration_serde::deserialize")]
    pub stale_if_error: Duration,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600),
            stale_while_revalidate: Duration::from_secs(3600),
            stale_if_error: Duration::from_secs(86400),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub primary: PrimaryStoreConfig,
    #[serde(default)]
    pub secondary: SecondaryConfig,
    #[serde(default)]
    pub edge_cache: EdgeCacheConfig,
    #[serde(default)]
    pub response_cache: ResponseCacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Ok(port) = std::env::var("HTTP_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid HTTP_PORT value: {}", port),
            }
        }
        if let Ok(max) = std::env::var("MAX_CONCURRENT_REQUESTS") {
            match max.parse() {
                Ok(max) => self.server.max_concurrent_requests = max,
                Err(_) => warn!("Ignoring invalid MAX_CONCURRENT_REQUESTS value: {}", max),
            }
        }
        if let Ok(bucket_id) = std::env::var("BUCKET_ID") {
            self.primary.bucket_id = bucket_id;
        }
        if let Ok(key_id) = std::env::var("KEY_ID") {
            self.primary.key_id = key_id;
        }
        if let Ok(app_key) = std::env::var("APP_KEY") {
            self.primary.application_key = app_key;
        }
        if let Ok(bucket_url) = std::env::var("BUCKET_URL") {
            self.primary.base_url = bucket_url;
        }
        if let Ok(authorize_url) = std::env::var("AUTHORIZE_URL") {
            self.primary.authorize_url = authorize_url;
        }
        if let Ok(ttl) = std::env::var("SESSION_TTL") {
            match duration_serde::parse_duration(&ttl) {
                Ok(ttl) => self.primary.session_ttl = ttl,
                Err(e) => warn!("Ignoring invalid SESSION_TTL value: {}", e),
            }
        }
        if let Ok(backup_url) = std::env::var("BACKUP_URL") {
            self.secondary.base_url = backup_url;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(log_dir) = std::env::var("LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(log_dir));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("primary.bucket_id / BUCKET_ID", &self.primary.bucket_id),
            ("primary.key_id / KEY_ID", &self.primary.key_id),
            (
                "primary.application_key / APP_KEY",
                &self.primary.application_key,
            ),
            ("primary.base_url / BUCKET_URL", &self.primary.base_url),
            (
                "primary.authorize_url / AUTHORIZE_URL",
                &self.primary.authorize_url,
            ),
            ("secondary.base_url / BACKUP_URL", &self.secondary.base_url),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(ProxyError::ConfigError(format!("{} must be set", name)));
            }
        }

        if self.server.max_concurrent_requests == 0 {
            return Err(ProxyError::ConfigError(
                "server.max_concurrent_requests must be greater than zero".to_string(),
            ));
        }
        if self.primary.session_ttl.as_secs() == 0 {
            return Err(ProxyError::ConfigError(
                "primary.session_ttl must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load configuration from command-line arguments, config file, and environment
pub fn load_config() -> Result<Config> {
    let matches = Command::new("fallback-proxy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Read-through object storage proxy with backup-origin fallback and self-healing")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to YAML configuration file"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("HTTP listen port (overrides config file and HTTP_PORT)"),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    config.apply_env_overrides();

    if let Some(port) = matches.get_one::<String>("port") {
        config.server.port = port
            .parse()
            .map_err(|_| ProxyError::ConfigError(format!("Invalid port: {}", port)))?;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.primary.bucket_id = "bucket".to_string();
        config.primary.key_id = "key".to_string();
        config.primary.application_key = "secret".to_string();
        config.primary.base_url = "https://files.example.com".to_string();
        config.primary.authorize_url = "https://api.example.com/authorize_account".to_string();
        config.secondary.base_url = "https://backup.example.com".to_string();
        config
    }

    #[test]
    fn parse_duration_units() {
        use duration_serde::parse_duration;
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("12h").unwrap(), Duration::from_secs(43200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5fortnights").is_err());
    }

    #[test]
    fn defaults_match_policy() {
        let config = Config::default();
        assert_eq!(config.primary.session_ttl, Duration::from_secs(43200));
        assert_eq!(config.edge_cache.ttl, Duration::from_secs(14400));
        assert_eq!(config.response_cache.max_age, Duration::from_secs(3600));
        assert_eq!(
            config.response_cache.stale_if_error,
            Duration::from_secs(86400)
        );
    }

    #[test]
    fn validate_rejects_missing_credentials() {
        assert!(Config::default().validate().is_err());

        let mut config = valid_config();
        assert!(config.validate().is_ok());
        config.primary.application_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_roundtrip() {
        let yaml = r#"
server:
  bind_address: "127.0.0.1"
  port: 9090
  max_concurrent_requests: 16
  request_timeout: "10s"
primary:
  bucket_id: "bkt"
  key_id: "kid"
  application_key: "secret"
  base_url: "https://files.example.com"
  authorize_url: "https://api.example.com/authorize_account"
  session_ttl: "6h"
  session_cache_key: "session"
secondary:
  base_url: "https://backup.example.com"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.primary.session_ttl, Duration::from_secs(21600));
        assert_eq!(config.secondary.base_url, "https://backup.example.com");
        // Unspecified sections fall back to defaults
        assert_eq!(config.edge_cache.ttl, Duration::from_secs(14400));
        config.validate().unwrap();
    }
}
