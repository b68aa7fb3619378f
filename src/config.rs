//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth::MAX_VERIFICATION_TTL;
use crate::auth::cache::DEFAULT_CLEANUP_INTERVAL;
use crate::gateway::auth::DEFAULT_PUBLIC_PATHS;
use crate::history::cache::DEFAULT_CAPACITY;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Credential verification
    pub auth: AuthConfig,
    /// Identity service
    pub identity: UpstreamConfig,
    /// Prediction service
    pub prediction: UpstreamConfig,
    /// Result history
    pub history: HistoryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Allowed CORS origin
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
            cors_origin: "http://localhost".to_string(),
        }
    }
}

/// Credential verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing secret. Supports a literal value or `env:VAR_NAME`.
    pub jwt_secret: String,
    /// How long a verdict is trusted (capped at 15 minutes)
    #[serde(with = "humantime_serde")]
    pub verification_ttl: Duration,
    /// Period of the verdict-cache sweep
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Ask the identity service for verdicts instead of checking locally
    pub remote_validation: bool,
    /// Paths that bypass authentication
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "env:JWT_SECRET".to_string(),
            verification_ttl: MAX_VERIFICATION_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            remote_validation: false,
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl AuthConfig {
    /// Resolve the signing secret (expand `env:VAR_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the referenced variable is unset or the secret is empty.
    pub fn resolve_secret(&self) -> Result<String> {
        let secret = match self.jwt_secret.strip_prefix("env:") {
            Some(var_name) => env::var(var_name).map_err(|_| {
                Error::Config(format!("JWT secret variable {var_name} is not set"))
            })?,
            None => self.jwt_secret.clone(),
        };
        if secret.is_empty() {
            return Err(Error::Config("JWT secret is empty".to_string()));
        }
        Ok(secret)
    }
}

/// A backend service reached over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL
    pub url: String,
    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Result history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Bound of the result cache's id index
    pub cache_capacity: usize,
    /// Durable store. Without it results are kept in process memory only.
    pub database: Option<DatabaseConfig>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            database: None,
        }
    }
}

/// Postgres connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL. Supports a literal value or `env:VAR_NAME`.
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "env:DATABASE_URL".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DatabaseConfig {
    /// Resolve the connection URL (expand `env:VAR_NAME`)
    ///
    /// # Errors
    ///
    /// Returns an error if the referenced variable is unset.
    pub fn resolve_url(&self) -> Result<String> {
        match self.url.strip_prefix("env:") {
            Some(var_name) => env::var(var_name).map_err(|_| {
                Error::Config(format!("database URL variable {var_name} is not set"))
            }),
            None => Ok(self.url.clone()),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            Self::with_backend_defaults(),
        ));

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (PREDICT_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("PREDICT_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in URLs and origins
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Defaults with each backend pointed at its usual port
    fn with_backend_defaults() -> Self {
        Self {
            prediction: UpstreamConfig {
                url: "http://localhost:6785".to_string(),
                ..UpstreamConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.identity.url = Self::expand_string(&re, &self.identity.url);
        self.prediction.url = Self::expand_string(&re, &self.prediction.url);
        self.server.cors_origin = Self::expand_string(&re, &self.server.cors_origin);
        if let Some(database) = &mut self.history.database {
            database.url = Self::expand_string(&re, &database.url);
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" must be tried before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            return number(ms).map(Duration::from_millis);
        }
        let (digits, unit_secs) = if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            // Assume seconds
            (s, 1)
        };
        number(digits)?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {s:?} is out of range"))
    }

    fn number(digits: &str) -> Result<u64, String> {
        digits
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration {digits:?}: {e}"))
    }
}
