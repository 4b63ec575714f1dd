//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Server settings are loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file named by the `JUSSI_CONFIG` env var
//!    (default `config/config.toml`)
//! 3. **Environment variables**: `JUSSI__*` overrides with `__` separators
//!    (e.g. `JUSSI__SERVER__BIND_PORT=9000`)
//!
//! The upstream routing tables live in a separate JSON document (see
//! [`UpstreamsDocument`]), pointed at by `upstreams_file`. TTL and timeout
//! entries are heterogeneous `[prefix, value]` pairs, which TOML cannot
//! express; the JSON document format is shared with the deployment tooling.
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 9000
//! batch_size_limit = 50
//!
//! [cache]
//! redis_url = "redis://127.0.0.1:6379/0"
//! ```
//!
//! ```json
//! {
//!   "upstreams": [
//!     {
//!       "name": "steemd",
//!       "translate_to_appbase": false,
//!       "urls": [["steemd", "https://api.steemit.com"]],
//!       "ttls": [["steemd", 3], ["steemd.database_api.get_block", -2]],
//!       "timeouts": [["steemd", 12]]
//!     }
//!   ],
//!   "limits": {"custom_json_size_limit": 8192, "accounts_blacklist": []}
//! }
//! ```

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, time::Duration};

use crate::{
    upstream::ws_pool::WsPoolConfig,
    validators::{Limits, DEFAULT_CUSTOM_JSON_SIZE_LIMIT},
};

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to read upstreams file {path}: {source}")]
    UpstreamsIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse upstreams file {path}: {source}")]
    UpstreamsJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One upstream block: a namespace label plus its three prefix tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamDefinition {
    pub name: String,
    #[serde(default)]
    pub translate_to_appbase: bool,
    #[serde(default)]
    pub urls: Vec<(String, String)>,
    #[serde(default)]
    pub ttls: Vec<(String, i64)>,
    #[serde(default)]
    pub timeouts: Vec<(String, u64)>,
}

/// Broadcast limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_custom_json_size_limit")]
    pub custom_json_size_limit: usize,
    #[serde(default)]
    pub accounts_blacklist: Vec<String>,
}

fn default_custom_json_size_limit() -> usize {
    DEFAULT_CUSTOM_JSON_SIZE_LIMIT
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            custom_json_size_limit: DEFAULT_CUSTOM_JSON_SIZE_LIMIT,
            accounts_blacklist: Vec::new(),
        }
    }
}

impl LimitsConfig {
    /// Converts to the runtime limits value used by the validators.
    #[must_use]
    pub fn to_limits(&self) -> Limits {
        Limits {
            custom_json_size_limit: self.custom_json_size_limit,
            accounts_blacklist: self.accounts_blacklist.iter().cloned().collect(),
        }
    }
}

/// The declarative upstream document: an ordered upstream list plus optional
/// limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamsDocument {
    pub upstreams: Vec<UpstreamDefinition>,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl UpstreamsDocument {
    /// Loads and parses the JSON upstreams document.
    ///
    /// # Errors
    ///
    /// I/O and JSON errors carry the offending path; an empty upstream list
    /// is rejected here, deeper invariants (steemd presence, URL schemes,
    /// namespace names) are enforced by [`crate::upstream::Router`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let raw = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::UpstreamsIo { path: path_str.clone(), source })?;
        let document: Self = serde_json::from_str(&raw)
            .map_err(|source| ConfigError::UpstreamsJson { path: path_str.clone(), source })?;

        if document.upstreams.is_empty() {
            return Err(ConfigError::Invalid(format!("{path_str}: no upstreams configured")));
        }
        Ok(document)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind. Defaults to `0.0.0.0`.
    pub bind_address: String,
    /// Port to listen on. Must be greater than 0. Defaults to `9000`.
    pub bind_port: u16,
    /// Concurrent in-flight RPC requests. Defaults to `1000`.
    pub max_concurrent_requests: usize,
    /// Request body ceiling in bytes. Defaults to 1 MiB.
    pub max_payload_bytes: usize,
    /// Maximum members in one batch. Defaults to `50`.
    pub batch_size_limit: usize,
    /// Fallback deadline (seconds) when a routed timeout is zero.
    pub default_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_owned(),
            bind_port: 9000,
            max_concurrent_requests: 1000,
            max_payload_bytes: 1024 * 1024,
            batch_size_limit: 50,
            default_timeout_seconds: 30,
        }
    }
}

/// Cache tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Remote tier URL (e.g. `redis://127.0.0.1:6379/0`); `None` disables
    /// the remote tier.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Capacity of the in-process tier.
    pub memory_max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { redis_url: None, memory_max_entries: 50_000 }
    }
}

/// WebSocket pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketSettings {
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self { min_size: 8, max_size: 8 }
    }
}

impl WebSocketSettings {
    /// Converts to the pool config, coercing `max_size < min_size` to
    /// `max_size = min_size`.
    #[must_use]
    pub fn to_pool_config(&self) -> WsPoolConfig {
        WsPoolConfig {
            min_size: self.min_size,
            max_size: self.max_size.max(self.min_size),
            ..WsPoolConfig::default()
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter when `RUST_LOG` is unset. Defaults to `"info"`.
    pub level: String,
    /// `"json"` or `"pretty"`. Defaults to `"json"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), format: "json".to_owned() }
    }
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Path to the JSON upstreams document. Defaults to
    /// `config/upstreams.json`.
    #[serde(default = "default_upstreams_file")]
    pub upstreams_file: String,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub websocket: WebSocketSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_upstreams_file() -> String {
    "config/upstreams.json".to_owned()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstreams_file: default_upstreams_file(),
            cache: CacheSettings::default(),
            websocket: WebSocketSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads settings from a TOML file with `JUSSI__*` environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be parsed or
    /// deserialized. A missing file falls back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(&path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("JUSSI").separator("__"))
            .build()?;

        let config: Self = builder.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from the path in `JUSSI_CONFIG`, defaulting to
    /// `config/config.toml`.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::from_file`].
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("JUSSI_CONFIG").unwrap_or_else(|_| "config/config.toml".to_owned());
        Self::from_file(path)
    }

    /// Rejects settings the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] with the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_port == 0 {
            return Err(ConfigError::Invalid("server.bind_port must be greater than 0".into()));
        }
        if self.server.batch_size_limit == 0 {
            return Err(ConfigError::Invalid(
                "server.batch_size_limit must be greater than 0".into(),
            ));
        }
        if self.server.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_payload_bytes must be greater than 0".into(),
            ));
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "server.max_concurrent_requests must be greater than 0".into(),
            ));
        }
        if self.cache.memory_max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.memory_max_entries must be greater than 0".into(),
            ));
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Invalid("logging.format must be 'json' or 'pretty'".into()));
        }
        Ok(())
    }

    /// The server's bind address as a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                ))
            })
    }

    /// The fallback deadline for zero-timeout routes.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.server.default_timeout_seconds)
    }
}
