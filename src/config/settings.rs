//! Configuration settings for the hookgate daemon.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::SignatureAlgorithm;
use crate::error::GatewayError;

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub socket: SocketConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub headers: HeadersConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Path to the Unix socket file.
    #[serde(default = "default_socket_path")]
    pub path: PathBuf,
    /// Socket file permissions (e.g., "0660").
    #[serde(default = "default_socket_permissions")]
    pub permissions: String,
}

/// Verification security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Path to the TOML secrets file.
    pub secrets_path: PathBuf,
    /// HMAC algorithm senders sign with.
    #[serde(default)]
    pub algorithm: SignatureAlgorithm,
    /// Nonce time-to-live in seconds.
    #[serde(default = "default_nonce_ttl")]
    pub nonce_ttl_seconds: u64,
    /// Maximum allowed drift of the declared timestamp. Unset disables the check.
    #[serde(default)]
    pub max_drift_seconds: Option<u64>,
    /// Reject requests without a timestamp header when drift checking is on.
    #[serde(default)]
    pub require_timestamp: bool,
    /// Upper bound on a single secret lookup.
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Upper bound on post-verification hooks for a single request.
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,
    /// Cache resolved secrets for this long. Zero disables caching.
    #[serde(default)]
    pub secret_cache_ttl_seconds: u64,
}

/// Header names, matched case-insensitively.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HeadersConfig {
    #[serde(default = "default_signature_header")]
    pub signature: String,
    #[serde(default = "default_nonce_header")]
    pub nonce: String,
    #[serde(default = "default_secret_version_header")]
    pub secret_version: String,
    #[serde(default = "default_timestamp_header")]
    pub timestamp: String,
}

/// Which store backs replay protection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayBackend {
    #[default]
    Memory,
    Redis,
}

/// Replay protection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub backend: ReplayBackend,
    /// Interval of the expired-nonce sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Upper bound on live nonces kept in memory.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Upper bound on a single store operation.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Answer from the in-memory store when the shared store fails.
    #[serde(default)]
    pub local_fallback: bool,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Prefix for nonce keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Limits configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum concurrent connections.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_connections: usize,
    /// Socket read/write timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Path to the audit log file.
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,
}

// Default value functions
fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/hookgate/hookgate.sock")
}

fn default_socket_permissions() -> String {
    "0660".to_string()
}

fn default_secrets_path() -> PathBuf {
    PathBuf::from("/etc/hookgate/secrets.toml")
}

fn default_nonce_ttl() -> u64 {
    300
}

fn default_resolve_timeout_ms() -> u64 {
    2_000
}

fn default_hook_timeout_ms() -> u64 {
    1000
}

fn default_signature_header() -> String {
    "X-Hub-Signature-256".to_string()
}

fn default_nonce_header() -> String {
    "X-Event-Nonce".to_string()
}

fn default_secret_version_header() -> String {
    "X-Signature-Version".to_string()
}

fn default_timestamp_header() -> String {
    "X-Event-Timestamp".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_entries() -> usize {
    crate::auth::DEFAULT_MAX_ENTRIES
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "hookgate:nonce:".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_max_message_size() -> usize {
    1_048_576 // 1MB
}

fn default_max_concurrent() -> usize {
    100
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_audit_enabled() -> bool {
    false
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/var/log/hookgate/audit.log")
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: default_socket_path(),
            permissions: default_socket_permissions(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secrets_path: default_secrets_path(),
            algorithm: SignatureAlgorithm::default(),
            nonce_ttl_seconds: default_nonce_ttl(),
            max_drift_seconds: None,
            require_timestamp: false,
            resolve_timeout_ms: default_resolve_timeout_ms(),
            hook_timeout_ms: default_hook_timeout_ms(),
            secret_cache_ttl_seconds: 0,
        }
    }
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            signature: default_signature_header(),
            nonce: default_nonce_header(),
            secret_version: default_secret_version_header(),
            timestamp: default_timestamp_header(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            backend: ReplayBackend::default(),
            sweep_interval_seconds: default_sweep_interval(),
            max_entries: default_max_entries(),
            store_timeout_ms: default_store_timeout_ms(),
            local_fallback: false,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_concurrent_connections: default_max_concurrent(),
            socket_timeout_seconds: default_socket_timeout(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            log_path: default_audit_log_path(),
        }
    }
}

impl SecurityConfig {
    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_seconds)
    }

    pub fn max_drift(&self) -> Option<Duration> {
        self.max_drift_seconds.map(Duration::from_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| GatewayError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            GatewayError::Config { message } => GatewayError::Config {
                message: format!("{} ({})", message, path.display()),
            },
            other => other,
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, GatewayError> {
        let settings: Settings = toml::from_str(content).map_err(|e| GatewayError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), GatewayError> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(GatewayError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        // Validate log format
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(GatewayError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        // Validate socket permissions format
        if u32::from_str_radix(&self.socket.permissions, 8).is_err() {
            return Err(GatewayError::Config {
                message: format!(
                    "Invalid socket permissions '{}'. Must be octal (e.g., '0660')",
                    self.socket.permissions
                ),
            });
        }

        if self.security.nonce_ttl_seconds == 0 {
            return Err(GatewayError::Config {
                message: "security.nonce_ttl_seconds must be greater than zero".to_string(),
            });
        }

        if self.replay.sweep_interval_seconds == 0 {
            return Err(GatewayError::Config {
                message: "replay.sweep_interval_seconds must be greater than zero".to_string(),
            });
        }

        if self.replay.max_entries == 0 {
            return Err(GatewayError::Config {
                message: "replay.max_entries must be greater than zero".to_string(),
            });
        }

        let headers = [
            ("signature", &self.headers.signature),
            ("nonce", &self.headers.nonce),
            ("secret_version", &self.headers.secret_version),
            ("timestamp", &self.headers.timestamp),
        ];
        for (field, name) in headers {
            if name.trim().is_empty() {
                return Err(GatewayError::Config {
                    message: format!("headers.{} must not be empty", field),
                });
            }
        }

        Ok(())
    }
}
