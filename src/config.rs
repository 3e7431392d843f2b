//! # Configuration Management
//!
//! Centralized configuration for the admin client.
//!
//! ## Configuration Sources
//! - TOML files via [`AdminConfig::from_file`]
//! - `OPENTTD_ADMIN_*` environment variables via [`AdminConfig::from_env`]
//! - Direct instantiation with defaults
//!
//! Every section is optional in TOML; missing sections and fields take their
//! defaults. Durations are written as milliseconds.

use crate::error::{ProtocolError, Result};
use crate::protocol::types::{UpdateFrequency, UpdateType};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default TCP port of the server's admin interface
pub const DEFAULT_ADMIN_PORT: u16 = 3977;

/// Name this client announces when joining
pub const DEFAULT_CLIENT_NAME: &str = "openttd-admin";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AdminConfig {
    /// Where and how to connect
    #[serde(default)]
    pub client: ClientConfig,

    /// Credentials, subscriptions and session timeouts
    #[serde(default)]
    pub session: SessionConfig,

    /// Packet encode/decode strictness
    #[serde(default)]
    pub codec: CodecConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AdminConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Unparsable numeric values are rejected rather than ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("OPENTTD_ADMIN_HOST") {
            config.client.host = host;
        }

        if let Some(port) = env_parse::<u16>("OPENTTD_ADMIN_PORT")? {
            config.client.port = port;
        }

        if let Some(millis) = env_parse::<u64>("OPENTTD_ADMIN_CONNECT_TIMEOUT_MS")? {
            config.client.connect_timeout = Duration::from_millis(millis);
        }

        if let Some(millis) = env_parse::<u64>("OPENTTD_ADMIN_SOCKET_TIMEOUT_MS")? {
            config.client.socket_timeout = Duration::from_millis(millis);
        }

        if let Ok(name) = std::env::var("OPENTTD_ADMIN_NAME") {
            config.session.name = name;
        }

        if let Ok(password) = std::env::var("OPENTTD_ADMIN_PASSWORD") {
            config.session.password = password;
        }

        if let Ok(level) = std::env::var("OPENTTD_ADMIN_LOG_LEVEL") {
            config.logging.log_level = level.parse().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level in environment: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.session.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            ProtocolError::ConfigError(format!("Invalid value for {key}: '{raw}'"))
        }),
        Err(_) => Ok(None),
    }
}

/// Connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,

    /// Admin port
    pub port: u16,

    /// Timeout for the TCP connect
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for each send and each blocking receive
    #[serde(with = "duration_serde")]
    pub socket_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: DEFAULT_ADMIN_PORT,
            connect_timeout: timeout::DEFAULT_TIMEOUT,
            socket_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("Server host cannot be empty".to_string());
        }

        if self.port == 0 {
            errors.push("Server port must be greater than 0".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.socket_timeout.as_millis() < 10 {
            errors.push("Socket timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Session settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name shown to the server for this admin connection
    pub name: String,

    /// Admin password configured on the server
    pub password: String,

    /// Client version string sent with the join packet
    pub version: String,

    /// How long to wait for the protocol and welcome packets
    #[serde(with = "duration_serde")]
    pub join_timeout: Duration,

    /// How long `send_rcon` waits for the end of the command output
    #[serde(with = "duration_serde")]
    pub rcon_timeout: Duration,

    /// Readiness timeout of one main loop iteration
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Subscriptions requested right after joining
    pub update_frequencies: BTreeMap<UpdateType, UpdateFrequency>,

    /// Lines privately sent to every game client that joins
    pub welcome_message: Option<Vec<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: String::from(DEFAULT_CLIENT_NAME),
            password: String::new(),
            version: String::from(env!("CARGO_PKG_VERSION")),
            join_timeout: timeout::JOIN_TIMEOUT,
            rcon_timeout: timeout::RCON_TIMEOUT,
            poll_interval: timeout::POLL_INTERVAL,
            update_frequencies: default_update_frequencies(),
            welcome_message: None,
        }
    }
}

/// Subscriptions a freshly joined session asks for
pub fn default_update_frequencies() -> BTreeMap<UpdateType, UpdateFrequency> {
    BTreeMap::from([
        (UpdateType::Date, UpdateFrequency::Daily),
        (UpdateType::ClientInfo, UpdateFrequency::Automatic),
        (UpdateType::CompanyInfo, UpdateFrequency::Automatic),
        (UpdateType::CompanyEconomy, UpdateFrequency::Weekly),
        (UpdateType::CompanyStats, UpdateFrequency::Weekly),
        (UpdateType::Chat, UpdateFrequency::Automatic),
        (UpdateType::Console, UpdateFrequency::Automatic),
    ])
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("Client name cannot be empty".to_string());
        } else if self.name.contains('\0') {
            errors.push("Client name cannot contain NUL characters".to_string());
        }

        if self.password.contains('\0') {
            errors.push("Password cannot contain NUL characters".to_string());
        }

        if self.join_timeout.as_millis() < 100 {
            errors.push("Join timeout too short (minimum: 100ms)".to_string());
        }

        if self.rcon_timeout.as_millis() < 100 {
            errors.push("RCON timeout too short (minimum: 100ms)".to_string());
        }

        if self.poll_interval.is_zero() {
            errors.push("Poll interval must be greater than 0".to_string());
        } else if self.poll_interval.as_secs() > 60 {
            errors.push("Poll interval too long (maximum: 60s)".to_string());
        }

        if let Some(lines) = &self.welcome_message {
            if lines.iter().any(|line| line.contains('\0')) {
                errors.push("Welcome message lines cannot contain NUL characters".to_string());
            }
        }

        errors
    }
}

/// Strictness of the packet codec.
///
/// Lenient encoding logs a failing field and emits the packet truncated at
/// that field. Lenient decoding logs and leaves the remaining fields unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecConfig {
    pub strict_encode: bool,
    pub strict_decode: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("openttd-admin"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AdminConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.client.port, DEFAULT_ADMIN_PORT);
        assert_eq!(
            config.session.update_frequencies.get(&UpdateType::Date),
            Some(&UpdateFrequency::Daily)
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AdminConfig::from_toml(
            r#"
            [client]
            port = 4000

            [session]
            password = "secret"
            welcome_message = ["hello", "have fun"]

            [session.update_frequencies]
            chat = "automatic"
            "#,
        )
        .unwrap();

        assert_eq!(config.client.port, 4000);
        assert_eq!(config.client.host, "localhost");
        assert_eq!(config.session.password, "secret");
        assert_eq!(config.session.update_frequencies.len(), 1);
        assert_eq!(
            config.session.welcome_message.as_deref(),
            Some(&["hello".to_string(), "have fun".to_string()][..])
        );
        assert!(!config.codec.strict_decode);
    }

    #[test]
    fn test_example_config_parses_back() {
        let example = AdminConfig::example_config();
        let parsed = AdminConfig::from_toml(&example).unwrap();
        assert_eq!(parsed.session.join_timeout, timeout::JOIN_TIMEOUT);
        assert_eq!(
            parsed.session.update_frequencies,
            default_update_frequencies()
        );
    }
}
