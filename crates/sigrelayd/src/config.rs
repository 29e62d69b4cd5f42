//! Daemon configuration.
//!
//! Values come from, lowest precedence first: built-in defaults, a TOML
//! file, the `SIGRELAY_BIND` environment variable and finally command-line
//! flags applied by the binary.
//!
//! ```toml
//! bind = "0.0.0.0:9765"
//! ping_interval_secs = 5.0
//! ping_timeout_secs = 10.0
//! handshake_timeout_secs = 10.0
//! max_message_size = 1048576
//! ```

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::session::{KeepAlive, PING_INTERVAL, PING_TIMEOUT};

/// Default listen address
pub const DEFAULT_BIND: &str = "0.0.0.0:9765";

/// Environment variable overriding the listen address
pub const BIND_ENV: &str = "SIGRELAY_BIND";

/// Default maximum message size (1 MB)
const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Default WebSocket handshake timeout
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration for the relay server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind: SocketAddr,

    /// Seconds between a pong and the next ping
    pub ping_interval_secs: f64,

    /// Seconds to wait for a pong before closing with 1002
    pub ping_timeout_secs: f64,

    /// Seconds allowed for the WebSocket handshake
    pub handshake_timeout_secs: f64,

    /// Largest accepted message, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9765)),
            ping_interval_secs: PING_INTERVAL.as_secs_f64(),
            ping_timeout_secs: PING_TIMEOUT.as_secs_f64(),
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT.as_secs_f64(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Loads `path` if given, else the default config file if it exists,
    /// else the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Applies `SIGRELAY_BIND` if set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(bind) = env::var(BIND_ENV) {
            self.bind = parse_bind(&bind)?;
        }
        Ok(())
    }

    /// Checks that every duration is a positive, representable number of
    /// seconds and that messages can carry at least one byte.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, secs) in [
            ("ping_interval_secs", self.ping_interval_secs),
            ("ping_timeout_secs", self.ping_timeout_secs),
            ("handshake_timeout_secs", self.handshake_timeout_secs),
        ] {
            to_duration(field, secs)?;
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_size",
                reason: "must be at least 1 byte".to_string(),
            });
        }
        Ok(())
    }

    /// Keep-alive timing. Values that fail [`validate`](Self::validate)
    /// fall back to the defaults.
    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive {
            interval: to_duration("ping_interval_secs", self.ping_interval_secs)
                .unwrap_or(PING_INTERVAL),
            timeout: to_duration("ping_timeout_secs", self.ping_timeout_secs)
                .unwrap_or(PING_TIMEOUT),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        to_duration("handshake_timeout_secs", self.handshake_timeout_secs)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

fn to_duration(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(ConfigError::Invalid {
            field,
            reason: format!("{secs} is not a positive number of seconds"),
        }),
    }
}

/// Parses a listen address such as `127.0.0.1:9765`.
pub fn parse_bind(value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        field: "bind",
        reason: format!("'{value}' is not a socket address"),
    })
}

/// Returns `$XDG_CONFIG_HOME/sigrelay/config.toml` (or the platform
/// equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sigrelay").join("config.toml"))
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
