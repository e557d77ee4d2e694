//! Client Configuration
//!
//! Connection settings resolved before the session starts. Values come from
//! defaults, environment variables or a JSON document.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::protocol::ProtocolRevision;

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 31001;

/// Placeholder token used when none is supplied.
pub const DEFAULT_TOKEN: &str = "0000000000000000";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Port is not a valid u16.
    #[error("invalid port: {0}")]
    InvalidPort(String),
    /// Protocol revision name is not known.
    #[error("unknown protocol revision: {0}")]
    UnknownProtocol(String),
    /// Boolean flag could not be parsed.
    #[error("invalid value for {0}: {1}")]
    InvalidFlag(&'static str, String),
    /// JSON document could not be parsed.
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Client connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Authentication token sent in the handshake.
    pub token: String,
    /// Server message shape to expect.
    pub protocol: ProtocolRevision,
    /// Acknowledge every debug update with `DebugUpdateDone`.
    pub debug_update_done: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            token: DEFAULT_TOKEN.to_string(),
            protocol: ProtocolRevision::default(),
            debug_update_done: false,
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    ///
    /// - `CODEGAME_HOST`
    /// - `CODEGAME_PORT`
    /// - `CODEGAME_TOKEN`
    /// - `CODEGAME_PROTOCOL` (`tagged` or `optional-view`)
    /// - `CODEGAME_DEBUG_UPDATE_DONE` (`1` / `true` / `0` / `false`)
    ///
    /// Unset variables keep their defaults; set but unparsable ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse config from a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Address to connect to.
    pub fn addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("CODEGAME_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("CODEGAME_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        if let Some(token) = lookup("CODEGAME_TOKEN") {
            config.token = token;
        }
        if let Some(protocol) = lookup("CODEGAME_PROTOCOL") {
            config.protocol = protocol.parse()?;
        }
        if let Some(flag) = lookup("CODEGAME_DEBUG_UPDATE_DONE") {
            config.debug_update_done = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => return Err(ConfigError::InvalidFlag("CODEGAME_DEBUG_UPDATE_DONE", flag)),
            };
        }

        Ok(config)
    }
}
