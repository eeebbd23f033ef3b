//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` on the JSON side and
//! implement [`Default`] with production values. `#[serde(default)]` allows
//! partial JSON: missing fields get their default during deserialization.

mod protocol;

pub use protocol::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9999 },
///   "protocol": { "flushMode": "batched", "verifyIp": false }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Session and transport behaviour.
    pub protocol: ProtocolSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// URL prefix the protocol endpoints are mounted under.
    pub prefix: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            prefix: "/echo".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`) or a full
    /// `EnvFilter` directive.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
