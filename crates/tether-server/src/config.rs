//! Server configuration.

use serde::{Deserialize, Serialize};
use tether_settings::{ProtocolSettings, TetherSettings};

/// Configuration for the tether server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Session and transport behaviour shared by every mounted endpoint.
    pub protocol: ProtocolSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            protocol: ProtocolSettings::default(),
        }
    }
}

impl From<&TetherSettings> for ServerConfig {
    fn from(settings: &TetherSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            protocol: settings.protocol.clone(),
        }
    }
}
