//! Session, transport and expiry tunables.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// How enqueued messages reach the attached transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Send straight away when nothing is pending; otherwise coalesce on the
    /// next scheduler tick.
    #[default]
    Immediate,
    /// Always coalesce everything enqueued before the next tick into one frame.
    Batched,
}

impl FlushMode {
    /// Parse the lowercase name used in settings files and env vars.
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_lowercase().as_str() {
            "immediate" => Some(Self::Immediate),
            "batched" => Some(Self::Batched),
            _ => None,
        }
    }
}

/// Wire mechanisms a session can be carried over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportName {
    /// Full-duplex WebSocket.
    Websocket,
    /// Short-polling XHR.
    XhrPolling,
    /// Long-streaming XHR.
    XhrStreaming,
    /// Server-sent events stream.
    Eventsource,
    /// Callback-wrapped polling.
    JsonpPolling,
    /// Document streaming through a hidden iframe.
    Htmlfile,
}

impl TransportName {
    /// Every transport, in the order clients usually try them.
    pub const ALL: [Self; 6] = [
        Self::Websocket,
        Self::XhrStreaming,
        Self::XhrPolling,
        Self::Eventsource,
        Self::Htmlfile,
        Self::JsonpPolling,
    ];

    /// Settings/log name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Websocket => "websocket",
            Self::XhrPolling => "xhr_polling",
            Self::XhrStreaming => "xhr_streaming",
            Self::Eventsource => "eventsource",
            Self::JsonpPolling => "jsonp_polling",
            Self::Htmlfile => "htmlfile",
        }
    }
}

impl fmt::Display for TransportName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol behaviour shared by every session of one deployment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSettings {
    /// Interval between `h` frames on an attached transport.
    pub heartbeat_interval_ms: u64,
    /// Keep-alive window: a session with no activity for this long expires.
    pub disconnect_delay_ms: u64,
    /// Bytes a streaming response may carry before it is ended so the client
    /// reconnects.
    pub response_limit: usize,
    /// Optional wall-clock budget for one streaming response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_limit_ms: Option<u64>,
    /// Transports exposed by the router.
    pub enabled_transports: Vec<TransportName>,
    /// Reject re-attaches from an address other than the opening one.
    pub verify_ip: bool,
    /// Flush policy.
    pub flush_mode: FlushMode,
    /// Set/echo the `JSESSIONID` load-balancer affinity cookie.
    pub cookie_needed: bool,
    /// Interval of the expiry sweep.
    pub sweep_interval_ms: u64,
    /// Frames buffered per attached transport before it counts as stalled.
    pub send_queue_capacity: usize,
    /// Largest accepted request body / WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 25_000,
            disconnect_delay_ms: 5_000,
            response_limit: 128 * 1024,
            response_time_limit_ms: None,
            enabled_transports: TransportName::ALL.to_vec(),
            verify_ip: true,
            flush_mode: FlushMode::Immediate,
            cookie_needed: false,
            sweep_interval_ms: 1_000,
            send_queue_capacity: 1024,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ProtocolSettings {
    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Session keep-alive window as a [`Duration`].
    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }

    /// Expiry sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Streaming response time budget, if any.
    pub fn response_time_limit(&self) -> Option<Duration> {
        self.response_time_limit_ms.map(Duration::from_millis)
    }

    /// Whether a transport is enabled.
    pub fn is_enabled(&self, transport: TransportName) -> bool {
        self.enabled_transports.contains(&transport)
    }

    /// Reject values that would make sessions unusable.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.heartbeat_interval_ms == 0, "heartbeatIntervalMs", "must be > 0"),
            (self.disconnect_delay_ms == 0, "disconnectDelayMs", "must be > 0"),
            (self.response_limit == 0, "responseLimit", "must be > 0"),
            (self.sweep_interval_ms == 0, "sweepIntervalMs", "must be > 0"),
            (self.send_queue_capacity == 0, "sendQueueCapacity", "must be > 0"),
            (self.max_message_size == 0, "maxMessageSize", "must be > 0"),
            (
                self.response_time_limit_ms == Some(0),
                "responseTimeLimitMs",
                "must be > 0 when set",
            ),
        ];
        match checks.iter().find(|(failed, ..)| *failed) {
            Some(&(_, field, rule)) => Err(SettingsError::InvalidValue { field, rule }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_mode_parse() {
        assert_eq!(FlushMode::parse("Batched"), Some(FlushMode::Batched));
        assert_eq!(FlushMode::parse("immediate"), Some(FlushMode::Immediate));
        assert_eq!(FlushMode::parse("lazy"), None);
    }

    #[test]
    fn flush_mode_serde() {
        let json = serde_json::to_string(&FlushMode::Batched).unwrap();
        assert_eq!(json, "\"batched\"");
    }

    #[test]
    fn transport_names_serde_snake_case() {
        let json = serde_json::to_string(&TransportName::XhrStreaming).unwrap();
        assert_eq!(json, "\"xhr_streaming\"");
        let back: TransportName = serde_json::from_str("\"jsonp_polling\"").unwrap();
        assert_eq!(back, TransportName::JsonpPolling);
    }

    #[test]
    fn as_str_matches_serde() {
        for t in TransportName::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn all_transports_enabled_by_default() {
        let p = ProtocolSettings::default();
        for t in TransportName::ALL {
            assert!(p.is_enabled(t));
        }
    }

    #[test]
    fn disabled_transport() {
        let p = ProtocolSettings {
            enabled_transports: vec![TransportName::Websocket],
            ..ProtocolSettings::default()
        };
        assert!(p.is_enabled(TransportName::Websocket));
        assert!(!p.is_enabled(TransportName::XhrPolling));
    }

    #[test]
    fn durations() {
        let p = ProtocolSettings {
            response_time_limit_ms: Some(250),
            ..ProtocolSettings::default()
        };
        assert_eq!(p.heartbeat_interval(), Duration::from_secs(25));
        assert_eq!(p.disconnect_delay(), Duration::from_secs(5));
        assert_eq!(p.sweep_interval(), Duration::from_secs(1));
        assert_eq!(p.response_time_limit(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn validate_rejects_zero_limit() {
        let p = ProtocolSettings {
            response_limit: 0,
            ..ProtocolSettings::default()
        };
        let err = p.validate().unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidValue { field: "responseLimit", .. }
        ));
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        for (p, key) in [
            (
                ProtocolSettings { heartbeat_interval_ms: 0, ..ProtocolSettings::default() },
                "heartbeatIntervalMs",
            ),
            (
                ProtocolSettings { disconnect_delay_ms: 0, ..ProtocolSettings::default() },
                "disconnectDelayMs",
            ),
            (
                ProtocolSettings { sweep_interval_ms: 0, ..ProtocolSettings::default() },
                "sweepIntervalMs",
            ),
        ] {
            let err = p.validate().unwrap_err();
            assert_eq!(err.to_string(), format!("invalid settings value: {key} must be > 0"));
        }
    }

    #[test]
    fn validate_rejects_zero_time_limit() {
        let p = ProtocolSettings {
            response_time_limit_ms: Some(0),
            ..ProtocolSettings::default()
        };
        assert!(p.validate().is_err());
    }
}
