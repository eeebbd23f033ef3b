//! Close codes carried by `c[code,"reason"]` frames.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// `(code, message)` pair explaining why a session ended or why an attach
/// attempt was refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    /// Numeric close code.
    pub code: u16,
    /// Human-readable reason.
    pub message: Cow<'static, str>,
}

impl CloseReason {
    /// Default reason; also used when a session expires.
    pub const GO_AWAY: Self = Self::fixed(3000, "Go away!");
    /// A second transport tried to attach while one is still bound.
    pub const ANOTHER_CONNECTION: Self = Self::fixed(2010, "Another connection still open");
    /// Re-attach from an address other than the one that opened the session.
    pub const IP_MISMATCH: Self = Self::fixed(2011, "IP address mismatch");
    /// The attached transport failed mid-write or the client went away.
    pub const CONNECTION_INTERRUPTED: Self = Self::fixed(1002, "Connection interrupted");
    /// The application's message callback failed.
    pub const SERVER_ERROR: Self = Self::fixed(1011, "Server error");

    const fn fixed(code: u16, message: &'static str) -> Self {
        Self {
            code,
            message: Cow::Borrowed(message),
        }
    }

    /// Build a reason with an arbitrary message.
    pub fn new(code: u16, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Default for CloseReason {
    fn default() -> Self {
        Self::GO_AWAY
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_go_away() {
        assert_eq!(CloseReason::default(), CloseReason::GO_AWAY);
        assert_eq!(CloseReason::GO_AWAY.code, 3000);
    }

    #[test]
    fn another_connection_text() {
        assert_eq!(CloseReason::ANOTHER_CONNECTION.code, 2010);
        assert_eq!(
            CloseReason::ANOTHER_CONNECTION.message,
            "Another connection still open"
        );
    }

    #[test]
    fn custom_reason() {
        let r = CloseReason::new(4000, format!("bye {}", 1));
        assert_eq!(r.to_string(), "4000 bye 1");
    }
}
