//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Per-prefix session count.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    /// Mount prefix.
    pub prefix: String,
    /// Registered sessions under it.
    pub sessions: usize,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered sessions across all endpoints.
    pub active_sessions: usize,
    /// Breakdown by endpoint.
    pub endpoints: Vec<EndpointHealth>,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, shutting_down: bool, endpoints: Vec<EndpointHealth>) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        active_sessions: endpoints.iter().map(|e| e.sessions).sum(),
        endpoints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(prefix: &str, sessions: usize) -> EndpointHealth {
        EndpointHealth {
            prefix: prefix.into(),
            sessions,
        }
    }

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), false, Vec::new());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn status_reports_shutdown() {
        let resp = health_check(Instant::now(), true, Vec::new());
        assert_eq!(resp.status, "shutting_down");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, false, Vec::new());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn sessions_summed_across_endpoints() {
        let resp = health_check(Instant::now(), false, vec![endpoint("/echo", 3), endpoint("/chat", 2)]);
        assert_eq!(resp.active_sessions, 5);
        assert_eq!(resp.endpoints.len(), 2);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), false, vec![endpoint("/echo", 1)]);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["active_sessions"], 1);
        assert_eq!(parsed["endpoints"][0]["prefix"], "/echo");
        assert!(parsed["uptime_secs"].is_number());
    }
}
