//! Periodic `h` frames on an attached transport.
//!
//! Heartbeats only keep intermediaries from closing idle connections; they
//! carry no acknowledgement and detect nothing. A dead peer shows up as a
//! failed write (or a dropped response body) at the transport layer.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::Session;

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The handler was detached or replaced.
    Cancelled,
    /// A tick found no handler attached or the session no longer open.
    Idle,
    /// The session itself was dropped.
    SessionGone,
}

/// Send a heartbeat every `interval` until cancelled.
///
/// The first beat fires one full `interval` after the loop starts.
pub async fn run_heartbeat(
    session: Weak<Session>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(session) = session.upgrade() else {
                    return HeartbeatResult::SessionGone;
                };
                if !session.send_heartbeat() {
                    return HeartbeatResult::Idle;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tether_core::SessionId;
    use tether_settings::ProtocolSettings;

    use crate::app::testing::recorder_factory;
    use crate::session::{ConnectionInfo, Handler};
    use crate::transport::TransportKind;

    fn open_session(interval_ms: u64) -> (Arc<Session>, tokio::sync::mpsc::Receiver<String>) {
        let settings = Arc::new(ProtocolSettings {
            heartbeat_interval_ms: interval_ms,
            ..ProtocolSettings::default()
        });
        let (factory, _journal) = recorder_factory(false);
        let session = Session::new(SessionId::new(), settings.clone(), factory.create(), None);
        let (handler, rx) = Handler::new(TransportKind::Websocket, &settings);
        session.attach(handler, ConnectionInfo::default()).unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(Weak::new(), Duration::from_secs(100), cancel2).await
        });

        cancel.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result, HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_session_ends_loop() {
        let result = run_heartbeat(
            Weak::new(),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::SessionGone);
    }

    #[tokio::test(start_paused = true)]
    async fn attached_session_receives_heartbeats() {
        let (_session, mut rx) = open_session(1_000);
        assert_eq!(rx.recv().await.unwrap(), "o");

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(rx.recv().await.unwrap(), "h");
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(rx.recv().await.unwrap(), "h");
    }

    #[tokio::test(start_paused = true)]
    async fn detach_stops_heartbeats() {
        let (session, mut rx) = open_session(1_000);
        assert_eq!(rx.recv().await.unwrap(), "o");
        let handler_id = session.handler_id().unwrap();
        assert!(session.detach(handler_id));

        tokio::time::advance(Duration::from_secs(5)).await;
        // handler dropped, channel closed without any heartbeat
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_ends_loop() {
        let (session, _rx) = open_session(1_000);
        let handler_id = session.handler_id().unwrap();
        let _ = session.detach(handler_id);
        let result = run_heartbeat(
            Arc::downgrade(&session),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::Idle);
    }
}
